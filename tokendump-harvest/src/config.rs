//! Harvester configuration.
//!
//! Persisted as JSON under the tokendump config directory; every field has
//! a default so a missing or partial file still yields a working setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use tokendump_cache::persistence::{default_cache_path, load_json_or_default, save_json};
use tokendump_cache::CacheError;

use crate::error::HarvestError;

/// Harvester configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Apps per batched catalog request.
    pub page_size: usize,

    /// Maximum hours between refresh cycles for one bot.
    pub refresh_interval_hours: u64,

    /// Seconds between a catalog change notification and the refresh it
    /// triggers, so bursts of notifications coalesce into one cycle.
    pub nudge_delay_secs: u64,

    /// Hours between uploads to the submission endpoint.
    pub submit_interval_hours: u64,

    /// Lower bound, in minutes, of the randomized delay before the first
    /// upload and after a rate-limited one.
    pub submit_delay_min_minutes: u64,

    /// Upper bound, in minutes, of the randomized submission delay.
    pub submit_delay_max_minutes: u64,

    /// Base URL of the submission endpoint.
    pub submit_base_url: String,

    /// Contributor account id credited for submissions. When absent or not
    /// an individual account, the connected bot with the most owned
    /// packages is credited instead.
    pub contributor_id: Option<u64>,

    /// Override for the fact cache snapshot location.
    pub cache_file: Option<PathBuf>,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            page_size: 255,
            refresh_interval_hours: 8,
            nudge_delay_secs: 60,
            submit_interval_hours: 24,
            submit_delay_min_minutes: 5,
            submit_delay_max_minutes: 60,
            submit_base_url: "https://api.tokendump.dev".to_string(),
            contributor_id: None,
            cache_file: None,
        }
    }
}

impl HarvestConfig {
    /// Loads configuration from `path`, falling back to defaults if the
    /// file is missing or unreadable.
    pub async fn load_or_default(path: &Path) -> Self {
        load_json_or_default(path).await
    }

    /// Writes the configuration to `path`.
    pub async fn save(&self, path: &Path) -> Result<(), CacheError> {
        save_json(path, self).await
    }

    /// Validates invariants the rest of the system relies on.
    pub fn validate(&self) -> Result<(), HarvestError> {
        if self.page_size == 0 {
            return Err(HarvestError::InvalidConfig("page_size must be positive".into()));
        }
        if self.submit_delay_min_minutes > self.submit_delay_max_minutes {
            return Err(HarvestError::InvalidConfig(
                "submit_delay_min_minutes exceeds submit_delay_max_minutes".into(),
            ));
        }
        if self.submit_delay_max_minutes * 60 >= self.submit_interval_hours * 3600 {
            return Err(HarvestError::InvalidConfig(
                "submission jitter must stay below the submission interval".into(),
            ));
        }
        if self.submit_base_url.is_empty() {
            return Err(HarvestError::InvalidConfig("submit_base_url must be set".into()));
        }
        Ok(())
    }

    /// Maximum time between refresh cycles.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_hours * 3600)
    }

    /// Delay between a catalog change notification and the refresh.
    pub fn nudge_delay(&self) -> Duration {
        Duration::from_secs(self.nudge_delay_secs)
    }

    /// Time between uploads.
    pub fn submit_interval(&self) -> Duration {
        Duration::from_secs(self.submit_interval_hours * 3600)
    }

    /// Bounds of the randomized submission delay.
    pub fn submit_delay_bounds(&self) -> (Duration, Duration) {
        (
            Duration::from_secs(self.submit_delay_min_minutes * 60),
            Duration::from_secs(self.submit_delay_max_minutes * 60),
        )
    }

    /// Full URL of the submission endpoint.
    pub fn submit_url(&self) -> String {
        format!("{}/submit", self.submit_base_url.trim_end_matches('/'))
    }

    /// Effective fact cache snapshot path.
    pub fn cache_path(&self) -> PathBuf {
        self.cache_file.clone().unwrap_or_else(default_cache_path)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        HarvestConfig::default().validate().unwrap();
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let config = HarvestConfig {
            page_size: 0,
            ..HarvestConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inverted_delay_bounds_rejected() {
        let config = HarvestConfig {
            submit_delay_min_minutes: 90,
            submit_delay_max_minutes: 10,
            ..HarvestConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_jitter_must_undercut_interval() {
        let config = HarvestConfig {
            submit_interval_hours: 1,
            submit_delay_max_minutes: 60,
            ..HarvestConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_submit_url_normalizes_trailing_slash() {
        let config = HarvestConfig {
            submit_base_url: "https://host/".into(),
            ..HarvestConfig::default()
        };
        assert_eq!(config.submit_url(), "https://host/submit");
    }

    #[tokio::test]
    async fn test_load_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = HarvestConfig::load_or_default(&dir.path().join("absent.json")).await;
        assert_eq!(config.page_size, 255);
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = HarvestConfig {
            contributor_id: Some(42),
            ..HarvestConfig::default()
        };
        config.save(&path).await.unwrap();

        let loaded = HarvestConfig::load_or_default(&path).await;
        assert_eq!(loaded.contributor_id, Some(42));
    }
}
