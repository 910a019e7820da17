//! File persistence helpers.
//!
//! JSON snapshots are written atomically (temp file + rename) with
//! restrictive permissions; harvested tokens and keys are credentials and
//! must not be world-readable.

use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::error::CacheError;

// ============================================================================
// Default Paths
// ============================================================================

/// Returns the default configuration directory.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|c| c.join("tokendump"))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns the default cache directory.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|c| c.join("tokendump"))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns the default config file path.
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.json")
}

/// Returns the default fact cache snapshot path.
pub fn default_cache_path() -> PathBuf {
    default_cache_dir().join("facts.json")
}

// ============================================================================
// Security: File Permissions
// ============================================================================

/// Sets owner-only file permissions (0o600) on Unix systems.
#[cfg(unix)]
async fn set_restrictive_permissions(path: &Path) -> Result<(), CacheError> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = tokio::fs::metadata(path).await?;
    let mut perms = metadata.permissions();
    perms.set_mode(0o600);
    tokio::fs::set_permissions(path, perms).await?;
    Ok(())
}

/// No-op for non-Unix systems.
#[cfg(not(unix))]
async fn set_restrictive_permissions(_path: &Path) -> Result<(), CacheError> {
    Ok(())
}

// ============================================================================
// File Operations
// ============================================================================

/// Saves data to a JSON file with secure permissions.
///
/// Creates parent directories if they don't exist and writes atomically via
/// a temp file followed by a rename.
pub async fn save_json<T: Serialize>(path: &Path, data: &T) -> Result<(), CacheError> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            debug!(path = %parent.display(), "Creating directory");
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let json = serde_json::to_string_pretty(data)?;

    let temp_path = path.with_extension("json.tmp");
    tokio::fs::write(&temp_path, &json).await?;
    tokio::fs::rename(&temp_path, path).await?;

    set_restrictive_permissions(path).await?;

    debug!(path = %path.display(), "Snapshot saved");
    Ok(())
}

/// Loads data from a JSON file.
pub async fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, CacheError> {
    let content = tokio::fs::read_to_string(path).await?;
    let data = serde_json::from_str(&content)?;
    debug!(path = %path.display(), "Snapshot loaded");
    Ok(data)
}

/// Loads data from a JSON file, returning defaults if missing or invalid.
pub async fn load_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    match load_json(path).await {
        Ok(data) => data,
        Err(e) => {
            if !matches!(e, CacheError::Io(_)) {
                warn!(path = %path.display(), error = %e, "Failed to load snapshot, starting fresh");
            }
            T::default()
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn test_default_paths() {
        assert!(default_cache_path().ends_with("facts.json"));
        assert!(default_config_path().ends_with("config.json"));
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");

        let data = Sample {
            name: "x".into(),
            count: 7,
        };
        save_json(&path, &data).await.unwrap();

        let loaded: Sample = load_json(&path).await.unwrap();
        assert_eq!(loaded, data);
    }

    #[tokio::test]
    async fn test_missing_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");

        let loaded: Sample = load_json_or_default(&path).await;
        assert_eq!(loaded, Sample::default());
    }

    #[tokio::test]
    async fn test_corrupt_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();

        let loaded: Sample = load_json_or_default(&path).await;
        assert_eq!(loaded, Sample::default());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_snapshot_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("perms.json");
        save_json(&path, &Sample::default()).await.unwrap();

        let metadata = tokio::fs::metadata(&path).await.unwrap();
        assert_eq!(metadata.permissions().mode() & 0o777, 0o600);
    }
}
