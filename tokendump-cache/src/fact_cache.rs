//! The accumulating fact cache.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use tokendump_core::{AccessToken, AppId, ChangeNumber, DepotId, PackageId};

use crate::error::CacheError;
use crate::persistence::{load_json_or_default, save_json};

// ============================================================================
// Snapshot State
// ============================================================================

/// The serialized cache snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct CacheState {
    /// Access tokens granted per app.
    app_tokens: HashMap<AppId, AccessToken>,
    /// Apps the catalog refused to grant a token for. Mutually exclusive
    /// with `app_tokens` per key.
    app_tokens_denied: HashSet<AppId>,
    /// Last seen change number per app; only ever advances.
    app_change_numbers: HashMap<AppId, ChangeNumber>,
    /// Access tokens per package.
    package_tokens: HashMap<PackageId, AccessToken>,
    /// Decryption keys per depot, hex-encoded.
    depot_keys: HashMap<DepotId, String>,
    /// App tokens already acknowledged by the submission endpoint.
    submitted_apps: HashSet<AppId>,
    /// Package tokens already acknowledged.
    submitted_packages: HashSet<PackageId>,
    /// Depot keys already acknowledged.
    submitted_depots: HashSet<DepotId>,
    /// High-water mark of the catalog change feed.
    last_change_number: ChangeNumber,
    /// When the snapshot was last mutated.
    updated_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Cache Stats
// ============================================================================

/// Summary counts over the cache, for operator tooling.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    /// Known app tokens.
    pub app_tokens: usize,
    /// Apps with token denied.
    pub app_tokens_denied: usize,
    /// Known app change numbers.
    pub app_change_numbers: usize,
    /// Known package tokens.
    pub package_tokens: usize,
    /// Known depot keys.
    pub depot_keys: usize,
    /// App tokens not yet submitted.
    pub pending_apps: usize,
    /// Package tokens not yet submitted.
    pub pending_packages: usize,
    /// Depot keys not yet submitted.
    pub pending_depots: usize,
    /// High-water mark of the catalog change feed.
    pub last_change_number: ChangeNumber,
    /// When the snapshot was last mutated.
    pub updated_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Fact Cache
// ============================================================================

/// Persisted, mutation-tracked fact store.
///
/// One instance per process, shared by every refresh cycle and the
/// submission coordinator. All synchronization is internal; callers never
/// hold an external lock. Merges are idempotent and monotonic, so repeated
/// or partially re-applied updates are harmless.
pub struct FactCache {
    path: Option<PathBuf>,
    state: Mutex<CacheState>,
}

impl FactCache {
    /// Loads the cache from `path`, starting empty if no valid snapshot
    /// exists.
    pub async fn load(path: PathBuf) -> Self {
        let state: CacheState = load_json_or_default(&path).await;
        info!(
            path = %path.display(),
            app_tokens = state.app_tokens.len(),
            depot_keys = state.depot_keys.len(),
            last_change_number = state.last_change_number,
            "Fact cache loaded"
        );
        Self {
            path: Some(path),
            state: Mutex::new(state),
        }
    }

    /// Creates an unpersisted cache. Used by tests and dry runs.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(CacheState::default()),
        }
    }

    // ========================================================================
    // Refresh Predicates
    // ========================================================================

    /// Whether an app's product info is worth fetching again.
    ///
    /// True when we have no change number for it, or no token verdict at
    /// all (neither granted nor denied).
    pub async fn should_refresh_app_info(&self, app_id: AppId) -> bool {
        let state = self.state.lock().await;
        !state.app_change_numbers.contains_key(&app_id)
            || (!state.app_tokens.contains_key(&app_id)
                && !state.app_tokens_denied.contains(&app_id))
    }

    /// Whether a depot's decryption key is still missing.
    pub async fn should_refresh_depot_key(&self, depot_id: DepotId) -> bool {
        !self.state.lock().await.depot_keys.contains_key(&depot_id)
    }

    // ========================================================================
    // Merges
    // ========================================================================

    /// Merges an access-token batch into the cache.
    ///
    /// A granted token clears a previous denial and vice versa; the two
    /// verdict sets stay mutually exclusive per app.
    pub async fn update_app_tokens(
        &self,
        granted: &HashMap<AppId, AccessToken>,
        denied: &HashSet<AppId>,
    ) -> Result<(), CacheError> {
        if granted.is_empty() && denied.is_empty() {
            return Ok(());
        }

        let mut state = self.state.lock().await;
        for (&app_id, &token) in granted {
            state.app_tokens.insert(app_id, token);
            state.app_tokens_denied.remove(&app_id);
        }
        for &app_id in denied {
            state.app_tokens_denied.insert(app_id);
            state.app_tokens.remove(&app_id);
        }
        debug!(granted = granted.len(), denied = denied.len(), "App tokens merged");
        self.persist(&mut state).await
    }

    /// Merges package tokens into the cache.
    pub async fn update_package_tokens(
        &self,
        tokens: &HashMap<PackageId, AccessToken>,
    ) -> Result<(), CacheError> {
        if tokens.is_empty() {
            return Ok(());
        }

        let mut state = self.state.lock().await;
        for (&package_id, &token) in tokens {
            state.package_tokens.insert(package_id, token);
        }
        debug!(count = tokens.len(), "Package tokens merged");
        self.persist(&mut state).await
    }

    /// Merges app change numbers into the cache.
    ///
    /// Change numbers only advance: an update not newer than the stored
    /// value is a no-op, not an error.
    pub async fn update_app_change_numbers(
        &self,
        numbers: &HashMap<AppId, ChangeNumber>,
    ) -> Result<(), CacheError> {
        if numbers.is_empty() {
            return Ok(());
        }

        let mut state = self.state.lock().await;
        let mut merged = 0usize;
        for (&app_id, &change_number) in numbers {
            match state.app_change_numbers.get(&app_id) {
                Some(&known) if known >= change_number => {}
                _ => {
                    state.app_change_numbers.insert(app_id, change_number);
                    merged += 1;
                }
            }
        }

        if merged == 0 {
            return Ok(());
        }
        debug!(merged, "App change numbers merged");
        self.persist(&mut state).await
    }

    /// Merges depot decryption keys into the cache.
    pub async fn update_depot_keys(
        &self,
        keys: Vec<(DepotId, String)>,
    ) -> Result<(), CacheError> {
        if keys.is_empty() {
            return Ok(());
        }

        let mut state = self.state.lock().await;
        let count = keys.len();
        for (depot_id, key) in keys {
            state.depot_keys.insert(depot_id, key);
        }
        debug!(count, "Depot keys merged");
        self.persist(&mut state).await
    }

    // ========================================================================
    // Change Feed
    // ========================================================================

    /// Applies a catalog change notification.
    ///
    /// Apps whose known change number differs from the announced one are
    /// evicted from the change-number map so they become refresh-eligible
    /// again, then the feed high-water mark advances.
    pub async fn on_catalog_changes(
        &self,
        current_change_number: ChangeNumber,
        app_changes: &HashMap<AppId, ChangeNumber>,
    ) -> Result<(), CacheError> {
        let mut state = self.state.lock().await;

        let mut evicted = 0usize;
        for (&app_id, &change_number) in app_changes {
            if let Some(&known) = state.app_change_numbers.get(&app_id) {
                if known != change_number {
                    state.app_change_numbers.remove(&app_id);
                    evicted += 1;
                }
            }
        }

        if current_change_number < state.last_change_number {
            warn!(
                current = current_change_number,
                stored = state.last_change_number,
                "Catalog change number regressed"
            );
        }
        state.last_change_number = current_change_number;

        debug!(
            evicted,
            change_number = current_change_number,
            "Catalog changes applied"
        );
        self.persist(&mut state).await
    }

    /// Rewinds the feed high-water mark after the upstream feed signalled a
    /// restart, forcing a re-walk from the supplied change number.
    pub async fn on_catalog_restart(
        &self,
        current_change_number: ChangeNumber,
    ) -> Result<(), CacheError> {
        let mut state = self.state.lock().await;
        info!(
            from = state.last_change_number,
            to = current_change_number,
            "Catalog feed restarted"
        );
        state.last_change_number = current_change_number;
        self.persist(&mut state).await
    }

    /// Current high-water mark of the catalog change feed.
    pub async fn last_change_number(&self) -> ChangeNumber {
        self.state.lock().await.last_change_number
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    /// Returns the known access token for an app, if any.
    pub async fn app_token(&self, app_id: AppId) -> Option<AccessToken> {
        self.state.lock().await.app_tokens.get(&app_id).copied()
    }

    /// Summary counts for operator tooling.
    pub async fn stats(&self) -> CacheStats {
        let state = self.state.lock().await;
        CacheStats {
            app_tokens: state.app_tokens.len(),
            app_tokens_denied: state.app_tokens_denied.len(),
            app_change_numbers: state.app_change_numbers.len(),
            package_tokens: state.package_tokens.len(),
            depot_keys: state.depot_keys.len(),
            pending_apps: state
                .app_tokens
                .keys()
                .filter(|id| !state.submitted_apps.contains(*id))
                .count(),
            pending_packages: state
                .package_tokens
                .keys()
                .filter(|id| !state.submitted_packages.contains(*id))
                .count(),
            pending_depots: state
                .depot_keys
                .keys()
                .filter(|id| !state.submitted_depots.contains(*id))
                .count(),
            last_change_number: state.last_change_number,
            updated_at: state.updated_at,
        }
    }

    // ========================================================================
    // Submission
    // ========================================================================

    /// Snapshot of app tokens not yet acknowledged upstream.
    pub async fn app_tokens_for_submission(&self) -> HashMap<AppId, AccessToken> {
        let state = self.state.lock().await;
        state
            .app_tokens
            .iter()
            .filter(|(id, _)| !state.submitted_apps.contains(*id))
            .map(|(&id, &token)| (id, token))
            .collect()
    }

    /// Snapshot of package tokens not yet acknowledged upstream.
    pub async fn package_tokens_for_submission(&self) -> HashMap<PackageId, AccessToken> {
        let state = self.state.lock().await;
        state
            .package_tokens
            .iter()
            .filter(|(id, _)| !state.submitted_packages.contains(*id))
            .map(|(&id, &token)| (id, token))
            .collect()
    }

    /// Snapshot of depot keys not yet acknowledged upstream.
    pub async fn depot_keys_for_submission(&self) -> HashMap<DepotId, String> {
        let state = self.state.lock().await;
        state
            .depot_keys
            .iter()
            .filter(|(id, _)| !state.submitted_depots.contains(*id))
            .map(|(&id, key)| (id, key.clone()))
            .collect()
    }

    /// Marks the supplied fact keys as acknowledged by the submission
    /// endpoint.
    ///
    /// Keys must already be known; unknown keys are skipped with a warning,
    /// they indicate a submission/refresh ordering bug.
    pub async fn update_submitted(
        &self,
        apps: &[AppId],
        packages: &[PackageId],
        depots: &[DepotId],
    ) -> Result<(), CacheError> {
        let mut state = self.state.lock().await;

        for &app_id in apps {
            if state.app_tokens.contains_key(&app_id) {
                state.submitted_apps.insert(app_id);
            } else {
                warn!(app_id, "Submitted app token is not in the cache");
            }
        }
        for &package_id in packages {
            if state.package_tokens.contains_key(&package_id) {
                state.submitted_packages.insert(package_id);
            } else {
                warn!(package_id, "Submitted package token is not in the cache");
            }
        }
        for &depot_id in depots {
            if state.depot_keys.contains_key(&depot_id) {
                state.submitted_depots.insert(depot_id);
            } else {
                warn!(depot_id, "Submitted depot key is not in the cache");
            }
        }

        self.persist(&mut state).await
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Persists the whole snapshot. Called with the state lock held so
    /// writes are linearizable with respect to concurrent mutators.
    async fn persist(&self, state: &mut CacheState) -> Result<(), CacheError> {
        state.updated_at = Some(Utc::now());
        if let Some(path) = &self.path {
            save_json(path, &*state).await?;
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn map<K: std::hash::Hash + Eq, V>(pairs: Vec<(K, V)>) -> HashMap<K, V> {
        pairs.into_iter().collect()
    }

    #[tokio::test]
    async fn test_change_numbers_are_monotonic() {
        let cache = FactCache::in_memory();

        cache
            .update_app_change_numbers(&map(vec![(10, 100)]))
            .await
            .unwrap();

        // An older value is a no-op: a catalog notification matching the
        // original value must not evict the app afterwards.
        cache
            .update_app_change_numbers(&map(vec![(10, 50)]))
            .await
            .unwrap();
        cache.on_catalog_changes(100, &map(vec![(10, 100)])).await.unwrap();
        assert_eq!(cache.stats().await.app_change_numbers, 1);

        // A newer value advances: the app now differs from 100 and gets
        // evicted by the same notification.
        cache
            .update_app_change_numbers(&map(vec![(10, 101)]))
            .await
            .unwrap();
        cache.on_catalog_changes(101, &map(vec![(10, 100)])).await.unwrap();
        assert_eq!(cache.stats().await.app_change_numbers, 0);
    }

    #[tokio::test]
    async fn test_should_refresh_app_info() {
        let cache = FactCache::in_memory();
        assert!(cache.should_refresh_app_info(1).await);

        cache
            .update_app_change_numbers(&map(vec![(1, 5)]))
            .await
            .unwrap();
        // Change number known but no token verdict yet.
        assert!(cache.should_refresh_app_info(1).await);

        cache
            .update_app_tokens(&map(vec![(1, 777)]), &HashSet::new())
            .await
            .unwrap();
        assert!(!cache.should_refresh_app_info(1).await);

        // A denial is also a verdict.
        let cache = FactCache::in_memory();
        cache
            .update_app_change_numbers(&map(vec![(2, 5)]))
            .await
            .unwrap();
        cache
            .update_app_tokens(&HashMap::new(), &HashSet::from([2]))
            .await
            .unwrap();
        assert!(!cache.should_refresh_app_info(2).await);
    }

    #[tokio::test]
    async fn test_token_and_denial_are_exclusive() {
        let cache = FactCache::in_memory();

        cache
            .update_app_tokens(&HashMap::new(), &HashSet::from([3]))
            .await
            .unwrap();
        cache
            .update_app_tokens(&map(vec![(3, 42)]), &HashSet::new())
            .await
            .unwrap();

        let stats = cache.stats().await;
        assert_eq!(stats.app_tokens, 1);
        assert_eq!(stats.app_tokens_denied, 0);
    }

    #[tokio::test]
    async fn test_catalog_changes_evict_stale_apps() {
        let cache = FactCache::in_memory();
        cache
            .update_app_change_numbers(&map(vec![(1, 10), (2, 20), (3, 30)]))
            .await
            .unwrap();

        // App 1 changed, app 2 unchanged, app 4 unknown.
        cache
            .on_catalog_changes(40, &map(vec![(1, 11), (2, 20), (4, 44)]))
            .await
            .unwrap();

        assert!(cache.should_refresh_app_info(1).await);
        assert_eq!(cache.last_change_number().await, 40);
        assert_eq!(cache.stats().await.app_change_numbers, 2);
    }

    #[tokio::test]
    async fn test_catalog_restart_rewinds_watermark() {
        let cache = FactCache::in_memory();
        cache.on_catalog_changes(100, &HashMap::new()).await.unwrap();
        cache.on_catalog_restart(50).await.unwrap();
        assert_eq!(cache.last_change_number().await, 50);
    }

    #[tokio::test]
    async fn test_submission_idempotence() {
        let cache = FactCache::in_memory();
        cache
            .update_app_tokens(&map(vec![(1, 11), (2, 22)]), &HashSet::new())
            .await
            .unwrap();
        cache
            .update_package_tokens(&map(vec![(7, 77)]))
            .await
            .unwrap();
        cache
            .update_depot_keys(vec![(9, "aa".into())])
            .await
            .unwrap();

        let apps = cache.app_tokens_for_submission().await;
        assert_eq!(apps.len(), 2);

        let app_ids: Vec<AppId> = apps.keys().copied().collect();
        cache.update_submitted(&app_ids, &[7], &[9]).await.unwrap();

        assert!(cache.app_tokens_for_submission().await.is_empty());
        assert!(cache.package_tokens_for_submission().await.is_empty());
        assert!(cache.depot_keys_for_submission().await.is_empty());

        // Still empty on a second call with no new data.
        assert!(cache.app_tokens_for_submission().await.is_empty());

        // New facts become pending again.
        cache
            .update_app_tokens(&map(vec![(5, 55)]), &HashSet::new())
            .await
            .unwrap();
        assert_eq!(cache.app_tokens_for_submission().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_submitted_keys_are_skipped() {
        let cache = FactCache::in_memory();
        cache.update_submitted(&[1], &[2], &[3]).await.unwrap();
        let stats = cache.stats().await;
        assert_eq!(stats.pending_apps, 0);
        assert_eq!(stats.app_tokens, 0);
    }

    #[tokio::test]
    async fn test_depot_key_predicate() {
        let cache = FactCache::in_memory();
        assert!(cache.should_refresh_depot_key(100).await);
        cache
            .update_depot_keys(vec![(100, "deadbeef".into())])
            .await
            .unwrap();
        assert!(!cache.should_refresh_depot_key(100).await);
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facts.json");

        {
            let cache = FactCache::load(path.clone()).await;
            cache
                .update_app_tokens(&map(vec![(1, 11)]), &HashSet::from([2]))
                .await
                .unwrap();
            cache
                .update_depot_keys(vec![(9, "cafe".into())])
                .await
                .unwrap();
            cache.on_catalog_changes(123, &HashMap::new()).await.unwrap();
        }

        let reloaded = FactCache::load(path).await;
        let stats = reloaded.stats().await;
        assert_eq!(stats.app_tokens, 1);
        assert_eq!(stats.app_tokens_denied, 1);
        assert_eq!(stats.depot_keys, 1);
        assert_eq!(stats.last_change_number, 123);
        assert!(stats.updated_at.is_some());
    }
}
