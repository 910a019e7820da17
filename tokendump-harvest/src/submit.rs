//! Global submission coordination.
//!
//! One process-wide timer drains the fact cache's unsubmitted facts into a
//! single upload. The first upload after startup waits a uniformly random
//! delay so independent instances don't stampede the endpoint; a
//! rate-limited upload reschedules itself with fresh jitter instead of
//! waiting the full interval.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use tokendump_cache::FactCache;
use tokendump_core::{AccessToken, AppId, DepotId, PackageId};
use tokendump_web::{ErrorPolicy, PostBody, RequestOptions, WebClient};

use crate::config::HarvestConfig;
use crate::refresh::RefreshScheduler;

// ============================================================================
// Wire Types
// ============================================================================

/// Upload payload for the submission endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitRequest {
    /// Account credited for the contribution.
    #[serde(rename = "ContributorSteamID")]
    pub contributor_id: u64,
    /// App access tokens being contributed.
    #[serde(rename = "AppTokens")]
    pub app_tokens: HashMap<AppId, AccessToken>,
    /// Package access tokens being contributed.
    #[serde(rename = "PackageTokens")]
    pub package_tokens: HashMap<PackageId, AccessToken>,
    /// Depot decryption keys being contributed.
    #[serde(rename = "DepotKeys")]
    pub depot_keys: HashMap<DepotId, String>,
}

/// Response from the submission endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitResponse {
    /// Whether the endpoint accepted the upload.
    #[serde(rename = "Success")]
    pub success: bool,
    /// Acceptance counts; present on success.
    #[serde(rename = "Data")]
    pub data: Option<SubmitData>,
}

/// Acceptance counts echoed by the endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitData {
    /// Apps the endpoint had not seen before.
    #[serde(rename = "NewAppsCount")]
    pub new_apps: u32,
    /// Packages the endpoint had not seen before.
    #[serde(rename = "NewSubsCount")]
    pub new_subs: u32,
    /// Depots the endpoint had not seen before.
    #[serde(rename = "NewDepotsCount")]
    pub new_depots: u32,
}

// ============================================================================
// Identity
// ============================================================================

/// Whether `id` is a public-universe individual account identifier.
///
/// Layout of a 64-bit account id: universe in the top byte, account type in
/// the next nibble, a non-zero 32-bit account number at the bottom.
pub(crate) fn is_individual_account(id: u64) -> bool {
    let universe = id >> 56;
    let account_type = (id >> 52) & 0xF;
    let account_number = id & 0xFFFF_FFFF;
    universe == 1 && account_type == 1 && account_number != 0
}

/// Uniformly random duration between the configured bounds.
pub(crate) fn random_delay(bounds: (Duration, Duration)) -> Duration {
    let (min, max) = bounds;
    let secs = rand::thread_rng().gen_range(min.as_secs()..=max.as_secs().max(min.as_secs()));
    Duration::from_secs(secs)
}

// ============================================================================
// Outcome
// ============================================================================

/// Result of one submission cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Nothing pending; the cycle was a no-op.
    NoData,
    /// The endpoint accepted the upload; counts are what we sent.
    Accepted {
        /// App tokens submitted.
        apps: usize,
        /// Package tokens submitted.
        packages: usize,
        /// Depot keys submitted.
        depots: usize,
    },
    /// The endpoint rate-limited us; retry sooner with fresh jitter.
    RateLimited,
    /// The upload failed; wait for the normal interval.
    Failed,
    /// Another submission was already in flight; this firing was dropped.
    Skipped,
}

// ============================================================================
// Submission Coordinator
// ============================================================================

/// Handle to a running submission loop.
pub struct SubmissionHandle {
    task: JoinHandle<()>,
    stop_tx: mpsc::Sender<()>,
}

impl SubmissionHandle {
    /// Stops the submission loop and waits for it to exit.
    pub async fn shutdown(self) {
        let _ = self.stop_tx.send(()).await;
        let _ = self.task.await;
    }
}

/// Drains unsubmitted facts to the submission endpoint on a global timer.
pub struct SubmissionCoordinator {
    cache: Arc<FactCache>,
    web: Arc<WebClient>,
    config: HarvestConfig,
    scheduler: Option<Arc<RefreshScheduler>>,
    guard: Semaphore,
}

impl SubmissionCoordinator {
    /// Creates a coordinator.
    ///
    /// The scheduler is optional; without one, contributor selection can
    /// only use the configured identity (the one-shot CLI path).
    pub fn new(
        cache: Arc<FactCache>,
        web: Arc<WebClient>,
        config: HarvestConfig,
        scheduler: Option<Arc<RefreshScheduler>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            cache,
            web,
            config,
            scheduler,
            guard: Semaphore::new(1),
        })
    }

    /// Starts the periodic submission loop.
    pub fn spawn(self: Arc<Self>) -> SubmissionHandle {
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let task = tokio::spawn(self.run(stop_rx));
        SubmissionHandle { task, stop_tx }
    }

    async fn run(self: Arc<Self>, mut stop_rx: mpsc::Receiver<()>) {
        let initial = random_delay(self.config.submit_delay_bounds());
        info!(delay_secs = initial.as_secs(), "First submission scheduled");
        let mut deadline = Instant::now() + initial;

        loop {
            tokio::select! {
                () = sleep_until(deadline) => {
                    let outcome = self.try_submit().await;
                    deadline = Instant::now() + match outcome {
                        SubmitOutcome::RateLimited => {
                            let delay = random_delay(self.config.submit_delay_bounds());
                            warn!(delay_secs = delay.as_secs(), "Rate limited, rescheduling sooner");
                            delay
                        }
                        _ => self.config.submit_interval(),
                    };
                }
                _ = stop_rx.recv() => break,
            }
        }

        debug!("Submission loop stopped");
    }

    /// Runs one guarded submission cycle.
    ///
    /// If another submission is already in flight this firing is dropped,
    /// not queued.
    pub async fn try_submit(&self) -> SubmitOutcome {
        let Ok(_permit) = self.guard.try_acquire() else {
            debug!("Submission already in flight, skipping");
            return SubmitOutcome::Skipped;
        };
        self.submit_once().await
    }

    async fn submit_once(&self) -> SubmitOutcome {
        let apps = self.cache.app_tokens_for_submission().await;
        let packages = self.cache.package_tokens_for_submission().await;
        let depots = self.cache.depot_keys_for_submission().await;

        if apps.is_empty() && packages.is_empty() && depots.is_empty() {
            info!("No new facts to submit");
            return SubmitOutcome::NoData;
        }

        let Some(contributor_id) = self.resolve_contributor().await else {
            error!("No valid contributor identity available, cannot submit");
            return SubmitOutcome::Failed;
        };

        info!(
            apps = apps.len(),
            packages = packages.len(),
            depots = depots.len(),
            contributor_id,
            "Submitting facts"
        );

        let request = SubmitRequest {
            contributor_id,
            app_tokens: apps.clone(),
            package_tokens: packages.clone(),
            depot_keys: depots.clone(),
        };
        let body = match PostBody::json(&request) {
            Ok(body) => body,
            Err(e) => {
                error!(error = %e, "Failed to serialize submission payload");
                return SubmitOutcome::Failed;
            }
        };

        let options = RequestOptions::default().with_policy(ErrorPolicy::client_errors());
        let url = self.config.submit_url();

        let response = match self
            .web
            .post_object::<SubmitResponse>(&url, Some(body), &options)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Submission failed at the transport layer");
                return SubmitOutcome::Failed;
            }
        };

        if response.meta.is_rate_limited() {
            return SubmitOutcome::RateLimited;
        }
        if !response.meta.is_success() {
            warn!(status = %response.meta.status, "Submission rejected");
            return SubmitOutcome::Failed;
        }

        let Some(payload) = response.value else {
            error!("Submission response carried no payload");
            return SubmitOutcome::Failed;
        };
        if !payload.success {
            error!("Submission endpoint reported failure");
            return SubmitOutcome::Failed;
        }
        let Some(data) = payload.data else {
            error!("Submission response is missing acceptance data");
            return SubmitOutcome::Failed;
        };

        let app_ids: Vec<AppId> = apps.keys().copied().collect();
        let package_ids: Vec<PackageId> = packages.keys().copied().collect();
        let depot_ids: Vec<DepotId> = depots.keys().copied().collect();
        if let Err(e) = self
            .cache
            .update_submitted(&app_ids, &package_ids, &depot_ids)
            .await
        {
            warn!(error = %e, "Failed to persist submitted marks");
        }

        info!(
            new_apps = data.new_apps,
            new_subs = data.new_subs,
            new_depots = data.new_depots,
            "Submission accepted"
        );

        SubmitOutcome::Accepted {
            apps: app_ids.len(),
            packages: package_ids.len(),
            depots: depot_ids.len(),
        }
    }

    /// Picks the account credited for this submission: the configured
    /// identity when it is a valid individual account, otherwise the
    /// connected bot owning the most packages.
    async fn resolve_contributor(&self) -> Option<u64> {
        if let Some(id) = self.config.contributor_id {
            if is_individual_account(id) {
                return Some(id);
            }
            warn!(id, "Configured contributor id is not an individual account");
        }

        let scheduler = self.scheduler.as_ref()?;
        scheduler
            .connected_bots()
            .await
            .into_iter()
            .max_by_key(|bot| bot.owned_packages().len())
            .map(|bot| bot.identity())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use reqwest::StatusCode;
    use std::collections::{HashSet, VecDeque};
    use std::sync::Mutex;
    use tokendump_web::{HttpTransport, TransportError, TransportRequest, TransportResponse};

    struct ScriptedTransport {
        responses: Mutex<VecDeque<(StatusCode, &'static str)>>,
        requests: Mutex<Vec<TransportRequest>>,
        delay_ms: u64,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<(StatusCode, &'static str)>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into_iter().collect()),
                requests: Mutex::new(Vec::new()),
                delay_ms: 0,
            })
        }

        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn execute(
            &self,
            request: TransportRequest,
        ) -> Result<TransportResponse, TransportError> {
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }

            let (status, body) = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| TransportError::Request("no scripted response".into()))?;
            self.requests.lock().unwrap().push(request);

            Ok(TransportResponse {
                status,
                headers: reqwest::header::HeaderMap::new(),
                content_length: Some(body.len() as u64),
                body: Box::pin(futures::stream::iter(vec![Ok(Bytes::from_static(
                    body.as_bytes(),
                ))])),
            })
        }
    }

    async fn seeded_cache() -> Arc<FactCache> {
        let cache = Arc::new(FactCache::in_memory());
        cache
            .update_app_tokens(&HashMap::from([(1, 11u64)]), &HashSet::new())
            .await
            .unwrap();
        cache
            .update_package_tokens(&HashMap::from([(2, 22u64)]))
            .await
            .unwrap();
        cache
            .update_depot_keys(vec![(3, "cafe".to_string())])
            .await
            .unwrap();
        cache
    }

    fn coordinator(
        cache: Arc<FactCache>,
        transport: &Arc<ScriptedTransport>,
    ) -> Arc<SubmissionCoordinator> {
        let web = Arc::new(WebClient::with_transport(transport.clone()));
        let config = HarvestConfig {
            contributor_id: Some(0x0110_0001_0000_0001),
            ..HarvestConfig::default()
        };
        SubmissionCoordinator::new(cache, web, config, None)
    }

    #[test]
    fn test_individual_account_ids() {
        assert!(is_individual_account(0x0110_0001_0000_0001));
        assert!(!is_individual_account(0));
        // Wrong universe.
        assert!(!is_individual_account(0x0210_0001_0000_0001));
        // Wrong account type (clan).
        assert!(!is_individual_account(0x0170_0001_0000_0001));
        // Zero account number.
        assert!(!is_individual_account(0x0110_0001_0000_0000));
    }

    #[test]
    fn test_random_delay_stays_within_bounds() {
        let config = HarvestConfig::default();
        let bounds = config.submit_delay_bounds();
        for _ in 0..100 {
            let delay = random_delay(bounds);
            assert!(delay >= bounds.0 && delay <= bounds.1);
            // The whole jitter range reschedules sooner than the normal
            // interval would.
            assert!(delay < config.submit_interval());
        }
    }

    #[tokio::test]
    async fn test_accepted_submission_marks_facts() {
        let transport = ScriptedTransport::new(vec![(
            StatusCode::OK,
            r#"{"Success":true,"Data":{"NewAppsCount":1,"NewSubsCount":1,"NewDepotsCount":1}}"#,
        )]);
        let cache = seeded_cache().await;
        let coordinator = coordinator(cache.clone(), &transport);

        let outcome = coordinator.try_submit().await;
        assert_eq!(
            outcome,
            SubmitOutcome::Accepted {
                apps: 1,
                packages: 1,
                depots: 1
            }
        );

        assert!(cache.app_tokens_for_submission().await.is_empty());
        assert!(cache.package_tokens_for_submission().await.is_empty());
        assert!(cache.depot_keys_for_submission().await.is_empty());

        // With everything acknowledged, the next cycle is a no-op.
        assert_eq!(coordinator.try_submit().await, SubmitOutcome::NoData);
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_leaves_facts_pending() {
        let transport = ScriptedTransport::new(vec![(StatusCode::TOO_MANY_REQUESTS, "")]);
        let cache = seeded_cache().await;
        let coordinator = coordinator(cache.clone(), &transport);

        assert_eq!(coordinator.try_submit().await, SubmitOutcome::RateLimited);
        assert_eq!(cache.app_tokens_for_submission().await.len(), 1);
    }

    #[tokio::test]
    async fn test_client_error_fails_cycle() {
        let transport = ScriptedTransport::new(vec![(StatusCode::FORBIDDEN, "")]);
        let cache = seeded_cache().await;
        let coordinator = coordinator(cache.clone(), &transport);

        assert_eq!(coordinator.try_submit().await, SubmitOutcome::Failed);
        assert_eq!(cache.app_tokens_for_submission().await.len(), 1);
    }

    #[tokio::test]
    async fn test_logical_failure_fails_cycle() {
        let transport = ScriptedTransport::new(vec![(StatusCode::OK, r#"{"Success":false}"#)]);
        let coordinator = coordinator(seeded_cache().await, &transport);
        assert_eq!(coordinator.try_submit().await, SubmitOutcome::Failed);
    }

    #[tokio::test]
    async fn test_missing_data_fails_cycle() {
        let transport = ScriptedTransport::new(vec![(StatusCode::OK, r#"{"Success":true}"#)]);
        let coordinator = coordinator(seeded_cache().await, &transport);
        assert_eq!(coordinator.try_submit().await, SubmitOutcome::Failed);
    }

    #[tokio::test]
    async fn test_empty_cache_is_noop() {
        let transport = ScriptedTransport::new(vec![]);
        let coordinator = coordinator(Arc::new(FactCache::in_memory()), &transport);

        assert_eq!(coordinator.try_submit().await, SubmitOutcome::NoData);
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_no_contributor_identity_fails() {
        let transport = ScriptedTransport::new(vec![]);
        let web = Arc::new(WebClient::with_transport(transport.clone()));
        let config = HarvestConfig {
            contributor_id: None,
            ..HarvestConfig::default()
        };
        let coordinator =
            SubmissionCoordinator::new(seeded_cache().await, web, config, None);

        assert_eq!(coordinator.try_submit().await, SubmitOutcome::Failed);
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_configured_identity_fails_without_bots() {
        let transport = ScriptedTransport::new(vec![]);
        let web = Arc::new(WebClient::with_transport(transport.clone()));
        let config = HarvestConfig {
            // Not an individual account id.
            contributor_id: Some(42),
            ..HarvestConfig::default()
        };
        let coordinator =
            SubmissionCoordinator::new(seeded_cache().await, web, config, None);

        assert_eq!(coordinator.try_submit().await, SubmitOutcome::Failed);
    }

    #[tokio::test]
    async fn test_concurrent_submission_is_skipped() {
        let transport = Arc::new(ScriptedTransport {
            responses: Mutex::new(
                vec![(
                    StatusCode::OK,
                    r#"{"Success":true,"Data":{"NewAppsCount":1,"NewSubsCount":1,"NewDepotsCount":1}}"#,
                )]
                .into_iter()
                .collect(),
            ),
            requests: Mutex::new(Vec::new()),
            delay_ms: 100,
        });
        let coordinator = coordinator(seeded_cache().await, &transport);

        let racer = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.try_submit().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(coordinator.try_submit().await, SubmitOutcome::Skipped);
        assert!(matches!(
            racer.await.unwrap(),
            SubmitOutcome::Accepted { .. }
        ));
        assert_eq!(transport.request_count(), 1);
    }
}
