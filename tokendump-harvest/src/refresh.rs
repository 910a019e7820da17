//! Per-bot refresh scheduling.
//!
//! Each registered bot gets a driver task that reacts to license-list
//! events, catalog-change nudges, and a fallback timer. Cycles run as
//! detached tasks under a per-bot binary guard: a trigger arriving while a
//! cycle is in flight is dropped, not queued. The timer is reset at the
//! end of every cycle regardless of how the cycle ended.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use tokendump_cache::FactCache;
use tokendump_core::{
    depot_ids, pages, AccessToken, AppId, Bot, BotId, CatalogStore, ChangeNumber, DepotId,
    PackageId,
};

use crate::config::HarvestConfig;
use crate::error::HarvestError;

// ============================================================================
// Triggers
// ============================================================================

/// Messages understood by a bot's driver task.
enum Trigger {
    /// The license list changed; refresh exactly these packages.
    Licenses(HashMap<PackageId, AccessToken>),
    /// Catalog changes arrived; pull the next timer cycle closer.
    Nudge,
    /// A cycle finished; reset the timer to the full interval.
    CycleDone,
    /// The bot is being torn down.
    Shutdown,
}

/// Per-bot refresh state held by the registry.
struct BotEntry {
    bot: Arc<dyn Bot>,
    trigger: mpsc::Sender<Trigger>,
    driver: JoinHandle<()>,
}

// ============================================================================
// Refresh Scheduler
// ============================================================================

/// Registry of per-bot refresh drivers.
///
/// Bots are added with [`RefreshScheduler::register_bot`] when they come
/// online and removed with [`RefreshScheduler::deregister_bot`] on
/// teardown. An in-flight cycle is never awaited on teardown; it finishes
/// on its own and its remaining cache merges are harmless.
pub struct RefreshScheduler {
    cache: Arc<FactCache>,
    store: Arc<dyn CatalogStore>,
    config: HarvestConfig,
    bots: Mutex<HashMap<BotId, BotEntry>>,
}

impl RefreshScheduler {
    /// Creates a scheduler over the shared cache and catalog store.
    pub fn new(
        cache: Arc<FactCache>,
        store: Arc<dyn CatalogStore>,
        config: HarvestConfig,
    ) -> Self {
        Self {
            cache,
            store,
            config,
            bots: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a bot and starts its refresh driver.
    ///
    /// The first cycle runs after one nudge delay, giving the initial
    /// license list a chance to arrive first.
    pub async fn register_bot(&self, bot: Arc<dyn Bot>) {
        let bot_id = bot.id().clone();
        let (trigger_tx, trigger_rx) = mpsc::channel(16);

        let driver = tokio::spawn(drive_bot(
            bot.clone(),
            self.cache.clone(),
            self.store.clone(),
            self.config.clone(),
            trigger_tx.clone(),
            trigger_rx,
        ));

        let entry = BotEntry {
            bot,
            trigger: trigger_tx,
            driver,
        };

        let mut bots = self.bots.lock().await;
        if let Some(old) = bots.insert(bot_id.clone(), entry) {
            warn!(bot = %bot_id, "Bot registered twice, replacing previous refresh state");
            let _ = old.trigger.try_send(Trigger::Shutdown);
        }
        info!(bot = %bot_id, "Bot registered for refresh");
    }

    /// Removes a bot's refresh state.
    ///
    /// Does not wait for an in-flight cycle; the driver exits at its next
    /// loop turn.
    pub async fn deregister_bot(&self, bot_id: &BotId) {
        let entry = self.bots.lock().await.remove(bot_id);
        if let Some(entry) = entry {
            let _ = entry.trigger.send(Trigger::Shutdown).await;
            info!(bot = %bot_id, "Bot deregistered from refresh");
        }
    }

    /// Requests a refresh of specific packages for one bot, as if its
    /// license list had changed.
    pub async fn request_refresh(
        &self,
        bot_id: &BotId,
        packages: HashMap<PackageId, AccessToken>,
    ) {
        let bots = self.bots.lock().await;
        if let Some(entry) = bots.get(bot_id) {
            let _ = entry.trigger.try_send(Trigger::Licenses(packages));
        } else {
            warn!(bot = %bot_id, "Refresh requested for unregistered bot");
        }
    }

    /// Applies a catalog change notification and nudges every bot.
    pub async fn notify_catalog_changes(
        &self,
        current_change_number: ChangeNumber,
        app_changes: &HashMap<AppId, ChangeNumber>,
    ) -> Result<(), HarvestError> {
        self.cache
            .on_catalog_changes(current_change_number, app_changes)
            .await?;
        self.nudge_all().await;
        Ok(())
    }

    /// Rewinds the change feed watermark after an upstream restart and
    /// nudges every bot.
    pub async fn notify_catalog_restart(
        &self,
        current_change_number: ChangeNumber,
    ) -> Result<(), HarvestError> {
        self.cache.on_catalog_restart(current_change_number).await?;
        self.nudge_all().await;
        Ok(())
    }

    /// Currently connected bots, for contributor selection.
    pub async fn connected_bots(&self) -> Vec<Arc<dyn Bot>> {
        self.bots
            .lock()
            .await
            .values()
            .filter(|entry| entry.bot.is_connected())
            .map(|entry| entry.bot.clone())
            .collect()
    }

    /// Stops every driver, waits for them to exit, and clears the
    /// registry. In-flight cycles are not awaited.
    pub async fn shutdown(&self) {
        let entries: Vec<(BotId, BotEntry)> = {
            let mut bots = self.bots.lock().await;
            bots.drain().collect()
        };
        for (bot_id, entry) in entries {
            let _ = entry.trigger.send(Trigger::Shutdown).await;
            let _ = entry.driver.await;
            debug!(bot = %bot_id, "Refresh driver stopped");
        }
    }

    async fn nudge_all(&self) {
        for entry in self.bots.lock().await.values() {
            let _ = entry.trigger.try_send(Trigger::Nudge);
        }
    }
}

// ============================================================================
// Driver
// ============================================================================

/// One bot's driver loop: owns the reschedule deadline and spawns cycles.
async fn drive_bot(
    bot: Arc<dyn Bot>,
    cache: Arc<FactCache>,
    store: Arc<dyn CatalogStore>,
    config: HarvestConfig,
    trigger_tx: mpsc::Sender<Trigger>,
    mut triggers: mpsc::Receiver<Trigger>,
) {
    let guard = Arc::new(Semaphore::new(1));
    let mut licenses = bot.subscribe_licenses();
    let mut licenses_closed = false;
    let mut deadline = Instant::now() + config.nudge_delay();

    loop {
        let targets: Option<HashSet<PackageId>> = tokio::select! {
            () = sleep_until(deadline) => {
                // Provisional reset so the timer doesn't refire while the
                // cycle runs; CycleDone resets it properly.
                deadline = Instant::now() + config.refresh_interval();
                None
            }
            event = licenses.recv(), if !licenses_closed => match event {
                Ok(event) => {
                    if let Err(e) = cache.update_package_tokens(&event.packages).await {
                        warn!(bot = %bot.id(), error = %e, "Failed to persist package tokens");
                    }
                    Some(event.packages.keys().copied().collect())
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(bot = %bot.id(), skipped, "License events lagged, refreshing everything");
                    None
                }
                Err(broadcast::error::RecvError::Closed) => {
                    licenses_closed = true;
                    continue;
                }
            },
            trigger = triggers.recv() => match trigger {
                Some(Trigger::Licenses(packages)) => {
                    if let Err(e) = cache.update_package_tokens(&packages).await {
                        warn!(bot = %bot.id(), error = %e, "Failed to persist package tokens");
                    }
                    Some(packages.into_keys().collect())
                }
                Some(Trigger::Nudge) => {
                    deadline = deadline.min(Instant::now() + config.nudge_delay());
                    continue;
                }
                Some(Trigger::CycleDone) => {
                    deadline = Instant::now() + config.refresh_interval();
                    continue;
                }
                Some(Trigger::Shutdown) | None => break,
            },
        };

        // Cycles run detached so further triggers are dropped by the guard
        // rather than piling up behind an await.
        let bot = bot.clone();
        let cache = cache.clone();
        let store = store.clone();
        let config = config.clone();
        let guard = guard.clone();
        let done = trigger_tx.clone();
        tokio::spawn(async move {
            run_cycle(&bot, &cache, &store, &config, &guard, targets).await;
            let _ = done.send(Trigger::CycleDone).await;
        });
    }

    debug!(bot = %bot.id(), "Refresh driver stopped");
}

/// Runs one guarded refresh cycle. A cycle already in flight wins; this
/// trigger is dropped.
pub(crate) async fn run_cycle(
    bot: &Arc<dyn Bot>,
    cache: &Arc<FactCache>,
    store: &Arc<dyn CatalogStore>,
    config: &HarvestConfig,
    guard: &Arc<Semaphore>,
    targets: Option<HashSet<PackageId>>,
) {
    let Ok(_permit) = guard.clone().try_acquire_owned() else {
        debug!(bot = %bot.id(), "Refresh already in flight, dropping trigger");
        return;
    };

    if let Err(e) = refresh_once(bot, cache, store, config, targets).await {
        warn!(bot = %bot.id(), error = %e, "Refresh cycle aborted");
    }
}

/// The cycle body: resolve packages to apps, then two paged passes over
/// the apps still needing facts.
async fn refresh_once(
    bot: &Arc<dyn Bot>,
    cache: &Arc<FactCache>,
    store: &Arc<dyn CatalogStore>,
    config: &HarvestConfig,
    targets: Option<HashSet<PackageId>>,
) -> Result<(), HarvestError> {
    let packages = targets.unwrap_or_else(|| bot.owned_packages());
    if packages.is_empty() {
        debug!(bot = %bot.id(), "No packages to refresh");
        return Ok(());
    }

    // Packages without catalog data yet are skipped this cycle; their
    // records arrive asynchronously and a later cycle picks them up.
    let mut apps: HashSet<AppId> = HashSet::new();
    for package_id in &packages {
        if let Some(data) = store.lookup_package(*package_id) {
            apps.extend(data.app_ids);
        }
    }

    let mut pending: Vec<AppId> = Vec::with_capacity(apps.len());
    for app_id in apps {
        if cache.should_refresh_app_info(app_id).await {
            pending.push(app_id);
        }
    }
    pending.sort_unstable();

    if pending.is_empty() {
        debug!(bot = %bot.id(), "All known apps are fresh");
        return Ok(());
    }

    info!(bot = %bot.id(), apps = pending.len(), "Starting refresh cycle");
    let catalog = bot.catalog();

    // Pass 1: access tokens.
    for page in pages(&pending, config.page_size) {
        if !bot.is_connected() {
            return Err(HarvestError::Disconnected);
        }

        let batch = catalog.request_access_tokens(page).await?;
        cache.update_app_tokens(&batch.granted, &batch.denied).await?;
    }

    // Pass 2: product info, then depot keys per page.
    for page in pages(&pending, config.page_size) {
        if !bot.is_connected() {
            return Err(HarvestError::Disconnected);
        }

        let mut with_tokens = Vec::with_capacity(page.len());
        for &app_id in page {
            with_tokens.push((app_id, cache.app_token(app_id).await));
        }

        let products = catalog.request_product_info(&with_tokens).await?;

        let mut change_numbers: HashMap<AppId, ChangeNumber> =
            HashMap::with_capacity(products.len());
        let mut lookups: Vec<(AppId, DepotId)> = Vec::new();
        let mut enqueued: HashSet<DepotId> = HashSet::new();

        for product in &products {
            change_numbers.insert(product.app_id, product.change_number);

            // The app's own id doubles as its primary depot.
            if enqueued.insert(product.app_id)
                && cache.should_refresh_depot_key(product.app_id).await
            {
                lookups.push((product.app_id, product.app_id));
            }
            for depot_id in depot_ids(&product.kv) {
                if enqueued.insert(depot_id) && cache.should_refresh_depot_key(depot_id).await {
                    lookups.push((product.app_id, depot_id));
                }
            }
        }

        cache.update_app_change_numbers(&change_numbers).await?;

        // Fan out the key lookups for this page, fan in before the next
        // page starts. One failed lookup aborts the whole cycle.
        let results = futures::future::join_all(
            lookups
                .iter()
                .map(|&(app_id, depot_id)| catalog.request_depot_key(app_id, depot_id)),
        )
        .await;

        let mut keys = Vec::new();
        for (&(_, depot_id), result) in lookups.iter().zip(results) {
            match result? {
                Some(key) => keys.push((depot_id, key)),
                None => debug!(depot_id, "Depot key not available"),
            }
        }
        cache.update_depot_keys(keys).await?;
    }

    info!(bot = %bot.id(), "Refresh cycle finished");
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
