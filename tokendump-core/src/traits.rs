//! Collaborator traits.
//!
//! The harvester does not own the bot fleet, the persisted package catalog,
//! or the catalog connection itself. Those services are consumed through the
//! traits defined here, which also makes every scheduler and coordinator
//! code path testable against hand-written mocks.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::CoreError;
use crate::ids::{AccessToken, AppId, BotId, DepotId, PackageId};
use crate::models::{AccessTokenBatch, LicenseEvent, PackageData, ProductInfo};

/// Read-only view of the persisted package catalog.
///
/// Maps package ids to the apps they grant. Package records arrive
/// asynchronously from the catalog feed, so a lookup may legitimately return
/// `None` for a package the bot owns; callers skip such packages and retry
/// on a later cycle.
pub trait CatalogStore: Send + Sync {
    /// Looks up the catalog record for a package.
    fn lookup_package(&self, package_id: PackageId) -> Option<PackageData>;
}

/// Batch RPC surface of the remote catalog, scoped to one bot's connection.
#[async_trait]
pub trait RemoteCatalogClient: Send + Sync {
    /// Requests access tokens for a batch of apps.
    ///
    /// Apps the catalog refuses to grant a token for come back in the
    /// `denied` set rather than as an error.
    async fn request_access_tokens(
        &self,
        app_ids: &[AppId],
    ) -> Result<AccessTokenBatch, CoreError>;

    /// Requests full product info for a batch of apps.
    ///
    /// Each app is paired with its access token, when one is known; the
    /// catalog returns only public metadata otherwise.
    async fn request_product_info(
        &self,
        apps: &[(AppId, Option<AccessToken>)],
    ) -> Result<Vec<ProductInfo>, CoreError>;

    /// Requests the decryption key for a single depot.
    ///
    /// `Ok(None)` means the catalog declined to hand out the key; that is a
    /// normal outcome, not an error.
    async fn request_depot_key(
        &self,
        app_id: AppId,
        depot_id: DepotId,
    ) -> Result<Option<String>, CoreError>;
}

/// A connected (or connecting) member of the bot fleet.
///
/// The fleet's connection and login lifecycle is managed elsewhere; the
/// harvester only observes connection state, ownership, and license events.
pub trait Bot: Send + Sync {
    /// Stable identity of this bot.
    fn id(&self) -> &BotId;

    /// 64-bit account identifier of the bot on the remote network.
    fn identity(&self) -> u64;

    /// Whether the bot currently holds a live catalog connection.
    fn is_connected(&self) -> bool;

    /// Packages this bot owns a license for.
    fn owned_packages(&self) -> HashSet<PackageId>;

    /// The catalog RPC client bound to this bot's connection.
    fn catalog(&self) -> Arc<dyn RemoteCatalogClient>;

    /// Subscribes to this bot's license-list-changed event.
    fn subscribe_licenses(&self) -> broadcast::Receiver<LicenseEvent>;
}
