//! Catalog identifier types.
//!
//! The remote catalog addresses everything by numeric id. These aliases keep
//! signatures readable without the ceremony of full newtypes; the id spaces
//! never mix in practice because apps, packages, and depots flow through
//! separate RPCs.

/// Identifier of a distributable product unit in the remote catalog.
pub type AppId = u32;

/// Identifier of a license bundle granting ownership of one or more apps.
pub type PackageId = u32;

/// Identifier of a content-delivery unit belonging to an app.
///
/// An app's own id doubles as a depot id for its primary depot.
pub type DepotId = u32;

/// Monotonic per-app revision counter from the catalog change feed.
pub type ChangeNumber = u32;

/// Opaque credential required to query private metadata for an app or
/// package.
pub type AccessToken = u64;

/// Stable identity of a bot within the fleet.
pub type BotId = String;
