//! RPC result models and event payloads.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::ids::{AccessToken, AppId, ChangeNumber, DepotId, PackageId};

// ============================================================================
// License Event
// ============================================================================

/// Payload of a bot's license-list-changed event.
///
/// Carries the packages currently licensed to the bot together with their
/// package access tokens.
#[derive(Debug, Clone, Default)]
pub struct LicenseEvent {
    /// Licensed packages with their access tokens.
    pub packages: HashMap<PackageId, AccessToken>,
}

// ============================================================================
// Catalog Store Lookup
// ============================================================================

/// Catalog data known for a package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageData {
    /// Change number at which this package record was last updated.
    pub change_number: ChangeNumber,
    /// Apps granted by this package.
    pub app_ids: HashSet<AppId>,
}

// ============================================================================
// Access Token RPC
// ============================================================================

/// Result of a batch access-token request.
///
/// Every requested app lands in exactly one of the two collections.
#[derive(Debug, Clone, Default)]
pub struct AccessTokenBatch {
    /// Tokens granted by the catalog.
    pub granted: HashMap<AppId, AccessToken>,
    /// Apps the catalog refused to hand a token for.
    pub denied: HashSet<AppId>,
}

// ============================================================================
// Product Info RPC
// ============================================================================

/// One product record from a batch product-info request.
#[derive(Debug, Clone)]
pub struct ProductInfo {
    /// The app this record describes.
    pub app_id: AppId,
    /// Current change number of the app.
    pub change_number: ChangeNumber,
    /// Raw key-value metadata tree as returned by the catalog.
    ///
    /// Contains a `depots` child object whose numeric keys are the app's
    /// depot ids.
    pub kv: serde_json::Value,
}

/// Extracts child depot ids from a product's raw metadata tree.
///
/// Depots live under the `depots` key as an object keyed by depot id.
/// Non-numeric keys (`branches`, `baselanguages`, ...) are configuration
/// entries, not depots, and are skipped.
pub fn depot_ids(kv: &serde_json::Value) -> Vec<DepotId> {
    let Some(depots) = kv.get("depots").and_then(|d| d.as_object()) else {
        return Vec::new();
    };

    let mut ids: Vec<DepotId> = depots
        .keys()
        .filter_map(|key| key.parse::<DepotId>().ok())
        .collect();
    ids.sort_unstable();
    ids
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_depot_ids_skips_non_numeric_keys() {
        let kv = json!({
            "common": { "name": "Some App" },
            "depots": {
                "1001": { "name": "content" },
                "1002": { "name": "binaries" },
                "branches": { "public": { "buildid": "42" } },
                "baselanguages": "english"
            }
        });

        assert_eq!(depot_ids(&kv), vec![1001, 1002]);
    }

    #[test]
    fn test_depot_ids_missing_depots() {
        let kv = json!({ "common": { "name": "No Depots" } });
        assert!(depot_ids(&kv).is_empty());
    }

    #[test]
    fn test_depot_ids_depots_not_object() {
        let kv = json!({ "depots": "unexpected" });
        assert!(depot_ids(&kv).is_empty());
    }
}
