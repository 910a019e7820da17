// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # tokendump Cache
//!
//! The accumulating fact cache for the tokendump harvester.
//!
//! The cache maps catalog entities to the facts harvested about them —
//! app access tokens (granted or denied), app change numbers, package
//! tokens, and depot decryption keys — and tracks which facts have already
//! been acknowledged by the submission endpoint. It only ever accumulates;
//! nothing is evicted except stale change numbers invalidated by the
//! catalog change feed.
//!
//! Every mutation rewrites the whole snapshot to durable storage via the
//! [`persistence`] helpers; a missing or unreadable snapshot at startup
//! yields a fresh empty cache, not an error.

pub mod error;
pub mod fact_cache;
pub mod persistence;

pub use error::CacheError;
pub use fact_cache::{CacheStats, FactCache};
pub use persistence::{
    default_cache_dir, default_cache_path, default_config_dir, default_config_path, load_json,
    load_json_or_default, save_json,
};
