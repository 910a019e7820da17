// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # tokendump Harvest
//!
//! The harvesting engine: per-bot refresh scheduling and global submission
//! coordination.
//!
//! The [`refresh::RefreshScheduler`] owns one driver task per registered
//! bot. A cycle walks the bot's owned packages to their apps, filters to
//! the facts the [`tokendump_cache::FactCache`] still needs, and pulls
//! access tokens, product info, and depot keys from the catalog in fixed
//! size pages. Cycles are guarded per bot: a trigger while one is in
//! flight is dropped, never queued.
//!
//! The [`submit::SubmissionCoordinator`] runs one global timer with a
//! randomized startup delay, drains the cache's unsubmitted facts into a
//! single upload, and marks them submitted on success. A rate-limited
//! upload reschedules itself sooner with fresh jitter.

pub mod config;
pub mod error;
pub mod refresh;
pub mod submit;

pub use config::HarvestConfig;
pub use error::HarvestError;
pub use refresh::RefreshScheduler;
pub use submit::{SubmissionCoordinator, SubmissionHandle, SubmitOutcome};
