//! Harvest error types.

use thiserror::Error;

/// Errors that can occur in the scheduler and submission layers.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// A catalog RPC failed; the cycle aborts and the timer reschedules.
    #[error("Catalog error: {0}")]
    Catalog(#[from] tokendump_core::CoreError),

    /// Persisting the fact cache failed.
    #[error("Cache error: {0}")]
    Cache(#[from] tokendump_cache::CacheError),

    /// The bot disconnected mid-cycle; remaining pages are abandoned.
    #[error("Bot disconnected mid-cycle")]
    Disconnected,

    /// The submission request failed at the HTTP layer.
    #[error("Web error: {0}")]
    Web(#[from] tokendump_web::WebError),

    /// The configuration is not usable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No valid contributor identity could be resolved for submission.
    #[error("No valid contributor identity")]
    NoContributor,
}
