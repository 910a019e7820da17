//! Cache error types.

use thiserror::Error;

/// Errors that can occur in the cache layer.
#[derive(Debug, Error)]
pub enum CacheError {
    /// IO error while reading or writing the snapshot.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
