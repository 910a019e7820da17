//! Core error types for tokendump.

use thiserror::Error;

/// Core error type shared by the collaborator traits.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A remote catalog RPC failed.
    #[error("Catalog request failed: {0}")]
    CatalogRequest(String),

    /// The bot lost its connection mid-operation.
    #[error("Bot disconnected")]
    Disconnected,

    /// The remote catalog returned data we could not interpret.
    #[error("Invalid catalog data: {0}")]
    InvalidData(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with message.
    #[error("{0}")]
    Other(String),
}

impl CoreError {
    /// Returns true if this is a transient error that might succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoreError::CatalogRequest(_) | CoreError::Disconnected
        )
    }
}
