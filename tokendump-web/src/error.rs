//! Web client error types.

use reqwest::StatusCode;
use thiserror::Error;

// ============================================================================
// Transport Error
// ============================================================================

/// Error produced by a single wire attempt.
///
/// Transport errors are transient by definition: they consume one retry unit
/// in the outer request loop and are only surfaced once the whole budget is
/// exhausted.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The underlying HTTP client could not be constructed.
    #[error("Failed to build HTTP transport: {0}")]
    Build(String),

    /// The request timed out.
    #[error("Request timed out")]
    Timeout,

    /// The connection could not be established.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Reading the response body failed mid-stream.
    #[error("Body read failed: {0}")]
    Body(String),

    /// Any other request failure.
    #[error("Request failed: {0}")]
    Request(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connection(err.to_string())
        } else if err.is_body() || err.is_decode() {
            Self::Body(err.to_string())
        } else {
            Self::Request(err.to_string())
        }
    }
}

// ============================================================================
// Web Error
// ============================================================================

/// Error type for typed web requests.
#[derive(Debug, Error)]
pub enum WebError {
    /// Every attempt failed; the request produced no result.
    #[error("Request produced no result after {tries} tries: {url}")]
    Exhausted {
        /// The requested URL.
        url: String,
        /// How many attempts were made.
        tries: u8,
    },

    /// The request hit a terminal error status that the caller's policy did
    /// not ask to receive.
    #[error("Request failed with status {status}")]
    Unsuccessful {
        /// The terminal status code.
        status: StatusCode,
    },

    /// The URL could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// A redirect response could not be followed (missing or malformed
    /// `Location`).
    #[error("Invalid redirect from {0}")]
    InvalidRedirect(String),

    /// The transport itself could not be set up.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}
