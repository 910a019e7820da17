//! Request options, error-classification policy, and POST body shapes.

use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::Serialize;

/// Default number of attempts for one logical request.
pub const DEFAULT_MAX_TRIES: u8 = 5;

// ============================================================================
// Error Policy
// ============================================================================

/// Which non-success responses are surfaced to the caller instead of being
/// handled by the retry loop.
///
/// With the default policy, client errors terminate the request with no
/// result and server errors are retried. Requesting a class hands the raw
/// response back to the caller, who is then responsible for checking
/// [`crate::ResponseMeta::status`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorPolicy {
    /// Surface 4xx responses instead of swallowing them.
    pub include_client_errors: bool,
    /// Surface 5xx responses instead of retrying them.
    pub include_server_errors: bool,
}

impl ErrorPolicy {
    /// Policy surfacing client error responses.
    pub fn client_errors() -> Self {
        Self {
            include_client_errors: true,
            include_server_errors: false,
        }
    }

    /// Policy surfacing server error responses.
    pub fn server_errors() -> Self {
        Self {
            include_client_errors: false,
            include_server_errors: true,
        }
    }

    /// Policy surfacing both error classes.
    pub fn all_errors() -> Self {
        Self {
            include_client_errors: true,
            include_server_errors: true,
        }
    }
}

/// What the retry loop does with one attempt's terminal (non-redirect)
/// response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    /// 2xx: hand the response to the caller.
    Success,
    /// Error class the caller asked to receive: hand the response over as-is.
    Accept,
    /// Transient failure class: consume one retry unit.
    Retry,
    /// Terminal failure class: stop retrying, the request yields no result.
    Stop,
}

/// Classifies one response status under the caller's error policy.
pub(crate) fn classify(status: StatusCode, policy: ErrorPolicy) -> Disposition {
    if status.is_success() {
        Disposition::Success
    } else if status.is_client_error() {
        if policy.include_client_errors {
            Disposition::Accept
        } else {
            Disposition::Stop
        }
    } else if status.is_server_error() {
        if policy.include_server_errors {
            Disposition::Accept
        } else {
            Disposition::Retry
        }
    } else {
        // 1xx and anything else unexpected: treat as a failed attempt.
        Disposition::Retry
    }
}

// ============================================================================
// Request Options
// ============================================================================

/// Per-request options.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Extra headers sent with every attempt.
    pub headers: HeaderMap,
    /// Optional referer URL.
    pub referer: Option<String>,
    /// Attempt budget for this request; also bounds redirect depth within
    /// one attempt. Must be at least 1.
    pub max_tries: u8,
    /// Error-classification policy.
    pub policy: ErrorPolicy,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            headers: HeaderMap::new(),
            referer: None,
            max_tries: DEFAULT_MAX_TRIES,
            policy: ErrorPolicy::default(),
        }
    }
}

impl RequestOptions {
    /// Sets extra request headers.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Sets the referer.
    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    /// Sets the attempt budget.
    pub fn with_max_tries(mut self, max_tries: u8) -> Self {
        self.max_tries = max_tries;
        self
    }

    /// Sets the error policy.
    pub fn with_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }
}

// ============================================================================
// Post Body
// ============================================================================

/// Body payload for POST requests.
///
/// Bodies are kept in decoded form so a retried attempt can re-send them.
#[derive(Debug, Clone)]
pub enum PostBody {
    /// Opaque binary payload.
    Bytes(Vec<u8>),
    /// Ordered key-value pairs, sent form-url-encoded.
    Form(Vec<(String, String)>),
    /// Plain text payload.
    Text(String),
    /// Any value serialized as a JSON document.
    Json(serde_json::Value),
}

impl PostBody {
    /// Serializes a value into a JSON body.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::Json(serde_json::to_value(value)?))
    }
}

// ============================================================================
// Tests
// ============================================================================
