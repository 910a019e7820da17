//! Typed response wrappers.
//!
//! Every response kind shares a [`ResponseMeta`] carrying the final URL
//! (after any redirects) and the status code, with a content-shape-specific
//! payload per wrapper.

use bytes::Bytes;
use reqwest::StatusCode;
use url::Url;

use crate::transport::BodyStream;

// ============================================================================
// Response Metadata
// ============================================================================

/// Metadata common to every response kind.
#[derive(Debug, Clone)]
pub struct ResponseMeta {
    /// Final response status.
    pub status: StatusCode,
    /// The URL that produced the response, after redirect resolution.
    pub final_url: Url,
}

impl ResponseMeta {
    /// Creates response metadata.
    pub fn new(status: StatusCode, final_url: Url) -> Self {
        Self { status, final_url }
    }

    /// Returns true for 2xx responses.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Returns true if the server rate-limited the request.
    pub fn is_rate_limited(&self) -> bool {
        self.status == StatusCode::TOO_MANY_REQUESTS
    }

    /// Returns true if this is an unfollowed redirect handed back to the
    /// caller (custom or unsupported target scheme).
    pub fn is_redirect(&self) -> bool {
        self.status.is_redirection()
    }
}

// ============================================================================
// Response Kinds
// ============================================================================

/// A fully buffered binary response.
#[derive(Debug, Clone)]
pub struct BytesResponse {
    /// Response metadata.
    pub meta: ResponseMeta,
    /// The response body.
    pub bytes: Bytes,
}

/// A UTF-8 text response.
#[derive(Debug, Clone)]
pub struct TextResponse {
    /// Response metadata.
    pub meta: ResponseMeta,
    /// The decoded body.
    pub text: String,
}

/// A JSON response decoded into a statically declared shape.
#[derive(Debug, Clone)]
pub struct ObjectResponse<T> {
    /// Response metadata.
    pub meta: ResponseMeta,
    /// The decoded payload.
    ///
    /// `None` only for policy-accepted error responses whose body did not
    /// decode as `T`; successful responses always carry a value.
    pub value: Option<T>,
}

impl<T> ObjectResponse<T> {
    /// Consumes the response and returns the decoded payload, if any.
    pub fn into_value(self) -> Option<T> {
        self.value
    }
}

/// A parsed markup document.
pub struct HtmlResponse {
    /// Response metadata.
    pub meta: ResponseMeta,
    /// The parsed document tree.
    pub document: scraper::Html,
}

/// A parsed XML document.
#[derive(Debug)]
pub struct XmlResponse {
    /// Response metadata.
    pub meta: ResponseMeta,
    /// The parsed document root.
    pub document: xmltree::Element,
}

/// A response whose body is returned as an open stream.
///
/// Dropping the response releases the underlying connection.
pub struct StreamResponse {
    /// Response metadata.
    pub meta: ResponseMeta,
    /// Declared body length, when known.
    pub content_length: Option<u64>,
    /// The open body stream.
    pub stream: BodyStream,
}

/// A status-only response; the body, if any, has been discarded.
#[derive(Debug, Clone)]
pub struct StatusResponse {
    /// Response metadata.
    pub meta: ResponseMeta,
}
