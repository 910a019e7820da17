//! The wire seam: one attempt, no retries, no redirect following.
//!
//! [`HttpTransport`] is the boundary between the typed client's retry and
//! redirect logic and the actual HTTP stack. The production implementation
//! wraps a pooled `reqwest` client with automatic redirects disabled; tests
//! substitute scripted transports.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, CONTENT_TYPE, LOCATION};
use reqwest::{Client, Method, StatusCode};
use url::Url;

use crate::error::TransportError;
use crate::options::PostBody;

/// Default request timeout.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// User agent string sent with every request.
const USER_AGENT: &str = concat!("tokendump/", env!("CARGO_PKG_VERSION"));

/// A response body as a stream of chunks.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

// ============================================================================
// Request / Response
// ============================================================================

/// One wire request.
#[derive(Debug)]
pub struct TransportRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute target URL.
    pub url: Url,
    /// Request headers.
    pub headers: HeaderMap,
    /// Optional body payload.
    pub body: Option<PostBody>,
}

/// One wire response with its body still unread.
pub struct TransportResponse {
    /// Response status.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Declared body length, when the server sent one.
    pub content_length: Option<u64>,
    /// The open body stream.
    pub body: BodyStream,
}

impl TransportResponse {
    /// Returns the `Location` header as a string, if present and readable.
    pub fn location(&self) -> Option<&str> {
        self.headers.get(LOCATION).and_then(|value| value.to_str().ok())
    }

    /// Collects the whole body into memory.
    pub async fn bytes(mut self) -> Result<Bytes, TransportError> {
        let capacity = self
            .content_length
            .and_then(|len| usize::try_from(len).ok())
            .unwrap_or(0);
        let mut buffer = Vec::with_capacity(capacity);
        while let Some(chunk) = self.body.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(Bytes::from(buffer))
    }

    /// Collects the whole body as lossy UTF-8 text.
    pub async fn text(self) -> Result<String, TransportError> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

// ============================================================================
// Transport Trait
// ============================================================================

/// Executes exactly one wire attempt.
///
/// Implementations must not follow redirects or retry; both are the typed
/// client's responsibility.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Sends the request and returns the raw response.
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}

// ============================================================================
// Reqwest Transport
// ============================================================================

/// Production transport backed by a pooled `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    inner: Client,
}

impl ReqwestTransport {
    /// Creates a transport with the default request timeout.
    pub fn new() -> Result<Self, TransportError> {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Creates a transport with a custom request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self, TransportError> {
        let inner = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| TransportError::Build(e.to_string()))?;

        Ok(Self { inner })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let mut builder = self
            .inner
            .request(request.method, request.url)
            .headers(request.headers);

        if let Some(body) = request.body {
            builder = match body {
                PostBody::Bytes(bytes) => builder.body(bytes),
                PostBody::Form(pairs) => builder.form(&pairs),
                PostBody::Text(text) => builder
                    .header(CONTENT_TYPE, "text/plain; charset=utf-8")
                    .body(text),
                PostBody::Json(value) => builder.json(&value),
            };
        }

        let response = builder.send().await?;

        let status = response.status();
        let headers = response.headers().clone();
        let content_length = response.content_length();
        let body: BodyStream = Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(TransportError::from)),
        );

        Ok(TransportResponse {
            status,
            headers,
            content_length,
            body,
        })
    }
}
