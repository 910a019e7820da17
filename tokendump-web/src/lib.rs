// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # tokendump Web
//!
//! Typed, retrying HTTP client for the tokendump harvester.
//!
//! The client wraps a connection-pooled transport behind the
//! [`transport::HttpTransport`] seam and layers three things on top:
//!
//! - **Bounded retries** with an [`options::ErrorPolicy`] deciding whether
//!   client/server error responses are surfaced to the caller or handled by
//!   the retry loop.
//! - **Manual redirect following**, because some redirect targets use
//!   non-HTTP custom schemes that must be handed back to the caller instead
//!   of being followed.
//! - **Typed response wrappers** ([`response`]) with content-shape-specific
//!   decoders: raw bytes (with download progress), UTF-8 text, JSON objects,
//!   markup documents, XML documents, open body streams, and status-only.
//!
//! ## Example
//!
//! ```ignore
//! use tokendump_web::{RequestOptions, WebClient};
//!
//! let client = WebClient::new()?;
//! let options = RequestOptions::default();
//! let response = client.get_object::<MyPayload>("https://example.com/api", &options).await?;
//! ```

pub mod client;
pub mod error;
pub mod options;
pub mod response;
pub mod transport;

mod redirect;

pub use client::WebClient;
pub use error::{TransportError, WebError};
pub use options::{ErrorPolicy, PostBody, RequestOptions, DEFAULT_MAX_TRIES};
pub use response::{
    BytesResponse, HtmlResponse, ObjectResponse, ResponseMeta, StatusResponse, StreamResponse,
    TextResponse, XmlResponse,
};
pub use transport::{BodyStream, HttpTransport, ReqwestTransport, TransportRequest, TransportResponse};
