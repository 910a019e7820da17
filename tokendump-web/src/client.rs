//! The typed web client.
//!
//! One logical request = up to `max_tries` attempts. Within one attempt,
//! redirects are followed manually (bounded by the same budget) so that
//! custom-scheme targets can be surfaced to the caller instead of followed.
//! Decode failures consume an attempt and are retried like transport
//! failures.

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::{HeaderValue, REFERER};
use reqwest::Method;
use scraper::Html;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use crate::error::{TransportError, WebError};
use crate::options::{classify, Disposition, PostBody, RequestOptions};
use crate::redirect::{resolve_redirect, RedirectStep};
use crate::response::{
    BytesResponse, HtmlResponse, ObjectResponse, ResponseMeta, StatusResponse, StreamResponse,
    TextResponse, XmlResponse,
};
use crate::transport::{HttpTransport, ReqwestTransport, TransportRequest, TransportResponse};

/// Redirect target schemes handed back to the caller instead of followed.
const DEFAULT_CUSTOM_SCHEMES: &[&str] = &["steammobile"];

/// Outcome of one attempt (including any internally followed redirects).
enum Attempt {
    /// Final response: 2xx, policy-accepted error, or an unfollowed
    /// redirect. Carries the URL the response came from.
    Done(TransportResponse, Url),
    /// The attempt failed; the outer loop may retry.
    Failed,
    /// Terminal failure; retrying cannot help.
    Stop(WebError),
}

// ============================================================================
// Web Client
// ============================================================================

/// Typed HTTP client with bounded retries and manual redirect handling.
pub struct WebClient {
    transport: Arc<dyn HttpTransport>,
    custom_schemes: Vec<String>,
}

impl WebClient {
    /// Creates a client over the default pooled transport.
    pub fn new() -> Result<Self, WebError> {
        let transport = ReqwestTransport::new()?;
        Ok(Self::with_transport(Arc::new(transport)))
    }

    /// Creates a client over a caller-supplied transport.
    pub fn with_transport(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            custom_schemes: DEFAULT_CUSTOM_SCHEMES
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }

    /// Replaces the recognized custom redirect schemes.
    pub fn with_custom_schemes(mut self, schemes: Vec<String>) -> Self {
        self.custom_schemes = schemes;
        self
    }

    // ========================================================================
    // GET
    // ========================================================================

    /// Fetches a URL into a buffered byte response.
    pub async fn get_bytes(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<BytesResponse, WebError> {
        self.bytes_request(Method::GET, url, None, options, None).await
    }

    /// Fetches a URL into a buffered byte response, reporting download
    /// progress as discrete percentage steps.
    ///
    /// The callback fires at most ~100 times: once at 0, once per
    /// `content_length / 100` bytes read, and once at 100 when the body is
    /// complete.
    pub async fn get_bytes_with_progress(
        &self,
        url: &str,
        options: &RequestOptions,
        progress: &mut (dyn FnMut(u8) + Send),
    ) -> Result<BytesResponse, WebError> {
        self.bytes_request(Method::GET, url, None, options, Some(progress))
            .await
    }

    /// Fetches a URL as UTF-8 text.
    pub async fn get_text(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<TextResponse, WebError> {
        self.text_request(Method::GET, url, None, options).await
    }

    /// Fetches a URL and decodes the body as a JSON object.
    pub async fn get_object<T: DeserializeOwned>(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<ObjectResponse<T>, WebError> {
        self.object_request(Method::GET, url, None, options).await
    }

    /// Fetches a URL and parses the body as a markup document.
    pub async fn get_html(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<HtmlResponse, WebError> {
        self.html_request(Method::GET, url, None, options).await
    }

    /// Fetches a URL and parses the body as an XML document.
    pub async fn get_xml(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<XmlResponse, WebError> {
        self.xml_request(Method::GET, url, None, options).await
    }

    /// Fetches a URL, returning the body as an open stream.
    pub async fn get_stream(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<StreamResponse, WebError> {
        self.stream_request(Method::GET, url, None, options).await
    }

    // ========================================================================
    // HEAD
    // ========================================================================

    /// Performs a HEAD request, returning status and final URL only.
    pub async fn head(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<StatusResponse, WebError> {
        self.status_request(Method::HEAD, url, None, options).await
    }

    // ========================================================================
    // POST
    // ========================================================================

    /// Performs a POST request, returning status and final URL only.
    pub async fn post(
        &self,
        url: &str,
        body: Option<PostBody>,
        options: &RequestOptions,
    ) -> Result<StatusResponse, WebError> {
        self.status_request(Method::POST, url, body, options).await
    }

    /// Performs a POST request into a buffered byte response.
    pub async fn post_bytes(
        &self,
        url: &str,
        body: Option<PostBody>,
        options: &RequestOptions,
    ) -> Result<BytesResponse, WebError> {
        self.bytes_request(Method::POST, url, body, options, None).await
    }

    /// Performs a POST request and returns the body as UTF-8 text.
    pub async fn post_text(
        &self,
        url: &str,
        body: Option<PostBody>,
        options: &RequestOptions,
    ) -> Result<TextResponse, WebError> {
        self.text_request(Method::POST, url, body, options).await
    }

    /// Performs a POST request and decodes the response as a JSON object.
    pub async fn post_object<T: DeserializeOwned>(
        &self,
        url: &str,
        body: Option<PostBody>,
        options: &RequestOptions,
    ) -> Result<ObjectResponse<T>, WebError> {
        self.object_request(Method::POST, url, body, options).await
    }

    /// Performs a POST request and parses the response as a markup document.
    pub async fn post_html(
        &self,
        url: &str,
        body: Option<PostBody>,
        options: &RequestOptions,
    ) -> Result<HtmlResponse, WebError> {
        self.html_request(Method::POST, url, body, options).await
    }

    /// Performs a POST request and parses the response as an XML document.
    pub async fn post_xml(
        &self,
        url: &str,
        body: Option<PostBody>,
        options: &RequestOptions,
    ) -> Result<XmlResponse, WebError> {
        self.xml_request(Method::POST, url, body, options).await
    }

    /// Performs a POST request, returning the body as an open stream.
    pub async fn post_stream(
        &self,
        url: &str,
        body: Option<PostBody>,
        options: &RequestOptions,
    ) -> Result<StreamResponse, WebError> {
        self.stream_request(Method::POST, url, body, options).await
    }

    // ========================================================================
    // Request Loops
    // ========================================================================

    async fn bytes_request(
        &self,
        method: Method,
        url: &str,
        body: Option<PostBody>,
        options: &RequestOptions,
        mut progress: Option<&mut (dyn FnMut(u8) + Send + '_)>,
    ) -> Result<BytesResponse, WebError> {
        Self::check_options(options);
        let parsed = Self::parse_url(url)?;

        for _ in 0..options.max_tries {
            match self.single_attempt(&method, &parsed, body.as_ref(), options).await {
                Attempt::Done(response, final_url) => {
                    let meta = ResponseMeta::new(response.status, final_url);
                    match read_body(response, progress.as_deref_mut()).await {
                        Ok(bytes) => return Ok(BytesResponse { meta, bytes }),
                        Err(e) => {
                            warn!(error = %e, url = %parsed, "Failed to read response body");
                        }
                    }
                }
                Attempt::Failed => {}
                Attempt::Stop(e) => return Err(e),
            }
        }

        Err(Self::exhausted(&parsed, options.max_tries))
    }

    async fn text_request(
        &self,
        method: Method,
        url: &str,
        body: Option<PostBody>,
        options: &RequestOptions,
    ) -> Result<TextResponse, WebError> {
        Self::check_options(options);
        let parsed = Self::parse_url(url)?;

        for _ in 0..options.max_tries {
            match self.single_attempt(&method, &parsed, body.as_ref(), options).await {
                Attempt::Done(response, final_url) => {
                    let meta = ResponseMeta::new(response.status, final_url);
                    match response.text().await {
                        Ok(text) => return Ok(TextResponse { meta, text }),
                        Err(e) => {
                            warn!(error = %e, url = %parsed, "Failed to read response body");
                        }
                    }
                }
                Attempt::Failed => {}
                Attempt::Stop(e) => return Err(e),
            }
        }

        Err(Self::exhausted(&parsed, options.max_tries))
    }

    async fn object_request<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: Option<PostBody>,
        options: &RequestOptions,
    ) -> Result<ObjectResponse<T>, WebError> {
        Self::check_options(options);
        let parsed = Self::parse_url(url)?;

        for _ in 0..options.max_tries {
            match self.single_attempt(&method, &parsed, body.as_ref(), options).await {
                Attempt::Done(response, final_url) => {
                    let meta = ResponseMeta::new(response.status, final_url);
                    let accepted_error = !meta.status.is_success();
                    let bytes = match response.bytes().await {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            warn!(error = %e, url = %parsed, "Failed to read response body");
                            continue;
                        }
                    };

                    match serde_json::from_slice::<T>(&bytes) {
                        Ok(value) => {
                            return Ok(ObjectResponse {
                                meta,
                                value: Some(value),
                            })
                        }
                        Err(e) if accepted_error => {
                            // The caller asked for this error response; the
                            // body not being valid JSON does not change that.
                            debug!(error = %e, status = %meta.status, "Accepted error response did not decode");
                            return Ok(ObjectResponse { meta, value: None });
                        }
                        Err(e) => {
                            warn!(error = %e, url = %parsed, "Failed to decode response object");
                        }
                    }
                }
                Attempt::Failed => {}
                Attempt::Stop(e) => return Err(e),
            }
        }

        Err(Self::exhausted(&parsed, options.max_tries))
    }

    async fn html_request(
        &self,
        method: Method,
        url: &str,
        body: Option<PostBody>,
        options: &RequestOptions,
    ) -> Result<HtmlResponse, WebError> {
        Self::check_options(options);
        let parsed = Self::parse_url(url)?;

        for _ in 0..options.max_tries {
            let (response, final_url) =
                match self.single_attempt(&method, &parsed, body.as_ref(), options).await {
                    Attempt::Done(response, final_url) => (response, final_url),
                    Attempt::Failed => continue,
                    Attempt::Stop(e) => return Err(e),
                };

            let status = response.status;
            let bytes = match response.bytes().await {
                Ok(bytes) => bytes,
                Err(first_err) => {
                    // The markup decoder gets one extra network sub-attempt
                    // before this outer attempt counts as failed.
                    warn!(error = %first_err, url = %parsed, "Markup body read failed, retrying once");
                    match self.single_attempt(&method, &parsed, body.as_ref(), options).await {
                        Attempt::Done(retry_response, _) => match retry_response.bytes().await {
                            Ok(bytes) => bytes,
                            Err(e) => {
                                warn!(error = %e, url = %parsed, "Markup body read failed again");
                                continue;
                            }
                        },
                        Attempt::Failed => continue,
                        Attempt::Stop(e) => return Err(e),
                    }
                }
            };

            let text = String::from_utf8_lossy(&bytes);
            let document = Html::parse_document(&text);
            return Ok(HtmlResponse {
                meta: ResponseMeta::new(status, final_url),
                document,
            });
        }

        Err(Self::exhausted(&parsed, options.max_tries))
    }

    async fn xml_request(
        &self,
        method: Method,
        url: &str,
        body: Option<PostBody>,
        options: &RequestOptions,
    ) -> Result<XmlResponse, WebError> {
        Self::check_options(options);
        let parsed = Self::parse_url(url)?;

        for _ in 0..options.max_tries {
            match self.single_attempt(&method, &parsed, body.as_ref(), options).await {
                Attempt::Done(response, final_url) => {
                    let meta = ResponseMeta::new(response.status, final_url);
                    let bytes = match response.bytes().await {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            warn!(error = %e, url = %parsed, "Failed to read response body");
                            continue;
                        }
                    };

                    match xmltree::Element::parse(bytes.as_ref()) {
                        Ok(document) => return Ok(XmlResponse { meta, document }),
                        Err(e) => {
                            warn!(error = %e, url = %parsed, "Failed to parse XML document");
                        }
                    }
                }
                Attempt::Failed => {}
                Attempt::Stop(e) => return Err(e),
            }
        }

        Err(Self::exhausted(&parsed, options.max_tries))
    }

    async fn stream_request(
        &self,
        method: Method,
        url: &str,
        body: Option<PostBody>,
        options: &RequestOptions,
    ) -> Result<StreamResponse, WebError> {
        Self::check_options(options);
        let parsed = Self::parse_url(url)?;

        for _ in 0..options.max_tries {
            match self.single_attempt(&method, &parsed, body.as_ref(), options).await {
                Attempt::Done(response, final_url) => {
                    return Ok(StreamResponse {
                        meta: ResponseMeta::new(response.status, final_url),
                        content_length: response.content_length,
                        stream: response.body,
                    })
                }
                Attempt::Failed => {}
                Attempt::Stop(e) => return Err(e),
            }
        }

        Err(Self::exhausted(&parsed, options.max_tries))
    }

    async fn status_request(
        &self,
        method: Method,
        url: &str,
        body: Option<PostBody>,
        options: &RequestOptions,
    ) -> Result<StatusResponse, WebError> {
        Self::check_options(options);
        let parsed = Self::parse_url(url)?;

        for _ in 0..options.max_tries {
            match self.single_attempt(&method, &parsed, body.as_ref(), options).await {
                Attempt::Done(response, final_url) => {
                    return Ok(StatusResponse {
                        meta: ResponseMeta::new(response.status, final_url),
                    })
                }
                Attempt::Failed => {}
                Attempt::Stop(e) => return Err(e),
            }
        }

        Err(Self::exhausted(&parsed, options.max_tries))
    }

    // ========================================================================
    // One Attempt
    // ========================================================================

    /// Performs one attempt: a single wire request plus any internally
    /// followed redirects, bounded by `options.max_tries` hops.
    async fn single_attempt(
        &self,
        method: &Method,
        url: &Url,
        body: Option<&PostBody>,
        options: &RequestOptions,
    ) -> Attempt {
        let mut current = url.clone();
        let mut method = method.clone();
        let mut body = body.cloned();
        let mut hops_left = options.max_tries;

        loop {
            let mut headers = options.headers.clone();
            if let Some(referer) = &options.referer {
                if let Ok(value) = HeaderValue::from_str(referer) {
                    headers.insert(REFERER, value);
                }
            }

            debug!(method = %method, url = %current, "Sending request");

            let response = match self
                .transport
                .execute(TransportRequest {
                    method: method.clone(),
                    url: current.clone(),
                    headers,
                    body: body.clone(),
                })
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    debug!(error = %e, url = %current, "Transport failure");
                    return Attempt::Failed;
                }
            };

            debug!(status = %response.status, url = %current, "Response received");

            if response.status.is_redirection() {
                match resolve_redirect(
                    &current,
                    response.status,
                    &method,
                    response.location(),
                    &self.custom_schemes,
                ) {
                    RedirectStep::ReturnResponse => return Attempt::Done(response, current),
                    RedirectStep::Abort => {
                        return Attempt::Stop(WebError::InvalidRedirect(current.to_string()))
                    }
                    RedirectStep::Follow(target) => {
                        if hops_left <= 1 {
                            warn!(url = %target, "Redirect budget exhausted");
                            return Attempt::Failed;
                        }
                        hops_left -= 1;
                        current = target;
                    }
                    RedirectStep::FollowAsGet(target) => {
                        if hops_left <= 1 {
                            warn!(url = %target, "Redirect budget exhausted");
                            return Attempt::Failed;
                        }
                        hops_left -= 1;
                        method = Method::GET;
                        body = None;
                        current = target;
                    }
                }
                continue;
            }

            return match classify(response.status, options.policy) {
                Disposition::Success | Disposition::Accept => Attempt::Done(response, current),
                Disposition::Retry => {
                    log_discarded(response, &current).await;
                    Attempt::Failed
                }
                Disposition::Stop => {
                    let status = response.status;
                    log_discarded(response, &current).await;
                    Attempt::Stop(WebError::Unsuccessful { status })
                }
            };
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Validates per-request options.
    ///
    /// # Panics
    ///
    /// Panics if `options.max_tries` is zero; a request that may not even be
    /// attempted once is a caller programming error.
    fn check_options(options: &RequestOptions) {
        assert!(options.max_tries > 0, "max_tries must be at least 1");
    }

    fn parse_url(url: &str) -> Result<Url, WebError> {
        Url::parse(url).map_err(|e| WebError::InvalidUrl(format!("{url}: {e}")))
    }

    fn exhausted(url: &Url, tries: u8) -> WebError {
        warn!(url = %url, tries, "Request failed too many times");
        WebError::Exhausted {
            url: url.to_string(),
            tries,
        }
    }
}

/// Logs the body of a response that is about to be discarded, for
/// diagnostics.
async fn log_discarded(response: TransportResponse, url: &Url) {
    let status = response.status;
    match response.text().await {
        Ok(body) if !body.is_empty() => {
            debug!(status = %status, url = %url, body = %body, "Discarding failed response");
        }
        _ => debug!(status = %status, url = %url, "Discarding failed response"),
    }
}

/// Reads a body stream to completion, optionally reporting progress in
/// discrete percentage steps batched by `content_length / 100` bytes.
async fn read_body(
    mut response: TransportResponse,
    mut progress: Option<&mut (dyn FnMut(u8) + Send + '_)>,
) -> Result<Bytes, TransportError> {
    let total = response.content_length;
    let batch = total.map(|len| (len / 100).max(1));

    if let Some(cb) = progress.as_mut() {
        cb(0);
    }

    let capacity = total.and_then(|len| usize::try_from(len).ok()).unwrap_or(0);
    let mut buffer = Vec::with_capacity(capacity);
    let mut crossed: u64 = 0;

    while let Some(chunk) = response.body.next().await {
        buffer.extend_from_slice(&chunk?);

        if let (Some(cb), Some(total), Some(batch)) = (progress.as_mut(), total, batch) {
            let now_crossed = buffer.len() as u64 / batch;
            if now_crossed > crossed && total > 0 {
                crossed = now_crossed;
                #[allow(clippy::cast_possible_truncation)]
                let percent = ((buffer.len() as u64) * 100 / total).min(99) as u8;
                cb(percent);
            }
        }
    }

    if let Some(cb) = progress.as_mut() {
        cb(100);
    }

    Ok(Bytes::from(buffer))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ErrorPolicy;
    use async_trait::async_trait;
    use reqwest::header::{HeaderMap, HeaderValue, LOCATION};
    use reqwest::StatusCode;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct Scripted {
        status: StatusCode,
        headers: HeaderMap,
        body: Vec<u8>,
        content_length: Option<u64>,
    }

    impl Scripted {
        fn ok(body: &[u8]) -> Self {
            Self {
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                body: body.to_vec(),
                content_length: Some(body.len() as u64),
            }
        }

        fn status(status: StatusCode) -> Self {
            Self {
                status,
                headers: HeaderMap::new(),
                body: Vec::new(),
                content_length: Some(0),
            }
        }

        fn redirect(status: StatusCode, location: &str) -> Self {
            let mut headers = HeaderMap::new();
            headers.insert(LOCATION, HeaderValue::from_str(location).unwrap());
            Self {
                status,
                headers,
                body: Vec::new(),
                content_length: Some(0),
            }
        }
    }

    struct MockTransport {
        responses: Mutex<VecDeque<Result<Scripted, TransportError>>>,
        requests: Mutex<Vec<(Method, Url)>>,
    }

    impl MockTransport {
        fn new(responses: Vec<Result<Scripted, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into_iter().collect()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<(Method, Url)> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpTransport for MockTransport {
        async fn execute(
            &self,
            request: TransportRequest,
        ) -> Result<TransportResponse, TransportError> {
            self.requests
                .lock()
                .unwrap()
                .push((request.method.clone(), request.url.clone()));

            let scripted = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(TransportError::Request("no scripted response".into())))?;

            Ok(TransportResponse {
                status: scripted.status,
                headers: scripted.headers,
                content_length: scripted.content_length,
                body: Box::pin(futures::stream::iter(vec![Ok(Bytes::from(scripted.body))])),
            })
        }
    }

    fn client(transport: &Arc<MockTransport>) -> WebClient {
        WebClient::with_transport(transport.clone())
    }

    #[tokio::test]
    async fn test_success_first_try() {
        let transport = MockTransport::new(vec![Ok(Scripted::ok(b"hello"))]);
        let response = client(&transport)
            .get_bytes("http://host/x", &RequestOptions::default())
            .await
            .unwrap();

        assert!(response.meta.is_success());
        assert_eq!(response.bytes.as_ref(), b"hello");
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_budget_is_exact() {
        let transport = MockTransport::new(vec![
            Err(TransportError::Timeout),
            Err(TransportError::Timeout),
            Err(TransportError::Timeout),
        ]);
        let options = RequestOptions::default().with_max_tries(3);
        let result = client(&transport).get_bytes("http://host/x", &options).await;

        assert!(matches!(result, Err(WebError::Exhausted { tries: 3, .. })));
        assert_eq!(transport.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_transient_failure_then_success() {
        let transport = MockTransport::new(vec![
            Err(TransportError::Timeout),
            Ok(Scripted::ok(b"recovered")),
        ]);
        let response = client(&transport)
            .get_text("http://host/x", &RequestOptions::default())
            .await
            .unwrap();

        assert_eq!(response.text, "recovered");
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_client_error_stops_without_retry() {
        let transport = MockTransport::new(vec![Ok(Scripted::status(StatusCode::NOT_FOUND))]);
        let result = client(&transport)
            .get_bytes("http://host/x", &RequestOptions::default())
            .await;

        assert!(matches!(
            result,
            Err(WebError::Unsuccessful {
                status: StatusCode::NOT_FOUND
            })
        ));
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_client_error_surfaced_when_requested() {
        let transport = MockTransport::new(vec![Ok(Scripted::status(StatusCode::FORBIDDEN))]);
        let options = RequestOptions::default().with_policy(ErrorPolicy::client_errors());
        let response = client(&transport)
            .get_object::<serde_json::Value>("http://host/x", &options)
            .await
            .unwrap();

        assert_eq!(response.meta.status, StatusCode::FORBIDDEN);
        assert!(response.value.is_none());
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_server_error_retries_by_default() {
        let transport = MockTransport::new(vec![
            Ok(Scripted::status(StatusCode::INTERNAL_SERVER_ERROR)),
            Ok(Scripted::ok(b"fine now")),
        ]);
        let response = client(&transport)
            .get_bytes("http://host/x", &RequestOptions::default())
            .await
            .unwrap();

        assert_eq!(response.bytes.as_ref(), b"fine now");
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_server_error_surfaced_when_requested() {
        let transport =
            MockTransport::new(vec![Ok(Scripted::status(StatusCode::INTERNAL_SERVER_ERROR))]);
        let options = RequestOptions::default().with_policy(ErrorPolicy::server_errors());
        let response = client(&transport)
            .get_bytes("http://host/x", &options)
            .await
            .unwrap();

        assert_eq!(response.meta.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_redirect_followed_with_fragment_inheritance() {
        let transport = MockTransport::new(vec![
            Ok(Scripted::redirect(StatusCode::FOUND, "/y")),
            Ok(Scripted::ok(b"landed")),
        ]);
        let response = client(&transport)
            .get_bytes("http://a/x#frag", &RequestOptions::default())
            .await
            .unwrap();

        assert_eq!(response.bytes.as_ref(), b"landed");
        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].1.as_str(), "http://a/y#frag");
        assert_eq!(response.meta.final_url.as_str(), "http://a/y#frag");
    }

    #[tokio::test]
    async fn test_custom_scheme_redirect_returned_as_is() {
        let transport = MockTransport::new(vec![Ok(Scripted::redirect(
            StatusCode::FOUND,
            "steammobile://lostauth",
        ))]);
        let response = client(&transport)
            .get_bytes("http://host/x", &RequestOptions::default())
            .await
            .unwrap();

        assert_eq!(response.meta.status, StatusCode::FOUND);
        assert!(response.meta.is_redirect());
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_location_is_terminal() {
        let transport = MockTransport::new(vec![Ok(Scripted::status(StatusCode::FOUND))]);
        let result = client(&transport)
            .get_bytes("http://host/x", &RequestOptions::default())
            .await;

        assert!(matches!(result, Err(WebError::InvalidRedirect(_))));
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_post_downgraded_to_get_on_302() {
        let transport = MockTransport::new(vec![
            Ok(Scripted::redirect(StatusCode::FOUND, "http://host/next")),
            Ok(Scripted::ok(b"{}")),
        ]);
        let response = client(&transport)
            .post_object::<serde_json::Value>(
                "http://host/x",
                Some(PostBody::Text("payload".into())),
                &RequestOptions::default(),
            )
            .await
            .unwrap();

        assert!(response.value.is_some());
        let requests = transport.requests();
        assert_eq!(requests[0].0, Method::POST);
        assert_eq!(requests[1].0, Method::GET);
    }

    #[tokio::test]
    async fn test_head_preserved_across_redirect() {
        let transport = MockTransport::new(vec![
            Ok(Scripted::redirect(StatusCode::MOVED_PERMANENTLY, "http://host/next")),
            Ok(Scripted::status(StatusCode::OK)),
        ]);
        let response = client(&transport)
            .head("http://host/x", &RequestOptions::default())
            .await
            .unwrap();

        assert!(response.meta.is_success());
        let requests = transport.requests();
        assert_eq!(requests[0].0, Method::HEAD);
        assert_eq!(requests[1].0, Method::HEAD);
    }

    #[tokio::test]
    async fn test_redirect_loop_exhausts_budget() {
        let responses = (0..20)
            .map(|_| Ok(Scripted::redirect(StatusCode::FOUND, "http://host/x")))
            .collect();
        let transport = MockTransport::new(responses);
        let options = RequestOptions::default().with_max_tries(2);
        let result = client(&transport).get_bytes("http://host/x", &options).await;

        assert!(matches!(result, Err(WebError::Exhausted { .. })));
    }

    #[tokio::test]
    async fn test_object_decode_failure_retries() {
        let transport = MockTransport::new(vec![
            Ok(Scripted::ok(b"not json")),
            Ok(Scripted::ok(b"{\"ok\":true}")),
        ]);
        let response = client(&transport)
            .get_object::<serde_json::Value>("http://host/x", &RequestOptions::default())
            .await
            .unwrap();

        assert!(response.value.is_some());
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_progress_ticks_are_bounded_and_complete() {
        let body = vec![0u8; 1000];
        let transport = MockTransport::new(vec![Ok(Scripted::ok(&body))]);
        let mut ticks: Vec<u8> = Vec::new();

        let response = client(&transport)
            .get_bytes_with_progress("http://host/x", &RequestOptions::default(), &mut |p| {
                ticks.push(p);
            })
            .await
            .unwrap();

        assert_eq!(response.bytes.len(), 1000);
        assert_eq!(*ticks.first().unwrap(), 0);
        assert_eq!(*ticks.last().unwrap(), 100);
        assert!(ticks.len() <= 102);
        assert!(ticks.windows(2).all(|w| w[0] <= w[1]), "ticks must be monotonic");
    }

    #[tokio::test]
    async fn test_invalid_url_rejected() {
        let transport = MockTransport::new(vec![]);
        let result = client(&transport)
            .get_bytes("not a url", &RequestOptions::default())
            .await;

        assert!(matches!(result, Err(WebError::InvalidUrl(_))));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    #[should_panic(expected = "max_tries must be at least 1")]
    async fn test_zero_tries_panics() {
        let transport = MockTransport::new(vec![]);
        let options = RequestOptions::default().with_max_tries(0);
        let _ = client(&transport).get_bytes("http://host/x", &options).await;
    }

    #[tokio::test]
    async fn test_xml_response() {
        let transport =
            MockTransport::new(vec![Ok(Scripted::ok(b"<root><child>v</child></root>"))]);
        let response = client(&transport)
            .get_xml("http://host/x", &RequestOptions::default())
            .await
            .unwrap();

        assert_eq!(response.document.name, "root");
        assert!(response.document.get_child("child").is_some());
    }

    #[tokio::test]
    async fn test_html_response() {
        let transport = MockTransport::new(vec![Ok(Scripted::ok(
            b"<html><body><p>hi</p></body></html>",
        ))]);
        let response = client(&transport)
            .get_html("http://host/x", &RequestOptions::default())
            .await
            .unwrap();

        let selector = scraper::Selector::parse("p").unwrap();
        let text: Vec<_> = response.document.select(&selector).collect();
        assert_eq!(text.len(), 1);
    }

    #[tokio::test]
    async fn test_stream_response() {
        let transport = MockTransport::new(vec![Ok(Scripted::ok(b"streamed"))]);
        let response = client(&transport)
            .get_stream("http://host/x", &RequestOptions::default())
            .await
            .unwrap();

        let mut stream = response.stream;
        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(collected, b"streamed");
    }
}
