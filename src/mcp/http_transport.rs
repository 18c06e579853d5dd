//! MCP HTTP Transport Layer
//!
//! This module implements the HTTP transport used to talk to MCP servers.
//!
//! # Transport Modes
//!
//! 1. **Unary**: one request, one decoded body (JSON, text or binary)
//! 2. **Streamable HTTP**: a long-lived response framed as server-sent events,
//!    yielded lazily as they arrive
//!
//! Servers that answer a streaming request with a plain JSON body are also
//! supported; the body is yielded as a single event.
//!
//! # Example
//!
//! ```ignore
//! use mcp_harness::mcp::{HttpTransport, RequestOptions, Transport};
//!
//! let transport = HttpTransport::new()
//!     .with_timeout(Duration::from_secs(5))
//!     .with_bearer_token("secret");
//!
//! let body = transport
//!     .request("http://127.0.0.1:3000/health", RequestOptions::get())
//!     .await?;
//! ```

use crate::mcp::sse::{SseFramer, StreamEvent};
use crate::mcp::transport::{
    EventStream, HttpMethod, PendingRequest, RequestOptions, ResponseBody, ResponseFormat,
    StreamOptions, Transport, TransportError, DEFAULT_TIMEOUT,
};
use async_stream::try_stream;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const JSON_MIME: &str = "application/json";
const EVENT_STREAM_MIME: &str = "text/event-stream";

/// HTTP transport for MCP servers
///
/// # Configuration
///
/// - **headers**: default headers sent with every call (e.g., authentication)
/// - **timeout**: per-call timeout (default: 10 seconds); for streams this
///   is the idle timeout between events
/// - **response format**: how unary bodies are decoded (default: JSON)
///
/// Every call is tracked individually; [`Transport::close`] aborts all of
/// them and rejects later calls.
pub struct HttpTransport {
    /// Reqwest HTTP client
    client: reqwest::Client,

    default_headers: BTreeMap<String, String>,

    timeout: Duration,

    response_format: ResponseFormat,

    /// Parent of every per-call token
    root: CancellationToken,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            default_headers: BTreeMap::new(),
            timeout: DEFAULT_TIMEOUT,
            response_format: ResponseFormat::default(),
            root: CancellationToken::new(),
        }
    }

    /// Set the per-call timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Add a default header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(name.into(), value.into());
        self
    }

    /// Add several default headers
    pub fn with_headers(mut self, headers: &BTreeMap<String, String>) -> Self {
        self.default_headers
            .extend(headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Send `Authorization: Bearer <token>` with every call
    pub fn with_bearer_token(self, token: impl AsRef<str>) -> Self {
        let value = format!("Bearer {}", token.as_ref());
        self.with_header("Authorization", value)
    }

    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = format;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn response_format(&self) -> ResponseFormat {
        self.response_format
    }

    pub fn default_headers(&self) -> &BTreeMap<String, String> {
        &self.default_headers
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.root.is_cancelled() {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    /// Merge default and call-specific headers; call-specific values win
    fn build_headers(
        &self,
        call_headers: &BTreeMap<String, String>,
        has_body: bool,
        accept: &str,
    ) -> Result<HeaderMap, TransportError> {
        let mut headers = HeaderMap::new();

        for (name, value) in self.default_headers.iter().chain(call_headers.iter()) {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                TransportError::InvalidRequest(format!("Invalid header name '{}': {}", name, e))
            })?;
            let mut header_value = HeaderValue::from_str(value).map_err(|e| {
                TransportError::InvalidRequest(format!("Invalid value for header '{}': {}", name, e))
            })?;
            if header_name == reqwest::header::AUTHORIZATION {
                header_value.set_sensitive(true);
            }
            headers.insert(header_name, header_value);
        }

        if has_body && !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_MIME));
        }
        if !headers.contains_key(ACCEPT) {
            headers.insert(
                ACCEPT,
                HeaderValue::from_str(accept)
                    .map_err(|e| TransportError::InvalidRequest(e.to_string()))?,
            );
        }

        Ok(headers)
    }

    fn build_request(
        &self,
        method: HttpMethod,
        url: &str,
        headers: HeaderMap,
        body: Option<String>,
    ) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(to_reqwest_method(method), url)
            .headers(headers);
        match body {
            Some(body) => builder.body(body),
            None => builder,
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for HttpTransport {
    async fn request(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<ResponseBody, TransportError> {
        self.ensure_open()?;

        let format = options.response_format.unwrap_or(self.response_format);
        let timeout = options.timeout.unwrap_or(self.timeout);
        let accept = match format {
            ResponseFormat::Json => JSON_MIME,
            ResponseFormat::Text | ResponseFormat::Binary => "*/*",
        };

        let headers = self.build_headers(&options.headers, options.body.is_some(), accept)?;
        let body = options.body.map(|b| b.into_string()).transpose()?;

        debug!(method = %options.method, url, timeout_ms = timeout.as_millis() as u64, "Sending HTTP request");

        let pending = PendingRequest::new(&self.root, options.cancel, timeout);
        let builder = self.build_request(options.method, url, headers, body);

        let result = pending
            .run(async move {
                let response = builder.send().await.map_err(TransportError::network)?;
                let response = check_status(response).await?;
                decode_body(response, format).await
            })
            .await;

        if let Err(e) = &result {
            debug!(url, error = %e, "HTTP request failed");
        }
        result
    }

    async fn open_stream(
        &self,
        url: &str,
        options: StreamOptions,
    ) -> Result<EventStream, TransportError> {
        self.ensure_open()?;

        let method = options.method();
        let timeout = options.timeout.unwrap_or(self.timeout);
        let accept = format!("{}, {}", EVENT_STREAM_MIME, JSON_MIME);

        let mut headers = self.build_headers(&options.headers, options.body.is_some(), &accept)?;
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        let body = options.body.map(|b| b.into_string()).transpose()?;

        debug!(method = %method, url, idle_timeout_ms = timeout.as_millis() as u64, "Opening event stream");

        let pending = PendingRequest::new(&self.root, options.cancel, timeout);
        let builder = self.build_request(method, url, headers, body);

        let response = pending
            .run(async move {
                let response = builder.send().await.map_err(TransportError::network)?;
                check_status(response).await
            })
            .await?;

        if is_json_response(&response) {
            // Plain JSON reply: a single event
            let value = pending
                .run(async move {
                    match decode_body(response, ResponseFormat::Json).await? {
                        ResponseBody::Json(value) => Ok(value),
                        other => other.into_json(),
                    }
                })
                .await?;
            let stream: EventStream =
                Box::pin(futures::stream::once(async move { Ok(StreamEvent::Json(value)) }));
            return Ok(stream);
        }

        let url = url.to_string();
        let stream: EventStream = Box::pin(try_stream! {
            let mut pending = pending;
            // Idle time counts from the first read, not from when the stream was opened
            pending.reset_deadline();
            let mut bytes_stream = response.bytes_stream();
            let mut framer = SseFramer::new();

            while let Some(chunk) = pending.run(async { Ok(bytes_stream.next().await) }).await? {
                let chunk = chunk.map_err(TransportError::network)?;

                for event in framer.push(&chunk) {
                    yield event;
                    pending.reset_deadline();
                }
            }

            if framer.has_pending() {
                warn!(
                    url = %url,
                    discarded_bytes = framer.remainder().len(),
                    "Event stream ended with an incomplete event"
                );
            }
            debug!(url = %url, "Event stream finished");
        });

        Ok(stream)
    }

    fn close(&self) {
        if !self.root.is_cancelled() {
            debug!("Closing HTTP transport");
        }
        self.root.cancel();
    }

    fn is_closed(&self) -> bool {
        self.root.is_cancelled()
    }
}

fn to_reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}

fn is_json_response(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with(JSON_MIME))
}

/// Turn a non-2xx response into [`TransportError::Status`]
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(TransportError::Status {
        status: status.as_u16(),
        status_text: status.canonical_reason().unwrap_or_default().to_string(),
        body,
    })
}

async fn decode_body(
    response: reqwest::Response,
    format: ResponseFormat,
) -> Result<ResponseBody, TransportError> {
    match format {
        ResponseFormat::Json => {
            let bytes = response.bytes().await.map_err(TransportError::network)?;
            if bytes.is_empty() {
                return Ok(ResponseBody::Json(Value::Null));
            }
            serde_json::from_slice(&bytes)
                .map(ResponseBody::Json)
                .map_err(|e| TransportError::Decode(format!("Invalid JSON body: {}", e)))
        }
        ResponseFormat::Text => response
            .text()
            .await
            .map(ResponseBody::Text)
            .map_err(TransportError::network),
        ResponseFormat::Binary => response
            .bytes()
            .await
            .map(ResponseBody::Binary)
            .map_err(TransportError::network),
    }
}
