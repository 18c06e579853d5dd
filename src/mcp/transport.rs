//! MCP Transport Layer
//!
//! This module defines the transport abstraction the protocol client talks
//! through. A transport performs two kinds of calls:
//!
//! - **Unary requests**: method, headers, optional body, response format
//!   negotiation, bounded by a timeout.
//! - **Event streams**: a long-lived response body framed as server-sent
//!   events, bounded by an idle timeout that resets on every event.
//!
//! # Cancellation
//!
//! Every call owns a [`PendingRequest`] holding its own cancellation token,
//! derived from the transport's root token. The timer of one call can never
//! abort another, and closing the transport cancels all of them. Callers can
//! also pass a token of their own to cancel a call from the outside.

use crate::error::BoxError;
use crate::mcp::sse::StreamEvent;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Default request timeout when neither the call nor the transport sets one
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Lazily-read sequence of events from a streaming response
///
/// Single pass: once drained (or dropped) it cannot be restarted.
pub type EventStream = BoxStream<'static, Result<StreamEvent, TransportError>>;

/// Transport trait for MCP communication
///
/// Implemented by [`crate::mcp::HttpTransport`]; tests substitute in-memory
/// transports.
#[allow(async_fn_in_trait)]
pub trait Transport: Send + Sync {
    /// Perform a unary request
    async fn request(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<ResponseBody, TransportError>;

    /// Open an event stream
    ///
    /// Fails immediately when the server answers with a non-success status.
    async fn open_stream(
        &self,
        url: &str,
        options: StreamOptions,
    ) -> Result<EventStream, TransportError>;

    /// Cancel every in-flight call; idempotent
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// How to decode a successful response body
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    #[default]
    Json,
    Text,
    Binary,
}

impl std::str::FromStr for ResponseFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "text" => Ok(Self::Text),
            "binary" => Ok(Self::Binary),
            other => Err(format!(
                "Invalid response format: {}. Must be one of: json, text, binary",
                other
            )),
        }
    }
}

/// A decoded response body
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
    Binary(Bytes),
}

impl ResponseBody {
    /// Interpret the body as JSON, parsing text/binary bodies if needed
    pub fn into_json(self) -> Result<Value, TransportError> {
        match self {
            ResponseBody::Json(value) => Ok(value),
            ResponseBody::Text(text) => serde_json::from_str(&text)
                .map_err(|e| TransportError::Decode(format!("Response is not JSON: {}", e))),
            ResponseBody::Binary(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| TransportError::Decode(format!("Response is not JSON: {}", e))),
        }
    }

    /// Deserialize the body into a typed value
    pub fn deserialize<T: DeserializeOwned>(self) -> Result<T, TransportError> {
        let value = self.into_json()?;
        serde_json::from_value(value)
            .map_err(|e| TransportError::Decode(format!("Unexpected response shape: {}", e)))
    }
}

/// Request payload
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// Serialized to JSON before sending
    Json(Value),

    /// Sent verbatim
    Text(String),
}

impl RequestBody {
    pub fn into_string(self) -> Result<String, TransportError> {
        match self {
            RequestBody::Json(value) => serde_json::to_string(&value)
                .map_err(|e| TransportError::InvalidRequest(format!("Unserializable body: {}", e))),
            RequestBody::Text(text) => Ok(text),
        }
    }
}

/// HTTP method subset used by the harness
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options for a unary request
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub method: HttpMethod,

    /// Call-specific headers; override the transport defaults
    pub headers: BTreeMap<String, String>,

    pub body: Option<RequestBody>,

    /// Overrides the transport timeout
    pub timeout: Option<Duration>,

    /// Overrides the transport response format
    pub response_format: Option<ResponseFormat>,

    /// External cancellation for this call only
    pub cancel: Option<CancellationToken>,
}

impl RequestOptions {
    pub fn get() -> Self {
        Self::default()
    }

    /// POST with a JSON body
    pub fn post_json(body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            body: Some(RequestBody::Json(body)),
            ..Self::default()
        }
    }

    pub fn method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }

    pub fn cancel_with(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Options for an event stream
///
/// Streams are opened with GET unless a body is supplied, in which case
/// they are opened with POST.
#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    pub headers: BTreeMap<String, String>,

    pub body: Option<RequestBody>,

    /// Idle timeout: maximum silence between events
    pub timeout: Option<Duration>,

    pub cancel: Option<CancellationToken>,
}

impl StreamOptions {
    pub fn post_json(body: Value) -> Self {
        Self {
            body: Some(RequestBody::Json(body)),
            ..Self::default()
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cancel_with(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn method(&self) -> HttpMethod {
        if self.body.is_some() {
            HttpMethod::Post
        } else {
            HttpMethod::Get
        }
    }
}

/// Why an in-flight call was aborted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The call's timer fired
    Timeout(Duration),

    /// The call was cancelled by its caller or by `close()`
    Cancelled,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Timeout(after) => write!(f, "timed out after {}ms", after.as_millis()),
            AbortReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Structured transport failure
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The server answered with a non-success status
    #[error("HTTP {status} {status_text}")]
    Status {
        status: u16,
        status_text: String,
        body: String,
    },

    /// The call was aborted before it settled
    #[error("Request aborted: {0}")]
    Aborted(AbortReason),

    /// Connection-level failure (DNS, refused, reset, ...)
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The body could not be decoded in the negotiated format
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// The request could not be built
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The transport was closed
    #[error("Transport is closed")]
    Closed,
}

impl TransportError {
    pub fn network<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        TransportError::Network {
            message: error.to_string(),
            source: Some(Box::new(error)),
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn abort_reason(&self) -> Option<AbortReason> {
        match self {
            TransportError::Aborted(reason) => Some(*reason),
            _ => None,
        }
    }
}

/// One in-flight request or stream
///
/// Owns the cancellation token of the call and its timeout deadline. The
/// token is cancelled when the call settles, on every exit path, because
/// dropping the `PendingRequest` cancels it.
#[derive(Debug)]
pub struct PendingRequest {
    token: CancellationToken,
    external: Option<CancellationToken>,
    timeout: Duration,
    deadline: Instant,
}

impl PendingRequest {
    /// Register a call under `root`, optionally linked to a caller token
    pub fn new(
        root: &CancellationToken,
        external: Option<CancellationToken>,
        timeout: Duration,
    ) -> Self {
        Self {
            token: root.child_token(),
            external,
            timeout,
            deadline: Instant::now() + timeout,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Push the deadline out by a full timeout from now
    pub fn reset_deadline(&mut self) {
        self.deadline = Instant::now() + self.timeout;
    }

    /// Drive `operation` until it settles, the deadline passes or the call
    /// is cancelled
    ///
    /// Cancellation is checked first. An operation that is already ready
    /// wins over an expired deadline.
    pub async fn run<F, T>(&self, operation: F) -> Result<T, TransportError>
    where
        F: Future<Output = Result<T, TransportError>>,
    {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(TransportError::Aborted(AbortReason::Cancelled)),
            _ = cancelled(self.external.as_ref()) => {
                self.token.cancel();
                Err(TransportError::Aborted(AbortReason::Cancelled))
            }
            result = operation => result,
            _ = tokio::time::sleep_until(self.deadline) => {
                self.token.cancel();
                Err(TransportError::Aborted(AbortReason::Timeout(self.timeout)))
            }
        }
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}
