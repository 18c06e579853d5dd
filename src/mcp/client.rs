//! MCP Test Client
//!
//! High-level protocol client used by tests to drive an MCP server over HTTP.
//!
//! # Architecture
//!
//! The client is generic over the transport layer ([`Transport`]). It speaks
//! JSON-RPC 2.0 to a single endpoint and exposes the operations a test needs:
//!
//! - `call_tool`: invoke a tool and normalize the reply into [`ToolResponse`]
//!   (`call_tool_with_cancel` adds a caller-held cancellation token)
//! - `call_tool_with_stream`: invoke a tool and read its event stream
//! - `get_resources` / `get_resource`: list or look up resources
//! - `get_schema`: introspect tools and resource types
//!
//! Every failure is classified exactly once, where it is observed (see
//! [`crate::mcp::classify`]).
//!
//! # Usage
//!
//! ```ignore
//! use mcp_harness::mcp::McpTestClient;
//!
//! let client = McpTestClient::new("http://127.0.0.1:3000/mcp")
//!     .with_auth_token("secret");
//!
//! let response = client.call_tool::<Value>("echo", json!({"text": "hi"})).await?;
//! assert!(response.is_success());
//! ```

use crate::config::ClientConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::mcp::classify::{classify, CallFailure, Fallback};
use crate::mcp::http_transport::HttpTransport;
use crate::mcp::normalize::normalize;
use crate::mcp::protocol::{
    McpMethod, McpRequest, McpResponse, Resource, ResourceSchema, Schema, ToolCallParams,
    ToolResponse, ToolSchema,
};
use crate::mcp::sse::StreamEvent;
use crate::mcp::transport::{
    RequestOptions, ResponseFormat, StreamOptions, Transport, TransportError, DEFAULT_TIMEOUT,
};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Stream of raw event payloads from a streaming tool call
pub type ToolEventStream = BoxStream<'static, HarnessResult<Value>>;

/// MCP test client
///
/// # Type Parameters
///
/// * `T` - The transport type (defaults to [`HttpTransport`])
///
/// Calls take `&self`, so independent calls may run concurrently; each one
/// owns its own timeout and cancellation.
pub struct McpTestClient<T = HttpTransport>
where
    T: Transport,
{
    /// JSON-RPC endpoint
    base_url: String,

    auth_token: Option<String>,

    /// Custom headers sent with every call
    headers: BTreeMap<String, String>,

    timeout: Duration,

    response_format: ResponseFormat,

    transport: T,

    /// Next request ID (monotonically increasing)
    next_id: AtomicU64,
}

impl McpTestClient<HttpTransport> {
    /// Create a client for `base_url` with default settings
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut client = Self::with_transport(base_url, HttpTransport::new());
        client.rebuild_transport();
        client
    }

    /// Create a client from the `[client]` configuration section
    pub fn from_config(config: &ClientConfig) -> Self {
        let mut client = Self::with_transport(config.base_url.clone(), HttpTransport::new());
        client.auth_token = config.auth_token.clone();
        client.headers = config.headers.clone();
        client.timeout = Duration::from_millis(config.timeout_ms);
        client.response_format = config.response_format;
        client.rebuild_transport();
        client
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self.rebuild_transport();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self.rebuild_transport();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.rebuild_transport();
        self
    }

    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = format;
        self.rebuild_transport();
        self
    }

    /// Replace the auth token (or clear it with `None`)
    ///
    /// The transport is rebuilt with the new headers. Streams opened before
    /// the change keep running on the previous transport.
    pub fn set_auth_token(&mut self, token: Option<String>) {
        debug!(authenticated = token.is_some(), "Updating auth token");
        self.auth_token = token;
        self.rebuild_transport();
    }

    fn rebuild_transport(&mut self) {
        let mut transport = HttpTransport::new()
            .with_timeout(self.timeout)
            .with_response_format(self.response_format)
            .with_headers(&self.headers);
        if let Some(token) = &self.auth_token {
            transport = transport.with_bearer_token(token);
        }
        if self.transport.is_closed() {
            transport.close();
        }
        self.transport = transport;
    }
}

impl<T> McpTestClient<T>
where
    T: Transport,
{
    /// Create a client over an existing transport
    ///
    /// Header and timeout settings are the transport's responsibility.
    pub fn with_transport(base_url: impl Into<String>, transport: T) -> Self {
        Self {
            base_url: base_url.into(),
            auth_token: None,
            headers: BTreeMap::new(),
            timeout: DEFAULT_TIMEOUT,
            response_format: ResponseFormat::default(),
            transport,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The underlying transport, for raw requests
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Call a tool and normalize its reply
    ///
    /// Both enveloped (`{"status": ..}`) and bare replies are accepted. A
    /// success payload is decoded into `R`.
    ///
    /// # Errors
    ///
    /// - [`HarnessError::Timeout`] if the call timed out or was aborted
    /// - [`HarnessError::Authentication`] if the server rejected the credentials
    /// - [`HarnessError::ToolExecution`] for any other failure, with the tool
    ///   name and params in the details
    pub async fn call_tool<R>(&self, name: &str, params: Value) -> HarnessResult<ToolResponse<R>>
    where
        R: DeserializeOwned,
    {
        self.invoke_tool(name, params, None).await
    }

    /// [`Self::call_tool`], abortable through `cancel`
    ///
    /// Cancelling the token aborts this call only and surfaces as
    /// [`HarnessError::Timeout`]; other calls on the client are unaffected.
    pub async fn call_tool_with_cancel<R>(
        &self,
        name: &str,
        params: Value,
        cancel: CancellationToken,
    ) -> HarnessResult<ToolResponse<R>>
    where
        R: DeserializeOwned,
    {
        self.invoke_tool(name, params, Some(cancel)).await
    }

    async fn invoke_tool<R>(
        &self,
        name: &str,
        params: Value,
        cancel: Option<CancellationToken>,
    ) -> HarnessResult<ToolResponse<R>>
    where
        R: DeserializeOwned,
    {
        debug!(tool = name, "Calling tool");

        let request_params = tool_call_params(name, &params)?;
        let raw = self
            .rpc(McpMethod::ToolsCall, Some(request_params), cancel)
            .await
            .map_err(|failure| classify(failure, Fallback::tool(name, params.clone())))?;

        match normalize(raw) {
            ToolResponse::Success { result } => serde_json::from_value::<R>(result)
                .map(|result| ToolResponse::Success { result })
                .map_err(|e| {
                    HarnessError::tool_execution(format!(
                        "Tool '{}' returned an unexpected result: {}",
                        name, e
                    ))
                    .with_details(json!({"tool": name, "params": params}))
                    .with_cause(e)
                }),
            ToolResponse::Error { error, details } => {
                debug!(tool = name, error = %error, "Tool reported an error");
                Ok(ToolResponse::Error { error, details })
            }
            ToolResponse::Accepted { task_id } => {
                debug!(tool = name, task_id = %task_id, "Tool accepted the call");
                Ok(ToolResponse::Accepted { task_id })
            }
        }
    }

    /// Call a tool and stream its events
    ///
    /// The call is posted with event-stream acceptance. Each event payload is
    /// yielded as it arrives; JSON payloads as parsed values, anything else as
    /// a JSON string. Errors while reading the stream are classified the same
    /// way as [`Self::call_tool`] errors.
    pub async fn call_tool_with_stream(
        &self,
        name: &str,
        params: Value,
    ) -> HarnessResult<ToolEventStream> {
        debug!(tool = name, "Calling tool with streaming");

        let request_params = tool_call_params(name, &params)?;
        let request = McpRequest::new(
            self.next_request_id(),
            McpMethod::ToolsCall.as_str(),
            Some(request_params),
        );
        let body = serde_json::to_value(&request).map_err(|e| {
            HarnessError::tool_execution(format!("Failed to encode tool call: {}", e))
        })?;

        let events = self
            .transport
            .open_stream(&self.base_url, StreamOptions::post_json(body))
            .await
            .map_err(|failure| classify(failure, Fallback::tool(name, params.clone())))?;

        let tool = name.to_string();
        let stream = events.map(move |event| {
            event
                .map(StreamEvent::into_value)
                .map_err(|failure| classify(failure, Fallback::tool(tool.clone(), params.clone())))
        });
        Ok(stream.boxed())
    }

    /// List all resources
    pub async fn get_resources(&self) -> HarnessResult<Vec<Resource>> {
        let raw = self
            .rpc(McpMethod::ResourcesList, None, None)
            .await
            .map_err(|failure| classify(failure, Fallback::connection("List resources")))?;
        parse_resources(raw)
    }

    /// Look up one resource by id
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Connection`] with `Resource not found: <id>`
    /// when no listed resource has the id.
    pub async fn get_resource(&self, id: &str) -> HarnessResult<Resource> {
        self.get_resources()
            .await?
            .into_iter()
            .find(|resource| resource.id == id)
            .ok_or_else(|| {
                HarnessError::connection(format!("Resource not found: {}", id))
                    .with_details(json!({"id": id}))
            })
    }

    /// Introspect tools and resource types
    ///
    /// Tools and resources are listed concurrently; the first failure wins.
    pub async fn get_schema(&self) -> HarnessResult<Schema> {
        let (tools, resources) = tokio::try_join!(
            async {
                self.rpc(McpMethod::ToolsList, None, None)
                    .await
                    .map_err(|failure| classify(failure, Fallback::connection("List tools")))
            },
            async {
                let raw = self
                    .rpc(McpMethod::ResourcesList, None, None)
                    .await
                    .map_err(|failure| classify(failure, Fallback::connection("List resources")))?;
                parse_resources(raw)
            },
        )?;

        Ok(Schema {
            tools: tool_schemas(&tools)?,
            resources: resource_schemas(&resources),
        })
    }

    /// Abort in-flight calls and reject later ones; idempotent
    pub fn close(&self) {
        self.transport.close();
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Send one JSON-RPC request and return its `result`
    async fn rpc(
        &self,
        method: McpMethod,
        params: Option<Value>,
        cancel: Option<CancellationToken>,
    ) -> Result<Value, CallFailure> {
        let id = self.next_request_id();
        let request = McpRequest::new(id, method.as_str(), params);
        let body = serde_json::to_value(&request)
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;

        debug!(id, method = method.as_str(), url = %self.base_url, "Sending JSON-RPC request");

        let mut options = RequestOptions::post_json(body).response_format(ResponseFormat::Json);
        if let Some(cancel) = cancel {
            options = options.cancel_with(cancel);
        }

        let response: McpResponse = self
            .transport
            .request(&self.base_url, options)
            .await?
            .deserialize()?;

        if let Some(response_id) = response.id {
            if response_id != id {
                warn!(
                    expected = id,
                    received = response_id,
                    "Response ID does not match request ID"
                );
            }
        }

        Ok(response.into_result()?)
    }
}

fn tool_call_params(name: &str, params: &Value) -> HarnessResult<Value> {
    let call = ToolCallParams {
        name: name.to_string(),
        arguments: params.clone(),
    };
    serde_json::to_value(&call).map_err(|e| {
        HarnessError::tool_execution(format!("Failed to encode arguments for '{}': {}", name, e))
    })
}

/// Accept `{"resources": [..]}`, a bare array, or `null`
fn parse_resources(raw: Value) -> HarnessResult<Vec<Resource>> {
    let list = match raw {
        Value::Null => return Ok(Vec::new()),
        Value::Array(_) => raw,
        Value::Object(mut object) => object.remove("resources").ok_or_else(|| {
            HarnessError::connection("Invalid resources payload: missing 'resources'")
        })?,
        other => {
            return Err(HarnessError::connection(format!(
                "Invalid resources payload: expected a list, got {}",
                other
            )))
        }
    };

    serde_json::from_value(list).map_err(|e| {
        HarnessError::connection(format!("Invalid resources payload: {}", e)).with_cause(e)
    })
}

/// Map a `tools/list` result onto tool schemas
///
/// `parameters`/`inputSchema` and `returns`/`outputSchema` are both accepted.
/// Duplicate names keep the first occurrence.
fn tool_schemas(raw: &Value) -> HarnessResult<Vec<ToolSchema>> {
    let entries = match raw {
        Value::Array(entries) => entries,
        Value::Object(object) => match object.get("tools") {
            Some(Value::Array(entries)) => entries,
            Some(_) | None => {
                return Err(HarnessError::connection(
                    "Invalid tools payload: missing 'tools' list",
                ))
            }
        },
        Value::Null => return Ok(Vec::new()),
        other => {
            return Err(HarnessError::connection(format!(
                "Invalid tools payload: expected a list, got {}",
                other
            )))
        }
    };

    let mut schemas: Vec<ToolSchema> = Vec::with_capacity(entries.len());
    for entry in entries {
        let Some(name) = entry.get("name").and_then(Value::as_str) else {
            warn!(entry = %entry, "Skipping tool without a name");
            continue;
        };
        if schemas.iter().any(|schema| schema.name == name) {
            debug!(tool = name, "Ignoring duplicate tool definition");
            continue;
        }

        schemas.push(ToolSchema {
            name: name.to_string(),
            description: entry
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
            parameters: entry
                .get("parameters")
                .or_else(|| entry.get("inputSchema"))
                .cloned()
                .unwrap_or_else(|| json!({"type": "object"})),
            returns: entry
                .get("returns")
                .or_else(|| entry.get("outputSchema"))
                .cloned(),
        });
    }
    Ok(schemas)
}

/// One schema per distinct resource type, with properties inferred from
/// metadata values. The first value seen for a property decides its type.
fn resource_schemas(resources: &[Resource]) -> Vec<ResourceSchema> {
    let mut schemas: Vec<ResourceSchema> = Vec::new();

    for resource in resources {
        let index = match schemas
            .iter()
            .position(|schema| schema.resource_type == resource.resource_type)
        {
            Some(index) => index,
            None => {
                schemas.push(ResourceSchema {
                    resource_type: resource.resource_type.clone(),
                    description: None,
                    properties: Value::Object(Map::new()),
                });
                schemas.len() - 1
            }
        };

        let (Some(metadata), Some(properties)) = (
            resource.metadata.as_ref(),
            schemas[index].properties.as_object_mut(),
        ) else {
            continue;
        };
        for (key, value) in metadata {
            properties
                .entry(key.clone())
                .or_insert_with(|| json!({"type": json_type(value)}));
        }
    }

    schemas
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
