//! MCP Protocol Types (JSON-RPC 2.0)
//!
//! This module defines the wire envelope used to talk to the server under test
//! and the data model the harness hands back to test code.
//!
//! # Protocol Specification
//!
//! - JSON-RPC 2.0: <https://www.jsonrpc.org/specification>
//! - MCP Spec: <https://modelcontextprotocol.io/specification/2025-03-26>
//!
//! The protocol layer is responsible only for serialization/deserialization.
//! Transport concerns live in [`crate::mcp::transport`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// JSON-RPC 2.0 version constant
pub const JSONRPC_VERSION: &str = "2.0";

/// A JSON-RPC 2.0 request message
///
/// # Example
///
/// ```json
/// {
///   "jsonrpc": "2.0",
///   "id": 1,
///   "method": "tools/call",
///   "params": {"name": "echo", "arguments": {"text": "hi"}}
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct McpRequest {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,

    /// Request identifier (used to match responses)
    pub id: u64,

    /// Method name to invoke
    pub method: String,

    /// Method parameters (optional, depends on method)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl McpRequest {
    /// Create a new MCP request
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 response message
///
/// A response either contains a `result` or an `error`, but never both.
/// Servers answer parse failures with a `null` id, hence the `Option`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct McpResponse {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,

    /// Request identifier (must match the request's ID)
    #[serde(default)]
    pub id: Option<u64>,

    /// Result payload (present on success)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error information (present on failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<McpError>,
}

impl McpResponse {
    /// Create a successful response
    pub fn ok(id: u64, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn err(id: u64, error: McpError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            result: None,
            error: Some(error),
        }
    }

    /// Check if the response is successful
    pub fn is_success(&self) -> bool {
        self.result.is_some() && self.error.is_none()
    }

    /// Get the result, or the error if unsuccessful
    ///
    /// A response with neither field is treated as a `null` result, which
    /// is what notification-style tools return.
    pub fn into_result(self) -> Result<Value, McpError> {
        match (self.result, self.error) {
            (Some(result), None) => Ok(result),
            (None, Some(error)) => Err(error),
            (None, None) => Ok(Value::Null),
            (Some(_), Some(_)) => Err(McpError::internal_error(
                "Invalid response: both result and error present",
            )),
        }
    }
}

/// A JSON-RPC 2.0 error object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct McpError {
    /// Error code (JSON-RPC defined or MCP-specific)
    pub code: i32,

    /// Human-readable error message
    pub message: String,

    /// Additional error data (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl McpError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Method not found (-32601)
    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::new(-32601, format!("Method not found: {}", method.into()))
    }

    /// Invalid params (-32602)
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(-32602, message)
    }

    /// Internal error (-32603)
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(-32603, message)
    }

    /// Unauthorized (-32001), used by HTTP MCP servers that reject credentials
    /// inside a 200 response
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(UNAUTHORIZED_CODE, message)
    }
}

/// JSON-RPC error code servers use for rejected credentials
pub const UNAUTHORIZED_CODE: i32 = -32001;

impl std::fmt::Display for McpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[Error {}] {}", self.code, self.message)
    }
}

impl std::error::Error for McpError {}

/// MCP methods used by the harness
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum McpMethod {
    /// List available tools
    ToolsList,

    /// Call a specific tool
    ToolsCall,

    /// List available resources
    ResourcesList,

    /// Custom method (for extensibility)
    Custom(String),
}

impl McpMethod {
    /// Convert to string for JSON-RPC method field
    pub fn as_str(&self) -> &str {
        match self {
            Self::ToolsList => "tools/list",
            Self::ToolsCall => "tools/call",
            Self::ResourcesList => "resources/list",
            Self::Custom(s) => s.as_str(),
        }
    }
}

impl From<&str> for McpMethod {
    fn from(s: &str) -> Self {
        match s {
            "tools/list" => Self::ToolsList,
            "tools/call" => Self::ToolsCall,
            "resources/list" => Self::ResourcesList,
            other => Self::Custom(other.to_string()),
        }
    }
}

/// Tool call parameters (`{name, arguments}`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCallParams {
    /// Name of the tool to call
    pub name: String,

    /// Tool arguments
    pub arguments: Value,
}

/// Outcome of a tool call
///
/// Serialized with a `status` tag so the wire form is exactly the envelope
/// servers use: `{"status":"success","result":..}`,
/// `{"status":"error","error":"..","details":..}` or
/// `{"status":"accepted","taskId":".."}`. Exactly one payload per status is
/// representable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ToolResponse<T> {
    /// The tool completed and produced a result
    Success { result: T },

    /// The tool reported a failure
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
    },

    /// The tool accepted the work; poll for completion with the task id
    Accepted {
        #[serde(rename = "taskId")]
        task_id: String,
    },
}

impl<T> ToolResponse<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, ToolResponse::Success { .. })
    }

    pub fn result(&self) -> Option<&T> {
        match self {
            ToolResponse::Success { result } => Some(result),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ToolResponse::Error { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn task_id(&self) -> Option<&str> {
        match self {
            ToolResponse::Accepted { task_id } => Some(task_id),
            _ => None,
        }
    }

    /// Status tag as it appears on the wire
    pub fn status(&self) -> &'static str {
        match self {
            ToolResponse::Success { .. } => "success",
            ToolResponse::Error { .. } => "error",
            ToolResponse::Accepted { .. } => "accepted",
        }
    }

    /// Map the success payload, leaving error/accepted untouched
    pub fn map<U, F>(self, f: F) -> ToolResponse<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            ToolResponse::Success { result } => ToolResponse::Success { result: f(result) },
            ToolResponse::Error { error, details } => ToolResponse::Error { error, details },
            ToolResponse::Accepted { task_id } => ToolResponse::Accepted { task_id },
        }
    }
}

/// A server-managed addressable object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Resource {
    /// Stable identifier
    pub id: String,

    /// Resource type (stable across calls)
    #[serde(rename = "type")]
    pub resource_type: String,

    /// Display name
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Open-ended metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

/// Introspected server schema
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Schema {
    /// Tool schemas, unique by `name`
    pub tools: Vec<ToolSchema>,

    /// Resource schemas, unique by `type`
    pub resources: Vec<ResourceSchema>,
}

impl Schema {
    pub fn tool(&self, name: &str) -> Option<&ToolSchema> {
        self.tools.iter().find(|tool| tool.name == name)
    }

    pub fn resource_type(&self, resource_type: &str) -> Option<&ResourceSchema> {
        self.resources
            .iter()
            .find(|resource| resource.resource_type == resource_type)
    }
}

/// Schema of a single tool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSchema {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Input parameters (JSON Schema)
    pub parameters: Value,

    /// Return value (JSON Schema)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<Value>,
}

/// Schema of a resource type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceSchema {
    #[serde(rename = "type")]
    pub resource_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Property schemas keyed by property name
    pub properties: Value,
}
