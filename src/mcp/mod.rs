//! MCP (Model Context Protocol) Client Side
//!
//! Everything needed to talk to an MCP server under test.
//!
//! # Architecture
//!
//! The implementation is organized into layers:
//!
//! 1. **Protocol Layer** (`protocol`): JSON-RPC 2.0 messages and the domain
//!    types servers return (tool responses, resources, schemas)
//! 2. **Transport Layer** (`transport`, `http_transport`, `sse`): unary HTTP
//!    requests and server-sent event streams with per-call cancellation
//! 3. **Client Layer** (`client`): the test-facing API, with failure
//!    classification (`classify`) and reply normalization (`normalize`)

// Protocol layer: JSON-RPC 2.0 message types
pub mod protocol;

// Transport layer: trait, per-call options and errors
pub mod transport;

// HTTP transport for MCP servers
pub mod http_transport;

// Event-stream framing
pub mod sse;

// Failure classification
pub mod classify;

// Tool reply normalization
pub mod normalize;

// Client layer: High-level MCP test client
pub mod client;

// Re-export commonly used types for convenience
pub use protocol::{
    McpError, McpMethod, McpRequest, McpResponse, Resource, ResourceSchema, Schema,
    ToolCallParams, ToolResponse, ToolSchema,
};

// Re-export transport types
pub use http_transport::HttpTransport;
pub use sse::{SseFramer, StreamEvent};
pub use transport::{
    AbortReason, EventStream, HttpMethod, RequestBody, RequestOptions, ResponseBody,
    ResponseFormat, StreamOptions, Transport, TransportError,
};

// Re-export client types
pub use client::{McpTestClient, ToolEventStream};
