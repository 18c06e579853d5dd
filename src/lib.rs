//! MCP Harness Library
//!
//! Test harness for MCP servers: supervises a server process, talks to it
//! over HTTP (unary and SSE streaming) and provides async helpers for
//! writing integration tests against it.

pub mod config;
pub mod error;
pub mod logging;
pub mod mcp;
pub mod server;
pub mod testing;

pub use error::{ErrorCode, HarnessError, HarnessResult};
pub use mcp::{HttpTransport, McpTestClient};
pub use server::{McpServerManager, ServerManagerConfig, ServerState};
