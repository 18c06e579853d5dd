//! MCP server process supervision
//!
//! [`McpServerManager`] runs the server under test as a child process;
//! [`readiness`] decides when it may receive traffic.

pub mod manager;
pub mod readiness;

pub use manager::{
    ErrorCallback, LifecycleCallback, McpServerManager, OutputSink, ServerManagerConfig,
    ServerState,
};
pub use readiness::{
    HealthEndpointReadiness, LivenessReadiness, ProcessExit, ProcessWatch, ReadinessStrategy,
};
