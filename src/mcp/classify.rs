//! Failure classification
//!
//! Maps a raw call failure onto the harness error taxonomy. The cascade is
//! fixed and applied once, where the failure is first observed:
//!
//! 1. timeout: the call was aborted, the HTTP client reported a timeout, or
//!    a JSON-RPC error message mentions one
//! 2. authentication: HTTP 401, JSON-RPC `-32001`, or a JSON-RPC error
//!    message mentioning `401` / `unauthorized`
//! 3. the operation-specific fallback: tool execution for tool calls,
//!    connection for everything else
//!
//! Transport failures are decided by their variant alone. Message text is
//! only searched for JSON-RPC errors, whose codes servers use loosely.

use crate::error::HarnessError;
use crate::mcp::protocol::{McpError, UNAUTHORIZED_CODE};
use crate::mcp::transport::{AbortReason, TransportError};
use serde_json::{json, Map, Value};

/// A failed protocol call, before classification
#[derive(Debug, thiserror::Error)]
pub enum CallFailure {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server answered with a JSON-RPC error object
    #[error(transparent)]
    Rpc(#[from] McpError),
}

impl CallFailure {
    fn is_timeout(&self) -> bool {
        match self {
            CallFailure::Transport(TransportError::Aborted(_)) => true,
            CallFailure::Transport(TransportError::Network { source, .. }) => source
                .as_deref()
                .and_then(|e| e.downcast_ref::<reqwest::Error>())
                .is_some_and(reqwest::Error::is_timeout),
            CallFailure::Transport(_) => false,
            CallFailure::Rpc(error) => {
                let message = error.message.to_lowercase();
                message.contains("timeout") || message.contains("timed out")
            }
        }
    }

    fn is_unauthorized(&self) -> bool {
        match self {
            CallFailure::Transport(TransportError::Status { status, .. }) => *status == 401,
            CallFailure::Transport(_) => false,
            CallFailure::Rpc(error) => {
                let message = error.message.to_lowercase();
                error.code == UNAUTHORIZED_CODE
                    || message.contains("401")
                    || message.contains("unauthorized")
            }
        }
    }

    /// Structured facts worth keeping on the classified error
    fn facts(&self) -> Map<String, Value> {
        let mut facts = Map::new();
        match self {
            CallFailure::Transport(TransportError::Status { status, body, .. }) => {
                facts.insert("status".to_string(), json!(status));
                if !body.is_empty() {
                    facts.insert("body".to_string(), json!(body));
                }
            }
            CallFailure::Transport(TransportError::Aborted(AbortReason::Timeout(after))) => {
                facts.insert("timeout".to_string(), json!(after.as_millis() as u64));
            }
            CallFailure::Rpc(error) => {
                facts.insert("code".to_string(), json!(error.code));
                if let Some(data) = &error.data {
                    facts.insert("data".to_string(), data.clone());
                }
            }
            _ => {}
        }
        facts
    }
}

/// What a failure becomes when it is neither a timeout nor an auth failure
#[derive(Debug, Clone)]
pub enum Fallback {
    /// A `tools/call`; carries the tool name and parameters for diagnostics
    ToolExecution { tool: String, params: Value },

    /// Any other operation, described by a short context string
    Connection { context: String },
}

impl Fallback {
    pub fn tool(tool: impl Into<String>, params: Value) -> Self {
        Fallback::ToolExecution {
            tool: tool.into(),
            params,
        }
    }

    pub fn connection(context: impl Into<String>) -> Self {
        Fallback::Connection {
            context: context.into(),
        }
    }

    fn context(&self) -> String {
        match self {
            Fallback::ToolExecution { tool, .. } => format!("Tool '{}'", tool),
            Fallback::Connection { context } => context.clone(),
        }
    }
}

/// Classify `failure` into exactly one harness error
pub fn classify(failure: impl Into<CallFailure>, fallback: Fallback) -> HarnessError {
    let failure = failure.into();
    let context = fallback.context();
    let mut details = failure.facts();

    let error = if failure.is_timeout() {
        HarnessError::timeout(format!("{} timed out: {}", context, failure))
    } else if failure.is_unauthorized() {
        HarnessError::authentication(format!("{} was rejected as unauthorized: {}", context, failure))
    } else {
        match &fallback {
            Fallback::ToolExecution { tool, params } => {
                details.insert("tool".to_string(), json!(tool));
                details.insert("params".to_string(), params.clone());
                HarnessError::tool_execution(format!("{} failed: {}", context, failure))
            }
            Fallback::Connection { .. } => {
                HarnessError::connection(format!("{} failed: {}", context, failure))
            }
        }
    };

    let error = if details.is_empty() {
        error
    } else {
        error.with_details(Value::Object(details))
    };
    error.with_cause(failure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use std::time::Duration;

    fn status(code: u16, text: &str) -> TransportError {
        TransportError::Status {
            status: code,
            status_text: text.to_string(),
            body: String::new(),
        }
    }

    fn network(message: &str) -> TransportError {
        TransportError::Network {
            message: message.to_string(),
            source: None,
        }
    }

    #[test]
    fn test_abort_is_timeout() {
        let err = classify(
            TransportError::Aborted(AbortReason::Timeout(Duration::from_millis(50))),
            Fallback::tool("echo", json!({})),
        );
        assert_eq!(err.code(), ErrorCode::Timeout);
        assert_eq!(err.details().unwrap()["timeout"], 50);

        let err = classify(
            TransportError::Aborted(AbortReason::Cancelled),
            Fallback::connection("List resources"),
        );
        assert_eq!(err.code(), ErrorCode::Timeout);
    }

    #[test]
    fn test_timeout_message_is_timeout() {
        let err = classify(
            McpError::internal_error("upstream operation timed out"),
            Fallback::connection("List resources"),
        );
        assert_eq!(err.code(), ErrorCode::Timeout);
    }

    #[test]
    fn test_network_message_text_is_not_searched() {
        for message in [
            "error sending request for url (http://127.0.0.1:40100/mcp)",
            "error sending request for url (http://127.0.0.1:9/timeout-suite/mcp)",
            "error sending request for url (http://127.0.0.1:9/unauthorized/abort)",
        ] {
            let err = classify(network(message), Fallback::connection("List resources"));
            assert_eq!(err.code(), ErrorCode::Connection, "{}", message);
        }
    }

    #[test]
    fn test_non_401_status_ignores_body_text() {
        let err = classify(
            TransportError::Status {
                status: 500,
                status_text: "Internal Server Error".to_string(),
                body: "unauthorized: request timed out".to_string(),
            },
            Fallback::tool("echo", json!({})),
        );
        assert_eq!(err.code(), ErrorCode::ToolExecution);
    }

    #[test]
    fn test_closed_and_decode_use_fallback() {
        let err = classify(TransportError::Closed, Fallback::connection("Fetch schema"));
        assert_eq!(err.code(), ErrorCode::Connection);

        let err = classify(
            TransportError::Decode("timeout field missing".to_string()),
            Fallback::tool("echo", json!({})),
        );
        assert_eq!(err.code(), ErrorCode::ToolExecution);
    }

    #[test]
    fn test_401_status_is_authentication() {
        let err = classify(status(401, "Unauthorized"), Fallback::tool("echo", json!({})));
        assert_eq!(err.code(), ErrorCode::Authentication);
        assert_eq!(err.details().unwrap()["status"], 401);
    }

    #[test]
    fn test_unauthorized_rpc_code_is_authentication() {
        let err = classify(
            McpError::unauthorized("bad token"),
            Fallback::connection("Fetch schema"),
        );
        assert_eq!(err.code(), ErrorCode::Authentication);
    }

    #[test]
    fn test_unauthorized_message_is_authentication() {
        let err = classify(
            McpError::new(-32000, "Unauthorized access"),
            Fallback::tool("echo", json!({})),
        );
        assert_eq!(err.code(), ErrorCode::Authentication);
    }

    #[test]
    fn test_timeout_takes_priority_over_auth() {
        let err = classify(
            McpError::unauthorized("token check timed out"),
            Fallback::tool("echo", json!({})),
        );
        assert_eq!(err.code(), ErrorCode::Timeout);
    }

    #[test]
    fn test_tool_fallback_carries_tool_and_params() {
        let err = classify(
            McpError::internal_error("boom"),
            Fallback::tool("search", json!({"q": "rust"})),
        );
        assert_eq!(err.code(), ErrorCode::ToolExecution);
        let details = err.details().unwrap();
        assert_eq!(details["tool"], "search");
        assert_eq!(details["params"], json!({"q": "rust"}));
        assert_eq!(details["code"], -32603);
        assert!(err.message().contains("boom"));
    }

    #[test]
    fn test_connection_fallback() {
        let err = classify(status(500, "Internal Server Error"), Fallback::connection("List resources"));
        assert_eq!(err.code(), ErrorCode::Connection);
        assert!(err.message().starts_with("List resources failed"));
    }

    #[test]
    fn test_cause_is_preserved() {
        use std::error::Error;

        let err = classify(status(503, "Service Unavailable"), Fallback::connection("Fetch schema"));
        let cause = err.source().unwrap();
        let failure = cause.downcast_ref::<CallFailure>().unwrap();
        assert!(matches!(
            failure,
            CallFailure::Transport(TransportError::Status { status: 503, .. })
        ));
    }
}
