//! Harness Error Types
//!
//! Every failure surfaced by the harness falls into one of five flat
//! categories. Each category carries a stable machine-readable code, a human
//! message, optional structured details and an optional underlying cause.
//!
//! Classification happens once, where a raw transport or process failure is
//! first observed (see [`crate::mcp::classify`]). After that the typed error
//! is propagated unchanged.

use serde_json::Value;
use std::fmt;

/// Boxed error used as the optional cause of a [`HarnessError`]
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type alias for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Stable, machine-readable error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Connection,
    Authentication,
    ToolExecution,
    ServerStart,
    Timeout,
}

impl ErrorCode {
    /// Wire/string form of the code
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Connection => "CONNECTION_ERROR",
            ErrorCode::Authentication => "AUTHENTICATION_ERROR",
            ErrorCode::ToolExecution => "TOOL_EXECUTION_ERROR",
            ErrorCode::ServerStart => "SERVER_START_ERROR",
            ErrorCode::Timeout => "TIMEOUT_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error taxonomy for the harness
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// Transport-level failure not otherwise classified (includes "not found" lookups)
    #[error("{message}")]
    Connection {
        message: String,
        details: Option<Value>,
        #[source]
        cause: Option<BoxError>,
    },

    /// Credentials rejected by the server (401-equivalent)
    #[error("{message}")]
    Authentication {
        message: String,
        details: Option<Value>,
        #[source]
        cause: Option<BoxError>,
    },

    /// Server-side tool invocation failed
    #[error("{message}")]
    ToolExecution {
        message: String,
        details: Option<Value>,
        #[source]
        cause: Option<BoxError>,
    },

    /// Subprocess failed to spawn, exited prematurely or failed readiness
    #[error("{message}")]
    ServerStart {
        message: String,
        details: Option<Value>,
        #[source]
        cause: Option<BoxError>,
    },

    /// A bounded wait exceeded its budget
    #[error("{message}")]
    Timeout {
        message: String,
        details: Option<Value>,
        #[source]
        cause: Option<BoxError>,
    },
}

impl HarnessError {
    pub fn connection(message: impl Into<String>) -> Self {
        HarnessError::Connection {
            message: message.into(),
            details: None,
            cause: None,
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        HarnessError::Authentication {
            message: message.into(),
            details: None,
            cause: None,
        }
    }

    pub fn tool_execution(message: impl Into<String>) -> Self {
        HarnessError::ToolExecution {
            message: message.into(),
            details: None,
            cause: None,
        }
    }

    pub fn server_start(message: impl Into<String>) -> Self {
        HarnessError::ServerStart {
            message: message.into(),
            details: None,
            cause: None,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        HarnessError::Timeout {
            message: message.into(),
            details: None,
            cause: None,
        }
    }

    /// Attach structured details, replacing any previous details
    pub fn with_details(mut self, value: Value) -> Self {
        *self.parts_mut().0 = Some(value);
        self
    }

    /// Attach the underlying cause
    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: Into<BoxError>,
    {
        *self.parts_mut().1 = Some(cause.into());
        self
    }

    /// Machine-readable error code
    pub fn code(&self) -> ErrorCode {
        match self {
            HarnessError::Connection { .. } => ErrorCode::Connection,
            HarnessError::Authentication { .. } => ErrorCode::Authentication,
            HarnessError::ToolExecution { .. } => ErrorCode::ToolExecution,
            HarnessError::ServerStart { .. } => ErrorCode::ServerStart,
            HarnessError::Timeout { .. } => ErrorCode::Timeout,
        }
    }

    /// Human-readable message (without the cause chain)
    pub fn message(&self) -> &str {
        match self {
            HarnessError::Connection { message, .. }
            | HarnessError::Authentication { message, .. }
            | HarnessError::ToolExecution { message, .. }
            | HarnessError::ServerStart { message, .. }
            | HarnessError::Timeout { message, .. } => message,
        }
    }

    /// Structured details, if any
    pub fn details(&self) -> Option<&Value> {
        match self {
            HarnessError::Connection { details, .. }
            | HarnessError::Authentication { details, .. }
            | HarnessError::ToolExecution { details, .. }
            | HarnessError::ServerStart { details, .. }
            | HarnessError::Timeout { details, .. } => details.as_ref(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.code() == ErrorCode::Timeout
    }

    fn parts_mut(&mut self) -> (&mut Option<Value>, &mut Option<BoxError>) {
        match self {
            HarnessError::Connection { details, cause, .. }
            | HarnessError::Authentication { details, cause, .. }
            | HarnessError::ToolExecution { details, cause, .. }
            | HarnessError::ServerStart { details, cause, .. }
            | HarnessError::Timeout { details, cause, .. } => (details, cause),
        }
    }
}
