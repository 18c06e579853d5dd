//! Tool response normalization
//!
//! Servers reply to `tools/call` in one of two shapes:
//!
//! - **Enveloped**: an object carrying a `status` of `success`, `error` or
//!   `accepted` plus the matching payload field
//! - **Bare**: anything else, which is treated as the successful result
//!
//! Both are mapped onto [`ToolResponse`].

use crate::mcp::protocol::ToolResponse;
use serde_json::{Map, Value};

/// Reply shape detected for a raw tool result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    Enveloped,
    Bare,
}

/// Detect which convention `raw` follows
pub fn detect_shape(raw: &Value) -> ResponseShape {
    match raw.as_object().and_then(envelope) {
        Some(_) => ResponseShape::Enveloped,
        None => ResponseShape::Bare,
    }
}

/// Normalize a raw tool result
pub fn normalize(raw: Value) -> ToolResponse<Value> {
    if let Some(response) = raw.as_object().and_then(envelope) {
        return response;
    }
    ToolResponse::Success { result: raw }
}

fn envelope(object: &Map<String, Value>) -> Option<ToolResponse<Value>> {
    match object.get("status")?.as_str()? {
        "success" => Some(ToolResponse::Success {
            result: object.get("result").cloned().unwrap_or(Value::Null),
        }),
        "error" => Some(ToolResponse::Error {
            error: error_message(object.get("error")),
            details: object.get("details").cloned(),
        }),
        // Without a task id there is nothing to poll; not an envelope
        "accepted" => object
            .get("taskId")
            .and_then(Value::as_str)
            .map(|task_id| ToolResponse::Accepted {
                task_id: task_id.to_string(),
            }),
        _ => None,
    }
}

fn error_message(error: Option<&Value>) -> String {
    match error {
        Some(Value::String(message)) => message.clone(),
        Some(Value::Object(object)) => match object.get("message").and_then(Value::as_str) {
            Some(message) => message.to_string(),
            None => Value::Object(object.clone()).to_string(),
        },
        Some(Value::Null) | None => "Unknown error".to_string(),
        Some(other) => other.to_string(),
    }
}
