//! Test fixtures
//!
//! Canned resources, schemas and tool response envelopes, plus shallow
//! object merging for building variations of them.

use crate::mcp::protocol::{Resource, ResourceSchema, Schema, ToolSchema};
use serde_json::{json, Map, Value};

/// Merge `overrides` over `base`, one level deep
///
/// Keys present in `overrides` replace those in `base` wholesale (nested
/// objects are not merged); other keys of `base` are kept. When either side
/// is not an object, `overrides` is returned.
pub fn create_custom_fixture(base: &Value, overrides: &Value) -> Value {
    match (base, overrides) {
        (Value::Object(base), Value::Object(overrides)) => {
            let mut merged: Map<String, Value> = base.clone();
            for (key, value) in overrides {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        _ => overrides.clone(),
    }
}

/// `{"status": "success", "result": ..}`
pub fn success_response(result: Value) -> Value {
    json!({"status": "success", "result": result})
}

/// `{"status": "error", "error": .., "details": ..}`
pub fn error_response(message: impl Into<String>, details: Option<Value>) -> Value {
    let mut response = json!({"status": "error", "error": message.into()});
    if let Some(details) = details {
        response["details"] = details;
    }
    response
}

/// `{"status": "accepted", "taskId": ..}`
pub fn accepted_response(task_id: impl Into<String>) -> Value {
    json!({"status": "accepted", "taskId": task_id.into()})
}

/// Two documents and an image
pub fn sample_resources() -> Vec<Resource> {
    let metadata = |value: Value| match value {
        Value::Object(map) => Some(map),
        _ => None,
    };

    vec![
        Resource {
            id: "doc-1".to_string(),
            resource_type: "document".to_string(),
            name: "Getting Started".to_string(),
            description: Some("Introductory guide".to_string()),
            metadata: metadata(json!({"pages": 12, "language": "en"})),
        },
        Resource {
            id: "doc-2".to_string(),
            resource_type: "document".to_string(),
            name: "API Reference".to_string(),
            description: None,
            metadata: metadata(json!({"pages": 48, "language": "en", "draft": false})),
        },
        Resource {
            id: "img-1".to_string(),
            resource_type: "image".to_string(),
            name: "Architecture Diagram".to_string(),
            description: Some("System overview".to_string()),
            metadata: metadata(json!({"width": 1920, "height": 1080, "format": "png"})),
        },
    ]
}

/// Schema describing an `echo` and an `add` tool plus the sample resources
pub fn sample_schema() -> Schema {
    Schema {
        tools: vec![
            ToolSchema {
                name: "echo".to_string(),
                description: Some("Echo the input text".to_string()),
                parameters: json!({
                    "type": "object",
                    "required": ["text"],
                    "properties": {"text": {"type": "string"}}
                }),
                returns: Some(json!({"type": "string"})),
            },
            ToolSchema {
                name: "add".to_string(),
                description: Some("Add two numbers".to_string()),
                parameters: json!({
                    "type": "object",
                    "required": ["a", "b"],
                    "properties": {"a": {"type": "number"}, "b": {"type": "number"}}
                }),
                returns: Some(json!({"type": "number"})),
            },
        ],
        resources: vec![
            ResourceSchema {
                resource_type: "document".to_string(),
                description: None,
                properties: json!({
                    "pages": {"type": "integer"},
                    "language": {"type": "string"},
                    "draft": {"type": "boolean"}
                }),
            },
            ResourceSchema {
                resource_type: "image".to_string(),
                description: None,
                properties: json!({
                    "width": {"type": "integer"},
                    "height": {"type": "integer"},
                    "format": {"type": "string"}
                }),
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::validation::{validate_resource, validate_tool_response};
    use proptest::prelude::*;

    #[test]
    fn test_merge_replaces_top_level_keys() {
        let base = json!({"a": 1, "nested": {"x": 1, "y": 2}});
        let merged = create_custom_fixture(&base, &json!({"b": 2, "nested": {"x": 9}}));
        assert_eq!(merged, json!({"a": 1, "b": 2, "nested": {"x": 9}}));
    }

    #[test]
    fn test_merge_with_non_objects() {
        assert_eq!(create_custom_fixture(&json!([1]), &json!({"a": 1})), json!({"a": 1}));
        assert_eq!(create_custom_fixture(&json!({"a": 1}), &json!(null)), Value::Null);
    }

    #[test]
    fn test_envelopes_are_valid() {
        assert!(validate_tool_response(&success_response(json!({"ok": true}))).valid);
        assert!(validate_tool_response(&error_response("failed", None)).valid);
        assert!(
            validate_tool_response(&error_response("failed", Some(json!({"code": 3})))).valid
        );
        assert!(validate_tool_response(&accepted_response("task-1")).valid);
        assert_eq!(error_response("x", Some(json!(1)))["details"], 1);
    }

    #[test]
    fn test_sample_resources_are_valid() {
        for resource in sample_resources() {
            let value = serde_json::to_value(&resource).unwrap();
            assert!(validate_resource(&value).valid, "{:?}", value);
        }
    }

    #[test]
    fn test_sample_schema_lookup() {
        let schema = sample_schema();
        assert!(schema.tool("echo").is_some());
        assert!(schema.resource_type("image").is_some());
    }

    fn flat_object() -> impl Strategy<Value = Map<String, Value>> {
        prop::collection::btree_map("[a-e]", any::<i32>(), 0..5)
            .prop_map(|m| m.into_iter().map(|(k, v)| (k, json!(v))).collect())
    }

    proptest! {
        #[test]
        fn prop_merge_prefers_overrides(base in flat_object(), overrides in flat_object()) {
            let merged = create_custom_fixture(
                &Value::Object(base.clone()),
                &Value::Object(overrides.clone()),
            );
            let merged = merged.as_object().unwrap();

            for (key, value) in &overrides {
                prop_assert_eq!(merged.get(key), Some(value));
            }
            for (key, value) in &base {
                if !overrides.contains_key(key) {
                    prop_assert_eq!(merged.get(key), Some(value));
                }
            }
            prop_assert!(merged.len() <= base.len() + overrides.len());
        }
    }
}
