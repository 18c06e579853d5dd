//! Response and schema validation
//!
//! Two kinds of checks:
//!
//! - **JSON Schema checks** through the [`SchemaValidator`] trait, with a
//!   [`JsonSchemaValidator`] backed by the `jsonschema` crate (draft 2020-12)
//! - **Shape checks** for the payloads an MCP server returns: tool response
//!   envelopes, resources and introspected schemas. These are fixed schemas
//!   run through the same validator, plus uniqueness checks JSON Schema
//!   cannot express.
//!
//! Checks never fail; they report every problem found in a
//! [`ValidationResult`].

use jsonschema::draft202012;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashSet;

/// Outcome of a validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub valid: bool,

    /// One entry per problem, prefixed with a JSON path
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    fn extend(mut self, errors: impl IntoIterator<Item = String>) -> Self {
        self.errors.extend(errors);
        self.valid = self.errors.is_empty();
        self
    }
}

/// Options for [`SchemaValidator::validate`]
#[derive(Debug, Clone)]
pub struct ValidationOptions {
    /// Accept object keys not listed in `properties` (default: true)
    ///
    /// A schema's own `"additionalProperties": false` always applies.
    pub allow_additional_properties: bool,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            allow_additional_properties: true,
        }
    }
}

/// Validates data against a JSON schema
pub trait SchemaValidator: Send + Sync {
    fn validate(&self, data: &Value, schema: &Value, options: &ValidationOptions)
        -> ValidationResult;
}

/// Draft 2020-12 validator
///
/// Schemas are compiled per call. A schema that does not compile is reported
/// as a single `$schema` error rather than a panic.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSchemaValidator;

impl SchemaValidator for JsonSchemaValidator {
    fn validate(
        &self,
        data: &Value,
        schema: &Value,
        options: &ValidationOptions,
    ) -> ValidationResult {
        let mut schema = schema.clone();
        if !options.allow_additional_properties {
            close_objects(&mut schema);
        }

        let validator = match draft202012::new(&schema) {
            Ok(validator) => validator,
            Err(error) => {
                return ValidationResult::from_errors(vec![format!(
                    "$schema: invalid schema: {}",
                    error
                )])
            }
        };

        let errors = validator
            .iter_errors(data)
            .map(|error| format!("{}: {}", json_path(&error.instance_path.to_string()), error))
            .collect();
        ValidationResult::from_errors(errors)
    }
}

/// Validate `data` against `schema` with [`JsonSchemaValidator`]
pub fn validate_against_schema(
    data: &Value,
    schema: &Value,
    options: &ValidationOptions,
) -> ValidationResult {
    JsonSchemaValidator.validate(data, schema, options)
}

/// Add `"additionalProperties": false` to every object schema that lists
/// `properties` and does not decide for itself
fn close_objects(schema: &mut Value) {
    let Some(object) = schema.as_object_mut() else {
        return;
    };

    if object.contains_key("properties") && !object.contains_key("additionalProperties") {
        object.insert("additionalProperties".to_string(), Value::Bool(false));
    }

    if let Some(properties) = object.get_mut("properties").and_then(Value::as_object_mut) {
        properties.values_mut().for_each(close_objects);
    }
    if let Some(items) = object.get_mut("items") {
        close_objects(items);
    }
    for combinator in ["allOf", "anyOf", "oneOf"] {
        if let Some(branches) = object.get_mut(combinator).and_then(Value::as_array_mut) {
            branches.iter_mut().for_each(close_objects);
        }
    }
}

/// `/tags/1` -> `$.tags[1]`
fn json_path(pointer: &str) -> String {
    let mut path = String::from("$");
    for segment in pointer.split('/').skip(1) {
        let segment = segment.replace("~1", "/").replace("~0", "~");
        if !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
            path.push_str(&format!("[{}]", segment));
        } else {
            path.push('.');
            path.push_str(&segment);
        }
    }
    path
}

fn tool_response_shape() -> Value {
    let variant = |status: &str, field: &str, field_schema: Value| {
        let others: Vec<Value> = ["result", "error", "taskId"]
            .into_iter()
            .filter(|f| *f != field)
            .map(|f| json!({"required": [f]}))
            .collect();
        let mut payload = Map::new();
        payload.insert(field.to_string(), field_schema);
        json!({
            "if": {"properties": {"status": {"const": status}}, "required": ["status"]},
            "then": {
                "required": [field],
                "properties": payload,
                "not": {"anyOf": others}
            }
        })
    };

    json!({
        "type": "object",
        "required": ["status"],
        "properties": {
            "status": {"enum": ["success", "error", "accepted"]}
        },
        "allOf": [
            variant("success", "result", json!(true)),
            variant("error", "error", json!({"type": "string"})),
            variant("accepted", "taskId", json!({"type": "string"}))
        ]
    })
}

fn resource_shape() -> Value {
    json!({
        "type": "object",
        "required": ["id", "type", "name"],
        "properties": {
            "id": {"type": "string", "minLength": 1},
            "type": {"type": "string", "minLength": 1},
            "name": {"type": "string"},
            "description": {"type": ["string", "null"]},
            "metadata": {"type": ["object", "null"]}
        }
    })
}

fn schema_shape() -> Value {
    json!({
        "type": "object",
        "required": ["tools", "resources"],
        "properties": {
            "tools": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["name", "parameters"],
                    "properties": {
                        "name": {"type": "string"},
                        "parameters": {"type": "object"}
                    }
                }
            },
            "resources": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["type", "properties"],
                    "properties": {
                        "type": {"type": "string"},
                        "properties": {"type": "object"}
                    }
                }
            }
        }
    })
}

/// Check a tool response envelope
///
/// `status` must be `success`, `error` or `accepted`, and exactly the
/// matching payload field must be present.
pub fn validate_tool_response(response: &Value) -> ValidationResult {
    validate_against_schema(response, &tool_response_shape(), &ValidationOptions::default())
}

/// Check a resource object
pub fn validate_resource(resource: &Value) -> ValidationResult {
    validate_against_schema(resource, &resource_shape(), &ValidationOptions::default())
}

/// Check an introspected schema
///
/// Tool names and resource types must be unique.
pub fn validate_schema(schema: &Value) -> ValidationResult {
    let result = validate_against_schema(schema, &schema_shape(), &ValidationOptions::default());
    let duplicates = duplicates(schema, "tools", "name", "duplicate tool")
        .chain(duplicates(schema, "resources", "type", "duplicate resource type"))
        .collect::<Vec<_>>();
    result.extend(duplicates)
}

fn duplicates<'a>(
    schema: &'a Value,
    list: &'a str,
    key: &'a str,
    label: &'a str,
) -> impl Iterator<Item = String> + 'a {
    let mut seen = HashSet::new();
    schema
        .get(list)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .enumerate()
        .filter_map(move |(index, entry)| {
            let name = entry.get(key).and_then(Value::as_str)?;
            (!seen.insert(name))
                .then(|| format!("$.{}[{}].{}: {} '{}'", list, index, key, label, name))
        })
}
