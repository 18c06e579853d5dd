//! Test utilities for MCP servers
//!
//! - `helpers`: bounded waits, polling and stream collection
//! - `retry`: retries with optional exponential backoff
//! - `validation`: response, resource and schema checks
//! - `fixtures`: canned payloads

pub mod fixtures;
pub mod helpers;
pub mod retry;
pub mod validation;

pub use fixtures::{
    accepted_response, create_custom_fixture, error_response, sample_resources, sample_schema,
    success_response,
};
pub use helpers::{
    collect_stream_responses, delay, poll_until, wait_for_condition, CollectOptions, PollOptions,
    WaitOptions,
};
pub use retry::{retry, RetryOptions};
pub use validation::{
    validate_against_schema, validate_resource, validate_schema, validate_tool_response,
    JsonSchemaValidator, SchemaValidator, ValidationOptions, ValidationResult,
};
