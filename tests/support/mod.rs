//! In-process MCP server for integration tests
//!
//! A small axum app speaking JSON-RPC 2.0 on `POST /mcp`, with server-sent
//! events for streaming tool calls and `GET /health` for readiness probes.
//!
//! Tools:
//! - `echo`: enveloped success echoing `text`
//! - `add`: bare numeric result
//! - `fail`: enveloped tool error
//! - `queue`: accepted with a task id
//! - `slow`: answers after two seconds
//! - `explode`: JSON-RPC internal error
//! - `count`: three events when streamed, chunked across event boundaries
//! - `trickle`: one event, then a long silence
//! - `ticker`: five events 150ms apart

#![allow(dead_code)]

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Default)]
pub struct ServerState {
    /// Required bearer token, if any
    pub token: Option<String>,

    /// JSON-RPC requests received
    pub calls: AtomicUsize,

    /// `Authorization` header of every request, in order
    pub authorizations: Mutex<Vec<Option<String>>>,

    /// Value of `X-Test` headers, in order
    pub test_headers: Mutex<Vec<Option<String>>>,
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: Arc<ServerState>,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(ServerState::default()).await
    }

    pub async fn with_token(token: &str) -> Self {
        Self::start_with(ServerState {
            token: Some(token.to_string()),
            ..Default::default()
        })
        .await
    }

    async fn start_with(state: ServerState) -> Self {
        let state = Arc::new(state);
        let app = Router::new()
            .route("/mcp", post(rpc))
            .route("/health", get(|| async { "ok" }))
            .route("/status/{code}", get(status))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}/mcp", self.addr)
    }

    pub fn base(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    pub fn authorizations(&self) -> Vec<Option<String>> {
        self.state.authorizations.lock().unwrap().clone()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub fn sample_tools() -> Value {
    json!({
        "tools": [
            {
                "name": "echo",
                "description": "Echo the input text",
                "inputSchema": {
                    "type": "object",
                    "required": ["text"],
                    "properties": {"text": {"type": "string"}}
                }
            },
            {
                "name": "add",
                "parameters": {
                    "type": "object",
                    "properties": {"a": {"type": "number"}, "b": {"type": "number"}}
                },
                "returns": {"type": "number"}
            },
            {"name": "echo", "description": "shadowed duplicate"},
            {"name": "count"}
        ]
    })
}

pub fn sample_resources() -> Value {
    json!({
        "resources": [
            {"id": "doc-1", "type": "document", "name": "Guide", "metadata": {"pages": 12}},
            {"id": "doc-2", "type": "document", "name": "Reference", "metadata": {"pages": 3, "draft": true}},
            {"id": "img-1", "type": "image", "name": "Diagram", "description": "Overview", "metadata": {"format": "png"}}
        ]
    })
}

fn header_value(headers: &HeaderMap, name: impl header::AsHeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

async fn status(axum::extract::Path(code): axum::extract::Path<u16>) -> Response {
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, format!("status {}", code)).into_response()
}

async fn rpc(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(request): Json<Value>,
) -> Response {
    state.calls.fetch_add(1, Ordering::SeqCst);
    let authorization = header_value(&headers, header::AUTHORIZATION);
    state
        .authorizations
        .lock()
        .unwrap()
        .push(authorization.clone());
    state
        .test_headers
        .lock()
        .unwrap()
        .push(header_value(&headers, "x-test"));

    if let Some(token) = &state.token {
        if authorization.as_deref() != Some(format!("Bearer {}", token).as_str()) {
            return (StatusCode::UNAUTHORIZED, "missing or invalid token").into_response();
        }
    }

    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let method = request.get("method").and_then(Value::as_str).unwrap_or("");
    let params = request.get("params").cloned().unwrap_or(Value::Null);
    let wants_stream = header_value(&headers, header::ACCEPT)
        .is_some_and(|accept| accept.contains("text/event-stream"));

    match method {
        "tools/list" => ok(id, sample_tools()),
        "resources/list" => ok(id, sample_resources()),
        "tools/call" => call_tool(id, &params, wants_stream).await,
        other => rpc_error(id, -32601, &format!("Method not found: {}", other)),
    }
}

async fn call_tool(id: Value, params: &Value, wants_stream: bool) -> Response {
    let name = params.get("name").and_then(Value::as_str).unwrap_or("");
    let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

    match name {
        "echo" => ok(id, json!({"status": "success", "result": {"text": arguments["text"]}})),
        "add" => {
            let a = arguments["a"].as_f64().unwrap_or_default();
            let b = arguments["b"].as_f64().unwrap_or_default();
            ok(id, json!(a + b))
        }
        "fail" => ok(
            id,
            json!({"status": "error", "error": "boom", "details": {"reason": "requested"}}),
        ),
        "queue" => ok(id, json!({"status": "accepted", "taskId": "task-42"})),
        "slow" => {
            tokio::time::sleep(Duration::from_secs(2)).await;
            ok(id, json!({"status": "success", "result": "late"}))
        }
        "explode" => rpc_error(id, -32603, "Internal error: tool crashed"),
        "count" if wants_stream => event_stream(vec![
            (Duration::ZERO, ": keepalive\n\n".to_string()),
            (Duration::ZERO, "data: {\"n\":1}\n\n".to_string()),
            (Duration::from_millis(20), "data: {\"n\"".to_string()),
            (Duration::from_millis(20), ":2}\n\nda".to_string()),
            (Duration::from_millis(20), "ta: {\"n\":3}\n\ndata: done\n\n".to_string()),
        ]),
        "count" => ok(id, json!({"n": 3})),
        "trickle" => event_stream(vec![
            (Duration::ZERO, "data: {\"n\":1}\n\n".to_string()),
            (Duration::from_secs(30), "data: {\"n\":2}\n\n".to_string()),
        ]),
        "ticker" => event_stream(
            (1..=5)
                .map(|n| {
                    let pause = if n == 1 { Duration::ZERO } else { Duration::from_millis(150) };
                    (pause, format!("data: {{\"n\":{}}}\n\n", n))
                })
                .collect(),
        ),
        other => rpc_error(id, -32602, &format!("Unknown tool: {}", other)),
    }
}

fn ok(id: Value, result: Value) -> Response {
    Json(json!({"jsonrpc": "2.0", "id": id, "result": result})).into_response()
}

fn rpc_error(id: Value, code: i32, message: &str) -> Response {
    Json(json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {"code": code, "message": message}
    }))
    .into_response()
}

/// Send `chunks` as a `text/event-stream` body, pausing before each one
fn event_stream(chunks: Vec<(Duration, String)>) -> Response {
    let body = async_stream::stream! {
        for (pause, chunk) in chunks {
            if !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
            yield Ok::<_, Infallible>(Bytes::from(chunk));
        }
    };

    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(body))
        .unwrap()
}
