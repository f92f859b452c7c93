//! Adapter over the streaming HTTP transport against a local axum gateway.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use mcp_gateway_client::mcp::PROTOCOL_VERSION;
use mcp_gateway_client::transport::{StreamingHttpTransport, Transport, TransportKind};
use mcp_gateway_client::{create_adapter, AdapterConfig, McpError};
use serde_json::{json, Value};

const SESSION_ID: &str = "session-42";
const SLOW_CALL: Duration = Duration::from_millis(1500);

#[derive(Clone, Default)]
struct Gateway {
    /// (path, session header) for every POST received
    seen: Arc<Mutex<Vec<(String, Option<String>)>>>,
}

impl Gateway {
    fn record(&self, path: &str, headers: &HeaderMap) {
        let session = headers
            .get("mcp-session-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.seen.lock().unwrap().push((path.to_string(), session));
    }

    fn seen(&self) -> Vec<(String, Option<String>)> {
        self.seen.lock().unwrap().clone()
    }
}

fn ok(id: &Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

async fn root() -> &'static str {
    "mock gateway"
}

async fn initialize(State(gw): State<Gateway>, headers: HeaderMap, Json(req): Json<Value>) -> Response {
    gw.record("/mcp/initialize", &headers);
    let body = ok(
        &req["id"],
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "http-gateway", "version": "0.1.0"}
        }),
    );
    ([("mcp-session-id", SESSION_ID)], Json(body)).into_response()
}

async fn tools_list(State(gw): State<Gateway>, headers: HeaderMap, Json(req): Json<Value>) -> Response {
    gw.record("/mcp/tools/list", &headers);
    let body = ok(
        &req["id"],
        json!({"tools": [{
            "name": "echo",
            "description": "Echo the input back",
            "inputSchema": {
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"]
            }
        }]}),
    );
    Json(body).into_response()
}

/// Answers as an event stream, preceded by a progress notification.
async fn tools_call(State(gw): State<Gateway>, headers: HeaderMap, Json(req): Json<Value>) -> Response {
    gw.record("/mcp/tools/call", &headers);
    let text = req["params"]["arguments"]["text"].as_str().unwrap_or_default();
    if text == "slow" {
        tokio::time::sleep(SLOW_CALL).await;
    }
    let progress = json!({"jsonrpc": "2.0", "method": "notifications/progress", "params": {"progress": 1}});
    let result = ok(
        &req["id"],
        json!({"content": [{"type": "text", "text": text}], "isError": false, "traceId": "t-1"}),
    );
    let body = format!("event: message\ndata: {}\n\nevent: message\ndata: {}\n\n", progress, result);
    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}

async fn other(State(gw): State<Gateway>, headers: HeaderMap, Json(req): Json<Value>) -> Response {
    gw.record("/mcp", &headers);
    if req.get("id").is_none() {
        return StatusCode::ACCEPTED.into_response();
    }
    let body = json!({
        "jsonrpc": "2.0",
        "id": req["id"],
        "error": {"code": -32601, "message": "Method not found"}
    });
    (StatusCode::NOT_FOUND, Json(body)).into_response()
}

async fn spawn_gateway() -> (SocketAddr, Gateway) {
    let gateway = Gateway::default();
    let app = Router::new()
        .route("/", get(root))
        .route("/mcp", post(other))
        .route("/mcp/initialize", post(initialize))
        .route("/mcp/tools/list", post(tools_list))
        .route("/mcp/tools/call", post(tools_call))
        .with_state(gateway.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, gateway)
}

fn streaming_config(addr: SocketAddr) -> AdapterConfig {
    AdapterConfig {
        transport: TransportKind::Streaming,
        gateway_url: format!("http://{}", addr),
        timeout: Duration::from_secs(5),
        tool_timeout: Duration::from_secs(5),
        max_retries: 0,
        ..AdapterConfig::default()
    }
}

#[tokio::test]
async fn adapter_round_trip_over_http() {
    let (addr, gateway) = spawn_gateway().await;
    let adapter = create_adapter(streaming_config(addr)).unwrap();
    adapter.connect().await.unwrap();

    assert_eq!(adapter.server_info().await.unwrap().name, "http-gateway");

    let tools = adapter.list_tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert!(tools.contains_key("echo"));

    let result = adapter.execute_tool("echo", json!({"text": "hello"})).await.unwrap();
    assert!(result.success);
    assert_eq!(result.content, "hello");
    assert_eq!(result.metadata["traceId"], json!("t-1"));

    adapter.disconnect().await;

    let seen = gateway.seen();
    let paths: Vec<&str> = seen.iter().map(|(p, _)| p.as_str()).collect();
    assert_eq!(paths, vec!["/mcp/initialize", "/mcp/tools/list", "/mcp/tools/call", "/mcp"]);

    // No session before the gateway assigns one, then replayed on every call.
    assert_eq!(seen[0].1, None);
    assert!(seen[1..].iter().all(|(_, s)| s.as_deref() == Some(SESSION_ID)));
}

#[tokio::test]
async fn json_rpc_error_with_http_status_is_kept() {
    let (addr, _) = spawn_gateway().await;
    let mut transport = StreamingHttpTransport::new(format!("http://{}", addr), Duration::from_secs(5));
    transport.connect().await.unwrap();

    transport
        .send_message(&json!({"jsonrpc": "2.0", "id": 7, "method": "resources/list"}))
        .await
        .unwrap();
    let reply = transport.receive_message().await.unwrap();
    assert_eq!(reply["id"], json!(7));
    assert_eq!(reply["error"]["code"], json!(-32601));

    // Nothing else was queued.
    assert!(matches!(transport.receive_message().await, Err(McpError::Transport(_))));
    transport.disconnect().await;
}

#[tokio::test]
async fn local_validation_skips_the_gateway() {
    let (addr, gateway) = spawn_gateway().await;
    let adapter = create_adapter(streaming_config(addr)).unwrap();
    adapter.connect().await.unwrap();

    let err = adapter.execute_tool("echo", json!({"text": 5})).await.unwrap_err();
    assert!(matches!(err, McpError::ToolExecution { .. }));
    assert!(!gateway.seen().iter().any(|(p, _)| p == "/mcp/tools/call"));

    adapter.disconnect().await;
}

#[tokio::test]
async fn tool_timeout_may_exceed_request_timeout() {
    let (addr, _) = spawn_gateway().await;
    let mut config = streaming_config(addr);
    config.timeout = Duration::from_secs(1);
    config.tool_timeout = Duration::from_secs(4);
    let adapter = create_adapter(config).unwrap();
    adapter.connect().await.unwrap();

    let result = adapter.execute_tool("echo", json!({"text": "slow"})).await.unwrap();
    assert!(result.success);
    assert_eq!(result.content, "slow");

    adapter.disconnect().await;
}

#[tokio::test]
async fn slow_tool_call_reports_tool_timeout() {
    let (addr, _) = spawn_gateway().await;
    let mut config = streaming_config(addr);
    config.tool_timeout = Duration::from_millis(300);
    let adapter = create_adapter(config).unwrap();
    adapter.connect().await.unwrap();

    let err = adapter.execute_tool("echo", json!({"text": "slow"})).await.unwrap_err();
    match err {
        McpError::Timeout { operation, timeout } => {
            assert_eq!(operation, "tools/call");
            assert_eq!(timeout, Duration::from_millis(300));
        }
        other => panic!("expected timeout, got {:?}", other),
    }

    let result = adapter.execute_tool("echo", json!({"text": "again"})).await.unwrap();
    assert_eq!(result.content, "again");

    adapter.disconnect().await;
}
