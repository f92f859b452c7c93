//! Shared fixtures: a scripted in-memory gateway serving `search` and
//! `calculate`, and adapters wired to it.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use mcp_gateway_client::mcp::PROTOCOL_VERSION;
use mcp_gateway_client::transport::{MemoryTransport, Reply, Transport, TransportFactory, TransportStats};
use mcp_gateway_client::{AdapterConfig, McpAdapter};
use serde_json::{json, Value};

pub type Handler = Arc<dyn Fn(&Value) -> Reply + Send + Sync>;

pub fn tool_list() -> Value {
    json!({
        "tools": [
            {
                "name": "search",
                "description": "Search the web",
                "inputSchema": {
                    "type": "object",
                    "properties": {"query": {"type": "string"}},
                    "required": ["query"]
                }
            },
            {
                "name": "calculate",
                "description": "Evaluate an arithmetic expression",
                "inputSchema": {
                    "type": "object",
                    "properties": {"expression": {"type": "string"}},
                    "required": ["expression"]
                }
            }
        ]
    })
}

/// Gateway answering every method immediately
pub fn scripted_gateway(msg: &Value) -> Reply {
    match msg["method"].as_str() {
        Some("initialize") => Reply::result(
            msg,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {"tools": {"listChanged": true}},
                "serverInfo": {"name": "scripted-gateway", "version": "1.0.0"}
            }),
        ),
        Some("tools/list") => Reply::result(msg, tool_list()),
        Some("tools/call") => match msg["params"]["name"].as_str() {
            Some("search") => Reply::result(
                msg,
                json!({"content": [{"type": "text", "text": "result"}], "isError": false}),
            ),
            Some("calculate") => Reply::result(
                msg,
                json!({
                    "content": [{"type": "text", "text": "cannot divide by zero"}],
                    "isError": true
                }),
            ),
            _ => Reply::error(msg, -32602, "unknown tool"),
        },
        _ => Reply::Silent,
    }
}

/// Gateway that never answers `tools/call` for `search` within `delay`
pub fn slow_search_gateway(delay: Duration) -> Handler {
    Arc::new(move |msg: &Value| {
        if msg["method"] == json!("tools/call") && msg["params"]["name"] == json!("search") {
            return Reply::Delayed(
                json!({
                    "jsonrpc": "2.0",
                    "id": msg["id"].clone(),
                    "result": {"content": [{"type": "text", "text": "too late"}]}
                }),
                delay,
            );
        }
        scripted_gateway(msg)
    })
}

pub fn config() -> AdapterConfig {
    AdapterConfig {
        retry_delay: Duration::from_millis(10),
        ..AdapterConfig::default()
    }
}

/// Adapter whose every connect attempt builds a fresh memory transport
pub fn adapter_with(handler: Handler, config: AdapterConfig) -> (Arc<McpAdapter>, Arc<TransportStats>) {
    let stats = TransportStats::new();
    let factory_stats = Arc::clone(&stats);
    let factory: TransportFactory = Arc::new(move || {
        Box::new(MemoryTransport::from_handler(Arc::clone(&handler), Arc::clone(&factory_stats)))
            as Box<dyn Transport>
    });
    let adapter = McpAdapter::with_transport_factory(config, factory).expect("valid test config");
    (Arc::new(adapter), stats)
}

pub fn scripted_adapter() -> (Arc<McpAdapter>, Arc<TransportStats>) {
    adapter_with(Arc::new(scripted_gateway), config())
}
