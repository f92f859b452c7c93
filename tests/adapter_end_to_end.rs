//! End-to-end adapter behavior against a scripted in-memory gateway.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use mcp_gateway_client::health::{HealthConfig, HealthStatus};
use mcp_gateway_client::McpError;
use serde_json::json;

use helpers::{adapter_with, config, scripted_adapter, scripted_gateway, slow_search_gateway};

#[tokio::test]
async fn list_tools_returns_search_and_calculate() {
    let (adapter, _) = scripted_adapter();
    adapter.connect().await.unwrap();

    let tools = adapter.list_tools().await.unwrap();
    let mut names: Vec<&str> = tools.keys().map(String::as_str).collect();
    names.sort_unstable();
    assert_eq!(names, vec!["calculate", "search"]);

    let search = &tools["search"];
    assert_eq!(search.description, "Search the web");
    assert_eq!(search.input_schema["required"], json!(["query"]));
    assert_eq!(tools["calculate"].input_schema["type"], json!("object"));
}

#[tokio::test]
async fn execute_search_is_normalized() {
    let (adapter, _) = scripted_adapter();
    adapter.connect().await.unwrap();

    let result = adapter.execute_tool("search", json!({"query": "x"})).await.unwrap();
    let value = serde_json::to_value(&result).unwrap();

    assert_eq!(value["success"], json!(true));
    assert_eq!(value["content"], json!("result"));
    assert_eq!(value["error"], json!(null));
}

#[tokio::test]
async fn unknown_tool_never_reaches_the_wire() {
    let (adapter, stats) = scripted_adapter();
    adapter.connect().await.unwrap();

    let err = adapter.execute_tool("translate", json!({})).await.unwrap_err();
    match err {
        McpError::ToolExecution { message, tool_name, details } => {
            assert_eq!(message, "Tool not found");
            assert_eq!(tool_name, "translate");
            assert_eq!(details["available_tools"], json!(["calculate", "search"]));
        }
        other => panic!("expected tool error, got {:?}", other),
    }
    assert_eq!(stats.count_method("tools/call"), 0);
}

#[tokio::test]
async fn missing_required_argument_is_rejected_locally() {
    let (adapter, stats) = scripted_adapter();
    adapter.connect().await.unwrap();

    let err = adapter.execute_tool("search", json!({})).await.unwrap_err();
    assert!(matches!(
        err,
        McpError::ToolExecution { ref message, .. } if message.starts_with("Invalid arguments")
    ));
    assert_eq!(stats.count_method("tools/call"), 0);
}

#[tokio::test]
async fn server_reported_error_is_surfaced() {
    let (adapter, _) = scripted_adapter();
    adapter.connect().await.unwrap();

    let err = adapter
        .execute_tool("calculate", json!({"expression": "1 / 0"}))
        .await
        .unwrap_err();
    match err {
        McpError::ToolExecution { message, tool_name, .. } => {
            assert_eq!(message, "cannot divide by zero");
            assert_eq!(tool_name, "calculate");
        }
        other => panic!("expected tool error, got {:?}", other),
    }
    assert_eq!(adapter.request_totals().errors, 1);
}

#[tokio::test]
async fn connect_retries_after_one_failure() {
    let (adapter, stats) = scripted_adapter();
    stats.fail_first_connects(1);

    adapter.connect().await.unwrap();

    assert!(adapter.is_connected());
    assert_eq!(stats.connect_calls(), 2);
    assert_eq!(stats.count_method("initialize"), 1);
}

#[tokio::test]
async fn connect_with_zero_retries_fails_once() {
    let mut cfg = config();
    cfg.max_retries = 0;
    let (adapter, stats) = adapter_with(Arc::new(scripted_gateway), cfg);
    stats.fail_first_connects(1);

    let err = adapter.connect().await.unwrap_err();
    assert!(matches!(err, McpError::RetriesExhausted { attempts: 1, .. }));
    assert_eq!(stats.connect_calls(), 1);
}

#[tokio::test]
async fn health_is_unhealthy_right_after_disconnect() {
    let (adapter, _) = scripted_adapter();
    adapter.connect().await.unwrap();
    assert_eq!(adapter.health_check().await.status, HealthStatus::Healthy);

    adapter.disconnect().await;
    let result = adapter.health_check().await;

    assert_eq!(result.status, HealthStatus::Unhealthy);
    assert!(!result.errors.is_empty());
}

#[tokio::test(start_paused = true)]
async fn tool_cache_expires_after_ttl() {
    let mut cfg = config();
    cfg.cache_ttl = Duration::from_secs(30);
    let (adapter, stats) = adapter_with(Arc::new(scripted_gateway), cfg);
    adapter.connect().await.unwrap();

    let first = adapter.list_tools().await.unwrap();
    let second = adapter.list_tools().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(stats.count_method("tools/list"), 1);

    tokio::time::advance(Duration::from_secs(31)).await;
    adapter.list_tools().await.unwrap();
    assert_eq!(stats.count_method("tools/list"), 2);
}

#[tokio::test(start_paused = true)]
async fn tool_timeout_leaves_session_usable() {
    let mut cfg = config();
    cfg.tool_timeout = Duration::from_millis(100);
    let (adapter, _) = adapter_with(slow_search_gateway(Duration::from_millis(500)), cfg);
    adapter.connect().await.unwrap();

    let err = adapter.execute_tool("search", json!({"query": "x"})).await.unwrap_err();
    match err {
        McpError::Timeout { operation, timeout } => {
            assert_eq!(operation, "tools/call");
            assert_eq!(timeout, Duration::from_millis(100));
        }
        other => panic!("expected timeout, got {:?}", other),
    }

    // The late answer lands while the next request is outstanding.
    tokio::time::sleep(Duration::from_millis(600)).await;
    let tools = adapter.refresh_tools().await.unwrap();
    assert_eq!(tools.len(), 2);

    let err = adapter
        .execute_tool("calculate", json!({"expression": "1 / 0"}))
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::ToolExecution { .. }));
}

#[tokio::test(start_paused = true)]
async fn background_monitoring_collects_history() {
    let mut cfg = config();
    cfg.health = HealthConfig {
        interval: Duration::from_secs(10),
        ..HealthConfig::default()
    };
    let (adapter, _) = adapter_with(Arc::new(scripted_gateway), cfg);
    adapter.connect().await.unwrap();

    assert!(adapter.start_monitoring());
    tokio::time::sleep(Duration::from_secs(25)).await;
    adapter.stop_monitoring().await;

    let history = adapter.monitor().history();
    assert_eq!(history.len(), 3);
    assert!(history.iter().all(|r| r.status == HealthStatus::Healthy));

    let metrics = adapter.get_metrics();
    assert_eq!(metrics.success_rate, 1.0);
    assert!(metrics.uptime >= Duration::from_secs(25));

    adapter.disconnect().await;
}

#[tokio::test]
async fn counters_track_calls_and_errors() {
    let (adapter, _) = scripted_adapter();

    assert!(matches!(adapter.list_tools().await, Err(McpError::NotConnected)));
    adapter.connect().await.unwrap();
    adapter.list_tools().await.unwrap();
    adapter.execute_tool("search", json!({"query": "q"})).await.unwrap();

    let metrics = adapter.get_metrics();
    assert_eq!(metrics.request_count, 3);
    assert_eq!(metrics.error_count, 1);
    assert!((metrics.success_rate - 2.0 / 3.0).abs() < 1e-9);
}
