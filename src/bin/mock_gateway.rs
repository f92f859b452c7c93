//! Minimal stdio tool gateway used by the integration tests
//!
//! Speaks newline-delimited JSON-RPC on stdin/stdout and serves three tools:
//! `search`, `calculate` and `sleep` (answers after `ms` milliseconds, used to
//! exercise client timeouts). Exits on a `shutdown` notification or EOF.
//!
//! `--no-capabilities` answers `initialize` without a capabilities map.

use std::time::Duration;

use mcp_gateway_client::config::LogLevel;
use mcp_gateway_client::logging;
use mcp_gateway_client::mcp::{
    error_codes, methods, JsonRpcError, JsonRpcRequest, JsonRpcResponse, ToolDescriptor, PROTOCOL_VERSION,
};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[derive(Debug, Deserialize, JsonSchema)]
#[allow(dead_code)]
struct SearchParams {
    /// Search terms
    query: String,
    /// Maximum number of hits
    limit: Option<u32>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[allow(dead_code)]
struct CalculateParams {
    /// Binary expression such as `2 * 21`
    expression: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[allow(dead_code)]
struct SleepParams {
    /// Delay before answering, in milliseconds
    ms: u64,
}

fn tool_catalog() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor::for_params::<SearchParams>("search", "Search the document index"),
        ToolDescriptor::for_params::<CalculateParams>("calculate", "Evaluate a binary arithmetic expression"),
        ToolDescriptor::for_params::<SleepParams>("sleep", "Answer after a delay"),
    ]
}

fn text_result(text: impl Into<String>) -> Value {
    json!({"content": [{"type": "text", "text": text.into()}], "isError": false})
}

fn error_result(message: impl Into<String>) -> Value {
    json!({"content": [{"type": "error", "message": message.into()}], "isError": true})
}

fn calculate(expression: &str) -> Result<f64, String> {
    let parts: Vec<&str> = expression.split_whitespace().collect();
    let [lhs, op, rhs] = parts.as_slice() else {
        return Err(format!("expected '<a> <op> <b>', got '{}'", expression));
    };
    let lhs: f64 = lhs.parse().map_err(|_| format!("not a number: {}", lhs))?;
    let rhs: f64 = rhs.parse().map_err(|_| format!("not a number: {}", rhs))?;
    match *op {
        "+" => Ok(lhs + rhs),
        "-" => Ok(lhs - rhs),
        "*" => Ok(lhs * rhs),
        "/" if rhs == 0.0 => Err("division by zero".to_string()),
        "/" => Ok(lhs / rhs),
        other => Err(format!("unsupported operator: {}", other)),
    }
}

async fn call_tool(params: &Value) -> Result<Value, JsonRpcError> {
    let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
    let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

    match name {
        "search" => {
            let args: SearchParams = serde_json::from_value(arguments)
                .map_err(|e| JsonRpcError::invalid_params(e.to_string()))?;
            Ok(text_result(format!("Results for '{}'", args.query)))
        }
        "calculate" => {
            let args: CalculateParams = serde_json::from_value(arguments)
                .map_err(|e| JsonRpcError::invalid_params(e.to_string()))?;
            Ok(match calculate(&args.expression) {
                Ok(value) => text_result(value.to_string()),
                Err(message) => error_result(message),
            })
        }
        "sleep" => {
            let args: SleepParams = serde_json::from_value(arguments)
                .map_err(|e| JsonRpcError::invalid_params(e.to_string()))?;
            tokio::time::sleep(Duration::from_millis(args.ms)).await;
            Ok(text_result(format!("slept {}ms", args.ms)))
        }
        other => Err(JsonRpcError::with_data(
            error_codes::INVALID_PARAMS,
            format!("unknown tool: {}", other),
            json!({"tool": other, "available": ["search", "calculate", "sleep"]}),
        )),
    }
}

async fn handle(request: &JsonRpcRequest, advertise_capabilities: bool) -> Result<Value, JsonRpcError> {
    match request.method.as_str() {
        methods::INITIALIZE => {
            let mut result = json!({
                "protocolVersion": PROTOCOL_VERSION,
                "serverInfo": {"name": "mock-gateway", "version": env!("CARGO_PKG_VERSION")}
            });
            if advertise_capabilities {
                result["capabilities"] = json!({"tools": {"listChanged": false}});
            }
            Ok(result)
        }
        methods::TOOLS_LIST => Ok(json!({ "tools": tool_catalog() })),
        methods::TOOLS_CALL => call_tool(request.params.as_ref().unwrap_or(&Value::Null)).await,
        other => Err(JsonRpcError::method_not_found(other)),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_tracing(LogLevel::Info);
    let advertise_capabilities = !std::env::args().any(|a| a == "--no-capabilities");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    tracing::info!("mock gateway ready");

    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: JsonRpcRequest = match serde_json::from_str(trimmed) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("parse error: {}", e);
                let response = JsonRpcResponse::failure(
                    None,
                    JsonRpcError::new(error_codes::PARSE_ERROR, "Parse error"),
                );
                write_line(&mut stdout, &serde_json::to_value(response)?).await?;
                continue;
            }
        };

        if request.method == methods::SHUTDOWN {
            tracing::info!("shutdown requested");
            break;
        }

        let Some(id) = request.id.clone() else {
            continue;
        };

        let response = match handle(&request, advertise_capabilities).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse::failure(Some(id), error),
        };
        write_line(&mut stdout, &serde_json::to_value(response)?).await?;
    }

    Ok(())
}

async fn write_line(stdout: &mut tokio::io::Stdout, value: &Value) -> std::io::Result<()> {
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    stdout.write_all(&line).await?;
    stdout.flush().await
}
