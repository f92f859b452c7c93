use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use mcp_gateway_client::{create_adapter, logging, AdapterConfig, McpAdapter};
use serde_json::{json, Value};

#[derive(Debug, PartialEq)]
enum Command {
    List,
    Call { tool: String, args: Value },
    Health,
    Monitor { duration: Duration },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let command = match parse_args(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{}", e);
            print_usage();
            std::process::exit(2);
        }
    };

    let config = AdapterConfig::from_env().context("Invalid MCP_* configuration")?;
    logging::init_tracing(config.log_level);

    tracing::info!(transport = %config.transport, "Starting MCP gateway client");
    let adapter = Arc::new(create_adapter(config)?);
    adapter.connect().await.context("Failed to connect to gateway")?;

    let outcome = run(&adapter, command).await;
    adapter.disconnect().await;
    outcome
}

async fn run(adapter: &Arc<McpAdapter>, command: Command) -> anyhow::Result<()> {
    match command {
        Command::List => {
            let tools = adapter.list_tools().await?;
            let mut listing: Vec<Value> = tools
                .values()
                .map(|t| json!({"name": t.name, "description": t.description, "inputSchema": t.input_schema}))
                .collect();
            listing.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
            print_json(&json!({ "tools": listing }))?;
        }
        Command::Call { tool, args } => {
            let result = adapter.execute_tool(&tool, args).await?;
            print_json(&serde_json::to_value(&result)?)?;
        }
        Command::Health => {
            let health = adapter.health_check().await;
            print_json(&json!({
                "health": health,
                "metrics": adapter.get_metrics(),
            }))?;
        }
        Command::Monitor { duration } => {
            adapter.start_monitoring();
            tokio::select! {
                _ = tokio::time::sleep(duration) => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Interrupted, stopping monitor");
                }
            }
            adapter.stop_monitoring().await;
            print_json(&json!({
                "history": adapter.monitor().history(),
                "alerts": adapter.monitor().recent_alerts(),
                "metrics": adapter.get_metrics(),
            }))?;
        }
    }
    Ok(())
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Parse command-line arguments
fn parse_args(args: &[String]) -> anyhow::Result<Command> {
    let mut command = None;
    let mut call_args = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--list" => command = Some(Command::List),
            "--health" => command = Some(Command::Health),
            "--call" => {
                let Some(tool) = args.get(i + 1) else {
                    bail!("--call requires a tool name");
                };
                command = Some(Command::Call {
                    tool: tool.clone(),
                    args: json!({}),
                });
                i += 1;
            }
            "--args" => {
                let Some(raw) = args.get(i + 1) else {
                    bail!("--args requires a JSON object");
                };
                let parsed: Value =
                    serde_json::from_str(raw).with_context(|| format!("--args is not valid JSON: {}", raw))?;
                call_args = Some(parsed);
                i += 1;
            }
            "--monitor" => {
                let Some(raw) = args.get(i + 1) else {
                    bail!("--monitor requires a number of seconds");
                };
                let secs: f64 = raw
                    .parse()
                    .with_context(|| format!("--monitor expects seconds, got {}", raw))?;
                let duration = Duration::try_from_secs_f64(secs)
                    .with_context(|| format!("--monitor expects non-negative seconds, got {}", raw))?;
                command = Some(Command::Monitor { duration });
                i += 1;
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => bail!("Unknown argument: {}", other),
        }
        i += 1;
    }

    match (command, call_args) {
        (Some(Command::Call { tool, .. }), Some(args)) => Ok(Command::Call { tool, args }),
        (Some(_), Some(_)) => bail!("--args is only valid with --call"),
        (Some(command), None) => Ok(command),
        (None, _) => Ok(Command::List),
    }
}

/// Print usage information
fn print_usage() {
    println!("mcp-gateway - MCP tool-gateway client");
    println!();
    println!("USAGE:");
    println!("    mcp-gateway [--list | --call <TOOL> [--args <JSON>] | --health | --monitor <SECS>]");
    println!();
    println!("OPTIONS:");
    println!("    --list              List discovered tools (default)");
    println!("    --call <TOOL>       Invoke a tool and print the normalized result");
    println!("    --args <JSON>       Arguments for --call as a JSON object (default: {{}})");
    println!("    --health            Run one health check and print it with metrics");
    println!("    --monitor <SECS>    Run background health checks for SECS seconds");
    println!("    --help, -h          Print this help message");
    println!();
    println!("ENVIRONMENT VARIABLES:");
    println!("    MCP_TRANSPORT         stdio or streaming (default: streaming)");
    println!("    MCP_GATEWAY_URL       Gateway base URL (default: http://localhost:8000)");
    println!("    MCP_SERVER_COMMAND    Gateway command line for stdio");
    println!("    MCP_TIMEOUT           Request timeout in seconds (default: 30)");
    println!("    MCP_TOOL_TIMEOUT      Tool call timeout in seconds (default: MCP_TIMEOUT)");
    println!("    MCP_MAX_RETRIES       Additional connect attempts (default: 3)");
    println!("    MCP_RETRY_DELAY       Base connect backoff in seconds (default: 1)");
    println!("    MCP_CACHE_TTL         Tool cache lifetime in seconds (default: 30)");
    println!("    MCP_LOG_LEVEL         trace, debug, info, warn or error (default: info)");
    println!("    MCP_HEALTH_INTERVAL   Seconds between monitor checks (default: 60)");
    println!("    MCP_RESPONSE_CEILING  Healthy response time in seconds (default: 5)");
    println!("    RUST_LOG              Overrides MCP_LOG_LEVEL");
    println!();
    println!("EXAMPLES:");
    println!("    # List tools from a stdio gateway");
    println!("    MCP_TRANSPORT=stdio MCP_SERVER_COMMAND=mock-gateway mcp-gateway --list");
    println!();
    println!("    # Call a tool over streaming HTTP");
    println!("    mcp-gateway --call search --args '{{\"query\": \"rust\"}}'");
}
