//! Adapter configuration
//!
//! ## Environment Variables
//!
//! - `MCP_TRANSPORT`: `stdio` or `streaming` (default: streaming)
//! - `MCP_GATEWAY_URL`: gateway base URL for streaming (default: http://localhost:8000)
//! - `MCP_SERVER_COMMAND`: gateway command line for stdio, whitespace separated
//! - `MCP_TIMEOUT`: request timeout in seconds (default: 30)
//! - `MCP_TOOL_TIMEOUT`: tool execution timeout in seconds (default: `MCP_TIMEOUT`)
//! - `MCP_MAX_RETRIES`: additional connect attempts (default: 3)
//! - `MCP_RETRY_DELAY`: base connect backoff in seconds (default: 1)
//! - `MCP_CACHE_TTL`: tool cache lifetime in seconds (default: 30)
//! - `MCP_LOG_LEVEL`: trace, debug, info, warn(ing) or error (default: info)
//! - `MCP_HEALTH_INTERVAL`: seconds between background health checks (default: 60)
//! - `MCP_RESPONSE_CEILING`: healthy response-time ceiling in seconds (default: 5)

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{McpError, Result};
use crate::health::HealthConfig;
use crate::mcp::types::{ClientInfo, PROTOCOL_VERSION};
use crate::protocol::ProtocolConfig;
use crate::transport::TransportKind;

pub const DEFAULT_GATEWAY_URL: &str = "http://localhost:8000";

/// Log verbosity accepted by the configuration surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_filter())
    }
}

impl FromStr for LogLevel {
    type Err = McpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(McpError::Configuration(format!(
                "unrecognized log level '{}' (expected trace, debug, info, warn or error)",
                other
            ))),
        }
    }
}

/// Everything needed to build an adapter
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub transport: TransportKind,

    /// Base URL for the streaming transport
    pub gateway_url: String,

    /// Program and arguments for the stdio transport
    pub server_command: Vec<String>,

    /// Handshake and generic request deadline
    pub timeout: Duration,

    /// Deadline for `tools/call`
    pub tool_timeout: Duration,

    /// Connect attempts after the first one
    pub max_retries: u32,

    /// First backoff delay; doubles on every retry
    pub retry_delay: Duration,

    pub cache_ttl: Duration,

    pub log_level: LogLevel,

    pub client_info: ClientInfo,

    pub protocol_version: String,

    pub health: HealthConfig,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Streaming,
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            server_command: Vec::new(),
            timeout: Duration::from_secs(30),
            tool_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            cache_ttl: Duration::from_secs(30),
            log_level: LogLevel::Info,
            client_info: ClientInfo::default(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            health: HealthConfig::default(),
        }
    }
}

fn parse_seconds(key: &str, raw: &str) -> Result<Duration> {
    let secs: f64 = raw.trim().parse().map_err(|_| {
        McpError::Configuration(format!("{} must be a number of seconds, got '{}'", key, raw))
    })?;
    Duration::try_from_secs_f64(secs)
        .map_err(|_| McpError::Configuration(format!("{} must be non-negative, got '{}'", key, raw)))
}

fn parse_count(key: &str, raw: &str) -> Result<u32> {
    raw.trim().parse().map_err(|_| {
        McpError::Configuration(format!("{} must be a non-negative integer, got '{}'", key, raw))
    })
}

impl AdapterConfig {
    /// Load configuration from process environment variables
    ///
    /// # Errors
    ///
    /// Returns `McpError::Configuration` for unsupported transports,
    /// unparsable or non-positive durations, unknown log levels, or a
    /// stdio transport without `MCP_SERVER_COMMAND`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(raw) = get("MCP_TRANSPORT") {
            config.transport = raw.parse()?;
        }
        if let Some(url) = get("MCP_GATEWAY_URL") {
            config.gateway_url = url.trim().to_string();
        }
        if let Some(command) = get("MCP_SERVER_COMMAND") {
            config.server_command = command.split_whitespace().map(str::to_string).collect();
        }
        if let Some(raw) = get("MCP_TIMEOUT") {
            config.timeout = parse_seconds("MCP_TIMEOUT", &raw)?;
        }
        config.tool_timeout = match get("MCP_TOOL_TIMEOUT") {
            Some(raw) => parse_seconds("MCP_TOOL_TIMEOUT", &raw)?,
            None => config.timeout,
        };
        if let Some(raw) = get("MCP_MAX_RETRIES") {
            config.max_retries = parse_count("MCP_MAX_RETRIES", &raw)?;
        }
        if let Some(raw) = get("MCP_RETRY_DELAY") {
            config.retry_delay = parse_seconds("MCP_RETRY_DELAY", &raw)?;
        }
        if let Some(raw) = get("MCP_CACHE_TTL") {
            config.cache_ttl = parse_seconds("MCP_CACHE_TTL", &raw)?;
        }
        if let Some(raw) = get("MCP_LOG_LEVEL") {
            config.log_level = raw.parse()?;
        }
        if let Some(raw) = get("MCP_HEALTH_INTERVAL") {
            config.health.interval = parse_seconds("MCP_HEALTH_INTERVAL", &raw)?;
        }
        if let Some(raw) = get("MCP_RESPONSE_CEILING") {
            config.health.response_time_ceiling = parse_seconds("MCP_RESPONSE_CEILING", &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings an adapter cannot run with
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("timeout", self.timeout),
            ("tool_timeout", self.tool_timeout),
            ("cache_ttl", self.cache_ttl),
            ("health interval", self.health.interval),
            ("response time ceiling", self.health.response_time_ceiling),
        ];
        for (name, value) in positive {
            if value.is_zero() {
                return Err(McpError::Configuration(format!("{} must be positive", name)));
            }
        }

        match self.transport {
            TransportKind::Stdio if self.server_command.is_empty() => {
                return Err(McpError::Configuration(
                    "stdio transport requires MCP_SERVER_COMMAND".into(),
                ));
            }
            TransportKind::Streaming => {
                let url = self.gateway_url.as_str();
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(McpError::Configuration(format!(
                        "gateway URL must start with http:// or https://, got '{}'",
                        url
                    )));
                }
            }
            _ => {}
        }

        if self.protocol_version.trim().is_empty() {
            return Err(McpError::Configuration("protocol version must not be empty".into()));
        }

        Ok(())
    }

    /// Protocol settings derived from this configuration
    pub fn protocol_config(&self) -> ProtocolConfig {
        ProtocolConfig {
            client_info: self.client_info.clone(),
            protocol_version: self.protocol_version.clone(),
            timeout: self.timeout,
            ..ProtocolConfig::default()
        }
    }
}
