use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::mcp::types::error_codes;

/// Main error type for the MCP gateway client
///
/// Every variant carries enough context to be logged or surfaced without
/// parsing the message text.
#[derive(Error, Debug)]
pub enum McpError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Handshake error: {0}")]
    Handshake(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error in '{method}' (code {code}): {message}")]
    Protocol {
        method: String,
        code: i32,
        message: String,
    },

    #[error("Timeout: '{operation}' did not complete within {timeout:?}")]
    Timeout { operation: String, timeout: Duration },

    #[error("Tool execution error ({tool_name}): {message}")]
    ToolExecution {
        message: String,
        tool_name: String,
        details: Value,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Connection failed after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<McpError>,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl McpError {
    /// Build a protocol error for a failed method
    pub fn protocol(method: impl Into<String>, code: i32, message: impl Into<String>) -> Self {
        McpError::Protocol {
            method: method.into(),
            code,
            message: message.into(),
        }
    }

    /// Build a tool execution error with no extra payload
    pub fn tool(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        McpError::ToolExecution {
            message: message.into(),
            tool_name: tool_name.into(),
            details: Value::Null,
        }
    }

    /// Build a tool execution error carrying a structured payload
    pub fn tool_with_details(
        tool_name: impl Into<String>,
        message: impl Into<String>,
        details: Value,
    ) -> Self {
        McpError::ToolExecution {
            message: message.into(),
            tool_name: tool_name.into(),
            details,
        }
    }

    /// Whether the adapter's connect loop may try again after this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            McpError::Connection(_) | McpError::Transport(_) | McpError::Timeout { .. }
        )
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            McpError::Connection(_) => "connection_error",
            McpError::Handshake(_) => "handshake_error",
            McpError::Transport(_) => "transport_error",
            McpError::Protocol { .. } => "protocol_error",
            McpError::Timeout { .. } => "timeout",
            McpError::ToolExecution { .. } => "tool_execution_error",
            McpError::Configuration(_) => "configuration_error",
            McpError::NotConnected => "not_connected",
            McpError::RetriesExhausted { .. } => "retries_exhausted",
            McpError::Serialization(_) => "serialization_error",
        }
    }

    /// JSON-RPC error code for this error kind
    ///
    /// Server-reported protocol errors keep the code the server sent.
    pub fn code(&self) -> i32 {
        match self {
            McpError::Handshake(_) => error_codes::HANDSHAKE_FAILED,
            McpError::Connection(_)
            | McpError::Transport(_)
            | McpError::Timeout { .. }
            | McpError::NotConnected => error_codes::TRANSPORT_FAILED,
            McpError::RetriesExhausted { source, .. } => source.code(),
            McpError::Protocol { code, .. } => *code,
            McpError::ToolExecution { .. } => error_codes::INTERNAL_ERROR,
            McpError::Configuration(_) => error_codes::INVALID_PARAMS,
            McpError::Serialization(_) => error_codes::PARSE_ERROR,
        }
    }
}

/// Failures of an established HTTP exchange; connect-time failures are
/// mapped to `Connection` by the transport itself
impl From<reqwest::Error> for McpError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            McpError::Transport(format!("Failed to reach gateway: {}", err))
        } else if err.is_timeout() {
            McpError::Transport(format!("HTTP request timed out: {}", err))
        } else if let Some(status) = err.status() {
            McpError::Transport(format!("Gateway returned HTTP {}", status))
        } else {
            McpError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for McpError {
    fn from(err: serde_json::Error) -> Self {
        McpError::Serialization(format!("JSON processing failed: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, McpError>;
