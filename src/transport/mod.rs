//! MCP transport layer
//!
//! Provides interchangeable channels to a tool gateway:
//! - Stdio: spawn the gateway as a subprocess, line-delimited JSON on its pipes
//! - Streaming: JSON (or SSE) bodies over a persistent HTTP client
//! - Memory: in-process scripted gateway for tests and offline development
//!
//! Transports own wire framing only. JSON-RPC semantics live in
//! [`crate::protocol`].

pub mod http;
pub mod memory;
pub mod stdio;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{McpError, Result};

pub use http::StreamingHttpTransport;
pub use memory::{MemoryTransport, Reply, TransportStats};
pub use stdio::StdioTransport;

/// A bidirectional message channel to a tool gateway
///
/// Implementations must satisfy identical contracts so the protocol layer
/// never needs to know which one it is talking to.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish the underlying channel
    ///
    /// # Errors
    /// `McpError::Connection` on any failure to establish it.
    async fn connect(&mut self) -> Result<()>;

    /// Tear the channel down. Idempotent; cleanup failures are logged.
    async fn disconnect(&mut self);

    /// Send one already-built message body
    async fn send_message(&mut self, message: &Value) -> Result<()>;

    /// Receive the next message body
    ///
    /// Must be cancel-safe: dropping the future before it resolves may not
    /// lose a message that was already framed.
    async fn receive_message(&mut self) -> Result<Value>;

    fn is_connected(&self) -> bool;

    fn kind(&self) -> TransportKind;
}

/// Builds a fresh, unconnected transport for each connection attempt
pub type TransportFactory = Arc<dyn Fn() -> Box<dyn Transport> + Send + Sync>;

/// Transport selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    /// Subprocess with piped standard I/O
    Stdio,

    /// HTTP request/response bodies, optionally server-sent events
    #[default]
    Streaming,

    /// In-process scripted gateway
    Memory,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Stdio => "stdio",
            TransportKind::Streaming => "streaming",
            TransportKind::Memory => "memory",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = McpError;

    /// Only the externally configurable transports parse; `memory` is
    /// constructed programmatically.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stdio" => Ok(TransportKind::Stdio),
            "streaming" | "http" => Ok(TransportKind::Streaming),
            other => Err(McpError::Configuration(format!(
                "Unsupported transport '{}': expected 'stdio' or 'streaming'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_kind_parsing() {
        assert_eq!("stdio".parse::<TransportKind>().unwrap(), TransportKind::Stdio);
        assert_eq!(" Streaming ".parse::<TransportKind>().unwrap(), TransportKind::Streaming);
        assert_eq!("http".parse::<TransportKind>().unwrap(), TransportKind::Streaming);

        assert!(matches!(
            "websocket".parse::<TransportKind>(),
            Err(McpError::Configuration(_))
        ));
        assert!("memory".parse::<TransportKind>().is_err());
    }

    #[test]
    fn test_default_kind() {
        assert_eq!(TransportKind::default(), TransportKind::Streaming);
        assert_eq!(TransportKind::Stdio.to_string(), "stdio");
    }
}
