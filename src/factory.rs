//! Adapter construction from configuration
//!
//! Configuration problems surface here, synchronously, before any adapter
//! or transport exists.

use std::sync::Arc;

use tracing::debug;

use crate::adapter::McpAdapter;
use crate::config::AdapterConfig;
use crate::error::{McpError, Result};
use crate::transport::{StdioTransport, StreamingHttpTransport, Transport, TransportFactory, TransportKind};

/// Factory producing a fresh transport of the configured kind per attempt
///
/// # Errors
/// `McpError::Configuration` for a stdio transport without a command, or for
/// the memory transport, which has no configuration-driven form.
pub fn transport_factory(config: &AdapterConfig) -> Result<TransportFactory> {
    match config.transport {
        TransportKind::Stdio => {
            let (command, args) = config.server_command.split_first().ok_or_else(|| {
                McpError::Configuration("stdio transport requires MCP_SERVER_COMMAND".into())
            })?;
            let command = command.clone();
            let args = args.to_vec();
            Ok(Arc::new(move || {
                Box::new(StdioTransport::new(command.clone(), args.clone())) as Box<dyn Transport>
            }))
        }
        TransportKind::Streaming => {
            let url = config.gateway_url.clone();
            let timeout = config.timeout;
            Ok(Arc::new(move || {
                Box::new(StreamingHttpTransport::new(url.clone(), timeout)) as Box<dyn Transport>
            }))
        }
        TransportKind::Memory => Err(McpError::Configuration(
            "memory transport must be supplied through McpAdapter::with_transport_factory".into(),
        )),
    }
}

/// Validate the configuration and build an adapter
pub fn create_adapter(config: AdapterConfig) -> Result<McpAdapter> {
    config.validate()?;
    debug!(transport = %config.transport, "Creating adapter");
    McpAdapter::new(config)
}

/// Build an adapter from `MCP_*` environment variables
pub fn create_adapter_from_env() -> Result<McpAdapter> {
    create_adapter(AdapterConfig::from_env()?)
}
