// Library exports for mcp-gateway-client

pub mod error;
pub mod mcp; // Message model

pub mod protocol; // Handshake state machine and request correlation
pub mod session;
pub mod transport; // Stdio, streaming HTTP and in-memory channels

pub mod health;
pub mod tools; // Discovery cache, validation, execution, normalization

pub mod adapter; // Facade composing everything above
pub mod bridge;
pub mod config;
pub mod factory;
pub mod logging;

pub use adapter::McpAdapter;
pub use bridge::{BridgedTool, ToolBridge};
pub use config::{AdapterConfig, LogLevel};
pub use error::{McpError, Result};
pub use factory::{create_adapter, create_adapter_from_env};
pub use health::{HealthCheckResult, HealthStatus, MetricSnapshot};
pub use tools::{ToolCallResult, ToolMap};
pub use transport::{Transport, TransportKind};
