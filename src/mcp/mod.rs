//! Model Context Protocol message model
//!
//! Pure data shapes for JSON-RPC framing, the `initialize` handshake and
//! tool discovery. No behavior beyond (de)serialization and shape checks.

pub mod types;

pub use types::{
    error_codes, methods, Capabilities, ClientInfo, InitializeRequest, InitializeResult,
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestId, ServerInfo, ToolCallParams,
    ToolDescriptor, ToolsListResult, PROTOCOL_VERSION,
};
