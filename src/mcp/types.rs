//! JSON-RPC 2.0 and MCP handshake message structures
//!
//! Implements the client side of the wire shapes:
//! - Request: { jsonrpc: "2.0", id, method, params? }
//! - Response: { jsonrpc: "2.0", id, result } OR { jsonrpc: "2.0", id, error }
//! - Notification: { jsonrpc: "2.0", method, params? } (no id)
//!
//! Values here are built per call and dropped right after use.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{McpError, Result};

pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol revision this client speaks during `initialize`
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC error codes
///
/// The protocol-specific block (-32000..=-32002) never overlaps the
/// standard range (-32700..=-32603).
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    pub const HANDSHAKE_FAILED: i32 = -32000;
    pub const TRANSPORT_FAILED: i32 = -32001;
    pub const PROTOCOL_FAILED: i32 = -32002;
}

/// Method names used by the client
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
    pub const SHUTDOWN: &str = "shutdown";
}

/// JSON-RPC request id (number or string)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    Str(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        RequestId::Number(value)
    }
}

/// JSON-RPC 2.0 request message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,

    /// Request ID (absent for notifications)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,

    /// Method name (e.g., "initialize", "tools/list", "tools/call")
    pub method: String,

    /// Method parameters (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id.into()),
            method: method.into(),
            params,
        }
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: method.into(),
            params,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// JSON-RPC 2.0 response message
///
/// Exactly one of `result` / `error` is present. `result` may legitimately
/// be JSON `null`, so presence is tracked separately from the value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,

    pub id: Option<RequestId>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<RequestId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Decode a raw message body into a response
    ///
    /// # Errors
    /// Returns `McpError::Protocol` if both or neither of `result` and
    /// `error` are present, or if the id is not a number/string/null.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut map) = value else {
            return Err(McpError::protocol(
                "",
                error_codes::INVALID_REQUEST,
                "response is not a JSON object",
            ));
        };

        let id = match map.remove("id") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(serde_json::from_value::<RequestId>(raw).map_err(|_| {
                McpError::protocol("", error_codes::INVALID_REQUEST, "response id must be a number or string")
            })?),
        };

        let result = map.remove("result");
        let error = match map.remove("error") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(serde_json::from_value::<JsonRpcError>(raw).map_err(|e| {
                McpError::protocol("", error_codes::INVALID_REQUEST, format!("malformed error object: {}", e))
            })?),
        };

        match (&result, &error) {
            (Some(_), Some(_)) => Err(McpError::protocol(
                "",
                error_codes::INVALID_REQUEST,
                "response carries both result and error",
            )),
            (None, None) => Err(McpError::protocol(
                "",
                error_codes::INVALID_REQUEST,
                "response carries neither result nor error",
            )),
            _ => Ok(Self {
                jsonrpc: map
                    .remove("jsonrpc")
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_else(|| JSONRPC_VERSION.to_string()),
                id,
                result,
                error,
            }),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,

    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(code: i32, message: impl Into<String>, data: Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(error_codes::METHOD_NOT_FOUND, format!("Method not found: {}", method))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(error_codes::INVALID_PARAMS, message)
    }
}

/// Client identity sent during the handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Server identity returned from the handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

/// Capability map exchanged during the handshake
///
/// Each field is a free-form map of sub-capability flags
/// (e.g. `tools.listChanged`). Absent fields are omitted, never `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roots: Option<Map<String, Value>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling: Option<Map<String, Value>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Map<String, Value>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<Map<String, Value>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<Map<String, Value>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<Map<String, Value>>,
}

impl Capabilities {
    /// Capabilities a tool-calling client advertises by default
    pub fn client_default() -> Self {
        let mut roots = Map::new();
        roots.insert("listChanged".to_string(), Value::Bool(false));
        Self {
            roots: Some(roots),
            sampling: Some(Map::new()),
            ..Default::default()
        }
    }

    /// Sub-capability map for a named capability, if advertised
    pub fn get(&self, name: &str) -> Option<&Map<String, Value>> {
        match name {
            "roots" => self.roots.as_ref(),
            "sampling" => self.sampling.as_ref(),
            "tools" => self.tools.as_ref(),
            "resources" => self.resources.as_ref(),
            "prompts" => self.prompts.as_ref(),
            "logging" => self.logging.as_ref(),
            _ => None,
        }
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

/// Parameters of the `initialize` request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequest {
    pub protocol_version: String,
    pub capabilities: Capabilities,
    pub client_info: ClientInfo,
}

/// Result of the `initialize` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,

    pub capabilities: Capabilities,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_info: Option<ServerInfo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

impl InitializeResult {
    /// Decode a handshake result, rejecting responses that lack
    /// `protocolVersion` or `capabilities`
    ///
    /// # Errors
    /// Returns `McpError::Handshake` naming the missing or malformed field.
    pub fn from_handshake(result: Value) -> Result<Self> {
        match result.get("protocolVersion") {
            Some(Value::String(_)) => {}
            Some(_) => return Err(McpError::Handshake("protocolVersion must be a string".into())),
            None => {
                return Err(McpError::Handshake(
                    "initialize response is missing protocolVersion".into(),
                ))
            }
        }
        match result.get("capabilities") {
            Some(Value::Object(_)) => {}
            Some(_) => return Err(McpError::Handshake("capabilities must be an object".into())),
            None => {
                return Err(McpError::Handshake(
                    "initialize response is missing capabilities".into(),
                ))
            }
        }

        serde_json::from_value(result)
            .map_err(|e| McpError::Handshake(format!("malformed initialize response: {}", e)))
    }
}

/// Server-advertised tool metadata
///
/// `name` is the lookup key within one discovery snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }

    /// Build a descriptor whose schema is derived from a parameter type
    pub fn for_params<T: JsonSchema>(name: impl Into<String>, description: impl Into<String>) -> Self {
        let schema = schemars::schema_for!(T);
        let input_schema = serde_json::to_value(&schema).unwrap_or_else(|_| empty_object_schema());
        Self::new(name, description, input_schema)
    }

    /// Names listed under `inputSchema.required`
    pub fn required_parameters(&self) -> Vec<&str> {
        self.input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

/// Result of `tools/list`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsListResult {
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Parameters of `tools/call`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    pub arguments: Value,
}
