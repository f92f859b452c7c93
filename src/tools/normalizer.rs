//! Tool result normalization
//!
//! Turns the raw `tools/call` result (a list of typed content blocks plus an
//! optional `isError` flag) into one uniform [`ToolCallResult`].

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{McpError, Result};
use crate::mcp::types::{error_codes, methods};

/// Fallback error text when a failed call carries no readable content
pub const DEFAULT_ERROR_MESSAGE: &str = "Tool execution failed";

/// Resource embedded in a `resource` block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedResource {
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
}

/// One typed unit of a tool-call result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    /// Either `{resource: {uri, text, ..}}` or the flat `{uri, text, ..}` form
    Resource {
        #[serde(default)]
        resource: Option<EmbeddedResource>,
        #[serde(default)]
        uri: Option<String>,
        #[serde(default)]
        text: Option<String>,
        #[serde(default, rename = "mimeType")]
        mime_type: Option<String>,
        #[serde(default)]
        blob: Option<String>,
    },
    Error {
        message: String,
        #[serde(default)]
        code: Option<i64>,
    },
    Image {
        #[serde(default)]
        data: String,
        #[serde(default, rename = "mimeType")]
        mime_type: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

impl ContentBlock {
    /// Decode one block; anything unrecognizable becomes `Unknown`
    pub fn from_value(value: &Value) -> Self {
        match serde_json::from_value(value.clone()) {
            Ok(block) => block,
            Err(e) => {
                debug!(error = %e, "Treating malformed content block as unknown");
                ContentBlock::Unknown
            }
        }
    }

    /// Human-readable text carried by this block, if any
    pub fn text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text } => Some(text),
            ContentBlock::Resource { resource, text, .. } => resource
                .as_ref()
                .and_then(|r| r.text.as_deref())
                .or(text.as_deref()),
            _ => None,
        }
    }
}

/// Normalized outcome of a tool call
///
/// `success` is false exactly when `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ToolCallResult {
    pub success: bool,
    pub content: String,
    pub error: Option<String>,
    #[serde(default)]
    pub raw_content: Vec<Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ToolCallResult {
    /// A failed result carrying only an error message
    pub fn failure(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            content: String::new(),
            error: Some(error),
            raw_content: Vec::new(),
            metadata: Map::new(),
        }
    }
}

/// Structural check on a raw `tools/call` result
///
/// # Errors
/// `McpError::Protocol` for `tools/call` when the result is not an object or
/// its `content` is missing or not a list.
pub fn validate_tool_response(raw: &Value) -> Result<()> {
    let malformed = |message: &str| {
        McpError::protocol(methods::TOOLS_CALL, error_codes::PROTOCOL_FAILED, message)
    };

    let object = raw
        .as_object()
        .ok_or_else(|| malformed("tool result must be an object"))?;
    match object.get("content") {
        Some(Value::Array(_)) => Ok(()),
        Some(_) => Err(malformed("tool result content must be a list")),
        None => Err(malformed("tool result is missing content")),
    }
}

fn content_values(raw: &Value) -> &[Value] {
    raw.get("content")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Concatenate every text-bearing block, newline separated, in order
pub fn extract_text(raw: &Value) -> String {
    content_values(raw)
        .iter()
        .map(ContentBlock::from_value)
        .filter_map(|block| block.text().map(str::to_string))
        .collect::<Vec<_>>()
        .join("\n")
}

/// `isError` flag; absence means success
pub fn is_error(raw: &Value) -> bool {
    raw.get("isError").and_then(Value::as_bool).unwrap_or(false)
}

/// Error text for a failed result
///
/// Prefers the first `error` block's message, then the extracted text.
/// Returns `None` for successful results.
pub fn extract_error_details(raw: &Value) -> Option<String> {
    let blocks: Vec<ContentBlock> = content_values(raw).iter().map(ContentBlock::from_value).collect();

    if let Some(message) = blocks.iter().find_map(|b| match b {
        ContentBlock::Error { message, .. } => Some(message.clone()),
        _ => None,
    }) {
        return Some(message);
    }

    if !is_error(raw) {
        return None;
    }

    let text = extract_text(raw);
    if text.is_empty() {
        Some(DEFAULT_ERROR_MESSAGE.to_string())
    } else {
        Some(text)
    }
}

/// Normalize a raw `tools/call` result
///
/// # Errors
/// Whatever [`validate_tool_response`] rejects.
pub fn normalize(raw: &Value) -> Result<ToolCallResult> {
    validate_tool_response(raw)?;

    let content = extract_text(raw);
    let failed = is_error(raw);
    let error = if failed {
        Some(extract_error_details(raw).unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_string()))
    } else {
        None
    };

    let mut metadata = Map::new();
    if let Some(object) = raw.as_object() {
        for (key, value) in object {
            if key != "content" && key != "isError" {
                metadata.insert(key.clone(), value.clone());
            }
        }
    }

    Ok(ToolCallResult {
        success: !failed,
        content,
        error,
        raw_content: content_values(raw).to_vec(),
        metadata,
    })
}
