//! Streaming HTTP transport
//!
//! Posts JSON-RPC bodies to the gateway's method endpoints:
//! - `initialize` → POST {base}/mcp/initialize
//! - `tools/list` → POST {base}/mcp/tools/list
//! - `tools/call` → POST {base}/mcp/tools/call
//! - anything else → POST {base}/mcp
//!
//! Responses are either a single JSON body or a `text/event-stream` body
//! whose `data:` events each carry one message. Decoded messages are queued
//! and handed out by `receive_message`. The `Mcp-Session-Id` header returned
//! by the gateway is replayed on every later request.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{Transport, TransportKind};
use crate::error::{McpError, Result};
use crate::mcp::methods;

pub const SESSION_HEADER: &str = "mcp-session-id";

/// HTTP transport with per-method endpoints and session affinity
pub struct StreamingHttpTransport {
    base_url: String,
    timeout: Duration,
    client: Option<Client>,
    session_id: Option<String>,
    pending: VecDeque<Value>,
}

impl StreamingHttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            client: None,
            session_id: None,
            pending: VecDeque::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Session id issued by the gateway, once one has been seen
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Endpoint URL for a JSON-RPC method
    pub fn endpoint_for(&self, method: &str) -> String {
        match method {
            methods::INITIALIZE => format!("{}/mcp/initialize", self.base_url),
            methods::TOOLS_LIST => format!("{}/mcp/tools/list", self.base_url),
            methods::TOOLS_CALL => format!("{}/mcp/tools/call", self.base_url),
            _ => format!("{}/mcp", self.base_url),
        }
    }

    fn enqueue_body(&mut self, body: &str, is_event_stream: bool) -> Result<()> {
        if is_event_stream {
            for message in parse_event_stream(body)? {
                self.pending.push_back(message);
            }
        } else if !body.trim().is_empty() {
            self.pending.push_back(serde_json::from_str(body)?);
        }
        Ok(())
    }
}

/// Split an SSE body into its `data:` payloads
///
/// Multi-line `data:` fields of one event are joined with newlines, events
/// are separated by a blank line, and other fields are ignored.
pub(crate) fn parse_event_stream(body: &str) -> Result<Vec<Value>> {
    let mut messages = Vec::new();
    let mut data: Vec<&str> = Vec::new();

    let mut flush = |data: &mut Vec<&str>| -> Result<()> {
        if !data.is_empty() {
            let joined = data.join("\n");
            data.clear();
            if !joined.trim().is_empty() {
                messages.push(serde_json::from_str(&joined)?);
            }
        }
        Ok(())
    };

    for line in body.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            flush(&mut data)?;
        } else if let Some(rest) = line.strip_prefix("data:") {
            data.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    flush(&mut data)?;

    Ok(messages)
}

#[async_trait]
impl Transport for StreamingHttpTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.client.is_some() {
            return Ok(());
        }

        // No whole-request timeout: per-call deadlines belong to the protocol,
        // and `tools/call` may legitimately outlive `timeout`.
        let client = Client::builder()
            .connect_timeout(self.timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| McpError::Connection(format!("Failed to build HTTP client: {}", e)))?;

        // Any HTTP answer proves the gateway is reachable; only a network
        // level failure means the channel could not be established.
        match tokio::time::timeout(self.timeout, client.get(&self.base_url).send()).await {
            Ok(Ok(resp)) => {
                debug!(url = %self.base_url, status = %resp.status(), "Gateway reachable");
            }
            Ok(Err(e)) => {
                return Err(McpError::Connection(format!(
                    "Failed to reach gateway at {}: {}",
                    self.base_url, e
                )));
            }
            Err(_) => {
                return Err(McpError::Connection(format!(
                    "Gateway at {} did not answer within {:?}",
                    self.base_url, self.timeout
                )));
            }
        }

        info!(url = %self.base_url, "Connected to streaming gateway");
        self.client = Some(client);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if self.client.take().is_some() {
            debug!(url = %self.base_url, "Closing streaming gateway client");
        }
        self.session_id = None;
        self.pending.clear();
    }

    async fn send_message(&mut self, message: &Value) -> Result<()> {
        let client = self
            .client
            .clone()
            .ok_or_else(|| McpError::Transport("streaming transport is not connected".into()))?;

        let method = message.get("method").and_then(Value::as_str).unwrap_or_default();
        let url = self.endpoint_for(method);

        let mut request = client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .header("accept", "application/json, text/event-stream")
            .json(message);
        if let Some(session_id) = &self.session_id {
            request = request.header(SESSION_HEADER, session_id);
        }

        debug!(url = %url, method = %method, "POST to gateway");
        let response = request.send().await.map_err(|e| {
            McpError::Transport(format!("Failed sending {} to {}: {}", method, url, e))
        })?;

        if let Some(session_id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            if self.session_id.as_deref() != Some(session_id) {
                debug!(session_id = %session_id, "Gateway assigned session");
                self.session_id = Some(session_id.to_string());
            }
        }

        let status = response.status();
        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .map(|v: &HeaderValue| v.as_bytes().starts_with(b"text/event-stream"))
            .unwrap_or(false);
        let body = response.text().await?;

        if status == StatusCode::ACCEPTED || status == StatusCode::NO_CONTENT {
            return Ok(());
        }

        if !status.is_success() {
            // Gateways report JSON-RPC errors with 4xx/5xx statuses; keep
            // those for the protocol layer and fail only on opaque bodies.
            if let Ok(value) = serde_json::from_str::<Value>(&body) {
                if value.get("error").is_some() {
                    self.pending.push_back(value);
                    return Ok(());
                }
            }
            warn!(url = %url, %status, "Gateway rejected request");
            return Err(McpError::Transport(format!(
                "Gateway returned HTTP {} for {}",
                status, method
            )));
        }

        self.enqueue_body(&body, is_event_stream)
    }

    async fn receive_message(&mut self) -> Result<Value> {
        if self.client.is_none() {
            return Err(McpError::Transport("streaming transport is not connected".into()));
        }
        self.pending
            .pop_front()
            .ok_or_else(|| McpError::Transport("No response pending from gateway".into()))
    }

    fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Streaming
    }
}
