//! MCP protocol driver
//!
//! Tracks the handshake state machine
//! (Uninitialized → Initializing → Initialized → ShuttingDown → Closed) and is
//! the single pathway for id correlation, per-call timeouts and translation of
//! JSON-RPC error responses. The protocol holds no transport of its own: every
//! call borrows the transport owned by the enclosing [`crate::session::Session`].

use std::collections::HashSet;
use std::ops::{Deref, DerefMut};
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::{McpError, Result};
use crate::mcp::types::{
    error_codes, methods, Capabilities, ClientInfo, InitializeRequest, InitializeResult,
    JsonRpcRequest, JsonRpcResponse, RequestId, ServerInfo, PROTOCOL_VERSION,
};
use crate::transport::Transport;

/// Handshake lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolState {
    Uninitialized,
    Initializing,
    Initialized,
    ShuttingDown,
    Closed,
}

/// Client-side protocol settings
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    pub client_info: ClientInfo,
    pub capabilities: Capabilities,
    pub protocol_version: String,
    /// Deadline for the handshake and generic requests
    pub timeout: Duration,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            client_info: ClientInfo::default(),
            capabilities: Capabilities::client_default(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// JSON-RPC request/response driver with handshake state
#[derive(Debug)]
pub struct Protocol {
    config: ProtocolConfig,
    state: ProtocolState,
    next_id: i64,
    /// Ids given up on after a timeout; their late responses are dropped
    abandoned: HashSet<RequestId>,
    handshake: Option<InitializeResult>,
}

/// Holds the protocol in `Initializing` for the duration of a handshake and
/// reverts it to `Uninitialized` if the handshake future is dropped early
struct HandshakeGuard<'a>(&'a mut Protocol);

impl<'a> HandshakeGuard<'a> {
    fn enter(protocol: &'a mut Protocol) -> Self {
        protocol.state = ProtocolState::Initializing;
        Self(protocol)
    }
}

impl Deref for HandshakeGuard<'_> {
    type Target = Protocol;

    fn deref(&self) -> &Protocol {
        self.0
    }
}

impl DerefMut for HandshakeGuard<'_> {
    fn deref_mut(&mut self) -> &mut Protocol {
        self.0
    }
}

impl Drop for HandshakeGuard<'_> {
    fn drop(&mut self) {
        if self.0.state == ProtocolState::Initializing {
            warn!("Handshake interrupted, reverting to uninitialized");
            self.0.state = ProtocolState::Uninitialized;
            self.0.handshake = None;
        }
    }
}

impl Protocol {
    pub fn new(config: ProtocolConfig) -> Self {
        Self {
            config,
            state: ProtocolState::Uninitialized,
            next_id: 0,
            abandoned: HashSet::new(),
            handshake: None,
        }
    }

    pub fn state(&self) -> ProtocolState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.state == ProtocolState::Initialized
    }

    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    fn next_request_id(&mut self) -> RequestId {
        self.next_id += 1;
        RequestId::Number(self.next_id)
    }

    /// Run the `initialize` handshake
    ///
    /// A second call on an initialized protocol returns the cached result
    /// without touching the wire. Any failure reverts the state to
    /// `Uninitialized`.
    ///
    /// # Errors
    /// - `McpError::Handshake` if the server rejects the handshake or the
    ///   response lacks `protocolVersion` / `capabilities`
    /// - `McpError::Timeout` / `McpError::Transport` from the exchange
    pub async fn initialize(&mut self, transport: &mut dyn Transport) -> Result<InitializeResult> {
        if let (ProtocolState::Initialized, Some(cached)) = (self.state, &self.handshake) {
            debug!("Protocol already initialized, reusing handshake result");
            return Ok(cached.clone());
        }

        let mut this = HandshakeGuard::enter(self);

        let params = InitializeRequest {
            protocol_version: this.config.protocol_version.clone(),
            capabilities: this.config.capabilities.clone(),
            client_info: this.config.client_info.clone(),
        };

        let outcome = match serde_json::to_value(&params) {
            Ok(params) => this.send_request(transport, methods::INITIALIZE, Some(params)).await,
            Err(e) => Err(e.into()),
        };

        let result = outcome
            .map_err(|err| match err {
                McpError::Protocol { code, message, .. } => McpError::Handshake(format!(
                    "server rejected initialize (code {}): {}",
                    code, message
                )),
                other => other,
            })
            .and_then(InitializeResult::from_handshake);

        match result {
            Ok(handshake) => {
                if handshake.protocol_version != this.config.protocol_version {
                    warn!(
                        requested = %this.config.protocol_version,
                        negotiated = %handshake.protocol_version,
                        "Server negotiated a different protocol version"
                    );
                }
                info!(
                    protocol_version = %handshake.protocol_version,
                    server = ?handshake.server_info.as_ref().map(|s| &s.name),
                    "MCP handshake complete"
                );
                this.state = ProtocolState::Initialized;
                this.handshake = Some(handshake.clone());
                Ok(handshake)
            }
            Err(err) => {
                warn!(error = %err, "MCP handshake failed");
                this.state = ProtocolState::Uninitialized;
                this.handshake = None;
                Err(err)
            }
        }
    }

    /// Send a request with the configured timeout and return its `result`
    ///
    /// Does not require a completed handshake.
    pub async fn send_request(
        &mut self,
        transport: &mut dyn Transport,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value> {
        let timeout = self.config.timeout;
        self.send_request_with_timeout(transport, method, params, timeout)
            .await
    }

    /// Send a request with an explicit deadline
    ///
    /// # Errors
    /// - `McpError::Timeout` carrying the method and deadline; the id is
    ///   remembered so a late answer is discarded rather than mismatched
    /// - `McpError::Protocol` on an id mismatch or a server-reported error
    pub async fn send_request_with_timeout(
        &mut self,
        transport: &mut dyn Transport,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        let id = self.next_request_id();
        let request = JsonRpcRequest::new(id.clone(), method, params);

        debug!(method = %method, request_id = %id, "Sending request");

        let outcome = tokio::time::timeout(timeout, self.exchange(transport, &request)).await;
        match outcome {
            Ok(result) => result,
            Err(_) => {
                warn!(method = %method, request_id = %id, ?timeout, "Request timed out");
                self.abandoned.insert(id);
                Err(McpError::Timeout {
                    operation: method.to_string(),
                    timeout,
                })
            }
        }
    }

    async fn exchange(&mut self, transport: &mut dyn Transport, request: &JsonRpcRequest) -> Result<Value> {
        let method = request.method.as_str();
        transport.send_message(&request.to_value()?).await?;

        loop {
            let message = transport.receive_message().await?;

            if message.get("method").is_some()
                && message.get("result").is_none()
                && message.get("error").is_none()
            {
                debug!(
                    server_method = ?message.get("method"),
                    "Skipping server-initiated message while awaiting response"
                );
                continue;
            }

            let response = JsonRpcResponse::from_value(message).map_err(|err| match err {
                McpError::Protocol { code, message, .. } => McpError::protocol(method, code, message),
                other => other,
            })?;

            if response.id != request.id {
                if let Some(stale) = &response.id {
                    if self.abandoned.remove(stale) {
                        debug!(request_id = %stale, "Discarding late response for abandoned request");
                        continue;
                    }
                }
                return Err(McpError::protocol(
                    method,
                    error_codes::PROTOCOL_FAILED,
                    format!(
                        "response id {:?} does not match request id {:?}",
                        response.id, request.id
                    ),
                ));
            }

            if let Some(error) = response.error {
                return Err(McpError::protocol(method, error.code, error.message));
            }

            return Ok(response.result.unwrap_or(Value::Null));
        }
    }

    /// Best-effort `shutdown` notification, then reset to `Uninitialized`
    pub async fn shutdown(&mut self, transport: &mut dyn Transport) {
        self.state = ProtocolState::ShuttingDown;

        if transport.is_connected() {
            let notification = JsonRpcRequest::notification(methods::SHUTDOWN, None);
            match notification.to_value() {
                Ok(message) => {
                    if let Err(e) = transport.send_message(&message).await {
                        debug!(error = %e, "Shutdown notification not delivered");
                    }
                }
                Err(e) => debug!(error = %e, "Failed to encode shutdown notification"),
            }
        }

        self.reset();
    }

    /// Mark the protocol closed after its transport has been torn down
    pub fn close(&mut self) {
        self.reset();
        self.state = ProtocolState::Closed;
    }

    fn reset(&mut self) {
        self.state = ProtocolState::Uninitialized;
        self.handshake = None;
        self.abandoned.clear();
    }

    /// Handshake result, once initialized
    pub fn handshake(&self) -> Option<&InitializeResult> {
        self.handshake.as_ref()
    }

    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.handshake.as_ref().and_then(|h| h.server_info.as_ref())
    }

    pub fn server_capabilities(&self) -> Option<&Capabilities> {
        self.handshake.as_ref().map(|h| &h.capabilities)
    }

    pub fn has_capability(&self, name: &str) -> bool {
        self.server_capabilities().map(|c| c.has(name)).unwrap_or(false)
    }

    pub fn get_capability_details(&self, name: &str) -> Option<Map<String, Value>> {
        self.server_capabilities().and_then(|c| c.get(name)).cloned()
    }
}
