//! Scoped pairing of one transport with one negotiated protocol
//!
//! Opening a session connects the transport and runs the handshake; if either
//! step fails the transport is disconnected before the error propagates.
//! Closing always sends the shutdown notification first and disconnects
//! second. A session dropped while still open (e.g. a cancelled task) hands
//! its protocol and transport to a background task that performs the same
//! shutdown-then-disconnect sequence.

use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{McpError, Result};
use crate::mcp::types::{Capabilities, InitializeResult, ServerInfo};
use crate::protocol::{Protocol, ProtocolConfig, ProtocolState};
use crate::transport::{Transport, TransportKind};

/// Session slot shared by the adapter, its tool manager and the health probe
///
/// `None` while disconnected. Holding the lock serializes wire calls, which
/// keeps exactly one request outstanding per session.
pub type SharedSession = Arc<Mutex<Option<Session>>>;

/// An open, initialized connection to a tool gateway
pub struct Session {
    id: Uuid,
    transport: Option<Box<dyn Transport>>,
    protocol: Protocol,
}

impl Session {
    /// Connect the transport and run the handshake
    ///
    /// # Errors
    /// The first failure from `connect` or `initialize`; nothing is left open.
    pub async fn open(mut transport: Box<dyn Transport>, mut protocol: Protocol) -> Result<Self> {
        let id = Uuid::new_v4();
        let kind = transport.kind();
        debug!(session_id = %id, transport = %kind, "Opening session");

        if let Err(err) = transport.connect().await {
            // A transport may have opened partially before failing.
            transport.disconnect().await;
            return Err(err);
        }

        if let Err(err) = protocol.initialize(transport.as_mut()).await {
            transport.disconnect().await;
            return Err(err);
        }

        info!(session_id = %id, transport = %kind, "Session established");
        Ok(Self {
            id,
            transport: Some(transport),
            protocol,
        })
    }

    /// Open a session, run `body` with it, and close it on every exit path
    ///
    /// The body's own error wins over any teardown problem.
    pub async fn scoped<T, F>(transport: Box<dyn Transport>, protocol: Protocol, body: F) -> Result<T>
    where
        F: for<'s> FnOnce(&'s mut Session) -> BoxFuture<'s, Result<T>>,
    {
        let mut session = Self::open(transport, protocol).await?;
        let outcome = body(&mut session).await;
        session.close().await;
        outcome
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether the scope is open and its transport still connected
    pub fn is_active(&self) -> bool {
        self.transport
            .as_ref()
            .map(|t| t.is_connected())
            .unwrap_or(false)
    }

    pub fn transport_kind(&self) -> Option<TransportKind> {
        self.transport.as_ref().map(|t| t.kind())
    }

    pub fn protocol_state(&self) -> ProtocolState {
        self.protocol.state()
    }

    pub async fn send_request(&mut self, method: &str, params: Option<Value>) -> Result<Value> {
        let Self { transport, protocol, .. } = self;
        let transport = transport.as_deref_mut().ok_or(McpError::NotConnected)?;
        protocol.send_request(transport, method, params).await
    }

    pub async fn send_request_with_timeout(
        &mut self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        let Self { transport, protocol, .. } = self;
        let transport = transport.as_deref_mut().ok_or(McpError::NotConnected)?;
        protocol
            .send_request_with_timeout(transport, method, params, timeout)
            .await
    }

    pub fn handshake(&self) -> Option<&InitializeResult> {
        self.protocol.handshake()
    }

    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.protocol.server_info()
    }

    pub fn server_capabilities(&self) -> Option<&Capabilities> {
        self.protocol.server_capabilities()
    }

    pub fn has_capability(&self, name: &str) -> bool {
        self.protocol.has_capability(name)
    }

    pub fn get_capability_details(&self, name: &str) -> Option<Map<String, Value>> {
        self.protocol.get_capability_details(name)
    }

    /// Shut the protocol down, then disconnect the transport
    ///
    /// Shutdown problems are logged and never mask the caller's outcome.
    pub async fn close(mut self) {
        self.teardown().await;
    }

    async fn teardown(&mut self) {
        let Some(mut transport) = self.transport.take() else {
            return;
        };
        self.protocol.shutdown(transport.as_mut()).await;
        transport.disconnect().await;
        self.protocol.close();
        debug!(session_id = %self.id, "Session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let Some(mut transport) = self.transport.take() else {
            return;
        };
        warn!(session_id = %self.id, "Session dropped while open, closing in background");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let mut protocol =
                    std::mem::replace(&mut self.protocol, Protocol::new(ProtocolConfig::default()));
                handle.spawn(async move {
                    protocol.shutdown(transport.as_mut()).await;
                    transport.disconnect().await;
                    protocol.close();
                });
            }
            Err(_) => {
                warn!(session_id = %self.id, "No runtime available to disconnect transport");
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("transport", &self.transport_kind())
            .field("state", &self.protocol.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::PROTOCOL_VERSION;
    use crate::transport::{MemoryTransport, Reply};
    use futures::FutureExt;
    use serde_json::json;

    fn gateway() -> MemoryTransport {
        MemoryTransport::new(|msg| match msg["method"].as_str() {
            Some("initialize") => Reply::result(
                msg,
                json!({"protocolVersion": PROTOCOL_VERSION, "capabilities": {"tools": {}}}),
            ),
            Some("tools/list") => Reply::result(msg, json!({"tools": []})),
            _ => Reply::Silent,
        })
    }

    #[tokio::test]
    async fn test_open_and_close_order() {
        let transport = gateway();
        let stats = transport.stats();

        let mut session = Session::open(Box::new(transport), Protocol::new(ProtocolConfig::default()))
            .await
            .unwrap();
        assert!(session.is_active());
        assert!(session.has_capability("tools"));
        assert_eq!(session.protocol_state(), ProtocolState::Initialized);

        let tools = session.send_request("tools/list", None).await.unwrap();
        assert_eq!(tools, json!({"tools": []}));

        session.close().await;

        let methods: Vec<String> = stats
            .sent()
            .iter()
            .filter_map(|m| m["method"].as_str().map(str::to_string))
            .collect();
        assert_eq!(methods, vec!["initialize", "tools/list", "shutdown"]);
        assert_eq!(stats.disconnect_calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_handshake_disconnects() {
        let transport = MemoryTransport::new(|msg| Reply::result(msg, json!({})));
        let stats = transport.stats();

        let err = Session::open(Box::new(transport), Protocol::new(ProtocolConfig::default()))
            .await
            .unwrap_err();

        assert!(matches!(err, McpError::Handshake(_)));
        assert_eq!(stats.connect_calls(), 1);
        assert_eq!(stats.disconnect_calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_connect_propagates() {
        let transport = gateway();
        let stats = transport.stats();
        stats.fail_first_connects(1);

        let err = Session::open(Box::new(transport), Protocol::new(ProtocolConfig::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Connection(_)));
        assert_eq!(stats.count_method("initialize"), 0);
    }

    #[tokio::test]
    async fn test_scoped_closes_on_error() {
        let transport = gateway();
        let stats = transport.stats();

        let result: Result<()> = Session::scoped(
            Box::new(transport),
            Protocol::new(ProtocolConfig::default()),
            |session| {
                async move {
                    assert!(session.is_active());
                    Err(McpError::tool("search", "boom"))
                }
                .boxed()
            },
        )
        .await;

        assert!(matches!(result, Err(McpError::ToolExecution { .. })));
        assert_eq!(stats.count_method("shutdown"), 1);
        assert_eq!(stats.disconnect_calls(), 1);
    }

    #[tokio::test]
    async fn test_dropped_session_disconnects_in_background() {
        let transport = gateway();
        let stats = transport.stats();

        let session = Session::open(Box::new(transport), Protocol::new(ProtocolConfig::default()))
            .await
            .unwrap();
        drop(session);

        for _ in 0..50 {
            if stats.disconnect_calls() > 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(stats.disconnect_calls(), 1);
        let sent = stats.sent();
        assert_eq!(sent.last().unwrap()["method"], json!("shutdown"));
        assert_eq!(stats.count_method("shutdown"), 1);
    }

    #[tokio::test]
    async fn test_cancelled_scope_still_shuts_down() {
        let transport = gateway();
        let stats = transport.stats();

        let scope = Session::scoped(
            Box::new(transport),
            Protocol::new(ProtocolConfig::default()),
            |session| {
                async move {
                    // Never answered by the gateway.
                    session.send_request("tools/never", None).await
                }
                .boxed()
            },
        );
        let cancelled = tokio::time::timeout(Duration::from_millis(50), scope).await;
        assert!(cancelled.is_err());

        for _ in 0..50 {
            if stats.disconnect_calls() > 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(stats.count_method("shutdown"), 1);
        assert_eq!(stats.disconnect_calls(), 1);
    }
}
