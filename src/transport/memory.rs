//! In-process transport driven by a handler closure
//!
//! Every sent message is recorded and passed to the handler, whose [`Reply`]
//! decides what (if anything) comes back and when. Replies travel over a
//! channel so delayed answers can arrive after the caller gave up, which is
//! how late responses are exercised without a real gateway.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::{Transport, TransportKind};
use crate::error::{McpError, Result};
use crate::mcp::types::{JsonRpcError, JsonRpcResponse, RequestId};

/// What the scripted gateway does with one incoming message
#[derive(Debug, Clone)]
pub enum Reply {
    /// Answer immediately
    Respond(Value),
    /// Answer after a delay
    Delayed(Value, Duration),
    /// Never answer
    Silent,
}

impl Reply {
    /// Successful response echoing the request's id
    pub fn result(request: &Value, result: Value) -> Self {
        Reply::Respond(json!({
            "jsonrpc": "2.0",
            "id": request.get("id").cloned().unwrap_or(Value::Null),
            "result": result,
        }))
    }

    /// Error response echoing the request's id
    pub fn error(request: &Value, code: i32, message: &str) -> Self {
        let id = request
            .get("id")
            .cloned()
            .and_then(|v| serde_json::from_value::<RequestId>(v).ok());
        let response = JsonRpcResponse::failure(id, JsonRpcError::new(code, message));
        Reply::Respond(serde_json::to_value(response).unwrap_or(Value::Null))
    }
}

type Handler = Arc<dyn Fn(&Value) -> Reply + Send + Sync>;

/// Counters shared between a test and the transports it hands out
#[derive(Debug, Default)]
pub struct TransportStats {
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    fail_first_connects: AtomicUsize,
    sent: Mutex<Vec<Value>>,
}

impl TransportStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the first `n` connect attempts (across all transports sharing
    /// these stats) fail with a connection error
    pub fn fail_first_connects(&self, n: usize) {
        self.fail_first_connects.store(n, Ordering::SeqCst);
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    /// Every message sent so far, in order
    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Number of sent messages whose `method` matches
    pub fn count_method(&self, method: &str) -> usize {
        self.sent()
            .iter()
            .filter(|m| m.get("method").and_then(Value::as_str) == Some(method))
            .count()
    }
}

/// Scripted in-memory gateway
pub struct MemoryTransport {
    handler: Handler,
    stats: Arc<TransportStats>,
    connected: bool,
    outbox: mpsc::UnboundedSender<Value>,
    inbox: mpsc::UnboundedReceiver<Value>,
}

impl MemoryTransport {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&Value) -> Reply + Send + Sync + 'static,
    {
        Self::from_handler(Arc::new(handler), TransportStats::new())
    }

    /// Build a transport that shares a handler and stats with others
    pub fn from_handler(
        handler: Arc<dyn Fn(&Value) -> Reply + Send + Sync>,
        stats: Arc<TransportStats>,
    ) -> Self {
        let (outbox, inbox) = mpsc::unbounded_channel();
        Self {
            handler,
            stats,
            connected: false,
            outbox,
            inbox,
        }
    }

    pub fn with_stats(mut self, stats: Arc<TransportStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> Arc<TransportStats> {
        Arc::clone(&self.stats)
    }

    /// Push a message as if the gateway had sent it unprompted
    pub fn inject(&self, message: Value) {
        let _ = self.outbox.send(message);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&mut self) -> Result<()> {
        let attempt = self.stats.connect_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.stats.fail_first_connects.load(Ordering::SeqCst) {
            return Err(McpError::Connection(format!(
                "scripted connect failure (attempt {})",
                attempt
            )));
        }
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) {
        if self.connected {
            self.stats.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        }
        self.connected = false;
    }

    async fn send_message(&mut self, message: &Value) -> Result<()> {
        if !self.connected {
            return Err(McpError::Transport("memory transport is not connected".into()));
        }
        if let Ok(mut sent) = self.stats.sent.lock() {
            sent.push(message.clone());
        }

        match (self.handler)(message) {
            Reply::Respond(value) => {
                let _ = self.outbox.send(value);
            }
            Reply::Delayed(value, delay) => {
                let outbox = self.outbox.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = outbox.send(value);
                });
            }
            Reply::Silent => {}
        }
        Ok(())
    }

    async fn receive_message(&mut self) -> Result<Value> {
        if !self.connected {
            return Err(McpError::Transport("memory transport is not connected".into()));
        }
        self.inbox
            .recv()
            .await
            .ok_or_else(|| McpError::Transport("memory transport closed".into()))
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Memory
    }
}
