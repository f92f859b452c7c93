//! Gateway adapter facade
//!
//! Composes session management, tool discovery/execution and health
//! monitoring behind one long-lived handle. Construct it once at startup and
//! share it (`Arc<McpAdapter>`) with every consumer.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::AdapterConfig;
use crate::error::{McpError, Result};
use crate::health::{HealthCheckResult, HealthMonitor, HealthProbe, MetricSnapshot, RequestTotals};
use crate::mcp::types::{Capabilities, ServerInfo, ToolDescriptor};
use crate::protocol::Protocol;
use crate::session::{Session, SharedSession};
use crate::tools::{CacheInfo, ToolCallResult, ToolManager, ToolMap};
use crate::transport::TransportFactory;

/// High-level client for one tool gateway
pub struct McpAdapter {
    config: AdapterConfig,
    factory: TransportFactory,
    session: SharedSession,
    tools: ToolManager,
    monitor: HealthMonitor,
    connected: AtomicBool,
    request_count: AtomicU64,
    error_count: AtomicU64,
    /// Serializes connect/disconnect so no two transports are ever opened
    lifecycle: Mutex<()>,
}

impl McpAdapter {
    /// Build an adapter whose transports follow `config.transport`
    ///
    /// # Errors
    /// `McpError::Configuration` if the configuration is invalid.
    pub fn new(config: AdapterConfig) -> Result<Self> {
        let factory = crate::factory::transport_factory(&config)?;
        Self::with_transport_factory(config, factory)
    }

    /// Build an adapter with a caller-supplied transport factory
    pub fn with_transport_factory(config: AdapterConfig, factory: TransportFactory) -> Result<Self> {
        config.validate()?;

        let session: SharedSession = Arc::new(Mutex::new(None));
        let tools = ToolManager::new(Arc::clone(&session), config.cache_ttl, config.tool_timeout);
        let monitor = HealthMonitor::new(config.health.clone());

        Ok(Self {
            config,
            factory,
            session,
            tools,
            monitor,
            connected: AtomicBool::new(false),
            request_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            lifecycle: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    pub fn tool_manager(&self) -> &ToolManager {
        &self.tools
    }

    pub fn monitor(&self) -> &HealthMonitor {
        &self.monitor
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Open a session, retrying with exponential backoff
    ///
    /// Makes at most `max_retries + 1` sequential attempts. Non-retryable
    /// failures such as a rejected handshake end the loop immediately.
    ///
    /// # Errors
    /// - `McpError::RetriesExhausted` wrapping the last failure
    /// - the first non-retryable error, unwrapped
    pub async fn connect(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.is_connected() {
            debug!("Adapter already connected");
            return Ok(());
        }

        let max_attempts = self.config.max_retries.saturating_add(1);
        let mut delay = self.config.retry_delay;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            info!(
                attempt,
                max_attempts,
                transport = %self.config.transport,
                "Connecting to gateway"
            );

            let transport = (self.factory)();
            let protocol = Protocol::new(self.config.protocol_config());

            match Session::open(transport, protocol).await {
                Ok(session) => {
                    let session_id = session.id();
                    *self.session.lock().await = Some(session);
                    self.tools.clear_cache().await;
                    self.connected.store(true, Ordering::SeqCst);
                    info!(attempt, %session_id, "Connected to gateway");
                    return Ok(());
                }
                Err(err) if !err.is_retryable() => {
                    warn!(attempt, error = %err, "Connection failed, not retrying");
                    return Err(err);
                }
                Err(err) if attempt >= max_attempts => {
                    warn!(attempt, error = %err, "Connection failed, retries exhausted");
                    return Err(McpError::RetriesExhausted {
                        attempts: attempt,
                        source: Box::new(err),
                    });
                }
                Err(err) => {
                    warn!(attempt, error = %err, retry_in = ?delay, "Connection attempt failed");
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
            }
        }
    }

    /// Close the session if one is open. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.connected.store(false, Ordering::SeqCst);

        let session = self.session.lock().await.take();
        if let Some(session) = session {
            let session_id = session.id();
            session.close().await;
            info!(%session_id, "Disconnected from gateway");
        }
        self.tools.clear_cache().await;
    }

    async fn tracked<T, F>(&self, operation: &str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.request_count.fetch_add(1, Ordering::SeqCst);

        let outcome = if self.is_connected() {
            call.await
        } else {
            Err(McpError::NotConnected)
        };

        if let Err(e) = &outcome {
            self.error_count.fetch_add(1, Ordering::SeqCst);
            debug!(operation, error = %e, error_type = e.error_type(), "Adapter call failed");
        }
        outcome
    }

    /// Discovered tools, served from cache while it is fresh
    pub async fn list_tools(&self) -> Result<ToolMap> {
        self.tracked("list_tools", self.tools.discover_tools(false)).await
    }

    /// Discovered tools, bypassing the cache
    pub async fn refresh_tools(&self) -> Result<ToolMap> {
        self.tracked("refresh_tools", self.tools.discover_tools(true)).await
    }

    pub async fn get_tool_info(&self, name: &str) -> Result<ToolDescriptor> {
        self.tracked("get_tool_info", self.tools.get_tool_info(name)).await
    }

    pub async fn validate_tool_arguments(&self, name: &str, arguments: &Value) -> Result<()> {
        self.tracked(
            "validate_tool_arguments",
            self.tools.validate_tool_arguments(name, arguments),
        )
        .await
    }

    pub async fn execute_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult> {
        self.tracked("execute_tool", self.tools.execute_tool(name, arguments)).await
    }

    pub async fn cache_info(&self) -> CacheInfo {
        self.tools.cache_info().await
    }

    pub async fn clear_cache(&self) {
        self.tools.clear_cache().await;
    }

    /// One structured health probe; never fails
    pub async fn health_check(&self) -> HealthCheckResult {
        self.monitor.check(self).await
    }

    /// Start periodic health checks. Returns `false` if already running.
    pub fn start_monitoring(self: &Arc<Self>) -> bool {
        let probe: Arc<dyn HealthProbe> = Arc::clone(self) as Arc<dyn HealthProbe>;
        self.monitor.start(Arc::downgrade(&probe))
    }

    /// Stop periodic health checks, waiting for an in-flight one
    pub async fn stop_monitoring(&self) {
        self.monitor.stop().await;
    }

    pub fn request_totals(&self) -> RequestTotals {
        RequestTotals {
            requests: self.request_count.load(Ordering::SeqCst),
            errors: self.error_count.load(Ordering::SeqCst),
        }
    }

    pub fn get_metrics(&self) -> MetricSnapshot {
        self.monitor.get_metrics(self.request_totals())
    }

    pub fn reset_metrics(&self) {
        self.monitor.reset_metrics();
    }

    pub async fn server_info(&self) -> Option<ServerInfo> {
        let session = self.session.lock().await;
        session.as_ref().and_then(|s| s.server_info().cloned())
    }

    pub async fn server_capabilities(&self) -> Option<Capabilities> {
        let session = self.session.lock().await;
        session.as_ref().and_then(|s| s.server_capabilities().cloned())
    }

    pub async fn has_capability(&self, name: &str) -> bool {
        let session = self.session.lock().await;
        session.as_ref().map(|s| s.has_capability(name)).unwrap_or(false)
    }

    pub async fn get_capability_details(&self, name: &str) -> Option<Map<String, Value>> {
        let session = self.session.lock().await;
        session.as_ref().and_then(|s| s.get_capability_details(name))
    }
}

#[async_trait]
impl HealthProbe for McpAdapter {
    fn is_connected(&self) -> bool {
        McpAdapter::is_connected(self)
    }

    async fn probe_tools(&self) -> Result<usize> {
        self.tools.discover_tools(false).await.map(|tools| tools.len())
    }

    fn request_totals(&self) -> RequestTotals {
        McpAdapter::request_totals(self)
    }
}

impl std::fmt::Debug for McpAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpAdapter")
            .field("transport", &self.config.transport)
            .field("connected", &self.is_connected())
            .field("totals", &self.request_totals())
            .finish()
    }
}
