//! Tool discovery, argument validation and execution
//!
//! The manager keeps a `name -> ToolDescriptor` snapshot with a TTL and
//! compiles each descriptor's `inputSchema` once per snapshot, so arguments
//! are checked client-side before any `tools/call` reaches the wire.
//! Refreshes are single-flight: concurrent discovery calls wait for the one
//! in progress instead of issuing their own `tools/list`.

pub mod normalizer;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use jsonschema::Validator;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{McpError, Result};
use crate::mcp::types::{error_codes, methods, ToolCallParams, ToolDescriptor, ToolsListResult};
use crate::session::SharedSession;

pub use normalizer::{normalize, ContentBlock, EmbeddedResource, ToolCallResult};

/// Immutable discovery snapshot keyed by tool name
pub type ToolMap = Arc<HashMap<String, ToolDescriptor>>;

/// Upper bound on `tools/list` pages followed in one discovery
const MAX_LIST_PAGES: usize = 64;

/// Cache observability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheInfo {
    pub cached: bool,
    pub tool_count: usize,
    pub valid: bool,
}

struct ToolCache {
    tools: ToolMap,
    validators: HashMap<String, Arc<Validator>>,
    fetched_at: Instant,
}

impl ToolCache {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() < ttl
    }
}

/// Discovers, validates and invokes tools over the shared session
pub struct ToolManager {
    session: SharedSession,
    ttl: Duration,
    tool_timeout: Duration,
    cache: RwLock<Option<ToolCache>>,
    refresh: Mutex<()>,
    generation: AtomicU64,
}

impl ToolManager {
    pub fn new(session: SharedSession, ttl: Duration, tool_timeout: Duration) -> Self {
        Self {
            session,
            ttl,
            tool_timeout,
            cache: RwLock::new(None),
            refresh: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    async fn fresh_tools(&self) -> Option<ToolMap> {
        let cache = self.cache.read().await;
        cache
            .as_ref()
            .filter(|c| c.is_fresh(self.ttl))
            .map(|c| Arc::clone(&c.tools))
    }

    /// Return the tool snapshot, refreshing it when expired or forced
    ///
    /// # Errors
    /// - `McpError::NotConnected` without an open session
    /// - errors from the `tools/list` exchange
    pub async fn discover_tools(&self, force_refresh: bool) -> Result<ToolMap> {
        if !force_refresh {
            if let Some(tools) = self.fresh_tools().await {
                debug!(tool_count = tools.len(), "Serving tools from cache");
                return Ok(tools);
            }
        }

        let seen = self.generation.load(Ordering::SeqCst);
        let _refreshing = self.refresh.lock().await;

        // Another caller may have refreshed while we waited for the lock.
        if !force_refresh || self.generation.load(Ordering::SeqCst) != seen {
            if let Some(tools) = self.fresh_tools().await {
                return Ok(tools);
            }
        }

        let descriptors = self.fetch_tool_list().await?;
        let mut tools = HashMap::with_capacity(descriptors.len());
        let mut validators = HashMap::with_capacity(descriptors.len());

        for descriptor in descriptors {
            if tools.contains_key(&descriptor.name) {
                warn!(tool = %descriptor.name, "Duplicate tool name in discovery, keeping the first");
                continue;
            }
            match jsonschema::validator_for(&descriptor.input_schema) {
                Ok(validator) => {
                    validators.insert(descriptor.name.clone(), Arc::new(validator));
                }
                Err(e) => {
                    warn!(
                        tool = %descriptor.name,
                        error = %e,
                        "Tool schema does not compile, falling back to required-field checks"
                    );
                }
            }
            tools.insert(descriptor.name.clone(), descriptor);
        }

        let tools: ToolMap = Arc::new(tools);
        *self.cache.write().await = Some(ToolCache {
            tools: Arc::clone(&tools),
            validators,
            fetched_at: Instant::now(),
        });
        self.generation.fetch_add(1, Ordering::SeqCst);

        info!(tool_count = tools.len(), "Discovered tools");
        Ok(tools)
    }

    async fn fetch_tool_list(&self) -> Result<Vec<ToolDescriptor>> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(McpError::NotConnected)?;

        let mut descriptors = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let raw = session.send_request(methods::TOOLS_LIST, params).await?;
            let page: ToolsListResult = serde_json::from_value(raw).map_err(|e| {
                McpError::protocol(
                    methods::TOOLS_LIST,
                    error_codes::PROTOCOL_FAILED,
                    format!("malformed tools/list result: {}", e),
                )
            })?;
            descriptors.extend(page.tools);

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(descriptors),
            }
        }

        warn!(pages = MAX_LIST_PAGES, "tools/list pagination did not terminate, using partial list");
        Ok(descriptors)
    }

    /// Cached snapshot state, without touching the wire
    pub async fn cache_info(&self) -> CacheInfo {
        let cache = self.cache.read().await;
        match cache.as_ref() {
            Some(c) => CacheInfo {
                cached: true,
                tool_count: c.tools.len(),
                valid: c.is_fresh(self.ttl),
            },
            None => CacheInfo {
                cached: false,
                tool_count: 0,
                valid: false,
            },
        }
    }

    /// Drop the snapshot so the next discovery hits the wire
    pub async fn clear_cache(&self) {
        *self.cache.write().await = None;
        debug!("Tool cache cleared");
    }

    /// Descriptor for one tool
    ///
    /// # Errors
    /// `McpError::ToolExecution` ("Tool not found") listing the known tool
    /// names under `details.available_tools`.
    pub async fn get_tool_info(&self, name: &str) -> Result<ToolDescriptor> {
        let tools = self.discover_tools(false).await?;
        tools.get(name).cloned().ok_or_else(|| {
            let mut available: Vec<&str> = tools.keys().map(String::as_str).collect();
            available.sort_unstable();
            McpError::tool_with_details(name, "Tool not found", json!({ "available_tools": available }))
        })
    }

    async fn validator_for(&self, name: &str) -> Option<Arc<Validator>> {
        let cache = self.cache.read().await;
        cache.as_ref().and_then(|c| c.validators.get(name).cloned())
    }

    /// Check arguments against the tool's `inputSchema` without a wire call
    ///
    /// # Errors
    /// `McpError::ToolExecution` ("Invalid arguments: ...") naming every
    /// schema violation; "Tool not found" for unknown tools.
    pub async fn validate_tool_arguments(&self, name: &str, arguments: &Value) -> Result<()> {
        let descriptor = self.get_tool_info(name).await?;
        let arguments = normalize_arguments(arguments);

        let problems: Vec<String> = match self.validator_for(name).await {
            Some(validator) => validator.iter_errors(&arguments).map(|e| e.to_string()).collect(),
            None => missing_required(&descriptor, &arguments),
        };

        if problems.is_empty() {
            return Ok(());
        }

        debug!(tool = %name, problems = ?problems, "Rejected tool arguments");
        Err(McpError::tool_with_details(
            name,
            format!("Invalid arguments: {}", problems.join("; ")),
            json!({ "errors": problems }),
        ))
    }

    /// Validate, invoke and normalize one tool call
    ///
    /// # Errors
    /// - `McpError::ToolExecution` for unknown tools, invalid arguments or a
    ///   result flagged `isError`
    /// - `McpError::Timeout` when the call exceeds the tool timeout
    /// - `McpError::NotConnected` / protocol errors from the exchange
    pub async fn execute_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult> {
        self.validate_tool_arguments(name, &arguments).await?;

        let params = serde_json::to_value(ToolCallParams {
            name: name.to_string(),
            arguments: normalize_arguments(&arguments),
        })?;

        let started = Instant::now();
        let raw = {
            let mut guard = self.session.lock().await;
            let session = guard.as_mut().ok_or(McpError::NotConnected)?;
            session
                .send_request_with_timeout(methods::TOOLS_CALL, Some(params), self.tool_timeout)
                .await?
        };

        let result = normalize(&raw)?;
        let elapsed = started.elapsed();

        if !result.success {
            let message = result
                .error
                .clone()
                .unwrap_or_else(|| normalizer::DEFAULT_ERROR_MESSAGE.to_string());
            warn!(tool = %name, error = %message, "Tool reported an error");
            return Err(McpError::tool_with_details(
                name,
                message,
                json!({ "content": result.content, "raw_content": result.raw_content }),
            ));
        }

        debug!(tool = %name, elapsed_ms = elapsed.as_millis() as u64, "Tool call succeeded");
        Ok(result)
    }
}

/// `null` arguments mean "no arguments"
fn normalize_arguments(arguments: &Value) -> Value {
    match arguments {
        Value::Null => Value::Object(Map::new()),
        other => other.clone(),
    }
}

fn missing_required(descriptor: &ToolDescriptor, arguments: &Value) -> Vec<String> {
    let Some(object) = arguments.as_object() else {
        return vec!["arguments must be an object".to_string()];
    };
    descriptor
        .required_parameters()
        .into_iter()
        .filter(|key| !object.contains_key(*key))
        .map(|key| format!("\"{}\" is a required property", key))
        .collect()
}

impl std::fmt::Debug for ToolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolManager")
            .field("ttl", &self.ttl)
            .field("tool_timeout", &self.tool_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::PROTOCOL_VERSION;
    use crate::protocol::{Protocol, ProtocolConfig};
    use crate::session::Session;
    use crate::transport::{MemoryTransport, Reply, TransportStats};

    fn tool_list() -> Value {
        json!({
            "tools": [
                {
                    "name": "search",
                    "description": "Search the index",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "query": {"type": "string"},
                            "limit": {"type": "integer"}
                        },
                        "required": ["query"]
                    }
                },
                {
                    "name": "calculate",
                    "description": "Evaluate an expression",
                    "inputSchema": {
                        "type": "object",
                        "properties": {"expression": {"type": "string"}},
                        "required": ["expression"]
                    }
                }
            ]
        })
    }

    fn handler(msg: &Value) -> Reply {
        match msg["method"].as_str() {
            Some("initialize") => Reply::result(
                msg,
                json!({"protocolVersion": PROTOCOL_VERSION, "capabilities": {"tools": {}}}),
            ),
            Some("tools/list") => Reply::result(msg, tool_list()),
            Some("tools/call") => match msg["params"]["name"].as_str() {
                Some("search") => Reply::result(
                    msg,
                    json!({"content": [{"type": "text", "text": "result"}], "isError": false}),
                ),
                _ => Reply::result(
                    msg,
                    json!({"content": [{"type": "text", "text": "division by zero"}], "isError": true}),
                ),
            },
            _ => Reply::Silent,
        }
    }

    async fn manager(ttl: Duration) -> (ToolManager, Arc<TransportStats>) {
        let transport = MemoryTransport::new(handler);
        let stats = transport.stats();
        let session = Session::open(Box::new(transport), Protocol::new(ProtocolConfig::default()))
            .await
            .unwrap();
        let shared: SharedSession = Arc::new(Mutex::new(Some(session)));
        (ToolManager::new(shared, ttl, Duration::from_secs(5)), stats)
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_cached_within_ttl() {
        let (manager, stats) = manager(Duration::from_secs(30)).await;

        let first = manager.discover_tools(false).await.unwrap();
        let second = manager.discover_tools(false).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_eq!(first["search"].description, "Search the index");
        assert_eq!(stats.count_method("tools/list"), 1);
        assert_eq!(
            manager.cache_info().await,
            CacheInfo { cached: true, tool_count: 2, valid: true }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_refreshes_after_ttl() {
        let (manager, stats) = manager(Duration::from_secs(30)).await;
        manager.discover_tools(false).await.unwrap();

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(!manager.cache_info().await.valid);

        manager.discover_tools(false).await.unwrap();
        assert_eq!(stats.count_method("tools/list"), 2);
        assert!(manager.cache_info().await.valid);
    }

    #[tokio::test]
    async fn test_force_refresh_and_clear() {
        let (manager, stats) = manager(Duration::from_secs(30)).await;
        manager.discover_tools(false).await.unwrap();
        manager.discover_tools(true).await.unwrap();
        assert_eq!(stats.count_method("tools/list"), 2);

        manager.clear_cache().await;
        assert_eq!(
            manager.cache_info().await,
            CacheInfo { cached: false, tool_count: 0, valid: false }
        );
        manager.discover_tools(false).await.unwrap();
        assert_eq!(stats.count_method("tools/list"), 3);
    }

    #[tokio::test]
    async fn test_concurrent_discovery_is_single_flight() {
        let (manager, stats) = manager(Duration::from_secs(30)).await;

        let (a, b, c) = tokio::join!(
            manager.discover_tools(false),
            manager.discover_tools(false),
            manager.discover_tools(false)
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(stats.count_method("tools/list"), 1);
    }

    #[tokio::test]
    async fn test_unknown_tool_lists_available() {
        let (manager, stats) = manager(Duration::from_secs(30)).await;

        let err = manager.execute_tool("translate", json!({})).await.unwrap_err();
        match err {
            McpError::ToolExecution { message, tool_name, details } => {
                assert_eq!(message, "Tool not found");
                assert_eq!(tool_name, "translate");
                assert_eq!(details["available_tools"], json!(["calculate", "search"]));
            }
            other => panic!("expected tool error, got {:?}", other),
        }
        assert_eq!(stats.count_method("tools/call"), 0);
    }

    #[tokio::test]
    async fn test_missing_required_argument_rejected_locally() {
        let (manager, stats) = manager(Duration::from_secs(30)).await;

        let err = manager
            .execute_tool("search", json!({"limit": 5}))
            .await
            .unwrap_err();
        match err {
            McpError::ToolExecution { message, .. } => {
                assert!(message.starts_with("Invalid arguments"));
                assert!(message.contains("query"));
            }
            other => panic!("expected tool error, got {:?}", other),
        }
        assert_eq!(stats.count_method("tools/call"), 0);
    }

    #[tokio::test]
    async fn test_wrong_argument_type_rejected() {
        let (manager, _) = manager(Duration::from_secs(30)).await;
        let err = manager
            .validate_tool_arguments("search", &json!({"query": "x", "limit": "ten"}))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::ToolExecution { ref message, .. } if message.starts_with("Invalid arguments")));
    }

    #[tokio::test]
    async fn test_execute_success() {
        let (manager, stats) = manager(Duration::from_secs(30)).await;

        let result = manager.execute_tool("search", json!({"query": "x"})).await.unwrap();
        assert!(result.success);
        assert_eq!(result.content, "result");
        assert_eq!(result.error, None);

        let call = stats
            .sent()
            .into_iter()
            .find(|m| m["method"] == json!("tools/call"))
            .unwrap();
        assert_eq!(call["params"], json!({"name": "search", "arguments": {"query": "x"}}));
    }

    #[tokio::test]
    async fn test_execute_is_error_surfaces() {
        let (manager, _) = manager(Duration::from_secs(30)).await;

        let err = manager
            .execute_tool("calculate", json!({"expression": "1/0"}))
            .await
            .unwrap_err();
        match err {
            McpError::ToolExecution { message, tool_name, .. } => {
                assert_eq!(message, "division by zero");
                assert_eq!(tool_name, "calculate");
            }
            other => panic!("expected tool error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_discovery_without_session() {
        let manager = ToolManager::new(
            Arc::new(Mutex::new(None)),
            Duration::from_secs(30),
            Duration::from_secs(5),
        );
        assert!(matches!(
            manager.discover_tools(false).await,
            Err(McpError::NotConnected)
        ));
    }

    #[test]
    fn test_required_fallback_check() {
        let descriptor = ToolDescriptor::new(
            "search",
            "",
            json!({"type": "object", "required": ["query"]}),
        );
        assert_eq!(missing_required(&descriptor, &json!({"query": "x"})), Vec::<String>::new());
        assert_eq!(missing_required(&descriptor, &json!({})).len(), 1);
        assert_eq!(missing_required(&descriptor, &json!([1])).len(), 1);
    }
}
