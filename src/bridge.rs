//! Blocking bridge for synchronous callers
//!
//! Orchestration code that cannot `await` drives the async adapter through a
//! `ToolBridge`. The bridge owns exactly one multi-thread runtime; callers on
//! any number of threads block on it, and a semaphore bounds how many tool
//! calls are in flight at once.
//!
//! Never call into a bridge from inside an async task: blocking on a runtime
//! from within a runtime panics.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tokio::runtime::{Builder, Runtime};
use tokio::sync::Semaphore;
use tracing::debug;

use crate::adapter::McpAdapter;
use crate::error::{McpError, Result};
use crate::mcp::types::ToolDescriptor;
use crate::tools::ToolCallResult;

struct BridgeInner {
    runtime: Runtime,
    adapter: Arc<McpAdapter>,
    permits: Semaphore,
}

impl BridgeInner {
    fn call(&self, name: &str, arguments: Value) -> ToolCallResult {
        let outcome = self.runtime.block_on(async {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| McpError::Transport("tool bridge is shut down".into()))?;
            self.adapter.execute_tool(name, arguments).await
        });

        match outcome {
            Ok(result) => result,
            Err(err) => {
                debug!(tool = %name, error = %err, "Bridged tool call failed");
                let mut metadata = Map::new();
                metadata.insert("error_type".into(), json!(err.error_type()));
                metadata.insert("code".into(), json!(err.code()));
                if let McpError::ToolExecution { details, .. } = &err {
                    if !details.is_null() {
                        metadata.insert("details".into(), details.clone());
                    }
                }
                ToolCallResult {
                    metadata,
                    ..ToolCallResult::failure(tool_error_text(&err))
                }
            }
        }
    }
}

fn tool_error_text(err: &McpError) -> String {
    match err {
        McpError::ToolExecution { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

/// One discovered tool as a plain callable
#[derive(Clone)]
pub struct BridgedTool {
    pub name: String,
    pub description: String,
    /// JSON Schema of the tool's arguments
    pub parameters: Value,
    inner: Arc<BridgeInner>,
}

impl BridgedTool {
    /// Invoke the tool, blocking the calling thread
    ///
    /// Failures come back as `success == false` results, never as panics.
    pub fn invoke(&self, arguments: Value) -> ToolCallResult {
        self.inner.call(&self.name, arguments)
    }
}

impl std::fmt::Debug for BridgedTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgedTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

/// Worker pool driving one adapter for blocking callers
pub struct ToolBridge {
    inner: Arc<BridgeInner>,
}

impl ToolBridge {
    /// Build a bridge with `workers` runtime threads and as many concurrent calls
    ///
    /// # Errors
    /// `McpError::Configuration` if the runtime cannot be created.
    pub fn new(adapter: Arc<McpAdapter>, workers: usize) -> Result<Self> {
        let workers = workers.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(workers)
            .thread_name("mcp-bridge")
            .enable_all()
            .build()
            .map_err(|e| McpError::Configuration(format!("Failed to start bridge runtime: {}", e)))?;

        Ok(Self {
            inner: Arc::new(BridgeInner {
                runtime,
                adapter,
                permits: Semaphore::new(workers),
            }),
        })
    }

    pub fn adapter(&self) -> &Arc<McpAdapter> {
        &self.inner.adapter
    }

    pub fn connect(&self) -> Result<()> {
        self.inner.runtime.block_on(self.inner.adapter.connect())
    }

    pub fn disconnect(&self) {
        self.inner.runtime.block_on(self.inner.adapter.disconnect());
    }

    /// Every discovered tool, sorted by name
    pub fn tools(&self) -> Result<Vec<BridgedTool>> {
        let tools = self.inner.runtime.block_on(self.inner.adapter.list_tools())?;
        let mut descriptors: Vec<&ToolDescriptor> = tools.values().collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(descriptors
            .into_iter()
            .map(|d| BridgedTool {
                name: d.name.clone(),
                description: d.description.clone(),
                parameters: d.input_schema.clone(),
                inner: Arc::clone(&self.inner),
            })
            .collect())
    }

    /// Call a tool by name, blocking the calling thread
    pub fn call(&self, name: &str, arguments: Value) -> ToolCallResult {
        self.inner.call(name, arguments)
    }
}
