//! Action handler dispatch
//!
//! Node behaviour is pluggable: an `ActionHandler` is registered per node type
//! tag, and the engine asks the `HandlerRegistry` to run each node. The table
//! lives behind an `ArcSwap` so handlers can be added or replaced while runs
//! are in flight without any reader ever taking a lock.

use crate::error::FlowError;
use crate::runtime::tracker::{ExecutionStatus, NodeResult};
use crate::workflow::types::Node;
use anyhow::Result;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::{collections::HashMap, sync::Arc, time::Duration};

/// What a handler gets to see about the node it executes
#[derive(Debug, Clone, Copy)]
pub struct ActionContext<'a> {
    pub flow_id: &'a str,
    pub execution_id: &'a str,
    pub node: &'a Node,
}

impl ActionContext<'_> {
    pub fn node_type(&self) -> &str {
        self.node.handler_type()
    }

    pub fn config(&self) -> &Map<String, Value> {
        self.node.config()
    }
}

/// Executable behaviour for one node type
///
/// Handlers own their I/O lifecycle: the engine imposes no timeout and never
/// holds a lock while a handler runs.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn execute(&self, ctx: ActionContext<'_>) -> Result<Value>;
}

/// Hot-swappable map from node type tag to handler
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: ArcSwap<HashMap<String, Arc<dyn ActionHandler>>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("node_types", &self.node_types())
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the built-in `delay` and `log` handlers
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register("delay", DelayHandler);
        registry.register("utility_delay", DelayHandler);
        registry.register("log", LogHandler);
        registry.register("utility_log", LogHandler);
        registry
    }

    /// Add or replace the handler for a node type
    pub fn register(&self, node_type: impl Into<String>, handler: impl ActionHandler + 'static) {
        self.register_arc(node_type, Arc::new(handler));
    }

    pub fn register_arc(&self, node_type: impl Into<String>, handler: Arc<dyn ActionHandler>) {
        let node_type = node_type.into();
        self.handlers.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(node_type.clone(), Arc::clone(&handler));
            next
        });
        tracing::debug!("🔌 Registered action handler for '{}'", node_type);
    }

    /// Remove the handler for a node type, returning whether one existed
    pub fn unregister(&self, node_type: &str) -> bool {
        let mut removed = false;
        self.handlers.rcu(|current| {
            let mut next = HashMap::clone(current);
            removed = next.remove(node_type).is_some();
            next
        });
        removed
    }

    pub fn get(&self, node_type: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.load().get(node_type).cloned()
    }

    pub fn node_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.load().keys().cloned().collect();
        types.sort();
        types
    }

    /// Execute one node and turn the outcome into a `NodeResult`
    ///
    /// Handler errors and unknown node types are captured as `Error` results;
    /// nothing here is fatal to the run.
    pub async fn dispatch(&self, ctx: ActionContext<'_>) -> NodeResult {
        let node = ctx.node;
        tracing::info!("🚀 Starting node execution: {} (type: {})", node.id, ctx.node_type());

        let timestamp = chrono::Utc::now();
        let start_time = std::time::Instant::now();

        let outcome = match self.get(ctx.node_type()) {
            Some(handler) => handler.execute(ctx).await.map_err(|e| FlowError::HandlerFailure {
                node_id: node.id.clone(),
                message: format!("{:#}", e),
            }),
            None => Err(FlowError::HandlerFailure {
                node_id: node.id.clone(),
                message: format!("no action handler registered for node type '{}'", ctx.node_type()),
            }),
        };

        let duration = start_time.elapsed();
        let mut result = NodeResult {
            node_id: node.id.clone(),
            node_label: Some(node.label().to_string()),
            node_type: Some(ctx.node_type().to_string()).filter(|t| !t.is_empty()),
            status: ExecutionStatus::Success,
            output: None,
            error: None,
            duration: duration.as_millis() as u64,
            timestamp,
        };

        match outcome {
            Ok(output) => {
                tracing::info!("✅ Node execution completed: {} in {:?}", node.id, duration);
                result.output = Some(output);
            }
            Err(e) => {
                tracing::error!("❌ Node execution failed: {} in {:?} - Error: {}", node.id, duration, e);
                result.status = ExecutionStatus::Error;
                result.error = Some(match e {
                    FlowError::HandlerFailure { message, .. } => message,
                    other => other.to_string(),
                });
            }
        }
        result
    }
}

/// Sleeps for `config.ms` milliseconds (default 100)
#[derive(Debug, Clone, Copy, Default)]
pub struct DelayHandler;

#[async_trait]
impl ActionHandler for DelayHandler {
    async fn execute(&self, ctx: ActionContext<'_>) -> Result<Value> {
        let ms = match ctx.config().get("ms") {
            None => 100,
            Some(value) => value
                .as_u64()
                .ok_or_else(|| anyhow::anyhow!("'ms' must be a non-negative integer, got {}", value))?,
        };
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(json!({ "nodeId": ctx.node.id, "delayedMs": ms }))
    }
}

/// Writes `config.message` to the log and echoes it back
#[derive(Debug, Clone, Copy, Default)]
pub struct LogHandler;

#[async_trait]
impl ActionHandler for LogHandler {
    async fn execute(&self, ctx: ActionContext<'_>) -> Result<Value> {
        let message = ctx
            .config()
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        tracing::info!("📝 [{}:{}] {}", ctx.flow_id, ctx.node.id, message);
        Ok(json!({ "nodeId": ctx.node.id, "message": message }))
    }
}
