//! Runtime Execution Engine
//!
//! This module provides the petgraph-based DAG execution engine for flows.
//! It handles:
//! - Planning flows into action-node DAGs
//! - Depth-first node dispatch on one tokio task per run
//! - Run state, cancellation and timeouts
//! - Persisting finished runs

// Core execution engine using petgraph for DAG planning
pub mod engine;

// Pluggable action handlers, dispatched by node type
pub mod executor;

// Persisted execution records
pub mod history;

// In-memory state of in-flight and finished runs
pub mod tracker;

// Re-export main types
pub use engine::{ExecutionPlan, FailurePolicy, FlowEngine, JoinPolicy};
pub use executor::{ActionContext, ActionHandler, HandlerRegistry};
pub use history::{ExecutionRecordStore, ExecutionSummary, SqliteExecutionStore};
pub use tracker::{Execution, ExecutionStatus, ExecutionTracker, NodeResult};
