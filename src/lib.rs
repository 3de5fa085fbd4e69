//! ForgeFlow: local workflow automation core
//!
//! This library provides the flow execution engine (petgraph DAG planning,
//! per-run tracking and cancellation) and the trigger manager that starts
//! flows from cron schedules, webhooks, file changes, the clipboard and
//! global hotkeys.

// Core configuration and setup
pub mod config;

// Error taxonomy shared by every public operation
pub mod error;

// Flow management layer - definitions and the Flow Store
pub mod workflow;

// Runtime execution engine - DAG execution, run tracking, execution records
pub mod runtime;

// Trigger manager - event sources that start flow runs
pub mod triggers;

// Daemon setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use error::{FlowError, Result};
pub use runtime::{Execution, ExecutionStatus, FlowEngine, HandlerRegistry, NodeResult};
pub use server::start_server;
pub use triggers::TriggerManager;
pub use workflow::{Flow, FlowStore};
