//! Flow Management Layer
//!
//! This module handles flow definitions and their persistence:
//! - Type definitions (Flow, Node, Edge, TriggerSpec)
//! - The Flow Store contract with SQLite and in-memory implementations

// Core flow type definitions
pub mod types;

// Flow Store contract and implementations
pub mod storage;

// Re-export commonly used types
pub use storage::{FlowStore, FlowSummary, MemoryFlowStore, SqliteFlowStore};
pub use types::{Edge, Flow, Node, NodeCategory, NodeData, TriggerKind, TriggerSpec, WatchFilter};
