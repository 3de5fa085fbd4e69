//! Error taxonomy shared by the engine, the tracker, the stores and the trigger manager.

use thiserror::Error;

/// Errors returned synchronously by the core's public operations.
///
/// Per-node runtime failures never surface here: they are captured into a
/// `NodeResult` and the run carries on. `HandlerFailure` exists so handler
/// dispatch can describe the failure before it is recorded.
#[derive(Debug, Error)]
pub enum FlowError {
    /// Malformed or structurally invalid flow definition.
    #[error("invalid flow: {message}")]
    InvalidFlow { message: String },

    /// Run, trigger registration or flow id absent.
    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    /// A single node's action handler failed.
    #[error("node '{node_id}' failed: {message}")]
    HandlerFailure { node_id: String, message: String },

    /// A trigger could not obtain its OS resource (socket, watch handle, timer).
    #[error("failed to acquire {resource}: {message}")]
    ResourceAcquisition {
        resource: &'static str,
        message: String,
    },

    /// A run exceeded its wall-clock budget.
    #[error("execution timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// Trigger configuration rejected at registration time.
    #[error("invalid {kind} trigger: {message}")]
    InvalidTrigger { kind: &'static str, message: String },

    /// Durable storage failure.
    #[error("storage error: {0}")]
    Storage(String),
}

impl FlowError {
    pub fn invalid_flow(message: impl Into<String>) -> Self {
        Self::InvalidFlow {
            message: message.into(),
        }
    }

    pub fn not_found(what: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { what, id: id.into() }
    }

    pub fn resource(resource: &'static str, message: impl ToString) -> Self {
        Self::ResourceAcquisition {
            resource,
            message: message.to_string(),
        }
    }

    pub fn invalid_trigger(kind: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidTrigger {
            kind,
            message: message.into(),
        }
    }

    /// True for the `NotFound` variant.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_flow(err.to_string())
    }
}

impl From<sqlx::Error> for FlowError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Crate-wide result alias.
pub type Result<T, E = FlowError> = std::result::Result<T, E>;
