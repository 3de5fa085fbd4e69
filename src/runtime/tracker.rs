//! Execution Tracker
//!
//! Owns the canonical copy of every run's state plus the live cancellation
//! handle of each in-flight run. All access goes through one reader/writer
//! lock, and no caller ever holds it across an await on external work.

use crate::error::{FlowError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Status shared by runs and node results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Idle,
    Running,
    Success,
    Error,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// Outcome record of one node within a run; never mutated after insertion
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeResult {
    pub node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Handler wall-clock time in milliseconds
    pub duration: u64,
    pub timestamp: DateTime<Utc>,
}

/// One invocation of a flow with its result history
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: String,
    pub flow_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_name: Option<String>,
    pub status: ExecutionStatus,
    /// Completion order
    pub results: Vec<NodeResult>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Why the run ended in `Error` (stopped, timed out)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Execution {
    /// A fresh `Running` execution with a time-ordered id
    pub fn start(flow_id: impl Into<String>, flow_name: Option<String>) -> Self {
        Self {
            id: format!("exec-{}", uuid::Uuid::now_v7().simple()),
            flow_id: flow_id.into(),
            flow_name,
            status: ExecutionStatus::Running,
            results: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
            error: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal() && self.ended_at.is_some()
    }

    pub fn count(&self, status: ExecutionStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }
}

#[derive(Debug)]
struct TrackedRun {
    execution: Execution,
    /// Present while the run is in flight
    cancel: Option<CancellationToken>,
}

/// Concurrent-safe registry of runs keyed by run id
#[derive(Debug, Default)]
pub struct ExecutionTracker {
    runs: RwLock<HashMap<String, TrackedRun>>,
}

impl ExecutionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new run together with its cancellation handle
    pub async fn register(&self, execution: Execution, cancel: CancellationToken) {
        let id = execution.id.clone();
        self.runs.write().await.insert(
            id,
            TrackedRun {
                execution,
                cancel: Some(cancel),
            },
        );
    }

    /// Append a node result to a running execution
    ///
    /// Returns `false` (and drops the result) when the run is unknown or
    /// already terminal: a terminal execution is immutable.
    pub async fn append_result(&self, run_id: &str, result: NodeResult) -> bool {
        let mut runs = self.runs.write().await;
        match runs.get_mut(run_id) {
            Some(run) if !run.execution.status.is_terminal() => {
                run.execution.results.push(result);
                true
            }
            _ => false,
        }
    }

    /// Move a running execution to a terminal status and stamp its end time
    ///
    /// Only the first transition wins; returns whether this call made it.
    pub async fn mark_terminal(
        &self,
        run_id: &str,
        status: ExecutionStatus,
        error: Option<String>,
    ) -> bool {
        let mut runs = self.runs.write().await;
        let Some(run) = runs.get_mut(run_id) else {
            return false;
        };
        if run.execution.status.is_terminal() {
            return false;
        }
        run.execution.status = status;
        run.execution.error = error;
        run.execution.ended_at = Some(Utc::now());
        run.cancel = None;
        true
    }

    /// Signal cancellation to an in-flight run and mark it `Error` immediately
    ///
    /// `NotFound` when no such run is active (unknown or already finished).
    pub async fn cancel(&self, run_id: &str, reason: impl Into<String>) -> Result<()> {
        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(run_id)
            .filter(|run| run.cancel.is_some())
            .ok_or_else(|| FlowError::not_found("active execution", run_id))?;

        if let Some(token) = run.cancel.take() {
            token.cancel();
        }
        run.execution.status = ExecutionStatus::Error;
        run.execution.error = Some(reason.into());
        run.execution.ended_at = Some(Utc::now());
        Ok(())
    }

    /// Snapshot of one run
    pub async fn get(&self, run_id: &str) -> Option<Execution> {
        self.runs
            .read()
            .await
            .get(run_id)
            .map(|run| run.execution.clone())
    }

    /// Snapshot of every run, unordered
    pub async fn list(&self) -> Vec<Execution> {
        self.runs
            .read()
            .await
            .values()
            .map(|run| run.execution.clone())
            .collect()
    }

    /// Whether the run is still in flight
    pub async fn is_active(&self, run_id: &str) -> bool {
        self.runs
            .read()
            .await
            .get(run_id)
            .is_some_and(|run| run.cancel.is_some())
    }

    /// Drop a finished run from memory, returning its final snapshot
    ///
    /// Runs still in flight are kept and yield `None`.
    pub async fn remove_finished(&self, run_id: &str) -> Option<Execution> {
        let mut runs = self.runs.write().await;
        if !runs.get(run_id)?.execution.is_finished() {
            return None;
        }
        runs.remove(run_id).map(|run| run.execution)
    }
}
