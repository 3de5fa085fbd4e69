//! Persisted execution records
//!
//! Terminal runs are written here keyed by run id. Listing returns summaries
//! that keep aggregate counts and drop the per-node results.

use crate::error::{FlowError, Result};
use crate::runtime::tracker::{Execution, ExecutionStatus};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqlitePool, Row};

/// Durable storage for finished runs
#[async_trait]
pub trait ExecutionRecordStore: Send + Sync {
    async fn save(&self, execution: &Execution) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Execution>;
    /// Newest first by start time
    async fn list(&self, limit: usize) -> Result<Vec<ExecutionSummary>>;
    async fn delete(&self, id: &str) -> Result<()>;
}

/// An execution without its node results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    pub id: String,
    pub flow_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_name: Option<String>,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub node_count: usize,
    pub success_count: usize,
    pub error_count: usize,
}

impl From<&Execution> for ExecutionSummary {
    fn from(execution: &Execution) -> Self {
        Self {
            id: execution.id.clone(),
            flow_id: execution.flow_id.clone(),
            flow_name: execution.flow_name.clone(),
            status: execution.status,
            started_at: execution.started_at,
            ended_at: execution.ended_at,
            node_count: execution.results.len(),
            success_count: execution.count(ExecutionStatus::Success),
            error_count: execution.count(ExecutionStatus::Error),
        }
    }
}

/// SQLite-backed execution history, sharing the flows database
#[derive(Debug, Clone)]
pub struct SqliteExecutionStore {
    pool: SqlitePool,
}

impl SqliteExecutionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the executions table (safe to call multiple times)
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                flow_id TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                ended_at TEXT,
                node_count INTEGER NOT NULL DEFAULT 0,
                success_count INTEGER NOT NULL DEFAULT 0,
                error_count INTEGER NOT NULL DEFAULT 0,
                record TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_executions_started_at ON executions(started_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl ExecutionRecordStore for SqliteExecutionStore {
    async fn save(&self, execution: &Execution) -> Result<()> {
        let record = serde_json::to_string(execution).map_err(|e| FlowError::Storage(e.to_string()))?;
        let summary = ExecutionSummary::from(execution);

        sqlx::query(
            r#"
            INSERT INTO executions (id, flow_id, status, started_at, ended_at, node_count, success_count, error_count, record)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                ended_at = excluded.ended_at,
                node_count = excluded.node_count,
                success_count = excluded.success_count,
                error_count = excluded.error_count,
                record = excluded.record
            "#,
        )
        .bind(&execution.id)
        .bind(&execution.flow_id)
        .bind(execution.status.as_str())
        .bind(execution.started_at.to_rfc3339_opts(SecondsFormat::Micros, true))
        .bind(execution.ended_at.map(|t| t.to_rfc3339_opts(SecondsFormat::Micros, true)))
        .bind(summary.node_count as i64)
        .bind(summary.success_count as i64)
        .bind(summary.error_count as i64)
        .bind(&record)
        .execute(&self.pool)
        .await?;

        tracing::debug!("💾 Saved execution record {} ({})", execution.id, execution.status.as_str());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Execution> {
        let row = sqlx::query("SELECT record FROM executions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| FlowError::not_found("execution record", id))?;

        let record: String = row.try_get("record")?;
        serde_json::from_str(&record).map_err(|e| FlowError::Storage(e.to_string()))
    }

    async fn list(&self, limit: usize) -> Result<Vec<ExecutionSummary>> {
        // summaries are rebuilt from the stored record, minus its results
        let rows = sqlx::query("SELECT record FROM executions ORDER BY started_at DESC, id DESC LIMIT ?")
            .bind(limit.min(i64::MAX as usize) as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let record: String = row.try_get("record")?;
                let execution: Execution =
                    serde_json::from_str(&record).map_err(|e| FlowError::Storage(e.to_string()))?;
                Ok(ExecutionSummary::from(&execution))
            })
            .collect()
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM executions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(FlowError::not_found("execution record", id));
        }
        Ok(())
    }
}
