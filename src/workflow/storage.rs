//! Flow Store: persistence contract for flow definitions
//!
//! The core only depends on the `FlowStore` trait. `SqliteFlowStore` is the
//! durable implementation used by the daemon; `MemoryFlowStore` backs tests
//! and embedders that keep flows elsewhere.

use crate::error::{FlowError, Result};
use crate::workflow::types::Flow;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sqlx::{sqlite::SqlitePool, Row};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Resolve flow identifiers to their current definitions
#[async_trait]
pub trait FlowStore: Send + Sync {
    /// Insert or update a flow, assigning an id on first save; returns the id
    async fn save(&self, flow: Flow) -> Result<String>;
    /// Load a flow by id, `NotFound` if absent
    async fn load(&self, id: &str) -> Result<Flow>;
    /// List summaries of every stored flow, most recently updated first
    async fn list(&self) -> Result<Vec<FlowSummary>>;
    /// Delete a flow by id, `NotFound` if absent
    async fn delete(&self, id: &str) -> Result<()>;
}

/// Basic flow metadata for listing operations
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowSummary {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub enabled: bool,
    pub node_count: usize,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<&Flow> for FlowSummary {
    fn from(flow: &Flow) -> Self {
        Self {
            id: flow.id.clone(),
            name: flow.name.clone(),
            description: flow.description.clone(),
            enabled: flow.enabled,
            node_count: flow.nodes.len(),
            created_at: flow.created_at,
            updated_at: flow.updated_at,
        }
    }
}

/// Assign an id and creation time on first save, bump the update time always
fn stamp_for_save(flow: &mut Flow) {
    let now = Utc::now();
    if flow.id.is_empty() {
        flow.id = format!("flow-{}", uuid::Uuid::now_v7().simple());
        flow.created_at = Some(now);
    }
    flow.created_at.get_or_insert(now);
    flow.updated_at = Some(now);
}

fn timestamp(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(|t| t.to_rfc3339_opts(SecondsFormat::Micros, true))
}

fn parse_timestamp(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
        .map(|t| t.with_timezone(&Utc))
}

/// SQLite-based flow storage
///
/// Flows are stored as a JSON definition column next to indexed lookup
/// fields, so listing never has to parse full definitions.
#[derive(Debug, Clone)]
pub struct SqliteFlowStore {
    /// SQLite connection pool
    pool: SqlitePool,
}

impl SqliteFlowStore {
    /// Create new storage instance with database connection
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the flows table and its index
    ///
    /// Safe to call multiple times (uses IF NOT EXISTS).
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS flows (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                enabled INTEGER NOT NULL DEFAULT 1,
                node_count INTEGER NOT NULL DEFAULT 0,
                definition TEXT NOT NULL,
                created_at TEXT,
                updated_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_flows_updated_at ON flows(updated_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl FlowStore for SqliteFlowStore {
    /// Uses UPSERT to handle both create and update atomically
    async fn save(&self, mut flow: Flow) -> Result<String> {
        stamp_for_save(&mut flow);
        let definition = serde_json::to_string(&flow)?;

        sqlx::query(
            r#"
            INSERT INTO flows (id, name, description, enabled, node_count, definition, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                enabled = excluded.enabled,
                node_count = excluded.node_count,
                definition = excluded.definition,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&flow.id)
        .bind(&flow.name)
        .bind(&flow.description)
        .bind(flow.enabled)
        .bind(flow.nodes.len() as i64)
        .bind(&definition)
        .bind(timestamp(flow.created_at))
        .bind(timestamp(flow.updated_at))
        .execute(&self.pool)
        .await?;

        tracing::debug!("💾 Saved flow '{}' ({} nodes)", flow.id, flow.nodes.len());
        Ok(flow.id)
    }

    async fn load(&self, id: &str) -> Result<Flow> {
        let row = sqlx::query("SELECT definition FROM flows WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| FlowError::not_found("flow", id))?;

        let definition: String = row.try_get("definition")?;
        Flow::from_json(&definition)
    }

    async fn list(&self) -> Result<Vec<FlowSummary>> {
        let rows = sqlx::query(
            "SELECT id, name, description, enabled, node_count, created_at, updated_at \
             FROM flows ORDER BY updated_at DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut flows = Vec::with_capacity(rows.len());
        for row in rows {
            let node_count: i64 = row.try_get("node_count")?;
            flows.push(FlowSummary {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                description: row.try_get("description")?,
                enabled: row.try_get("enabled")?,
                node_count: node_count.max(0) as usize,
                created_at: parse_timestamp(row.try_get("created_at")?),
                updated_at: parse_timestamp(row.try_get("updated_at")?),
            });
        }
        Ok(flows)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM flows WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(FlowError::not_found("flow", id));
        }
        Ok(())
    }
}

/// In-memory flow store
#[derive(Debug, Default)]
pub struct MemoryFlowStore {
    flows: RwLock<HashMap<String, Flow>>,
}

impl MemoryFlowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FlowStore for MemoryFlowStore {
    async fn save(&self, mut flow: Flow) -> Result<String> {
        stamp_for_save(&mut flow);
        let id = flow.id.clone();
        self.flows.write().await.insert(id.clone(), flow);
        Ok(id)
    }

    async fn load(&self, id: &str) -> Result<Flow> {
        self.flows
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| FlowError::not_found("flow", id))
    }

    async fn list(&self) -> Result<Vec<FlowSummary>> {
        let mut flows: Vec<FlowSummary> =
            self.flows.read().await.values().map(FlowSummary::from).collect();
        flows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(flows)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.flows
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| FlowError::not_found("flow", id))
    }
}
