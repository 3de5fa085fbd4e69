//! Daemon setup and initialization
//!
//! Wires together all components: storage, handler registry, execution engine
//! and trigger manager. Runs until Ctrl-C, then shuts the triggers down.

use crate::{
    config::Config,
    runtime::{engine::FlowEngine, executor::HandlerRegistry, history::SqliteExecutionStore},
    triggers::TriggerManager,
    workflow::storage::SqliteFlowStore,
};
use anyhow::Result;
use sqlx::sqlite::SqlitePool;
use std::sync::Arc;

/// Core components of a running daemon
pub struct App {
    pub flows: Arc<SqliteFlowStore>,
    pub records: Arc<SqliteExecutionStore>,
    pub engine: Arc<FlowEngine>,
    pub triggers: Arc<TriggerManager>,
}

/// Build every component on top of the configured SQLite database
///
/// Does not register any trigger yet.
pub async fn create_app(config: Config) -> Result<App> {
    // Ensure data directory exists
    tracing::info!("📁 Ensuring data directory exists: {}", config.storage.data_dir.display());
    std::fs::create_dir_all(&config.storage.data_dir)
        .map_err(|e| anyhow::anyhow!("Failed to create data directory: {}", e))?;

    tracing::info!("📋 Opening flow database");
    let pool = SqlitePool::connect(&config.storage.database_url())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open database: {}", e))?;

    let flows = Arc::new(SqliteFlowStore::new(pool.clone()));
    flows.init_schema().await?;
    let records = Arc::new(SqliteExecutionStore::new(pool));
    records.init_schema().await?;

    tracing::info!("⚙️ Initializing action handlers");
    let handlers = Arc::new(HandlerRegistry::with_builtins());
    tracing::debug!("🔌 Built-in handlers: {:?}", handlers.node_types());

    tracing::info!("🚀 Initializing execution engine");
    let engine = Arc::new(
        FlowEngine::new(handlers, config.engine.clone()).with_records(records.clone()),
    );

    tracing::info!("⏰ Initializing trigger manager");
    let triggers = Arc::new(TriggerManager::new(
        flows.clone(),
        Arc::clone(&engine),
        config.triggers.clone(),
    ));

    Ok(App {
        flows,
        records,
        engine,
        triggers,
    })
}

/// Start the daemon with the given configuration
///
/// Registers the triggers of every stored flow and serves until Ctrl-C.
pub async fn start_server(config: Config) -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting ForgeFlow daemon...");

    let app = create_app(config).await?;
    let report = app.triggers.start_all_triggers().await?;
    if report.failed > 0 {
        tracing::warn!("⚠️ {} trigger registrations failed at startup", report.failed);
    }
    if let Some(addr) = app.triggers.webhook_addr().await {
        tracing::info!("Webhooks listening on http://{}", addr);
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Ctrl-C received, shutting down");

    app.triggers.shutdown().await;

    Ok(())
}
