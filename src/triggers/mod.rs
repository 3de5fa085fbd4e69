//! Trigger Manager
//!
//! Owns the five trigger kinds (schedule, webhook, file watch, clipboard,
//! hotkey), each with its own registration table and lock. Every activation
//! goes through the `FlowLauncher`, which resolves the flow id in the Flow
//! Store and starts a run on the engine.

pub mod capture;
pub mod clipboard;
pub mod file_watch;
pub mod hotkey;
pub mod schedule;
pub mod webhook;

use crate::config::TriggerConfig;
use crate::error::Result;
use crate::runtime::engine::FlowEngine;
use crate::workflow::storage::FlowStore;
use crate::workflow::types::{Flow, TriggerKind, TriggerSpec, WatchFilter};
use capture::{ClipboardSource, HotkeyCapture, NoClipboard, NoHotkeyCapture};
use clipboard::{ClipboardRegistration, ClipboardTriggers};
use file_watch::{FileWatchRegistration, FileWatchTriggers};
use hotkey::{HotkeyRegistration, HotkeyTriggers};
use schedule::{ScheduleRegistration, ScheduleTriggers};
use serde::Serialize;
use std::{net::SocketAddr, sync::Arc};
use tokio_util::sync::CancellationToken;
use webhook::{WebhookRegistration, WebhookTriggers};

/// Resolves a flow id to its current definition and runs it
#[derive(Clone)]
pub struct FlowLauncher {
    store: Arc<dyn FlowStore>,
    engine: Arc<FlowEngine>,
}

impl FlowLauncher {
    pub fn new(store: Arc<dyn FlowStore>, engine: Arc<FlowEngine>) -> Self {
        Self { store, engine }
    }

    /// Load and start the flow; returns the run id
    pub async fn launch(&self, flow_id: &str, source: TriggerKind) -> Result<String> {
        let flow = self.store.load(flow_id).await?;
        let run_id = self.engine.run(flow).await?;
        tracing::info!("🚀 {} trigger started run {} of flow {}", source, run_id, flow_id);
        Ok(run_id)
    }

    /// `launch` for background loops: failures are logged and swallowed
    pub async fn activate(&self, flow_id: &str, source: TriggerKind) {
        if let Err(e) = self.launch(flow_id, source).await {
            tracing::error!("❌ {} trigger could not start flow {}: {}", source, flow_id, e);
        }
    }
}

/// Serializable view of every trigger table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTriggers {
    pub schedules: Vec<ScheduleRegistration>,
    pub webhooks: Vec<WebhookRegistration>,
    pub file_watchers: Vec<FileWatchRegistration>,
    pub clipboard: Option<ClipboardRegistration>,
    pub hotkeys: Vec<HotkeyRegistration>,
}

impl ActiveTriggers {
    /// Total number of live registrations
    pub fn len(&self) -> usize {
        self.schedules.len()
            + self.webhooks.len()
            + self.file_watchers.len()
            + usize::from(self.clipboard.is_some())
            + self.hotkeys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of a bulk trigger registration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartupReport {
    /// Flows inspected
    pub flows: usize,
    /// Trigger nodes registered
    pub registered: usize,
    /// Trigger nodes disabled or needing no registration
    pub skipped: usize,
    /// Trigger nodes (or whole flows) that failed to register or load
    pub failed: usize,
}

impl std::ops::AddAssign for StartupReport {
    fn add_assign(&mut self, other: Self) {
        self.flows += other.flows;
        self.registered += other.registered;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

pub struct TriggerManager {
    store: Arc<dyn FlowStore>,
    launcher: FlowLauncher,
    config: TriggerConfig,
    shutdown: CancellationToken,
    schedules: ScheduleTriggers,
    webhooks: WebhookTriggers,
    file_watchers: FileWatchTriggers,
    clipboard: ClipboardTriggers,
    hotkeys: HotkeyTriggers,
}

impl TriggerManager {
    /// Manager with no clipboard or key capture backend
    pub fn new(store: Arc<dyn FlowStore>, engine: Arc<FlowEngine>, config: TriggerConfig) -> Self {
        let launcher = FlowLauncher::new(Arc::clone(&store), engine);
        let shutdown = CancellationToken::new();

        Self {
            schedules: ScheduleTriggers::new(launcher.clone(), shutdown.clone()),
            webhooks: WebhookTriggers::new(launcher.clone(), &config, shutdown.clone()),
            file_watchers: FileWatchTriggers::new(launcher.clone(), shutdown.clone()),
            clipboard: ClipboardTriggers::new(
                launcher.clone(),
                Arc::new(NoClipboard),
                config.clipboard_poll_interval(),
                shutdown.clone(),
            ),
            hotkeys: HotkeyTriggers::new(launcher.clone(), Arc::new(NoHotkeyCapture), shutdown.clone()),
            store,
            launcher,
            config,
            shutdown,
        }
    }

    /// Use `source` for clipboard monitoring; call before registering anything
    pub fn with_clipboard(mut self, source: Arc<dyn ClipboardSource>) -> Self {
        self.clipboard = ClipboardTriggers::new(
            self.launcher.clone(),
            source,
            self.config.clipboard_poll_interval(),
            self.shutdown.clone(),
        );
        self
    }

    /// Use `capture` for global hotkeys; call before registering anything
    pub fn with_hotkey_capture(mut self, capture: Arc<dyn HotkeyCapture>) -> Self {
        self.hotkeys = HotkeyTriggers::new(self.launcher.clone(), capture, self.shutdown.clone());
        self
    }

    pub async fn register_schedule(&self, flow_id: &str, cron: &str) -> Result<()> {
        self.schedules.register(flow_id, cron).await
    }

    pub async fn unregister_schedule(&self, flow_id: &str) -> Result<()> {
        self.schedules.unregister(flow_id).await
    }

    pub async fn register_webhook(&self, flow_id: &str, path: &str, method: &str) -> Result<()> {
        self.webhooks.register(flow_id, path, method).await
    }

    pub async fn unregister_webhook(&self, flow_id: &str, path: &str, method: &str) -> Result<()> {
        self.webhooks.unregister(flow_id, path, method).await
    }

    /// Bound address of the shared webhook listener, once started
    pub async fn webhook_addr(&self) -> Option<SocketAddr> {
        self.webhooks.local_addr().await
    }

    pub async fn register_file_watch(&self, flow_id: &str, path: &str, events: WatchFilter) -> Result<()> {
        self.file_watchers.register(flow_id, path, events).await
    }

    pub async fn unregister_file_watch(&self, flow_id: &str, path: &str) -> Result<()> {
        self.file_watchers.unregister(flow_id, path).await
    }

    pub async fn register_clipboard(&self, flow_id: &str, text_only: bool) -> Result<()> {
        self.clipboard.register(flow_id, text_only).await
    }

    pub async fn unregister_clipboard(&self, flow_id: &str) -> Result<()> {
        self.clipboard.unregister(flow_id).await
    }

    pub async fn register_hotkey(&self, flow_id: &str, hotkey: &str) -> Result<()> {
        self.hotkeys.register(flow_id, hotkey).await
    }

    pub async fn unregister_hotkey(&self, flow_id: &str) -> Result<()> {
        self.hotkeys.unregister(flow_id).await
    }

    /// Deliver a key press from a capture backend; returns the started run id
    pub async fn fire_hotkey(&self, hotkey: &str) -> Result<String> {
        self.hotkeys.fire(hotkey).await
    }

    /// Register one trigger from its typed configuration
    pub async fn register_trigger(&self, flow_id: &str, spec: &TriggerSpec) -> Result<()> {
        tracing::debug!("🔌 Registering {} trigger for flow {}", spec.kind(), flow_id);
        match spec {
            TriggerSpec::Schedule { cron } => self.register_schedule(flow_id, cron).await,
            TriggerSpec::Webhook { path, method } => self.register_webhook(flow_id, path, method).await,
            TriggerSpec::FileWatch { path, events } => {
                self.register_file_watch(flow_id, path, *events).await
            }
            TriggerSpec::Clipboard { text_only } => self.register_clipboard(flow_id, *text_only).await,
            TriggerSpec::Hotkey { hotkey } => self.register_hotkey(flow_id, hotkey).await,
        }
    }

    /// Release one trigger described by its typed configuration
    pub async fn unregister_trigger(&self, flow_id: &str, spec: &TriggerSpec) -> Result<()> {
        match spec {
            TriggerSpec::Schedule { .. } => self.unregister_schedule(flow_id).await,
            TriggerSpec::Webhook { path, method } => self.unregister_webhook(flow_id, path, method).await,
            TriggerSpec::FileWatch { path, .. } => self.unregister_file_watch(flow_id, path).await,
            TriggerSpec::Clipboard { .. } => self.unregister_clipboard(flow_id).await,
            TriggerSpec::Hotkey { .. } => self.unregister_hotkey(flow_id).await,
        }
    }

    /// Register every enabled trigger node of one flow
    ///
    /// A failing node is logged and counted; the remaining nodes still register.
    pub async fn register_flow_triggers(&self, flow: &Flow) -> StartupReport {
        let mut report = StartupReport {
            flows: 1,
            ..Default::default()
        };

        for node in flow.trigger_nodes() {
            if node.is_disabled() {
                tracing::debug!("⏭️ Skipping disabled trigger node {} in flow {}", node.id, flow.id);
                report.skipped += 1;
                continue;
            }
            let registered = match node.trigger_spec() {
                Ok(Some(spec)) => self.register_trigger(&flow.id, &spec).await,
                Ok(None) => {
                    report.skipped += 1;
                    continue;
                }
                Err(e) => Err(e),
            };
            match registered {
                Ok(()) => report.registered += 1,
                Err(e) => {
                    tracing::error!("❌ Trigger node {} in flow {} not registered: {}", node.id, flow.id, e);
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Release every trigger of one flow; returns how many were released
    pub async fn unregister_flow_triggers(&self, flow: &Flow) -> usize {
        let mut released = 0;
        for node in flow.trigger_nodes() {
            let Ok(Some(spec)) = node.trigger_spec() else {
                continue;
            };
            match self.unregister_trigger(&flow.id, &spec).await {
                Ok(()) => released += 1,
                Err(e) if e.is_not_found() => {}
                Err(e) => tracing::warn!("⚠️ Could not release trigger node {} in flow {}: {}", node.id, flow.id, e),
            }
        }
        released
    }

    /// Bulk-load path run once at process start: register the triggers of every stored flow
    pub async fn start_all_triggers(&self) -> Result<StartupReport> {
        tracing::info!("🔌 Registering triggers of all stored flows");
        let summaries = self.store.list().await?;
        let mut report = StartupReport::default();

        for summary in summaries {
            match self.store.load(&summary.id).await {
                Ok(flow) => report += self.register_flow_triggers(&flow).await,
                Err(e) => {
                    tracing::error!("❌ Could not load flow {} for trigger startup: {}", summary.id, e);
                    report.flows += 1;
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            "📊 Trigger startup: {} flows, {} registered, {} skipped, {} failed",
            report.flows,
            report.registered,
            report.skipped,
            report.failed
        );
        Ok(report)
    }

    /// Snapshot of every trigger table
    pub async fn active_triggers(&self) -> ActiveTriggers {
        ActiveTriggers {
            schedules: self.schedules.snapshot().await,
            webhooks: self.webhooks.snapshot().await,
            file_watchers: self.file_watchers.snapshot().await,
            clipboard: self.clipboard.snapshot().await,
            hotkeys: self.hotkeys.snapshot().await,
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop every trigger's background activity and wait, up to the shutdown
    /// deadline, for each subsystem to confirm. Later calls are no-ops.
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            tracing::debug!("Trigger manager already shut down");
            return;
        }
        tracing::info!("⏹️ Shutting down trigger manager");
        self.shutdown.cancel();

        let deadline = self.config.shutdown_deadline();
        let all = async {
            tokio::join!(
                self.schedules.shutdown(),
                self.webhooks.shutdown(),
                self.file_watchers.shutdown(),
                self.clipboard.shutdown(),
                self.hotkeys.shutdown(),
            )
        };
        if tokio::time::timeout(deadline, all).await.is_err() {
            tracing::warn!("⚠️ Trigger shutdown exceeded {:?}, leaving remaining tasks behind", deadline);
        } else {
            tracing::info!("✅ All triggers stopped");
        }
    }
}

