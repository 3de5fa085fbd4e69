//! Clipboard trigger: a single global monitor polling a `ClipboardSource`
//!
//! Registering a new monitor cancels the previous one. The first content a
//! monitor observes is its baseline; only later changes fire.

use crate::error::{FlowError, Result};
use crate::triggers::capture::{ClipboardContent, ClipboardSource};
use crate::triggers::FlowLauncher;
use crate::workflow::types::TriggerKind;
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tokio::{sync::Mutex, task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Snapshot of the active clipboard monitor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipboardRegistration {
    pub flow_id: String,
    pub text_only: bool,
}

struct Monitor {
    registration: ClipboardRegistration,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct ClipboardTriggers {
    launcher: FlowLauncher,
    source: Arc<dyn ClipboardSource>,
    interval: Duration,
    shutdown: CancellationToken,
    monitor: Mutex<Option<Monitor>>,
}

impl ClipboardTriggers {
    pub fn new(
        launcher: FlowLauncher,
        source: Arc<dyn ClipboardSource>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            launcher,
            source,
            interval,
            shutdown,
            monitor: Mutex::new(None),
        }
    }

    /// Start monitoring for `flow_id`, replacing whichever monitor was active
    pub async fn register(&self, flow_id: &str, text_only: bool) -> Result<()> {
        let mut monitor = self.monitor.lock().await;
        if self.shutdown.is_cancelled() {
            return Err(FlowError::resource("clipboard monitor", "trigger manager is shut down"));
        }

        let registration = ClipboardRegistration {
            flow_id: flow_id.to_string(),
            text_only,
        };
        let cancel = self.shutdown.child_token();
        let task = tokio::spawn(poll_loop(
            self.launcher.clone(),
            Arc::clone(&self.source),
            self.interval,
            registration.clone(),
            cancel.clone(),
        ));

        if let Some(previous) = monitor.replace(Monitor {
            registration,
            cancel,
            task,
        }) {
            tracing::debug!("♻️ Clipboard monitor moved from flow {} to {}", previous.registration.flow_id, flow_id);
            previous.cancel.cancel();
        }

        tracing::info!("📋 Monitoring clipboard for flow {} (text only: {})", flow_id, text_only);
        Ok(())
    }

    /// Stop the monitor; `NotFound` unless it belongs to `flow_id`
    pub async fn unregister(&self, flow_id: &str) -> Result<()> {
        let mut monitor = self.monitor.lock().await;
        match monitor.take() {
            Some(active) if active.registration.flow_id == flow_id => {
                active.cancel.cancel();
                tracing::info!("🗑️ Stopped clipboard monitor for flow {}", flow_id);
                Ok(())
            }
            other => {
                *monitor = other;
                Err(FlowError::not_found("clipboard trigger", flow_id))
            }
        }
    }

    pub async fn snapshot(&self) -> Option<ClipboardRegistration> {
        self.monitor
            .lock()
            .await
            .as_ref()
            .map(|monitor| monitor.registration.clone())
    }

    pub async fn shutdown(&self) {
        let active = self.monitor.lock().await.take();
        if let Some(active) = active {
            active.cancel.cancel();
            let _ = active.task.await;
        }
    }
}

async fn poll_loop(
    launcher: FlowLauncher,
    source: Arc<dyn ClipboardSource>,
    interval: Duration,
    registration: ClipboardRegistration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last: Option<ClipboardContent> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let content = match source.get_clipboard_content().await {
                    Ok(Some(content)) => content,
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::debug!("📋 Clipboard read failed: {:#}", e);
                        continue;
                    }
                };
                if registration.text_only && !content.is_text() {
                    continue;
                }
                if last.as_ref() == Some(&content) {
                    continue;
                }
                let baseline = last.is_none();
                last = Some(content);
                if !baseline {
                    tracing::debug!("🔔 Clipboard changed, triggering flow {}", registration.flow_id);
                    launcher.activate(&registration.flow_id, TriggerKind::Clipboard).await;
                }
            }
        }
    }
    tracing::debug!("📋 Clipboard monitor for flow {} exited", registration.flow_id);
}
