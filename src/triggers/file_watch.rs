//! File-watch triggers
//!
//! Every registration owns a `notify` watcher (the OS watch handle) and a
//! background task that forwards matching events to the launcher. Dropping the
//! watcher releases the handle, so unregistering frees it before returning.

use crate::error::{FlowError, Result};
use crate::triggers::FlowLauncher;
use crate::workflow::types::{TriggerKind, WatchFilter};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use std::{collections::HashMap, path::Path};
use tokio::{sync::mpsc, sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;

impl WatchFilter {
    /// Whether a filesystem event of `kind` fires a trigger with this filter
    ///
    /// `All` covers every change but not plain access.
    pub fn matches(&self, kind: &EventKind) -> bool {
        match self {
            Self::All => !matches!(kind, EventKind::Access(_)),
            Self::Create => matches!(kind, EventKind::Create(_)),
            Self::Modify => matches!(kind, EventKind::Modify(_)),
            Self::Delete => matches!(kind, EventKind::Remove(_)),
        }
    }
}

/// Snapshot entry for one file-watch registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileWatchRegistration {
    pub flow_id: String,
    pub path: String,
    pub events: WatchFilter,
}

struct Watch {
    events: WatchFilter,
    // held for its Drop, which releases the OS handle
    _watcher: RecommendedWatcher,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct FileWatchTriggers {
    launcher: FlowLauncher,
    shutdown: CancellationToken,
    watches: Mutex<HashMap<(String, String), Watch>>,
}

impl FileWatchTriggers {
    pub fn new(launcher: FlowLauncher, shutdown: CancellationToken) -> Self {
        Self {
            launcher,
            shutdown,
            watches: Mutex::new(HashMap::new()),
        }
    }

    /// Watch `path` for `flow_id`, replacing any watch on the same pair
    ///
    /// A path that cannot be watched is `ResourceAcquisition`, with nothing
    /// left registered.
    pub async fn register(&self, flow_id: &str, path: &str, events: WatchFilter) -> Result<()> {
        let path = path.trim();
        if path.is_empty() {
            return Err(FlowError::invalid_trigger("file_watch", "watch path must not be empty"));
        }

        let mut watches = self.watches.lock().await;
        if self.shutdown.is_cancelled() {
            return Err(FlowError::resource("file watcher", "trigger manager is shut down"));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            // the receiver is gone once the watch is being torn down
            let _ = tx.send(res);
        })
        .map_err(|e| FlowError::resource("file watcher", e))?;
        watcher
            .watch(Path::new(path), RecursiveMode::NonRecursive)
            .map_err(|e| FlowError::resource("file watcher", format!("{}: {}", path, e)))?;

        let cancel = self.shutdown.child_token();
        let task = tokio::spawn(watch_loop(
            self.launcher.clone(),
            flow_id.to_string(),
            events,
            rx,
            cancel.clone(),
        ));

        let key = (flow_id.to_string(), path.to_string());
        if let Some(old) = watches.insert(
            key,
            Watch {
                events,
                _watcher: watcher,
                cancel,
                task,
            },
        ) {
            tracing::debug!("♻️ Replacing file watch on {} for flow {}", path, flow_id);
            old.cancel.cancel();
        }

        tracing::info!("👁️ Watching {} ({}) for flow {}", path, events, flow_id);
        Ok(())
    }

    /// Stop watching `path` for `flow_id`; `NotFound` if not watched
    pub async fn unregister(&self, flow_id: &str, path: &str) -> Result<()> {
        let key = (flow_id.to_string(), path.trim().to_string());
        let watch = self
            .watches
            .lock()
            .await
            .remove(&key)
            .ok_or_else(|| FlowError::not_found("file watch trigger", format!("{} {}", flow_id, key.1)))?;

        watch.cancel.cancel();
        drop(watch);

        tracing::info!("🗑️ Stopped watching {} for flow {}", key.1, flow_id);
        Ok(())
    }

    pub async fn snapshot(&self) -> Vec<FileWatchRegistration> {
        let mut registrations: Vec<FileWatchRegistration> = self
            .watches
            .lock()
            .await
            .iter()
            .map(|((flow_id, path), watch)| FileWatchRegistration {
                flow_id: flow_id.clone(),
                path: path.clone(),
                events: watch.events,
            })
            .collect();
        registrations.sort_by(|a, b| (&a.flow_id, &a.path).cmp(&(&b.flow_id, &b.path)));
        registrations
    }

    /// Release every watch handle and wait for the listener tasks to exit
    pub async fn shutdown(&self) {
        let drained: Vec<Watch> = self.watches.lock().await.drain().map(|(_, watch)| watch).collect();
        let mut tasks = Vec::with_capacity(drained.len());
        for watch in drained {
            watch.cancel.cancel();
            tasks.push(watch.task);
        }
        for task in tasks {
            let _ = task.await;
        }
    }
}

async fn watch_loop(
    launcher: FlowLauncher,
    flow_id: String,
    events: WatchFilter,
    mut rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = rx.recv() => match received {
                Some(Ok(event)) if events.matches(&event.kind) => {
                    tracing::debug!("🔔 File event {:?} on {:?} for flow {}", event.kind, event.paths, flow_id);
                    launcher.activate(&flow_id, TriggerKind::FileWatch).await;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => tracing::warn!("⚠️ File watcher error for flow {}: {}", flow_id, e),
                None => break,
            },
        }
    }
    tracing::debug!("👁️ File watch loop for flow {} exited", flow_id);
}
