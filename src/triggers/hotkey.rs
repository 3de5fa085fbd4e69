//! Hotkey triggers
//!
//! Each flow owns at most one key combination. The combination is handed to a
//! `HotkeyCapture` backend to grab at the OS level; presses come back through
//! `fire`, which resolves the combination to its flow.

use crate::error::{FlowError, Result};
use crate::triggers::capture::HotkeyCapture;
use crate::triggers::FlowLauncher;
use crate::workflow::types::TriggerKind;
use serde::Serialize;
use std::{collections::HashMap, fmt, str::FromStr, sync::Arc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// A key combination in canonical form: modifiers in `Ctrl+Alt+Shift+Meta`
/// order followed by exactly one key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Hotkey {
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
    pub meta: bool,
    pub key: String,
}

impl FromStr for Hotkey {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        let mut hotkey = Hotkey {
            ctrl: false,
            alt: false,
            shift: false,
            meta: false,
            key: String::new(),
        };

        for token in s.split('+').map(str::trim) {
            if token.is_empty() {
                return Err(FlowError::invalid_trigger(
                    "hotkey",
                    format!("empty key in combination '{}'", s),
                ));
            }
            match token.to_ascii_lowercase().as_str() {
                "ctrl" | "control" => hotkey.ctrl = true,
                "alt" | "option" => hotkey.alt = true,
                "shift" => hotkey.shift = true,
                "meta" | "cmd" | "command" | "super" | "win" => hotkey.meta = true,
                _ if !hotkey.key.is_empty() => {
                    return Err(FlowError::invalid_trigger(
                        "hotkey",
                        format!("'{}' has more than one non-modifier key", s),
                    ));
                }
                _ => hotkey.key = canonical_key(token),
            }
        }

        if hotkey.key.is_empty() {
            return Err(FlowError::invalid_trigger(
                "hotkey",
                format!("'{}' has no non-modifier key", s),
            ));
        }
        Ok(hotkey)
    }
}

/// Single characters upper-case, named keys capitalized ("f5" -> "F5", "space" -> "Space")
fn canonical_key(token: &str) -> String {
    let mut chars = token.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

impl fmt::Display for Hotkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (held, name) in [
            (self.ctrl, "Ctrl"),
            (self.alt, "Alt"),
            (self.shift, "Shift"),
            (self.meta, "Meta"),
        ] {
            if held {
                write!(f, "{}+", name)?;
            }
        }
        f.write_str(&self.key)
    }
}

/// Snapshot entry for one hotkey registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HotkeyRegistration {
    pub flow_id: String,
    pub hotkey: String,
}

#[derive(Debug, Default)]
struct HotkeyTable {
    by_flow: HashMap<String, Hotkey>,
    by_combo: HashMap<Hotkey, String>,
}

pub struct HotkeyTriggers {
    launcher: FlowLauncher,
    capture: Arc<dyn HotkeyCapture>,
    shutdown: CancellationToken,
    table: Mutex<HotkeyTable>,
}

impl HotkeyTriggers {
    pub fn new(
        launcher: FlowLauncher,
        capture: Arc<dyn HotkeyCapture>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            launcher,
            capture,
            shutdown,
            table: Mutex::new(HotkeyTable::default()),
        }
    }

    /// Bind `combo` to `flow_id`, replacing the flow's previous combination
    ///
    /// A combination already bound to another flow moves to this one.
    pub async fn register(&self, flow_id: &str, combo: &str) -> Result<()> {
        let hotkey: Hotkey = combo.parse()?;
        let mut table = self.table.lock().await;
        if self.shutdown.is_cancelled() {
            return Err(FlowError::resource("global hotkey", "trigger manager is shut down"));
        }

        if table.by_flow.get(flow_id) == Some(&hotkey) {
            tracing::debug!("⌨️ Hotkey '{}' already bound to flow {}", hotkey, flow_id);
            return Ok(());
        }

        if !table.by_combo.contains_key(&hotkey) {
            self.capture
                .register_global_hotkey(&hotkey)
                .await
                .map_err(|e| FlowError::resource("global hotkey", format!("{:#}", e)))?;
        }

        if let Some(previous_flow) = table.by_combo.insert(hotkey.clone(), flow_id.to_string()) {
            if previous_flow != flow_id {
                tracing::warn!("⚠️ Hotkey '{}' moved from flow {} to {}", hotkey, previous_flow, flow_id);
                table.by_flow.remove(&previous_flow);
            }
        }

        if let Some(previous) = table.by_flow.insert(flow_id.to_string(), hotkey.clone()) {
            table.by_combo.remove(&previous);
            self.release(&previous).await;
        }

        tracing::info!("⌨️ Registered hotkey '{}' for flow {}", hotkey, flow_id);
        Ok(())
    }

    /// Release the flow's combination; `NotFound` if it has none
    pub async fn unregister(&self, flow_id: &str) -> Result<()> {
        let mut table = self.table.lock().await;
        let hotkey = table
            .by_flow
            .remove(flow_id)
            .ok_or_else(|| FlowError::not_found("hotkey trigger", flow_id))?;
        table.by_combo.remove(&hotkey);
        self.release(&hotkey).await;

        tracing::info!("🗑️ Unregistered hotkey '{}' for flow {}", hotkey, flow_id);
        Ok(())
    }

    /// Deliver a key press; returns the id of the run it started
    pub async fn fire(&self, combo: &str) -> Result<String> {
        let hotkey: Hotkey = combo.parse()?;
        let flow_id = self
            .table
            .lock()
            .await
            .by_combo
            .get(&hotkey)
            .cloned()
            .ok_or_else(|| FlowError::not_found("hotkey trigger", hotkey.to_string()))?;

        tracing::debug!("🔔 Hotkey '{}' pressed for flow {}", hotkey, flow_id);
        self.launcher.launch(&flow_id, TriggerKind::Hotkey).await
    }

    pub async fn snapshot(&self) -> Vec<HotkeyRegistration> {
        let mut registrations: Vec<HotkeyRegistration> = self
            .table
            .lock()
            .await
            .by_flow
            .iter()
            .map(|(flow_id, hotkey)| HotkeyRegistration {
                flow_id: flow_id.clone(),
                hotkey: hotkey.to_string(),
            })
            .collect();
        registrations.sort_by(|a, b| a.flow_id.cmp(&b.flow_id));
        registrations
    }

    pub async fn shutdown(&self) {
        let mut table = self.table.lock().await;
        table.by_combo.clear();
        for (_, hotkey) in table.by_flow.drain() {
            self.release(&hotkey).await;
        }
    }

    async fn release(&self, hotkey: &Hotkey) {
        if let Err(e) = self.capture.unregister_global_hotkey(hotkey).await {
            tracing::warn!("⚠️ Failed to release hotkey '{}': {:#}", hotkey, e);
        }
    }
}
