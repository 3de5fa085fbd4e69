//! Platform capabilities consumed by the clipboard and hotkey triggers
//!
//! Reading the system clipboard and grabbing global key combinations are OS
//! specific; the trigger logic only sees these two traits. The in-memory
//! implementations back tests and embedders that feed events themselves, and
//! the no-op ones keep a headless daemon running without either capability.

use crate::triggers::hotkey::Hotkey;
use async_trait::async_trait;
use std::collections::HashSet;
use tokio::sync::Mutex;

/// One observation of the clipboard
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClipboardContent {
    Text(String),
    /// Non-text content, identified by a format name or digest
    Other(String),
}

impl ClipboardContent {
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }
}

/// Read access to the system clipboard
#[async_trait]
pub trait ClipboardSource: Send + Sync {
    /// Current clipboard content, `None` when empty
    async fn get_clipboard_content(&self) -> anyhow::Result<Option<ClipboardContent>>;
}

/// OS-level global hotkey registration
#[async_trait]
pub trait HotkeyCapture: Send + Sync {
    async fn register_global_hotkey(&self, hotkey: &Hotkey) -> anyhow::Result<()>;
    async fn unregister_global_hotkey(&self, hotkey: &Hotkey) -> anyhow::Result<()>;
}

/// Clipboard that never has content
#[derive(Debug, Clone, Copy, Default)]
pub struct NoClipboard;

#[async_trait]
impl ClipboardSource for NoClipboard {
    async fn get_clipboard_content(&self) -> anyhow::Result<Option<ClipboardContent>> {
        Ok(None)
    }
}

/// Clipboard whose content is set programmatically
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    content: Mutex<Option<ClipboardContent>>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, content: ClipboardContent) {
        *self.content.lock().await = Some(content);
    }

    pub async fn set_text(&self, text: impl Into<String>) {
        self.set(ClipboardContent::Text(text.into())).await;
    }

    pub async fn clear(&self) {
        *self.content.lock().await = None;
    }
}

#[async_trait]
impl ClipboardSource for MemoryClipboard {
    async fn get_clipboard_content(&self) -> anyhow::Result<Option<ClipboardContent>> {
        Ok(self.content.lock().await.clone())
    }
}

/// Accepts every hotkey without grabbing anything; presses arrive via `fire_hotkey`
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHotkeyCapture;

#[async_trait]
impl HotkeyCapture for NoHotkeyCapture {
    async fn register_global_hotkey(&self, hotkey: &Hotkey) -> anyhow::Result<()> {
        tracing::debug!("⌨️ No key capture backend, '{}' is table-only", hotkey);
        Ok(())
    }

    async fn unregister_global_hotkey(&self, _hotkey: &Hotkey) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Tracks grabbed combinations; combinations marked taken fail to register,
/// as they would when another application already owns them
#[derive(Debug, Default)]
pub struct MemoryHotkeyCapture {
    registered: Mutex<HashSet<Hotkey>>,
    taken: Mutex<HashSet<Hotkey>>,
}

impl MemoryHotkeyCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make future registrations of `hotkey` fail
    pub async fn mark_taken(&self, hotkey: Hotkey) {
        self.taken.lock().await.insert(hotkey);
    }

    /// Currently grabbed combinations in canonical form, sorted
    pub async fn registered(&self) -> Vec<String> {
        let mut combos: Vec<String> = self
            .registered
            .lock()
            .await
            .iter()
            .map(ToString::to_string)
            .collect();
        combos.sort();
        combos
    }
}

#[async_trait]
impl HotkeyCapture for MemoryHotkeyCapture {
    async fn register_global_hotkey(&self, hotkey: &Hotkey) -> anyhow::Result<()> {
        if self.taken.lock().await.contains(hotkey) {
            anyhow::bail!("'{}' is already grabbed by another application", hotkey);
        }
        self.registered.lock().await.insert(hotkey.clone());
        Ok(())
    }

    async fn unregister_global_hotkey(&self, hotkey: &Hotkey) -> anyhow::Result<()> {
        self.registered.lock().await.remove(hotkey);
        Ok(())
    }
}
