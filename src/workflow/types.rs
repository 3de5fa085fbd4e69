//! Core flow type definitions
//!
//! Defines flows, nodes and edges in the same camelCase JSON the visual editor
//! saves, plus the typed trigger configuration parsed out of trigger nodes.

use crate::error::{FlowError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{collections::HashSet, fmt, str::FromStr};

/// A complete flow definition: nodes and the edges connecting them
///
/// Flows are immutable once loaded; the engine plans a run from a snapshot and
/// never writes back into it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flow {
    /// Unique flow identifier, assigned by the store on first save if empty
    #[serde(default)]
    pub id: String,
    /// Human-readable flow name
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_enabled() -> bool {
    true
}

/// A single node of the flow graph
///
/// `data.nodeType` selects the action handler (or trigger kind); the editor's
/// component `type` and `position` are carried along but never interpreted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default)]
    pub data: NodeData,
}

/// Editor canvas position
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Node payload: label, category, type tag and free-form configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeData {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub category: NodeCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default)]
    pub config: Map<String, Value>,
}

/// Node category as shown in the editor palette
///
/// Only `Trigger` nodes are special: they configure trigger registrations and
/// are never executed as a graph step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeCategory {
    Trigger,
    Condition,
    #[default]
    Action,
    Ai,
    Loop,
    Utility,
    Apps,
    #[serde(other)]
    Other,
}

/// Directed dependency between two nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    #[serde(default)]
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
}

/// The five trigger kinds owned by the trigger manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Schedule,
    Webhook,
    FileWatch,
    Clipboard,
    Hotkey,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Schedule => "schedule",
            Self::Webhook => "webhook",
            Self::FileWatch => "file_watch",
            Self::Clipboard => "clipboard",
            Self::Hotkey => "hotkey",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed trigger configuration parsed from a trigger node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerSpec {
    /// Expected config: { "cron": "0 * * * *" }
    Schedule { cron: String },
    /// Expected config: { "path": "/webhook", "method": "POST" }
    Webhook { path: String, method: String },
    /// Expected config: { "path": "/home/me/inbox", "events": "create" }
    FileWatch { path: String, events: WatchFilter },
    /// Expected config: { "textOnly": true }
    Clipboard { text_only: bool },
    /// Expected config: { "hotkey": "Ctrl+Shift+K" }
    Hotkey { hotkey: String },
}

impl TriggerSpec {
    pub fn kind(&self) -> TriggerKind {
        match self {
            Self::Schedule { .. } => TriggerKind::Schedule,
            Self::Webhook { .. } => TriggerKind::Webhook,
            Self::FileWatch { .. } => TriggerKind::FileWatch,
            Self::Clipboard { .. } => TriggerKind::Clipboard,
            Self::Hotkey { .. } => TriggerKind::Hotkey,
        }
    }
}

/// Which filesystem changes fire a file-watch trigger
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchFilter {
    #[default]
    All,
    Create,
    Modify,
    Delete,
}

impl FromStr for WatchFilter {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "all" => Ok(Self::All),
            "create" => Ok(Self::Create),
            "modify" => Ok(Self::Modify),
            "delete" => Ok(Self::Delete),
            other => Err(FlowError::invalid_trigger(
                "file_watch",
                format!("unknown event filter '{}'", other),
            )),
        }
    }
}

impl fmt::Display for WatchFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::All => "all",
            Self::Create => "create",
            Self::Modify => "modify",
            Self::Delete => "delete",
        })
    }
}

impl Flow {
    /// Parse a flow from its JSON definition
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Check the structural invariants: unique node ids, edges between existing nodes
    pub fn validate(&self) -> Result<()> {
        let mut ids = HashSet::with_capacity(self.nodes.len());
        for node in &self.nodes {
            if node.id.is_empty() {
                return Err(FlowError::invalid_flow("node with empty id"));
            }
            if !ids.insert(node.id.as_str()) {
                return Err(FlowError::invalid_flow(format!(
                    "duplicate node id '{}'",
                    node.id
                )));
            }
        }
        for edge in &self.edges {
            for endpoint in [&edge.source, &edge.target] {
                if !ids.contains(endpoint.as_str()) {
                    return Err(FlowError::invalid_flow(format!(
                        "edge '{}' references unknown node '{}'",
                        edge.id, endpoint
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn trigger_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|node| node.is_trigger())
    }
}

impl Node {
    pub fn is_trigger(&self) -> bool {
        self.data.category == NodeCategory::Trigger
    }

    /// Type tag used to pick the action handler
    pub fn handler_type(&self) -> &str {
        self.data
            .node_type
            .as_deref()
            .or(self.kind.as_deref())
            .unwrap_or_default()
    }

    /// Display label, falling back to the node id
    pub fn label(&self) -> &str {
        if self.data.label.is_empty() {
            &self.id
        } else {
            &self.data.label
        }
    }

    pub fn config(&self) -> &Map<String, Value> {
        &self.data.config
    }

    /// True when the node's config carries `"enabled": false`
    pub fn is_disabled(&self) -> bool {
        matches!(self.data.config.get("enabled"), Some(Value::Bool(false)))
    }

    /// Parse the trigger configuration of a trigger node
    ///
    /// Returns `Ok(None)` for nodes that need no registration (manual and
    /// startup triggers, unknown trigger types, non-trigger nodes). Required
    /// keys are validated here so a bad node never reaches a trigger table.
    pub fn trigger_spec(&self) -> Result<Option<TriggerSpec>> {
        if !self.is_trigger() {
            return Ok(None);
        }
        let spec = match self.handler_type() {
            "trigger_schedule" => TriggerSpec::Schedule {
                cron: self.required_str("schedule", "cron")?,
            },
            "trigger_webhook" => TriggerSpec::Webhook {
                path: self.required_str("webhook", "path")?,
                method: self.optional_str("method").unwrap_or("POST").to_string(),
            },
            "trigger_file_watch" => TriggerSpec::FileWatch {
                path: self.required_str("file_watch", "path")?,
                events: self.optional_str("events").unwrap_or("all").parse()?,
            },
            "trigger_clipboard" => TriggerSpec::Clipboard {
                text_only: !matches!(self.data.config.get("textOnly"), Some(Value::Bool(false))),
            },
            "trigger_hotkey" => TriggerSpec::Hotkey {
                hotkey: self.required_str("hotkey", "hotkey")?,
            },
            _ => return Ok(None),
        };
        Ok(Some(spec))
    }

    fn optional_str(&self, key: &str) -> Option<&str> {
        self.data
            .config
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    fn required_str(&self, kind: &'static str, key: &str) -> Result<String> {
        self.optional_str(key).map(str::to_string).ok_or_else(|| {
            FlowError::invalid_trigger(
                kind,
                format!("node '{}' is missing '{}' in its config", self.id, key),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn trigger(node_type: &str, config: Value) -> Node {
        serde_json::from_value(json!({
            "id": "t1",
            "type": "custom",
            "data": { "label": "T", "category": "trigger", "nodeType": node_type, "config": config }
        }))
        .unwrap()
    }

    #[test]
    fn test_parses_editor_json() {
        let flow = Flow::from_json(
            r#"{
                "id": "flow-1",
                "name": "Inbox",
                "nodes": [
                    {"id": "a", "type": "custom", "position": {"x": 1, "y": 2},
                     "data": {"label": "Read", "category": "action", "nodeType": "action_read_file",
                              "config": {"path": "/tmp/x"}, "status": "idle"}},
                    {"id": "b", "data": {"label": "", "category": "widget"}}
                ],
                "edges": [{"id": "e1", "source": "a", "target": "b", "sourceHandle": "out"}],
                "createdAt": "2025-01-01T10:00:00Z"
            }"#,
        )
        .unwrap();

        assert!(flow.enabled);
        assert_eq!(flow.nodes[0].handler_type(), "action_read_file");
        assert_eq!(flow.nodes[0].position, Some(Position { x: 1.0, y: 2.0 }));
        assert_eq!(flow.nodes[1].data.category, NodeCategory::Other);
        assert_eq!(flow.nodes[1].label(), "b");
        assert_eq!(flow.edges[0].source_handle.as_deref(), Some("out"));
        flow.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_duplicates_and_dangling_edges() {
        let mut flow: Flow = serde_json::from_value(json!({
            "nodes": [{"id": "a"}, {"id": "a"}]
        }))
        .unwrap();
        assert!(matches!(flow.validate(), Err(FlowError::InvalidFlow { .. })));

        flow.nodes.pop();
        flow.edges.push(Edge {
            id: "e".into(),
            source: "a".into(),
            target: "ghost".into(),
            source_handle: None,
            target_handle: None,
        });
        let err = flow.validate().unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_trigger_specs_apply_defaults() {
        let spec = trigger("trigger_webhook", json!({"path": "/hook"})).trigger_spec().unwrap();
        assert_eq!(
            spec,
            Some(TriggerSpec::Webhook { path: "/hook".into(), method: "POST".into() })
        );

        let spec = trigger("trigger_file_watch", json!({"path": "/tmp"})).trigger_spec().unwrap();
        assert_eq!(
            spec,
            Some(TriggerSpec::FileWatch { path: "/tmp".into(), events: WatchFilter::All })
        );

        let spec = trigger("trigger_clipboard", json!({})).trigger_spec().unwrap();
        assert_eq!(spec, Some(TriggerSpec::Clipboard { text_only: true }));
        assert_eq!(spec.map(|spec| spec.kind()), Some(TriggerKind::Clipboard));

        assert_eq!(trigger("trigger_manual", json!({})).trigger_spec().unwrap(), None);
    }

    #[test]
    fn test_trigger_specs_validate_required_keys() {
        let err = trigger("trigger_schedule", json!({"cron": "  "})).trigger_spec().unwrap_err();
        assert!(matches!(err, FlowError::InvalidTrigger { kind: "schedule", .. }));

        let err = trigger("trigger_file_watch", json!({"path": "/tmp", "events": "rename"}))
            .trigger_spec()
            .unwrap_err();
        assert!(err.to_string().contains("rename"));
    }

    #[test]
    fn test_disabled_flag() {
        assert!(trigger("trigger_schedule", json!({"enabled": false})).is_disabled());
        assert!(!trigger("trigger_schedule", json!({"enabled": true})).is_disabled());
        assert!(!trigger("trigger_schedule", json!({})).is_disabled());
    }
}
