//! Configuration management for the ForgeFlow core
//!
//! Handles engine budgets and policies, trigger listener settings and the data
//! directory. Every value can be overridden through a `FORGEFLOW_*` env var.

use crate::runtime::engine::{FailurePolicy, JoinPolicy};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, str::FromStr, time::Duration};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Flow execution engine configuration
    pub engine: EngineConfig,
    /// Trigger manager configuration
    pub triggers: TriggerConfig,
    /// Storage configuration
    pub storage: StorageConfig,
}

/// Flow execution engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Wall-clock budget of a single run, in seconds
    pub run_timeout_secs: u64,
    /// What a failed node does to its downstream nodes
    pub failure_policy: FailurePolicy,
    /// When a node with several predecessors becomes ready
    pub join_policy: JoinPolicy,
}

/// Trigger manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Webhook listener bind address (e.g., "0.0.0.0")
    pub webhook_host: String,
    /// Webhook listener port; 0 binds an ephemeral port
    pub webhook_port: u16,
    /// Grace period given to in-flight webhook requests at shutdown, in seconds
    pub webhook_grace_secs: u64,
    /// Clipboard poll interval, in milliseconds
    pub clipboard_poll_ms: u64,
    /// Upper bound on how long shutdown waits for background tasks, in seconds
    pub shutdown_deadline_secs: u64,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding `forgeflow.db`
    pub data_dir: PathBuf,
}

impl EngineConfig {
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

impl TriggerConfig {
    pub fn webhook_grace(&self) -> Duration {
        Duration::from_secs(self.webhook_grace_secs)
    }

    pub fn clipboard_poll_interval(&self) -> Duration {
        Duration::from_millis(self.clipboard_poll_ms.max(1))
    }

    pub fn shutdown_deadline(&self) -> Duration {
        Duration::from_secs(self.shutdown_deadline_secs)
    }
}

impl StorageConfig {
    /// SQLite connection string for the flow and execution database
    pub fn database_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.data_dir.join("forgeflow.db").display())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            run_timeout_secs: env_or("FORGEFLOW_RUN_TIMEOUT_SECS", 300),
            failure_policy: env_or("FORGEFLOW_FAILURE_POLICY", FailurePolicy::Continue),
            join_policy: env_or("FORGEFLOW_JOIN_POLICY", JoinPolicy::All),
        }
    }
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            webhook_host: std::env::var("FORGEFLOW_WEBHOOK_HOST")
                .unwrap_or_else(|_| "0.0.0.0".to_string()),
            webhook_port: env_or("FORGEFLOW_WEBHOOK_PORT", 8080),
            webhook_grace_secs: env_or("FORGEFLOW_WEBHOOK_GRACE_SECS", 5),
            clipboard_poll_ms: env_or("FORGEFLOW_CLIPBOARD_POLL_MS", 500),
            shutdown_deadline_secs: env_or("FORGEFLOW_SHUTDOWN_DEADLINE_SECS", 10),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = std::env::var("FORGEFLOW_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::config_dir()
                    .map(|dir| dir.join("ForgeFlow"))
                    .unwrap_or_else(|| PathBuf::from("data"))
            });
        Self { data_dir }
    }
}

impl Default for Config {
    /// Default configuration with ENV_VAR overrides
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            triggers: TriggerConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// Parse an env var, falling back to `default` when unset or unparseable
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("⚠️ Ignoring unparseable {}={:?}", key, raw);
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_names_parse() {
        assert_eq!("continue".parse::<FailurePolicy>().unwrap(), FailurePolicy::Continue);
        assert_eq!(
            "halt_branch".parse::<FailurePolicy>().unwrap(),
            FailurePolicy::HaltBranch
        );
        assert_eq!("ANY".parse::<JoinPolicy>().unwrap(), JoinPolicy::Any);
        assert!("sometimes".parse::<JoinPolicy>().is_err());
    }

    #[test]
    fn test_env_or_falls_back_on_garbage() {
        std::env::set_var("FORGEFLOW_TEST_ENV_OR", "not-a-number");
        assert_eq!(env_or("FORGEFLOW_TEST_ENV_OR", 42u64), 42);
        std::env::set_var("FORGEFLOW_TEST_ENV_OR", " 7 ");
        assert_eq!(env_or("FORGEFLOW_TEST_ENV_OR", 42u64), 7);
        assert_eq!(env_or("FORGEFLOW_TEST_ENV_OR_UNSET", 3u16), 3);
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = Config {
            engine: EngineConfig {
                run_timeout_secs: 60,
                failure_policy: FailurePolicy::HaltBranch,
                join_policy: JoinPolicy::Any,
            },
            triggers: TriggerConfig {
                webhook_host: "127.0.0.1".into(),
                webhook_port: 0,
                webhook_grace_secs: 1,
                clipboard_poll_ms: 0,
                shutdown_deadline_secs: 2,
            },
            storage: StorageConfig {
                data_dir: PathBuf::from("/tmp/ff"),
            },
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["engine"]["failure_policy"], "halt_branch");
        assert_eq!(json["engine"]["join_policy"], "any");

        let back: Config = serde_json::from_value(json).unwrap();
        assert_eq!(back.engine.run_timeout(), Duration::from_secs(60));
        // a zero poll interval would spin; it is clamped to 1ms
        assert_eq!(back.triggers.clipboard_poll_interval(), Duration::from_millis(1));
        assert!(back.storage.database_url().starts_with("sqlite:///tmp/ff/forgeflow.db"));
    }
}
