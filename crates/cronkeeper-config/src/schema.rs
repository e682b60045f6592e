//! Configuration schema definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub notifications: NotificationsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Jobs created on startup when no job with the same name exists yet.
    #[serde(default)]
    pub jobs: Vec<JobSeedConfig>,
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory holding the job store.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Timeout applied to seeded jobs that do not set their own.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// How long shutdown waits for in-flight executions before aborting them.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    /// Clear `is_running` flags left behind by a previous process.
    #[serde(default = "default_true")]
    pub reset_stale_on_start: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            default_timeout_ms: default_timeout_ms(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            reset_stale_on_start: default_true(),
        }
    }
}

fn default_storage_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".cronkeeper")
}

fn default_timeout_ms() -> u64 {
    300_000
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

/// Notification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    /// Emit outcomes and alerts through the log.
    #[serde(default = "default_true")]
    pub log: bool,

    /// POST outcomes and alerts to this URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,

    #[serde(default = "default_webhook_timeout_secs")]
    pub webhook_timeout_secs: u64,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            log: default_true(),
            webhook_url: None,
            webhook_timeout_secs: default_webhook_timeout_secs(),
        }
    }
}

fn default_webhook_timeout_secs() -> u64 {
    10
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`.
    #[serde(default = "default_level")]
    pub level: String,

    /// Emit JSON lines on the console.
    #[serde(default)]
    pub json: bool,

    /// Directory for daily-rotated log files.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
            file_dir: None,
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

/// A job declared in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSeedConfig {
    pub name: String,

    pub schedule: String,

    pub task: String,

    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,

    #[serde(default = "default_true")]
    pub active: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    #[serde(default)]
    pub max_retries: u32,

    #[serde(default)]
    pub retry_delay_ms: u64,

    #[serde(default = "default_priority")]
    pub priority: u8,

    #[serde(default)]
    pub notify_on_success: bool,

    #[serde(default = "default_true")]
    pub notify_on_failure: bool,

    #[serde(default)]
    pub recipients: Vec<String>,
}

fn default_priority() -> u8 {
    5
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
