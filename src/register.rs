//! Builtin task handlers for Cronkeeper.
//!
//! | id        | config                         | result                    |
//! |-----------|--------------------------------|---------------------------|
//! | `noop`    | none                           | `{"ok": true}`            |
//! | `log`     | `message`, optional `level`    | `{"logged": message}`     |
//! | `sleep`   | `duration_ms`                  | `{"slept_ms": n}`         |
//! | `webhook` | `url`, optional `body`         | `{"status": code}`        |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use cronkeeper_engine::{RegistryError, TaskError, TaskHandler, TaskRegistry};

/// Register every builtin task.
pub(crate) fn register_builtin_tasks(registry: &TaskRegistry) -> Result<(), RegistryError> {
    registry.register("noop", Arc::new(NoopTask))?;
    registry.register("log", Arc::new(LogTask))?;
    registry.register("sleep", Arc::new(SleepTask))?;
    registry.register("webhook", Arc::new(WebhookTask::new()))?;

    debug!("Registered builtin tasks: {:?}", registry.ids());
    Ok(())
}

fn required_str<'a>(config: &'a Map<String, Value>, key: &str) -> Result<&'a str, TaskError> {
    config
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| TaskError::InvalidConfig(format!("'{}' must be a string", key)))
}

/// Does nothing.
struct NoopTask;

#[async_trait]
impl TaskHandler for NoopTask {
    async fn run(&self, _config: &Map<String, Value>) -> Result<Value, TaskError> {
        Ok(json!({ "ok": true }))
    }
}

/// Writes `config.message` to the log.
struct LogTask;

#[async_trait]
impl TaskHandler for LogTask {
    async fn run(&self, config: &Map<String, Value>) -> Result<Value, TaskError> {
        let message = required_str(config, "message")?;
        match config.get("level").and_then(|v| v.as_str()).unwrap_or("info") {
            "warn" => warn!(target: "cronkeeper::task", "{}", message),
            "debug" => debug!(target: "cronkeeper::task", "{}", message),
            _ => info!(target: "cronkeeper::task", "{}", message),
        }
        Ok(json!({ "logged": message }))
    }
}

/// Sleeps for `config.duration_ms`.
struct SleepTask;

#[async_trait]
impl TaskHandler for SleepTask {
    async fn run(&self, config: &Map<String, Value>) -> Result<Value, TaskError> {
        let duration_ms = config
            .get("duration_ms")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| {
                TaskError::InvalidConfig("'duration_ms' must be a non-negative integer".to_string())
            })?;
        tokio::time::sleep(Duration::from_millis(duration_ms)).await;
        Ok(json!({ "slept_ms": duration_ms }))
    }
}

/// POSTs `config.body` (or `{}`) as JSON to `config.url`.
struct WebhookTask {
    client: reqwest::Client,
}

impl WebhookTask {
    fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl TaskHandler for WebhookTask {
    async fn run(&self, config: &Map<String, Value>) -> Result<Value, TaskError> {
        let url = required_str(config, "url")?;
        let body = config.get("body").cloned().unwrap_or_else(|| json!({}));

        let resp = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| TaskError::Failed(format!("Failed to call webhook {}: {}", url, e)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(TaskError::Failed(format!("Webhook error: {}", status)));
        }
        Ok(json!({ "status": status.as_u16() }))
    }
}
