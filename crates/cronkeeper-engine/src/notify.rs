//! Outcome and system-alert notifications.
//!
//! The coordinator reports a finished execution through
//! [`Notifier::notify_job_outcome`] when the job asks for it. Problems the
//! engine detects outside a handler (bad schedules, store failures, stale
//! running flags) are reported through [`Notifier::notify_system_alert`].
//! Delivery failures are logged by the caller and never affect execution.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{error, info, warn};

use crate::error::NotifyError;
use crate::job::{ExecutionOutcome, ExecutionStatus, Job};

/// Category of a system alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// A job's cron expression failed validation and it has no timer.
    InvalidSchedule,
    /// An active job names a task that is not registered.
    UnknownTask,
    /// A job store call failed during execution bookkeeping.
    StoreFailure,
    /// A job was still marked running from a previous process.
    StaleExecution,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertKind::InvalidSchedule => "invalid_schedule",
            AlertKind::UnknownTask => "unknown_task",
            AlertKind::StoreFailure => "store_failure",
            AlertKind::StaleExecution => "stale_execution",
        };
        f.write_str(s)
    }
}

/// An engine-level problem not tied to one execution outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemAlert {
    pub kind: AlertKind,
    pub message: String,
    #[serde(default)]
    pub details: Value,
    pub at: DateTime<Utc>,
}

impl SystemAlert {
    pub fn new(kind: AlertKind, message: impl Into<String>, details: Value) -> Self {
        Self {
            kind,
            message: message.into(),
            details,
            at: Utc::now(),
        }
    }
}

/// Sends job outcomes and system alerts somewhere.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Report a finished execution to the job's recipients.
    async fn notify_job_outcome(
        &self,
        job: &Job,
        outcome: &ExecutionOutcome,
    ) -> Result<(), NotifyError>;

    /// Report an engine-level problem.
    async fn notify_system_alert(&self, alert: &SystemAlert) -> Result<(), NotifyError>;
}

/// One-line summary of an outcome, e.g. `Job 'backup' timed out`.
pub fn outcome_title(job: &Job, outcome: &ExecutionOutcome) -> String {
    let verb = match outcome.status {
        ExecutionStatus::Success => "succeeded",
        ExecutionStatus::Failure => "failed",
        ExecutionStatus::Timeout => "timed out",
        ExecutionStatus::Cancelled => "was cancelled",
    };
    format!("Job '{}' {}", job.name(), verb)
}

/// Longer description of an outcome including duration and error.
pub fn outcome_message(job: &Job, outcome: &ExecutionOutcome) -> String {
    let mut message = format!(
        "Task '{}' finished with status {} after {}ms",
        job.definition.task, outcome.status, outcome.duration_ms
    );
    if let Some(ref err) = outcome.error {
        message.push_str(": ");
        message.push_str(&err.message);
    }
    message
}

/// Writes notifications to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_job_outcome(
        &self,
        job: &Job,
        outcome: &ExecutionOutcome,
    ) -> Result<(), NotifyError> {
        let recipients = job.definition.notification_recipients.join(",");
        if outcome.is_success() {
            info!(
                job_id = %job.id,
                status = %outcome.status,
                duration_ms = outcome.duration_ms,
                recipients = %recipients,
                "{}", outcome_title(job, outcome)
            );
        } else {
            warn!(
                job_id = %job.id,
                status = %outcome.status,
                duration_ms = outcome.duration_ms,
                recipients = %recipients,
                "{}: {}", outcome_title(job, outcome), outcome_message(job, outcome)
            );
        }
        Ok(())
    }

    async fn notify_system_alert(&self, alert: &SystemAlert) -> Result<(), NotifyError> {
        error!(kind = %alert.kind, details = %alert.details, "System alert: {}", alert.message);
        Ok(())
    }
}

/// POSTs notifications as JSON to a webhook URL.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    /// Create a notifier with a per-request timeout.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn post(&self, payload: &Value) -> Result<(), NotifyError> {
        let resp = self.client.post(&self.url).json(payload).send().await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(NotifyError::Delivery {
                target: self.url.clone(),
                message: format!("Webhook error: {}", resp.status()),
            })
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify_job_outcome(
        &self,
        job: &Job,
        outcome: &ExecutionOutcome,
    ) -> Result<(), NotifyError> {
        let payload = json!({
            "type": "job_outcome",
            "title": outcome_title(job, outcome),
            "message": outcome_message(job, outcome),
            "status": outcome.status,
            "job_id": job.id,
            "job_name": job.name(),
            "recipients": job.definition.notification_recipients,
            "duration_ms": outcome.duration_ms,
            "timestamp": outcome.finished_at.to_rfc3339(),
        });
        self.post(&payload).await
    }

    async fn notify_system_alert(&self, alert: &SystemAlert) -> Result<(), NotifyError> {
        let payload = json!({
            "type": "system_alert",
            "title": format!("System alert: {}", alert.kind),
            "message": alert.message,
            "kind": alert.kind,
            "details": alert.details,
            "timestamp": alert.at.to_rfc3339(),
        });
        self.post(&payload).await
    }
}

/// A notification captured by [`MemoryNotifier`].
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationEvent {
    JobOutcome {
        job_id: String,
        job_name: String,
        status: ExecutionStatus,
        recipients: Vec<String>,
    },
    SystemAlert(SystemAlert),
}

/// Records notifications in memory, for tests and embedding.
#[derive(Default)]
pub struct MemoryNotifier {
    events: Mutex<Vec<NotificationEvent>>,
    fail: AtomicBool,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later delivery return an error after recording the event.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().clone()
    }

    /// Recorded outcomes as `(job_id, status)` pairs.
    pub fn outcomes(&self) -> Vec<(String, ExecutionStatus)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                NotificationEvent::JobOutcome { job_id, status, .. } => {
                    Some((job_id.clone(), *status))
                }
                NotificationEvent::SystemAlert(_) => None,
            })
            .collect()
    }

    pub fn alerts(&self) -> Vec<SystemAlert> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                NotificationEvent::SystemAlert(alert) => Some(alert.clone()),
                NotificationEvent::JobOutcome { .. } => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    fn record(&self, event: NotificationEvent) -> Result<(), NotifyError> {
        self.events.lock().push(event);
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotifyError::Delivery {
                target: "memory".to_string(),
                message: "delivery failure requested".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn notify_job_outcome(
        &self,
        job: &Job,
        outcome: &ExecutionOutcome,
    ) -> Result<(), NotifyError> {
        self.record(NotificationEvent::JobOutcome {
            job_id: job.id.clone(),
            job_name: job.name().to_string(),
            status: outcome.status,
            recipients: job.definition.notification_recipients.clone(),
        })
    }

    async fn notify_system_alert(&self, alert: &SystemAlert) -> Result<(), NotifyError> {
        self.record(NotificationEvent::SystemAlert(alert.clone()))
    }
}

/// Fans notifications out to several notifiers concurrently.
///
/// Every target is attempted; failures are combined into one error.
#[derive(Default)]
pub struct MultiNotifier {
    targets: Vec<Arc<dyn Notifier>>,
}

impl MultiNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.targets.push(notifier);
        self
    }

    pub fn push(&mut self, notifier: Arc<dyn Notifier>) {
        self.targets.push(notifier);
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    fn combine(results: Vec<Result<(), NotifyError>>) -> Result<(), NotifyError> {
        let failures: Vec<String> = results
            .into_iter()
            .filter_map(|r| r.err().map(|e| e.to_string()))
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(NotifyError::Delivery {
                target: format!("{} notifier(s)", failures.len()),
                message: failures.join("; "),
            })
        }
    }
}

#[async_trait]
impl Notifier for MultiNotifier {
    async fn notify_job_outcome(
        &self,
        job: &Job,
        outcome: &ExecutionOutcome,
    ) -> Result<(), NotifyError> {
        let results = join_all(
            self.targets
                .iter()
                .map(|n| n.notify_job_outcome(job, outcome)),
        )
        .await;
        Self::combine(results)
    }

    async fn notify_system_alert(&self, alert: &SystemAlert) -> Result<(), NotifyError> {
        let results = join_all(self.targets.iter().map(|n| n.notify_system_alert(alert))).await;
        Self::combine(results)
    }
}
