//! Job definition, runtime record and execution outcomes.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::cron::{self, CronExpr};
use crate::error::{EngineError, EngineResult};

/// Default handler timeout (5 minutes).
pub const DEFAULT_TIMEOUT_MS: u64 = 300_000;

/// Default job priority.
pub const DEFAULT_PRIORITY: u8 = 5;

fn default_true() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_priority() -> u8 {
    DEFAULT_PRIORITY
}

/// User-supplied part of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    /// Unique, human-readable name.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Five-field cron expression, evaluated in UTC.
    pub schedule: String,
    /// Task identifier resolved against the registry at execution time.
    pub task: String,
    /// Passed verbatim to the task handler.
    #[serde(default)]
    pub config: Map<String, Value>,
    /// Whether the scheduler keeps a timer for this job.
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Stored for callers; failed runs are not retried.
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub retry_delay_ms: u64,
    /// 1-10, informational only.
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default)]
    pub notify_on_success: bool,
    #[serde(default = "default_true")]
    pub notify_on_failure: bool,
    #[serde(default)]
    pub notification_recipients: Vec<String>,
}

impl JobDefinition {
    /// Create a new active job definition with default policy.
    pub fn new(
        name: impl Into<String>,
        schedule: impl Into<String>,
        task: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: None,
            schedule: schedule.into(),
            task: task.into(),
            config: Map::new(),
            is_active: true,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_retries: 0,
            retry_delay_ms: 0,
            priority: DEFAULT_PRIORITY,
            notify_on_success: false,
            notify_on_failure: true,
            notification_recipients: Vec::new(),
        }
    }

    /// Add a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Replace the handler config.
    pub fn with_config(mut self, config: Map<String, Value>) -> Self {
        self.config = config;
        self
    }

    /// Set one handler config entry.
    pub fn with_config_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    /// Set active state.
    pub fn with_active(mut self, active: bool) -> Self {
        self.is_active = active;
        self
    }

    /// Set the handler timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, retry_delay_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_delay_ms = retry_delay_ms;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Set which outcomes are reported to the notifier.
    pub fn with_notify(mut self, on_success: bool, on_failure: bool) -> Self {
        self.notify_on_success = on_success;
        self.notify_on_failure = on_failure;
        self
    }

    pub fn with_recipients<I, S>(mut self, recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.notification_recipients = recipients.into_iter().map(Into::into).collect();
        self
    }

    /// Check field constraints and the cron grammar.
    pub fn validate(&self) -> EngineResult<()> {
        if self.name.trim().is_empty() {
            return Err(EngineError::InvalidDefinition(
                "name cannot be empty".to_string(),
            ));
        }
        if self.task.trim().is_empty() {
            return Err(EngineError::InvalidDefinition(format!(
                "job '{}' has an empty task identifier",
                self.name
            )));
        }
        if !(1..=10).contains(&self.priority) {
            return Err(EngineError::InvalidDefinition(format!(
                "job '{}' has priority {}, expected 1-10",
                self.name, self.priority
            )));
        }
        if self.timeout_ms == 0 {
            return Err(EngineError::InvalidDefinition(format!(
                "job '{}' has a zero timeout",
                self.name
            )));
        }
        cron::validate(&self.schedule)?;
        Ok(())
    }
}

/// Final status of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Failure,
    Timeout,
    /// Aborted by engine shutdown.
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_success(self) -> bool {
        self == ExecutionStatus::Success
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failure => "failure",
            ExecutionStatus::Timeout => "timeout",
            ExecutionStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Why an execution did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UnknownTask,
    /// The handler returned an error.
    Handler,
    /// The handler panicked.
    Panic,
    Timeout,
    Cancelled,
}

impl FailureKind {
    fn status(self) -> ExecutionStatus {
        match self {
            FailureKind::Timeout => ExecutionStatus::Timeout,
            FailureKind::Cancelled => ExecutionStatus::Cancelled,
            _ => ExecutionStatus::Failure,
        }
    }
}

/// Error recorded from the most recent failed execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
    pub kind: FailureKind,
    pub at: DateTime<Utc>,
}

/// Result of one execution, handed to the store and the notifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub job_id: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<LastError>,
}

impl ExecutionOutcome {
    /// A successful run that finished now.
    pub fn success(job_id: impl Into<String>, started_at: DateTime<Utc>, result: Value) -> Self {
        let finished_at = Utc::now();
        Self {
            job_id: job_id.into(),
            status: ExecutionStatus::Success,
            started_at,
            finished_at,
            duration_ms: elapsed_ms(started_at, finished_at),
            result: Some(result),
            error: None,
        }
    }

    /// An unsuccessful run that finished now. The status follows from `kind`.
    pub fn failed(
        job_id: impl Into<String>,
        started_at: DateTime<Utc>,
        kind: FailureKind,
        message: impl Into<String>,
        trace: Option<String>,
    ) -> Self {
        let finished_at = Utc::now();
        Self {
            job_id: job_id.into(),
            status: kind.status(),
            started_at,
            finished_at,
            duration_ms: elapsed_ms(started_at, finished_at),
            result: None,
            error: Some(LastError {
                message: message.into(),
                trace,
                kind,
                at: finished_at,
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

fn elapsed_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    (end - start).num_milliseconds().max(0) as u64
}

/// Accumulated execution statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub execution_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub last_executed_at: Option<DateTime<Utc>>,
    pub last_execution_status: Option<ExecutionStatus>,
    pub last_execution_duration_ms: Option<u64>,
    pub last_execution_result: Option<Value>,
    pub last_error: Option<LastError>,
}

/// A persisted job: definition plus runtime state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// UUID v4.
    pub id: String,
    #[serde(flatten)]
    pub definition: JobDefinition,
    /// True while an execution is in flight.
    #[serde(default)]
    pub is_running: bool,
    #[serde(default)]
    pub stats: ExecutionStats,
    #[serde(default)]
    pub next_execution_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new job with a fresh id.
    pub fn new(definition: JobDefinition) -> Self {
        let now = Utc::now();
        let mut job = Self {
            id: Uuid::new_v4().to_string(),
            definition,
            is_running: false,
            stats: ExecutionStats::default(),
            next_execution_at: None,
            created_at: now,
            updated_at: now,
        };
        job.refresh_next_execution();
        job
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn is_active(&self) -> bool {
        self.definition.is_active
    }

    /// Recompute `next_execution_at` from the schedule.
    ///
    /// Inactive jobs and invalid schedules have no next execution.
    pub fn refresh_next_execution(&mut self) {
        self.next_execution_at = if self.definition.is_active {
            CronExpr::parse(&self.definition.schedule)
                .ok()
                .and_then(|expr| expr.next_after(Utc::now()))
        } else {
            None
        };
    }

    /// Fold a finished execution into the statistics and clear `is_running`.
    pub fn apply_outcome(&mut self, outcome: &ExecutionOutcome) {
        let stats = &mut self.stats;
        stats.execution_count += 1;
        if outcome.is_success() {
            stats.success_count += 1;
            stats.last_execution_result = outcome.result.clone();
            stats.last_error = None;
        } else {
            stats.failure_count += 1;
            stats.last_execution_result = None;
            stats.last_error = outcome.error.clone();
        }
        stats.last_executed_at = Some(outcome.started_at);
        stats.last_execution_status = Some(outcome.status);
        stats.last_execution_duration_ms = Some(outcome.duration_ms);

        self.is_running = false;
        self.updated_at = Utc::now();
        self.refresh_next_execution();
    }

    /// Whether `outcome` should be reported to the notifier.
    pub fn wants_notification(&self, outcome: &ExecutionOutcome) -> bool {
        if self.definition.notification_recipients.is_empty() {
            return false;
        }
        if outcome.is_success() {
            self.definition.notify_on_success
        } else {
            self.definition.notify_on_failure
        }
    }
}

/// Partial update of a job definition. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub schedule: Option<String>,
    pub task: Option<String>,
    pub config: Option<Map<String, Value>>,
    pub is_active: Option<bool>,
    pub timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub priority: Option<u8>,
    pub notify_on_success: Option<bool>,
    pub notify_on_failure: Option<bool>,
    pub notification_recipients: Option<Vec<String>>,
}

impl JobPatch {
    /// Patch that only toggles `is_active`.
    pub fn active(active: bool) -> Self {
        Self {
            is_active: Some(active),
            ..Self::default()
        }
    }

    /// Whether applying the patch can change the job's timer.
    pub fn affects_timer(&self) -> bool {
        self.schedule.is_some() || self.is_active.is_some()
    }

    /// Apply to `definition` in place.
    pub fn apply(&self, definition: &mut JobDefinition) {
        if let Some(ref name) = self.name {
            definition.name = name.clone();
        }
        if let Some(ref description) = self.description {
            definition.description = Some(description.clone());
        }
        if let Some(ref schedule) = self.schedule {
            definition.schedule = schedule.clone();
        }
        if let Some(ref task) = self.task {
            definition.task = task.clone();
        }
        if let Some(ref config) = self.config {
            definition.config = config.clone();
        }
        if let Some(active) = self.is_active {
            definition.is_active = active;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            definition.timeout_ms = timeout_ms;
        }
        if let Some(max_retries) = self.max_retries {
            definition.max_retries = max_retries;
        }
        if let Some(retry_delay_ms) = self.retry_delay_ms {
            definition.retry_delay_ms = retry_delay_ms;
        }
        if let Some(priority) = self.priority {
            definition.priority = priority;
        }
        if let Some(on_success) = self.notify_on_success {
            definition.notify_on_success = on_success;
        }
        if let Some(on_failure) = self.notify_on_failure {
            definition.notify_on_failure = on_failure;
        }
        if let Some(ref recipients) = self.notification_recipients {
            definition.notification_recipients = recipients.clone();
        }
    }
}

#[cfg(test)]
#[path = "definition_tests.rs"]
mod tests;
