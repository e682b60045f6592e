//! Engine error types.

use thiserror::Error;

/// A cron expression that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// Wrong number of whitespace-separated fields.
    #[error("Invalid cron expression '{expr}': expected 5 fields, found {found}")]
    FieldCount { expr: String, found: usize },

    /// One field could not be parsed or is out of range.
    #[error("Invalid cron expression '{expr}': {field} field '{value}' {reason}")]
    Field {
        expr: String,
        field: &'static str,
        value: String,
        reason: String,
    },

    /// The expression is well-formed but never matches (e.g. February 31st).
    #[error("Cron expression '{0}' never fires")]
    NeverFires(String),
}

/// Job store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("A job named '{0}' already exists")]
    DuplicateName(String),

    #[error("Storage IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Error returned by a task handler.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The job's config does not match what the handler expects.
    #[error("Invalid task config: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Failed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Task registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Task already registered: {0}")]
    AlreadyRegistered(String),
}

/// Notification delivery errors.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Delivery to {target} failed: {message}")]
    Delivery { target: String, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Reasons an execution request is turned away before a handler runs.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job is already running: {0}")]
    AlreadyRunning(String),

    #[error("Job is not active: {0}")]
    Inactive(String),

    #[error("Engine is shutting down")]
    ShuttingDown,

    #[error("Execution of job {job_id} was interrupted: {reason}")]
    Interrupted { job_id: String, reason: String },

    #[error("Job store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors surfaced by the [`JobEngine`](crate::JobEngine) facade.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    InvalidSchedule(#[from] ScheduleError),

    #[error("Invalid job definition: {0}")]
    InvalidDefinition(String),

    #[error("Job is running and cannot be modified: {0}")]
    JobRunning(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
