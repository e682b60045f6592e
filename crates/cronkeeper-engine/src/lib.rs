//! # Cronkeeper Engine
//!
//! Cron job scheduling and execution for long-running services.
//!
//! - **Job Store**: durable job definitions and execution statistics
//! - **Task Registry**: task identifier to handler lookup
//! - **Notifier**: outcome and system-alert delivery
//! - **Scheduler**: one timer per active job
//! - **Execution Coordinator**: single-flight guard, timeout, bookkeeping
//!
//! ## Architecture
//!
//! ```text
//!  Scheduler ──fire──▶ ExecutionCoordinator ──resolve──▶ TaskRegistry
//!      ▲                  │        │
//!      │                  │        └──notify──▶ Notifier
//!      │                  ▼
//!  JobEngine ─────────▶ JobStore
//! ```
//!
//! [`JobEngine`] owns the scheduler and the coordinator and is the entry
//! point for embedding applications.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use cronkeeper_engine::{
//!     EngineOptions, JobDefinition, JobEngine, LogNotifier, MemoryJobStore, TaskRegistry,
//! };
//! use serde_json::json;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = TaskRegistry::new();
//! registry.register_fn("noop", |_| async { Ok(json!({"ok": true})) })?;
//!
//! let engine = JobEngine::new(
//!     Arc::new(MemoryJobStore::new()),
//!     Arc::new(registry),
//!     Arc::new(LogNotifier::new()),
//!     EngineOptions::default(),
//! );
//! engine.initialize().await?;
//! let job = engine
//!     .create_job(JobDefinition::new("heartbeat", "*/5 * * * *", "noop"))
//!     .await?;
//! let outcome = engine.execute_manual(&job.id).await?;
//! assert!(outcome.is_success());
//! engine.shutdown(Duration::from_secs(10)).await;
//! # Ok(())
//! # }
//! ```

pub mod coordinator;
pub mod cron;
pub mod engine;
pub mod error;
pub mod job;
pub mod notify;
pub mod scheduler;
pub mod task;

pub use coordinator::{ExecutionCoordinator, Trigger};
pub use crate::cron::CronExpr;
pub use engine::{EngineOptions, EngineStatus, InitReport, JobEngine, ShutdownReport};
pub use error::{
    EngineError, EngineResult, ExecutionError, NotifyError, RegistryError, ScheduleError,
    StoreError, TaskError,
};
pub use job::{
    DEFAULT_PRIORITY, DEFAULT_TIMEOUT_MS, ExecutionOutcome, ExecutionStats, ExecutionStatus,
    FailureKind, FileJobStore, Job, JobDefinition, JobPatch, JobStore, LastError,
    MemoryJobStore,
};
pub use notify::{
    AlertKind, LogNotifier, MemoryNotifier, MultiNotifier, NotificationEvent, Notifier,
    SystemAlert, WebhookNotifier,
};
pub use scheduler::{JobTrigger, RefreshReport, Scheduler};
pub use task::{FnHandler, TaskHandler, TaskRegistry};
