//! Execution coordinator.
//!
//! Every execution, whether fired by a timer or requested manually, goes
//! through [`ExecutionCoordinator::execute`]:
//!
//! 1. load the job (absent: `NotFound`, nothing persisted)
//! 2. claim the single-flight guard (held: `AlreadyRunning`)
//! 3. reject inactive jobs
//! 4. persist `is_running = true`
//! 5. resolve the task (absent: `UnknownTask` failure)
//! 6. run the handler on its own task, racing it against `timeout_ms`
//! 7. record the outcome, which clears `is_running`
//! 8. notify when the job asks for it
//! 9. release the guard
//!
//! Steps 4 to 9 run on a spawned task, so a caller that stops waiting does
//! not leave `is_running` set or the outcome unrecorded.
//!
//! The timeout only stops the coordinator from waiting: a handler that
//! overruns keeps running detached, but the guard is released so the next
//! fire may start a new execution.
//!
//! Store and notifier failures after step 2 are logged and raised as system
//! alerts. They never prevent the guard from being released.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::json;
use tokio::sync::Notify;
use tokio::task::{AbortHandle, JoinError};
use tracing::{debug, error, info, warn};

use crate::error::ExecutionError;
use crate::job::{ExecutionOutcome, FailureKind, Job, JobStore};
use crate::notify::{AlertKind, Notifier, SystemAlert};
use crate::scheduler::JobTrigger;
use crate::task::TaskRegistry;

/// Where an execution request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Timer,
    Manual,
}

impl Trigger {
    fn as_str(self) -> &'static str {
        match self {
            Trigger::Timer => "timer",
            Trigger::Manual => "manual",
        }
    }
}

struct RunningJob {
    started_at: DateTime<Utc>,
    abort: Option<AbortHandle>,
    /// False while the slot is only reserved for a definition change.
    executing: bool,
}

/// State shared between the coordinator and its execution tasks.
struct Shared {
    store: Arc<dyn JobStore>,
    registry: Arc<TaskRegistry>,
    notifier: Arc<dyn Notifier>,
    running: DashMap<String, RunningJob>,
    idle: Notify,
    closed: AtomicBool,
}

/// Holds a job's single-flight slot until dropped.
pub(crate) struct FlightGuard {
    shared: Arc<Shared>,
    job_id: String,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.shared.running.remove(&self.job_id);
        self.shared.idle.notify_waiters();
    }
}

/// Runs jobs with single-flight and timeout enforcement.
pub struct ExecutionCoordinator {
    shared: Arc<Shared>,
}

impl ExecutionCoordinator {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: Arc<TaskRegistry>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                registry,
                notifier,
                running: DashMap::new(),
                idle: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Execute a job once and return its outcome.
    ///
    /// Errors are returned only when no handler was attempted; every
    /// attempted execution yields an outcome, successful or not.
    ///
    /// Once the slot is claimed the execution runs on its own task. Dropping
    /// the returned future stops waiting for it but the outcome is still
    /// recorded and the slot released.
    pub async fn execute(
        &self,
        job_id: &str,
        trigger: Trigger,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(ExecutionError::ShuttingDown);
        }

        let job = match self.shared.store.get(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(
                    job_id = %job_id,
                    trigger = trigger.as_str(),
                    "Execution requested for unknown job"
                );
                return Err(ExecutionError::NotFound(job_id.to_string()));
            }
            Err(e) => {
                error!(job_id = %job_id, "Failed to load job for execution: {}", e);
                return Err(e.into());
            }
        };

        let guard = self.acquire(job_id, true)?;

        if !job.is_active() {
            return Err(ExecutionError::Inactive(job_id.to_string()));
        }

        info!(
            job_id = %job.id,
            task = %job.definition.task,
            trigger = trigger.as_str(),
            "Starting job '{}'",
            job.name()
        );

        let shared = self.shared.clone();
        let execution = tokio::spawn(async move {
            let outcome = shared.run(&job).await;
            drop(guard);
            outcome
        });

        execution.await.map_err(|e| ExecutionError::Interrupted {
            job_id: job_id.to_string(),
            reason: e.to_string(),
        })
    }

    /// Ids of jobs with an execution in flight, sorted.
    pub fn running_job_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .shared
            .running
            .iter()
            .filter(|r| r.executing)
            .map(|r| r.key().clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn is_running(&self, job_id: &str) -> bool {
        self.shared
            .running
            .get(job_id)
            .is_some_and(|r| r.executing)
    }

    /// When the job's current execution started, if one is in flight.
    pub fn started_at(&self, job_id: &str) -> Option<DateTime<Utc>> {
        self.shared
            .running
            .get(job_id)
            .filter(|r| r.executing)
            .map(|r| r.started_at)
    }

    /// Refuse new executions. In-flight executions continue.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
    }

    /// Wait until no execution is in flight. Returns false if `grace`
    /// elapsed first.
    pub async fn wait_idle(&self, grace: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.shared.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.shared.running.is_empty() {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(grace, wait).await.is_ok()
    }

    /// Abort every in-flight handler. Each aborted execution is recorded as
    /// cancelled. Returns the affected job ids.
    pub fn abort_all(&self) -> Vec<String> {
        let mut aborted = Vec::new();
        for entry in self.shared.running.iter() {
            if let Some(ref handle) = entry.abort {
                handle.abort();
                aborted.push(entry.key().clone());
            }
        }
        aborted.sort();
        aborted
    }

    /// Hold the job's slot without executing it, so no execution can start
    /// while its definition is being changed.
    pub(crate) fn reserve(&self, job_id: &str) -> Result<FlightGuard, ExecutionError> {
        self.acquire(job_id, false)
    }

    /// Atomically claim the single-flight slot for `job_id`.
    fn acquire(&self, job_id: &str, executing: bool) -> Result<FlightGuard, ExecutionError> {
        match self.shared.running.entry(job_id.to_string()) {
            Entry::Occupied(_) => Err(ExecutionError::AlreadyRunning(job_id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(RunningJob {
                    started_at: Utc::now(),
                    abort: None,
                    executing,
                });
                Ok(FlightGuard {
                    shared: self.shared.clone(),
                    job_id: job_id.to_string(),
                })
            }
        }
    }

    /// Send a system alert, logging delivery failures.
    pub async fn alert(&self, alert: SystemAlert) {
        self.shared.alert(alert).await;
    }
}

impl Shared {
    async fn run(&self, job: &Job) -> ExecutionOutcome {
        if let Err(e) = self.store.set_running(&job.id, true).await {
            self.store_failure(job, "mark running", &e.to_string()).await;
        }

        let outcome = self.run_handler(job).await;
        self.finish(job, &outcome).await;
        outcome
    }

    async fn run_handler(&self, job: &Job) -> ExecutionOutcome {
        let started_at = Utc::now();
        let task = &job.definition.task;

        let Some(handler) = self.registry.resolve(task) else {
            warn!(job_id = %job.id, task = %task, "No handler registered for task");
            return ExecutionOutcome::failed(
                &job.id,
                started_at,
                FailureKind::UnknownTask,
                format!("Unknown task '{}'", task),
                None,
            );
        };

        let config = job.definition.config.clone();
        let handle = tokio::spawn(async move { handler.run(&config).await });
        if let Some(mut entry) = self.running.get_mut(&job.id) {
            entry.abort = Some(handle.abort_handle());
        }

        let timeout = Duration::from_millis(job.definition.timeout_ms);
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(Ok(result))) => ExecutionOutcome::success(&job.id, started_at, result),
            Ok(Ok(Err(e))) => ExecutionOutcome::failed(
                &job.id,
                started_at,
                FailureKind::Handler,
                e.to_string(),
                Some(format!("{:?}", e)),
            ),
            Ok(Err(e)) => join_failure(&job.id, started_at, e),
            Err(_) => {
                warn!(
                    job_id = %job.id,
                    timeout_ms = job.definition.timeout_ms,
                    "Job '{}' timed out, handler left running",
                    job.name()
                );
                ExecutionOutcome::failed(
                    &job.id,
                    started_at,
                    FailureKind::Timeout,
                    format!(
                        "Task '{}' exceeded timeout of {}ms",
                        task, job.definition.timeout_ms
                    ),
                    None,
                )
            }
        }
    }

    async fn finish(&self, job: &Job, outcome: &ExecutionOutcome) {
        let recorded = match self.store.record_execution(&job.id, outcome).await {
            Ok(updated) => updated,
            Err(e) => {
                self.store_failure(job, "record execution", &e.to_string())
                    .await;
                if let Err(e) = self.store.set_running(&job.id, false).await {
                    error!(job_id = %job.id, "Failed to clear running flag: {}", e);
                }
                job.clone()
            }
        };

        match outcome.error {
            None => info!(
                job_id = %job.id,
                task = %job.definition.task,
                status = %outcome.status,
                duration_ms = outcome.duration_ms,
                "Job '{}' finished",
                job.name()
            ),
            Some(ref err) => warn!(
                job_id = %job.id,
                task = %job.definition.task,
                status = %outcome.status,
                duration_ms = outcome.duration_ms,
                "Job '{}' finished: {}",
                job.name(),
                err.message
            ),
        }

        if recorded.wants_notification(outcome) {
            if let Err(e) = self.notifier.notify_job_outcome(&recorded, outcome).await {
                warn!(job_id = %job.id, "Failed to send job notification: {}", e);
            }
        }
    }

    async fn store_failure(&self, job: &Job, action: &str, message: &str) {
        error!(job_id = %job.id, "Job store failed to {}: {}", action, message);
        self.alert(SystemAlert::new(
            AlertKind::StoreFailure,
            format!("Job store failed to {} for job '{}'", action, job.name()),
            json!({ "job_id": job.id, "error": message }),
        ))
        .await;
    }

    async fn alert(&self, alert: SystemAlert) {
        if let Err(e) = self.notifier.notify_system_alert(&alert).await {
            warn!(kind = %alert.kind, "Failed to send system alert: {}", e);
        }
    }
}

#[async_trait]
impl JobTrigger for ExecutionCoordinator {
    async fn fire(&self, job_id: &str) {
        match self.execute(job_id, Trigger::Timer).await {
            Ok(_) => {}
            Err(ExecutionError::AlreadyRunning(_)) => {
                debug!(job_id = %job_id, "Previous execution still running, skipping fire");
            }
            Err(ExecutionError::Inactive(_)) | Err(ExecutionError::ShuttingDown) => {
                debug!(job_id = %job_id, "Skipping timer fire");
            }
            Err(e) => {
                warn!(job_id = %job_id, "Timer-driven execution failed: {}", e);
            }
        }
    }
}

fn join_failure(job_id: &str, started_at: DateTime<Utc>, err: JoinError) -> ExecutionOutcome {
    if err.is_cancelled() {
        return ExecutionOutcome::failed(
            job_id,
            started_at,
            FailureKind::Cancelled,
            "Execution cancelled by engine shutdown",
            None,
        );
    }

    let payload = match err.try_into_panic() {
        Ok(payload) => panic_payload(payload),
        Err(e) => e.to_string(),
    };
    error!(job_id = %job_id, "Task panic: {}", payload);
    ExecutionOutcome::failed(
        job_id,
        started_at,
        FailureKind::Panic,
        format!("Task panic: {}", payload),
        Some(payload),
    )
}

fn panic_payload(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
