//! The `JobEngine` facade.
//!
//! Owns the scheduler and the execution coordinator and exposes the
//! operations an embedding application (HTTP layer, CLI) needs: lifecycle
//! management of job definitions, timer refresh, manual execution and
//! status.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::coordinator::{ExecutionCoordinator, FlightGuard, Trigger};
use crate::error::{EngineError, EngineResult, StoreError};
use crate::job::{ExecutionOutcome, Job, JobDefinition, JobPatch, JobStore};
use crate::notify::{AlertKind, Notifier, SystemAlert};
use crate::scheduler::{RefreshReport, Scheduler};
use crate::task::TaskRegistry;

/// Engine construction options.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Clear `is_running` flags left behind by a previous process during
    /// [`JobEngine::initialize`].
    pub reset_stale_on_start: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            reset_stale_on_start: true,
        }
    }
}

/// Snapshot returned by [`JobEngine::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    pub scheduled_job_ids: Vec<String>,
    pub running_job_ids: Vec<String>,
}

/// Summary of [`JobEngine::initialize`].
#[derive(Debug, Default, Clone, Serialize)]
pub struct InitReport {
    /// Jobs whose stale running flag was cleared.
    pub stale_reset: Vec<String>,
    /// Active jobs naming an unregistered task.
    pub unknown_tasks: Vec<String>,
    pub refresh: RefreshReport,
}

/// Summary of [`JobEngine::shutdown`].
#[derive(Debug, Default, Clone, Serialize)]
pub struct ShutdownReport {
    /// Jobs whose handler was aborted after the grace period.
    pub aborted: Vec<String>,
}

/// Cron job engine.
pub struct JobEngine {
    store: Arc<dyn JobStore>,
    registry: Arc<TaskRegistry>,
    coordinator: Arc<ExecutionCoordinator>,
    scheduler: Scheduler,
    options: EngineOptions,
}

impl JobEngine {
    /// Create an engine. No timers run until [`initialize`](Self::initialize).
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: Arc<TaskRegistry>,
        notifier: Arc<dyn Notifier>,
        options: EngineOptions,
    ) -> Self {
        let coordinator = Arc::new(ExecutionCoordinator::new(
            store.clone(),
            registry.clone(),
            notifier,
        ));
        let scheduler = Scheduler::new(coordinator.clone());
        Self {
            store,
            registry,
            coordinator,
            scheduler,
            options,
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Recover from a previous process and start timers for active jobs.
    pub async fn initialize(&self) -> EngineResult<InitReport> {
        let jobs = self.store.list_all().await?;
        let mut report = InitReport::default();

        if self.options.reset_stale_on_start {
            for job in jobs.iter().filter(|j| j.is_running) {
                if self.coordinator.is_running(&job.id) {
                    continue;
                }
                warn!(job_id = %job.id, "Clearing stale running flag on job '{}'", job.name());
                if let Err(e) = self.store.set_running(&job.id, false).await {
                    warn!(job_id = %job.id, "Failed to clear stale running flag: {}", e);
                    continue;
                }
                self.coordinator
                    .alert(SystemAlert::new(
                        AlertKind::StaleExecution,
                        format!(
                            "Job '{}' was still marked running from a previous run",
                            job.name()
                        ),
                        json!({ "job_id": job.id }),
                    ))
                    .await;
                report.stale_reset.push(job.id.clone());
            }
        }

        for job in jobs.iter().filter(|j| j.is_active()) {
            if !self.registry.contains(&job.definition.task) {
                warn!(
                    job_id = %job.id,
                    task = %job.definition.task,
                    "Active job '{}' names an unregistered task",
                    job.name()
                );
                self.coordinator
                    .alert(SystemAlert::new(
                        AlertKind::UnknownTask,
                        format!(
                            "Job '{}' uses unregistered task '{}'",
                            job.name(),
                            job.definition.task
                        ),
                        json!({ "job_id": job.id, "task": job.definition.task }),
                    ))
                    .await;
                report.unknown_tasks.push(job.id.clone());
            }
        }

        report.refresh = self.refresh_all().await?;

        info!(
            jobs = jobs.len(),
            scheduled = report.refresh.scheduled.len(),
            "Job engine initialized"
        );
        Ok(report)
    }

    /// Install (or replace) the timer for `job`.
    ///
    /// An invalid schedule leaves the job without a timer and raises an
    /// `InvalidSchedule` alert.
    pub async fn schedule_job(&self, job: &Job) -> EngineResult<bool> {
        match self.scheduler.schedule(job) {
            Ok(scheduled) => Ok(scheduled),
            Err(e) => {
                self.invalid_schedule_alert(&job.id, job.name(), &e.to_string())
                    .await;
                Err(e.into())
            }
        }
    }

    /// Stop the job's timer. Returns whether one existed.
    pub fn unschedule_job(&self, job_id: &str) -> bool {
        self.scheduler.unschedule(job_id)
    }

    /// Rebuild every timer from the store's active jobs.
    pub async fn refresh_all(&self) -> EngineResult<RefreshReport> {
        let jobs = self.store.list_active().await?;
        let report = self.scheduler.refresh_all(&jobs);

        for (job_id, reason) in &report.failed {
            let name = jobs
                .iter()
                .find(|j| &j.id == job_id)
                .map(|j| j.name())
                .unwrap_or(job_id.as_str());
            self.invalid_schedule_alert(job_id, name, reason).await;
        }

        Ok(report)
    }

    /// Run a job now and return its outcome.
    pub async fn execute_manual(&self, job_id: &str) -> EngineResult<ExecutionOutcome> {
        Ok(self.coordinator.execute(job_id, Trigger::Manual).await?)
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            scheduled_job_ids: self.scheduler.status(),
            running_job_ids: self.coordinator.running_job_ids(),
        }
    }

    /// Validate, persist and (if active) schedule a new job.
    pub async fn create_job(&self, definition: JobDefinition) -> EngineResult<Job> {
        definition.validate()?;
        if !self.registry.contains(&definition.task) {
            warn!(
                task = %definition.task,
                "Job '{}' uses a task that is not registered",
                definition.name
            );
        }

        let job = self.store.create(definition).await?;
        info!(job_id = %job.id, "Created job '{}'", job.name());

        if job.is_active() {
            self.schedule_job(&job).await?;
        }
        Ok(job)
    }

    /// Apply a patch. Schedule or activity changes re-register the timer.
    pub async fn update_job(&self, job_id: &str, patch: &JobPatch) -> EngineResult<Job> {
        let (current, slot) = self.claim_idle(job_id).await?;

        let mut candidate = current.definition.clone();
        patch.apply(&mut candidate);
        candidate.validate()?;

        let job = self.store.update(job_id, patch).await?;
        drop(slot);
        info!(job_id = %job.id, "Updated job '{}'", job.name());

        if patch.affects_timer() {
            self.schedule_job(&job).await?;
        }
        Ok(job)
    }

    /// Activate or deactivate a job. The definition is retained either way.
    pub async fn set_active(&self, job_id: &str, active: bool) -> EngineResult<Job> {
        self.update_job(job_id, &JobPatch::active(active)).await
    }

    /// Remove the job's timer and definition.
    pub async fn delete_job(&self, job_id: &str) -> EngineResult<()> {
        let (job, _slot) = self.claim_idle(job_id).await?;

        self.scheduler.unschedule(job_id);
        if !self.store.delete(job_id).await? {
            return Err(StoreError::NotFound(job_id.to_string()).into());
        }
        info!(job_id = %job_id, "Deleted job '{}'", job.name());
        Ok(())
    }

    pub async fn get_job(&self, job_id: &str) -> EngineResult<Option<Job>> {
        Ok(self.store.get(job_id).await?)
    }

    /// Look a job up by id, falling back to its name.
    pub async fn find_job(&self, id_or_name: &str) -> EngineResult<Option<Job>> {
        if let Some(job) = self.store.get(id_or_name).await? {
            return Ok(Some(job));
        }
        Ok(self.store.find_by_name(id_or_name).await?)
    }

    pub async fn list_jobs(&self) -> EngineResult<Vec<Job>> {
        Ok(self.store.list_all().await?)
    }

    /// Stop timers, wait up to `grace` for in-flight executions, then abort
    /// the rest. Aborted executions are recorded as cancelled.
    pub async fn shutdown(&self, grace: Duration) -> ShutdownReport {
        self.scheduler.shutdown();
        self.coordinator.close();

        let mut report = ShutdownReport::default();
        if !self.coordinator.wait_idle(grace).await {
            report.aborted = self.coordinator.abort_all();
            warn!(
                aborted = report.aborted.len(),
                "Grace period elapsed, aborted running jobs"
            );
            if !self.coordinator.wait_idle(Duration::from_secs(5)).await {
                warn!("Aborted executions did not finish recording");
            }
        }

        info!("Job engine stopped");
        report
    }

    /// Load a job that is not running and hold its execution slot, so no
    /// timer fire starts it until the returned guard is dropped.
    async fn claim_idle(&self, job_id: &str) -> EngineResult<(Job, FlightGuard)> {
        let slot = self
            .coordinator
            .reserve(job_id)
            .map_err(|_| EngineError::JobRunning(job_id.to_string()))?;
        let job = self
            .store
            .get(job_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
        if job.is_running {
            return Err(EngineError::JobRunning(job_id.to_string()));
        }
        Ok((job, slot))
    }

    async fn invalid_schedule_alert(&self, job_id: &str, name: &str, reason: &str) {
        self.coordinator
            .alert(SystemAlert::new(
                AlertKind::InvalidSchedule,
                format!("Job '{}' was not scheduled: {}", name, reason),
                json!({ "job_id": job_id, "reason": reason }),
            ))
            .await;
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
