//! Per-job cron timers.
//!
//! The scheduler owns one timer task per active job. Each timer sleeps until
//! the next instant its cron expression matches, hands the job id to a
//! [`JobTrigger`] on a freshly spawned task, and goes back to sleep. Timers
//! never wait on executions, so a slow handler cannot delay the next fire;
//! overlapping fires are resolved by the trigger's single-flight guard.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cron::CronExpr;
use crate::error::ScheduleError;
use crate::job::Job;

/// Receives timer fires.
#[async_trait]
pub trait JobTrigger: Send + Sync {
    /// Called once per cron-matched instant.
    async fn fire(&self, job_id: &str);
}

struct JobTimer {
    expr: CronExpr,
    token: CancellationToken,
}

/// Result of [`Scheduler::refresh_all`].
#[derive(Debug, Default, Clone, Serialize)]
pub struct RefreshReport {
    /// Ids of jobs that now have a timer.
    pub scheduled: Vec<String>,
    /// Inactive jobs that were passed in and left without a timer.
    pub inactive: Vec<String>,
    /// Jobs whose schedule failed validation, with the reason.
    pub failed: Vec<(String, String)>,
}

/// Maintains `job_id -> timer`.
pub struct Scheduler {
    trigger: Arc<dyn JobTrigger>,
    timers: Mutex<HashMap<String, JobTimer>>,
    shutdown: CancellationToken,
}

impl Scheduler {
    /// Create a scheduler that delivers fires to `trigger`.
    pub fn new(trigger: Arc<dyn JobTrigger>) -> Self {
        Self {
            trigger,
            timers: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Install a timer for `job`, replacing any existing one.
    ///
    /// The existing timer is stopped even when the new schedule is invalid,
    /// so a job never keeps firing on a stale expression. Returns `Ok(false)`
    /// when no timer was started because the job is inactive or the
    /// scheduler has shut down.
    pub fn schedule(&self, job: &Job) -> Result<bool, ScheduleError> {
        self.unschedule(&job.id);

        let expr = CronExpr::parse(&job.definition.schedule)?;

        if !job.is_active() {
            debug!(job_id = %job.id, "Job '{}' is inactive, not scheduling", job.name());
            return Ok(false);
        }
        if self.shutdown.is_cancelled() {
            debug!(job_id = %job.id, "Scheduler is shut down, not scheduling '{}'", job.name());
            return Ok(false);
        }

        let token = self.shutdown.child_token();
        tokio::spawn(run_timer(
            job.id.clone(),
            expr.clone(),
            self.trigger.clone(),
            token.clone(),
        ));

        let previous = self
            .timers
            .lock()
            .insert(job.id.clone(), JobTimer { expr, token });
        if let Some(previous) = previous {
            previous.token.cancel();
        }

        debug!(
            job_id = %job.id,
            "Scheduled job '{}' with '{}'",
            job.name(),
            job.definition.schedule
        );
        Ok(true)
    }

    /// Stop the job's timer. Returns whether one existed.
    pub fn unschedule(&self, job_id: &str) -> bool {
        match self.timers.lock().remove(job_id) {
            Some(timer) => {
                timer.token.cancel();
                debug!(job_id = %job_id, "Unscheduled job");
                true
            }
            None => false,
        }
    }

    /// Stop every timer, then schedule every active job in `jobs`.
    ///
    /// A bad expression on one job does not prevent the others from being
    /// scheduled.
    pub fn refresh_all(&self, jobs: &[Job]) -> RefreshReport {
        self.unschedule_all();

        let mut report = RefreshReport::default();
        for job in jobs {
            match self.schedule(job) {
                Ok(true) => report.scheduled.push(job.id.clone()),
                Ok(false) => report.inactive.push(job.id.clone()),
                Err(e) => {
                    warn!(job_id = %job.id, "Cannot schedule job '{}': {}", job.name(), e);
                    report.failed.push((job.id.clone(), e.to_string()));
                }
            }
        }

        info!(
            scheduled = report.scheduled.len(),
            failed = report.failed.len(),
            "Refreshed job timers"
        );
        report
    }

    /// Ids of jobs with a timer, sorted.
    pub fn status(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.timers.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_scheduled(&self, job_id: &str) -> bool {
        self.timers.lock().contains_key(job_id)
    }

    /// Next fire instant of a scheduled job.
    pub fn next_fire(&self, job_id: &str) -> Option<DateTime<Utc>> {
        self.timers
            .lock()
            .get(job_id)
            .and_then(|t| t.expr.next_after(Utc::now()))
    }

    /// Stop all timers and refuse new ones.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.unschedule_all();
        info!("Scheduler stopped");
    }

    fn unschedule_all(&self) {
        let timers: Vec<JobTimer> = self.timers.lock().drain().map(|(_, t)| t).collect();
        for timer in timers {
            timer.token.cancel();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Timer loop for one job.
///
/// The next fire instant is searched after the later of the instant just
/// fired and the wake-up time. An early wake-up never fires the same instant
/// twice, and instants missed during a suspend or clock jump are skipped.
async fn run_timer(
    job_id: String,
    expr: CronExpr,
    trigger: Arc<dyn JobTrigger>,
    token: CancellationToken,
) {
    let mut last = Utc::now();

    loop {
        let Some(next) = expr.next_after(last) else {
            debug!(job_id = %job_id, "No upcoming fire time for '{}'", expr);
            break;
        };

        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep_until(Instant::now() + wait) => {}
        }

        last = resume_point(next, Utc::now());
        debug!(job_id = %job_id, fire_at = %next.to_rfc3339(), "Timer fired");

        let trigger = trigger.clone();
        let id = job_id.clone();
        tokio::spawn(async move {
            trigger.fire(&id).await;
        });
    }

    debug!(job_id = %job_id, "Timer stopped");
}

fn resume_point(fired: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    fired.max(now)
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
