//! Job persistence store.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use super::definition::{ExecutionOutcome, Job, JobDefinition, JobPatch};
use crate::error::StoreError;

/// Job store trait for persistence.
///
/// Every call is atomic with respect to other calls on the same store.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Load a job by id.
    async fn get(&self, id: &str) -> Result<Option<Job>, StoreError>;

    /// Load all jobs, oldest first.
    async fn list_all(&self) -> Result<Vec<Job>, StoreError>;

    /// Load all jobs with `is_active` set.
    async fn list_active(&self) -> Result<Vec<Job>, StoreError> {
        let jobs = self.list_all().await?;
        Ok(jobs.into_iter().filter(|j| j.is_active()).collect())
    }

    /// Look a job up by its unique name.
    async fn find_by_name(&self, name: &str) -> Result<Option<Job>, StoreError> {
        let jobs = self.list_all().await?;
        Ok(jobs.into_iter().find(|j| j.name() == name))
    }

    /// Persist a new job. Fails with `DuplicateName` if the name is taken.
    async fn create(&self, definition: JobDefinition) -> Result<Job, StoreError>;

    /// Apply a patch to the definition and return the updated job.
    async fn update(&self, id: &str, patch: &JobPatch) -> Result<Job, StoreError>;

    /// Delete a job. Returns whether it existed.
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;

    /// Fold an execution outcome into the job's statistics and clear
    /// `is_running`.
    async fn record_execution(
        &self,
        id: &str,
        outcome: &ExecutionOutcome,
    ) -> Result<Job, StoreError>;

    /// Set the persisted `is_running` flag.
    async fn set_running(&self, id: &str, running: bool) -> Result<(), StoreError>;
}

fn sort_jobs(jobs: &mut [Job]) {
    jobs.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.definition.name.cmp(&b.definition.name))
    });
}

fn apply_patch(job: &mut Job, patch: &JobPatch) {
    patch.apply(&mut job.definition);
    job.updated_at = Utc::now();
    job.refresh_next_execution();
}

/// In-memory job store for tests and embedding.
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<String, Job>>,
}

impl MemoryJobStore {
    /// Create a new memory store.
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn get(&self, id: &str) -> Result<Option<Job>, StoreError> {
        let jobs = self.jobs.read().await;
        Ok(jobs.get(id).cloned())
    }

    async fn list_all(&self) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.read().await;
        let mut all: Vec<Job> = jobs.values().cloned().collect();
        sort_jobs(&mut all);
        Ok(all)
    }

    async fn create(&self, definition: JobDefinition) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.write().await;
        if jobs.values().any(|j| j.name() == definition.name) {
            return Err(StoreError::DuplicateName(definition.name));
        }
        let job = Job::new(definition);
        jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    async fn update(&self, id: &str, patch: &JobPatch) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.write().await;
        if let Some(ref name) = patch.name {
            if jobs.values().any(|j| j.id != id && j.name() == name) {
                return Err(StoreError::DuplicateName(name.clone()));
            }
        }
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        apply_patch(job, patch);
        Ok(job.clone())
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.write().await;
        Ok(jobs.remove(id).is_some())
    }

    async fn record_execution(
        &self,
        id: &str,
        outcome: &ExecutionOutcome,
    ) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        job.apply_outcome(outcome);
        Ok(job.clone())
    }

    async fn set_running(&self, id: &str, running: bool) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        job.is_running = running;
        job.updated_at = Utc::now();
        Ok(())
    }
}

/// File system based job store: one JSON document per job under
/// `<storage_path>/jobs/`.
pub struct FileJobStore {
    storage_path: PathBuf,
    /// Serializes read-modify-write cycles.
    write_lock: Mutex<()>,
}

impl FileJobStore {
    /// Create a new file-based job store.
    pub async fn new(storage_path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let storage_path = storage_path.into();
        let jobs_dir = storage_path.join("jobs");

        fs::create_dir_all(&jobs_dir).await?;

        debug!("FileJobStore initialized at {:?}", storage_path);

        Ok(Self {
            storage_path,
            write_lock: Mutex::new(()),
        })
    }

    fn jobs_dir(&self) -> PathBuf {
        self.storage_path.join("jobs")
    }

    fn job_path(&self, id: &str) -> PathBuf {
        self.jobs_dir()
            .join(format!("{}.json", Self::sanitize_id(id)))
    }

    fn sanitize_id(id: &str) -> String {
        id.chars()
            .map(|c| {
                if c.is_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }

    async fn read_job(&self, id: &str) -> Result<Option<Job>, StoreError> {
        let path = self.job_path(id);
        if !fs::try_exists(&path).await? {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).await?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    async fn require_job(&self, id: &str) -> Result<Job, StoreError> {
        self.read_job(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Write through a temp file and rename so readers never see a partial
    /// document.
    async fn write_job(&self, job: &Job) -> Result<(), StoreError> {
        let path = self.job_path(&job.id);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(job)?;
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &path).await?;
        debug!(job_id = %job.id, "Saved job '{}' to {:?}", job.name(), path);
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<Job>, StoreError> {
        let jobs_dir = self.jobs_dir();
        if !fs::try_exists(&jobs_dir).await? {
            return Ok(Vec::new());
        }

        let mut jobs = Vec::new();
        let mut entries = fs::read_dir(&jobs_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();

            if path.extension().is_some_and(|ext| ext == "json") {
                match fs::read_to_string(&path).await {
                    Ok(content) => match serde_json::from_str::<Job>(&content) {
                        Ok(job) => jobs.push(job),
                        Err(e) => {
                            warn!("Failed to deserialize job from {:?}: {}", path, e);
                        }
                    },
                    Err(e) => {
                        warn!("Failed to read job file {:?}: {}", path, e);
                    }
                }
            }
        }

        sort_jobs(&mut jobs);
        debug!("Loaded {} jobs from {:?}", jobs.len(), jobs_dir);
        Ok(jobs)
    }
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn get(&self, id: &str) -> Result<Option<Job>, StoreError> {
        self.read_job(id).await
    }

    async fn list_all(&self) -> Result<Vec<Job>, StoreError> {
        self.read_all().await
    }

    async fn create(&self, definition: JobDefinition) -> Result<Job, StoreError> {
        let _guard = self.write_lock.lock().await;
        let existing = self.read_all().await?;
        if existing.iter().any(|j| j.name() == definition.name) {
            return Err(StoreError::DuplicateName(definition.name));
        }
        let job = Job::new(definition);
        self.write_job(&job).await?;
        Ok(job)
    }

    async fn update(&self, id: &str, patch: &JobPatch) -> Result<Job, StoreError> {
        let _guard = self.write_lock.lock().await;
        if let Some(ref name) = patch.name {
            let existing = self.read_all().await?;
            if existing.iter().any(|j| j.id != id && j.name() == name) {
                return Err(StoreError::DuplicateName(name.clone()));
            }
        }
        let mut job = self.require_job(id).await?;
        apply_patch(&mut job, patch);
        self.write_job(&job).await?;
        Ok(job)
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        let path = self.job_path(id);

        if !fs::try_exists(&path).await? {
            return Ok(false);
        }
        fs::remove_file(&path).await?;
        debug!("Deleted job '{}' from {:?}", id, path);
        Ok(true)
    }

    async fn record_execution(
        &self,
        id: &str,
        outcome: &ExecutionOutcome,
    ) -> Result<Job, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut job = self.require_job(id).await?;
        job.apply_outcome(outcome);
        self.write_job(&job).await?;
        Ok(job)
    }

    async fn set_running(&self, id: &str, running: bool) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut job = self.require_job(id).await?;
        job.is_running = running;
        job.updated_at = Utc::now();
        self.write_job(&job).await
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
