
    use super::*;
    use crate::error::{ExecutionError, StoreError};
    use crate::job::MemoryJobStore;
    use crate::notify::MemoryNotifier;
    use async_trait::async_trait;
    use tokio::sync::{Notify, Semaphore};

    /// Store whose `update` and `delete` wait for a permit before writing.
    struct GatedStore {
        inner: MemoryJobStore,
        entered: Notify,
        release: Semaphore,
    }

    impl GatedStore {
        fn new() -> Self {
            Self {
                inner: MemoryJobStore::new(),
                entered: Notify::new(),
                release: Semaphore::new(0),
            }
        }

        async fn gate(&self) {
            self.entered.notify_one();
            self.release.acquire().await.unwrap().forget();
        }
    }

    #[async_trait]
    impl JobStore for GatedStore {
        async fn get(&self, id: &str) -> Result<Option<Job>, StoreError> {
            self.inner.get(id).await
        }

        async fn list_all(&self) -> Result<Vec<Job>, StoreError> {
            self.inner.list_all().await
        }

        async fn create(&self, definition: JobDefinition) -> Result<Job, StoreError> {
            self.inner.create(definition).await
        }

        async fn update(&self, id: &str, patch: &JobPatch) -> Result<Job, StoreError> {
            self.gate().await;
            self.inner.update(id, patch).await
        }

        async fn delete(&self, id: &str) -> Result<bool, StoreError> {
            self.gate().await;
            self.inner.delete(id).await
        }

        async fn record_execution(
            &self,
            id: &str,
            outcome: &ExecutionOutcome,
        ) -> Result<Job, StoreError> {
            self.inner.record_execution(id, outcome).await
        }

        async fn set_running(&self, id: &str, running: bool) -> Result<(), StoreError> {
            self.inner.set_running(id, running).await
        }
    }

    fn engine(store: Arc<GatedStore>) -> Arc<JobEngine> {
        let registry = TaskRegistry::new();
        registry
            .register_fn("noop", |_| async { Ok(json!({"ok": true})) })
            .unwrap();
        Arc::new(JobEngine::new(
            store,
            Arc::new(registry),
            Arc::new(MemoryNotifier::new()),
            EngineOptions::default(),
        ))
    }

    #[tokio::test]
    async fn test_update_blocks_execution_until_written() {
        let store = Arc::new(GatedStore::new());
        let engine = engine(store.clone());
        let job = engine
            .create_job(JobDefinition::new("gated", "0 0 * * *", "noop"))
            .await
            .unwrap();

        let updating = {
            let engine = engine.clone();
            let id = job.id.clone();
            tokio::spawn(async move {
                let patch = JobPatch {
                    priority: Some(9),
                    ..JobPatch::default()
                };
                engine.update_job(&id, &patch).await
            })
        };
        store.entered.notified().await;

        let result = engine.execute_manual(&job.id).await;
        assert!(matches!(
            result,
            Err(EngineError::Execution(ExecutionError::AlreadyRunning(_)))
        ));
        assert!(engine.status().running_job_ids.is_empty());

        store.release.add_permits(1);
        let updated = updating.await.unwrap().unwrap();
        assert_eq!(updated.definition.priority, 9);

        let outcome = engine.execute_manual(&job.id).await.unwrap();
        assert!(outcome.is_success());

        engine.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_delete_blocks_execution_until_removed() {
        let store = Arc::new(GatedStore::new());
        let engine = engine(store.clone());
        let job = engine
            .create_job(JobDefinition::new("doomed", "0 0 * * *", "noop"))
            .await
            .unwrap();

        let deleting = {
            let engine = engine.clone();
            let id = job.id.clone();
            tokio::spawn(async move { engine.delete_job(&id).await })
        };
        store.entered.notified().await;

        let result = engine.execute_manual(&job.id).await;
        assert!(matches!(
            result,
            Err(EngineError::Execution(ExecutionError::AlreadyRunning(_)))
        ));

        store.release.add_permits(1);
        deleting.await.unwrap().unwrap();

        assert!(engine.get_job(&job.id).await.unwrap().is_none());
        assert!(engine.status().scheduled_job_ids.is_empty());

        engine.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_failed_update_releases_slot() {
        let store = Arc::new(GatedStore::new());
        let engine = engine(store.clone());
        let job = engine
            .create_job(JobDefinition::new("strict", "0 0 * * *", "noop"))
            .await
            .unwrap();

        let patch = JobPatch {
            schedule: Some("not a cron".to_string()),
            ..JobPatch::default()
        };
        assert!(engine.update_job(&job.id, &patch).await.is_err());

        let outcome = engine.execute_manual(&job.id).await.unwrap();
        assert!(outcome.is_success());

        engine.shutdown(Duration::from_secs(1)).await;
    }
