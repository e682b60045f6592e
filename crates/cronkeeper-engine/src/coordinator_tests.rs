
    use super::*;
    use crate::error::{StoreError, TaskError};
    use crate::job::{ExecutionStatus, JobDefinition, JobPatch, MemoryJobStore};
    use crate::notify::MemoryNotifier;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    struct Fixture {
        store: Arc<MemoryJobStore>,
        notifier: Arc<MemoryNotifier>,
        coordinator: Arc<ExecutionCoordinator>,
        slow_calls: Arc<AtomicUsize>,
    }

    fn registry(slow_calls: Arc<AtomicUsize>) -> TaskRegistry {
        let registry = TaskRegistry::new();
        registry
            .register_fn("noop", |_| async { Ok(json!({"ok": true})) })
            .unwrap();
        registry
            .register_fn("fail", |_| async {
                Err(TaskError::Failed("boom".to_string()))
            })
            .unwrap();
        registry
            .register_fn("hang", |_| async {
                std::future::pending::<()>().await;
                Ok(json!(null))
            })
            .unwrap();
        registry
            .register_fn("panic", |_| async {
                if true {
                    panic!("kaboom");
                }
                Ok(json!(null))
            })
            .unwrap();
        registry
            .register_fn("slow", move |_| {
                let calls = slow_calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(json!("done"))
                }
            })
            .unwrap();
        registry
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryJobStore::new());
        let notifier = Arc::new(MemoryNotifier::new());
        let slow_calls = Arc::new(AtomicUsize::new(0));
        let coordinator = Arc::new(ExecutionCoordinator::new(
            store.clone(),
            Arc::new(registry(slow_calls.clone())),
            notifier.clone(),
        ));
        Fixture {
            store,
            notifier,
            coordinator,
            slow_calls,
        }
    }

    async fn create(store: &MemoryJobStore, def: JobDefinition) -> Job {
        store.create(def).await.unwrap()
    }

    async fn wait_until_running(coordinator: &ExecutionCoordinator, job_id: &str) {
        for _ in 0..100 {
            if coordinator.is_running(job_id) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {} never started", job_id);
    }

    async fn assert_released(f: &Fixture, job_id: &str) -> Job {
        assert!(!f.coordinator.is_running(job_id));
        let job = f.store.get(job_id).await.unwrap().unwrap();
        assert!(!job.is_running);
        assert_eq!(
            job.stats.execution_count,
            job.stats.success_count + job.stats.failure_count
        );
        job
    }

    #[tokio::test]
    async fn test_successful_execution() {
        let f = fixture();
        let job = create(&f.store, JobDefinition::new("ok", "0 0 * * *", "noop")).await;

        let outcome = f.coordinator.execute(&job.id, Trigger::Manual).await.unwrap();

        assert_eq!(outcome.status, ExecutionStatus::Success);
        assert_eq!(outcome.result, Some(json!({"ok": true})));
        let job = assert_released(&f, &job.id).await;
        assert_eq!(job.stats.success_count, 1);
        assert_eq!(job.stats.last_execution_result, Some(json!({"ok": true})));
        assert!(job.stats.last_executed_at.is_some());
    }

    #[tokio::test]
    async fn test_unknown_task_is_recorded_as_failure() {
        let f = fixture();
        let job = create(
            &f.store,
            JobDefinition::new("ghost", "0 0 * * *", "does-not-exist"),
        )
        .await;

        let outcome = f.coordinator.execute(&job.id, Trigger::Manual).await.unwrap();

        assert_eq!(outcome.status, ExecutionStatus::Failure);
        let job = assert_released(&f, &job.id).await;
        assert_eq!(job.stats.failure_count, 1);
        let err = job.stats.last_error.unwrap();
        assert_eq!(err.kind, FailureKind::UnknownTask);
        assert!(err.message.contains("does-not-exist"));
    }

    #[tokio::test]
    async fn test_handler_error_is_recorded() {
        let f = fixture();
        let job = create(&f.store, JobDefinition::new("bad", "0 0 * * *", "fail")).await;

        let outcome = f.coordinator.execute(&job.id, Trigger::Manual).await.unwrap();

        assert_eq!(outcome.status, ExecutionStatus::Failure);
        let job = assert_released(&f, &job.id).await;
        let err = job.stats.last_error.unwrap();
        assert_eq!(err.kind, FailureKind::Handler);
        assert_eq!(err.message, "boom");
        assert_eq!(err.trace.as_deref(), Some(r#"Failed("boom")"#));
    }

    #[tokio::test]
    async fn test_dropped_caller_still_records_outcome() {
        let f = fixture();
        let job = create(&f.store, JobDefinition::new("slow", "0 0 * * *", "slow")).await;

        let waited = tokio::time::timeout(
            Duration::from_millis(50),
            f.coordinator.execute(&job.id, Trigger::Manual),
        )
        .await;
        assert!(waited.is_err());

        assert!(f.coordinator.wait_idle(Duration::from_secs(2)).await);
        let job = assert_released(&f, &job.id).await;
        assert_eq!(job.stats.execution_count, 1);
        assert_eq!(job.stats.last_execution_status, Some(ExecutionStatus::Success));
    }

    #[tokio::test]
    async fn test_reserved_slot_blocks_execution() {
        let f = fixture();
        let job = create(&f.store, JobDefinition::new("held", "0 0 * * *", "noop")).await;

        let slot = f.coordinator.reserve(&job.id).unwrap();
        assert!(f.coordinator.reserve(&job.id).is_err());
        assert!(!f.coordinator.is_running(&job.id));
        assert!(f.coordinator.running_job_ids().is_empty());

        let result = f.coordinator.execute(&job.id, Trigger::Manual).await;
        assert!(matches!(result, Err(ExecutionError::AlreadyRunning(_))));

        drop(slot);
        let outcome = f.coordinator.execute(&job.id, Trigger::Manual).await.unwrap();
        assert!(outcome.is_success());
        assert_released(&f, &job.id).await;
    }

    #[tokio::test]
    async fn test_timeout_does_not_wait_for_handler() {
        let f = fixture();
        let job = create(
            &f.store,
            JobDefinition::new("stuck", "0 0 * * *", "hang").with_timeout_ms(100),
        )
        .await;

        let start = Instant::now();
        let outcome = f.coordinator.execute(&job.id, Trigger::Manual).await.unwrap();

        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(outcome.status, ExecutionStatus::Timeout);
        let job = assert_released(&f, &job.id).await;
        assert_eq!(job.stats.failure_count, 1);
        assert_eq!(job.stats.last_execution_status, Some(ExecutionStatus::Timeout));
    }

    #[tokio::test]
    async fn test_panic_is_recorded_as_failure() {
        let f = fixture();
        let job = create(&f.store, JobDefinition::new("crash", "0 0 * * *", "panic")).await;

        let outcome = f.coordinator.execute(&job.id, Trigger::Manual).await.unwrap();

        assert_eq!(outcome.status, ExecutionStatus::Failure);
        let job = assert_released(&f, &job.id).await;
        let err = job.stats.last_error.unwrap();
        assert_eq!(err.kind, FailureKind::Panic);
        assert!(err.message.contains("kaboom"));
        assert_eq!(err.trace.as_deref(), Some("kaboom"));
    }

    #[tokio::test]
    async fn test_single_flight() {
        let f = fixture();
        let job = create(&f.store, JobDefinition::new("slow", "0 0 * * *", "slow")).await;

        let coordinator = f.coordinator.clone();
        let id = job.id.clone();
        let first = tokio::spawn(async move { coordinator.execute(&id, Trigger::Timer).await });
        wait_until_running(&f.coordinator, &job.id).await;
        assert_eq!(f.coordinator.running_job_ids(), vec![job.id.clone()]);
        assert!(f.coordinator.started_at(&job.id).is_some());

        let second = f.coordinator.execute(&job.id, Trigger::Manual).await;
        assert!(matches!(second, Err(ExecutionError::AlreadyRunning(_))));

        // Timer fires while running are dropped.
        f.coordinator.fire(&job.id).await;

        let outcome = first.await.unwrap().unwrap();
        assert_eq!(outcome.status, ExecutionStatus::Success);
        assert_eq!(f.slow_calls.load(Ordering::SeqCst), 1);

        let job = assert_released(&f, &job.id).await;
        assert_eq!(job.stats.execution_count, 1);
    }

    #[tokio::test]
    async fn test_different_jobs_run_in_parallel() {
        let f = fixture();
        let a = create(&f.store, JobDefinition::new("a", "0 0 * * *", "slow")).await;
        let b = create(&f.store, JobDefinition::new("b", "0 0 * * *", "slow")).await;

        let start = Instant::now();
        let (ra, rb) = tokio::join!(
            f.coordinator.execute(&a.id, Trigger::Manual),
            f.coordinator.execute(&b.id, Trigger::Manual)
        );

        assert!(ra.unwrap().is_success());
        assert!(rb.unwrap().is_success());
        assert!(start.elapsed() < Duration::from_millis(390));
        assert_eq!(f.slow_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_job() {
        let f = fixture();
        let result = f.coordinator.execute("missing", Trigger::Manual).await;
        assert!(matches!(result, Err(ExecutionError::NotFound(_))));
        assert!(f.coordinator.running_job_ids().is_empty());
    }

    #[tokio::test]
    async fn test_inactive_job_is_rejected() {
        let f = fixture();
        let job = create(
            &f.store,
            JobDefinition::new("off", "0 0 * * *", "noop").with_active(false),
        )
        .await;

        let result = f.coordinator.execute(&job.id, Trigger::Manual).await;

        assert!(matches!(result, Err(ExecutionError::Inactive(_))));
        let job = assert_released(&f, &job.id).await;
        assert_eq!(job.stats.execution_count, 0);
    }

    #[tokio::test]
    async fn test_notifications_follow_job_flags() {
        let f = fixture();
        let failing = create(
            &f.store,
            JobDefinition::new("alerts", "0 0 * * *", "fail").with_recipients(["ops@example.com"]),
        )
        .await;
        let quiet = create(
            &f.store,
            JobDefinition::new("quiet", "0 0 * * *", "noop").with_recipients(["ops@example.com"]),
        )
        .await;
        let no_recipients =
            create(&f.store, JobDefinition::new("nobody", "0 0 * * *", "fail")).await;

        f.coordinator.execute(&failing.id, Trigger::Manual).await.unwrap();
        f.coordinator.execute(&quiet.id, Trigger::Manual).await.unwrap();
        f.coordinator.execute(&no_recipients.id, Trigger::Manual).await.unwrap();

        assert_eq!(
            f.notifier.outcomes(),
            vec![(failing.id.clone(), ExecutionStatus::Failure)]
        );
    }

    #[tokio::test]
    async fn test_notifier_failure_does_not_affect_execution() {
        let f = fixture();
        f.notifier.set_failing(true);
        let job = create(
            &f.store,
            JobDefinition::new("loud", "0 0 * * *", "noop")
                .with_notify(true, true)
                .with_recipients(["ops@example.com"]),
        )
        .await;

        let outcome = f.coordinator.execute(&job.id, Trigger::Manual).await.unwrap();

        assert!(outcome.is_success());
        assert_eq!(f.notifier.outcomes().len(), 1);
        assert_released(&f, &job.id).await;
    }

    #[tokio::test]
    async fn test_abort_all_records_cancelled() {
        let f = fixture();
        let job = create(&f.store, JobDefinition::new("stuck", "0 0 * * *", "hang")).await;

        let coordinator = f.coordinator.clone();
        let id = job.id.clone();
        let run = tokio::spawn(async move { coordinator.execute(&id, Trigger::Manual).await });
        wait_until_running(&f.coordinator, &job.id).await;

        // The abort handle is attached right after the handler is spawned.
        let mut aborted = Vec::new();
        for _ in 0..100 {
            aborted = f.coordinator.abort_all();
            if !aborted.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(aborted, vec![job.id.clone()]);

        let outcome = run.await.unwrap().unwrap();
        assert_eq!(outcome.status, ExecutionStatus::Cancelled);
        assert!(f.coordinator.wait_idle(Duration::from_secs(1)).await);
        let job = assert_released(&f, &job.id).await;
        assert_eq!(job.stats.failure_count, 1);
    }

    #[tokio::test]
    async fn test_closed_coordinator_refuses_work() {
        let f = fixture();
        let job = create(&f.store, JobDefinition::new("ok", "0 0 * * *", "noop")).await;

        f.coordinator.close();
        let result = f.coordinator.execute(&job.id, Trigger::Manual).await;

        assert!(matches!(result, Err(ExecutionError::ShuttingDown)));
        assert!(f.coordinator.wait_idle(Duration::from_millis(10)).await);
    }

    /// Store whose bookkeeping writes always fail.
    struct BrokenStore {
        inner: MemoryJobStore,
    }

    fn broken() -> StoreError {
        StoreError::Io(std::io::Error::other("disk unplugged"))
    }

    #[async_trait]
    impl JobStore for BrokenStore {
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
            self.inner.update(id, patch).await
        }

        async fn delete(&self, id: &str) -> Result<bool, StoreError> {
            self.inner.delete(id).await
        }

        async fn record_execution(
            &self,
            _id: &str,
            _outcome: &ExecutionOutcome,
        ) -> Result<Job, StoreError> {
            Err(broken())
        }

        async fn set_running(&self, _id: &str, _running: bool) -> Result<(), StoreError> {
            Err(broken())
        }
    }

    #[tokio::test]
    async fn test_store_failure_raises_alert_and_releases_guard() {
        let store = Arc::new(BrokenStore {
            inner: MemoryJobStore::new(),
        });
        let notifier = Arc::new(MemoryNotifier::new());
        let coordinator = ExecutionCoordinator::new(
            store.clone(),
            Arc::new(registry(Arc::new(AtomicUsize::new(0)))),
            notifier.clone(),
        );
        let job = store
            .create(JobDefinition::new("ok", "0 0 * * *", "noop"))
            .await
            .unwrap();

        let outcome = coordinator.execute(&job.id, Trigger::Manual).await.unwrap();

        assert!(outcome.is_success());
        assert!(!coordinator.is_running(&job.id));
        let alerts = notifier.alerts();
        assert_eq!(alerts.len(), 2);
        assert!(alerts.iter().all(|a| a.kind == AlertKind::StoreFailure));
    }
