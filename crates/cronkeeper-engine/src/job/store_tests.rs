
    use super::*;
    use crate::job::{ExecutionStatus, FailureKind};
    use serde_json::json;
    use tempfile::TempDir;

    fn def(name: &str) -> JobDefinition {
        JobDefinition::new(name, "0 * * * *", "noop")
    }

    async fn exercise_store(store: &dyn JobStore) {
        let job = store.create(def("first")).await.unwrap();
        store
            .create(def("second").with_active(false))
            .await
            .unwrap();

        let loaded = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded.name(), "first");

        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 2);
        let active = store.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, job.id);

        let found = store.find_by_name("second").await.unwrap();
        assert!(found.is_some());
        assert!(store.find_by_name("third").await.unwrap().is_none());

        let dup = store.create(def("first")).await;
        assert!(matches!(dup, Err(StoreError::DuplicateName(_))));

        store.set_running(&job.id, true).await.unwrap();
        assert!(store.get(&job.id).await.unwrap().unwrap().is_running);

        let outcome = ExecutionOutcome::success(&job.id, Utc::now(), json!({"ok": true}));
        let updated = store.record_execution(&job.id, &outcome).await.unwrap();
        assert!(!updated.is_running);
        assert_eq!(updated.stats.success_count, 1);

        let reloaded = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(reloaded.stats.execution_count, 1);
        assert_eq!(
            reloaded.stats.last_execution_status,
            Some(ExecutionStatus::Success)
        );

        assert!(store.delete(&job.id).await.unwrap());
        assert!(!store.delete(&job.id).await.unwrap());
        assert!(store.get(&job.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_job_store() {
        let store = MemoryJobStore::new();
        exercise_store(&store).await;
    }

    #[tokio::test]
    async fn test_file_job_store() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileJobStore::new(temp_dir.path()).await.unwrap();
        exercise_store(&store).await;
    }

    #[tokio::test]
    async fn test_file_job_store_persistence() {
        let temp_dir = TempDir::new().unwrap();
        let id = {
            let store = FileJobStore::new(temp_dir.path()).await.unwrap();
            let job = store.create(def("persistent")).await.unwrap();
            let outcome = ExecutionOutcome::failed(
                &job.id,
                Utc::now(),
                FailureKind::Handler,
                "disk full",
                None,
            );
            store.record_execution(&job.id, &outcome).await.unwrap();
            job.id
        };

        let store = FileJobStore::new(temp_dir.path()).await.unwrap();
        let loaded = store.get(&id).await.unwrap().unwrap();
        assert_eq!(loaded.name(), "persistent");
        assert_eq!(loaded.stats.failure_count, 1);
        assert_eq!(
            loaded.stats.last_error.as_ref().map(|e| e.message.as_str()),
            Some("disk full")
        );
    }

    #[tokio::test]
    async fn test_file_job_store_skips_corrupt_files() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileJobStore::new(temp_dir.path()).await.unwrap();
        store.create(def("good")).await.unwrap();

        tokio::fs::write(temp_dir.path().join("jobs").join("bad.json"), "not json")
            .await
            .unwrap();

        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_update_applies_patch() {
        let store = MemoryJobStore::new();
        let job = store.create(def("patched")).await.unwrap();

        let patch = JobPatch {
            schedule: Some("*/5 * * * *".to_string()),
            is_active: Some(false),
            ..JobPatch::default()
        };
        let updated = store.update(&job.id, &patch).await.unwrap();
        assert_eq!(updated.definition.schedule, "*/5 * * * *");
        assert!(!updated.is_active());
        assert!(updated.next_execution_at.is_none());
        assert!(updated.updated_at >= job.updated_at);
    }

    #[tokio::test]
    async fn test_update_rejects_duplicate_name() {
        let store = MemoryJobStore::new();
        store.create(def("a")).await.unwrap();
        let b = store.create(def("b")).await.unwrap();

        let patch = JobPatch {
            name: Some("a".to_string()),
            ..JobPatch::default()
        };
        let result = store.update(&b.id, &patch).await;
        assert!(matches!(result, Err(StoreError::DuplicateName(_))));

        let rename_self = JobPatch {
            name: Some("b".to_string()),
            ..JobPatch::default()
        };
        assert!(store.update(&b.id, &rename_self).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_job_errors() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileJobStore::new(temp_dir.path()).await.unwrap();

        let result = store.set_running("missing", true).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));

        let outcome = ExecutionOutcome::success("missing", Utc::now(), json!(null));
        let result = store.record_execution("missing", &outcome).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_sanitize_id() {
        assert_eq!(FileJobStore::sanitize_id("simple-id"), "simple-id");
        assert_eq!(FileJobStore::sanitize_id("../etc/passwd"), "___etc_passwd");
    }
