//! Glue between the config file and the engine.

use std::sync::Arc;
use std::time::Duration;

use cronkeeper_config::{Config, JobSeedConfig};
use cronkeeper_engine::{
    EngineOptions, FileJobStore, JobDefinition, JobEngine, LogNotifier, MultiNotifier,
    Notifier, TaskRegistry, WebhookNotifier,
};
use tracing::{debug, info, warn};

use crate::register::register_builtin_tasks;

/// Build the notifier chain described by `[notifications]`.
pub(crate) fn build_notifier(
    config: &Config,
) -> Result<Arc<dyn Notifier>, Box<dyn std::error::Error>> {
    let mut notifier = MultiNotifier::new();

    if config.notifications.log {
        notifier.push(Arc::new(LogNotifier::new()));
    }
    if let Some(ref url) = config.notifications.webhook_url {
        let timeout = Duration::from_secs(config.notifications.webhook_timeout_secs);
        notifier.push(Arc::new(WebhookNotifier::new(url.clone(), timeout)?));
        info!("Webhook notifications enabled: {}", url);
    }

    Ok(Arc::new(notifier))
}

/// Build an engine over the file store with the builtin tasks registered.
pub(crate) async fn build_engine(
    config: &Config,
) -> Result<JobEngine, Box<dyn std::error::Error>> {
    let store = FileJobStore::new(&config.engine.storage_dir).await?;
    info!("Job store: {}", config.engine.storage_dir.display());

    let registry = TaskRegistry::new();
    register_builtin_tasks(&registry)?;

    let notifier = build_notifier(config)?;
    let options = EngineOptions {
        reset_stale_on_start: config.engine.reset_stale_on_start,
    };

    Ok(JobEngine::new(
        Arc::new(store),
        Arc::new(registry),
        notifier,
        options,
    ))
}

/// Convert a `[[jobs]]` entry into a job definition.
pub(crate) fn definition_from_seed(
    seed: &JobSeedConfig,
    default_timeout_ms: u64,
) -> JobDefinition {
    JobDefinition::new(&seed.name, &seed.schedule, &seed.task)
        .with_config(seed.config.clone())
        .with_active(seed.active)
        .with_timeout_ms(seed.timeout_ms.unwrap_or(default_timeout_ms))
        .with_retries(seed.max_retries, seed.retry_delay_ms)
        .with_priority(seed.priority)
        .with_notify(seed.notify_on_success, seed.notify_on_failure)
        .with_recipients(seed.recipients.iter().cloned())
}

/// Create the `[[jobs]]` entries that are not yet in the store.
///
/// Seeds are matched by name, so edits to an existing seed in the config file
/// are not applied to the stored job.
pub(crate) async fn seed_jobs(
    engine: &JobEngine,
    config: &Config,
) -> Result<usize, Box<dyn std::error::Error>> {
    let mut created = 0;

    for seed in &config.jobs {
        if engine.find_job(&seed.name).await?.is_some() {
            debug!("Seed job '{}' already exists", seed.name);
            continue;
        }

        let definition = definition_from_seed(seed, config.engine.default_timeout_ms);
        match engine.create_job(definition).await {
            Ok(job) => {
                info!("Seeded job '{}' ({})", job.name(), job.id);
                created += 1;
            }
            Err(e) => warn!("Failed to seed job '{}': {}", seed.name, e),
        }
    }

    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cronkeeper_config::ConfigLoader;

    #[test]
    fn test_definition_from_seed() {
        let config = ConfigLoader::load_str(
            r#"
[engine]
default_timeout_ms = 1234

[[jobs]]
name = "report"
schedule = "0 6 * * 1-5"
task = "log"
config = { message = "daily report" }
priority = 8
recipients = ["ops@example.com"]
"#,
        )
        .unwrap();

        let def = definition_from_seed(&config.jobs[0], config.engine.default_timeout_ms);

        assert_eq!(def.name, "report");
        assert_eq!(def.timeout_ms, 1234);
        assert_eq!(def.priority, 8);
        assert_eq!(def.config["message"], serde_json::json!("daily report"));
        assert!(def.notify_on_failure);
        assert_eq!(def.notification_recipients, vec!["ops@example.com"]);
        assert!(def.validate().is_ok());
    }

    #[tokio::test]
    async fn test_seed_jobs_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ConfigLoader::load_str(
            r#"
[[jobs]]
name = "heartbeat"
schedule = "*/5 * * * *"
task = "noop"

[[jobs]]
name = "broken"
schedule = "not a schedule"
task = "noop"
"#,
        )
        .unwrap();
        config.engine.storage_dir = dir.path().to_path_buf();

        let engine = build_engine(&config).await.unwrap();
        assert_eq!(seed_jobs(&engine, &config).await.unwrap(), 1);
        assert_eq!(seed_jobs(&engine, &config).await.unwrap(), 0);

        let jobs = engine.list_jobs().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].name(), "heartbeat");

        engine.shutdown(Duration::from_secs(1)).await;
    }

    #[test]
    fn test_build_notifier_default() {
        let config = Config::default();
        assert!(build_notifier(&config).is_ok());
    }
}
