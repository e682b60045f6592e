//! Job subcommand handlers for Cronkeeper.

use cronkeeper_config::Config;
use cronkeeper_engine::{Job, JobEngine};

use crate::adapters::build_engine;
use crate::cli::JobsAction;

/// Handle job subcommands.
///
/// These operate directly on the job store and do not start any timers.
pub(crate) async fn handle_jobs_command(
    action: JobsAction,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = build_engine(config).await?;

    match action {
        JobsAction::List { format } => jobs_list(&engine, &format).await,
        JobsAction::Run { job } => jobs_run(&engine, &job).await,
        JobsAction::Enable { job } => jobs_set_active(&engine, &job, true).await,
        JobsAction::Disable { job } => jobs_set_active(&engine, &job, false).await,
        JobsAction::Delete { job } => jobs_delete(&engine, &job).await,
    }
}

async fn resolve(engine: &JobEngine, id_or_name: &str) -> Result<Job, Box<dyn std::error::Error>> {
    engine
        .find_job(id_or_name)
        .await?
        .ok_or_else(|| format!("Job not found: {}", id_or_name).into())
}

/// List all jobs.
async fn jobs_list(engine: &JobEngine, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let jobs = engine.list_jobs().await?;

    if jobs.is_empty() {
        println!("No jobs found.");
        return Ok(());
    }

    match format {
        "json" => {
            let json = serde_json::to_string_pretty(&jobs)?;
            println!("{}", json);
        }
        _ => {
            println!(
                "{:<36}  {:<20} {:<15} {:<10} {:<6} {:>5}  {:<9} {}",
                "ID", "NAME", "SCHEDULE", "TASK", "ACTIVE", "RUNS", "LAST", "NEXT"
            );
            println!("{}", "-".repeat(130));
            for job in jobs {
                let last = job
                    .stats
                    .last_execution_status
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "-".to_string());
                let next = job
                    .next_execution_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<36}  {:<20} {:<15} {:<10} {:<6} {:>5}  {:<9} {}",
                    job.id,
                    job.definition.name,
                    job.definition.schedule,
                    job.definition.task,
                    if job.is_active() { "yes" } else { "no" },
                    job.stats.execution_count,
                    last,
                    next
                );
            }
        }
    }

    Ok(())
}

/// Execute a job now and print the outcome.
async fn jobs_run(engine: &JobEngine, id_or_name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let job = resolve(engine, id_or_name).await?;
    let outcome = engine.execute_manual(&job.id).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn jobs_set_active(
    engine: &JobEngine,
    id_or_name: &str,
    active: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let job = resolve(engine, id_or_name).await?;
    let job = engine.set_active(&job.id, active).await?;
    println!(
        "Job '{}' {}",
        job.name(),
        if active { "enabled" } else { "disabled" }
    );
    Ok(())
}

async fn jobs_delete(
    engine: &JobEngine,
    id_or_name: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let job = resolve(engine, id_or_name).await?;
    engine.delete_job(&job.id).await?;
    println!("Job '{}' deleted", job.name());
    Ok(())
}
