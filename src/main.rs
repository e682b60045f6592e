//! Cronkeeper - cron job scheduler.
//!
//! Main entry point for the Cronkeeper CLI and scheduler.

mod adapters;
mod cli;
mod cmd_cron;
mod cmd_jobs;
mod register;

use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use cronkeeper_config::{Config, ConfigLoader, ConfigValidator, LoggingConfig};

use crate::adapters::{build_engine, seed_jobs};
use crate::cli::{Cli, Commands};
use crate::cmd_cron::handle_cron_command;
use crate::cmd_jobs::handle_jobs_command;

/// Initialize tracing with console and optional file output.
///
/// `RUST_LOG` overrides `logging.level`. When `logging.file_dir` is set, log
/// files are written there with daily rotation.
fn init_tracing(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let file_layer = match config.file_dir {
        Some(ref log_dir) => {
            std::fs::create_dir_all(log_dir)?;

            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("cronkeeper")
                .filename_suffix("log")
                .max_log_files(30)
                .build(log_dir)?;

            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            // Keep the writer alive for the program duration.
            static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
                std::sync::OnceLock::new();
            let _ = GUARD.set(guard);

            Some(fmt::layer().with_writer(non_blocking).with_ansi(false))
        }
        None => None,
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with((!config.json).then(|| fmt::layer().with_target(true).with_ansi(true)))
        .with(config.json.then(|| fmt::layer().json()))
        .with(file_layer)
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = ConfigLoader::load_or_default(&cli.config)?;
    init_tracing(&config.logging)?;

    let warnings = ConfigValidator::validate(&config)?.into_result()?;
    for warning in warnings {
        warn!("Config {}: {}", warning.path, warning.message);
    }

    match cli.command {
        None | Some(Commands::Run) => run_scheduler(config).await,
        Some(Commands::Jobs { action }) => handle_jobs_command(action, &config).await,
        Some(Commands::Cron { action }) => handle_cron_command(action),
    }
}

/// Run the scheduler in foreground until interrupted.
async fn run_scheduler(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting Cronkeeper v{}", env!("CARGO_PKG_VERSION"));

    let engine = build_engine(&config).await?;
    seed_jobs(&engine, &config).await?;

    let report = engine.initialize().await?;
    info!(
        scheduled = report.refresh.scheduled.len(),
        failed = report.refresh.failed.len(),
        "Scheduler running, press Ctrl-C to stop"
    );

    shutdown_signal().await?;
    info!("Shutdown signal received");

    let grace = Duration::from_secs(config.engine.shutdown_grace_secs);
    let report = engine.shutdown(grace).await;
    if !report.aborted.is_empty() {
        warn!("Aborted running jobs: {:?}", report.aborted);
    }

    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
