//! CLI definitions for Cronkeeper.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Cronkeeper CLI.
#[derive(Parser)]
#[command(name = "cronkeeper")]
#[command(about = "Cron job scheduler with single-flight execution")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "cronkeeper.toml",
        env = "CRONKEEPER_CONFIG",
        global = true
    )]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the scheduler in foreground (default)
    Run,

    /// Job management commands
    Jobs {
        #[command(subcommand)]
        action: JobsAction,
    },

    /// Cron expression tools
    Cron {
        #[command(subcommand)]
        action: CronAction,
    },
}

#[derive(Subcommand)]
pub(crate) enum JobsAction {
    /// List all jobs
    List {
        /// Output format (table, json)
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Execute a job now and print the outcome
    Run {
        /// Job ID or name
        job: String,
    },

    /// Activate a job
    Enable {
        /// Job ID or name
        job: String,
    },

    /// Deactivate a job, keeping its definition
    Disable {
        /// Job ID or name
        job: String,
    },

    /// Delete a job
    Delete {
        /// Job ID or name
        job: String,
    },
}

#[derive(Subcommand)]
pub(crate) enum CronAction {
    /// Validate an expression and print its next fire times
    Validate {
        /// Five-field cron expression (quote it)
        expr: String,

        /// Number of fire times to print
        #[arg(long, default_value_t = 5)]
        count: usize,
    },
}
