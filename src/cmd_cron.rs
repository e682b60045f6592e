//! Cron subcommand handlers for Cronkeeper.

use chrono::Utc;

use cronkeeper_engine::CronExpr;

use crate::cli::CronAction;

/// Handle cron subcommands.
pub(crate) fn handle_cron_command(action: CronAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        CronAction::Validate { expr, count } => cron_validate(&expr, count),
    }
}

/// Validate an expression and print its next fire times (UTC).
fn cron_validate(expr: &str, count: usize) -> Result<(), Box<dyn std::error::Error>> {
    let parsed = CronExpr::parse(expr)?;
    println!("Valid: {}", parsed);

    for time in parsed.upcoming(Utc::now(), count) {
        println!("  {}", time.to_rfc3339());
    }
    Ok(())
}
