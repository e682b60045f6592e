//! Configuration validation.

use std::collections::HashSet;

use crate::error::ConfigError;
use crate::schema::Config;

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// Convert into an error when any validation error was recorded.
    pub fn into_result(self) -> Result<Vec<ValidationWarning>, ConfigError> {
        if self.is_valid() {
            Ok(self.warnings)
        } else {
            Err(ConfigError::Rejected(
                self.errors
                    .iter()
                    .map(|e| format!("{}: {}", e.path, e.message))
                    .collect(),
            ))
        }
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Configuration validator.
///
/// Cron grammar is checked by the engine when seeds are created; here only
/// the field count is verified so obvious typos fail at load time.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> Result<ValidationResult, ConfigError> {
        let mut result = ValidationResult::default();

        Self::validate_engine(config, &mut result);
        Self::validate_notifications(config, &mut result);
        Self::validate_logging(config, &mut result);
        Self::validate_jobs(config, &mut result);

        Ok(result)
    }

    fn validate_engine(config: &Config, result: &mut ValidationResult) {
        if config.engine.default_timeout_ms == 0 {
            result.add_error(ValidationError::new(
                "engine.default_timeout_ms",
                "default_timeout_ms must be greater than 0",
            ));
        }

        if config.engine.shutdown_grace_secs > 600 {
            result.add_warning(ValidationWarning::new(
                "engine.shutdown_grace_secs",
                "shutdown_grace_secs is very high (>600), shutdown may hang for a long time",
            ));
        }

        if config.engine.storage_dir.as_os_str().is_empty() {
            result.add_error(ValidationError::new(
                "engine.storage_dir",
                "storage_dir cannot be empty",
            ));
        }
    }

    fn validate_notifications(config: &Config, result: &mut ValidationResult) {
        if let Some(ref url) = config.notifications.webhook_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                result.add_error(ValidationError::new(
                    "notifications.webhook_url",
                    "webhook_url must start with http:// or https://",
                ));
            }
        }

        if config.notifications.webhook_timeout_secs == 0 {
            result.add_error(ValidationError::new(
                "notifications.webhook_timeout_secs",
                "webhook_timeout_secs must be greater than 0",
            ));
        }

        if !config.notifications.log && config.notifications.webhook_url.is_none() {
            result.add_warning(ValidationWarning::new(
                "notifications",
                "No notification target configured, outcomes will not be reported",
            ));
        }
    }

    fn validate_logging(config: &Config, result: &mut ValidationResult) {
        let known = ["trace", "debug", "info", "warn", "error", "off"];
        let level = config.logging.level.to_ascii_lowercase();
        // Directives such as "cronkeeper_engine=debug" are passed through untouched.
        if !level.contains('=') && !known.contains(&level.as_str()) {
            result.add_warning(ValidationWarning::new(
                "logging.level",
                format!(
                    "Unknown log level '{}', valid values: {:?}",
                    config.logging.level, known
                ),
            ));
        }
    }

    fn validate_jobs(config: &Config, result: &mut ValidationResult) {
        let mut names = HashSet::new();

        for (i, job) in config.jobs.iter().enumerate() {
            let path = format!("jobs[{}]", i);

            if job.name.trim().is_empty() {
                result.add_error(ValidationError::new(
                    format!("{}.name", path),
                    "Job name cannot be empty",
                ));
            } else if !names.insert(job.name.as_str()) {
                result.add_error(ValidationError::new(
                    format!("{}.name", path),
                    format!("Duplicate job name '{}'", job.name),
                ));
            }

            let fields = job.schedule.split_whitespace().count();
            if fields != 5 {
                result.add_error(ValidationError::new(
                    format!("{}.schedule", path),
                    format!("Expected 5 cron fields, found {}", fields),
                ));
            }

            if job.task.trim().is_empty() {
                result.add_error(ValidationError::new(
                    format!("{}.task", path),
                    "Task identifier cannot be empty",
                ));
            }

            if !(1..=10).contains(&job.priority) {
                result.add_error(ValidationError::new(
                    format!("{}.priority", path),
                    "priority must be between 1 and 10",
                ));
            }

            if job.timeout_ms == Some(0) {
                result.add_error(ValidationError::new(
                    format!("{}.timeout_ms", path),
                    "timeout_ms must be greater than 0",
                ));
            }

            if job.max_retries > 0 {
                result.add_warning(ValidationWarning::new(
                    format!("{}.max_retries", path),
                    "max_retries is recorded but failed runs are not retried",
                ));
            }

            if (job.notify_on_success || job.notify_on_failure) && job.recipients.is_empty() {
                result.add_warning(ValidationWarning::new(
                    format!("{}.recipients", path),
                    "Notifications enabled but no recipients configured",
                ));
            }
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
