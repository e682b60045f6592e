//! Configuration loader.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::schema::Config;

/// Configuration loader with environment variable substitution.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = fs::read_to_string(path)?;
        Self::load_str(&content)
    }

    /// Load configuration from a file, falling back to defaults when it is missing.
    pub fn load_or_default(path: &Path) -> Result<Config, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::NotFound(_)) => Ok(Config::default()),
            other => other,
        }
    }

    /// Load configuration from a string.
    pub fn load_str(content: &str) -> Result<Config, ConfigError> {
        let expanded = Self::expand_env_vars(content)?;
        let mut config: Config = toml::from_str(&expanded)?;
        config.engine.storage_dir = Self::expand_pathbuf(&config.engine.storage_dir);
        if let Some(dir) = config.logging.file_dir.take() {
            config.logging.file_dir = Some(Self::expand_pathbuf(&dir));
        }
        Ok(config)
    }

    /// Expand environment variables in the format `${VAR}`.
    fn expand_env_vars(content: &str) -> Result<String, ConfigError> {
        let re = regex::Regex::new(r"\$\{([^}]+)\}").map_err(|e| ConfigError::InvalidValue {
            field: "env pattern".to_string(),
            message: e.to_string(),
        })?;

        let mut result = content.to_string();
        for cap in re.captures_iter(content) {
            let var_name = &cap[1];
            let var_value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotSet(var_name.to_string()))?;
            result = result.replace(&cap[0], &var_value);
        }

        Ok(result)
    }

    /// Expand shell-style paths (e.g., `~/.cronkeeper`).
    pub fn expand_path(path: &str) -> String {
        shellexpand::tilde(path).to_string()
    }

    fn expand_pathbuf(path: &Path) -> PathBuf {
        match path.to_str() {
            Some(s) => PathBuf::from(Self::expand_path(s)),
            None => path.to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_empty_config() {
        let config = ConfigLoader::load_str("").unwrap();
        assert_eq!(config.engine.default_timeout_ms, 300_000);
        assert!(config.jobs.is_empty());
    }

    #[test]
    fn test_load_engine_section() {
        let content = r#"
            [engine]
            storage_dir = "/var/lib/cronkeeper"
            default_timeout_ms = 60000
            reset_stale_on_start = false
        "#;
        let config = ConfigLoader::load_str(content).unwrap();
        assert_eq!(config.engine.storage_dir, PathBuf::from("/var/lib/cronkeeper"));
        assert_eq!(config.engine.default_timeout_ms, 60_000);
        assert!(!config.engine.reset_stale_on_start);
    }

    #[test]
    fn test_load_jobs() {
        let content = r#"
            [[jobs]]
            name = "analytics"
            schedule = "0 0 * * *"
            task = "noop"

            [[jobs]]
            name = "cleanup"
            schedule = "*/15 * * * *"
            task = "log"
            active = false
            timeout_ms = 5000
        "#;
        let config = ConfigLoader::load_str(content).unwrap();
        assert_eq!(config.jobs.len(), 2);
        assert_eq!(config.jobs[0].name, "analytics");
        assert!(!config.jobs[1].active);
        assert_eq!(config.jobs[1].timeout_ms, Some(5000));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[logging]").unwrap();
        writeln!(file, "level = \"debug\"").unwrap();

        let config = ConfigLoader::load(file.path()).unwrap();
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = ConfigLoader::load(Path::new("/nonexistent/path/cronkeeper.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config =
            ConfigLoader::load_or_default(Path::new("/nonexistent/path/cronkeeper.toml")).unwrap();
        assert!(config.notifications.log);
    }

    #[test]
    fn test_load_invalid_toml() {
        let result = ConfigLoader::load_str("invalid = [unclosed");
        assert!(matches!(result, Err(ConfigError::TomlParse(_))));
    }

    #[test]
    fn test_expand_env_vars() {
        // SAFETY: This test runs in isolation and sets a unique test-only env var
        unsafe {
            std::env::set_var("CRONKEEPER_TEST_HOOK", "https://hooks.example.com/x");
        }
        let content = "[notifications]\nwebhook_url = \"${CRONKEEPER_TEST_HOOK}\"";
        let config = ConfigLoader::load_str(content).unwrap();
        assert_eq!(
            config.notifications.webhook_url.as_deref(),
            Some("https://hooks.example.com/x")
        );
        unsafe {
            std::env::remove_var("CRONKEEPER_TEST_HOOK");
        }
    }

    #[test]
    fn test_expand_env_vars_not_set() {
        let content = "value = \"${NONEXISTENT_CRONKEEPER_VAR_12345}\"";
        let result = ConfigLoader::expand_env_vars(content);
        assert!(matches!(result, Err(ConfigError::EnvVarNotSet(_))));
    }

    #[test]
    fn test_storage_dir_tilde_is_expanded() {
        let content = "[engine]\nstorage_dir = \"~/jobs\"";
        let config = ConfigLoader::load_str(content).unwrap();
        assert!(!config.engine.storage_dir.starts_with("~"));
        assert!(config.engine.storage_dir.ends_with("jobs"));
    }

    #[test]
    fn test_expand_path_no_tilde() {
        let path = "/usr/local/bin";
        assert_eq!(ConfigLoader::expand_path(path), path);
    }
}
