//! Coordinator configuration
//!
//! Loaded from a JSON file; every field is optional and falls back to its
//! default.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::observability::{Event, Logger, Severity};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::Io(_) => "UOW_CONFIG_IO",
            ConfigError::Parse(_) => "UOW_CONFIG_PARSE",
            ConfigError::Invalid(_) => "UOW_CONFIG_INVALID",
        }
    }
}

/// Unit-of-work settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitOfWorkConfig {
    /// Upper bound on sessions reversed at the same time during rollback
    #[serde(default = "default_rollback_parallelism")]
    pub rollback_parallelism: usize,

    /// Clear the failing session's mutation log after a successful rollback
    #[serde(default = "default_clear_failed_session")]
    pub clear_failed_session: bool,

    /// Minimum log severity: trace, info, warn, error, fatal or off
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_rollback_parallelism() -> usize {
    4
}

fn default_clear_failed_session() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for UnitOfWorkConfig {
    fn default() -> Self {
        Self {
            rollback_parallelism: default_rollback_parallelism(),
            clear_failed_session: default_clear_failed_session(),
            log_level: default_log_level(),
        }
    }
}

impl UnitOfWorkConfig {
    /// Load and validate configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&content)?;
        Logger::info(
            Event::ConfigLoaded.as_str(),
            &[("path", &path.display().to_string())],
        );
        Ok(config)
    }

    /// Parse and validate configuration from JSON text
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let config: UnitOfWorkConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rollback_parallelism == 0 {
            return Err(ConfigError::Invalid(
                "rollback_parallelism must be greater than zero".to_string(),
            ));
        }
        self.log_severity()?;
        Ok(())
    }

    /// Minimum severity to log, `None` when logging is off
    pub fn log_severity(&self) -> Result<Option<Severity>, ConfigError> {
        if self.log_level.eq_ignore_ascii_case("off") {
            return Ok(None);
        }
        Severity::parse(&self.log_level)
            .map(Some)
            .ok_or_else(|| ConfigError::Invalid(format!("unknown log level '{}'", self.log_level)))
    }

    /// Apply `log_level` to the process-wide logger.
    ///
    /// The logger is global: the last call wins for every unit of work in
    /// the process. Building a `UnitOfWork` never changes it.
    pub fn init_logging(&self) -> Result<(), ConfigError> {
        Logger::set_min_severity(self.log_severity()?);
        Ok(())
    }

    pub fn with_rollback_parallelism(mut self, parallelism: usize) -> Self {
        self.rollback_parallelism = parallelism;
        self
    }

    pub fn with_clear_failed_session(mut self, clear: bool) -> Self {
        self.clear_failed_session = clear;
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = UnitOfWorkConfig::default();
        assert_eq!(config.rollback_parallelism, 4);
        assert!(config.clear_failed_session);
        assert_eq!(config.log_severity().unwrap(), Some(Severity::Info));
    }

    #[test]
    fn test_empty_object_uses_defaults() {
        let config = UnitOfWorkConfig::from_json_str("{}").unwrap();
        assert_eq!(config, UnitOfWorkConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let file = write_config(
            r#"{"rollback_parallelism": 2, "clear_failed_session": false, "log_level": "warn"}"#,
        );
        let config = UnitOfWorkConfig::load(file.path()).unwrap();

        assert_eq!(config.rollback_parallelism, 2);
        assert!(!config.clear_failed_session);
        assert_eq!(config.log_severity().unwrap(), Some(Severity::Warn));
    }

    #[test]
    fn test_zero_parallelism_rejected() {
        let err = UnitOfWorkConfig::from_json_str(r#"{"rollback_parallelism": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert_eq!(err.code(), "UOW_CONFIG_INVALID");
    }

    #[test]
    fn test_unknown_log_level_rejected() {
        let err = UnitOfWorkConfig::from_json_str(r#"{"log_level": "loud"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_log_level_off() {
        let config = UnitOfWorkConfig::default().with_log_level("OFF");
        assert_eq!(config.log_severity().unwrap(), None);
    }

    #[test]
    fn test_malformed_json() {
        let err = UnitOfWorkConfig::from_json_str("{not json").unwrap_err();
        assert_eq!(err.code(), "UOW_CONFIG_PARSE");
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = UnitOfWorkConfig::load(&dir.path().join("absent.json")).unwrap_err();
        assert_eq!(err.code(), "UOW_CONFIG_IO");
    }
}
