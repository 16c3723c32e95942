//! Layered configuration loading and validation.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Unknown log level
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    /// Unknown log format
    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    /// Unknown rotation policy
    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    /// Empty database path
    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    /// Zero pool connections
    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    /// Non-positive rate limit
    #[error("Invalid rate limit: {0}. Must be positive")]
    InvalidRateLimit(String),

    /// Zero worker concurrency
    #[error("Invalid max_concurrent: {0}. Must be at least 1")]
    InvalidMaxConcurrent(usize),

    /// Zero retry attempts
    #[error("Invalid max_attempts: {0}. Must be at least 1")]
    InvalidMaxAttempts(u32),

    /// Initial backoff not below the maximum
    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must be less than max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    /// Heartbeat, staleness and stuck thresholds out of order
    #[error(
        "Invalid liveness thresholds: heartbeat interval ({heartbeat_ms}ms) < stale worker ({stale_secs}s) < stuck run ({stuck_secs}s) is required"
    )]
    InvalidLiveness {
        /// Worker heartbeat interval
        heartbeat_ms: u64,
        /// Age after which a worker counts as dead
        stale_secs: u64,
        /// Age after which a running run counts as stuck
        stuck_secs: u64,
    },

    /// Any other validation failure
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Project-local configuration directory
pub const CONFIG_DIR: &str = ".pipewright";

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .pipewright/config.yaml (project config, created by init)
    /// 3. .pipewright/local.yaml (local overrides, optional)
    /// 4. Environment variables (PIPEWRIGHT_* prefix, `__` nests)
    pub fn load() -> Result<Config> {
        let config: Config = Self::figment()
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file. Environment overrides still
    /// apply on top.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed("PIPEWRIGHT_").split("__"))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(format!("{CONFIG_DIR}/config.yaml")))
            .merge(Yaml::file(format!("{CONFIG_DIR}/local.yaml")))
            .merge(Env::prefixed("PIPEWRIGHT_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }
        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        if config.rate_limit.requests_per_minute == 0 {
            return Err(ConfigError::InvalidRateLimit(
                "requests_per_minute = 0".to_string(),
            ));
        }
        if config.rate_limit.tokens_per_minute == 0 {
            return Err(ConfigError::InvalidRateLimit(
                "tokens_per_minute = 0".to_string(),
            ));
        }
        if config.rate_limit.window_secs == 0 {
            return Err(ConfigError::InvalidRateLimit("window_secs = 0".to_string()));
        }

        if config.worker.max_concurrent == 0 {
            return Err(ConfigError::InvalidMaxConcurrent(config.worker.max_concurrent));
        }
        if config.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts(config.retry.max_attempts));
        }
        if config.retry.initial_backoff_ms >= config.retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                config.retry.initial_backoff_ms,
                config.retry.max_backoff_ms,
            ));
        }

        // heartbeats must land well inside the staleness window, and a
        // worker must be declared dead before its runs are rescued
        let worker = &config.worker;
        if worker.heartbeat_interval_ms >= worker.stale_worker_secs.saturating_mul(1000)
            || worker.stale_worker_secs >= worker.stuck_run_secs
        {
            return Err(ConfigError::InvalidLiveness {
                heartbeat_ms: worker.heartbeat_interval_ms,
                stale_secs: worker.stale_worker_secs,
                stuck_secs: worker.stuck_run_secs,
            });
        }

        if config.provider.default.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "provider.default cannot be empty".to_string(),
            ));
        }
        if config.source_control.enabled && config.source_control.repo_path.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "source_control.repo_path cannot be empty when write-back is enabled".to_string(),
            ));
        }
        if config.jury.jury_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "jury.jury_size must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&config.jury.skeptic_minimum) {
            return Err(ConfigError::ValidationFailed(format!(
                "jury.skeptic_minimum must be between 0 and 1, got {}",
                config.jury.skeptic_minimum
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::VerificationStrictness;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.database.path, ".pipewright/pipewright.db");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.worker.heartbeat_interval_ms, 15_000);
        assert_eq!(config.worker.stale_worker_secs, 60);
        assert_eq!(config.worker.stuck_run_secs, 300);
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
database:
  path: /custom/path.db
  max_connections: 5
logging:
  level: debug
  format: pretty
worker:
  max_concurrent: 4
  apply_auto_advance: false
verification:
  default_strictness: lenient
";

        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert_eq!(config.database.path, "/custom/path.db");
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "pretty");
        assert_eq!(config.worker.max_concurrent, 4);
        assert!(!config.worker.apply_auto_advance);
        assert_eq!(
            config.verification.default_strictness,
            VerificationStrictness::Lenient
        );
        // untouched sections keep defaults
        assert_eq!(config.worker.stuck_run_secs, 300);

        ConfigLoader::validate(&config).expect("Parsed config should be valid");
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "invalid".to_string();

        match ConfigLoader::validate(&config).unwrap_err() {
            ConfigError::InvalidLogLevel(level) => assert_eq!(level, "invalid"),
            other => panic!("Expected InvalidLogLevel error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_invalid_log_format() {
        let mut config = Config::default();
        config.logging.format = "xml".to_string();

        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidLogFormat(_)
        ));
    }

    #[test]
    fn test_validate_empty_database_path() {
        let mut config = Config::default();
        config.database.path = String::new();

        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::EmptyDatabasePath
        ));
    }

    #[test]
    fn test_validate_zero_limits() {
        let mut config = Config::default();
        config.rate_limit.requests_per_minute = 0;
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidRateLimit(_)
        ));

        let mut config = Config::default();
        config.worker.max_concurrent = 0;
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidMaxConcurrent(0)
        ));

        let mut config = Config::default();
        config.retry.max_attempts = 0;
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidMaxAttempts(0)
        ));
    }

    #[test]
    fn test_validate_invalid_backoff() {
        let mut config = Config::default();
        config.retry.initial_backoff_ms = 30000;
        config.retry.max_backoff_ms = 10000;

        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidBackoff(30000, 10000)
        ));
    }

    #[test]
    fn test_validate_liveness_ordering() {
        let mut config = Config::default();
        config.worker.heartbeat_interval_ms = 90_000;
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidLiveness { .. }
        ));

        let mut config = Config::default();
        config.worker.stuck_run_secs = 30;
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidLiveness { .. }
        ));
    }

    #[test]
    fn test_validate_jury_panel() {
        let mut config = Config::default();
        config.jury.jury_size = 0;
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::ValidationFailed(_)
        ));

        let mut config = Config::default();
        config.jury.skeptic_minimum = 1.5;
        let err = ConfigLoader::validate(&config).unwrap_err();
        assert!(err.to_string().contains("skeptic_minimum"));
    }

    #[test]
    fn test_env_override() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "logging:\n  level: info\nworker:\n  max_concurrent: 3").unwrap();
        file.flush().unwrap();

        temp_env::with_vars(
            [
                ("PIPEWRIGHT_LOGGING__LEVEL", Some("debug")),
                ("PIPEWRIGHT_WORKER__MAX_CONCURRENT", Some("6")),
            ],
            || {
                let config = ConfigLoader::load_from_file(file.path()).unwrap();
                assert_eq!(config.logging.level, "debug");
                assert_eq!(config.worker.max_concurrent, 6);
            },
        );
    }

    #[test]
    fn test_load_from_missing_file() {
        let err = ConfigLoader::load_from_file("/definitely/not/here.yaml").unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_hierarchical_merging() {
        let mut base_file = NamedTempFile::new().unwrap();
        writeln!(
            base_file,
            "worker:\n  max_concurrent: 5\nlogging:\n  level: info\n  format: json"
        )
        .unwrap();
        base_file.flush().unwrap();

        let mut override_file = NamedTempFile::new().unwrap();
        writeln!(override_file, "worker:\n  max_concurrent: 8\nlogging:\n  level: debug").unwrap();
        override_file.flush().unwrap();

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(base_file.path()))
            .merge(Yaml::file(override_file.path()))
            .extract()
            .unwrap();

        assert_eq!(config.worker.max_concurrent, 8, "Override should win");
        assert_eq!(
            config.logging.level, "debug",
            "Override should win for nested fields"
        );
        assert_eq!(
            config.logging.format, "json",
            "Base value should persist when not overridden"
        );
    }
}
