//! Configuration management for mediafetch
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use mediafetch::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("History stored at: {}", config.storage.history_path.display());
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `MEDIAFETCH__<section>__<key>`
//!
//! Examples:
//! - `MEDIAFETCH__SCHEDULER__POLL_INTERVAL_SECS=30`
//! - `MEDIAFETCH__ENGINE__BINARY=/usr/local/bin/yt-dlp`
//! - `MEDIAFETCH__DOWNLOADS__MAX_FILE_SIZE=2GB`
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/mediafetch.toml`.
//! This can be overridden using the `MEDIAFETCH_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use crate::humanize::ByteSize;
pub use models::{
    Config, EngineConfig, RetentionConfig, SchedulerConfig, SelectorConfig, StorageConfig,
};
pub use sources::config_path;
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// Configuration is loaded with the following priority (highest to lowest):
    /// 1. Environment variables (`MEDIAFETCH__*`)
    /// 2. TOML file (default: `config/mediafetch.toml`)
    /// 3. Default values
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_minimal_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(&config_path, "[scheduler]\npoll_interval_secs = 2\n").unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        assert_eq!(config.scheduler.poll_interval_secs, 2);
    }

    #[test]
    fn test_validation_runs_after_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[storage]
history_path = "data/shared"
schedule_path = "data/shared"
        "#;
        fs::write(&config_path, toml_content).unwrap();

        let result = Config::load_from_path(config_path);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::ValidationError(ValidationError::SharedStoragePath { .. })
        ));
    }

    #[test]
    fn test_inverted_size_bounds_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[downloads]
min_file_size = "2MB"
max_file_size = "1MB"
        "#;
        fs::write(&config_path, toml_content).unwrap();

        let result = Config::load_from_path(config_path);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::ValidationError(ValidationError::InvalidDownloads(_))
        ));
    }
}
