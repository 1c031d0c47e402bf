use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "MEDIAFETCH_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/mediafetch.toml";
const ENV_PREFIX: &str = "MEDIAFETCH";
const ENV_SEPARATOR: &str = "__";

/// Path of the TOML file: `MEDIAFETCH_CONFIG` or the default location
pub fn config_path() -> PathBuf {
    env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load() -> Result<Config, ConfigError> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();
    load_from_sources(config_path())
}

/// Load configuration from a specific path and environment
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::debug!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // MEDIAFETCH__SCHEDULER__POLL_INTERVAL_SECS -> scheduler.poll_interval_secs
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_defaults_only() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.toml");

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.scheduler.poll_interval_secs, 5);
        assert_eq!(config.engine.binary, "yt-dlp");
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[storage]
history_path = "/var/lib/mediafetch/history"

[scheduler]
poll_interval_secs = 30
output_folder = "/srv/media"

[selector]
use_universal_fallback = false

[engine]
binary = "/opt/bin/yt-dlp"
extra_args = ["--no-playlist"]

[downloads]
download_videos = false
max_retries = 5
retry_interval = 0.5
chunk_size = "256KB"
min_file_size = "1MB"
date_from = "2024-01-01"

[retention]
keep_completed = 10
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.storage.history_path, PathBuf::from("/var/lib/mediafetch/history"));
        assert_eq!(config.storage.schedule_path, PathBuf::from("data/schedules"));
        assert_eq!(config.scheduler.poll_interval_secs, 30);
        assert!(!config.selector.use_universal_fallback);
        assert!(config.selector.use_generic_fallback);
        assert_eq!(config.engine.extra_args, vec!["--no-playlist"]);
        assert!(!config.downloads.download_videos);
        assert_eq!(config.downloads.max_retries, 5);
        assert_eq!(config.downloads.retry_interval, 0.5);
        assert_eq!(config.downloads.chunk_size, 256 * 1024);
        assert_eq!(config.downloads.min_file_size, 1024 * 1024);
        assert_eq!(config.downloads.timeout, 30);
        assert!(config.downloads.date_from.is_some());
        assert_eq!(config.retention.keep_completed, 10);
    }

    // Environment overrides need process-wide set_var, which is unsafe in
    // edition 2024, so they are only exercised through the binary.
}
