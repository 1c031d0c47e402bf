//! Configuration file tests

use std::path::PathBuf;

use mediafetch::config::{Config, ConfigError, ValidationError};

fn parse(config_toml: &str) -> Config {
    toml::from_str(config_toml).expect("Failed to parse test config")
}

#[test]
fn test_shipped_config_loads() {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config/mediafetch.toml");
    let config = Config::load_from_path(path).unwrap();

    assert_eq!(config.storage.history_path, PathBuf::from("data/history"));
    assert_eq!(config.storage.schedule_path, PathBuf::from("data/schedules"));
    assert_eq!(config.downloads.chunk_size, 1024 * 1024);
    assert_eq!(config.engine.binary, "yt-dlp");
}

#[test]
fn test_partial_document_keeps_defaults() {
    let config = parse(
        r#"
        [scheduler]
        poll_interval_secs = 60

        [downloads]
        download_videos = false
        max_file_size = "1.5GB"
        date_from = "2024-01-01"
        "#,
    );

    assert_eq!(config.scheduler.poll_interval_secs, 60);
    assert_eq!(config.scheduler.output_folder, PathBuf::from("downloads"));
    assert!(!config.downloads.download_videos);
    assert!(config.downloads.download_images);
    assert_eq!(config.downloads.max_file_size, 1536 * 1024 * 1024);
    assert_eq!(
        config.downloads.date_from.map(|d| d.to_string()),
        Some("2024-01-01".to_string())
    );
    assert!(config.selector.use_universal_fallback);
}

#[test]
fn test_shared_storage_path_is_rejected() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("mediafetch.toml");
    std::fs::write(
        &path,
        r#"
        [storage]
        history_path = "data/store"
        schedule_path = "data/store"
        "#,
    )
    .unwrap();

    let err = Config::load_from_path(path).unwrap_err();
    assert!(matches!(
        err,
        ConfigError::ValidationError(ValidationError::SharedStoragePath { .. })
    ));
}
