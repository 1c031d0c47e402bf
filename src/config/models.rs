use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::handlers::DownloadOptions;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub selector: SelectorConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    /// Defaults for every download; sizes accept values such as `"1MB"`
    #[serde(default)]
    pub downloads: DownloadOptions,
    #[serde(default)]
    pub retention: RetentionConfig,
}

/// Where the two Fjall keyspaces live
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_history_path")]
    pub history_path: PathBuf,
    #[serde(default = "default_schedule_path")]
    pub schedule_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            history_path: default_history_path(),
            schedule_path: default_schedule_path(),
        }
    }
}

fn default_history_path() -> PathBuf {
    PathBuf::from("data/history")
}

fn default_schedule_path() -> PathBuf {
    PathBuf::from("data/schedules")
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    /// Seconds between due-time scans
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Folder for scheduled jobs that do not name their own
    #[serde(default = "default_output_folder")]
    pub output_folder: PathBuf,
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            output_folder: default_output_folder(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_output_folder() -> PathBuf {
    PathBuf::from("downloads")
}

/// Which fallback tiers the selector may use
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SelectorConfig {
    #[serde(default = "default_true")]
    pub use_universal_fallback: bool,
    #[serde(default = "default_true")]
    pub use_generic_fallback: bool,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            use_universal_fallback: true,
            use_generic_fallback: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// External engine behind the universal fallback
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Binary name looked up on PATH, or a path to it
    #[serde(default = "default_engine_binary")]
    pub binary: String,
    /// Appended before the URL on every invocation
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary: default_engine_binary(),
            extra_args: Vec::new(),
        }
    }
}

fn default_engine_binary() -> String {
    "yt-dlp".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetentionConfig {
    /// Completed jobs kept by `history prune` when no count is given
    #[serde(default = "default_keep_completed")]
    pub keep_completed: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            keep_completed: default_keep_completed(),
        }
    }
}

fn default_keep_completed() -> usize {
    100
}
