use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use super::cancel::CancelToken;
use super::filter::classify_filename;
use crate::humanize::deserialize_size;

/// Per-job download configuration.
///
/// A snapshot of these options is stored with every history job, so a job
/// always shows the options it actually ran with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadOptions {
    pub download_images: bool,
    pub download_videos: bool,
    pub download_documents: bool,
    pub download_compressed: bool,
    pub max_retries: u32,
    /// Seconds to wait between attempts
    pub retry_interval: f64,
    #[serde(deserialize_with = "deserialize_size")]
    pub chunk_size: u64,
    /// Seconds allowed for a single network operation
    pub timeout: u64,
    /// 0 disables the lower bound
    #[serde(deserialize_with = "deserialize_size")]
    pub min_file_size: u64,
    /// 0 disables the upper bound
    #[serde(deserialize_with = "deserialize_size")]
    pub max_file_size: u64,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            download_images: true,
            download_videos: true,
            download_documents: true,
            download_compressed: true,
            max_retries: 3,
            retry_interval: 2.0,
            chunk_size: 1024 * 1024,
            timeout: 30,
            min_file_size: 0,
            max_file_size: 0,
            date_from: None,
            date_to: None,
        }
    }
}

/// Longest accepted pause between download attempts
pub const MAX_RETRY_INTERVAL_SECS: f64 = 3600.0;

#[derive(Debug, Error, PartialEq)]
pub enum OptionsError {
    #[error("chunk_size must be positive")]
    ZeroChunkSize,

    #[error("timeout must be positive")]
    ZeroTimeout,

    #[error("retry_interval must be between 0 and 3600 seconds, got {0}")]
    InvalidRetryInterval(f64),

    #[error("min_file_size ({min}) exceeds max_file_size ({max})")]
    InvertedSizeRange { min: u64, max: u64 },

    #[error("date_from ({from}) is after date_to ({to})")]
    InvertedDateRange { from: NaiveDate, to: NaiveDate },
}

impl DownloadOptions {
    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.chunk_size == 0 {
            return Err(OptionsError::ZeroChunkSize);
        }
        if self.timeout == 0 {
            return Err(OptionsError::ZeroTimeout);
        }
        if !(0.0..=MAX_RETRY_INTERVAL_SECS).contains(&self.retry_interval) {
            return Err(OptionsError::InvalidRetryInterval(self.retry_interval));
        }
        if self.min_file_size > 0
            && self.max_file_size > 0
            && self.min_file_size > self.max_file_size
        {
            return Err(OptionsError::InvertedSizeRange {
                min: self.min_file_size,
                max: self.max_file_size,
            });
        }
        if let (Some(from), Some(to)) = (self.date_from, self.date_to) {
            if from > to {
                return Err(OptionsError::InvertedDateRange { from, to });
            }
        }
        Ok(())
    }

    /// Structured copy of the options for persisting alongside a job
    pub fn snapshot(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    /// Clamped to `0..=MAX_RETRY_INTERVAL_SECS`; NaN waits not at all
    pub fn retry_delay(&self) -> std::time::Duration {
        let secs = self.retry_interval.clamp(0.0, MAX_RETRY_INTERVAL_SECS);
        std::time::Duration::try_from_secs_f64(secs).unwrap_or_default()
    }

    pub fn network_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout)
    }
}

/// Coarse category derived from a file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Image,
    Video,
    Document,
    Compressed,
    Other,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Image => "image",
            FileType::Video => "video",
            FileType::Document => "document",
            FileType::Compressed => "compressed",
            FileType::Other => "other",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One discoverable file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub url: String,
    pub filename: String,
    pub file_type: FileType,
    pub size: Option<u64>,
    pub post_id: Option<String>,
    pub user_id: Option<String>,
    pub published_date: Option<NaiveDate>,
}

impl MediaItem {
    /// Build an item whose type is classified from the filename
    pub fn new(url: impl Into<String>, filename: impl Into<String>) -> Self {
        let filename = filename.into();
        Self {
            url: url.into(),
            file_type: classify_filename(&filename),
            filename,
            size: None,
            post_id: None,
            user_id: None,
            published_date: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_published_date(mut self, date: NaiveDate) -> Self {
        self.published_date = Some(date);
        self
    }
}

/// Outcome of one handler invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DownloadResult {
    pub success: bool,
    pub total_files: usize,
    pub completed_files: usize,
    pub failed_files: Vec<String>,
    pub skipped_files: Vec<String>,
    pub error_message: Option<String>,
    pub total_bytes: u64,
    pub elapsed_seconds: f64,
    /// The run stopped because cancellation was requested
    pub cancelled: bool,
}

impl DownloadResult {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
            ..Self::default()
        }
    }
}

pub type LogFn = Arc<dyn Fn(&str) + Send + Sync>;
pub type FileProgressFn = Arc<dyn Fn(u64, u64, &Map<String, Value>) + Send + Sync>;
pub type OverallProgressFn = Arc<dyn Fn(usize, usize) + Send + Sync>;
pub type WidgetsFn = Arc<dyn Fn(bool) + Send + Sync>;

/// Hooks a handler reports through. Every hook is optional.
#[derive(Clone, Default)]
pub struct Callbacks {
    pub log: Option<LogFn>,
    pub file_progress: Option<FileProgressFn>,
    pub overall_progress: Option<OverallProgressFn>,
    pub enable_widgets: Option<WidgetsFn>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_log(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.log = Some(Arc::new(f));
        self
    }

    pub fn on_file_progress(
        mut self,
        f: impl Fn(u64, u64, &Map<String, Value>) + Send + Sync + 'static,
    ) -> Self {
        self.file_progress = Some(Arc::new(f));
        self
    }

    pub fn on_overall_progress(mut self, f: impl Fn(usize, usize) + Send + Sync + 'static) -> Self {
        self.overall_progress = Some(Arc::new(f));
        self
    }

    pub fn on_enable_widgets(mut self, f: impl Fn(bool) + Send + Sync + 'static) -> Self {
        self.enable_widgets = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("log", &self.log.is_some())
            .field("file_progress", &self.file_progress.is_some())
            .field("overall_progress", &self.overall_progress.is_some())
            .field("enable_widgets", &self.enable_widgets.is_some())
            .finish()
    }
}

/// Everything a handler is constructed with
#[derive(Debug, Clone, Default)]
pub struct HandlerContext {
    pub download_folder: PathBuf,
    pub options: DownloadOptions,
    pub callbacks: Callbacks,
    pub cancel: CancelToken,
}

impl HandlerContext {
    pub fn new(download_folder: impl Into<PathBuf>, options: DownloadOptions) -> Self {
        Self {
            download_folder: download_folder.into(),
            options,
            callbacks: Callbacks::default(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_callbacks(mut self, callbacks: Callbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = DownloadOptions::default();
        assert!(options.download_images);
        assert!(options.download_videos);
        assert!(options.download_documents);
        assert!(options.download_compressed);
        assert_eq!(options.max_retries, 3);
        assert_eq!(options.retry_interval, 2.0);
        assert_eq!(options.chunk_size, 1_048_576);
        assert_eq!(options.timeout, 30);
        assert_eq!(options.min_file_size, 0);
        assert_eq!(options.max_file_size, 0);
        assert!(options.date_from.is_none());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inverted_sizes() {
        let options = DownloadOptions {
            min_file_size: 2000,
            max_file_size: 1000,
            ..Default::default()
        };
        assert_eq!(
            options.validate(),
            Err(OptionsError::InvertedSizeRange { min: 2000, max: 1000 })
        );
    }

    #[test]
    fn test_validate_rejects_inverted_dates() {
        let options = DownloadOptions {
            date_from: NaiveDate::from_ymd_opt(2024, 5, 2),
            date_to: NaiveDate::from_ymd_opt(2024, 5, 1),
            ..Default::default()
        };
        assert!(matches!(
            options.validate(),
            Err(OptionsError::InvertedDateRange { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_negative_interval() {
        let options = DownloadOptions {
            retry_interval: -1.0,
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_huge_retry_interval() {
        let options = DownloadOptions {
            retry_interval: 1e30,
            ..Default::default()
        };
        assert_eq!(options.validate(), Err(OptionsError::InvalidRetryInterval(1e30)));

        let nan = DownloadOptions {
            retry_interval: f64::NAN,
            ..Default::default()
        };
        assert!(nan.validate().is_err());
    }

    #[test]
    fn test_retry_delay_is_bounded() {
        let mut options = DownloadOptions {
            retry_interval: 1e30,
            ..Default::default()
        };
        assert_eq!(options.retry_delay(), std::time::Duration::from_secs(3600));

        options.retry_interval = f64::NAN;
        assert_eq!(options.retry_delay(), std::time::Duration::ZERO);

        options.retry_interval = 0.5;
        assert_eq!(options.retry_delay(), std::time::Duration::from_millis(500));
    }

    #[test]
    fn test_snapshot_contains_every_field() {
        let snapshot = DownloadOptions::default().snapshot();
        assert_eq!(snapshot.get("max_retries"), Some(&Value::from(3)));
        assert_eq!(snapshot.get("chunk_size"), Some(&Value::from(1_048_576)));
        assert_eq!(snapshot.get("date_from"), Some(&Value::Null));
        assert_eq!(snapshot.len(), 12);
    }

    #[test]
    fn test_options_accept_human_sizes() {
        let json = r#"{"min_file_size": "1KB", "max_file_size": 4096, "date_from": "2024-01-31"}"#;
        let options: DownloadOptions = serde_json::from_str(json).unwrap();
        assert_eq!(options.min_file_size, 1024);
        assert_eq!(options.max_file_size, 4096);
        assert_eq!(options.date_from, NaiveDate::from_ymd_opt(2024, 1, 31));
        // unspecified fields keep their defaults
        assert_eq!(options.max_retries, 3);
    }

    #[test]
    fn test_media_item_classifies_filename() {
        let item = MediaItem::new("https://cdn.example.com/a.MP4", "a.MP4");
        assert_eq!(item.file_type, FileType::Video);
        assert_eq!(FileType::Compressed.to_string(), "compressed");
    }
}
