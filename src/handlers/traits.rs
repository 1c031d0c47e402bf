use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use thiserror::Error;
use tracing::info;

use super::cancel::CancelToken;
use super::filter;
use super::types::{Callbacks, DownloadOptions, DownloadResult, HandlerContext, MediaItem};

/// Failures inside a handler. Transient ones are retried locally; all of
/// them surface as failed files, never as a failed invocation.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("network operation timed out")]
    Timeout,
    #[error("HTTP {0}")]
    Status(u16),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("engine error: {0}")]
    Engine(String),
}

impl HandlerError {
    /// Client errors other than 408 and 429 will not change on retry
    pub fn is_permanent(&self) -> bool {
        matches!(self, HandlerError::Status(code) if (400..500).contains(code) && *code != 408 && *code != 429)
    }
}

/// Capability every site handler provides.
///
/// Handlers are built fresh for each invocation and thrown away afterwards.
/// `download` must never panic or error out: cancellation and failures are
/// reported through the returned [`DownloadResult`].
#[async_trait]
pub trait SiteHandler: Send + Sync {
    /// Whether this handler can serve the URL
    fn supports_url(&self, url: &str) -> bool;

    /// Human-readable site name
    fn site_name(&self) -> &str;

    /// Download everything behind the URL
    async fn download(&self, url: &str) -> DownloadResult;

    /// Shared state (folder, options, callbacks, counters, cancel flag)
    fn core(&self) -> &HandlerCore;

    fn request_cancel(&self) {
        self.core().request_cancel();
    }

    fn is_cancelled(&self) -> bool {
        self.core().is_cancelled()
    }

    fn reset(&self) {
        self.core().reset();
    }

    fn should_download(&self, item: &MediaItem) -> bool {
        self.core().should_download(item)
    }
}

/// A handler the registry can construct from a context alone
pub trait NativeHandler: SiteHandler + 'static {
    fn build(ctx: HandlerContext) -> Self
    where
        Self: Sized;
}

#[derive(Debug, Clone, Default)]
struct Counters {
    total_files: usize,
    completed_files: usize,
    failed_files: Vec<String>,
    skipped_files: Vec<String>,
    total_bytes: u64,
}

/// State every handler carries: where to write, how to filter, whom to
/// report to, and per-run counters.
#[derive(Debug)]
pub struct HandlerCore {
    ctx: HandlerContext,
    counters: Mutex<Counters>,
}

impl HandlerCore {
    pub fn new(ctx: HandlerContext) -> Self {
        Self {
            ctx,
            counters: Mutex::new(Counters::default()),
        }
    }

    pub fn download_folder(&self) -> &Path {
        &self.ctx.download_folder
    }

    pub fn options(&self) -> &DownloadOptions {
        &self.ctx.options
    }

    pub fn callbacks(&self) -> &Callbacks {
        &self.ctx.callbacks
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.ctx.cancel
    }

    pub fn request_cancel(&self) {
        self.ctx.cancel.cancel();
        self.log("Download cancellation requested.");
    }

    pub fn is_cancelled(&self) -> bool {
        self.ctx.cancel.is_cancelled()
    }

    /// Clear counters and the cancel flag for another run
    pub fn reset(&self) {
        self.ctx.cancel.reset();
        *self.counters() = Counters::default();
    }

    pub fn should_download(&self, item: &MediaItem) -> bool {
        filter::should_download(&self.ctx.options, item)
    }

    pub fn log(&self, message: &str) {
        info!(folder = %self.ctx.download_folder.display(), "{}", message);
        if let Some(log) = &self.ctx.callbacks.log {
            log(message);
        }
    }

    pub fn report_progress(&self, downloaded: u64, total: u64, metadata: &Map<String, Value>) {
        if let Some(progress) = &self.ctx.callbacks.file_progress {
            progress(downloaded, total, metadata);
        }
    }

    pub fn report_global_progress(&self) {
        let (completed, total) = {
            let counters = self.counters();
            (counters.completed_files, counters.total_files)
        };
        if let Some(progress) = &self.ctx.callbacks.overall_progress {
            progress(completed, total);
        }
    }

    pub fn enable_widgets(&self, enabled: bool) {
        if let Some(toggle) = &self.ctx.callbacks.enable_widgets {
            toggle(enabled);
        }
    }

    pub fn add_total(&self, files: usize) {
        self.counters().total_files += files;
    }

    pub fn record_completed(&self, bytes: u64) {
        let mut counters = self.counters();
        counters.completed_files += 1;
        counters.total_bytes += bytes;
    }

    pub fn record_failed(&self, filename: impl Into<String>) {
        self.counters().failed_files.push(filename.into());
    }

    pub fn record_skipped(&self, filename: impl Into<String>) {
        self.counters().skipped_files.push(filename.into());
    }

    /// Build the final result from the counters gathered so far
    pub fn finish(&self, started: Instant, error_message: Option<String>) -> DownloadResult {
        let counters = self.counters().clone();
        let cancelled = self.is_cancelled();
        let success = !cancelled && error_message.is_none() && counters.failed_files.is_empty();

        DownloadResult {
            success,
            total_files: counters.total_files,
            completed_files: counters.completed_files,
            failed_files: counters.failed_files,
            skipped_files: counters.skipped_files,
            error_message: error_message
                .or_else(|| cancelled.then(|| "download cancelled".to_string())),
            total_bytes: counters.total_bytes,
            elapsed_seconds: started.elapsed().as_secs_f64(),
            cancelled,
        }
    }

    fn counters(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
