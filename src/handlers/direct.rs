use async_trait::async_trait;
use std::time::Instant;
use tracing::warn;

use super::filter::sanitize_filename;
use super::http::{FetchOutcome, HttpClient};
use super::traits::{HandlerCore, NativeHandler, SiteHandler};
use super::types::{DownloadResult, HandlerContext, MediaItem};

const FALLBACK_FILENAME: &str = "download";

/// Generic last-resort handler: treats the URL itself as a file link.
///
/// Accepts every URL. The file is streamed into the download folder under a
/// name derived from the last path segment of the URL.
pub struct DirectHandler {
    core: HandlerCore,
}

impl DirectHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        Self {
            core: HandlerCore::new(ctx),
        }
    }
}

impl NativeHandler for DirectHandler {
    fn build(ctx: HandlerContext) -> Self {
        Self::new(ctx)
    }
}

#[async_trait]
impl SiteHandler for DirectHandler {
    fn supports_url(&self, _url: &str) -> bool {
        true
    }

    fn site_name(&self) -> &str {
        "Direct link"
    }

    async fn download(&self, url: &str) -> DownloadResult {
        let started = Instant::now();
        let core = &self.core;

        let item = MediaItem::new(url, filename_from_url(url));
        core.add_total(1);
        core.report_global_progress();

        if !core.should_download(&item) {
            core.log(&format!("Skipping {} (filtered by {})", item.filename, item.file_type));
            core.record_skipped(item.filename.clone());
            return core.finish(started, None);
        }

        if let Err(e) = tokio::fs::create_dir_all(core.download_folder()).await {
            let message = format!(
                "cannot create download folder {}: {e}",
                core.download_folder().display()
            );
            core.log(&message);
            core.record_failed(item.filename.clone());
            return core.finish(started, Some(message));
        }

        core.enable_widgets(false);
        let client = match HttpClient::new(core) {
            Ok(client) => client,
            Err(e) => {
                core.enable_widgets(true);
                core.record_failed(item.filename.clone());
                return core.finish(started, Some(e.to_string()));
            }
        };

        let target = core.download_folder().join(&item.filename);
        core.log(&format!("Downloading {url} -> {}", target.display()));

        match client.fetch_to_file(&item, &target, core).await {
            Ok(FetchOutcome::Completed { bytes }) => {
                core.record_completed(bytes);
                core.log(&format!("Saved {} ({bytes} bytes)", item.filename));
            }
            Ok(FetchOutcome::Filtered) => {
                core.record_skipped(item.filename.clone());
                core.log(&format!("Skipping {} (size outside limits)", item.filename));
            }
            Ok(FetchOutcome::Cancelled) => {
                core.log("Download cancelled.");
            }
            Err(e) => {
                warn!(url, error = %e, "Direct download failed");
                core.record_failed(item.filename.clone());
                core.log(&format!("Failed to download {}: {e}", item.filename));
            }
        }

        core.report_global_progress();
        core.enable_widgets(true);
        core.finish(started, None)
    }

    fn core(&self) -> &HandlerCore {
        &self.core
    }
}

/// Derive a safe filename from the last non-empty path segment
pub fn filename_from_url(url: &str) -> String {
    let name = reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.rfind(|s| !s.is_empty()).map(str::to_string))
        })
        .unwrap_or_default();

    if name.is_empty() {
        FALLBACK_FILENAME.to_string()
    } else {
        sanitize_filename(&name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::types::DownloadOptions;
    use tempfile::TempDir;

    #[test]
    fn test_filename_from_url() {
        assert_eq!(filename_from_url("https://cdn.example.com/a/b/photo.jpg"), "photo.jpg");
        assert_eq!(filename_from_url("https://cdn.example.com/a/b/"), "b");
        assert_eq!(filename_from_url("https://cdn.example.com"), "download");
        assert_eq!(filename_from_url("not a url"), "download");
    }

    #[test]
    fn test_accepts_any_url() {
        let handler = DirectHandler::new(HandlerContext::default());
        assert!(handler.supports_url("https://anything.example/x"));
        assert!(handler.supports_url("ftp://weird"));
    }

    #[tokio::test]
    async fn test_filtered_type_is_skipped_without_network() {
        let dir = TempDir::new().unwrap();
        let options = DownloadOptions {
            download_images: false,
            ..Default::default()
        };
        let handler = DirectHandler::new(HandlerContext::new(dir.path(), options));

        let result = handler.download("http://127.0.0.1:9/photo.png").await;
        assert!(result.success);
        assert_eq!(result.total_files, 1);
        assert_eq!(result.skipped_files, vec!["photo.png".to_string()]);
        assert_eq!(result.completed_files, 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_reports_cancelled() {
        let dir = TempDir::new().unwrap();
        let handler = DirectHandler::new(HandlerContext::new(dir.path(), DownloadOptions::default()));
        handler.request_cancel();

        let result = handler.download("http://127.0.0.1:9/video.mp4").await;
        assert!(result.cancelled);
        assert!(!result.success);
        assert!(result.failed_files.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_host_fails_after_retries() {
        let dir = TempDir::new().unwrap();
        let options = DownloadOptions {
            max_retries: 1,
            retry_interval: 0.0,
            timeout: 2,
            ..Default::default()
        };
        let handler = DirectHandler::new(HandlerContext::new(dir.path(), options));

        // Port 9 (discard) is closed on test hosts; the connection is refused.
        let result = handler.download("http://127.0.0.1:9/file.zip").await;
        assert!(!result.success);
        assert!(!result.cancelled);
        assert_eq!(result.failed_files, vec!["file.zip".to_string()]);
    }
}
