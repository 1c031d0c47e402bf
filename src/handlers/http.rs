//! HTTP transfer with retries, per-read timeouts and cooperative cancellation

use reqwest::{Client, Response};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

use super::traits::{HandlerCore, HandlerError};
use super::types::MediaItem;

pub type Result<T> = std::result::Result<T, HandlerError>;

const USER_AGENT: &str = concat!("mediafetch/", env!("CARGO_PKG_VERSION"));

/// How a single file transfer ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Completed { bytes: u64 },
    /// The server-reported size failed the size filters
    Filtered,
    Cancelled,
}

/// HTTP downloader bound to one handler's options
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(core: &HandlerCore) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(core.options().network_timeout())
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| HandlerError::Request(e.to_string()))?;

        Ok(Self { client })
    }

    /// Download `item` into `target`, retrying transient failures.
    ///
    /// Makes `max_retries + 1` attempts, sleeping `retry_interval` between
    /// them. The cancel flag is checked before every attempt and interrupts
    /// both the backoff sleep and in-flight reads.
    pub async fn fetch_to_file(
        &self,
        item: &MediaItem,
        target: &Path,
        core: &HandlerCore,
    ) -> Result<FetchOutcome> {
        let attempts = core.options().max_retries + 1;
        let mut attempt = 0;

        loop {
            attempt += 1;
            if core.is_cancelled() {
                return Ok(FetchOutcome::Cancelled);
            }

            match self.fetch_once(item, target, core).await {
                Ok(outcome) => {
                    if attempt > 1 {
                        debug!(url = %item.url, attempt, "Download succeeded after retry");
                    }
                    return Ok(outcome);
                }
                Err(e) if e.is_permanent() => {
                    warn!(url = %item.url, attempt, error = %e, "Download failed permanently");
                    return Err(e);
                }
                Err(e) if attempt >= attempts => {
                    warn!(url = %item.url, attempt, error = %e, "Download failed after retries");
                    return Err(e);
                }
                Err(e) => {
                    warn!(url = %item.url, attempt, error = %e, "Download failed, retrying");
                    core.log(&format!(
                        "Attempt {attempt}/{attempts} for {} failed: {e}",
                        item.filename
                    ));

                    tokio::select! {
                        _ = tokio::time::sleep(core.options().retry_delay()) => {}
                        _ = core.cancel_token().cancelled() => return Ok(FetchOutcome::Cancelled),
                    }
                }
            }
        }
    }

    async fn fetch_once(
        &self,
        item: &MediaItem,
        target: &Path,
        core: &HandlerCore,
    ) -> Result<FetchOutcome> {
        let timeout = core.options().network_timeout();
        let cancel = core.cancel_token();

        let mut response = tokio::select! {
            sent = tokio::time::timeout(timeout, self.client.get(&item.url).send()) => {
                sent.map_err(|_| HandlerError::Timeout)?.map_err(map_reqwest_error)?
            }
            _ = cancel.cancelled() => return Ok(FetchOutcome::Cancelled),
        };
        check_status(&response)?;

        let total = response.content_length();
        if let Some(size) = total {
            let sized = item.clone().with_size(size);
            if !core.should_download(&sized) {
                return Ok(FetchOutcome::Filtered);
            }
        }

        let partial = partial_path(target);
        let written = match write_body(&mut response, item, &partial, total, core).await {
            Ok(Some(downloaded)) => tokio::fs::rename(&partial, target)
                .await
                .map(|()| downloaded)
                .map_err(HandlerError::from),
            Ok(None) => {
                discard(&partial).await;
                return Ok(FetchOutcome::Cancelled);
            }
            Err(e) => Err(e),
        };
        let downloaded = match written {
            Ok(downloaded) => downloaded,
            Err(e) => {
                discard(&partial).await;
                return Err(e);
            }
        };

        debug!(url = %item.url, size = downloaded, "Download completed");
        Ok(FetchOutcome::Completed { bytes: downloaded })
    }
}

/// Stream the body into `partial`. `None` means the cancel flag was raised.
async fn write_body(
    response: &mut Response,
    item: &MediaItem,
    partial: &Path,
    total: Option<u64>,
    core: &HandlerCore,
) -> Result<Option<u64>> {
    let timeout = core.options().network_timeout();
    let cancel = core.cancel_token();
    let chunk_size = core.options().chunk_size.max(1);
    let file = File::create(partial).await?;
    let mut writer = BufWriter::with_capacity(chunk_size as usize, file);

    let mut metadata = Map::new();
    metadata.insert("filename".to_string(), Value::from(item.filename.clone()));
    metadata.insert("url".to_string(), Value::from(item.url.clone()));

    let mut downloaded: u64 = 0;
    let mut since_report: u64 = 0;

    loop {
        let chunk = tokio::select! {
            read = tokio::time::timeout(timeout, response.chunk()) => {
                read.map_err(|_| HandlerError::Timeout)?.map_err(map_reqwest_error)?
            }
            _ = cancel.cancelled() => None,
        };

        if cancel.is_cancelled() {
            return Ok(None);
        }

        let Some(bytes) = chunk else { break };
        writer.write_all(&bytes).await?;
        downloaded += bytes.len() as u64;
        since_report += bytes.len() as u64;

        if since_report >= chunk_size {
            since_report = 0;
            core.report_progress(downloaded, total.unwrap_or(0), &metadata);
        }
    }

    writer.flush().await?;
    core.report_progress(downloaded, total.unwrap_or(downloaded), &metadata);
    Ok(Some(downloaded))
}

fn check_status(response: &Response) -> Result<()> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(HandlerError::Status(status.as_u16()))
    }
}

fn map_reqwest_error(e: reqwest::Error) -> HandlerError {
    if e.is_timeout() {
        HandlerError::Timeout
    } else {
        HandlerError::Request(e.to_string())
    }
}

/// Data is written next to the target and renamed into place when complete
fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    target.with_file_name(name)
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        debug!(path = %path.display(), error = %e, "Could not remove partial file");
    }
}
