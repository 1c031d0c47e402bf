//! Universal fallback driven by an external yt-dlp compatible engine

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use super::traits::{HandlerCore, SiteHandler};
use super::types::{DownloadOptions, DownloadResult, HandlerContext};
use crate::config::EngineConfig;

static PROGRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[download\]\s+(\d+(?:\.\d+)?)%").unwrap());
static DESTINATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[download\] Destination: (.+)$").unwrap());
static ALREADY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[download\] (.+) has already been downloaded").unwrap());
static MERGER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\[Merger\] Merging formats into "(.+)"$"#).unwrap());

const OUTPUT_TEMPLATE: &str = "%(title)s [%(id)s].%(ext)s";

/// One interesting line of engine output
#[derive(Debug, Clone, PartialEq)]
pub enum EngineLine {
    Destination(String),
    Progress(f64),
    AlreadyDownloaded(String),
    Merged(String),
    Other,
}

pub fn parse_engine_line(line: &str) -> EngineLine {
    let line = line.trim_end();
    if let Some(caps) = DESTINATION_RE.captures(line) {
        return EngineLine::Destination(file_name_of(&caps[1]));
    }
    if let Some(caps) = ALREADY_RE.captures(line) {
        return EngineLine::AlreadyDownloaded(file_name_of(&caps[1]));
    }
    if let Some(caps) = MERGER_RE.captures(line) {
        return EngineLine::Merged(file_name_of(&caps[1]));
    }
    if let Some(caps) = PROGRESS_RE.captures(line) {
        if let Ok(percent) = caps[1].parse::<f64>() {
            return EngineLine::Progress(percent);
        }
    }
    EngineLine::Other
}

fn file_name_of(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

/// Whether the configured engine binary can be found
pub fn engine_available(binary: &str) -> bool {
    resolve_binary(binary).is_some()
}

fn resolve_binary(binary: &str) -> Option<PathBuf> {
    let path = Path::new(binary);
    if path.components().count() > 1 {
        return path.is_file().then(|| path.to_path_buf());
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths).find_map(|dir| {
        let candidate = dir.join(binary);
        if candidate.is_file() {
            return Some(candidate);
        }
        let exe = dir.join(format!("{binary}.exe"));
        exe.is_file().then_some(exe)
    })
}

/// Command-line arguments mapping download options onto the engine
pub fn engine_args(options: &DownloadOptions, folder: &Path, extra: &[String], url: &str) -> Vec<String> {
    let mut args = vec![
        "--newline".to_string(),
        "--retries".to_string(),
        options.max_retries.to_string(),
        "--socket-timeout".to_string(),
        options.timeout.to_string(),
        "-o".to_string(),
        folder.join(OUTPUT_TEMPLATE).to_string_lossy().into_owned(),
    ];

    if options.min_file_size > 0 {
        args.push("--min-filesize".to_string());
        args.push(options.min_file_size.to_string());
    }
    if options.max_file_size > 0 {
        args.push("--max-filesize".to_string());
        args.push(options.max_file_size.to_string());
    }
    if let Some(from) = options.date_from {
        args.push("--dateafter".to_string());
        args.push(from.format("%Y%m%d").to_string());
    }
    if let Some(to) = options.date_to {
        args.push("--datebefore".to_string());
        args.push(to.format("%Y%m%d").to_string());
    }

    args.extend(extra.iter().cloned());
    args.push(url.to_string());
    args
}

/// Handler that delegates whole URLs to an external engine process
pub struct EngineHandler {
    core: HandlerCore,
    binary: String,
    extra_args: Vec<String>,
    name: String,
}

impl EngineHandler {
    pub fn new(ctx: HandlerContext, engine: &EngineConfig) -> Self {
        let stem = Path::new(&engine.binary)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| engine.binary.clone());

        Self {
            core: HandlerCore::new(ctx),
            binary: engine.binary.clone(),
            extra_args: engine.extra_args.clone(),
            name: format!("Universal ({stem})"),
        }
    }
}

#[derive(Default)]
struct RunState {
    current: Option<String>,
}

impl RunState {
    fn finish_current(&mut self, core: &HandlerCore) {
        if self.current.take().is_some() {
            core.record_completed(0);
            core.report_global_progress();
        }
    }
}

#[async_trait]
impl SiteHandler for EngineHandler {
    fn supports_url(&self, url: &str) -> bool {
        reqwest::Url::parse(url)
            .map(|u| matches!(u.scheme(), "http" | "https"))
            .unwrap_or(false)
    }

    fn site_name(&self) -> &str {
        &self.name
    }

    async fn download(&self, url: &str) -> DownloadResult {
        let started = Instant::now();
        let core = &self.core;

        if core.is_cancelled() {
            return core.finish(started, None);
        }
        if let Err(e) = tokio::fs::create_dir_all(core.download_folder()).await {
            return core.finish(started, Some(format!("cannot create download folder: {e}")));
        }

        let args = engine_args(core.options(), core.download_folder(), &self.extra_args, url);
        debug!(binary = %self.binary, ?args, "Spawning engine");

        let mut child = match Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => return core.finish(started, Some(format!("failed to start {}: {e}", self.binary))),
        };

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return core.finish(started, Some("engine output not captured".to_string()));
        };

        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut collected = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                collected.push(line);
            }
            collected
        });

        core.enable_widgets(false);
        core.log(&format!("Starting {} for {url}", self.name));

        let mut state = RunState::default();
        let mut lines = BufReader::new(stdout).lines();
        let cancel = core.cancel_token();

        loop {
            let line = tokio::select! {
                line = lines.next_line() => line,
                _ = cancel.cancelled() => {
                    if let Err(e) = child.kill().await {
                        warn!(error = %e, "Failed to kill engine process");
                    }
                    core.log("Download cancelled.");
                    core.enable_widgets(true);
                    return core.finish(started, None);
                }
            };

            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Failed to read engine output");
                    break;
                }
            };

            match parse_engine_line(&line) {
                EngineLine::Destination(name) => {
                    state.finish_current(core);
                    core.add_total(1);
                    core.log(&format!("Downloading {name}"));
                    state.current = Some(name);
                    core.report_global_progress();
                }
                EngineLine::Progress(percent) => {
                    let mut metadata = Map::new();
                    metadata.insert("percent".to_string(), Value::from(percent));
                    if let Some(current) = &state.current {
                        metadata.insert("filename".to_string(), Value::from(current.clone()));
                    }
                    core.report_progress((percent * 10.0) as u64, 1000, &metadata);
                }
                EngineLine::AlreadyDownloaded(name) => {
                    core.add_total(1);
                    core.record_skipped(name.clone());
                    core.log(&format!("Already downloaded: {name}"));
                }
                EngineLine::Merged(name) => {
                    state.current = Some(name);
                }
                EngineLine::Other => debug!(line = %line, "engine"),
            }
        }

        let status = child.wait().await;
        let stderr_lines = stderr_task.await.unwrap_or_default();
        core.enable_widgets(true);

        match status {
            Ok(status) if status.success() => {
                state.finish_current(core);
                core.finish(started, None)
            }
            Ok(status) => {
                if let Some(name) = state.current.take() {
                    core.record_failed(name);
                }
                let reason = stderr_lines
                    .iter()
                    .rev()
                    .find(|l| l.starts_with("ERROR:"))
                    .or_else(|| stderr_lines.iter().rev().find(|l| !l.trim().is_empty()))
                    .cloned()
                    .unwrap_or_else(|| format!("engine exited with {status}"));
                core.log(&reason);
                core.finish(started, Some(reason))
            }
            Err(e) => core.finish(started, Some(format!("engine process error: {e}"))),
        }
    }

    fn core(&self) -> &HandlerCore {
        &self.core
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_parse_destination() {
        assert_eq!(
            parse_engine_line("[download] Destination: /tmp/out/Clip [abc].mp4"),
            EngineLine::Destination("Clip [abc].mp4".to_string())
        );
    }

    #[test]
    fn test_parse_progress() {
        assert_eq!(
            parse_engine_line("[download]  42.5% of ~ 10.00MiB at 1.00MiB/s ETA 00:05"),
            EngineLine::Progress(42.5)
        );
        assert_eq!(parse_engine_line("[download] 100% of 3.2MiB"), EngineLine::Progress(100.0));
    }

    #[test]
    fn test_parse_already_downloaded_and_merge() {
        assert_eq!(
            parse_engine_line("[download] /tmp/out/a.webm has already been downloaded"),
            EngineLine::AlreadyDownloaded("a.webm".to_string())
        );
        assert_eq!(
            parse_engine_line(r#"[Merger] Merging formats into "/tmp/out/a.mkv""#),
            EngineLine::Merged("a.mkv".to_string())
        );
        assert_eq!(parse_engine_line("[youtube] abc: Downloading webpage"), EngineLine::Other);
    }

    #[test]
    fn test_engine_args_map_options() {
        let options = DownloadOptions {
            max_retries: 5,
            timeout: 10,
            min_file_size: 100,
            date_from: NaiveDate::from_ymd_opt(2024, 3, 1),
            ..Default::default()
        };
        let args = engine_args(&options, Path::new("out"), &["--quiet".to_string()], "https://v.example/1");

        assert_eq!(args.last().map(String::as_str), Some("https://v.example/1"));
        assert!(args.windows(2).any(|w| w == ["--retries", "5"]));
        assert!(args.windows(2).any(|w| w == ["--socket-timeout", "10"]));
        assert!(args.windows(2).any(|w| w == ["--min-filesize", "100"]));
        assert!(args.windows(2).any(|w| w == ["--dateafter", "20240301"]));
        assert!(!args.iter().any(|a| a == "--max-filesize"));
        assert!(args.contains(&"--quiet".to_string()));
    }

    #[test]
    fn test_supports_only_http_urls() {
        let engine = EngineConfig {
            binary: "yt-dlp".to_string(),
            extra_args: Vec::new(),
        };
        let handler = EngineHandler::new(HandlerContext::default(), &engine);
        assert!(handler.supports_url("https://video.example/watch?v=1"));
        assert!(!handler.supports_url("ftp://files.example/a"));
        assert!(!handler.supports_url("not a url"));
        assert_eq!(handler.site_name(), "Universal (yt-dlp)");
    }

    #[test]
    fn test_missing_binary_is_unavailable() {
        assert!(!engine_available("definitely-not-an-installed-engine-binary"));
    }

    #[tokio::test]
    async fn test_missing_binary_reports_failure() {
        let dir = tempfile::TempDir::new().unwrap();
        let engine = EngineConfig {
            binary: "definitely-not-an-installed-engine-binary".to_string(),
            extra_args: Vec::new(),
        };
        let handler = EngineHandler::new(
            HandlerContext::new(dir.path(), DownloadOptions::default()),
            &engine,
        );

        let result = handler.download("https://video.example/1").await;
        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("failed to start"));
    }
}
