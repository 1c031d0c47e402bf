//! Runs one URL through the selector and records it in history

use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::handlers::{
    CancelToken, Callbacks, DownloadOptions, HandlerContext, HandlerRegistry, SelectOptions,
};
use crate::history::{self, DownloadJob, HistoryStore, JobStatus, event_type};

/// Shared by the interactive `download` command and the scheduler
#[derive(Clone)]
pub struct DownloadRunner {
    registry: Arc<HandlerRegistry>,
    history: HistoryStore,
    select: SelectOptions,
}

impl DownloadRunner {
    pub fn new(registry: Arc<HandlerRegistry>, history: HistoryStore, select: SelectOptions) -> Self {
        Self {
            registry,
            history,
            select,
        }
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Download `url` into `folder`, recording the job and its events.
    ///
    /// Handler failures and cancellation end up in the returned job's
    /// status; only history write failures are errors.
    pub async fn run(
        &self,
        url: &str,
        folder: &Path,
        options: &DownloadOptions,
        cancel: CancelToken,
        observer: Callbacks,
    ) -> history::Result<DownloadJob> {
        let mut job = DownloadJob::new(url, "", folder.display().to_string(), options);
        self.history.save_job(&job)?;
        self.history.record_event(
            &job.id,
            event_type::CREATED,
            payload([
                ("url", Value::from(url)),
                ("output_folder", Value::from(job.output_folder.clone())),
            ]),
        )?;
        info!(job_id = %job.id, url, "Download job created");

        let ctx = HandlerContext::new(folder, options.clone())
            .with_callbacks(self.recording_callbacks(&job.id, observer))
            .with_cancel(cancel);

        let Some(handler) = self.registry.select(url, ctx, &self.select) else {
            let message = format!("no handler available for {url}");
            warn!(job_id = %job.id, url, "No handler available");
            job.fail(&message);
            self.history.save_job(&job)?;
            self.record_status(&job, JobStatus::Pending)?;
            self.history.record_event(
                &job.id,
                event_type::ERROR,
                payload([("message", Value::from(message))]),
            )?;
            return Ok(job);
        };

        job.mark_started(handler.site_name());
        self.history.save_job(&job)?;
        self.record_status(&job, JobStatus::Pending)?;
        info!(job_id = %job.id, engine = %job.engine, "Download started");

        let result = handler.download(url).await;

        job.finish_with(&result);
        self.history.save_job(&job)?;
        self.record_status(&job, JobStatus::Downloading)?;
        if let Some(message) = &result.error_message {
            self.history.record_event(
                &job.id,
                event_type::ERROR,
                payload([("message", Value::from(message.clone()))]),
            )?;
        }

        info!(
            job_id = %job.id,
            status = %job.status,
            completed = result.completed_files,
            failed = result.failed_files.len(),
            skipped = result.skipped_files.len(),
            bytes = result.total_bytes,
            "Download finished"
        );
        Ok(job)
    }

    fn record_status(&self, job: &DownloadJob, from: JobStatus) -> history::Result<u64> {
        self.history.record_event(
            &job.id,
            event_type::STATUS_CHANGE,
            payload([
                ("from", Value::from(from.as_str())),
                ("to", Value::from(job.status.as_str())),
                ("engine", Value::from(job.engine.clone())),
            ]),
        )
    }

    /// Log and overall progress become events; per-file progress is only traced
    fn recording_callbacks(&self, job_id: &str, observer: Callbacks) -> Callbacks {
        let log_store = self.history.clone();
        let log_job = job_id.to_string();
        let log_next = observer.log.clone();

        let progress_store = self.history.clone();
        let progress_job = job_id.to_string();
        let progress_next = observer.overall_progress.clone();

        let file_job = job_id.to_string();
        let file_next = observer.file_progress.clone();

        let mut callbacks = Callbacks::new()
            .on_log(move |message| {
                let event = payload([("message", Value::from(message))]);
                if let Err(e) = log_store.record_event(&log_job, event_type::LOG, event) {
                    warn!(job_id = %log_job, error = %e, "Failed to record log event");
                }
                if let Some(next) = &log_next {
                    next(message);
                }
            })
            .on_overall_progress(move |completed, total| {
                let event = payload([
                    ("completed", Value::from(completed)),
                    ("total", Value::from(total)),
                ]);
                if let Err(e) = progress_store.record_event(&progress_job, event_type::PROGRESS, event) {
                    warn!(job_id = %progress_job, error = %e, "Failed to record progress event");
                }
                if let Some(next) = &progress_next {
                    next(completed, total);
                }
            })
            .on_file_progress(move |downloaded, total, metadata| {
                debug!(job_id = %file_job, downloaded, total, "File progress");
                if let Some(next) = &file_next {
                    next(downloaded, total, metadata);
                }
            });
        callbacks.enable_widgets = observer.enable_widgets;
        callbacks
    }
}

fn payload<const N: usize>(fields: [(&str, Value); N]) -> Map<String, Value> {
    fields
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::DEFAULT_EVENT_LIMIT;
    use tempfile::TempDir;

    fn runner(registry: HandlerRegistry) -> (DownloadRunner, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let history = HistoryStore::open(temp_dir.path().join("history")).unwrap();
        (
            DownloadRunner::new(Arc::new(registry), history, SelectOptions::default()),
            temp_dir,
        )
    }

    #[tokio::test]
    async fn test_no_handler_records_failed_job() {
        let (runner, temp) = runner(HandlerRegistry::new());

        let job = runner
            .run(
                "https://nowhere.example/a",
                temp.path(),
                &DownloadOptions::default(),
                CancelToken::new(),
                Callbacks::default(),
            )
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error_message.unwrap().contains("no handler"));

        let stored = runner.history().get_job(&job.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);

        let events = runner.history().get_job_events(&job.id, DEFAULT_EVENT_LIMIT).unwrap();
        let kinds: Vec<_> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(kinds, vec!["created", "status_change", "error"]);
    }

    #[tokio::test]
    async fn test_cancelled_run_is_recorded_as_cancelled() {
        let mut registry = HandlerRegistry::new();
        registry.set_generic_fallback(|ctx| Box::new(crate::handlers::DirectHandler::new(ctx)));
        let (runner, temp) = runner(registry);

        let cancel = CancelToken::new();
        cancel.cancel();
        let job = runner
            .run(
                "http://127.0.0.1:9/clip.mp4",
                &temp.path().join("out"),
                &DownloadOptions::default(),
                cancel,
                Callbacks::default(),
            )
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.engine, "Direct link");
        assert!(job.finished_at.is_some());
        assert_eq!(job.options_snapshot.get("timeout"), Some(&Value::from(30)));

        let events = runner.history().get_job_events(&job.id, DEFAULT_EVENT_LIMIT).unwrap();
        assert!(events.iter().any(|e| e.event_type == event_type::LOG));
        assert!(events.iter().any(|e| e.event_type == event_type::PROGRESS));
        let last_status = events
            .iter()
            .filter(|e| e.event_type == event_type::STATUS_CHANGE)
            .last()
            .unwrap();
        assert_eq!(last_status.payload["to"], Value::from("cancelled"));
    }
}
