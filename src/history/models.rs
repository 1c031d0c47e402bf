use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::warn;
use uuid::Uuid;

use crate::handlers::{DownloadOptions, DownloadResult};

/// Well-known event tags. The tag is free-form; these are the ones the
/// crate itself writes.
pub mod event_type {
    pub const CREATED: &str = "created";
    pub const STATUS_CHANGE: &str = "status_change";
    pub const LOG: &str = "log";
    pub const PROGRESS: &str = "progress";
    pub const FILE_PROGRESS: &str = "file_progress";
    pub const ERROR: &str = "error";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Downloading,
    Paused,
    Completed,
    Failed,
    Cancelled,
    Skipped,
}

impl JobStatus {
    pub const ALL: [JobStatus; 7] = [
        JobStatus::Pending,
        JobStatus::Downloading,
        JobStatus::Paused,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
        JobStatus::Skipped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Downloading => "downloading",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled | JobStatus::Skipped
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown job status: {s}"))
    }
}

/// One logical download request as recorded in history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadJob {
    pub id: String,
    pub url: String,
    pub engine: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total_items: u64,
    pub completed_items: u64,
    pub failed_items: u64,
    pub skipped_items: u64,
    pub output_folder: String,
    pub error_message: Option<String>,
    pub options_snapshot: Map<String, Value>,
}

impl DownloadJob {
    /// A `pending` job carrying a snapshot of the options it will run with
    pub fn new(
        url: impl Into<String>,
        engine: impl Into<String>,
        output_folder: impl Into<String>,
        options: &DownloadOptions,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            url: url.into(),
            engine: engine.into(),
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            total_items: 0,
            completed_items: 0,
            failed_items: 0,
            skipped_items: 0,
            output_folder: output_folder.into(),
            error_message: None,
            options_snapshot: options.snapshot(),
        }
    }

    pub fn mark_started(&mut self, engine: impl Into<String>) {
        self.engine = engine.into();
        self.status = JobStatus::Downloading;
        self.started_at = Some(Utc::now());
    }

    /// Copy counters from a handler result and move to its terminal status
    pub fn finish_with(&mut self, result: &DownloadResult) {
        self.total_items = result.total_files as u64;
        self.completed_items = result.completed_files as u64;
        self.failed_items = result.failed_files.len() as u64;
        self.skipped_items = result.skipped_files.len() as u64;
        self.error_message = result.error_message.clone();
        self.status = if result.cancelled {
            JobStatus::Cancelled
        } else if result.success {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };
        self.finished_at = Some(Utc::now());
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.error_message = Some(message.into());
        self.finished_at = Some(Utc::now());
    }
}

/// Append-only fact recorded against a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadEvent {
    /// Assigned by the store on insert
    pub id: u64,
    pub job_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub payload: Map<String, Value>,
}

impl DownloadEvent {
    pub fn new(job_id: impl Into<String>, event_type: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            id: 0,
            job_id: job_id.into(),
            timestamp: Utc::now(),
            event_type: event_type.into(),
            payload,
        }
    }

    pub fn message(job_id: impl Into<String>, event_type: impl Into<String>, message: &str) -> Self {
        let mut payload = Map::new();
        payload.insert("message".to_string(), Value::from(message));
        Self::new(job_id, event_type, payload)
    }
}

/// Filter and paging for [`list_jobs`](super::HistoryStore::list_jobs)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobQuery {
    pub status: Option<JobStatus>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for JobQuery {
    fn default() -> Self {
        Self {
            status: None,
            limit: 200,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HistoryStats {
    pub by_status: BTreeMap<JobStatus, usize>,
    pub total: usize,
}

/// On-disk job row. The options snapshot is kept as serialized text.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct JobRow {
    id: String,
    url: String,
    engine: String,
    status: JobStatus,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    total_items: u64,
    completed_items: u64,
    failed_items: u64,
    skipped_items: u64,
    output_folder: String,
    error_message: Option<String>,
    pub(crate) options_snapshot: String,
}

impl JobRow {
    pub(crate) fn from_job(job: &DownloadJob) -> serde_json::Result<Self> {
        Ok(Self {
            id: job.id.clone(),
            url: job.url.clone(),
            engine: job.engine.clone(),
            status: job.status,
            created_at: job.created_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
            total_items: job.total_items,
            completed_items: job.completed_items,
            failed_items: job.failed_items,
            skipped_items: job.skipped_items,
            output_folder: job.output_folder.clone(),
            error_message: job.error_message.clone(),
            options_snapshot: serde_json::to_string(&job.options_snapshot)?,
        })
    }

    pub(crate) fn into_job(self) -> DownloadJob {
        let options_snapshot = parse_object_text(&self.options_snapshot, &self.id, "options_snapshot");
        DownloadJob {
            id: self.id,
            url: self.url,
            engine: self.engine,
            status: self.status,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            total_items: self.total_items,
            completed_items: self.completed_items,
            failed_items: self.failed_items,
            skipped_items: self.skipped_items,
            output_folder: self.output_folder,
            error_message: self.error_message,
            options_snapshot,
        }
    }
}

/// On-disk event row. The payload is kept as serialized text.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct EventRow {
    id: u64,
    pub(crate) job_id: String,
    timestamp: DateTime<Utc>,
    event_type: String,
    pub(crate) payload: String,
}

impl EventRow {
    pub(crate) fn from_event(event: &DownloadEvent, id: u64) -> serde_json::Result<Self> {
        Ok(Self {
            id,
            job_id: event.job_id.clone(),
            timestamp: event.timestamp,
            event_type: event.event_type.clone(),
            payload: serde_json::to_string(&event.payload)?,
        })
    }

    pub(crate) fn into_event(self) -> DownloadEvent {
        let payload = parse_object_text(&self.payload, &self.job_id, "payload");
        DownloadEvent {
            id: self.id,
            job_id: self.job_id,
            timestamp: self.timestamp,
            event_type: self.event_type,
            payload,
        }
    }
}

/// Malformed text yields an empty object so the record stays readable
fn parse_object_text(text: &str, job_id: &str, field: &str) -> Map<String, Value> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => map,
        Ok(_) => {
            warn!(job_id, field, "Stored value is not an object, using empty object");
            Map::new()
        }
        Err(e) => {
            warn!(job_id, field, error = %e, "Malformed stored text, using empty object");
            Map::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_and_terminal() {
        assert_eq!("Completed".parse::<JobStatus>(), Ok(JobStatus::Completed));
        assert!("done".parse::<JobStatus>().is_err());
        assert!(JobStatus::Skipped.is_terminal());
        assert!(!JobStatus::Downloading.is_terminal());
        assert!(!JobStatus::Paused.is_terminal());
    }

    #[test]
    fn test_finish_with_maps_result() {
        let mut job = DownloadJob::new("https://x.example", "", "out", &DownloadOptions::default());
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.options_snapshot.get("max_retries"), Some(&Value::from(3)));

        job.mark_started("Direct link");
        assert_eq!(job.status, JobStatus::Downloading);
        assert!(job.started_at.is_some());

        let result = DownloadResult {
            success: false,
            total_files: 3,
            completed_files: 1,
            failed_files: vec!["a".into()],
            skipped_files: vec!["b".into()],
            ..Default::default()
        };
        job.finish_with(&result);
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!((job.total_items, job.completed_items, job.failed_items, job.skipped_items), (3, 1, 1, 1));
        assert!(job.finished_at.is_some());

        job.finish_with(&DownloadResult {
            cancelled: true,
            ..Default::default()
        });
        assert_eq!(job.status, JobStatus::Cancelled);
    }

    #[test]
    fn test_malformed_snapshot_becomes_empty() {
        let job = DownloadJob::new("https://x.example", "e", "out", &DownloadOptions::default());
        let mut row = JobRow::from_job(&job).unwrap();
        row.options_snapshot = "{not json".to_string();
        let restored = row.into_job();
        assert!(restored.options_snapshot.is_empty());
        assert_eq!(restored.url, "https://x.example");
    }

    #[test]
    fn test_non_object_payload_becomes_empty() {
        let event = DownloadEvent::message("j", event_type::LOG, "hello");
        let mut row = EventRow::from_event(&event, 5).unwrap();
        row.payload = "[1,2]".to_string();
        let restored = row.into_event();
        assert_eq!(restored.id, 5);
        assert!(restored.payload.is_empty());
    }
}
