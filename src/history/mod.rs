/// Persistent history of download jobs and their events
///
/// Backed by Fjall (an embedded LSM key-value store). Three partitions:
///
/// - `jobs`: one row per job, upserted as the job moves through its statuses
/// - `events`: append-only, timestamped facts per job (log lines, progress,
///   status changes)
/// - `metadata`: the event row-id counter
///
/// Options snapshots and event payloads are stored as serialized text; text
/// that no longer parses reads back as an empty object.
///
/// ## Usage
///
/// ```rust,ignore
/// use mediafetch::history::{DownloadJob, HistoryStore, JobQuery};
///
/// let store = HistoryStore::open("data/history")?;
/// store.save_job(&job)?;
/// let recent = store.list_jobs(&JobQuery::default())?;
/// ```

pub mod error;
pub mod models;
pub mod partitions;
pub mod retention;
pub mod store;

pub use error::{HistoryError, Result};
pub use models::{DownloadEvent, DownloadJob, HistoryStats, JobQuery, JobStatus, event_type};
pub use store::{DEFAULT_EVENT_LIMIT, HistoryStore};
