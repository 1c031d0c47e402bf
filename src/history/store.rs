use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::error::Result;
use super::models::{DownloadEvent, DownloadJob, EventRow, HistoryStats, JobQuery, JobRow, JobStatus};
use super::partitions::{
    EVENTS_PARTITION, JOBS_PARTITION, META_NEXT_EVENT_ID, METADATA_PARTITION, decode_event_key,
    encode_event_key, encode_event_prefix, encode_job_key, encode_meta_key,
};
use super::retention::completed_beyond;

pub const DEFAULT_EVENT_LIMIT: usize = 1000;

/// Fjall-backed history of download jobs and their events.
///
/// Every operation takes an exclusive guard for its whole duration, so
/// concurrent callers never observe or produce interleaved partial writes.
/// Clones share the keyspace and the guard.
#[derive(Clone)]
pub struct HistoryStore {
    keyspace: Keyspace,
    jobs: PartitionHandle,
    events: PartitionHandle,
    metadata: PartitionHandle,
    guard: Arc<Mutex<()>>,
}

impl HistoryStore {
    /// Open or create a history store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening history store at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;
        let jobs = keyspace.open_partition(JOBS_PARTITION, PartitionCreateOptions::default())?;
        let events = keyspace.open_partition(EVENTS_PARTITION, PartitionCreateOptions::default())?;
        let metadata = keyspace.open_partition(METADATA_PARTITION, PartitionCreateOptions::default())?;

        Ok(Self {
            keyspace,
            jobs,
            events,
            metadata,
            guard: Arc::new(Mutex::new(())),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.guard.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or fully replace the job with the same id
    pub fn save_job(&self, job: &DownloadJob) -> Result<()> {
        let value = serde_json::to_vec(&JobRow::from_job(job)?)?;
        let _guard = self.lock();

        self.jobs.insert(encode_job_key(&job.id), value)?;
        self.keyspace.persist(PersistMode::SyncAll)?;
        debug!(job_id = %job.id, status = %job.status, "Saved job");
        Ok(())
    }

    pub fn get_job(&self, job_id: &str) -> Result<Option<DownloadJob>> {
        let _guard = self.lock();
        match self.jobs.get(encode_job_key(job_id))? {
            Some(value) => {
                let row: JobRow = serde_json::from_slice(&value)?;
                Ok(Some(row.into_job()))
            }
            None => Ok(None),
        }
    }

    /// Jobs newest first, optionally filtered by status
    pub fn list_jobs(&self, query: &JobQuery) -> Result<Vec<DownloadJob>> {
        let mut jobs = {
            let _guard = self.lock();
            self.load_jobs()?
        };

        if let Some(status) = query.status {
            jobs.retain(|job| job.status == status);
        }
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));

        Ok(jobs.into_iter().skip(query.offset).take(query.limit).collect())
    }

    /// Append an event and return the row id assigned to it
    pub fn append_event(&self, event: &DownloadEvent) -> Result<u64> {
        let _guard = self.lock();

        let id = self.next_event_id()?;
        let value = serde_json::to_vec(&EventRow::from_event(event, id)?)?;

        let mut batch = self.keyspace.batch();
        batch.insert(&self.events, encode_event_key(&event.job_id, id), value);
        batch.insert(
            &self.metadata,
            encode_meta_key(META_NEXT_EVENT_ID),
            (id + 1).to_string().into_bytes(),
        );
        batch.commit()?;
        self.keyspace.persist(PersistMode::Buffer)?;

        Ok(id)
    }

    /// Shorthand for appending an event built from its parts
    pub fn record_event(
        &self,
        job_id: &str,
        event_type: &str,
        payload: Map<String, Value>,
    ) -> Result<u64> {
        self.append_event(&DownloadEvent::new(job_id, event_type, payload))
    }

    /// Events of one job by ascending timestamp, insertion order for ties
    pub fn get_job_events(&self, job_id: &str, limit: usize) -> Result<Vec<DownloadEvent>> {
        let mut events = Vec::new();
        {
            let _guard = self.lock();
            for item in self.events.prefix(encode_event_prefix(job_id)) {
                let (key, value) = item?;
                if decode_event_key(&key).is_none_or(|(owner, _)| owner != job_id) {
                    continue;
                }
                match serde_json::from_slice::<EventRow>(&value) {
                    Ok(row) => events.push(row.into_event()),
                    Err(e) => warn!(job_id, error = %e, "Skipping unreadable event row"),
                }
            }
        }

        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        events.truncate(limit);
        Ok(events)
    }

    /// Remove a job and its events. Returns whether the job row existed.
    pub fn delete_job(&self, job_id: &str) -> Result<bool> {
        let _guard = self.lock();

        let existed = self.jobs.contains_key(encode_job_key(job_id))?;
        let event_keys = self.event_keys(job_id)?;

        let mut batch = self.keyspace.batch();
        for key in &event_keys {
            batch.remove(&self.events, key.clone());
        }
        batch.remove(&self.jobs, encode_job_key(job_id));
        batch.commit()?;
        self.keyspace.persist(PersistMode::SyncAll)?;

        debug!(job_id, existed, events = event_keys.len(), "Deleted job");
        Ok(existed)
    }

    /// Keep the `keep_last` most recently finished completed jobs and delete
    /// the remaining completed ones with their events. Returns the count.
    pub fn clear_completed_jobs(&self, keep_last: usize) -> Result<usize> {
        let _guard = self.lock();

        let jobs = self.load_jobs()?;
        let doomed = completed_beyond(&jobs, keep_last);
        if doomed.is_empty() {
            return Ok(0);
        }

        let mut batch = self.keyspace.batch();
        for job_id in &doomed {
            for key in self.event_keys(job_id)? {
                batch.remove(&self.events, key);
            }
            batch.remove(&self.jobs, encode_job_key(job_id));
        }
        batch.commit()?;
        self.keyspace.persist(PersistMode::SyncAll)?;

        info!(deleted = doomed.len(), keep_last, "Cleared completed jobs");
        Ok(doomed.len())
    }

    /// Job count per status (every status listed) plus the total
    pub fn get_stats(&self) -> Result<HistoryStats> {
        let jobs = {
            let _guard = self.lock();
            self.load_jobs()?
        };

        let mut stats = HistoryStats {
            by_status: JobStatus::ALL.into_iter().map(|s| (s, 0)).collect(),
            total: jobs.len(),
        };
        for job in &jobs {
            *stats.by_status.entry(job.status).or_default() += 1;
        }
        Ok(stats)
    }

    /// Persist all pending writes to disk
    pub fn persist(&self) -> Result<()> {
        let _guard = self.lock();
        self.keyspace.persist(PersistMode::SyncAll)?;
        Ok(())
    }

    // Callers must hold the guard.
    fn load_jobs(&self) -> Result<Vec<DownloadJob>> {
        let mut jobs = Vec::new();
        for item in self.jobs.iter() {
            let (key, value) = item?;
            match serde_json::from_slice::<JobRow>(&value) {
                Ok(row) => jobs.push(row.into_job()),
                Err(e) => warn!(
                    key = %String::from_utf8_lossy(&key),
                    error = %e,
                    "Skipping unreadable job row"
                ),
            }
        }
        Ok(jobs)
    }

    // Callers must hold the guard.
    fn event_keys(&self, job_id: &str) -> Result<Vec<Vec<u8>>> {
        let mut keys = Vec::new();
        for item in self.events.prefix(encode_event_prefix(job_id)) {
            let (key, _) = item?;
            if decode_event_key(&key).is_some_and(|(owner, _)| owner == job_id) {
                keys.push(key.to_vec());
            }
        }
        Ok(keys)
    }

    // Callers must hold the guard.
    fn next_event_id(&self) -> Result<u64> {
        let stored = self.metadata.get(encode_meta_key(META_NEXT_EVENT_ID))?;
        let next = stored
            .and_then(|value| std::str::from_utf8(&value).ok()?.parse::<u64>().ok())
            .unwrap_or(1);
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::{DownloadOptions, DownloadResult};
    use crate::history::models::event_type;
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    fn create_test_store() -> (HistoryStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = HistoryStore::open(temp_dir.path().join("history")).unwrap();
        (store, temp_dir)
    }

    fn job(url: &str) -> DownloadJob {
        DownloadJob::new(url, "Direct link", "out", &DownloadOptions::default())
    }

    #[test]
    fn test_save_job_is_an_upsert() {
        let (store, _temp) = create_test_store();
        let mut job = job("https://a.example");
        store.save_job(&job).unwrap();

        job.status = JobStatus::Completed;
        job.options_snapshot.insert("note".to_string(), Value::from("changed"));
        store.save_job(&job).unwrap();
        store.save_job(&job).unwrap();

        let jobs = store.list_jobs(&JobQuery::default()).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Completed);
        assert_eq!(jobs[0].options_snapshot.get("note"), Some(&Value::from("changed")));
    }

    #[test]
    fn test_get_missing_job() {
        let (store, _temp) = create_test_store();
        assert!(store.get_job("missing").unwrap().is_none());
    }

    #[test]
    fn test_list_jobs_newest_first_with_filter_and_paging() {
        let (store, _temp) = create_test_store();
        let base = Utc::now();
        for i in 0..5 {
            let mut job = job(&format!("https://{i}.example"));
            job.created_at = base + Duration::seconds(i);
            if i % 2 == 0 {
                job.status = JobStatus::Completed;
            }
            store.save_job(&job).unwrap();
        }

        let all = store.list_jobs(&JobQuery::default()).unwrap();
        let urls: Vec<_> = all.iter().map(|j| j.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://4.example", "https://3.example", "https://2.example", "https://1.example", "https://0.example"]
        );

        let completed = store
            .list_jobs(&JobQuery {
                status: Some(JobStatus::Completed),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(completed.len(), 3);

        let page = store
            .list_jobs(&JobQuery {
                status: None,
                limit: 2,
                offset: 1,
            })
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].url, "https://3.example");
    }

    #[test]
    fn test_events_are_ordered_and_counted() {
        let (store, _temp) = create_test_store();
        let job = job("https://a.example");
        store.save_job(&job).unwrap();

        let stamp = Utc::now();
        let mut ids = Vec::new();
        for i in 0..5 {
            let mut event = DownloadEvent::message(&job.id, event_type::LOG, &format!("line {i}"));
            // identical timestamps fall back to insertion order
            event.timestamp = if i == 0 { stamp + Duration::seconds(10) } else { stamp };
            ids.push(store.append_event(&event).unwrap());
        }
        store
            .append_event(&DownloadEvent::message("other", event_type::LOG, "x"))
            .unwrap();

        assert!(ids.windows(2).all(|w| w[0] < w[1]));

        let events = store.get_job_events(&job.id, DEFAULT_EVENT_LIMIT).unwrap();
        assert_eq!(events.len(), 5);
        assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        let messages: Vec<_> = events.iter().map(|e| e.payload["message"].as_str().unwrap()).collect();
        assert_eq!(messages, vec!["line 1", "line 2", "line 3", "line 4", "line 0"]);

        assert_eq!(store.get_job_events(&job.id, 2).unwrap().len(), 2);
    }

    #[test]
    fn test_event_ids_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("history");
        let first = {
            let store = HistoryStore::open(&path).unwrap();
            store.record_event("j", event_type::CREATED, Map::new()).unwrap()
        };
        let store = HistoryStore::open(&path).unwrap();
        let second = store.record_event("j", event_type::LOG, Map::new()).unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_job_id_prefix_does_not_leak_events() {
        let (store, _temp) = create_test_store();
        store.record_event("a", event_type::LOG, Map::new()).unwrap();
        store.record_event("a:b", event_type::LOG, Map::new()).unwrap();

        assert_eq!(store.get_job_events("a", 10).unwrap().len(), 1);
        assert_eq!(store.get_job_events("a:b", 10).unwrap().len(), 1);
    }

    #[test]
    fn test_delete_job_removes_events() {
        let (store, _temp) = create_test_store();
        let job = job("https://a.example");
        store.save_job(&job).unwrap();
        store.record_event(&job.id, event_type::LOG, Map::new()).unwrap();

        assert!(store.delete_job(&job.id).unwrap());
        assert!(store.get_job(&job.id).unwrap().is_none());
        assert!(store.get_job_events(&job.id, 10).unwrap().is_empty());
        assert!(!store.delete_job(&job.id).unwrap());
    }

    #[test]
    fn test_clear_completed_jobs_keeps_latest() {
        let (store, _temp) = create_test_store();
        let now = Utc::now();
        let mut completed = Vec::new();
        for i in 0..5 {
            let mut job = job(&format!("https://{i}.example"));
            job.finish_with(&DownloadResult {
                success: true,
                ..Default::default()
            });
            job.finished_at = Some(now - Duration::minutes(i));
            store.save_job(&job).unwrap();
            store.record_event(&job.id, event_type::LOG, Map::new()).unwrap();
            completed.push(job);
        }
        let mut failed = job("https://failed.example");
        failed.fail("boom");
        store.save_job(&failed).unwrap();

        assert_eq!(store.clear_completed_jobs(2).unwrap(), 3);

        let remaining = store
            .list_jobs(&JobQuery {
                status: Some(JobStatus::Completed),
                ..Default::default()
            })
            .unwrap();
        let mut ids: Vec<_> = remaining.iter().map(|j| j.id.clone()).collect();
        ids.sort();
        let mut expected = vec![completed[0].id.clone(), completed[1].id.clone()];
        expected.sort();
        assert_eq!(ids, expected);

        assert!(store.get_job(&failed.id).unwrap().is_some());
        assert!(store.get_job_events(&completed[4].id, 10).unwrap().is_empty());
        assert_eq!(store.clear_completed_jobs(2).unwrap(), 0);
    }

    #[test]
    fn test_stats_count_every_status() {
        let (store, _temp) = create_test_store();
        let mut a = job("https://a.example");
        a.status = JobStatus::Completed;
        let b = job("https://b.example");
        store.save_job(&a).unwrap();
        store.save_job(&b).unwrap();

        let stats = store.get_stats().unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_status[&JobStatus::Completed], 1);
        assert_eq!(stats.by_status[&JobStatus::Pending], 1);
        assert_eq!(stats.by_status[&JobStatus::Failed], 0);
        assert_eq!(stats.by_status.len(), JobStatus::ALL.len());
    }

    #[test]
    fn test_malformed_stored_text_is_recovered() {
        let (store, _temp) = create_test_store();
        let job = job("https://a.example");
        let mut row = JobRow::from_job(&job).unwrap();
        row.options_snapshot = "not json".to_string();
        store
            .jobs
            .insert(encode_job_key(&job.id), serde_json::to_vec(&row).unwrap())
            .unwrap();

        let event = DownloadEvent::message(&job.id, event_type::LOG, "x");
        let mut event_row = EventRow::from_event(&event, 1).unwrap();
        event_row.payload = "{broken".to_string();
        store
            .events
            .insert(encode_event_key(&job.id, 1), serde_json::to_vec(&event_row).unwrap())
            .unwrap();

        let loaded = store.get_job(&job.id).unwrap().unwrap();
        assert!(loaded.options_snapshot.is_empty());
        assert_eq!(loaded.url, "https://a.example");

        let events = store.get_job_events(&job.id, 10).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].payload.is_empty());
    }

    #[test]
    fn test_concurrent_appends_keep_unique_ids() {
        let (store, _temp) = create_test_store();
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    (0..25)
                        .map(|_| store.record_event(&format!("job{t}"), event_type::LOG, Map::new()).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ids: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 100);
    }
}
