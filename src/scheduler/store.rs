use std::path::Path;

use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use tracing::{debug, info, warn};

use super::error::Result;
use super::models::ScheduledJob;

const SCHEDULES_PARTITION: &str = "schedules";

/// Encode a schedule key: sched:{job_id}
fn encode_schedule_key(job_id: &str) -> Vec<u8> {
    format!("sched:{job_id}").into_bytes()
}

/// Fjall-backed table of scheduled jobs.
///
/// Every write is persisted before returning, so a new process opening the
/// same path sees exactly what the previous one wrote.
#[derive(Clone)]
pub struct ScheduleStore {
    keyspace: Keyspace,
    schedules: PartitionHandle,
}

impl ScheduleStore {
    /// Open or create a schedule store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening schedule store at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;
        let schedules = keyspace.open_partition(SCHEDULES_PARTITION, PartitionCreateOptions::default())?;

        Ok(Self { keyspace, schedules })
    }

    /// Store or replace a scheduled job
    pub fn upsert(&self, job: &ScheduledJob) -> Result<()> {
        let value = serde_json::to_vec(job)?;
        self.schedules.insert(encode_schedule_key(&job.job_id), value)?;
        self.keyspace.persist(PersistMode::SyncAll)?;
        debug!(job_id = %job.job_id, "Upserted scheduled job");
        Ok(())
    }

    pub fn get(&self, job_id: &str) -> Result<Option<ScheduledJob>> {
        match self.schedules.get(encode_schedule_key(job_id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Remove a scheduled job. Returns whether it existed.
    pub fn remove(&self, job_id: &str) -> Result<bool> {
        let key = encode_schedule_key(job_id);
        if !self.schedules.contains_key(&key)? {
            return Ok(false);
        }
        self.schedules.remove(key)?;
        self.keyspace.persist(PersistMode::SyncAll)?;
        debug!(job_id, "Removed scheduled job");
        Ok(true)
    }

    /// Every readable job, oldest first
    pub fn list(&self) -> Result<Vec<ScheduledJob>> {
        let mut jobs = Vec::new();
        for item in self.schedules.iter() {
            let (key, value) = item?;
            match serde_json::from_slice::<ScheduledJob>(&value) {
                Ok(job) => jobs.push(job),
                Err(e) => warn!(
                    key = %String::from_utf8_lossy(&key),
                    error = %e,
                    "Skipping unreadable scheduled job"
                ),
            }
        }
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.job_id.cmp(&b.job_id)));
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn job(id: &str) -> ScheduledJob {
        ScheduledJob::daily(vec!["https://a.example".to_string(), "https://b.example".to_string()], Utc::now())
            .with_id(id)
    }

    #[test]
    fn test_upsert_get_remove() {
        let temp_dir = TempDir::new().unwrap();
        let store = ScheduleStore::open(temp_dir.path().join("schedules")).unwrap();

        store.upsert(&job("a")).unwrap();
        let loaded = store.get("a").unwrap().unwrap();
        assert_eq!(loaded.urls.len(), 2);

        let mut changed = loaded.clone();
        changed.enabled = false;
        store.upsert(&changed).unwrap();
        assert_eq!(store.list().unwrap().len(), 1);
        assert!(!store.get("a").unwrap().unwrap().enabled);

        assert!(store.remove("a").unwrap());
        assert!(!store.remove("a").unwrap());
        assert!(store.get("a").unwrap().is_none());
    }

    #[test]
    fn test_reopen_sees_jobs() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("schedules");
        {
            let store = ScheduleStore::open(&path).unwrap();
            store.upsert(&job("persisted")).unwrap();
        }
        let store = ScheduleStore::open(&path).unwrap();
        assert_eq!(store.list().unwrap()[0].job_id, "persisted");
    }

    #[test]
    fn test_unreadable_rows_are_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let store = ScheduleStore::open(temp_dir.path().join("schedules")).unwrap();
        store.upsert(&job("good")).unwrap();
        store.schedules.insert(encode_schedule_key("bad"), b"{oops".to_vec()).unwrap();

        let jobs = store.list().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job_id, "good");
    }
}
