use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::error::{Result, SchedulerError};
use super::models::{ScheduleType, ScheduledJob, scheduler_event};
use super::store::ScheduleStore;
use crate::config::Config;
use crate::handlers::{Callbacks, CancelToken, DownloadOptions};
use crate::history::{DownloadJob, JobStatus};
use crate::runner::DownloadRunner;

/// Receives `(event_type, job_id, message)` for every scheduler event
pub type EventCallback = Arc<dyn Fn(&str, &str, &str) + Send + Sync>;

/// Loop timing and the defaults applied to jobs that carry no overrides
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub poll_interval: Duration,
    pub output_folder: PathBuf,
    pub options: DownloadOptions,
}

impl SchedulerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.scheduler.poll_interval(),
            output_folder: config.scheduler.output_folder.clone(),
            options: config.downloads.clone(),
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

struct LoopHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct ActiveRun {
    job_id: String,
    cancel: CancelToken,
}

type ActiveRuns = Mutex<HashMap<u64, ActiveRun>>;

/// Drops its execution from the active set, also when the execution panics
struct ExecutionGuard<'a> {
    active: &'a ActiveRuns,
    execution: u64,
}

impl Drop for ExecutionGuard<'_> {
    fn drop(&mut self) {
        lock(self.active).remove(&self.execution);
    }
}

struct Inner {
    store: ScheduleStore,
    runner: DownloadRunner,
    settings: SchedulerSettings,
    callback: RwLock<Option<EventCallback>>,
    loop_handle: Mutex<Option<LoopHandle>>,
    /// Executions in flight, by execution id. One scheduled job can have
    /// several when manual triggers overlap a scheduled run.
    active: ActiveRuns,
    next_execution: AtomicU64,
    /// Serializes read-modify-write cycles on scheduled job rows
    transitions: Mutex<()>,
}

/// Background scheduler for recurring downloads.
///
/// Scheduled jobs live in the [`ScheduleStore`]; each tick re-reads them, so
/// a fresh instance over the same store picks up where a previous one left
/// off. Clones share the same loop and state.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Scheduler {
    pub fn new(store: ScheduleStore, runner: DownloadRunner, settings: SchedulerSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                runner,
                settings,
                callback: RwLock::new(None),
                loop_handle: Mutex::new(None),
                active: Mutex::new(HashMap::new()),
                next_execution: AtomicU64::new(0),
                transitions: Mutex::new(()),
            }),
        }
    }

    pub fn set_event_callback(&self, callback: impl Fn(&str, &str, &str) + Send + Sync + 'static) {
        let mut slot = self.inner.callback.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(Arc::new(callback));
    }

    /// Start the background loop. Must be called inside a tokio runtime;
    /// calling it while running does nothing.
    pub fn start(&self) {
        let mut handle = lock(&self.inner.loop_handle);
        if handle.as_ref().is_some_and(|h| !h.task.is_finished()) {
            debug!("Scheduler already running");
            return;
        }

        let (stop, stop_rx) = watch::channel(false);
        let scheduler = self.clone();
        let task = tokio::spawn(async move { scheduler.run_loop(stop_rx).await });
        *handle = Some(LoopHandle { stop, task });
        info!(poll_interval = ?self.inner.settings.poll_interval, "Scheduler started");
    }

    /// Stop the loop and wait for it to exit. In-flight downloads keep
    /// running; a tick that is writing to the store finishes first.
    pub async fn stop(&self) {
        let Some(handle) = lock(&self.inner.loop_handle).take() else {
            return;
        };

        let _ = handle.stop.send(true);
        if let Err(e) = handle.task.await {
            warn!(error = %e, "Scheduler loop ended abnormally");
        }
        info!("Scheduler stopped");
    }

    /// Whether the loop task is alive
    pub fn is_running(&self) -> bool {
        lock(&self.inner.loop_handle)
            .as_ref()
            .is_some_and(|h| !h.task.is_finished())
    }

    /// Validate and persist a job (replacing one with the same id), then
    /// emit `SCHEDULED` before returning its id
    pub fn schedule_job(&self, job: ScheduledJob) -> Result<String> {
        job.validate()?;
        {
            let _guard = lock(&self.inner.transitions);
            self.inner.store.upsert(&job)?;
        }

        let next = job
            .next_run()
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        self.emit(
            scheduler_event::SCHEDULED,
            &job.job_id,
            &format!(
                "{} job with {} URL(s), next run {next}",
                job.schedule_type,
                job.urls.len()
            ),
        );
        Ok(job.job_id)
    }

    /// Remove a job. Returns false when no such job exists.
    pub fn cancel_job(&self, job_id: &str) -> Result<bool> {
        let removed = {
            let _guard = lock(&self.inner.transitions);
            self.inner.store.remove(job_id)?
        };
        if removed {
            self.emit(scheduler_event::CANCELLED, job_id, "Scheduled job removed");
        }
        Ok(removed)
    }

    /// Set the enabled flag. Returns false when no such job exists.
    pub fn enable_job(&self, job_id: &str, enabled: bool) -> Result<bool> {
        {
            let _guard = lock(&self.inner.transitions);
            let Some(mut job) = self.inner.store.get(job_id)? else {
                return Ok(false);
            };
            job.enabled = enabled;
            self.inner.store.upsert(&job)?;
        }

        let (event, message) = if enabled {
            (scheduler_event::ENABLED, "Scheduled job enabled")
        } else {
            (scheduler_event::DISABLED, "Scheduled job disabled")
        };
        self.emit(event, job_id, message);
        Ok(true)
    }

    /// Start a known job right away on a background task.
    /// Returns false, without side effects, for an unknown id.
    pub fn trigger_job_now(&self, job_id: &str) -> Result<bool> {
        let Some(job) = self.begin_trigger(job_id, Utc::now(), false)? else {
            return Ok(false);
        };
        self.spawn_execution(job);
        Ok(true)
    }

    /// Trigger a known job and wait for all of its URLs to finish
    pub async fn run_job(&self, job_id: &str) -> Result<Vec<DownloadJob>> {
        let job = self
            .begin_trigger(job_id, Utc::now(), false)?
            .ok_or_else(|| SchedulerError::NotFound(job_id.to_string()))?;
        self.execute(job).await
    }

    /// Request cancellation of every in-flight execution of a job.
    /// Returns false when none is running.
    pub fn abort_job(&self, job_id: &str) -> bool {
        let mut aborted = 0;
        for run in lock(&self.inner.active).values() {
            if run.job_id == job_id {
                run.cancel.cancel();
                aborted += 1;
            }
        }
        if aborted > 0 {
            info!(job_id, executions = aborted, "Cancellation requested for running job");
        }
        aborted > 0
    }

    /// Ids of jobs with at least one execution in flight, sorted
    pub fn running_jobs(&self) -> Vec<String> {
        lock(&self.inner.active)
            .values()
            .map(|run| run.job_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn is_in_flight(&self, job_id: &str) -> bool {
        lock(&self.inner.active).values().any(|run| run.job_id == job_id)
    }

    pub fn get_all_jobs(&self) -> Result<Vec<ScheduledJob>> {
        self.inner.store.list()
    }

    pub fn get_job(&self, job_id: &str) -> Result<Option<ScheduledJob>> {
        self.inner.store.get(job_id)
    }

    /// Enabled jobs whose next run is at or before `now`
    pub fn due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledJob>> {
        Ok(self
            .inner
            .store
            .list()?
            .into_iter()
            .filter(|job| job.is_due(now))
            .collect())
    }

    async fn run_loop(&self, mut stop: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.inner.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Scheduler loop exited");
    }

    /// One scan. Store reads and trigger writes run on the blocking pool;
    /// a failure there is logged and the loop carries on.
    async fn tick(&self) {
        let scheduler = self.clone();
        let now = Utc::now();
        match tokio::task::spawn_blocking(move || scheduler.claim_due(now)).await {
            Ok(claimed) => {
                for job in claimed {
                    self.spawn_execution(job);
                }
            }
            Err(e) => error!(error = %e, "Due-time scan aborted"),
        }
    }

    /// Mark every due job as triggered and return them. Each job is judged
    /// on its own: one that cannot be evaluated or persisted is reported as
    /// an `ERROR` event and skipped. Jobs still running from an earlier
    /// trigger are left for a later tick.
    fn claim_due(&self, now: DateTime<Utc>) -> Vec<ScheduledJob> {
        let jobs = match self.inner.store.list() {
            Ok(jobs) => jobs,
            Err(e) => {
                error!(error = %e, "Failed to scan scheduled jobs");
                return Vec::new();
            }
        };

        let mut claimed = Vec::new();
        for job in jobs {
            if !job.enabled {
                continue;
            }
            match job.next_run() {
                Some(next) if next <= now => {}
                Some(_) => continue,
                None => {
                    if job.schedule_type != ScheduleType::Once {
                        warn!(job_id = %job.job_id, "Scheduled job has no representable next run; skipping");
                    }
                    continue;
                }
            }
            if self.is_in_flight(&job.job_id) {
                debug!(job_id = %job.job_id, "Previous run still in flight; deferring");
                continue;
            }

            match self.begin_trigger(&job.job_id, now, true) {
                Ok(Some(job)) => claimed.push(job),
                Ok(None) => {}
                Err(e) => {
                    error!(job_id = %job.job_id, error = %e, "Failed to trigger scheduled job");
                    self.emit(scheduler_event::ERROR, &job.job_id, &e.to_string());
                }
            }
        }
        claimed
    }

    /// Record the trigger before anything runs: `last_run` is set (and once
    /// jobs disabled) and persisted, so a restart never repeats this run.
    fn begin_trigger(
        &self,
        job_id: &str,
        now: DateTime<Utc>,
        require_due: bool,
    ) -> Result<Option<ScheduledJob>> {
        let _guard = lock(&self.inner.transitions);

        let Some(mut job) = self.inner.store.get(job_id)? else {
            return Ok(None);
        };
        if require_due && !job.is_due(now) {
            return Ok(None);
        }

        job.last_run = Some(now);
        if job.schedule_type == ScheduleType::Once {
            job.enabled = false;
        }
        self.inner.store.upsert(&job)?;
        Ok(Some(job))
    }

    fn spawn_execution(&self, job: ScheduledJob) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let job_id = job.job_id.clone();
            if let Err(e) = scheduler.execute(job).await {
                error!(job_id = %job_id, error = %e, "Scheduled job execution failed");
            }
        });
    }

    /// Download each URL in turn, recording every one in history
    async fn execute(&self, job: ScheduledJob) -> Result<Vec<DownloadJob>> {
        let folder = job
            .output_folder
            .clone()
            .unwrap_or_else(|| self.inner.settings.output_folder.clone());
        let options = job
            .options
            .clone()
            .unwrap_or_else(|| self.inner.settings.options.clone());

        let cancel = CancelToken::new();
        let execution = self.inner.next_execution.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.active).insert(
            execution,
            ActiveRun {
                job_id: job.job_id.clone(),
                cancel: cancel.clone(),
            },
        );
        let guard = ExecutionGuard {
            active: &self.inner.active,
            execution,
        };

        self.emit(
            scheduler_event::TRIGGERED,
            &job.job_id,
            &format!("Running {} URL(s)", job.urls.len()),
        );

        let mut records = Vec::with_capacity(job.urls.len());
        for url in &job.urls {
            if cancel.is_cancelled() {
                info!(job_id = %job.job_id, url, "Skipping remaining URLs after cancellation");
                break;
            }

            let run = self
                .inner
                .runner
                .run(url, &folder, &options, cancel.clone(), Callbacks::default())
                .await;
            match run {
                Ok(record) => records.push(record),
                Err(e) => {
                    drop(guard);
                    self.emit(scheduler_event::ERROR, &job.job_id, &e.to_string());
                    return Err(e.into());
                }
            }
        }
        drop(guard);

        let completed = records
            .iter()
            .filter(|r| r.status == JobStatus::Completed)
            .count();
        if completed == job.urls.len() {
            self.emit(
                scheduler_event::COMPLETED,
                &job.job_id,
                &format!("{completed}/{} URL(s) completed", job.urls.len()),
            );
        } else {
            let reason = records
                .iter()
                .find_map(|r| r.error_message.clone())
                .unwrap_or_else(|| "download did not complete".to_string());
            self.emit(
                scheduler_event::FAILED,
                &job.job_id,
                &format!("{completed}/{} URL(s) completed: {reason}", job.urls.len()),
            );
        }

        Ok(records)
    }

    fn emit(&self, event: &str, job_id: &str, message: &str) {
        info!(event, job_id, "{}", message);
        let callback = self
            .inner
            .callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback {
            callback(event, job_id, message);
        }
    }
}
