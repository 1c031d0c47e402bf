/// Recurring download scheduler
///
/// Scheduled jobs are persisted in their own Fjall keyspace (partition
/// `schedules`, key `sched:{job_id}`). A single background task polls for due
/// jobs; each trigger is recorded before it runs and every URL it downloads
/// lands in the history store.
///
/// ## Recurrence
///
/// - `once`: fires at its scheduled time, then is disabled
/// - `daily` / `weekly`: fire at the scheduled time of day (and weekday)
/// - `interval`: fires every N minutes after the last run
///
/// ## Usage
///
/// ```rust,ignore
/// use mediafetch::scheduler::{ScheduledJob, Scheduler, ScheduleStore, SchedulerSettings};
///
/// let scheduler = Scheduler::new(ScheduleStore::open("data/schedules")?, runner, settings);
/// scheduler.schedule_job(ScheduledJob::daily(vec![url], at))?;
/// scheduler.start();
/// ```

pub mod error;
pub mod models;
pub mod recurrence;
pub mod service;
pub mod store;

pub use error::{Result, SchedulerError};
pub use models::{MAX_INTERVAL_MINUTES, ScheduleType, ScheduledJob, scheduler_event};
pub use service::{EventCallback, Scheduler, SchedulerSettings};
pub use store::ScheduleStore;
