//! Due-time computation, all in UTC

use chrono::{DateTime, Duration, Utc};

use super::models::{ScheduleType, ScheduledJob};

/// Next firing time of `job`, ignoring its enabled flag.
///
/// - once: the scheduled time until it has run, then never
/// - daily/weekly: the first `scheduled_time + k * period` (k >= 0) strictly
///   after the last run, or the scheduled time if it never ran
/// - interval: `interval_minutes` after the last run, or after the
///   scheduled time if it never ran
///
/// Returns `None` when the next time falls outside the representable range.
pub fn next_run(job: &ScheduledJob) -> Option<DateTime<Utc>> {
    match job.schedule_type {
        ScheduleType::Once => job.last_run.is_none().then_some(job.scheduled_time),
        ScheduleType::Daily => next_occurrence(job.scheduled_time, Duration::days(1), job.last_run),
        ScheduleType::Weekly => next_occurrence(job.scheduled_time, Duration::weeks(1), job.last_run),
        ScheduleType::Interval => {
            if job.interval_minutes <= 0 {
                return None;
            }
            let base = job.last_run.unwrap_or(job.scheduled_time);
            base.checked_add_signed(Duration::try_minutes(job.interval_minutes)?)
        }
    }
}

fn next_occurrence(
    anchor: DateTime<Utc>,
    period: Duration,
    after: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    let Some(after) = after else {
        return Some(anchor);
    };
    if after < anchor {
        return Some(anchor);
    }

    let period_ms = period.num_milliseconds();
    let elapsed_ms = after.signed_duration_since(anchor).num_milliseconds();
    let cycles = (elapsed_ms / period_ms).checked_add(1)?;
    let offset = Duration::try_milliseconds(cycles.checked_mul(period_ms)?)?;
    anchor.checked_add_signed(offset)
}
