use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

use super::error::{Result, SchedulerError};
use super::recurrence;
use crate::handlers::DownloadOptions;

/// One year; longer intervals are rejected when a job is scheduled
pub const MAX_INTERVAL_MINUTES: i64 = 366 * 24 * 60;

/// Event names passed to the scheduler callback
pub mod scheduler_event {
    pub const SCHEDULED: &str = "SCHEDULED";
    pub const CANCELLED: &str = "CANCELLED";
    pub const ENABLED: &str = "ENABLED";
    pub const DISABLED: &str = "DISABLED";
    pub const TRIGGERED: &str = "TRIGGERED";
    pub const COMPLETED: &str = "COMPLETED";
    pub const FAILED: &str = "FAILED";
    pub const ERROR: &str = "ERROR";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleType {
    Once,
    Daily,
    Weekly,
    Interval,
}

impl ScheduleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleType::Once => "once",
            ScheduleType::Daily => "daily",
            ScheduleType::Weekly => "weekly",
            ScheduleType::Interval => "interval",
        }
    }
}

impl fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduleType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "once" => Ok(ScheduleType::Once),
            "daily" => Ok(ScheduleType::Daily),
            "weekly" => Ok(ScheduleType::Weekly),
            "interval" => Ok(ScheduleType::Interval),
            other => Err(format!("unknown schedule type: {other}")),
        }
    }
}

/// A persisted directive to download one or more URLs at computed times
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub job_id: String,
    pub urls: Vec<String>,
    pub schedule_type: ScheduleType,
    /// Reference time: the first run, and the anchor for daily/weekly cycles
    pub scheduled_time: DateTime<Utc>,
    /// Only meaningful for `interval` jobs
    #[serde(default)]
    pub interval_minutes: i64,
    pub enabled: bool,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub output_folder: Option<PathBuf>,
    /// Overrides the configured download defaults
    #[serde(default)]
    pub options: Option<DownloadOptions>,
}

impl ScheduledJob {
    pub fn new(schedule_type: ScheduleType, urls: Vec<String>, scheduled_time: DateTime<Utc>) -> Self {
        Self {
            job_id: Uuid::now_v7().to_string(),
            urls,
            schedule_type,
            scheduled_time,
            interval_minutes: 0,
            enabled: true,
            last_run: None,
            created_at: Utc::now(),
            output_folder: None,
            options: None,
        }
    }

    pub fn once(urls: Vec<String>, at: DateTime<Utc>) -> Self {
        Self::new(ScheduleType::Once, urls, at)
    }

    pub fn daily(urls: Vec<String>, at: DateTime<Utc>) -> Self {
        Self::new(ScheduleType::Daily, urls, at)
    }

    pub fn weekly(urls: Vec<String>, at: DateTime<Utc>) -> Self {
        Self::new(ScheduleType::Weekly, urls, at)
    }

    pub fn interval(urls: Vec<String>, start: DateTime<Utc>, minutes: i64) -> Self {
        Self {
            interval_minutes: minutes,
            ..Self::new(ScheduleType::Interval, urls, start)
        }
    }

    pub fn with_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = job_id.into();
        self
    }

    pub fn with_output_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.output_folder = Some(folder.into());
        self
    }

    pub fn with_options(mut self, options: DownloadOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Reject jobs that could never run correctly
    pub fn validate(&self) -> Result<()> {
        if self.job_id.trim().is_empty() {
            return Err(SchedulerError::InvalidJob("job id must not be empty".to_string()));
        }
        if self.urls.is_empty() {
            return Err(SchedulerError::InvalidJob("at least one URL is required".to_string()));
        }
        if self.urls.iter().any(|url| url.trim().is_empty()) {
            return Err(SchedulerError::InvalidJob("URLs must not be empty".to_string()));
        }
        if self.schedule_type == ScheduleType::Interval
            && !(1..=MAX_INTERVAL_MINUTES).contains(&self.interval_minutes)
        {
            return Err(SchedulerError::InvalidJob(format!(
                "interval must be between 1 and {MAX_INTERVAL_MINUTES} minutes, got {}",
                self.interval_minutes
            )));
        }
        if self.schedule_type != ScheduleType::Once && self.next_run().is_none() {
            return Err(SchedulerError::InvalidJob(format!(
                "scheduled time {} leaves no representable next run",
                self.scheduled_time.to_rfc3339()
            )));
        }
        if let Some(options) = &self.options {
            options
                .validate()
                .map_err(|e| SchedulerError::InvalidJob(e.to_string()))?;
        }
        Ok(())
    }

    /// Next time this job should fire, if any
    pub fn next_run(&self) -> Option<DateTime<Utc>> {
        recurrence::next_run(self)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run().is_some_and(|next| next <= now)
    }
}
