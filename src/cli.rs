use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use mediafetch::history::JobStatus;
use mediafetch::scheduler::ScheduleType;

#[derive(Parser, Debug)]
#[command(name = "mediafetch")]
#[command(about = "Download media collections now or on a schedule", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Configuration file (overrides MEDIAFETCH_CONFIG)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the scheduler until Ctrl+C or SIGTERM
    Run,
    /// Download a URL now and record it in history
    Download(DownloadArgs),
    /// Manage scheduled downloads
    #[command(subcommand)]
    Schedule(ScheduleCommand),
    /// Inspect and prune download history
    #[command(subcommand)]
    History(HistoryCommand),
    /// List the sites handlers are available for
    Sites,
}

#[derive(clap::Args, Debug)]
pub struct DownloadArgs {
    pub url: String,

    /// Output folder (defaults to scheduler.output_folder)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Do not fall back to the external engine
    #[arg(long)]
    pub no_universal: bool,

    /// Do not fall back to treating the URL as a direct file link
    #[arg(long)]
    pub no_generic: bool,
}

#[derive(Subcommand, Debug)]
pub enum ScheduleCommand {
    /// Schedule one or more URLs
    Add(ScheduleAddArgs),
    /// List scheduled jobs with their next run
    List,
    /// Remove a scheduled job
    Remove { id: String },
    /// Enable a scheduled job
    Enable { id: String },
    /// Disable a scheduled job without removing it
    Disable { id: String },
    /// Run a scheduled job now and wait for it
    Trigger { id: String },
}

#[derive(clap::Args, Debug)]
pub struct ScheduleAddArgs {
    #[arg(required = true)]
    pub urls: Vec<String>,

    /// once, daily, weekly or interval
    #[arg(long, default_value = "once")]
    pub kind: ScheduleType,

    /// Reference time in RFC 3339, e.g. 2025-03-01T18:30:00Z (defaults to now)
    #[arg(long)]
    pub at: Option<DateTime<Utc>>,

    /// Minutes between runs for interval jobs
    #[arg(long, default_value_t = 0)]
    pub every: i64,

    /// Explicit job id; an existing job with this id is replaced
    #[arg(long)]
    pub id: Option<String>,

    /// Output folder for this job
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum HistoryCommand {
    /// List recorded jobs, newest first
    List {
        #[arg(long)]
        status: Option<JobStatus>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Show one job and its events
    Show {
        id: String,
        #[arg(long, default_value_t = 1000)]
        events: usize,
    },
    /// Delete a job and its events
    Delete { id: String },
    /// Delete old completed jobs
    Prune {
        /// Completed jobs to keep (defaults to retention.keep_completed)
        #[arg(long)]
        keep: Option<usize>,
    },
    /// Job counts per status
    Stats,
}
