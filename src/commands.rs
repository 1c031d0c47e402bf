use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

use crate::cli::{DownloadArgs, HistoryCommand, ScheduleAddArgs, ScheduleCommand};
use mediafetch::config::{Config, ConfigError};
use mediafetch::handlers::{Callbacks, CancelToken, HandlerRegistry, SelectOptions};
use mediafetch::history::{HistoryError, HistoryStore, JobQuery};
use mediafetch::humanize::ByteSize;
use mediafetch::runner::DownloadRunner;
use mediafetch::scheduler::{ScheduleStore, ScheduledJob, Scheduler, SchedulerError, SchedulerSettings};

#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("{0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, CommandError>;

fn open_runner(config: &Config, select: SelectOptions) -> Result<DownloadRunner> {
    let history = HistoryStore::open(&config.storage.history_path)?;
    let registry = Arc::new(HandlerRegistry::from_config(&config.engine));
    Ok(DownloadRunner::new(registry, history, select))
}

fn open_scheduler(config: &Config) -> Result<Scheduler> {
    let runner = open_runner(config, SelectOptions::from(&config.selector))?;
    let store = ScheduleStore::open(&config.storage.schedule_path)?;
    Ok(Scheduler::new(store, runner, SchedulerSettings::from_config(config)))
}

/// Run the scheduler loop until a shutdown signal arrives
pub async fn run(config: &Config) -> Result<()> {
    let scheduler = open_scheduler(config)?;
    let jobs = scheduler.get_all_jobs()?;
    info!(jobs = jobs.len(), "Loaded scheduled jobs");

    scheduler.start();
    shutdown_signal().await;
    scheduler.stop().await;

    for job_id in scheduler.running_jobs() {
        info!(job_id = %job_id, "Download still in flight at shutdown");
    }
    Ok(())
}

/// Download one URL in the foreground; Ctrl+C cancels it
pub async fn download(config: &Config, args: DownloadArgs) -> Result<()> {
    let select = SelectOptions {
        use_universal_fallback: config.selector.use_universal_fallback && !args.no_universal,
        use_generic_fallback: config.selector.use_generic_fallback && !args.no_generic,
    };
    let runner = open_runner(config, select)?;
    let folder = args.output.unwrap_or_else(|| config.scheduler.output_folder.clone());

    let cancel = CancelToken::new();
    let on_signal = cancel.clone();
    let watcher = tokio::spawn(async move {
        shutdown_signal().await;
        on_signal.cancel();
    });

    let observer = Callbacks::new()
        .on_log(|message| println!("{message}"))
        .on_overall_progress(|completed, total| println!("[{completed}/{total}]"));
    let job = runner
        .run(&args.url, &folder, &config.downloads, cancel, observer)
        .await;
    watcher.abort();
    let job = job?;

    println!(
        "{} {} via {}: {} completed, {} failed, {} skipped",
        job.id,
        job.status,
        if job.engine.is_empty() { "-" } else { job.engine.as_str() },
        job.completed_items,
        job.failed_items,
        job.skipped_items
    );
    if let Some(message) = &job.error_message {
        println!("error: {message}");
    }
    Ok(())
}

pub async fn schedule(config: &Config, command: ScheduleCommand) -> Result<()> {
    let scheduler = open_scheduler(config)?;
    scheduler.set_event_callback(|event, job_id, message| println!("{event} {job_id}: {message}"));

    match command {
        ScheduleCommand::Add(args) => {
            let id = scheduler.schedule_job(scheduled_job(args))?;
            println!("{id}");
        }
        ScheduleCommand::List => {
            for job in scheduler.get_all_jobs()? {
                let next = job
                    .next_run()
                    .filter(|_| job.enabled)
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{}\t{}\t{}\tnext={}\t{}",
                    job.job_id,
                    job.schedule_type,
                    if job.enabled { "enabled" } else { "disabled" },
                    next,
                    job.urls.join(" ")
                );
            }
        }
        ScheduleCommand::Remove { id } => {
            if !scheduler.cancel_job(&id)? {
                return Err(CommandError::NotFound(format!("no scheduled job {id}")));
            }
        }
        ScheduleCommand::Enable { id } => {
            if !scheduler.enable_job(&id, true)? {
                return Err(CommandError::NotFound(format!("no scheduled job {id}")));
            }
        }
        ScheduleCommand::Disable { id } => {
            if !scheduler.enable_job(&id, false)? {
                return Err(CommandError::NotFound(format!("no scheduled job {id}")));
            }
        }
        ScheduleCommand::Trigger { id } => {
            for job in scheduler.run_job(&id).await? {
                println!("{} {} {}", job.id, job.status, job.url);
            }
        }
    }
    Ok(())
}

fn scheduled_job(args: ScheduleAddArgs) -> ScheduledJob {
    let mut job = ScheduledJob::new(args.kind, args.urls, args.at.unwrap_or_else(Utc::now));
    job.interval_minutes = args.every;
    if let Some(id) = args.id {
        job = job.with_id(id);
    }
    if let Some(folder) = args.output {
        job = job.with_output_folder(folder);
    }
    job
}

pub fn history(config: &Config, command: HistoryCommand) -> Result<()> {
    let store = HistoryStore::open(&config.storage.history_path)?;

    match command {
        HistoryCommand::List { status, limit, offset } => {
            for job in store.list_jobs(&JobQuery { status, limit, offset })? {
                println!(
                    "{}\t{}\t{}\t{}\t{}/{}",
                    job.id,
                    job.created_at.to_rfc3339(),
                    job.status,
                    job.url,
                    job.completed_items,
                    job.total_items
                );
            }
        }
        HistoryCommand::Show { id, events } => {
            let job = store
                .get_job(&id)?
                .ok_or_else(|| CommandError::NotFound(format!("no job {id}")))?;
            println!("{}", serde_json::to_string_pretty(&job).unwrap_or_default());
            for event in store.get_job_events(&id, events)? {
                println!(
                    "{}\t{}\t{}",
                    event.timestamp.to_rfc3339(),
                    event.event_type,
                    serde_json::Value::Object(event.payload)
                );
            }
        }
        HistoryCommand::Delete { id } => {
            if !store.delete_job(&id)? {
                return Err(CommandError::NotFound(format!("no job {id}")));
            }
        }
        HistoryCommand::Prune { keep } => {
            let deleted = store.clear_completed_jobs(keep.unwrap_or(config.retention.keep_completed))?;
            println!("deleted {deleted} completed job(s)");
        }
        HistoryCommand::Stats => {
            let stats = store.get_stats()?;
            for (status, count) in &stats.by_status {
                println!("{status}\t{count}");
            }
            println!("total\t{}", stats.total);
        }
    }
    Ok(())
}

pub fn sites(config: &Config) {
    let registry = HandlerRegistry::from_config(&config.engine);
    let sites = registry.supported_sites();
    if sites.is_empty() {
        println!("No site handlers available; direct file links only");
    }
    for site in sites {
        println!("{site}");
    }
    println!(
        "Default chunk size {}, size limits {}..{}",
        ByteSize(config.downloads.chunk_size),
        ByteSize(config.downloads.min_file_size),
        if config.downloads.max_file_size == 0 {
            "unbounded".to_string()
        } else {
            ByteSize(config.downloads.max_file_size).to_string()
        }
    );
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
