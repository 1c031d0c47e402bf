use thiserror::Error;

use crate::history::HistoryError;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Invalid scheduled job: {0}")]
    InvalidJob(String),

    #[error("Scheduled job not found: {0}")]
    NotFound(String),

    #[error("Fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("History error: {0}")]
    History(#[from] HistoryError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
