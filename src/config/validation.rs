use super::models::Config;
use crate::handlers::OptionsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("scheduler.poll_interval_secs must be positive")]
    ZeroPollInterval,

    #[error("storage.history_path and storage.schedule_path must differ (both {path})")]
    SharedStoragePath { path: String },

    #[error("engine.binary must not be empty")]
    EmptyEngineBinary,

    #[error("downloads: {0}")]
    InvalidDownloads(#[from] OptionsError),
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_scheduler(config)?;
    validate_storage(config)?;
    validate_engine(config)?;
    config.downloads.validate()?;
    Ok(())
}

fn validate_scheduler(config: &Config) -> Result<(), ValidationError> {
    if config.scheduler.poll_interval_secs == 0 {
        return Err(ValidationError::ZeroPollInterval);
    }
    Ok(())
}

/// Each store owns its own keyspace directory
fn validate_storage(config: &Config) -> Result<(), ValidationError> {
    if config.storage.history_path == config.storage.schedule_path {
        return Err(ValidationError::SharedStoragePath {
            path: config.storage.history_path.display().to_string(),
        });
    }
    Ok(())
}

fn validate_engine(config: &Config) -> Result<(), ValidationError> {
    if config.engine.binary.trim().is_empty() {
        return Err(ValidationError::EmptyEngineBinary);
    }
    Ok(())
}
