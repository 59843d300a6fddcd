use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] fieldsync_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No report fields provided")]
    EmptyReport,
    #[error("Invalid report field '{0}': expected key=value")]
    InvalidField(String),
    #[error("Report ID cannot be empty")]
    EmptyRecordId,
    #[error("Report not found for id/prefix: {0}")]
    RecordNotFound(String),
    #[error("{0}")]
    AmbiguousRecordId(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(
        "Sync is not configured. Run `fieldsync config init --submit-endpoint <URL>` or set FIELDSYNC_SUBMIT_ENDPOINT."
    )]
    SyncNotConfigured,
}
