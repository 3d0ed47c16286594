use sea_orm::DbErr;
use thiserror::Error;

/// Systemic failures of the staging subsystem.
///
/// Failures of the apply step never surface here; they become dead-letter state.
#[derive(Debug, Error)]
pub enum StagingError {
    #[error("database error: {0}")]
    Database(#[from] DbErr),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("dead-letter entry not found: {0}")]
    EntryNotFound(String),
}

pub type Result<T, E = StagingError> = std::result::Result<T, E>;
