use std::time::Duration;

use thiserror::Error;

/// Failure reported by the step that applies an event to the persistent store.
///
/// The variants are the shapes the classifier recognises directly; anything
/// else travels through `Other` and is classified from its source chain.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("connection to store failed: {0}")]
    Connection(String),

    #[error("apply timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid event: {0}")]
    Validation(String),

    #[error("store rejected write: {0}")]
    Store(String),

    #[error("store capacity exhausted: {0}")]
    Capacity(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
