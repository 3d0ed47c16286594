#[cfg(feature = "sea-orm")]
use sea_orm::prelude::StringLen;

use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;
use std::io::ErrorKind;
use std::str::FromStr;

use crate::apply::ApplyError;

/// Cause of a failed apply, used for diagnostics grouping and backoff tuning.
///
/// When the `sea-orm` feature is enabled, this enum can be stored directly in SeaORM entities.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Nothing recognisable in the failure.
    #[default]
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "unknown"))]
    Unknown,
    /// Network or connection failure.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "connection"))]
    Connection,
    /// The operation ran out of time.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "timeout"))]
    Timeout,
    /// Malformed or rejected data. Retrying rarely helps.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "validation"))]
    Validation,
    /// The store failed the write for a reason of its own.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "database"))]
    Database,
    /// A resource limit was hit.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "capacity"))]
    Capacity,
}

impl ErrorCategory {
    /// The full taxonomy, in declaration order.
    pub const ALL: &'static [ErrorCategory] = &[
        Self::Unknown,
        Self::Connection,
        Self::Timeout,
        Self::Validation,
        Self::Database,
        Self::Capacity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Connection => "connection",
            Self::Timeout => "timeout",
            Self::Validation => "validation",
            Self::Database => "database",
            Self::Capacity => "capacity",
        }
    }

    /// Multiplier applied to the base backoff schedule for this category.
    pub fn backoff_factor(&self) -> f64 {
        match self {
            Self::Capacity => 2.0,
            Self::Database => 1.5,
            _ => 1.0,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error when parsing an invalid category string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseCategoryError {
    invalid: String,
}

impl fmt::Display for ParseCategoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid category '{}'. Valid values: {}",
            self.invalid,
            ErrorCategory::ALL
                .iter()
                .map(|c| c.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

impl std::error::Error for ParseCategoryError {}

impl FromStr for ErrorCategory {
    type Err = ParseCategoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| ParseCategoryError {
                invalid: s.to_string(),
            })
    }
}

/// A failure message together with its category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub category: ErrorCategory,
    pub message: String,
}

impl ClassifiedError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }

    /// Classify `err` and keep its display message.
    pub fn from_error(err: &(dyn StdError + 'static)) -> Self {
        Self::new(classify(err), err.to_string())
    }
}

impl From<&ApplyError> for ClassifiedError {
    fn from(err: &ApplyError) -> Self {
        Self::from_error(err)
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)
    }
}

/// Map any failure to exactly one category.
///
/// Known error shapes anywhere in the source chain win; otherwise the chain's
/// messages are matched against keywords. Unrecognised failures are `Unknown`.
pub fn classify(err: &(dyn StdError + 'static)) -> ErrorCategory {
    let mut messages = Vec::new();
    let mut current = Some(err);

    while let Some(e) = current {
        if let Some(category) = recognise(e) {
            return category;
        }
        messages.push(e.to_string());
        current = e.source();
    }

    messages
        .iter()
        .map(|m| classify_message(m))
        .find(|c| *c != ErrorCategory::Unknown)
        .unwrap_or_default()
}

/// Keyword classification of a bare failure message (case-insensitive).
pub fn classify_message(message: &str) -> ErrorCategory {
    const RULES: &[(ErrorCategory, &[&str])] = &[
        (
            ErrorCategory::Connection,
            &["connection", "connect", "refused", "reset", "network"],
        ),
        (ErrorCategory::Timeout, &["timeout", "deadline", "timed out"]),
        (
            ErrorCategory::Validation,
            &["invalid", "validation", "malformed", "parse"],
        ),
        (ErrorCategory::Database, &["database", "db", "sql", "query"]),
        (
            ErrorCategory::Capacity,
            &["capacity", "full", "limit", "exceeded"],
        ),
    ];

    let lowered = message.to_lowercase();
    RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lowered.contains(k)))
        .map(|(category, _)| *category)
        .unwrap_or_default()
}

fn recognise(err: &(dyn StdError + 'static)) -> Option<ErrorCategory> {
    if let Some(apply) = err.downcast_ref::<ApplyError>() {
        return match apply {
            ApplyError::Connection(_) => Some(ErrorCategory::Connection),
            ApplyError::Timeout(_) => Some(ErrorCategory::Timeout),
            ApplyError::Validation(_) => Some(ErrorCategory::Validation),
            ApplyError::Store(_) => Some(ErrorCategory::Database),
            ApplyError::Capacity(_) => Some(ErrorCategory::Capacity),
            // `transparent` skips the wrapped error itself in `source()`, so walk it here.
            ApplyError::Other(inner) => inner.chain().find_map(recognise),
        };
    }
    recognise_leaf(err)
}

fn recognise_leaf(err: &(dyn StdError + 'static)) -> Option<ErrorCategory> {
    if let Some(io) = err.downcast_ref::<std::io::Error>() {
        return recognise_io(io.kind());
    }
    if err.is::<tokio::time::error::Elapsed>() {
        return Some(ErrorCategory::Timeout);
    }
    if err.is::<serde_json::Error>() {
        return Some(ErrorCategory::Validation);
    }
    recognise_db(err)
}

fn recognise_io(kind: ErrorKind) -> Option<ErrorCategory> {
    match kind {
        ErrorKind::ConnectionRefused
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::NotConnected
        | ErrorKind::BrokenPipe
        | ErrorKind::AddrNotAvailable => Some(ErrorCategory::Connection),
        ErrorKind::TimedOut => Some(ErrorCategory::Timeout),
        ErrorKind::InvalidData | ErrorKind::InvalidInput | ErrorKind::UnexpectedEof => {
            Some(ErrorCategory::Validation)
        }
        ErrorKind::OutOfMemory | ErrorKind::StorageFull => Some(ErrorCategory::Capacity),
        _ => None,
    }
}

#[cfg(feature = "sea-orm")]
fn recognise_db(err: &(dyn StdError + 'static)) -> Option<ErrorCategory> {
    use sea_orm::DbErr;

    err.downcast_ref::<DbErr>().map(|db| match db {
        DbErr::ConnectionAcquire(_) | DbErr::Conn(_) => ErrorCategory::Connection,
        _ => ErrorCategory::Database,
    })
}

#[cfg(not(feature = "sea-orm"))]
fn recognise_db(_err: &(dyn StdError + 'static)) -> Option<ErrorCategory> {
    None
}
