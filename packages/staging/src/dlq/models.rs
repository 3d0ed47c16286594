use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::{ClassifiedError, EntryStatus, ErrorCategory};
use serde::{Deserialize, Serialize};

use crate::entity::dead_letter_entry;

pub const DEFAULT_LIST_LIMIT: u64 = 50;
pub const MAX_LIST_LIMIT: u64 = 1000;

/// Listing filter. Unset dimensions match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DlqFilter {
    pub category: Option<ErrorCategory>,
    pub status: Option<EntryStatus>,
}

impl DlqFilter {
    pub fn category(category: ErrorCategory) -> Self {
        Self {
            category: Some(category),
            ..Default::default()
        }
    }

    pub fn status(status: EntryStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct PageRequest {
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: u64,
}

impl PageRequest {
    pub fn new(limit: u64, offset: u64) -> Self {
        Self {
            limit: Some(limit),
            offset,
        }
    }

    /// Requested limit, defaulted and clamped to `[1, MAX_LIST_LIMIT]`.
    pub fn effective_limit(&self) -> u64 {
        self.limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT)
    }
}

/// Snapshot of the dead-letter queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DlqStats {
    pub total_entries: u64,
    pub total_added: u64,
    pub total_removed: u64,
    pub total_retries: u64,
    pub total_expired: u64,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
    /// Live entries per category; every category is present, possibly with zero.
    pub entries_by_category: BTreeMap<ErrorCategory, u64>,
}

/// Result of one reapplication attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome {
    /// Applied; the entry is gone and its WAL records are confirmed.
    Applied,
    /// Still failing; the entry was updated in place.
    Failed {
        entry: Box<dead_letter_entry::Model>,
        error: ClassifiedError,
    },
    /// A concurrent attempt already handled the entry.
    Skipped,
}

impl RetryOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}
