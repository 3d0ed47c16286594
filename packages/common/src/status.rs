use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of a dead-letter entry.
///
/// Never stored: always derived from the entry's retry count and the configured ceiling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    /// Failed once, no retry attempted yet.
    Pending,
    /// Retried at least once, still below the ceiling.
    Retrying,
    /// Reached the ceiling. Excluded from automatic retry.
    Permanent,
}

impl EntryStatus {
    pub const ALL: &'static [EntryStatus] = &[Self::Pending, Self::Retrying, Self::Permanent];

    pub fn derive(retry_count: u32, max_retries: u32) -> Self {
        if retry_count >= max_retries {
            Self::Permanent
        } else if retry_count == 0 {
            Self::Pending
        } else {
            Self::Retrying
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Retrying => "retrying",
            Self::Permanent => "permanent",
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "retrying" => Ok(Self::Retrying),
            "permanent" => Ok(Self::Permanent),
            _ => Err(format!(
                "Invalid status '{}'. Must be 'pending', 'retrying' or 'permanent'",
                s
            )),
        }
    }
}
