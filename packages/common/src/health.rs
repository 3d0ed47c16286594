use serde::{Deserialize, Serialize};
use std::fmt;

/// Backpressure label derived from the WAL's pending record count.
///
/// The WAL only surfaces this signal. Producers are expected to slow down or pause
/// intake once it reaches `Critical`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalHealth {
    Idle,
    Healthy,
    Moderate,
    Elevated,
    Critical,
}

impl WalHealth {
    pub const HEALTHY_BELOW: u64 = 1_000;
    pub const MODERATE_BELOW: u64 = 5_000;
    pub const ELEVATED_BELOW: u64 = 10_000;

    pub fn from_pending(pending: u64) -> Self {
        match pending {
            0 => Self::Idle,
            n if n < Self::HEALTHY_BELOW => Self::Healthy,
            n if n < Self::MODERATE_BELOW => Self::Moderate,
            n if n < Self::ELEVATED_BELOW => Self::Elevated,
            _ => Self::Critical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Healthy => "healthy",
            Self::Moderate => "moderate",
            Self::Elevated => "elevated",
            Self::Critical => "critical",
        }
    }

    /// Operator-facing description of the current backlog.
    pub fn message(&self, pending: u64) -> String {
        match self {
            Self::Idle => "No pending events; all staged events have been applied".into(),
            Self::Healthy => format!("{pending} events pending; processing normally"),
            Self::Moderate => format!("{pending} events pending; backlog is building"),
            Self::Elevated => {
                format!("{pending} events pending; downstream store is falling behind")
            }
            Self::Critical => format!(
                "{pending} events pending; producers should pause intake until the backlog drains"
            ),
        }
    }

    /// Whether producers may keep feeding events at full rate.
    pub fn accepts_intake(&self) -> bool {
        !matches!(self, Self::Critical)
    }
}

impl fmt::Display for WalHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
