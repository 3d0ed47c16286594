pub mod apply;
pub mod category;
pub mod config;
pub mod event;
pub mod health;
pub mod retry;
pub mod status;

pub use apply::ApplyError;
pub use category::{ClassifiedError, ErrorCategory, classify, classify_message};
pub use config::{DlqConfig, RetryConfig, WalConfig, retention_cutoff};
pub use event::SyncEvent;
pub use health::WalHealth;
pub use retry::RetryPolicy;
pub use status::EntryStatus;
