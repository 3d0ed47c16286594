mod locks;
mod models;
mod service;

pub use locks::{KeyGuard, KeyedLocks};
pub use models::{DEFAULT_LIST_LIMIT, DlqFilter, DlqStats, MAX_LIST_LIMIT, PageRequest, RetryOutcome};
pub use service::DeadLetterQueue;
