mod service;

pub use service::{WalHealthReport, WalStats, WriteAheadLog};
