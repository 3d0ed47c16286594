pub mod apply;
pub mod config;
pub mod database;
pub mod dlq;
pub mod entity;
pub mod error;
pub mod pipeline;
pub mod scheduler;
pub mod state;
pub mod wal;
