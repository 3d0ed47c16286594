use common::{EntryStatus, ErrorCategory, SyncEvent};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// An event whose application to the store failed.
///
/// `id` only provides insertion order; `event_id` is the identity.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "dead_letter_entry")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    #[sea_orm(unique)]
    pub event_id: String,

    /// Identity of the delivery attempt that failed most recently.
    pub message_id: String,

    #[sea_orm(indexed)]
    pub source: String,

    pub username: Option<String>,

    pub media_title: Option<String>,

    /// Serialized `SyncEvent`, replayed on retry.
    #[sea_orm(column_type = "Text")]
    pub payload: String,

    /// First failure message. Never changes after creation.
    #[sea_orm(column_type = "Text")]
    pub original_error: String,

    #[sea_orm(column_type = "Text")]
    pub last_error: String,

    #[sea_orm(indexed)]
    pub retry_count: i32,

    pub first_failure: DateTimeUtc,

    #[sea_orm(indexed)]
    pub last_failure: DateTimeUtc,

    #[sea_orm(indexed)]
    pub next_retry: DateTimeUtc,

    #[sea_orm(indexed)]
    pub category: ErrorCategory,
}

impl Model {
    /// Derived from the retry count on every call; never stored.
    pub fn status(&self, max_retries: u32) -> EntryStatus {
        EntryStatus::derive(self.retry_count.max(0) as u32, max_retries)
    }

    pub fn decode_event(&self) -> Result<SyncEvent, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }
}

impl ActiveModelBehavior for ActiveModel {}
