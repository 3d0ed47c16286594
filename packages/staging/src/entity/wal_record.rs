use common::SyncEvent;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One staged event in the write-ahead log.
///
/// Pending while both `confirmed_at` and `discarded_at` are NULL.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "wal_record")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub sequence_id: i64,

    #[sea_orm(indexed)]
    pub event_id: String,

    /// Serialized `SyncEvent`.
    #[sea_orm(column_type = "Text")]
    pub payload: String,

    pub payload_bytes: i64,

    pub written_at: DateTimeUtc,

    #[sea_orm(indexed)]
    pub confirmed_at: Option<DateTimeUtc>,

    /// Set when the event was given up on without being applied.
    #[sea_orm(indexed)]
    pub discarded_at: Option<DateTimeUtc>,

    pub attempts: i32,

    pub last_attempt_at: Option<DateTimeUtc>,

    #[sea_orm(column_type = "Text", nullable)]
    pub last_error: Option<String>,
}

impl Model {
    pub fn is_pending(&self) -> bool {
        self.confirmed_at.is_none() && self.discarded_at.is_none()
    }

    pub fn decode_event(&self) -> Result<SyncEvent, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }
}

impl ActiveModelBehavior for ActiveModel {}
