use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A playback record applied to the persistent store.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "playback_event")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    #[sea_orm(unique)]
    pub event_id: String,

    #[sea_orm(indexed)]
    pub source: String,

    #[sea_orm(indexed)]
    pub username: Option<String>,

    pub media_title: Option<String>,

    #[sea_orm(indexed)]
    pub occurred_at: DateTimeUtc,

    #[sea_orm(column_type = "JsonBinary")]
    pub payload: serde_json::Value,

    pub applied_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
