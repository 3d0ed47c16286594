use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::{ApplyError, SyncEvent};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, Set, SqlErr,
};
use tracing::debug;

use crate::entity::playback_event;

/// The store-write step shared by ingestion, recovery and dead-letter retries.
#[async_trait]
pub trait EventApplier: Send + Sync {
    /// Apply `event` to the persistent store. Must be idempotent per `event_id`.
    async fn apply(&self, event: &SyncEvent) -> Result<(), ApplyError>;

    /// Whether `event_id` is already present in the store.
    async fn is_applied(&self, _event_id: &str) -> Result<bool, ApplyError> {
        Ok(false)
    }
}

/// Run `applier.apply` bounded by `timeout`; running out of time is an `ApplyError::Timeout`.
pub async fn apply_with_timeout(
    applier: &dyn EventApplier,
    event: &SyncEvent,
    timeout: Duration,
) -> Result<(), ApplyError> {
    match tokio::time::timeout(timeout, applier.apply(event)).await {
        Ok(result) => result,
        Err(_) => Err(ApplyError::Timeout(timeout)),
    }
}

/// Writes events into the `playback_event` table.
pub struct DatabaseApplier {
    db: DatabaseConnection,
}

impl DatabaseApplier {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl EventApplier for DatabaseApplier {
    async fn apply(&self, event: &SyncEvent) -> Result<(), ApplyError> {
        event.validate().map_err(ApplyError::Validation)?;

        let model = playback_event::ActiveModel {
            event_id: Set(event.event_id.clone()),
            source: Set(event.source.clone()),
            username: Set(event.username.clone()),
            media_title: Set(event.media_title.clone()),
            occurred_at: Set(event.occurred_at),
            payload: Set(event.payload.clone()),
            applied_at: Set(Utc::now()),
            ..Default::default()
        };

        match model.insert(&self.db).await {
            Ok(_) => Ok(()),
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                debug!(event_id = %event.event_id, "Event already applied");
                Ok(())
            }
            Err(e) => Err(map_db_err(e)),
        }
    }

    async fn is_applied(&self, event_id: &str) -> Result<bool, ApplyError> {
        let count = playback_event::Entity::find()
            .filter(playback_event::Column::EventId.eq(event_id))
            .count(&self.db)
            .await
            .map_err(map_db_err)?;

        Ok(count > 0)
    }
}

fn map_db_err(e: DbErr) -> ApplyError {
    match e {
        DbErr::ConnectionAcquire(_) | DbErr::Conn(_) => ApplyError::Connection(e.to_string()),
        _ => ApplyError::Store(e.to_string()),
    }
}
