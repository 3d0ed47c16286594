use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use common::{SyncEvent, WalConfig, WalHealth};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::entity::wal_record;
use crate::error::{Result, StagingError};

/// SQLite caps bound parameters per statement.
const DELETE_CHUNK: usize = 500;

/// Snapshot of the log's aggregate counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalStats {
    pub pending_count: u64,
    pub confirmed_count: u64,
    pub discarded_count: u64,
    pub total_writes: u64,
    pub total_confirms: u64,
    pub total_discards: u64,
    pub total_retries: u64,
    pub last_compaction: Option<DateTime<Utc>>,
    pub storage_size_bytes: u64,
}

/// Backpressure signal for producers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalHealthReport {
    pub status: WalHealth,
    pub pending_count: u64,
    pub message: String,
    pub accepts_intake: bool,
}

/// Counters shared by every mutator of the log.
///
/// `pending` is a gauge seeded from the store on open. `confirmed` and `discarded`
/// are seeded the same way and only ever grow; compaction lowers `storage_bytes`
/// alone. The `total_*` counters start at zero for each process.
#[derive(Debug, Default)]
struct WalCounters {
    pending: AtomicU64,
    confirmed: AtomicU64,
    discarded: AtomicU64,
    total_writes: AtomicU64,
    total_confirms: AtomicU64,
    total_discards: AtomicU64,
    total_retries: AtomicU64,
    storage_bytes: AtomicU64,
    /// Unix millis of the last compaction, 0 if none yet.
    last_compaction_ms: AtomicI64,
}

impl WalCounters {
    fn settle(&self, rows: u64, gauge: &AtomicU64, total: &AtomicU64) {
        if rows == 0 {
            return;
        }
        // Never underflow if the store was edited behind our back.
        let _ = self
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |p| {
                Some(p.saturating_sub(rows))
            });
        gauge.fetch_add(rows, Ordering::SeqCst);
        total.fetch_add(rows, Ordering::SeqCst);
    }
}

/// Durable staging log backed by the `wal_record` table.
///
/// Every event is recorded here before anything tries to apply it, so a record
/// without `confirmed_at`/`discarded_at` survives restarts and is re-offered by
/// [`WriteAheadLog::pending`].
pub struct WriteAheadLog {
    db: DatabaseConnection,
    config: WalConfig,
    counters: WalCounters,
    /// Held for a whole compaction pass.
    compaction: Mutex<()>,
}

impl WriteAheadLog {
    /// Open the log and seed the gauges from what is already stored.
    pub async fn open(db: DatabaseConnection, config: WalConfig) -> Result<Self> {
        let pending = wal_record::Entity::find()
            .filter(pending_condition())
            .count(&db)
            .await?;
        let confirmed = wal_record::Entity::find()
            .filter(wal_record::Column::ConfirmedAt.is_not_null())
            .count(&db)
            .await?;
        let discarded = wal_record::Entity::find()
            .filter(wal_record::Column::DiscardedAt.is_not_null())
            .count(&db)
            .await?;

        let sizes: Vec<i64> = wal_record::Entity::find()
            .select_only()
            .column(wal_record::Column::PayloadBytes)
            .into_tuple()
            .all(&db)
            .await?;
        let storage_bytes = sizes.into_iter().map(stored_bytes).sum();

        let counters = WalCounters::default();
        counters.pending.store(pending, Ordering::SeqCst);
        counters.confirmed.store(confirmed, Ordering::SeqCst);
        counters.discarded.store(discarded, Ordering::SeqCst);
        counters.storage_bytes.store(storage_bytes, Ordering::SeqCst);

        info!(pending, confirmed, storage_bytes, "Write-ahead log opened");

        Ok(Self {
            db,
            config,
            counters,
            compaction: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &WalConfig {
        &self.config
    }

    /// Durably stage `event` and return its sequence id.
    #[instrument(skip(self, event), fields(event_id = %event.event_id))]
    pub async fn record(&self, event: &SyncEvent) -> Result<i64> {
        event.validate().map_err(StagingError::InvalidEvent)?;

        let payload = serde_json::to_string(event)?;
        let payload_bytes = payload.len() as i64;

        let model = wal_record::ActiveModel {
            event_id: Set(event.event_id.clone()),
            payload: Set(payload),
            payload_bytes: Set(payload_bytes),
            written_at: Set(Utc::now()),
            confirmed_at: Set(None),
            discarded_at: Set(None),
            attempts: Set(0),
            last_attempt_at: Set(None),
            last_error: Set(None),
            ..Default::default()
        }
        .insert(&self.db)
        .await?;

        let previous = self.counters.pending.fetch_add(1, Ordering::SeqCst);
        self.counters.total_writes.fetch_add(1, Ordering::SeqCst);
        self.counters
            .storage_bytes
            .fetch_add(payload_bytes as u64, Ordering::SeqCst);

        if WalHealth::from_pending(previous) != WalHealth::Critical
            && WalHealth::from_pending(previous + 1) == WalHealth::Critical
        {
            warn!(
                pending = previous + 1,
                "Write-ahead log backlog is critical; producers should pause intake"
            );
        }

        Ok(model.sequence_id)
    }

    /// Mark one record confirmed. Returns `false` if it was already settled or is unknown.
    #[instrument(skip(self))]
    pub async fn confirm(&self, sequence_id: i64) -> Result<bool> {
        let result = wal_record::Entity::update_many()
            .col_expr(wal_record::Column::ConfirmedAt, Expr::value(Utc::now()))
            .filter(wal_record::Column::SequenceId.eq(sequence_id))
            .filter(pending_condition())
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            debug!(sequence_id, "Record already settled, nothing to confirm");
            return Ok(false);
        }

        self.counters.settle(
            result.rows_affected,
            &self.counters.confirmed,
            &self.counters.total_confirms,
        );
        Ok(true)
    }

    /// Confirm every pending record of an event. Returns the number of records confirmed.
    #[instrument(skip(self))]
    pub async fn confirm_event(&self, event_id: &str) -> Result<u64> {
        let result = wal_record::Entity::update_many()
            .col_expr(wal_record::Column::ConfirmedAt, Expr::value(Utc::now()))
            .filter(wal_record::Column::EventId.eq(event_id))
            .filter(pending_condition())
            .exec(&self.db)
            .await?;

        self.counters.settle(
            result.rows_affected,
            &self.counters.confirmed,
            &self.counters.total_confirms,
        );
        Ok(result.rows_affected)
    }

    /// Stop offering an event that was given up on. Returns the number of records discarded.
    #[instrument(skip(self))]
    pub async fn discard_event(&self, event_id: &str) -> Result<u64> {
        let result = wal_record::Entity::update_many()
            .col_expr(wal_record::Column::DiscardedAt, Expr::value(Utc::now()))
            .filter(wal_record::Column::EventId.eq(event_id))
            .filter(pending_condition())
            .exec(&self.db)
            .await?;

        self.counters.settle(
            result.rows_affected,
            &self.counters.discarded,
            &self.counters.total_discards,
        );
        Ok(result.rows_affected)
    }

    /// Note one reapplication attempt of `event_id`, successful when `error` is `None`.
    pub async fn note_attempt(&self, event_id: &str, error: Option<&str>) -> Result<()> {
        use sea_orm::sea_query::ExprTrait;

        self.counters.total_retries.fetch_add(1, Ordering::SeqCst);

        wal_record::Entity::update_many()
            .col_expr(
                wal_record::Column::Attempts,
                Expr::col(wal_record::Column::Attempts).add(1),
            )
            .col_expr(wal_record::Column::LastAttemptAt, Expr::value(Utc::now()))
            .col_expr(
                wal_record::Column::LastError,
                Expr::value(error.map(str::to_owned)),
            )
            .filter(wal_record::Column::EventId.eq(event_id))
            .filter(pending_condition())
            .exec(&self.db)
            .await?;

        Ok(())
    }

    /// All unsettled records, oldest first.
    pub async fn pending(&self) -> Result<Vec<wal_record::Model>> {
        Ok(wal_record::Entity::find()
            .filter(pending_condition())
            .order_by_asc(wal_record::Column::SequenceId)
            .all(&self.db)
            .await?)
    }

    pub async fn get(&self, sequence_id: i64) -> Result<Option<wal_record::Model>> {
        Ok(wal_record::Entity::find_by_id(sequence_id)
            .one(&self.db)
            .await?)
    }

    /// Records of one event, oldest first.
    pub async fn records_for_event(&self, event_id: &str) -> Result<Vec<wal_record::Model>> {
        Ok(wal_record::Entity::find()
            .filter(wal_record::Column::EventId.eq(event_id))
            .order_by_asc(wal_record::Column::SequenceId)
            .all(&self.db)
            .await?)
    }

    /// Physically remove settled records older than the retention window.
    ///
    /// Only ever touches confirmed or discarded rows, so it can run alongside writers.
    /// The logical confirmed and discarded counts are unaffected.
    #[instrument(skip(self))]
    pub async fn compact(&self) -> Result<u64> {
        let _running = self.compaction.lock().await;
        let now = Utc::now();

        let Some(cutoff) = self.config.compaction_cutoff(now) else {
            debug!(
                retention_secs = self.config.compaction_retention_secs,
                "Retention window reaches past the earliest timestamp, nothing to compact"
            );
            self.mark_compacted(now);
            return Ok(0);
        };

        let eligible: Vec<(i64, i64)> = wal_record::Entity::find()
            .select_only()
            .column(wal_record::Column::SequenceId)
            .column(wal_record::Column::PayloadBytes)
            .filter(
                Condition::any()
                    .add(wal_record::Column::ConfirmedAt.lt(cutoff))
                    .add(wal_record::Column::DiscardedAt.lt(cutoff)),
            )
            .into_tuple()
            .all(&self.db)
            .await?;

        let mut removed = 0u64;
        let mut reclaimed = 0u64;

        for chunk in eligible.chunks(DELETE_CHUNK) {
            let ids: Vec<i64> = chunk.iter().map(|(id, _)| *id).collect();
            let result = wal_record::Entity::delete_many()
                .filter(wal_record::Column::SequenceId.is_in(ids))
                .exec(&self.db)
                .await?;
            if result.rows_affected == 0 {
                continue;
            }

            let bytes: u64 = chunk.iter().map(|(_, b)| stored_bytes(*b)).sum();
            let _ = self
                .counters
                .storage_bytes
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                    Some(v.saturating_sub(bytes))
                });
            removed += result.rows_affected;
            reclaimed += bytes;
        }

        self.mark_compacted(now);

        if removed > 0 {
            info!(removed, reclaimed_bytes = reclaimed, "Compacted write-ahead log");
        }
        Ok(removed)
    }

    fn mark_compacted(&self, at: DateTime<Utc>) {
        self.counters
            .last_compaction_ms
            .store(at.timestamp_millis(), Ordering::SeqCst);
    }

    pub fn stats(&self) -> WalStats {
        let c = &self.counters;
        let last_ms = c.last_compaction_ms.load(Ordering::SeqCst);

        WalStats {
            pending_count: c.pending.load(Ordering::SeqCst),
            confirmed_count: c.confirmed.load(Ordering::SeqCst),
            discarded_count: c.discarded.load(Ordering::SeqCst),
            total_writes: c.total_writes.load(Ordering::SeqCst),
            total_confirms: c.total_confirms.load(Ordering::SeqCst),
            total_discards: c.total_discards.load(Ordering::SeqCst),
            total_retries: c.total_retries.load(Ordering::SeqCst),
            last_compaction: (last_ms > 0)
                .then(|| Utc.timestamp_millis_opt(last_ms).single())
                .flatten(),
            storage_size_bytes: c.storage_bytes.load(Ordering::SeqCst),
        }
    }

    pub fn health(&self) -> WalHealthReport {
        let pending = self.counters.pending.load(Ordering::SeqCst);
        let status = WalHealth::from_pending(pending);

        WalHealthReport {
            status,
            pending_count: pending,
            message: status.message(pending),
            accepts_intake: status.accepts_intake(),
        }
    }
}

fn pending_condition() -> Condition {
    Condition::all()
        .add(wal_record::Column::ConfirmedAt.is_null())
        .add(wal_record::Column::DiscardedAt.is_null())
}

fn stored_bytes(bytes: i64) -> u64 {
    u64::try_from(bytes).unwrap_or(0)
}
