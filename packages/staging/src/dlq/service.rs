use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{
    ClassifiedError, DlqConfig, EntryStatus, ErrorCategory, RetryConfig, RetryPolicy, SyncEvent,
};
use futures::StreamExt;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, SqlErr,
};
use tracing::{debug, error, info, instrument, warn};

use super::locks::KeyedLocks;
use super::models::{DlqFilter, DlqStats, PageRequest, RetryOutcome};
use crate::apply::{EventApplier, apply_with_timeout};
use crate::entity::dead_letter_entry;
use crate::error::{Result, StagingError};
use crate::wal::WriteAheadLog;

#[derive(Debug, Default)]
struct DlqCounters {
    total_added: AtomicU64,
    total_removed: AtomicU64,
    total_retries: AtomicU64,
    total_expired: AtomicU64,
}

/// Whether a retry was requested by an operator or by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryMode {
    /// Ignore the schedule.
    Manual,
    /// Only if still due once the entry lock is held.
    Scheduled,
}

/// Dead-letter queue backed by the `dead_letter_entry` table.
///
/// Every mutation of an entry happens under that entry's `event_id` lock, so a
/// scheduler sweep and an operator retry never both count the same attempt.
/// The slow apply step runs while holding only that one key.
pub struct DeadLetterQueue {
    db: DatabaseConnection,
    wal: Arc<WriteAheadLog>,
    applier: Arc<dyn EventApplier>,
    policy: RetryPolicy,
    config: DlqConfig,
    attempt_timeout: Duration,
    max_concurrent: usize,
    locks: KeyedLocks,
    counters: DlqCounters,
}

impl DeadLetterQueue {
    pub fn new(
        db: DatabaseConnection,
        wal: Arc<WriteAheadLog>,
        applier: Arc<dyn EventApplier>,
        config: DlqConfig,
        retry: &RetryConfig,
    ) -> Self {
        Self {
            db,
            wal,
            applier,
            policy: RetryPolicy::from_config(retry),
            config,
            attempt_timeout: retry.attempt_timeout(),
            max_concurrent: retry.max_concurrent.max(1),
            locks: KeyedLocks::new(),
            counters: DlqCounters::default(),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// The full category taxonomy, whether or not any entry uses it.
    pub fn categories(&self) -> &'static [ErrorCategory] {
        ErrorCategory::ALL
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Record an initial apply failure for `event`.
    ///
    /// Creates the entry if the event has none. A duplicate failure for an event
    /// already in the queue only refreshes its diagnostics (`message_id`,
    /// `last_error`, `category`); the retry bookkeeping belongs to the retry path.
    #[instrument(skip(self, event, error), fields(event_id = %event.event_id, category = %error.category))]
    pub async fn add_or_update(
        &self,
        event: &SyncEvent,
        message_id: &str,
        error: &ClassifiedError,
    ) -> Result<dead_letter_entry::Model> {
        let _guard = self.locks.lock(&event.event_id).await;

        if let Some(existing) = self.find(&event.event_id).await? {
            let mut active: dead_letter_entry::ActiveModel = existing.into();
            active.message_id = Set(message_id.to_owned());
            active.last_error = Set(error.message.clone());
            active.category = Set(error.category);
            let updated = active.update(&self.db).await?;
            debug!("Event already dead-lettered, refreshed diagnostics");
            return Ok(updated);
        }

        let now = Utc::now();
        let next_retry = later_by(now, self.policy.backoff(0, error.category));

        let model = dead_letter_entry::ActiveModel {
            event_id: Set(event.event_id.clone()),
            message_id: Set(message_id.to_owned()),
            source: Set(event.source.clone()),
            username: Set(event.username.clone()),
            media_title: Set(event.media_title.clone()),
            payload: Set(serde_json::to_string(event)?),
            original_error: Set(error.message.clone()),
            last_error: Set(error.message.clone()),
            retry_count: Set(0),
            first_failure: Set(now),
            last_failure: Set(now),
            next_retry: Set(next_retry),
            category: Set(error.category),
            ..Default::default()
        };

        match model.insert(&self.db).await {
            Ok(inserted) => {
                self.counters.total_added.fetch_add(1, Ordering::SeqCst);
                warn!(error = %error.message, "Event dead-lettered");
                Ok(inserted)
            }
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => self
                .find(&event.event_id)
                .await?
                .ok_or_else(|| {
                    DbErr::Custom(
                        "UniqueConstraintViolation but existing row not found".to_string(),
                    )
                    .into()
                }),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get(&self, event_id: &str) -> Result<Option<dead_letter_entry::Model>> {
        self.find(event_id).await
    }

    /// List entries in insertion order.
    pub async fn list(
        &self,
        filter: &DlqFilter,
        page: PageRequest,
    ) -> Result<(Vec<dead_letter_entry::Model>, u64)> {
        let mut query = dead_letter_entry::Entity::find();

        if let Some(category) = filter.category {
            query = query.filter(dead_letter_entry::Column::Category.eq(category));
        }

        if let Some(status) = filter.status {
            query = query.filter(self.status_condition(status));
        }

        let total = query.clone().count(&self.db).await?;

        let entries = query
            .order_by_asc(dead_letter_entry::Column::Id)
            .offset(page.offset)
            .limit(page.effective_limit())
            .all(&self.db)
            .await?;

        Ok((entries, total))
    }

    /// Operator deletion. The event's WAL records are discarded so recovery does not revive it.
    #[instrument(skip(self))]
    pub async fn remove(&self, event_id: &str) -> Result<bool> {
        let _guard = self.locks.lock(event_id).await;

        let result = dead_letter_entry::Entity::delete_many()
            .filter(dead_letter_entry::Column::EventId.eq(event_id))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            return Ok(false);
        }

        self.counters.total_removed.fetch_add(1, Ordering::SeqCst);
        let discarded = self.wal.discard_event(event_id).await?;
        warn!(discarded, "Dead-letter entry removed by operator");

        Ok(true)
    }

    /// Entries below the retry ceiling whose backoff has elapsed.
    pub async fn pending_retries(&self) -> Result<Vec<dead_letter_entry::Model>> {
        Ok(dead_letter_entry::Entity::find()
            .filter(dead_letter_entry::Column::RetryCount.lt(self.max_retries_i32()))
            .filter(dead_letter_entry::Column::NextRetry.lte(Utc::now()))
            .order_by_asc(dead_letter_entry::Column::Id)
            .all(&self.db)
            .await?)
    }

    /// Reapply one entry now, regardless of its schedule or status.
    #[instrument(skip(self))]
    pub async fn retry_one(&self, event_id: &str) -> Result<RetryOutcome> {
        match self.retry_entry(event_id, RetryMode::Manual).await? {
            Some(outcome) => Ok(outcome),
            None => Err(StagingError::EntryNotFound(event_id.to_string())),
        }
    }

    /// Reapply every due entry. Returns how many were applied and removed.
    ///
    /// Per-entry failures stay in the queue for the next sweep; only a failure to
    /// read the queue itself is returned.
    #[instrument(skip(self))]
    pub async fn retry_all(&self) -> Result<usize> {
        let due = self.pending_retries().await?;
        if due.is_empty() {
            return Ok(0);
        }

        let total = due.len();
        let outcomes: Vec<(String, Result<Option<RetryOutcome>>)> =
            futures::stream::iter(due.into_iter().map(|entry| entry.event_id))
                .map(|event_id| async move {
                    let outcome = self.retry_entry(&event_id, RetryMode::Scheduled).await;
                    (event_id, outcome)
                })
                .buffer_unordered(self.max_concurrent)
                .collect()
                .await;

        let mut applied = 0;
        let mut failed = 0;
        for (event_id, outcome) in outcomes {
            match outcome {
                Ok(Some(RetryOutcome::Applied)) => applied += 1,
                Ok(Some(RetryOutcome::Failed { .. })) => failed += 1,
                Ok(Some(RetryOutcome::Skipped)) | Ok(None) => {
                    debug!(event_id = %event_id, "Entry no longer due, skipped");
                }
                Err(e) => {
                    failed += 1;
                    error!(event_id = %event_id, error = %e, "Retry bookkeeping failed");
                }
            }
        }

        info!(due = total, applied, failed, "Dead-letter retry sweep finished");
        Ok(applied)
    }

    /// Purge permanent entries whose last failure is older than the retention window.
    ///
    /// Each deletion is counted as soon as it commits. A WAL discard that fails is
    /// logged and the sweep moves on; the record stays pending for recovery.
    #[instrument(skip(self))]
    pub async fn cleanup(&self) -> Result<u64> {
        let Some(cutoff) = self.config.expiry_cutoff(Utc::now()) else {
            debug!(
                retention_secs = self.config.retention_secs,
                "Retention window reaches past the earliest timestamp, nothing expires"
            );
            return Ok(0);
        };

        let expired: Vec<String> = dead_letter_entry::Entity::find()
            .select_only()
            .column(dead_letter_entry::Column::EventId)
            .filter(self.expired_condition(cutoff))
            .into_tuple()
            .all(&self.db)
            .await?;

        let mut removed = 0u64;
        for event_id in expired {
            let _guard = self.locks.lock(&event_id).await;

            // Re-check under the lock: an operator retry may have changed the entry.
            let result = dead_letter_entry::Entity::delete_many()
                .filter(dead_letter_entry::Column::EventId.eq(event_id.as_str()))
                .filter(self.expired_condition(cutoff))
                .exec(&self.db)
                .await?;

            if result.rows_affected == 0 {
                continue;
            }
            self.counters
                .total_expired
                .fetch_add(result.rows_affected, Ordering::SeqCst);
            removed += result.rows_affected;

            if let Err(e) = self.wal.discard_event(&event_id).await {
                error!(
                    event_id = %event_id,
                    error = %e,
                    "Failed to discard WAL records of expired entry"
                );
            }
        }

        if removed > 0 {
            info!(removed, "Expired permanent dead-letter entries");
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<DlqStats> {
        let live: Vec<(ErrorCategory, DateTime<Utc>)> = dead_letter_entry::Entity::find()
            .select_only()
            .column(dead_letter_entry::Column::Category)
            .column(dead_letter_entry::Column::FirstFailure)
            .into_tuple()
            .all(&self.db)
            .await?;

        let mut entries_by_category: BTreeMap<ErrorCategory, u64> =
            ErrorCategory::ALL.iter().map(|c| (*c, 0)).collect();
        for (category, _) in &live {
            *entries_by_category.entry(*category).or_insert(0) += 1;
        }

        Ok(DlqStats {
            total_entries: live.len() as u64,
            total_added: self.counters.total_added.load(Ordering::SeqCst),
            total_removed: self.counters.total_removed.load(Ordering::SeqCst),
            total_retries: self.counters.total_retries.load(Ordering::SeqCst),
            total_expired: self.counters.total_expired.load(Ordering::SeqCst),
            oldest_entry: live.iter().map(|(_, t)| *t).min(),
            newest_entry: live.iter().map(|(_, t)| *t).max(),
            entries_by_category,
        })
    }

    /// Settle an event that was applied outside the retry path, such as a
    /// redelivery that went through. Returns `true` if an entry was removed.
    #[instrument(skip(self))]
    pub async fn resolve_applied(&self, event_id: &str) -> Result<bool> {
        let _guard = self.locks.lock(event_id).await;

        let removed = self.settle_applied(event_id).await?;
        if removed {
            info!("Dead-lettered event applied by a later delivery");
        }
        Ok(removed)
    }

    /// Caller holds the entry lock. The WAL is confirmed before the entry goes,
    /// so the event is never absent from both.
    async fn settle_applied(&self, event_id: &str) -> Result<bool> {
        self.wal.confirm_event(event_id).await?;

        let result = dead_letter_entry::Entity::delete_many()
            .filter(dead_letter_entry::Column::EventId.eq(event_id))
            .exec(&self.db)
            .await?;
        if result.rows_affected == 0 {
            return Ok(false);
        }

        self.counters
            .total_removed
            .fetch_add(result.rows_affected, Ordering::SeqCst);
        Ok(true)
    }

    async fn find(&self, event_id: &str) -> Result<Option<dead_letter_entry::Model>> {
        Ok(dead_letter_entry::Entity::find()
            .filter(dead_letter_entry::Column::EventId.eq(event_id))
            .one(&self.db)
            .await?)
    }

    /// `None` when there is no entry for `event_id`.
    async fn retry_entry(&self, event_id: &str, mode: RetryMode) -> Result<Option<RetryOutcome>> {
        let _guard = self.locks.lock(event_id).await;

        let Some(entry) = self.find(event_id).await? else {
            return Ok(None);
        };

        if mode == RetryMode::Scheduled
            && (entry.retry_count >= self.max_retries_i32() || entry.next_retry > Utc::now())
        {
            return Ok(Some(RetryOutcome::Skipped));
        }

        self.attempt(entry).await.map(Some)
    }

    /// Caller holds the entry lock.
    async fn attempt(&self, entry: dead_letter_entry::Model) -> Result<RetryOutcome> {
        self.counters.total_retries.fetch_add(1, Ordering::SeqCst);

        let result = match entry.decode_event() {
            Ok(event) => apply_with_timeout(self.applier.as_ref(), &event, self.attempt_timeout)
                .await
                .map_err(|e| ClassifiedError::from(&e)),
            Err(e) => Err(ClassifiedError::new(
                ErrorCategory::Validation,
                format!("stored payload is unreadable: {e}"),
            )),
        };

        match result {
            Ok(()) => {
                self.wal.note_attempt(&entry.event_id, None).await?;
                self.settle_applied(&entry.event_id).await?;

                info!(
                    event_id = %entry.event_id,
                    retry_count = entry.retry_count,
                    "Dead-lettered event applied"
                );
                Ok(RetryOutcome::Applied)
            }
            Err(error) => {
                self.wal
                    .note_attempt(&entry.event_id, Some(&error.message))
                    .await?;
                self.record_failure(entry, error).await
            }
        }
    }

    /// Shared failure update: one more retry, later `next_retry`, latest error wins.
    async fn record_failure(
        &self,
        entry: dead_letter_entry::Model,
        error: ClassifiedError,
    ) -> Result<RetryOutcome> {
        let now = Utc::now();
        let retry_count = entry.retry_count.saturating_add(1);
        let last_failure = now.max(entry.last_failure);
        let backoff = self.policy.backoff(retry_count.unsigned_abs(), error.category);
        let next_retry = later_by(last_failure, backoff)
            .max(later_by(entry.next_retry, Duration::from_millis(1)));

        let event_id = entry.event_id.clone();
        let mut active: dead_letter_entry::ActiveModel = entry.into();
        active.retry_count = Set(retry_count);
        active.last_failure = Set(last_failure);
        active.next_retry = Set(next_retry);
        active.last_error = Set(error.message.clone());
        active.category = Set(error.category);
        let updated = active.update(&self.db).await?;

        if updated.status(self.config.max_retries) == EntryStatus::Permanent {
            warn!(
                event_id = %event_id,
                retry_count,
                category = %error.category,
                error = %error.message,
                "Dead-letter entry is now permanent; automatic retry stopped"
            );
        } else {
            warn!(
                event_id = %event_id,
                retry_count,
                category = %error.category,
                error = %error.message,
                next_retry = %next_retry,
                "Dead-letter retry failed"
            );
        }

        Ok(RetryOutcome::Failed {
            entry: Box::new(updated),
            error,
        })
    }

    fn status_condition(&self, status: EntryStatus) -> Condition {
        let max = self.max_retries_i32();
        match status {
            EntryStatus::Pending => Condition::all()
                .add(dead_letter_entry::Column::RetryCount.eq(0))
                .add(dead_letter_entry::Column::RetryCount.lt(max)),
            EntryStatus::Retrying => Condition::all()
                .add(dead_letter_entry::Column::RetryCount.gt(0))
                .add(dead_letter_entry::Column::RetryCount.lt(max)),
            EntryStatus::Permanent => {
                Condition::all().add(dead_letter_entry::Column::RetryCount.gte(max))
            }
        }
    }

    fn expired_condition(&self, cutoff: DateTime<Utc>) -> Condition {
        self.status_condition(EntryStatus::Permanent)
            .add(dead_letter_entry::Column::LastFailure.lt(cutoff))
    }

    fn max_retries_i32(&self) -> i32 {
        i32::try_from(self.config.max_retries).unwrap_or(i32::MAX)
    }
}

/// `at + d`, saturating at the latest representable instant.
fn later_by(at: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    chrono::TimeDelta::from_std(d)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
