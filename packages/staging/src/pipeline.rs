use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use common::{ClassifiedError, SyncEvent};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::apply::{EventApplier, apply_with_timeout};
use crate::dlq::DeadLetterQueue;
use crate::entity::dead_letter_entry;
use crate::error::Result;
use crate::wal::{WalHealthReport, WriteAheadLog};

/// What happened to an ingested event.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Applied {
        sequence_id: i64,
    },
    /// Applying failed; the event is in the dead-letter queue and its WAL record stays pending.
    DeadLettered {
        sequence_id: i64,
        entry: Box<dead_letter_entry::Model>,
    },
}

/// Summary of a startup recovery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Distinct events with at least one pending WAL record.
    pub total_pending: usize,
    pub recovered: usize,
    pub already_applied: usize,
    pub dead_lettered: usize,
    /// Left pending: already dead-lettered, or the record could not be read.
    pub deferred: usize,
}

/// Entry point for producers: stage, apply, then confirm or dead-letter.
pub struct Ingestor {
    wal: Arc<WriteAheadLog>,
    dlq: Arc<DeadLetterQueue>,
    applier: Arc<dyn EventApplier>,
    attempt_timeout: Duration,
}

impl Ingestor {
    pub fn new(
        wal: Arc<WriteAheadLog>,
        dlq: Arc<DeadLetterQueue>,
        applier: Arc<dyn EventApplier>,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            wal,
            dlq,
            applier,
            attempt_timeout,
        }
    }

    /// Stage `event` durably, then try to apply it.
    ///
    /// Apply failures are never returned; they end up in the dead-letter queue.
    #[instrument(skip(self, event), fields(event_id = %event.event_id))]
    pub async fn ingest(&self, event: &SyncEvent, message_id: Option<&str>) -> Result<IngestOutcome> {
        let sequence_id = self.wal.record(event).await?;

        match apply_with_timeout(self.applier.as_ref(), event, self.attempt_timeout).await {
            Ok(()) => {
                // Also settles earlier deliveries still waiting in the dead-letter queue.
                self.dlq.resolve_applied(&event.event_id).await?;
                Ok(IngestOutcome::Applied { sequence_id })
            }
            Err(e) => {
                let classified = ClassifiedError::from(&e);
                let message_id = message_id
                    .map(str::to_owned)
                    .unwrap_or_else(|| uuid::Uuid::now_v7().to_string());
                let entry = self
                    .dlq
                    .add_or_update(event, &message_id, &classified)
                    .await?;
                Ok(IngestOutcome::DeadLettered {
                    sequence_id,
                    entry: Box::new(entry),
                })
            }
        }
    }

    /// Re-offer every event left pending in the WAL by a previous run.
    ///
    /// Events already in the dead-letter queue are left to the retry scheduler.
    #[instrument(skip(self))]
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let pending = self.wal.pending().await?;
        let mut report = RecoveryReport::default();
        let mut seen = HashSet::new();

        for record in pending {
            if !seen.insert(record.event_id.clone()) {
                continue;
            }
            report.total_pending += 1;

            if self.dlq.get(&record.event_id).await?.is_some() {
                report.deferred += 1;
                continue;
            }

            let event = match record.decode_event() {
                Ok(event) => event,
                Err(e) => {
                    error!(
                        event_id = %record.event_id,
                        sequence_id = record.sequence_id,
                        error = %e,
                        "Pending WAL record is unreadable, leaving it in place"
                    );
                    report.deferred += 1;
                    continue;
                }
            };

            match self.applier.is_applied(&event.event_id).await {
                Ok(true) => {
                    self.wal.confirm_event(&event.event_id).await?;
                    report.already_applied += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => debug!(event_id = %event.event_id, error = %e, "Applied check failed"),
            }

            match apply_with_timeout(self.applier.as_ref(), &event, self.attempt_timeout).await {
                Ok(()) => {
                    self.wal.note_attempt(&event.event_id, None).await?;
                    self.wal.confirm_event(&event.event_id).await?;
                    report.recovered += 1;
                }
                Err(e) => {
                    let classified = ClassifiedError::from(&e);
                    self.wal
                        .note_attempt(&event.event_id, Some(&classified.message))
                        .await?;
                    let message_id = uuid::Uuid::now_v7().to_string();
                    self.dlq
                        .add_or_update(&event, &message_id, &classified)
                        .await?;
                    report.dead_lettered += 1;
                }
            }
        }

        if report.total_pending > 0 {
            info!(
                total_pending = report.total_pending,
                recovered = report.recovered,
                already_applied = report.already_applied,
                dead_lettered = report.dead_lettered,
                deferred = report.deferred,
                "Recovered pending WAL records"
            );
        }
        if report.dead_lettered > 0 {
            warn!(
                dead_lettered = report.dead_lettered,
                "Some recovered events still fail to apply"
            );
        }

        Ok(report)
    }

    pub fn health(&self) -> WalHealthReport {
        self.wal.health()
    }
}
