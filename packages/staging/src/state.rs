use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::apply::EventApplier;
use crate::config::AppConfig;
use crate::dlq::DeadLetterQueue;
use crate::error::Result;
use crate::pipeline::Ingestor;
use crate::scheduler::RetryScheduler;
use crate::wal::WriteAheadLog;

/// Shared handles of the staging subsystem.
#[derive(Clone)]
pub struct StagingState {
    pub db: DatabaseConnection,
    pub wal: Arc<WriteAheadLog>,
    pub dlq: Arc<DeadLetterQueue>,
    pub ingestor: Arc<Ingestor>,
    pub scheduler: Arc<RetryScheduler>,
}

impl StagingState {
    pub async fn open(
        db: DatabaseConnection,
        config: &AppConfig,
        applier: Arc<dyn EventApplier>,
    ) -> Result<Self> {
        let wal = Arc::new(WriteAheadLog::open(db.clone(), config.wal.clone()).await?);
        let dlq = Arc::new(DeadLetterQueue::new(
            db.clone(),
            wal.clone(),
            applier.clone(),
            config.dlq.clone(),
            &config.retry,
        ));
        let ingestor = Arc::new(Ingestor::new(
            wal.clone(),
            dlq.clone(),
            applier,
            config.retry.attempt_timeout(),
        ));
        let scheduler = Arc::new(RetryScheduler::new(dlq.clone(), config.retry.interval()));

        Ok(Self {
            db,
            wal,
            dlq,
            ingestor,
            scheduler,
        })
    }
}
