use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::info;

use staging::apply::DatabaseApplier;
use staging::config::AppConfig;
use staging::database::init_db;
use staging::scheduler::{run_compactor, run_dlq_cleanup};
use staging::state::StagingState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let config = AppConfig::load().context("Failed to load configuration")?;

    let db = init_db(&config.database.url)
        .await
        .context("Failed to open staging database")?;

    let applier = Arc::new(DatabaseApplier::new(db.clone()));
    let state = StagingState::open(db, &config, applier)
        .await
        .context("Failed to open staging state")?;

    let report = state
        .ingestor
        .recover()
        .await
        .context("Startup recovery failed")?;
    info!(?report, "Startup recovery complete");

    let health = state.wal.health();
    info!(status = %health.status, pending = health.pending_count, "{}", health.message);

    let shutdown = CancellationToken::new();
    let tasks = vec![
        tokio::spawn(state.scheduler.clone().run(shutdown.clone())),
        tokio::spawn(run_compactor(
            state.wal.clone(),
            config.wal.compaction_interval(),
            shutdown.clone(),
        )),
        tokio::spawn(run_dlq_cleanup(
            state.dlq.clone(),
            config.dlq.cleanup_interval(),
            shutdown.clone(),
        )),
    ];

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    shutdown.cancel();
    for task in tasks {
        task.await.context("Background task panicked")?;
    }

    let stats = state.wal.stats();
    info!(
        pending = stats.pending_count,
        total_writes = stats.total_writes,
        total_confirms = stats.total_confirms,
        "Staging service stopped"
    );
    Ok(())
}
