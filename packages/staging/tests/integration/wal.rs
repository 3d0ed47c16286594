use chrono::Utc;
use common::{SyncEvent, WalHealth};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};

use staging::entity::wal_record;
use staging::error::StagingError;

use crate::common::{TestApp, event};

mod recording {
    use super::*;

    #[tokio::test]
    async fn record_stages_pending_event() {
        let app = TestApp::spawn().await;
        let wal = &app.state.wal;

        let seq = wal.record(&event("e1")).await.unwrap();

        let record = wal.get(seq).await.unwrap().expect("record should exist");
        assert!(record.is_pending());
        assert_eq!(record.decode_event().unwrap().event_id, "e1");

        let stats = wal.stats();
        assert_eq!(stats.pending_count, 1);
        assert_eq!(stats.total_writes, 1);
        assert!(stats.storage_size_bytes > 0);
    }

    #[tokio::test]
    async fn record_rejects_event_without_id() {
        let app = TestApp::spawn().await;

        let err = app
            .state
            .wal
            .record(&SyncEvent::new("", "plex"))
            .await
            .unwrap_err();

        assert!(matches!(err, StagingError::InvalidEvent(_)));
        assert_eq!(app.state.wal.stats().total_writes, 0);
    }

    #[tokio::test]
    async fn sequence_ids_increase() {
        let app = TestApp::spawn().await;

        let a = app.state.wal.record(&event("a")).await.unwrap();
        let b = app.state.wal.record(&event("b")).await.unwrap();

        assert!(b > a);
    }
}

mod confirmation {
    use super::*;

    #[tokio::test]
    async fn confirm_is_idempotent() {
        let app = TestApp::spawn().await;
        let wal = &app.state.wal;
        let seq = wal.record(&event("e1")).await.unwrap();

        assert!(wal.confirm(seq).await.unwrap());
        let once = wal.stats();
        assert!(!wal.confirm(seq).await.unwrap());
        let twice = wal.stats();

        assert_eq!(once.confirmed_count, 1);
        assert_eq!(twice.confirmed_count, once.confirmed_count);
        assert_eq!(twice.total_confirms, once.total_confirms);
        assert_eq!(twice.pending_count, 0);
    }

    #[tokio::test]
    async fn confirm_unknown_sequence_is_noop() {
        let app = TestApp::spawn().await;
        assert!(!app.state.wal.confirm(9999).await.unwrap());
    }

    #[tokio::test]
    async fn confirm_event_settles_duplicate_deliveries() {
        let app = TestApp::spawn().await;
        let wal = &app.state.wal;
        wal.record(&event("dup")).await.unwrap();
        wal.record(&event("dup")).await.unwrap();
        wal.record(&event("other")).await.unwrap();

        assert_eq!(wal.confirm_event("dup").await.unwrap(), 2);
        assert_eq!(wal.confirm_event("dup").await.unwrap(), 0);

        let stats = wal.stats();
        assert_eq!(stats.pending_count, 1);
        assert_eq!(stats.confirmed_count, 2);
    }

    #[tokio::test]
    async fn concurrent_confirms_count_once() {
        let app = TestApp::spawn().await;
        let seq = app.state.wal.record(&event("race")).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let wal = app.state.wal.clone();
            handles.push(tokio::spawn(async move { wal.confirm(seq).await.unwrap() }));
        }
        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
        assert_eq!(app.state.wal.stats().total_confirms, 1);
    }

    #[tokio::test]
    async fn discard_removes_from_pending() {
        let app = TestApp::spawn().await;
        let wal = &app.state.wal;
        wal.record(&event("gone")).await.unwrap();

        assert_eq!(wal.discard_event("gone").await.unwrap(), 1);

        let stats = wal.stats();
        assert_eq!(stats.pending_count, 0);
        assert_eq!(stats.total_discards, 1);
        assert!(wal.pending().await.unwrap().is_empty());
    }
}

mod durability {
    use super::*;

    #[tokio::test]
    async fn pending_records_survive_restart() {
        let app = TestApp::spawn().await;
        let kept = app.state.wal.record(&event("kept")).await.unwrap();
        let done = app.state.wal.record(&event("done")).await.unwrap();
        app.state.wal.confirm(done).await.unwrap();

        let app = app.restart().await;

        let pending = app.state.wal.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].sequence_id, kept);

        let stats = app.state.wal.stats();
        assert_eq!(stats.pending_count, 1);
        assert_eq!(stats.confirmed_count, 1);
        assert_eq!(stats.total_writes, 0);
    }

    #[tokio::test]
    async fn note_attempt_tracks_retries() {
        let app = TestApp::spawn().await;
        let seq = app.state.wal.record(&event("e1")).await.unwrap();

        app.state
            .wal
            .note_attempt("e1", Some("connection refused"))
            .await
            .unwrap();
        app.state.wal.note_attempt("e1", None).await.unwrap();

        let record = app.state.wal.get(seq).await.unwrap().unwrap();
        assert_eq!(record.attempts, 2);
        assert!(record.last_attempt_at.is_some());
        assert_eq!(record.last_error, None);
        assert_eq!(app.state.wal.stats().total_retries, 2);
    }
}

mod compaction {
    use super::*;

    async fn backdate_confirmation(app: &TestApp, seq: i64, hours: i64) {
        wal_record::Entity::update_many()
            .col_expr(
                wal_record::Column::ConfirmedAt,
                Expr::value(Utc::now() - chrono::Duration::hours(hours)),
            )
            .filter(wal_record::Column::SequenceId.eq(seq))
            .exec(&app.db)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn compact_removes_only_old_settled_records() {
        let app = TestApp::spawn().await;
        let wal = &app.state.wal;

        let old = wal.record(&event("old")).await.unwrap();
        let recent = wal.record(&event("recent")).await.unwrap();
        let pending = wal.record(&event("pending")).await.unwrap();
        wal.confirm(old).await.unwrap();
        wal.confirm(recent).await.unwrap();
        backdate_confirmation(&app, old, 2).await;

        let before = wal.stats();
        let removed = wal.compact().await.unwrap();
        let after = wal.stats();

        assert_eq!(removed, 1);
        assert!(wal.get(old).await.unwrap().is_none());
        assert!(wal.get(recent).await.unwrap().is_some());
        assert!(wal.get(pending).await.unwrap().is_some());
        assert!(after.storage_size_bytes < before.storage_size_bytes);
        assert!(after.last_compaction.is_some());
        assert_eq!(after.total_confirms, before.total_confirms);
        assert_eq!(after.pending_count, 1);
    }

    #[tokio::test]
    async fn compaction_keeps_logical_counts() {
        let app = TestApp::spawn().await;
        let wal = &app.state.wal;

        let confirmed = wal.record(&event("confirmed")).await.unwrap();
        wal.confirm(confirmed).await.unwrap();
        backdate_confirmation(&app, confirmed, 2).await;
        wal.record(&event("dropped")).await.unwrap();
        wal.discard_event("dropped").await.unwrap();
        wal_record::Entity::update_many()
            .col_expr(
                wal_record::Column::DiscardedAt,
                Expr::value(Utc::now() - chrono::Duration::hours(2)),
            )
            .filter(wal_record::Column::EventId.eq("dropped"))
            .exec(&app.db)
            .await
            .unwrap();

        let before = wal.stats();
        assert_eq!(wal.compact().await.unwrap(), 2);
        let after = wal.stats();

        assert_eq!(before.confirmed_count, 1);
        assert_eq!(after.confirmed_count, before.confirmed_count);
        assert_eq!(after.discarded_count, before.discarded_count);
        assert_eq!(after.storage_size_bytes, 0);
    }

    #[tokio::test]
    async fn overlapping_compactions_reclaim_once() {
        let app = TestApp::spawn().await;
        let wal = &app.state.wal;

        let old = wal.record(&event("old")).await.unwrap();
        wal.confirm(old).await.unwrap();
        backdate_confirmation(&app, old, 2).await;
        let kept = wal.record(&event("kept")).await.unwrap();
        let kept_bytes = wal.get(kept).await.unwrap().unwrap().payload_bytes as u64;

        let (a, b) = tokio::join!(wal.compact(), wal.compact());

        assert_eq!(a.unwrap() + b.unwrap(), 1);
        let stats = wal.stats();
        assert_eq!(stats.storage_size_bytes, kept_bytes);
        assert_eq!(stats.confirmed_count, 1);
    }

    #[tokio::test]
    async fn unrepresentable_retention_compacts_nothing() {
        for retention in [u64::MAX, 10_u64.pow(15)] {
            let app = TestApp::spawn_with(|c| c.wal.compaction_retention_secs = retention).await;
            let wal = &app.state.wal;
            let seq = wal.record(&event("e1")).await.unwrap();
            wal.confirm(seq).await.unwrap();
            backdate_confirmation(&app, seq, 24 * 365).await;

            assert_eq!(wal.compact().await.unwrap(), 0, "retention {retention}");
            assert!(wal.get(seq).await.unwrap().is_some());
            assert!(wal.stats().last_compaction.is_some());
        }
    }

    #[tokio::test]
    async fn compact_never_touches_pending_records() {
        let app = TestApp::spawn_with(|c| c.wal.compaction_retention_secs = 0).await;
        let wal = &app.state.wal;
        wal.record(&event("p1")).await.unwrap();
        wal.record(&event("p2")).await.unwrap();

        assert_eq!(wal.compact().await.unwrap(), 0);
        assert_eq!(wal.pending().await.unwrap().len(), 2);
    }
}

mod health {
    use super::*;

    #[tokio::test]
    async fn health_follows_pending_count() {
        let app = TestApp::spawn().await;
        assert_eq!(app.state.wal.health().status, WalHealth::Idle);

        app.state.wal.record(&event("e1")).await.unwrap();

        let report = app.state.wal.health();
        assert_eq!(report.status, WalHealth::Healthy);
        assert_eq!(report.pending_count, 1);
        assert!(report.accepts_intake);
        assert!(report.message.contains('1'));
    }
}
