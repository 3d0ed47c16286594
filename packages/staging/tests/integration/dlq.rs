use chrono::Utc;
use common::{EntryStatus, ErrorCategory};
use staging::dlq::{DlqFilter, PageRequest, RetryOutcome};
use staging::error::StagingError;

use crate::common::{Behavior, TestApp, classified, event};

mod entries {
    use super::*;

    #[tokio::test]
    async fn new_failure_creates_pending_entry() {
        let app = TestApp::spawn().await;
        let before = Utc::now();

        let entry = app.dead_letter("e1", ErrorCategory::Timeout).await;

        assert_eq!(entry.retry_count, 0);
        assert_eq!(entry.category, ErrorCategory::Timeout);
        assert_eq!(entry.status(5), EntryStatus::Pending);
        assert_eq!(entry.first_failure, entry.last_failure);
        assert!(entry.next_retry > entry.last_failure);
        assert!(entry.first_failure >= before);
        assert_eq!(entry.original_error, entry.last_error);
        assert_eq!(entry.username.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn duplicate_failure_updates_existing_entry() {
        let app = TestApp::spawn().await;
        let first = app.dead_letter("dup", ErrorCategory::Timeout).await;

        let second = app
            .state
            .dlq
            .add_or_update(&event("dup"), "msg-2", &classified(ErrorCategory::Database))
            .await
            .unwrap();

        assert_eq!(second.id, first.id);
        assert_eq!(second.message_id, "msg-2");
        assert_eq!(second.category, ErrorCategory::Database);
        assert_eq!(second.original_error, first.original_error);
        assert_ne!(second.last_error, first.last_error);
        assert_eq!(second.retry_count, 0);
        assert_eq!(second.first_failure, first.first_failure);

        let (_, total) = app
            .state
            .dlq
            .list(&DlqFilter::default(), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(app.state.dlq.stats().await.unwrap().total_added, 1);
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let app = TestApp::spawn().await;
        assert!(app.state.dlq.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn remove_deletes_and_discards_wal_records() {
        let app = TestApp::spawn().await;
        app.state.wal.record(&event("bad")).await.unwrap();
        app.dead_letter("bad", ErrorCategory::Validation).await;

        assert!(app.state.dlq.remove("bad").await.unwrap());
        assert!(!app.state.dlq.remove("bad").await.unwrap());

        assert!(app.state.dlq.get("bad").await.unwrap().is_none());
        assert!(app.state.wal.pending().await.unwrap().is_empty());
        assert_eq!(app.state.dlq.stats().await.unwrap().total_removed, 1);
        assert_eq!(app.state.wal.stats().total_discards, 1);
    }

    #[tokio::test]
    async fn categories_always_lists_full_taxonomy() {
        let app = TestApp::spawn().await;

        let categories = app.state.dlq.categories();

        assert_eq!(categories.len(), 6);
        for category in [
            ErrorCategory::Unknown,
            ErrorCategory::Connection,
            ErrorCategory::Timeout,
            ErrorCategory::Validation,
            ErrorCategory::Database,
            ErrorCategory::Capacity,
        ] {
            assert!(categories.contains(&category));
        }
        assert_eq!(app.state.dlq.max_retries(), 5);
    }

    #[tokio::test]
    async fn retry_one_unknown_entry_is_not_found() {
        let app = TestApp::spawn().await;

        let err = app.state.dlq.retry_one("ghost").await.unwrap_err();

        assert!(matches!(err, StagingError::EntryNotFound(id) if id == "ghost"));
    }
}

mod listing {
    use super::*;

    async fn seed(app: &TestApp, n: usize) {
        for i in 0..n {
            let category = if i % 4 == 0 {
                ErrorCategory::Database
            } else {
                ErrorCategory::Connection
            };
            app.dead_letter(&format!("e{i:03}"), category).await;
        }
    }

    #[tokio::test]
    async fn pagination_windows() {
        let app = TestApp::spawn().await;
        seed(&app, 100).await;
        let dlq = &app.state.dlq;
        let all = DlqFilter::default();

        let (tail, total) = dlq.list(&all, PageRequest::new(10, 95)).await.unwrap();
        assert_eq!(tail.len(), 5);
        assert_eq!(total, 100);
        assert_eq!(tail[0].event_id, "e095");

        let (everything, _) = dlq.list(&all, PageRequest::new(1000, 0)).await.unwrap();
        assert_eq!(everything.len(), 100);

        let (default_page, _) = dlq.list(&all, PageRequest::default()).await.unwrap();
        assert_eq!(default_page.len(), 50);
    }

    #[tokio::test]
    async fn listing_preserves_insertion_order() {
        let app = TestApp::spawn().await;
        for id in ["c", "a", "b"] {
            app.dead_letter(id, ErrorCategory::Unknown).await;
        }

        let (entries, _) = app
            .state
            .dlq
            .list(&DlqFilter::default(), PageRequest::default())
            .await
            .unwrap();

        let ids: Vec<_> = entries.iter().map(|e| e.event_id.as_str()).collect();
        assert_eq!(ids, ["c", "a", "b"]);
    }

    #[tokio::test]
    async fn filter_by_category() {
        let app = TestApp::spawn().await;
        seed(&app, 100).await;

        let (entries, total) = app
            .state
            .dlq
            .list(
                &DlqFilter::category(ErrorCategory::Database),
                PageRequest::new(1000, 0),
            )
            .await
            .unwrap();

        assert_eq!(total, 25);
        assert_eq!(entries.len(), 25);
        assert!(entries.iter().all(|e| e.category == ErrorCategory::Database));
    }

    #[tokio::test]
    async fn filter_by_status() {
        let app = TestApp::spawn().await;
        app.dead_letter("fresh", ErrorCategory::Timeout).await;
        app.dead_letter("trying", ErrorCategory::Timeout).await;
        app.dead_letter("stuck", ErrorCategory::Timeout).await;
        app.set_retry_state("trying", 2, Utc::now()).await;
        app.set_retry_state("stuck", 7, Utc::now()).await;

        for (status, expected) in [
            (EntryStatus::Pending, "fresh"),
            (EntryStatus::Retrying, "trying"),
            (EntryStatus::Permanent, "stuck"),
        ] {
            let (entries, total) = app
                .state
                .dlq
                .list(&DlqFilter::status(status), PageRequest::default())
                .await
                .unwrap();
            assert_eq!(total, 1, "{status}");
            assert_eq!(entries[0].event_id, expected);
            assert_eq!(entries[0].status(5), status);
        }
    }

    #[tokio::test]
    async fn pending_retries_only_returns_due_entries_below_ceiling() {
        let app = TestApp::spawn().await;
        app.dead_letter("due", ErrorCategory::Connection).await;
        app.dead_letter("later", ErrorCategory::Connection).await;
        app.dead_letter("permanent", ErrorCategory::Connection).await;
        app.make_due("due").await;
        app.make_due("permanent").await;
        app.set_retry_state("permanent", 5, Utc::now()).await;

        let due = app.state.dlq.pending_retries().await.unwrap();

        let ids: Vec<_> = due.iter().map(|e| e.event_id.as_str()).collect();
        assert_eq!(ids, ["due"]);
    }
}

mod cleanup {
    use super::*;

    #[tokio::test]
    async fn cleanup_only_expires_old_permanent_entries() {
        let app = TestApp::spawn().await;
        let long_ago = Utc::now() - chrono::Duration::days(30);

        for id in ["old-pending", "old-retrying", "old-permanent", "new-permanent"] {
            app.state.wal.record(&event(id)).await.unwrap();
            app.dead_letter(id, ErrorCategory::Capacity).await;
        }
        app.set_retry_state("old-pending", 0, long_ago).await;
        app.set_retry_state("old-retrying", 3, long_ago).await;
        app.set_retry_state("old-permanent", 5, long_ago).await;
        app.set_retry_state("new-permanent", 9, Utc::now()).await;

        let removed = app.state.dlq.cleanup().await.unwrap();

        assert_eq!(removed, 1);
        assert!(app.state.dlq.get("old-permanent").await.unwrap().is_none());
        for id in ["old-pending", "old-retrying", "new-permanent"] {
            assert!(app.state.dlq.get(id).await.unwrap().is_some(), "{id}");
        }

        let stats = app.state.dlq.stats().await.unwrap();
        assert_eq!(stats.total_expired, 1);
        assert_eq!(stats.total_entries, 3);

        let pending: Vec<_> = app
            .state
            .wal
            .pending()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.event_id)
            .collect();
        assert!(!pending.contains(&"old-permanent".to_string()));
        assert_eq!(pending.len(), 3);
    }

    #[tokio::test]
    async fn cleanup_counts_every_expired_entry() {
        let app = TestApp::spawn().await;
        let long_ago = Utc::now() - chrono::Duration::days(30);
        for id in ["p1", "p2", "p3"] {
            app.state.wal.record(&event(id)).await.unwrap();
            app.dead_letter(id, ErrorCategory::Database).await;
            app.set_retry_state(id, 5, long_ago).await;
        }

        assert_eq!(app.state.dlq.cleanup().await.unwrap(), 3);
        assert_eq!(app.state.dlq.cleanup().await.unwrap(), 0);

        let stats = app.state.dlq.stats().await.unwrap();
        assert_eq!(stats.total_expired, 3);
        assert_eq!(stats.total_entries, 0);
        assert_eq!(app.state.wal.stats().total_discards, 3);
    }

    #[tokio::test]
    async fn unrepresentable_retention_expires_nothing() {
        for retention in [u64::MAX, 10_u64.pow(16)] {
            let app = TestApp::spawn_with(|c| c.dlq.retention_secs = retention).await;
            app.dead_letter("fresh", ErrorCategory::Capacity).await;
            app.dead_letter("ancient", ErrorCategory::Capacity).await;
            app.set_retry_state("fresh", 5, Utc::now()).await;
            app.set_retry_state("ancient", 5, Utc::now() - chrono::Duration::days(3650))
                .await;

            assert_eq!(app.state.dlq.cleanup().await.unwrap(), 0, "retention {retention}");
            assert!(app.state.dlq.get("fresh").await.unwrap().is_some());
            assert!(app.state.dlq.get("ancient").await.unwrap().is_some());
            assert_eq!(app.state.dlq.stats().await.unwrap().total_expired, 0);
        }
    }

    #[tokio::test]
    async fn cleanup_with_nothing_expired() {
        let app = TestApp::spawn().await;
        app.dead_letter("e1", ErrorCategory::Timeout).await;

        assert_eq!(app.state.dlq.cleanup().await.unwrap(), 0);
        assert_eq!(app.state.dlq.stats().await.unwrap().total_expired, 0);
    }
}

mod stats {
    use super::*;

    #[tokio::test]
    async fn stats_group_live_entries_by_category() {
        let app = TestApp::spawn().await;
        let first = app.dead_letter("a", ErrorCategory::Timeout).await;
        app.dead_letter("b", ErrorCategory::Timeout).await;
        let last = app.dead_letter("c", ErrorCategory::Capacity).await;

        let stats = app.state.dlq.stats().await.unwrap();

        assert_eq!(stats.total_entries, 3);
        assert_eq!(stats.total_added, 3);
        assert_eq!(stats.entries_by_category[&ErrorCategory::Timeout], 2);
        assert_eq!(stats.entries_by_category[&ErrorCategory::Capacity], 1);
        assert_eq!(stats.entries_by_category[&ErrorCategory::Validation], 0);
        assert_eq!(stats.entries_by_category.len(), 6);
        assert_eq!(stats.oldest_entry, Some(first.first_failure));
        assert_eq!(stats.newest_entry, Some(last.first_failure));
    }

    #[tokio::test]
    async fn empty_queue_has_no_timestamps() {
        let app = TestApp::spawn().await;

        let stats = app.state.dlq.stats().await.unwrap();

        assert_eq!(stats.total_entries, 0);
        assert_eq!(stats.oldest_entry, None);
        assert_eq!(stats.newest_entry, None);
    }
}

mod manual_retry {
    use super::*;

    #[tokio::test]
    async fn retry_one_failure_updates_entry_in_place() {
        let app = TestApp::spawn().await;
        app.applier.set("e1", Behavior::Fail(ErrorCategory::Capacity));
        let entry = app.dead_letter("e1", ErrorCategory::Timeout).await;

        let outcome = app.state.dlq.retry_one("e1").await.unwrap();

        let (updated, error) = match outcome {
            RetryOutcome::Failed { entry, error } => (entry, error),
            other => panic!("expected failure, got {other:?}"),
        };
        assert_eq!(error.category, ErrorCategory::Capacity);
        assert_eq!(updated.retry_count, 1);
        assert_eq!(updated.category, ErrorCategory::Capacity);
        assert_eq!(updated.original_error, entry.original_error);
        assert_eq!(updated.first_failure, entry.first_failure);
        assert_eq!(updated.last_error, error.message);
        assert!(updated.last_failure >= entry.last_failure);
        assert!(updated.next_retry > updated.last_failure);
        assert_eq!(updated.status(5), EntryStatus::Retrying);
    }

    #[tokio::test]
    async fn retry_one_works_on_permanent_entries() {
        let app = TestApp::spawn().await;
        app.state.wal.record(&event("stuck")).await.unwrap();
        app.dead_letter("stuck", ErrorCategory::Database).await;
        app.set_retry_state("stuck", 5, Utc::now()).await;

        let outcome = app.state.dlq.retry_one("stuck").await.unwrap();

        assert!(outcome.is_applied());
        assert!(app.state.dlq.get("stuck").await.unwrap().is_none());
        assert!(app.applier.was_applied("stuck"));
    }
}
