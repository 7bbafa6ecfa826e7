//! Integration tests for the PostgreSQL queue and channel stores
//!
//! Run with: DATABASE_URL=postgres://... cargo test -p sh-db --test queue_postgres -- --test-threads=1
//!
//! Every test returns early when DATABASE_URL is not set. Migrations are
//! applied on connect.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use sh_core::clock::{Clock, ManualClock};
use sh_core::config::AppConfig;
use sh_db::{Database, PgChannelStore, PgQueueStore};
use sh_models::{MessageKind, NewChannel, NewQueueItem, QueueStatus, VerificationCode};
use sh_notifications::{
    ChannelStore, QueueStore, SnapshotStore, StoreError, VerificationCodeStore, CLAIM_EXPIRED,
};

/// Connect and migrate, or `None` when DATABASE_URL is unset
async fn connect() -> Option<Database> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping PostgreSQL test");
        return None;
    };

    let mut config = AppConfig::default().database;
    config.url = url;
    let database = Database::connect(&config)
        .await
        .expect("Failed to connect to PostgreSQL");
    database.migrate().await.expect("Failed to run migrations");
    Some(database)
}

/// Event ids unique to one test run
fn event_id() -> i64 {
    1_000_000_000 + i64::from(rand::random::<u32>())
}

/// Older than anything a real run writes, so these items are claimed first
fn long_ago() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2001, 1, 1, 0, 0, 0).unwrap()
}

fn item(event_id: i64, channel_id: i64) -> NewQueueItem {
    NewQueueItem::new(event_id, channel_id, MessageKind::Initial, serde_json::json!({}), 5)
        .not_before(long_ago())
}

async fn cleanup(database: &Database, event_id: i64) {
    sqlx::query("DELETE FROM notification_queue WHERE event_id = $1")
        .bind(event_id)
        .execute(database.pool())
        .await
        .ok();
    sqlx::query("DELETE FROM event_snapshots WHERE event_id = $1")
        .bind(event_id)
        .execute(database.pool())
        .await
        .ok();
}

// ============================================
// Claiming
// ============================================

#[tokio::test]
async fn test_concurrent_fetches_never_overlap() {
    let Some(database) = connect().await else {
        return;
    };
    let clock = Arc::new(ManualClock::starting_now());
    let store = Arc::new(PgQueueStore::new(database.pool().clone(), clock));
    let event = event_id();

    let ours: HashSet<i64> = store
        .enqueue_batch((1..=20).map(|channel| item(event, channel)).collect())
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.id)
        .collect();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let store = store.clone();
        handles.push(tokio::spawn(async move { store.fetch_pending(8).await.unwrap() }));
    }

    let mut claimed = Vec::new();
    for handle in handles {
        claimed.extend(
            handle
                .await
                .unwrap()
                .into_iter()
                .filter(|i| ours.contains(&i.id))
                .map(|i| i.id),
        );
    }

    let unique: HashSet<i64> = claimed.iter().copied().collect();
    assert_eq!(unique.len(), claimed.len(), "an item was claimed twice");
    assert_eq!(unique, ours);

    cleanup(&database, event).await;
}

#[tokio::test]
async fn test_marks_require_processing() {
    let Some(database) = connect().await else {
        return;
    };
    let clock = Arc::new(ManualClock::starting_now());
    let store = PgQueueStore::new(database.pool().clone(), clock);
    let event = event_id();

    let pending = store.enqueue(item(event, 1)).await.unwrap();
    let err = store.mark_as_sent(pending.id).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::InvalidTransition {
            from: QueueStatus::Pending,
            to: QueueStatus::Sent,
            ..
        }
    ));

    let claimed = store.fetch_pending(1000).await.unwrap();
    assert!(claimed.iter().any(|i| i.id == pending.id));
    store.mark_as_failed(pending.id, "rejected").await.unwrap();

    // Terminal rows never move again
    let err = store
        .mark_for_retry(pending.id, "again", Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::InvalidTransition {
            from: QueueStatus::Failed,
            ..
        }
    ));

    let err = store.mark_as_sent(i64::MAX).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));

    let stored = store.get(pending.id).await.unwrap().unwrap();
    assert_eq!(stored.status, QueueStatus::Failed);
    assert_eq!(stored.last_error.as_deref(), Some("rejected"));

    cleanup(&database, event).await;
}

#[tokio::test]
async fn test_expired_claim_is_reclaimed() {
    let Some(database) = connect().await else {
        return;
    };
    let clock = Arc::new(ManualClock::starting_now());
    let store = PgQueueStore::new(database.pool().clone(), clock.clone())
        .with_claim_timeout(Duration::seconds(60));
    let event = event_id();

    let queued = store.enqueue(item(event, 1)).await.unwrap();
    let first = store.fetch_pending(1000).await.unwrap();
    assert!(first.iter().any(|i| i.id == queued.id));

    clock.advance(Duration::seconds(30));
    let second = store.fetch_pending(1000).await.unwrap();
    assert!(second.iter().all(|i| i.id != queued.id));

    clock.advance(Duration::seconds(31));
    let reclaimed = store
        .fetch_pending(1000)
        .await
        .unwrap()
        .into_iter()
        .find(|i| i.id == queued.id)
        .expect("expired claim was not reclaimed");
    assert_eq!(reclaimed.status, QueueStatus::Processing);
    assert_eq!(reclaimed.attempts, 1);
    assert_eq!(reclaimed.last_error.as_deref(), Some(CLAIM_EXPIRED));

    store.mark_as_sent(queued.id).await.unwrap();

    cleanup(&database, event).await;
}

// ============================================
// Snapshots
// ============================================

#[tokio::test]
async fn test_freeze_recipients_is_write_once() {
    let Some(database) = connect().await else {
        return;
    };
    let clock = Arc::new(ManualClock::starting_now());
    let channels = PgChannelStore::new(database.pool().clone(), clock.clone());
    let store = PgQueueStore::new(database.pool().clone(), clock);
    let event = event_id();

    let channel = channels
        .create_channel(NewChannel::default_for(event, format!("{}@example.com", event)))
        .await
        .unwrap();
    let gone = i64::MAX;

    let queued = store
        .freeze_recipients(event, &[channel.id, gone], vec![item(event, channel.id), item(event, gone)])
        .await
        .unwrap()
        .expect("first freeze must write");
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].channel_id, channel.id);
    assert_eq!(store.load_snapshot(event).await.unwrap(), Some(vec![channel.id]));

    let again = store
        .freeze_recipients(event, &[channel.id], vec![item(event, channel.id)])
        .await
        .unwrap();
    assert!(again.is_none());

    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM notification_queue WHERE event_id = $1",
    )
    .bind(event)
    .fetch_one(database.pool())
    .await
    .unwrap();
    assert_eq!(count, 1);

    // Deleting the channel drops it from the snapshot
    channels.delete_channel(channel.id).await.unwrap();
    assert_eq!(store.load_snapshot(event).await.unwrap(), Some(vec![]));

    cleanup(&database, event).await;
}

// ============================================
// Verification codes
// ============================================

#[tokio::test]
async fn test_concurrent_attempts_respect_ceiling() {
    let Some(database) = connect().await else {
        return;
    };
    let clock = Arc::new(ManualClock::starting_now());
    let channels = Arc::new(PgChannelStore::new(database.pool().clone(), clock.clone()));
    let owner = event_id();

    let channel = channels
        .create_channel(NewChannel::new(
            owner,
            sh_models::ChannelType::Email,
            format!("{}@example.com", owner),
        ))
        .await
        .unwrap();
    channels
        .replace_code(VerificationCode::new(channel.id, "123456", clock.now(), Duration::minutes(15)))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..20 {
        let channels = channels.clone();
        let channel_id = channel.id;
        handles.push(tokio::spawn(async move {
            channels.consume_attempt(channel_id, 5).await.unwrap().is_some()
        }));
    }
    let mut granted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            granted += 1;
        }
    }

    assert_eq!(granted, 5);
    let code = channels.get_code(channel.id).await.unwrap().unwrap();
    assert_eq!(code.attempt_count, 5);

    channels.delete_channel(channel.id).await.unwrap();
}
