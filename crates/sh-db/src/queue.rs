//! Notification queue and recipient snapshot repository
//!
//! Claims use `FOR UPDATE SKIP LOCKED` inside a CTE-driven
//! `UPDATE ... RETURNING`, so concurrent workers never receive the same item.
//! A processing row whose `updated_at` is older than the claim timeout is
//! claimed again.
//!
//! Tables: notification_queue, event_snapshots, event_subscribers

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sh_core::clock::SharedClock;
use sh_core::config::NotificationConfig;
use sh_core::traits::Id;
use sh_models::{MessageKind, NewQueueItem, QueueItem, QueueStats, QueueStatus};
use sh_notifications::{QueueStore, SnapshotStore, StoreError, StoreResult, CLAIM_EXPIRED};
use sqlx::{FromRow, PgPool, Postgres, Transaction};

use crate::repository::{db, RepositoryError, RepositoryResult};

const COLUMNS: &str = "id, event_id, channel_id, message_kind, payload, status, attempts, \
                       max_attempts, next_attempt_at, last_error, created_at, updated_at";

const CLAIMED_COLUMNS: &str = "q.id, q.event_id, q.channel_id, q.message_kind, q.payload, \
                               q.status, q.attempts, q.max_attempts, q.next_attempt_at, \
                               q.last_error, q.created_at, q.updated_at";

/// Queue row from database
#[derive(Debug, Clone, FromRow)]
pub struct QueueItemRow {
    pub id: i64,
    pub event_id: i64,
    pub channel_id: i64,
    pub message_kind: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<QueueItemRow> for QueueItem {
    type Error = RepositoryError;

    fn try_from(row: QueueItemRow) -> RepositoryResult<Self> {
        Ok(QueueItem {
            id: row.id,
            event_id: row.event_id,
            channel_id: row.channel_id,
            message_kind: row
                .message_kind
                .parse::<MessageKind>()
                .map_err(RepositoryError::InvalidRow)?,
            payload: row.payload,
            status: row
                .status
                .parse::<QueueStatus>()
                .map_err(RepositoryError::InvalidRow)?,
            attempts: row.attempts,
            max_attempts: row.max_attempts,
            next_attempt_at: row.next_attempt_at,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_items(rows: Vec<QueueItemRow>) -> StoreResult<Vec<QueueItem>> {
    let mut items = rows
        .into_iter()
        .map(QueueItem::try_from)
        .collect::<RepositoryResult<Vec<_>>>()?;
    items.sort_by_key(|item| (item.next_attempt_at, item.id));
    Ok(items)
}

/// PostgreSQL notification queue
pub struct PgQueueStore {
    pool: PgPool,
    clock: SharedClock,
    claim_timeout: Duration,
}

impl PgQueueStore {
    pub fn new(pool: PgPool, clock: SharedClock) -> Self {
        Self {
            pool,
            clock,
            claim_timeout: NotificationConfig::default().claim_timeout(),
        }
    }

    pub fn with_claim_timeout(mut self, claim_timeout: Duration) -> Self {
        self.claim_timeout = claim_timeout;
        self
    }

    async fn insert(
        tx: &mut Transaction<'_, Postgres>,
        item: NewQueueItem,
        now: DateTime<Utc>,
    ) -> Result<QueueItemRow, sqlx::Error> {
        sqlx::query_as::<_, QueueItemRow>(&format!(
            r#"
            INSERT INTO notification_queue
                (event_id, channel_id, message_kind, payload, status, attempts, max_attempts,
                 next_attempt_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 'pending', 0, $5, $6, $7, $7)
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(item.event_id)
        .bind(item.channel_id)
        .bind(item.message_kind.as_str())
        .bind(&item.payload)
        .bind(item.max_attempts)
        .bind(item.next_attempt_at.unwrap_or(now))
        .bind(now)
        .fetch_one(&mut **tx)
        .await
    }

    /// Explain why a mark operation matched no `processing` row
    async fn rejected_transition(&self, id: Id, to: QueueStatus) -> StoreError {
        let current = sqlx::query_scalar::<_, String>(
            "SELECT status FROM notification_queue WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await;

        match current {
            Ok(None) => StoreError::not_found("queue item", id),
            Ok(Some(status)) => match status.parse::<QueueStatus>() {
                Ok(from) => StoreError::InvalidTransition { id, from, to },
                Err(e) => StoreError::Serialization(e),
            },
            Err(e) => db(e),
        }
    }
}

#[async_trait]
impl QueueStore for PgQueueStore {
    async fn enqueue(&self, item: NewQueueItem) -> StoreResult<QueueItem> {
        let mut items = self.enqueue_batch(vec![item]).await?;
        items
            .pop()
            .ok_or_else(|| StoreError::Backend("insert returned no row".into()))
    }

    async fn enqueue_batch(&self, items: Vec<NewQueueItem>) -> StoreResult<Vec<QueueItem>> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await.map_err(db)?;

        let mut rows = Vec::with_capacity(items.len());
        for item in items {
            rows.push(Self::insert(&mut tx, item, now).await.map_err(db)?);
        }

        tx.commit().await.map_err(db)?;

        rows.into_iter()
            .map(|row| QueueItem::try_from(row).map_err(StoreError::from))
            .collect()
    }

    async fn fetch_pending(&self, limit: usize) -> StoreResult<Vec<QueueItem>> {
        let now = self.clock.now();
        let rows = sqlx::query_as::<_, QueueItemRow>(&format!(
            r#"
            WITH claimable AS (
                SELECT id
                FROM notification_queue
                WHERE (status = 'pending' AND next_attempt_at <= $1)
                   OR (status = 'processing' AND updated_at < $3)
                ORDER BY next_attempt_at, id
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE notification_queue q
            SET status = 'processing',
                attempts = CASE WHEN q.status = 'processing' THEN q.attempts + 1 ELSE q.attempts END,
                last_error = CASE WHEN q.status = 'processing' THEN $4 ELSE q.last_error END,
                updated_at = $1
            FROM claimable
            WHERE q.id = claimable.id
            RETURNING {}
            "#,
            CLAIMED_COLUMNS
        ))
        .bind(now)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(now - self.claim_timeout)
        .bind(CLAIM_EXPIRED)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;

        into_items(rows)
    }

    async fn mark_as_sent(&self, id: Id) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE notification_queue
            SET status = 'sent', updated_at = $2
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(self.clock.now())
        .execute(&self.pool)
        .await
        .map_err(db)?;

        if result.rows_affected() == 0 {
            return Err(self.rejected_transition(id, QueueStatus::Sent).await);
        }
        Ok(())
    }

    async fn mark_for_retry(
        &self,
        id: Id,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE notification_queue
            SET status = 'pending',
                attempts = attempts + 1,
                last_error = $2,
                next_attempt_at = $3,
                updated_at = $4
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(next_attempt_at)
        .bind(self.clock.now())
        .execute(&self.pool)
        .await
        .map_err(db)?;

        if result.rows_affected() == 0 {
            return Err(self.rejected_transition(id, QueueStatus::Pending).await);
        }
        Ok(())
    }

    async fn mark_as_failed(&self, id: Id, error: &str) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE notification_queue
            SET status = 'failed', last_error = $2, updated_at = $3
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(self.clock.now())
        .execute(&self.pool)
        .await
        .map_err(db)?;

        if result.rows_affected() == 0 {
            return Err(self.rejected_transition(id, QueueStatus::Failed).await);
        }
        Ok(())
    }

    async fn get_queue_stats(&self) -> StoreResult<QueueStats> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT status, COUNT(*) FROM notification_queue GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;

        fold_stats(rows)
    }

    async fn delete_old_sent_items(&self, age: Duration) -> StoreResult<u64> {
        let cutoff = self.clock.now() - age;
        let result = sqlx::query(
            "DELETE FROM notification_queue WHERE status = 'sent' AND updated_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(db)?;

        Ok(result.rows_affected())
    }

    async fn get(&self, id: Id) -> StoreResult<Option<QueueItem>> {
        let row = sqlx::query_as::<_, QueueItemRow>(&format!(
            "SELECT {} FROM notification_queue WHERE id = $1",
            COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;

        row.map(QueueItem::try_from)
            .transpose()
            .map_err(StoreError::from)
    }
}

#[async_trait]
impl SnapshotStore for PgQueueStore {
    async fn freeze_recipients(
        &self,
        event_id: Id,
        channel_ids: &[Id],
        items: Vec<NewQueueItem>,
    ) -> StoreResult<Option<Vec<QueueItem>>> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await.map_err(db)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO event_snapshots (event_id, created_at)
            VALUES ($1, $2)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db)?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await.map_err(db)?;
            return Ok(None);
        }

        // Channels deleted since resolution are skipped
        let frozen = if channel_ids.is_empty() {
            Vec::new()
        } else {
            sqlx::query_scalar::<_, i64>(
                r#"
                INSERT INTO event_subscribers (event_id, channel_id)
                SELECT $1, c.id FROM notification_channels c WHERE c.id = ANY($2)
                RETURNING channel_id
                "#,
            )
            .bind(event_id)
            .bind(channel_ids)
            .fetch_all(&mut *tx)
            .await
            .map_err(db)?
        };

        let mut rows = Vec::with_capacity(items.len());
        for item in items.into_iter().filter(|i| frozen.contains(&i.channel_id)) {
            rows.push(Self::insert(&mut tx, item, now).await.map_err(db)?);
        }

        tx.commit().await.map_err(db)?;
        into_items(rows).map(Some)
    }

    async fn load_snapshot(&self, event_id: Id) -> StoreResult<Option<Vec<Id>>> {
        let exists = sqlx::query_scalar::<_, i64>(
            "SELECT event_id FROM event_snapshots WHERE event_id = $1",
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;

        if exists.is_none() {
            return Ok(None);
        }

        let channel_ids = sqlx::query_scalar::<_, i64>(
            "SELECT channel_id FROM event_subscribers WHERE event_id = $1 ORDER BY channel_id",
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;

        Ok(Some(channel_ids))
    }
}

fn fold_stats(rows: Vec<(String, i64)>) -> StoreResult<QueueStats> {
    let mut stats = QueueStats::default();
    for (status, count) in rows {
        let status = status
            .parse::<QueueStatus>()
            .map_err(StoreError::Serialization)?;
        stats.record(status, count);
    }
    Ok(stats)
}
