//! Channel, subscription and verification code repository
//!
//! Tables: notification_channels, channel_subscriptions,
//! channel_subscription_services, channel_verification_codes

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sh_core::clock::SharedClock;
use sh_core::traits::Id;
use sh_models::{
    Channel, ChannelSubscriptions, ChannelType, NewChannel, Subscription, VerificationCode,
};
use sh_notifications::{ChannelStore, StoreError, StoreResult, VerificationCodeStore};
use sqlx::{FromRow, PgPool};

use crate::repository::{db, is_foreign_key_violation, is_unique_violation, RepositoryError, RepositoryResult};

const CHANNEL_COLUMNS: &str =
    "id, owner_id, type, target, is_verified, is_enabled, is_default, created_at, updated_at";

/// Channel row from database
#[derive(Debug, Clone, FromRow)]
pub struct ChannelRow {
    pub id: i64,
    pub owner_id: i64,
    #[sqlx(rename = "type")]
    pub channel_type: String,
    pub target: String,
    pub is_verified: bool,
    pub is_enabled: bool,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ChannelRow> for Channel {
    type Error = RepositoryError;

    fn try_from(row: ChannelRow) -> RepositoryResult<Self> {
        Ok(Channel {
            id: row.id,
            owner_id: row.owner_id,
            channel_type: row
                .channel_type
                .parse::<ChannelType>()
                .map_err(RepositoryError::InvalidRow)?,
            target: row.target,
            is_verified: row.is_verified,
            is_enabled: row.is_enabled,
            is_default: row.is_default,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// One row of the subscription matrix
#[derive(Debug, Clone, FromRow)]
pub struct SubscriptionMatrixRow {
    pub channel_id: i64,
    pub channel_type: String,
    pub target: String,
    pub subscribe_to_all_services: bool,
    pub service_ids: Vec<i64>,
}

impl TryFrom<SubscriptionMatrixRow> for ChannelSubscriptions {
    type Error = RepositoryError;

    fn try_from(row: SubscriptionMatrixRow) -> RepositoryResult<Self> {
        Ok(ChannelSubscriptions {
            channel_id: row.channel_id,
            channel_type: row
                .channel_type
                .parse::<ChannelType>()
                .map_err(RepositoryError::InvalidRow)?,
            target: row.target,
            subscribe_to_all_services: row.subscribe_to_all_services,
            service_ids: row.service_ids,
        })
    }
}

/// Verification code row from database
#[derive(Debug, Clone, FromRow)]
pub struct VerificationCodeRow {
    pub channel_id: i64,
    pub code: String,
    pub expires_at: DateTime<Utc>,
    pub attempt_count: i32,
    pub created_at: DateTime<Utc>,
}

impl From<VerificationCodeRow> for VerificationCode {
    fn from(row: VerificationCodeRow) -> Self {
        VerificationCode {
            channel_id: row.channel_id,
            code: row.code,
            expires_at: row.expires_at,
            attempt_count: row.attempt_count,
            created_at: row.created_at,
        }
    }
}

fn to_channel(row: ChannelRow) -> StoreResult<Channel> {
    Channel::try_from(row).map_err(StoreError::from)
}

/// PostgreSQL channel store
pub struct PgChannelStore {
    pool: PgPool,
    clock: SharedClock,
}

impl PgChannelStore {
    pub fn new(pool: PgPool, clock: SharedClock) -> Self {
        Self { pool, clock }
    }

    async fn update_channel(&self, id: Id, set: &str, value: bool) -> StoreResult<Channel> {
        let row = sqlx::query_as::<_, ChannelRow>(&format!(
            "UPDATE notification_channels SET {} = $2, updated_at = $3 WHERE id = $1 RETURNING {}",
            set, CHANNEL_COLUMNS
        ))
        .bind(id)
        .bind(value)
        .bind(self.clock.now())
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?
        .ok_or_else(|| StoreError::not_found("channel", id))?;

        to_channel(row)
    }
}

#[async_trait]
impl ChannelStore for PgChannelStore {
    async fn create_channel(&self, channel: NewChannel) -> StoreResult<Channel> {
        let now = self.clock.now();
        let result = sqlx::query_as::<_, ChannelRow>(&format!(
            r#"
            INSERT INTO notification_channels
                (owner_id, type, target, is_verified, is_enabled, is_default, created_at, updated_at)
            VALUES ($1, $2, $3, $4, TRUE, $5, $6, $6)
            RETURNING {}
            "#,
            CHANNEL_COLUMNS
        ))
        .bind(channel.owner_id)
        .bind(channel.channel_type.as_str())
        .bind(&channel.target)
        .bind(channel.is_verified)
        .bind(channel.is_default)
        .bind(now)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => to_channel(row),
            Err(e) if is_unique_violation(&e) => Err(RepositoryError::Conflict(format!(
                "{} channel for {} already exists",
                channel.channel_type, channel.target
            ))
            .into()),
            Err(e) => Err(db(e)),
        }
    }

    async fn get_channel(&self, id: Id) -> StoreResult<Option<Channel>> {
        let row = sqlx::query_as::<_, ChannelRow>(&format!(
            "SELECT {} FROM notification_channels WHERE id = $1",
            CHANNEL_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;

        row.map(to_channel).transpose()
    }

    async fn list_channels(&self, owner_id: Id) -> StoreResult<Vec<Channel>> {
        let rows = sqlx::query_as::<_, ChannelRow>(&format!(
            "SELECT {} FROM notification_channels WHERE owner_id = $1 ORDER BY id",
            CHANNEL_COLUMNS
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;

        rows.into_iter().map(to_channel).collect()
    }

    async fn set_channel_enabled(&self, id: Id, enabled: bool) -> StoreResult<Channel> {
        self.update_channel(id, "is_enabled", enabled).await
    }

    async fn mark_channel_verified(&self, id: Id) -> StoreResult<Channel> {
        self.update_channel(id, "is_verified", true).await
    }

    async fn delete_channel(&self, id: Id) -> StoreResult<bool> {
        // Subscription, code and snapshot rows go with it via ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM notification_channels WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db)?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_subscription(&self, channel_id: Id) -> StoreResult<Option<Subscription>> {
        let all = sqlx::query_scalar::<_, bool>(
            "SELECT subscribe_to_all_services FROM channel_subscriptions WHERE channel_id = $1",
        )
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;

        let Some(all) = all else {
            return Ok(None);
        };

        let service_ids = sqlx::query_scalar::<_, i64>(
            "SELECT service_id FROM channel_subscription_services WHERE channel_id = $1 ORDER BY service_id",
        )
        .bind(channel_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;

        Ok(Some(Subscription {
            channel_id,
            subscribe_to_all_services: all,
            service_ids,
        }))
    }

    async fn replace_subscription(&self, subscription: Subscription) -> StoreResult<Subscription> {
        let mut tx = self.pool.begin().await.map_err(db)?;

        let exists = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM notification_channels WHERE id = $1 FOR UPDATE",
        )
        .bind(subscription.channel_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db)?;
        if exists.is_none() {
            return Err(StoreError::not_found("channel", subscription.channel_id));
        }

        sqlx::query(
            r#"
            INSERT INTO channel_subscriptions (channel_id, subscribe_to_all_services, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (channel_id)
            DO UPDATE SET subscribe_to_all_services = EXCLUDED.subscribe_to_all_services,
                          updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(subscription.channel_id)
        .bind(subscription.subscribe_to_all_services)
        .bind(self.clock.now())
        .execute(&mut *tx)
        .await
        .map_err(db)?;

        sqlx::query("DELETE FROM channel_subscription_services WHERE channel_id = $1")
            .bind(subscription.channel_id)
            .execute(&mut *tx)
            .await
            .map_err(db)?;

        if !subscription.subscribe_to_all_services && !subscription.service_ids.is_empty() {
            sqlx::query(
                r#"
                INSERT INTO channel_subscription_services (channel_id, service_id)
                SELECT $1, UNNEST($2::BIGINT[])
                "#,
            )
            .bind(subscription.channel_id)
            .bind(&subscription.service_ids)
            .execute(&mut *tx)
            .await
            .map_err(db)?;
        }

        tx.commit().await.map_err(db)?;
        Ok(subscription)
    }

    async fn list_subscriptions(&self, owner_id: Id) -> StoreResult<Vec<ChannelSubscriptions>> {
        let rows = sqlx::query_as::<_, SubscriptionMatrixRow>(
            r#"
            SELECT c.id AS channel_id,
                   c.type AS channel_type,
                   c.target,
                   COALESCE(s.subscribe_to_all_services, FALSE) AS subscribe_to_all_services,
                   COALESCE(
                       ARRAY_AGG(ss.service_id ORDER BY ss.service_id)
                           FILTER (WHERE ss.service_id IS NOT NULL),
                       '{}'::BIGINT[]
                   ) AS service_ids
            FROM notification_channels c
            LEFT JOIN channel_subscriptions s ON s.channel_id = c.id
            LEFT JOIN channel_subscription_services ss ON ss.channel_id = c.id
            WHERE c.owner_id = $1
            GROUP BY c.id, s.subscribe_to_all_services
            ORDER BY c.id
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;

        rows.into_iter()
            .map(|row| ChannelSubscriptions::try_from(row).map_err(StoreError::from))
            .collect()
    }

    async fn resolve_recipients(&self, service_ids: &[Id]) -> StoreResult<Vec<Id>> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT c.id
            FROM notification_channels c
            JOIN channel_subscriptions s ON s.channel_id = c.id
            WHERE c.is_verified AND c.is_enabled
              AND (
                  s.subscribe_to_all_services
                  OR EXISTS (
                      SELECT 1 FROM channel_subscription_services ss
                      WHERE ss.channel_id = c.id AND ss.service_id = ANY($1)
                  )
              )
            ORDER BY c.id
            "#,
        )
        .bind(service_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(db)
    }
}

#[async_trait]
impl VerificationCodeStore for PgChannelStore {
    async fn get_code(&self, channel_id: Id) -> StoreResult<Option<VerificationCode>> {
        let row = sqlx::query_as::<_, VerificationCodeRow>(
            r#"
            SELECT channel_id, code, expires_at, attempt_count, created_at
            FROM channel_verification_codes
            WHERE channel_id = $1
            "#,
        )
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;

        Ok(row.map(VerificationCode::from))
    }

    async fn replace_code(&self, code: VerificationCode) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO channel_verification_codes
                (channel_id, code, expires_at, attempt_count, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (channel_id)
            DO UPDATE SET code = EXCLUDED.code,
                          expires_at = EXCLUDED.expires_at,
                          attempt_count = EXCLUDED.attempt_count,
                          created_at = EXCLUDED.created_at
            "#,
        )
        .bind(code.channel_id)
        .bind(&code.code)
        .bind(code.expires_at)
        .bind(code.attempt_count)
        .bind(code.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_foreign_key_violation(&e) => {
                Err(StoreError::not_found("channel", code.channel_id))
            }
            Err(e) => Err(db(e)),
        }
    }

    async fn consume_attempt(
        &self,
        channel_id: Id,
        max_attempts: i32,
    ) -> StoreResult<Option<VerificationCode>> {
        let row = sqlx::query_as::<_, VerificationCodeRow>(
            r#"
            UPDATE channel_verification_codes
            SET attempt_count = attempt_count + 1
            WHERE channel_id = $1 AND attempt_count < $2
            RETURNING channel_id, code, expires_at, attempt_count, created_at
            "#,
        )
        .bind(channel_id)
        .bind(max_attempts)
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;

        Ok(row.map(VerificationCode::from))
    }

    async fn delete_code(&self, channel_id: Id) -> StoreResult<()> {
        sqlx::query("DELETE FROM channel_verification_codes WHERE channel_id = $1")
            .bind(channel_id)
            .execute(&self.pool)
            .await
            .map_err(db)?;
        Ok(())
    }
}
