//! Storage interfaces
//!
//! The delivery pipeline talks to persistence only through these traits.
//! `sh-db` provides the PostgreSQL implementations, [`crate::memory`] the
//! in-memory ones used in development and tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sh_core::traits::Id;
use sh_models::{
    Channel, ChannelSubscriptions, NewChannel, NewQueueItem, QueueItem, QueueStats, QueueStatus,
    Subscription, VerificationCode,
};
use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Id },
    #[error("Queue item {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Id,
        from: QueueStatus,
        to: QueueStatus,
    },
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Storage error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// `last_error` of an item whose claim timed out and was taken over
pub const CLAIM_EXPIRED: &str = "claim expired before an outcome was recorded";

impl StoreError {
    pub fn not_found(entity: &'static str, id: Id) -> Self {
        StoreError::NotFound { entity, id }
    }
}

impl From<StoreError> for sh_core::ShError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => sh_core::ShError::not_found(entity, id),
            StoreError::Conflict(message) => sh_core::ShError::conflict(message),
            StoreError::InvalidTransition { .. } | StoreError::Serialization(_) => {
                sh_core::ShError::Internal(err.to_string())
            }
            StoreError::Backend(message) => sh_core::ShError::Database(message),
        }
    }
}

/// Durable, at-least-once notification queue
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert one item as pending with zero attempts
    async fn enqueue(&self, item: NewQueueItem) -> StoreResult<QueueItem>;

    /// Insert all items or none
    async fn enqueue_batch(&self, items: Vec<NewQueueItem>) -> StoreResult<Vec<QueueItem>>;

    /// Claim up to `limit` due pending items and flip them to processing
    ///
    /// Items left in processing longer than the store's claim timeout are
    /// claimed again with `attempts + 1`. Concurrent callers never receive
    /// the same item.
    async fn fetch_pending(&self, limit: usize) -> StoreResult<Vec<QueueItem>>;

    /// Terminal success
    async fn mark_as_sent(&self, id: Id) -> StoreResult<()>;

    /// Back to pending with `attempts + 1`, invisible until `next_attempt_at`
    async fn mark_for_retry(
        &self,
        id: Id,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Terminal failure
    async fn mark_as_failed(&self, id: Id, error: &str) -> StoreResult<()>;

    async fn get_queue_stats(&self) -> StoreResult<QueueStats>;

    /// Delete sent items last updated more than `age` ago
    async fn delete_old_sent_items(&self, age: Duration) -> StoreResult<u64>;

    async fn get(&self, id: Id) -> StoreResult<Option<QueueItem>>;
}

/// Channels and their subscriptions
#[async_trait]
pub trait ChannelStore: Send + Sync {
    /// Conflict on a duplicate `(owner, type, target)` or a second default
    async fn create_channel(&self, channel: NewChannel) -> StoreResult<Channel>;

    async fn get_channel(&self, id: Id) -> StoreResult<Option<Channel>>;

    /// Channels of one owner, oldest first
    async fn list_channels(&self, owner_id: Id) -> StoreResult<Vec<Channel>>;

    async fn set_channel_enabled(&self, id: Id, enabled: bool) -> StoreResult<Channel>;

    async fn mark_channel_verified(&self, id: Id) -> StoreResult<Channel>;

    /// Remove the channel with its subscription, code and snapshot rows
    async fn delete_channel(&self, id: Id) -> StoreResult<bool>;

    async fn get_subscription(&self, channel_id: Id) -> StoreResult<Option<Subscription>>;

    /// Replace the channel's subscription wholesale
    async fn replace_subscription(&self, subscription: Subscription) -> StoreResult<Subscription>;

    /// Subscription matrix of one owner, one row per channel
    async fn list_subscriptions(&self, owner_id: Id) -> StoreResult<Vec<ChannelSubscriptions>>;

    /// Verified, enabled channels subscribed to all services or any of `service_ids`
    async fn resolve_recipients(&self, service_ids: &[Id]) -> StoreResult<Vec<Id>>;
}

/// At most one live verification code per channel
#[async_trait]
pub trait VerificationCodeStore: Send + Sync {
    async fn get_code(&self, channel_id: Id) -> StoreResult<Option<VerificationCode>>;

    /// Store `code`, replacing any previous one for the channel
    async fn replace_code(&self, code: VerificationCode) -> StoreResult<()>;

    /// Spend one attempt on the channel's code unless `max_attempts` are used up
    ///
    /// Returns the code with its new count, or `None` when there is no code or
    /// the ceiling was already reached. Check and increment are one atomic step.
    async fn consume_attempt(
        &self,
        channel_id: Id,
        max_attempts: i32,
    ) -> StoreResult<Option<VerificationCode>>;

    async fn delete_code(&self, channel_id: Id) -> StoreResult<()>;
}

/// Recipient sets frozen at event creation
///
/// Implemented by the queue stores: freezing the set and enqueuing the
/// initial messages is a single write.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Freeze `channel_ids` as the event's recipients and enqueue `items`, all or nothing
    ///
    /// Returns `None` and enqueues nothing when the event already has a snapshot.
    async fn freeze_recipients(
        &self,
        event_id: Id,
        channel_ids: &[Id],
        items: Vec<NewQueueItem>,
    ) -> StoreResult<Option<Vec<QueueItem>>>;

    /// `None` when the event never got a snapshot
    async fn load_snapshot(&self, event_id: Id) -> StoreResult<Option<Vec<Id>>>;
}

/// Read-only view of the externally owned service catalog
#[async_trait]
pub trait ServiceCatalog: Send + Sync {
    /// Ids from `ids` that do not exist in the catalog
    async fn missing_services(&self, ids: &[Id]) -> StoreResult<Vec<Id>>;
}
