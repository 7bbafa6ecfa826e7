//! In-memory stores for development and tests
//!
//! Every operation takes the store's write lock for its whole duration, which
//! gives the same atomicity the PostgreSQL stores get from transactions and
//! `FOR UPDATE SKIP LOCKED`.
//!
//! Recipient snapshots live with the queue so that freezing them and
//! enqueuing the initial batch happen under one lock. Unlike the PostgreSQL
//! schema, a deleted channel stays in the snapshots here; its later items are
//! failed by the worker.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sh_core::clock::SharedClock;
use sh_core::config::NotificationConfig;
use sh_core::traits::Id;
use sh_models::{
    Channel, ChannelSubscriptions, NewChannel, NewQueueItem, QueueItem, QueueStats, QueueStatus,
    Subscription, VerificationCode,
};
use tokio::sync::RwLock;

use crate::store::{
    ChannelStore, QueueStore, ServiceCatalog, SnapshotStore, StoreError, StoreResult,
    VerificationCodeStore, CLAIM_EXPIRED,
};

#[derive(Default)]
struct QueueState {
    items: BTreeMap<Id, QueueItem>,
    snapshots: HashMap<Id, Vec<Id>>,
    next_id: Id,
}

impl QueueState {
    fn insert(&mut self, item: NewQueueItem, now: DateTime<Utc>) -> QueueItem {
        self.next_id += 1;
        let stored = QueueItem {
            id: self.next_id,
            event_id: item.event_id,
            channel_id: item.channel_id,
            message_kind: item.message_kind,
            payload: item.payload,
            status: QueueStatus::Pending,
            attempts: 0,
            max_attempts: item.max_attempts,
            next_attempt_at: item.next_attempt_at.unwrap_or(now),
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        self.items.insert(stored.id, stored.clone());
        stored
    }

    /// Apply a state-machine edge or reject it
    fn transition(&mut self, id: Id, to: QueueStatus) -> StoreResult<&mut QueueItem> {
        let item = self
            .items
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("queue item", id))?;
        if !item.status.can_transition_to(to) {
            return Err(StoreError::InvalidTransition {
                id,
                from: item.status,
                to,
            });
        }
        item.status = to;
        Ok(item)
    }

    /// Flip a due item to processing, or take over an expired claim
    fn claim(&mut self, id: Id, now: DateTime<Utc>) -> StoreResult<QueueItem> {
        let expired = self
            .items
            .get(&id)
            .is_some_and(|item| item.status == QueueStatus::Processing);

        let item = if expired {
            let item = self
                .items
                .get_mut(&id)
                .ok_or_else(|| StoreError::not_found("queue item", id))?;
            item.attempts += 1;
            item.last_error = Some(CLAIM_EXPIRED.to_string());
            item
        } else {
            self.transition(id, QueueStatus::Processing)?
        };
        item.updated_at = now;
        Ok(item.clone())
    }
}

/// In-memory notification queue
pub struct MemoryQueueStore {
    state: RwLock<QueueState>,
    clock: SharedClock,
    claim_timeout: Duration,
}

impl MemoryQueueStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            state: RwLock::new(QueueState::default()),
            clock,
            claim_timeout: NotificationConfig::default().claim_timeout(),
        }
    }

    pub fn with_claim_timeout(mut self, claim_timeout: Duration) -> Self {
        self.claim_timeout = claim_timeout;
        self
    }

    /// Every item regardless of status, ordered by id
    pub async fn all(&self) -> Vec<QueueItem> {
        self.state.read().await.items.values().cloned().collect()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn enqueue(&self, item: NewQueueItem) -> StoreResult<QueueItem> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        Ok(state.insert(item, now))
    }

    async fn enqueue_batch(&self, items: Vec<NewQueueItem>) -> StoreResult<Vec<QueueItem>> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        Ok(items.into_iter().map(|item| state.insert(item, now)).collect())
    }

    async fn fetch_pending(&self, limit: usize) -> StoreResult<Vec<QueueItem>> {
        let now = self.clock.now();
        let stale_before = now - self.claim_timeout;
        let mut state = self.state.write().await;

        let mut due: Vec<(DateTime<Utc>, Id)> = state
            .items
            .values()
            .filter(|item| item.is_due(now) || item.claim_expired(stale_before))
            .map(|item| (item.next_attempt_at, item.id))
            .collect();
        due.sort_unstable();
        due.truncate(limit);

        let mut claimed = Vec::with_capacity(due.len());
        for (_, id) in due {
            claimed.push(state.claim(id, now)?);
        }
        Ok(claimed)
    }

    async fn mark_as_sent(&self, id: Id) -> StoreResult<()> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let item = state.transition(id, QueueStatus::Sent)?;
        item.updated_at = now;
        Ok(())
    }

    async fn mark_for_retry(
        &self,
        id: Id,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let item = state.transition(id, QueueStatus::Pending)?;
        item.attempts += 1;
        item.last_error = Some(error.to_string());
        item.next_attempt_at = next_attempt_at;
        item.updated_at = now;
        Ok(())
    }

    async fn mark_as_failed(&self, id: Id, error: &str) -> StoreResult<()> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let item = state.transition(id, QueueStatus::Failed)?;
        item.last_error = Some(error.to_string());
        item.updated_at = now;
        Ok(())
    }

    async fn get_queue_stats(&self) -> StoreResult<QueueStats> {
        let state = self.state.read().await;
        let mut stats = QueueStats::default();
        for item in state.items.values() {
            stats.record(item.status, 1);
        }
        Ok(stats)
    }

    async fn delete_old_sent_items(&self, age: Duration) -> StoreResult<u64> {
        let cutoff = self.clock.now() - age;
        let mut state = self.state.write().await;
        let before = state.items.len();
        state
            .items
            .retain(|_, item| !(item.status == QueueStatus::Sent && item.updated_at < cutoff));
        Ok((before - state.items.len()) as u64)
    }

    async fn get(&self, id: Id) -> StoreResult<Option<QueueItem>> {
        Ok(self.state.read().await.items.get(&id).cloned())
    }
}

#[async_trait]
impl SnapshotStore for MemoryQueueStore {
    async fn freeze_recipients(
        &self,
        event_id: Id,
        channel_ids: &[Id],
        items: Vec<NewQueueItem>,
    ) -> StoreResult<Option<Vec<QueueItem>>> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        if state.snapshots.contains_key(&event_id) {
            return Ok(None);
        }
        state.snapshots.insert(event_id, channel_ids.to_vec());
        Ok(Some(
            items.into_iter().map(|item| state.insert(item, now)).collect(),
        ))
    }

    async fn load_snapshot(&self, event_id: Id) -> StoreResult<Option<Vec<Id>>> {
        Ok(self.state.read().await.snapshots.get(&event_id).cloned())
    }
}

#[derive(Default)]
struct ChannelState {
    channels: BTreeMap<Id, Channel>,
    subscriptions: HashMap<Id, Subscription>,
    codes: HashMap<Id, VerificationCode>,
    next_id: Id,
}

impl ChannelState {
    fn channel_mut(&mut self, id: Id) -> StoreResult<&mut Channel> {
        self.channels
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("channel", id))
    }
}

/// In-memory channels, subscriptions and verification codes
pub struct MemoryChannelStore {
    state: RwLock<ChannelState>,
    clock: SharedClock,
}

impl MemoryChannelStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            state: RwLock::new(ChannelState::default()),
            clock,
        }
    }
}

#[async_trait]
impl ChannelStore for MemoryChannelStore {
    async fn create_channel(&self, channel: NewChannel) -> StoreResult<Channel> {
        let now = self.clock.now();
        let mut state = self.state.write().await;

        for existing in state.channels.values().filter(|c| c.owner_id == channel.owner_id) {
            if existing.channel_type == channel.channel_type && existing.target == channel.target {
                return Err(StoreError::Conflict(format!(
                    "{} channel for {} already exists",
                    channel.channel_type, channel.target
                )));
            }
            if channel.is_default && existing.is_default {
                return Err(StoreError::Conflict("default channel already exists".into()));
            }
        }

        state.next_id += 1;
        let created = Channel {
            id: state.next_id,
            owner_id: channel.owner_id,
            channel_type: channel.channel_type,
            target: channel.target,
            is_verified: channel.is_verified,
            is_enabled: true,
            is_default: channel.is_default,
            created_at: now,
            updated_at: now,
        };
        state.channels.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_channel(&self, id: Id) -> StoreResult<Option<Channel>> {
        Ok(self.state.read().await.channels.get(&id).cloned())
    }

    async fn list_channels(&self, owner_id: Id) -> StoreResult<Vec<Channel>> {
        let state = self.state.read().await;
        Ok(state
            .channels
            .values()
            .filter(|c| c.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn set_channel_enabled(&self, id: Id, enabled: bool) -> StoreResult<Channel> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let channel = state.channel_mut(id)?;
        channel.is_enabled = enabled;
        channel.updated_at = now;
        Ok(channel.clone())
    }

    async fn mark_channel_verified(&self, id: Id) -> StoreResult<Channel> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let channel = state.channel_mut(id)?;
        channel.is_verified = true;
        channel.updated_at = now;
        Ok(channel.clone())
    }

    async fn delete_channel(&self, id: Id) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        if state.channels.remove(&id).is_none() {
            return Ok(false);
        }
        state.subscriptions.remove(&id);
        state.codes.remove(&id);
        Ok(true)
    }

    async fn get_subscription(&self, channel_id: Id) -> StoreResult<Option<Subscription>> {
        Ok(self.state.read().await.subscriptions.get(&channel_id).cloned())
    }

    async fn replace_subscription(&self, subscription: Subscription) -> StoreResult<Subscription> {
        let mut state = self.state.write().await;
        if !state.channels.contains_key(&subscription.channel_id) {
            return Err(StoreError::not_found("channel", subscription.channel_id));
        }
        state
            .subscriptions
            .insert(subscription.channel_id, subscription.clone());
        Ok(subscription)
    }

    async fn list_subscriptions(&self, owner_id: Id) -> StoreResult<Vec<ChannelSubscriptions>> {
        let state = self.state.read().await;
        Ok(state
            .channels
            .values()
            .filter(|c| c.owner_id == owner_id)
            .map(|c| ChannelSubscriptions::from_parts(c, state.subscriptions.get(&c.id)))
            .collect())
    }

    async fn resolve_recipients(&self, service_ids: &[Id]) -> StoreResult<Vec<Id>> {
        let mut wanted = service_ids.to_vec();
        wanted.sort_unstable();
        wanted.dedup();

        let state = self.state.read().await;
        Ok(state
            .channels
            .values()
            .filter(|c| c.is_sendable())
            .filter(|c| {
                state
                    .subscriptions
                    .get(&c.id)
                    .is_some_and(|s| s.covers(&wanted))
            })
            .map(|c| c.id)
            .collect())
    }
}

#[async_trait]
impl VerificationCodeStore for MemoryChannelStore {
    async fn get_code(&self, channel_id: Id) -> StoreResult<Option<VerificationCode>> {
        Ok(self.state.read().await.codes.get(&channel_id).cloned())
    }

    async fn replace_code(&self, code: VerificationCode) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if !state.channels.contains_key(&code.channel_id) {
            return Err(StoreError::not_found("channel", code.channel_id));
        }
        state.codes.insert(code.channel_id, code);
        Ok(())
    }

    async fn consume_attempt(
        &self,
        channel_id: Id,
        max_attempts: i32,
    ) -> StoreResult<Option<VerificationCode>> {
        let mut state = self.state.write().await;
        Ok(state
            .codes
            .get_mut(&channel_id)
            .filter(|code| !code.attempts_exhausted(max_attempts))
            .map(|code| {
                code.attempt_count += 1;
                code.clone()
            }))
    }

    async fn delete_code(&self, channel_id: Id) -> StoreResult<()> {
        self.state.write().await.codes.remove(&channel_id);
        Ok(())
    }
}

/// Fixed set of known service ids
#[derive(Default)]
pub struct MemoryServiceCatalog {
    ids: RwLock<HashSet<Id>>,
}

impl MemoryServiceCatalog {
    pub fn new(ids: impl IntoIterator<Item = Id>) -> Self {
        Self {
            ids: RwLock::new(ids.into_iter().collect()),
        }
    }

    pub async fn add(&self, id: Id) {
        self.ids.write().await.insert(id);
    }
}

#[async_trait]
impl ServiceCatalog for MemoryServiceCatalog {
    async fn missing_services(&self, ids: &[Id]) -> StoreResult<Vec<Id>> {
        let known = self.ids.read().await;
        Ok(ids.iter().copied().filter(|id| !known.contains(id)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use sh_core::clock::{Clock, ManualClock};
    use sh_models::{ChannelType, MessageKind};

    fn new_item(channel_id: Id) -> NewQueueItem {
        NewQueueItem::new(1, channel_id, MessageKind::Initial, serde_json::json!({}), 3)
    }

    fn queue() -> (Arc<ManualClock>, Arc<MemoryQueueStore>) {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(MemoryQueueStore::new(clock.clone()));
        (clock, store)
    }

    #[tokio::test]
    async fn test_fetch_claims_each_item_once() {
        let (_, store) = queue();
        store
            .enqueue_batch((1..=5).map(new_item).collect())
            .await
            .unwrap();

        let first = store.fetch_pending(3).await.unwrap();
        let second = store.fetch_pending(10).await.unwrap();
        let third = store.fetch_pending(10).await.unwrap();

        assert_eq!(first.len(), 3);
        assert_eq!(second.len(), 2);
        assert!(third.is_empty());
        assert!(first
            .iter()
            .all(|a| second.iter().all(|b| a.id != b.id)));
        assert!(first.iter().all(|i| i.status == QueueStatus::Processing));
    }

    #[tokio::test]
    async fn test_concurrent_fetches_never_overlap() {
        let (_, store) = queue();
        store
            .enqueue_batch((1..=50).map(new_item).collect())
            .await
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.fetch_pending(10).await.unwrap() })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for item in handle.await.unwrap() {
                assert!(seen.insert(item.id), "item {} claimed twice", item.id);
            }
        }
        assert_eq!(seen.len(), 50);
    }

    #[tokio::test]
    async fn test_retry_hides_item_until_due() {
        let (clock, store) = queue();
        store.enqueue(new_item(1)).await.unwrap();

        let claimed = store.fetch_pending(10).await.unwrap();
        assert_eq!(claimed.len(), 1);

        let id = claimed[0].id;
        store
            .mark_for_retry(id, "timeout", clock.now() + Duration::hours(1))
            .await
            .unwrap();

        assert!(store.fetch_pending(10).await.unwrap().is_empty());
        let item = store.get(id).await.unwrap().unwrap();
        assert_eq!(item.attempts, 1);
        assert_eq!(item.status, QueueStatus::Pending);
        assert_eq!(item.last_error.as_deref(), Some("timeout"));

        clock.advance(Duration::hours(1));
        assert_eq!(store.fetch_pending(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_terminal_items_are_immutable() {
        let (clock, store) = queue();
        let item = store.enqueue(new_item(1)).await.unwrap();
        store.fetch_pending(1).await.unwrap();
        store.mark_as_failed(item.id, "bad target").await.unwrap();

        let err = store
            .mark_for_retry(item.id, "again", clock.now())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
        assert!(store.mark_as_sent(item.id).await.is_err());
        assert!(store.fetch_pending(10).await.unwrap().is_empty());

        let stats = store.get_queue_stats().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.total(), 1);
    }

    #[tokio::test]
    async fn test_retention_only_removes_old_sent_items() {
        let (clock, store) = queue();
        store
            .enqueue_batch((1..=3).map(new_item).collect())
            .await
            .unwrap();
        let claimed = store.fetch_pending(2).await.unwrap();
        store.mark_as_sent(claimed[0].id).await.unwrap();
        store.mark_as_failed(claimed[1].id, "nope").await.unwrap();

        clock.advance(Duration::days(8));
        let removed = store.delete_old_sent_items(Duration::days(7)).await.unwrap();
        assert_eq!(removed, 1);

        let stats = store.get_queue_stats().await.unwrap();
        assert_eq!(stats.sent, 0);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending, 1);
    }

    #[tokio::test]
    async fn test_snapshot_is_written_once_with_its_items() {
        let (_, store) = queue();
        let first = store
            .freeze_recipients(1, &[1, 2], vec![new_item(1), new_item(2)])
            .await
            .unwrap();
        assert_eq!(first.map(|items| items.len()), Some(2));

        let second = store
            .freeze_recipients(1, &[5], vec![new_item(5)])
            .await
            .unwrap();
        assert!(second.is_none());

        assert_eq!(store.load_snapshot(1).await.unwrap(), Some(vec![1, 2]));
        assert_eq!(store.load_snapshot(2).await.unwrap(), None);
        assert_eq!(store.get_queue_stats().await.unwrap().pending, 2);
    }

    #[tokio::test]
    async fn test_expired_claim_is_reclaimed() {
        let clock = Arc::new(ManualClock::starting_now());
        let store =
            MemoryQueueStore::new(clock.clone()).with_claim_timeout(Duration::seconds(60));
        store.enqueue(new_item(1)).await.unwrap();

        let claimed = store.fetch_pending(10).await.unwrap();
        assert_eq!(claimed.len(), 1);

        // Still leased
        clock.advance(Duration::seconds(30));
        assert!(store.fetch_pending(10).await.unwrap().is_empty());

        clock.advance(Duration::seconds(31));
        let reclaimed = store.fetch_pending(10).await.unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].id, claimed[0].id);
        assert_eq!(reclaimed[0].status, QueueStatus::Processing);
        assert_eq!(reclaimed[0].attempts, 1);
        assert_eq!(reclaimed[0].last_error.as_deref(), Some(CLAIM_EXPIRED));
        assert_eq!(reclaimed[0].updated_at, clock.now());

        // The new lease starts from the reclaim
        assert!(store.fetch_pending(10).await.unwrap().is_empty());
        store.mark_as_sent(reclaimed[0].id).await.unwrap();
        assert_eq!(store.get_queue_stats().await.unwrap().sent, 1);
    }

    fn channels() -> MemoryChannelStore {
        MemoryChannelStore::new(Arc::new(ManualClock::starting_now()))
    }

    #[tokio::test]
    async fn test_duplicate_target_conflicts() {
        let store = channels();
        store
            .create_channel(NewChannel::new(1, ChannelType::Bot, "42"))
            .await
            .unwrap();
        let err = store
            .create_channel(NewChannel::new(1, ChannelType::Bot, "42"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        // Another owner may use the same target
        assert!(store
            .create_channel(NewChannel::new(2, ChannelType::Bot, "42"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_resolve_recipients_filters() {
        let store = channels();
        let all = store
            .create_channel(NewChannel::default_for(1, "a@example.com"))
            .await
            .unwrap();
        let listed = store
            .create_channel(NewChannel::default_for(2, "b@example.com"))
            .await
            .unwrap();
        let unverified = store
            .create_channel(NewChannel::new(3, ChannelType::Email, "c@example.com"))
            .await
            .unwrap();
        let unsubscribed = store
            .create_channel(NewChannel::default_for(4, "d@example.com"))
            .await
            .unwrap();

        store.replace_subscription(Subscription::all_services(all.id)).await.unwrap();
        store
            .replace_subscription(Subscription::services(listed.id, [10]))
            .await
            .unwrap();
        store
            .replace_subscription(Subscription::all_services(unverified.id))
            .await
            .unwrap();

        assert_eq!(store.resolve_recipients(&[10]).await.unwrap(), vec![all.id, listed.id]);
        assert_eq!(store.resolve_recipients(&[11]).await.unwrap(), vec![all.id]);

        store.set_channel_enabled(all.id, false).await.unwrap();
        assert_eq!(store.resolve_recipients(&[10]).await.unwrap(), vec![listed.id]);
        assert!(!store
            .resolve_recipients(&[10])
            .await
            .unwrap()
            .contains(&unsubscribed.id));
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let store = channels();
        let channel = store
            .create_channel(NewChannel::new(1, ChannelType::Email, "x@example.com"))
            .await
            .unwrap();
        store
            .replace_subscription(Subscription::all_services(channel.id))
            .await
            .unwrap();
        store
            .replace_code(VerificationCode::new(channel.id, "123456", Utc::now(), Duration::minutes(15)))
            .await
            .unwrap();

        assert!(store.delete_channel(channel.id).await.unwrap());
        assert!(store.get_subscription(channel.id).await.unwrap().is_none());
        assert!(store.get_code(channel.id).await.unwrap().is_none());
        assert!(!store.delete_channel(channel.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_consume_attempt_stops_at_ceiling() {
        let store = channels();
        assert!(store.consume_attempt(7, 5).await.unwrap().is_none());

        store
            .replace_code(VerificationCode::new(7, "123456", Utc::now(), Duration::minutes(15)))
            .await
            .unwrap();
        for expected in 1..=2 {
            let code = store.consume_attempt(7, 2).await.unwrap().unwrap();
            assert_eq!(code.attempt_count, expected);
        }
        assert!(store.consume_attempt(7, 2).await.unwrap().is_none());
        assert_eq!(store.get_code(7).await.unwrap().unwrap().attempt_count, 2);
    }

    #[tokio::test]
    async fn test_concurrent_attempts_respect_ceiling() {
        let store = Arc::new(channels());
        store
            .replace_code(VerificationCode::new(7, "123456", Utc::now(), Duration::minutes(15)))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.consume_attempt(7, 5).await.unwrap().is_some()
            }));
        }
        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                granted += 1;
            }
        }

        assert_eq!(granted, 5);
        assert_eq!(store.get_code(7).await.unwrap().unwrap().attempt_count, 5);
    }

    #[tokio::test]
    async fn test_catalog_reports_missing() {
        let catalog = MemoryServiceCatalog::new([1, 2]);
        assert_eq!(catalog.missing_services(&[1, 3]).await.unwrap(), vec![3]);
    }
}
