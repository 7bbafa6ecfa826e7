//! Worker pool and retention sweeper
//!
//! Each worker loop claims a batch on every tick and processes it to
//! completion before it looks at the cancellation token again, so stopping
//! the pool never abandons a claimed item halfway.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use sh_core::clock::SharedClock;
use sh_core::config::{BackoffExponent, NotificationConfig};
use sh_models::QueueItem;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dispatcher::Dispatcher;
use crate::store::{QueueStore, StoreResult};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkerPoolError {
    #[error("Worker pool is already running")]
    AlreadyRunning,
    #[error("Worker pool has been stopped")]
    Stopped,
}

/// Worker pool configuration
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerPoolConfig {
    pub batch_size: usize,
    pub poll_interval: Duration,
    /// Ceiling applied on top of each item's own `max_attempts`
    pub max_attempts: i32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    pub backoff_exponent: BackoffExponent,
    pub num_workers: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self::from(&NotificationConfig::default())
    }
}

impl From<&NotificationConfig> for WorkerPoolConfig {
    fn from(config: &NotificationConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            max_attempts: config.max_attempts,
            initial_backoff: Duration::from_secs(config.initial_backoff_seconds),
            max_backoff: Duration::from_secs(config.max_backoff_seconds),
            backoff_multiplier: config.backoff_multiplier,
            backoff_exponent: config.backoff_exponent,
            num_workers: config.num_workers,
        }
    }
}

impl WorkerPoolConfig {
    /// `min(initial * multiplier^n, max)` where `n` is `attempts`, or
    /// `attempts + 1` with [`BackoffExponent::AfterIncrement`]
    pub fn backoff_delay(&self, attempts: i32) -> Duration {
        let attempts = attempts.max(0);
        let exponent = match self.backoff_exponent {
            BackoffExponent::BeforeIncrement => attempts,
            BackoffExponent::AfterIncrement => attempts.saturating_add(1),
        };

        let delay = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = delay.min(self.max_backoff.as_secs_f64());
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.max_backoff
        }
    }
}

/// Delivery outcome counters since start
#[derive(Debug, Default)]
pub struct PoolCounters {
    sent: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub sent: u64,
    pub retried: u64,
    pub failed: u64,
}

impl PoolCounters {
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// What happened to one claimed item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Sent,
    Retried,
    Failed,
}

/// Claims batches and resolves each item to sent, retry or failed
pub struct DeliveryWorker {
    store: Arc<dyn QueueStore>,
    dispatcher: Arc<Dispatcher>,
    clock: SharedClock,
    config: WorkerPoolConfig,
    counters: Arc<PoolCounters>,
}

impl DeliveryWorker {
    pub fn new(
        store: Arc<dyn QueueStore>,
        dispatcher: Arc<Dispatcher>,
        clock: SharedClock,
        config: WorkerPoolConfig,
    ) -> Self {
        Self {
            store,
            dispatcher,
            clock,
            config,
            counters: Arc::new(PoolCounters::default()),
        }
    }

    pub fn counters(&self) -> Arc<PoolCounters> {
        self.counters.clone()
    }

    /// Claim one batch and process every item in it; returns the batch size
    pub async fn process_batch(&self) -> StoreResult<usize> {
        let items = self.store.fetch_pending(self.config.batch_size).await?;
        if !items.is_empty() {
            debug!(count = items.len(), "Claimed notification batch");
        }

        for item in &items {
            if let Err(e) = self.process_item(item).await {
                // fetch_pending takes the item back once its claim expires
                error!(item_id = item.id, error = %e, "Failed to record delivery outcome");
            }
        }

        Ok(items.len())
    }

    /// Dispatch one claimed item and record the outcome
    pub async fn process_item(&self, item: &QueueItem) -> StoreResult<Outcome> {
        let limit = item.max_attempts.min(self.config.max_attempts);
        if item.attempts >= limit {
            warn!(
                item_id = item.id,
                attempts = item.attempts,
                max_attempts = limit,
                "Attempts exhausted"
            );
            let reason = item
                .last_error
                .clone()
                .unwrap_or_else(|| "max attempts exceeded".to_string());
            self.store.mark_as_failed(item.id, &reason).await?;
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            return Ok(Outcome::Failed);
        }

        match self.dispatcher.dispatch(item).await {
            Ok(()) => {
                self.store.mark_as_sent(item.id).await?;
                self.counters.sent.fetch_add(1, Ordering::Relaxed);
                debug!(
                    item_id = item.id,
                    channel_id = item.channel_id,
                    event_id = item.event_id,
                    "Notification sent"
                );
                Ok(Outcome::Sent)
            }
            Err(e) if e.is_retryable() => {
                let delay = self.config.backoff_delay(item.attempts);
                let delay = chrono::Duration::from_std(delay)
                    .unwrap_or_else(|_| chrono::Duration::seconds(i64::from(u32::MAX)));
                let next_attempt_at = self.clock.now() + delay;
                self.store
                    .mark_for_retry(item.id, &e.to_string(), next_attempt_at)
                    .await?;
                self.counters.retried.fetch_add(1, Ordering::Relaxed);
                info!(
                    item_id = item.id,
                    channel_id = item.channel_id,
                    attempts = item.attempts + 1,
                    next_attempt_at = %next_attempt_at,
                    error = %e,
                    "Notification scheduled for retry"
                );
                Ok(Outcome::Retried)
            }
            Err(e) => {
                self.store.mark_as_failed(item.id, &e.to_string()).await?;
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    item_id = item.id,
                    channel_id = item.channel_id,
                    event_id = item.event_id,
                    error = %e,
                    "Notification failed permanently"
                );
                Ok(Outcome::Failed)
            }
        }
    }
}

/// Fixed set of polling loops over one queue
pub struct WorkerPool {
    worker: Arc<DeliveryWorker>,
    poll_interval: Duration,
    num_workers: usize,
    cancel: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(
        store: Arc<dyn QueueStore>,
        dispatcher: Arc<Dispatcher>,
        clock: SharedClock,
        config: WorkerPoolConfig,
    ) -> Self {
        let poll_interval = config.poll_interval;
        let num_workers = config.num_workers.max(1);
        Self {
            worker: Arc::new(DeliveryWorker::new(store, dispatcher, clock, config)),
            poll_interval,
            num_workers,
            cancel: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the polling loops
    pub fn start(&self) -> Result<(), WorkerPoolError> {
        if self.cancel.is_cancelled() {
            return Err(WorkerPoolError::Stopped);
        }
        let mut handles = self.handles.lock();
        if !handles.is_empty() {
            return Err(WorkerPoolError::AlreadyRunning);
        }

        info!(
            workers = self.num_workers,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Starting notification worker pool"
        );

        for worker_index in 0..self.num_workers {
            let worker = self.worker.clone();
            let cancel = self.cancel.clone();
            let poll_interval = self.poll_interval;
            handles.push(tokio::spawn(async move {
                poll_loop(worker_index, worker, poll_interval, cancel).await;
            }));
        }
        Ok(())
    }

    /// Cancel the loops and wait for in-flight batches to finish
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker loop panicked");
            }
        }
        info!("Notification worker pool stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.handles.lock().is_empty()
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.worker.counters.snapshot()
    }

    /// Shared handle to the live counters
    pub fn counters_handle(&self) -> Arc<PoolCounters> {
        self.worker.counters()
    }
}

async fn poll_loop(
    worker_index: usize,
    worker: Arc<DeliveryWorker>,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if let Err(e) = worker.process_batch().await {
            error!(worker = worker_index, error = %e, "Failed to claim notification batch");
        }
    }

    debug!(worker = worker_index, "Worker loop exited");
}

/// Periodically deletes old sent items
pub struct RetentionSweeper {
    store: Arc<dyn QueueStore>,
    retention: chrono::Duration,
    interval: Duration,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn QueueStore>, retention: chrono::Duration, interval: Duration) -> Self {
        Self {
            store,
            retention,
            interval,
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    pub fn from_config(store: Arc<dyn QueueStore>, config: &NotificationConfig) -> Self {
        Self::new(
            store,
            chrono::Duration::days(i64::from(config.retention_days)),
            Duration::from_secs(config.sweep_interval_seconds),
        )
    }

    /// Run one sweep; returns the number of deleted items
    pub async fn sweep_once(&self) -> StoreResult<u64> {
        sweep(self.store.as_ref(), self.retention).await
    }

    pub fn start(&self) -> Result<(), WorkerPoolError> {
        if self.cancel.is_cancelled() {
            return Err(WorkerPoolError::Stopped);
        }
        let mut slot = self.handle.lock();
        if slot.is_some() {
            return Err(WorkerPoolError::AlreadyRunning);
        }

        let store = self.store.clone();
        let retention = self.retention;
        let cancel = self.cancel.clone();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        *slot = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if let Err(e) = sweep(store.as_ref(), retention).await {
                    error!(error = %e, "Retention sweep failed");
                }
            }
            debug!("Retention sweeper exited");
        }));
        Ok(())
    }

    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Retention sweeper panicked");
            }
        }
    }
}

async fn sweep(store: &dyn QueueStore, retention: chrono::Duration) -> StoreResult<u64> {
    let removed = store.delete_old_sent_items(retention).await?;
    if removed > 0 {
        info!(removed, "Deleted old sent notifications");
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    use async_trait::async_trait;
    use chrono::Utc;
    use sh_core::clock::{Clock, ManualClock};
    use sh_models::{
        Channel, ChannelType, Event, EventKind, MessageKind, NewChannel, NewQueueItem,
        NotificationPayload, QueueStatus,
    };
    use tokio::sync::Notify;

    use crate::memory::{MemoryChannelStore, MemoryQueueStore};
    use crate::render::Renderer;
    use crate::sender::testing::RecordingSender;
    use crate::sender::{OutgoingMessage, SendError, Sender, SenderRegistry};
    use crate::store::{ChannelStore, StoreError, CLAIM_EXPIRED};

    struct Harness {
        clock: Arc<ManualClock>,
        queue: Arc<MemoryQueueStore>,
        channels: Arc<MemoryChannelStore>,
    }

    impl Harness {
        fn new() -> Self {
            let clock = Arc::new(ManualClock::starting_now());
            Self {
                queue: Arc::new(MemoryQueueStore::new(clock.clone())),
                channels: Arc::new(MemoryChannelStore::new(clock.clone())),
                clock,
            }
        }

        async fn verified_channel(&self, owner: i64, email: &str) -> Channel {
            self.channels
                .create_channel(NewChannel::default_for(owner, email))
                .await
                .unwrap()
        }

        async fn enqueue(&self, channel_id: i64, max_attempts: i32) -> i64 {
            self.queue
                .enqueue(NewQueueItem::new(
                    1,
                    channel_id,
                    MessageKind::Initial,
                    payload(),
                    max_attempts,
                ))
                .await
                .unwrap()
                .id
        }

        fn worker(&self, senders: SenderRegistry, config: WorkerPoolConfig) -> DeliveryWorker {
            DeliveryWorker::new(
                self.queue.clone(),
                Arc::new(Dispatcher::new(self.channels.clone(), senders, Renderer::default())),
                self.clock.clone(),
                config,
            )
        }
    }

    fn payload() -> serde_json::Value {
        let event = Event {
            id: 1,
            kind: EventKind::Incident,
            title: "Login failures".into(),
            description: None,
            status: "investigating".into(),
            severity: None,
            scheduled_start: None,
            scheduled_end: None,
            notify_subscribers: true,
            created_at: Utc::now(),
        };
        NotificationPayload::initial(&event, &[], Utc::now()).to_json().unwrap()
    }

    fn config() -> WorkerPoolConfig {
        WorkerPoolConfig {
            batch_size: 10,
            poll_interval: Duration::from_millis(10),
            max_attempts: 5,
            initial_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(3600),
            backoff_multiplier: 2.0,
            backoff_exponent: BackoffExponent::BeforeIncrement,
            num_workers: 2,
        }
    }

    #[test]
    fn test_backoff_before_increment() {
        let config = config();
        assert_eq!(config.backoff_delay(0), Duration::from_secs(30));
        assert_eq!(config.backoff_delay(1), Duration::from_secs(60));
        assert_eq!(config.backoff_delay(3), Duration::from_secs(240));
        assert_eq!(config.backoff_delay(10), Duration::from_secs(3600));
        assert_eq!(config.backoff_delay(10_000), Duration::from_secs(3600));
    }

    #[test]
    fn test_backoff_after_increment() {
        let config = WorkerPoolConfig {
            backoff_exponent: BackoffExponent::AfterIncrement,
            ..config()
        };
        assert_eq!(config.backoff_delay(0), Duration::from_secs(60));
        assert_eq!(config.backoff_delay(1), Duration::from_secs(120));
    }

    #[tokio::test]
    async fn test_success_marks_sent() {
        let h = Harness::new();
        let a = h.verified_channel(1, "a@example.com").await;
        let b = h.verified_channel(2, "b@example.com").await;
        let email = RecordingSender::new(ChannelType::Email);

        h.queue
            .enqueue_batch(vec![
                NewQueueItem::new(1, a.id, MessageKind::Initial, payload(), 5),
                NewQueueItem::new(1, b.id, MessageKind::Initial, payload(), 5),
            ])
            .await
            .unwrap();

        let worker = h.worker(SenderRegistry::new().with(email.clone()), config());
        assert_eq!(worker.process_batch().await.unwrap(), 2);

        let stats = h.queue.get_queue_stats().await.unwrap();
        assert_eq!(stats.sent, 2);
        assert_eq!(email.calls(), 2);
        let mut targets: Vec<String> = email.sent().into_iter().map(|m| m.to).collect();
        targets.sort();
        assert_eq!(targets, vec!["a@example.com", "b@example.com"]);
        assert_eq!(worker.counters().snapshot().sent, 2);
    }

    #[tokio::test]
    async fn test_retryable_failure_schedules_retry() {
        let h = Harness::new();
        let channel = h.verified_channel(1, "a@example.com").await;
        let id = h.enqueue(channel.id, 5).await;
        let email = RecordingSender::failing(ChannelType::Email, SendError::Retryable("timeout".into()));
        let worker = h.worker(SenderRegistry::new().with(email.clone()), config());

        worker.process_batch().await.unwrap();

        let item = h.queue.get(id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Pending);
        assert_eq!(item.attempts, 1);
        assert_eq!(item.next_attempt_at, h.clock.now() + chrono::Duration::seconds(30));
        assert!(item.last_error.unwrap().contains("timeout"));

        // Invisible until the backoff elapses
        assert_eq!(worker.process_batch().await.unwrap(), 0);
        h.clock.advance(chrono::Duration::seconds(30));
        email.succeed();
        assert_eq!(worker.process_batch().await.unwrap(), 1);
        assert_eq!(h.queue.get(id).await.unwrap().unwrap().status, QueueStatus::Sent);
    }

    #[tokio::test]
    async fn test_permanent_failure_sends_once() {
        let h = Harness::new();
        let channel = h.verified_channel(1, "a@example.com").await;
        let id = h.enqueue(channel.id, 5).await;
        let email = RecordingSender::failing(ChannelType::Email, SendError::Permanent("550 no such user".into()));
        let worker = h.worker(SenderRegistry::new().with(email.clone()), config());

        worker.process_batch().await.unwrap();
        worker.process_batch().await.unwrap();

        assert_eq!(email.calls(), 1);
        assert_eq!(h.queue.get(id).await.unwrap().unwrap().status, QueueStatus::Failed);
        assert!(h.queue.get_queue_stats().await.unwrap().failed >= 1);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_fail_without_dispatch() {
        let h = Harness::new();
        let channel = h.verified_channel(1, "a@example.com").await;
        let id = h.enqueue(channel.id, 3).await;
        let email = RecordingSender::failing(ChannelType::Email, SendError::Retryable("busy".into()));
        let worker = h.worker(SenderRegistry::new().with(email.clone()), config());

        for _ in 0..3 {
            worker.process_batch().await.unwrap();
            h.clock.advance(chrono::Duration::hours(2));
        }
        assert_eq!(email.calls(), 3);
        assert_eq!(h.queue.get(id).await.unwrap().unwrap().attempts, 3);

        worker.process_batch().await.unwrap();
        assert_eq!(email.calls(), 3);
        let item = h.queue.get(id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Failed);
        assert!(item.last_error.unwrap().contains("busy"));
    }

    #[tokio::test]
    async fn test_gated_channel_fails_without_send() {
        let h = Harness::new();
        let channel = h
            .channels
            .create_channel(NewChannel::new(1, ChannelType::Email, "new@example.com"))
            .await
            .unwrap();
        let id = h.enqueue(channel.id, 5).await;
        let email = RecordingSender::new(ChannelType::Email);
        let worker = h.worker(SenderRegistry::new().with(email.clone()), config());

        worker.process_batch().await.unwrap();

        assert_eq!(email.calls(), 0);
        assert_eq!(h.queue.get(id).await.unwrap().unwrap().status, QueueStatus::Failed);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_affect_siblings() {
        let h = Harness::new();
        let good = h.verified_channel(1, "a@example.com").await;
        let bad = h
            .channels
            .create_channel(NewChannel::default_for(2, "b@example.com"))
            .await
            .unwrap();
        h.channels.delete_channel(bad.id).await.unwrap();

        let bad_id = h.enqueue(bad.id, 5).await;
        let good_id = h.enqueue(good.id, 5).await;
        let worker = h.worker(SenderRegistry::with_log_senders(), config());

        assert_eq!(worker.process_batch().await.unwrap(), 2);
        assert_eq!(h.queue.get(bad_id).await.unwrap().unwrap().status, QueueStatus::Failed);
        assert_eq!(h.queue.get(good_id).await.unwrap().unwrap().status, QueueStatus::Sent);
    }

    /// Queue whose first `mark_as_sent` fails after the send went out
    struct LosesFirstOutcome {
        inner: Arc<MemoryQueueStore>,
        failed: AtomicBool,
    }

    #[async_trait]
    impl QueueStore for LosesFirstOutcome {
        async fn enqueue(&self, item: NewQueueItem) -> StoreResult<QueueItem> {
            self.inner.enqueue(item).await
        }

        async fn enqueue_batch(&self, items: Vec<NewQueueItem>) -> StoreResult<Vec<QueueItem>> {
            self.inner.enqueue_batch(items).await
        }

        async fn fetch_pending(&self, limit: usize) -> StoreResult<Vec<QueueItem>> {
            self.inner.fetch_pending(limit).await
        }

        async fn mark_as_sent(&self, id: i64) -> StoreResult<()> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                return Err(StoreError::Backend("connection reset".into()));
            }
            self.inner.mark_as_sent(id).await
        }

        async fn mark_for_retry(
            &self,
            id: i64,
            error: &str,
            next_attempt_at: chrono::DateTime<Utc>,
        ) -> StoreResult<()> {
            self.inner.mark_for_retry(id, error, next_attempt_at).await
        }

        async fn mark_as_failed(&self, id: i64, error: &str) -> StoreResult<()> {
            self.inner.mark_as_failed(id, error).await
        }

        async fn get_queue_stats(&self) -> StoreResult<sh_models::QueueStats> {
            self.inner.get_queue_stats().await
        }

        async fn delete_old_sent_items(&self, age: chrono::Duration) -> StoreResult<u64> {
            self.inner.delete_old_sent_items(age).await
        }

        async fn get(&self, id: i64) -> StoreResult<Option<QueueItem>> {
            self.inner.get(id).await
        }
    }

    #[tokio::test]
    async fn test_lost_outcome_is_reclaimed_after_timeout() {
        let h = Harness::new();
        let channel = h.verified_channel(1, "a@example.com").await;
        let queue = Arc::new(
            MemoryQueueStore::new(h.clock.clone()).with_claim_timeout(chrono::Duration::minutes(5)),
        );
        let id = queue
            .enqueue(NewQueueItem::new(1, channel.id, MessageKind::Initial, payload(), 5))
            .await
            .unwrap()
            .id;
        let email = RecordingSender::new(ChannelType::Email);
        let worker = DeliveryWorker::new(
            Arc::new(LosesFirstOutcome {
                inner: queue.clone(),
                failed: AtomicBool::new(false),
            }),
            Arc::new(Dispatcher::new(
                h.channels.clone(),
                SenderRegistry::new().with(email.clone()),
                Renderer::default(),
            )),
            h.clock.clone(),
            config(),
        );

        assert_eq!(worker.process_batch().await.unwrap(), 1);
        assert_eq!(queue.get(id).await.unwrap().unwrap().status, QueueStatus::Processing);

        // Leased until the timeout passes
        assert_eq!(worker.process_batch().await.unwrap(), 0);
        h.clock.advance(chrono::Duration::minutes(6));
        assert_eq!(worker.process_batch().await.unwrap(), 1);

        let item = queue.get(id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Sent);
        assert_eq!(item.attempts, 1);
        assert_eq!(item.last_error.as_deref(), Some(CLAIM_EXPIRED));
        assert_eq!(item.updated_at, h.clock.now());
        assert_eq!(email.calls(), 2);
        assert_eq!(worker.counters().snapshot().sent, 1);
    }

    /// Blocks inside `send` until released
    struct GateSender {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl Sender for GateSender {
        fn channel_type(&self) -> ChannelType {
            ChannelType::Email
        }

        async fn send(&self, _message: &OutgoingMessage) -> Result<(), SendError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_stop_drains_in_flight_items() {
        let h = Harness::new();
        let channel = h.verified_channel(1, "a@example.com").await;
        let id = h.enqueue(channel.id, 5).await;

        let gate = Arc::new(GateSender {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let pool = WorkerPool::new(
            h.queue.clone(),
            Arc::new(Dispatcher::new(
                h.channels.clone(),
                SenderRegistry::new().with(gate.clone()),
                Renderer::default(),
            )),
            h.clock.clone(),
            config(),
        );
        pool.start().unwrap();
        assert_eq!(pool.start(), Err(WorkerPoolError::AlreadyRunning));

        gate.entered.notified().await;
        let stopping = tokio::spawn({
            let gate = gate.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                gate.release.notify_one();
            }
        });
        pool.stop().await;
        stopping.await.unwrap();

        assert_eq!(h.queue.get(id).await.unwrap().unwrap().status, QueueStatus::Sent);
        assert_eq!(pool.counters().sent, 1);
        assert!(!pool.is_running());
        assert_eq!(pool.start(), Err(WorkerPoolError::Stopped));
    }

    #[tokio::test]
    async fn test_pool_delivers_in_background() {
        let h = Harness::new();
        let channel = h.verified_channel(1, "a@example.com").await;
        let email = RecordingSender::new(ChannelType::Email);
        let pool = WorkerPool::new(
            h.queue.clone(),
            Arc::new(Dispatcher::new(
                h.channels.clone(),
                SenderRegistry::new().with(email.clone()),
                Renderer::default(),
            )),
            h.clock.clone(),
            config(),
        );
        pool.start().unwrap();

        for _ in 0..4 {
            h.enqueue(channel.id, 5).await;
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while pool.counters().sent < 4 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        pool.stop().await;

        assert_eq!(email.calls(), 4);
    }

    #[tokio::test]
    async fn test_retention_sweeper() {
        let h = Harness::new();
        let channel = h.verified_channel(1, "a@example.com").await;
        h.enqueue(channel.id, 5).await;
        let worker = h.worker(SenderRegistry::with_log_senders(), config());
        worker.process_batch().await.unwrap();

        let sweeper = RetentionSweeper::new(
            h.queue.clone(),
            chrono::Duration::days(7),
            Duration::from_secs(3600),
        );
        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);

        h.clock.advance(chrono::Duration::days(7) + chrono::Duration::seconds(1));
        assert_eq!(sweeper.sweep_once().await.unwrap(), 1);
        assert_eq!(h.queue.get_queue_stats().await.unwrap().total(), 0);

        sweeper.start().unwrap();
        sweeper.stop().await;
    }
}
