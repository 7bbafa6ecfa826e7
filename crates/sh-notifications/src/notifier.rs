//! Event lifecycle hooks
//!
//! The event engine calls these hooks; they never block on delivery. The
//! recipient set is resolved once, when the event is created, and every
//! later message for the event goes to that frozen set.

use std::sync::Arc;

use sh_core::clock::SharedClock;
use sh_core::traits::Id;
use sh_models::{Event, EventChanges, EventUpdate, NewQueueItem, NotificationPayload};
use thiserror::Error;

use crate::store::{ChannelStore, QueueStore, SnapshotStore, StoreError};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Failed to serialize payload: {0}")]
    Payload(#[from] serde_json::Error),
}

pub type NotifyResult<T> = Result<T, NotifyError>;

/// Fans event lifecycle messages out to the frozen recipient set
pub struct Notifier {
    channels: Arc<dyn ChannelStore>,
    snapshots: Arc<dyn SnapshotStore>,
    queue: Arc<dyn QueueStore>,
    clock: SharedClock,
    max_attempts: i32,
}

impl Notifier {
    pub fn new(
        channels: Arc<dyn ChannelStore>,
        snapshots: Arc<dyn SnapshotStore>,
        queue: Arc<dyn QueueStore>,
        clock: SharedClock,
        max_attempts: i32,
    ) -> Self {
        Self {
            channels,
            snapshots,
            queue,
            clock,
            max_attempts,
        }
    }

    /// Resolve and freeze recipients together with the initial messages
    ///
    /// Returns the number of queued items. A failed call writes nothing, so
    /// the hook can be retried for the same event.
    pub async fn on_event_created(&self, event: &Event, service_ids: &[Id]) -> NotifyResult<usize> {
        if !event.notify_subscribers {
            tracing::debug!(event_id = event.id, "Event opted out of notifications");
            return Ok(0);
        }

        let recipients = self.channels.resolve_recipients(service_ids).await?;
        let payload = NotificationPayload::initial(event, service_ids, self.clock.now());
        let items = self.build_items(event.id, &recipients, &payload)?;

        match self
            .snapshots
            .freeze_recipients(event.id, &recipients, items)
            .await?
        {
            Some(queued) => {
                tracing::info!(
                    event_id = event.id,
                    message_kind = %payload.message_kind(),
                    queued = queued.len(),
                    "Froze recipients and queued event notifications"
                );
                Ok(queued.len())
            }
            None => {
                tracing::warn!(event_id = event.id, "Recipient snapshot already exists, not re-sending");
                Ok(0)
            }
        }
    }

    pub async fn on_event_updated(
        &self,
        event: &Event,
        update: &EventUpdate,
        changes: &EventChanges,
    ) -> NotifyResult<usize> {
        if !update.notify_subscribers {
            return Ok(0);
        }
        let payload = NotificationPayload::update(event, update, changes, self.clock.now());
        self.notify_snapshot(event.id, &payload).await
    }

    pub async fn on_event_resolved(&self, event: &Event, update: &EventUpdate) -> NotifyResult<usize> {
        if !update.notify_subscribers {
            return Ok(0);
        }
        let payload = NotificationPayload::resolved(event, update.message.clone(), self.clock.now());
        self.notify_snapshot(event.id, &payload).await
    }

    pub async fn on_event_completed(&self, event: &Event, update: &EventUpdate) -> NotifyResult<usize> {
        if !update.notify_subscribers {
            return Ok(0);
        }
        let payload = NotificationPayload::completed(event, update.message.clone(), self.clock.now());
        self.notify_snapshot(event.id, &payload).await
    }

    pub async fn on_event_cancelled(&self, event: &Event, update: &EventUpdate) -> NotifyResult<usize> {
        if !update.notify_subscribers {
            return Ok(0);
        }
        let payload = NotificationPayload::cancelled(event, update.message.clone(), self.clock.now());
        self.notify_snapshot(event.id, &payload).await
    }

    async fn notify_snapshot(&self, event_id: Id, payload: &NotificationPayload) -> NotifyResult<usize> {
        match self.snapshots.load_snapshot(event_id).await? {
            Some(recipients) => self.enqueue(event_id, &recipients, payload).await,
            None => {
                tracing::debug!(event_id, "No recipient snapshot, nothing to notify");
                Ok(0)
            }
        }
    }

    async fn enqueue(
        &self,
        event_id: Id,
        recipients: &[Id],
        payload: &NotificationPayload,
    ) -> NotifyResult<usize> {
        if recipients.is_empty() {
            return Ok(0);
        }

        let items = self.build_items(event_id, recipients, payload)?;
        let queued = self.queue.enqueue_batch(items).await?.len();
        tracing::info!(
            event_id,
            message_kind = %payload.message_kind(),
            queued,
            "Queued event notifications"
        );
        Ok(queued)
    }

    fn build_items(
        &self,
        event_id: Id,
        recipients: &[Id],
        payload: &NotificationPayload,
    ) -> NotifyResult<Vec<NewQueueItem>> {
        let kind = payload.message_kind();
        let json = payload.to_json()?;
        Ok(recipients
            .iter()
            .map(|channel_id| {
                NewQueueItem::new(event_id, *channel_id, kind, json.clone(), self.max_attempts)
            })
            .collect())
    }
}
