//! Dispatcher
//!
//! Routes a claimed queue item to the sender for its channel's type. Items
//! for disabled, unverified or deleted channels never reach a sender.

use std::sync::Arc;

use sh_core::traits::Id;
use sh_models::{Channel, ChannelType, NotSendable, NotificationPayload, QueueItem};
use thiserror::Error;

use crate::render::{RenderError, Renderer};
use crate::sender::{OutgoingMessage, SendError, SenderRegistry};
use crate::store::{ChannelStore, StoreError};

const TEST_SUBJECT: &str = "[StatusHub] Test message";
const TEST_BODY: &str = "This is a test message confirming that this channel can receive StatusHub notifications.\n";

/// Dispatch errors
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("channel {0} no longer exists")]
    ChannelMissing(Id),
    #[error("channel {channel_id}: {reason}")]
    NotSendable { channel_id: Id, reason: NotSendable },
    #[error("no sender registered for {0} channels")]
    NoSender(ChannelType),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Send(#[from] SendError),
    #[error("channel lookup failed: {0}")]
    Store(#[from] StoreError),
}

impl DispatchError {
    /// Only transient transport and storage failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            DispatchError::Send(err) => err.is_retryable(),
            DispatchError::Store(StoreError::Backend(_)) => true,
            _ => false,
        }
    }

    /// The item was resolved before any sender was called
    pub fn is_gated(&self) -> bool {
        matches!(
            self,
            DispatchError::ChannelMissing(_) | DispatchError::NotSendable { .. }
        )
    }
}

pub type DispatchResult<T> = Result<T, DispatchError>;

/// Routes messages to senders by channel type
pub struct Dispatcher {
    channels: Arc<dyn ChannelStore>,
    senders: SenderRegistry,
    renderer: Renderer,
}

impl Dispatcher {
    pub fn new(channels: Arc<dyn ChannelStore>, senders: SenderRegistry, renderer: Renderer) -> Self {
        Self {
            channels,
            senders,
            renderer,
        }
    }

    /// Deliver one claimed queue item
    pub async fn dispatch(&self, item: &QueueItem) -> DispatchResult<()> {
        let channel = self
            .channels
            .get_channel(item.channel_id)
            .await?
            .ok_or(DispatchError::ChannelMissing(item.channel_id))?;

        channel
            .check_sendable()
            .map_err(|reason| DispatchError::NotSendable {
                channel_id: channel.id,
                reason,
            })?;

        let payload = NotificationPayload::from_json(&item.payload)
            .map_err(|e| DispatchError::InvalidPayload(e.to_string()))?;
        let rendered = self.renderer.render(item.message_kind, &payload)?;

        self.send_message(&channel, rendered.subject, rendered.body)
            .await
    }

    /// Send the fixed test message used to verify chat and bot channels
    ///
    /// Skips the verification gate: this is how a channel becomes verified.
    pub async fn send_test(&self, channel: &Channel) -> DispatchResult<()> {
        self.send_message(channel, TEST_SUBJECT, TEST_BODY).await
    }

    /// Send arbitrary text to a channel through its type's sender
    pub async fn send_message(
        &self,
        channel: &Channel,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> DispatchResult<()> {
        let sender = self
            .senders
            .get(channel.channel_type)
            .ok_or(DispatchError::NoSender(channel.channel_type))?;

        let message = OutgoingMessage::new(channel.target.clone(), subject, body);
        sender.send(&message).await?;

        tracing::debug!(
            channel_id = channel.id,
            channel_type = %channel.channel_type,
            "Message handed to sender"
        );
        Ok(())
    }
}
