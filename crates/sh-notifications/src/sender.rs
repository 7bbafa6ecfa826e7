//! Senders and the per-type registry
//!
//! A [`Sender`] delivers one rendered message to one target. Real transports
//! (SMTP, chat webhooks, bot APIs) plug in from outside; [`LogSender`] writes
//! messages to the log so the server runs end to end without them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sh_models::ChannelType;
use thiserror::Error;

/// Message handed to a sender
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Email address, webhook URL or chat id
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl OutgoingMessage {
    pub fn new(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
        }
    }
}

/// Send failure, classified by the sender
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SendError {
    /// Transient: timeouts, 5xx, rate limits
    #[error("retryable send failure: {0}")]
    Retryable(String),
    /// Will not succeed on retry: rejected target, bad credentials, malformed message
    #[error("permanent send failure: {0}")]
    Permanent(String),
}

impl SendError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SendError::Retryable(_))
    }
}

/// Delivery transport for one channel type
#[async_trait]
pub trait Sender: Send + Sync {
    fn channel_type(&self) -> ChannelType;

    async fn send(&self, message: &OutgoingMessage) -> Result<(), SendError>;
}

/// Senders keyed by channel type
#[derive(Clone, Default)]
pub struct SenderRegistry {
    senders: HashMap<ChannelType, Arc<dyn Sender>>,
}

impl SenderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log-only senders for every channel type
    pub fn with_log_senders() -> Self {
        let mut registry = Self::new();
        for channel_type in ChannelType::ALL {
            registry.register(Arc::new(LogSender::new(channel_type)));
        }
        registry
    }

    /// Register a sender under its own type, replacing any previous one
    pub fn register(&mut self, sender: Arc<dyn Sender>) {
        self.senders.insert(sender.channel_type(), sender);
    }

    pub fn with(mut self, sender: Arc<dyn Sender>) -> Self {
        self.register(sender);
        self
    }

    pub fn get(&self, channel_type: ChannelType) -> Option<&Arc<dyn Sender>> {
        self.senders.get(&channel_type)
    }

    pub fn contains(&self, channel_type: ChannelType) -> bool {
        self.senders.contains_key(&channel_type)
    }
}

impl std::fmt::Debug for SenderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&str> = self.senders.keys().map(|t| t.as_str()).collect();
        types.sort_unstable();
        f.debug_struct("SenderRegistry").field("types", &types).finish()
    }
}

/// Development sender that logs instead of delivering
#[derive(Debug, Clone, Copy)]
pub struct LogSender {
    channel_type: ChannelType,
}

impl LogSender {
    pub fn new(channel_type: ChannelType) -> Self {
        Self { channel_type }
    }
}

#[async_trait]
impl Sender for LogSender {
    fn channel_type(&self) -> ChannelType {
        self.channel_type
    }

    async fn send(&self, message: &OutgoingMessage) -> Result<(), SendError> {
        tracing::info!(
            channel_type = %self.channel_type,
            to = %message.to,
            subject = %message.subject,
            "Delivering notification\n{}",
            message.body
        );
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_sender_accepts_everything() {
        let sender = LogSender::new(ChannelType::Email);
        let message = OutgoingMessage::new("ops@example.com", "Test", "Body");
        assert!(sender.send(&message).await.is_ok());
    }

    #[test]
    fn test_registry_keys_by_type() {
        let registry = SenderRegistry::new().with(Arc::new(LogSender::new(ChannelType::Bot)));
        assert!(registry.contains(ChannelType::Bot));
        assert!(registry.get(ChannelType::Email).is_none());

        let all = SenderRegistry::with_log_senders();
        assert!(ChannelType::ALL.iter().all(|t| all.contains(*t)));
    }

    #[test]
    fn test_classification() {
        assert!(SendError::Retryable("timeout".into()).is_retryable());
        assert!(!SendError::Permanent("410 Gone".into()).is_retryable());
    }
}
