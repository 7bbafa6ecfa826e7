//! Channel model
//!
//! Table: notification_channels

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sh_core::traits::{Id, Identifiable, Owned, Timestamped};

/// Delivery channel type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    /// Email address
    Email,
    /// Incoming chat webhook URL
    ChatWebhook,
    /// Bot API chat id
    Bot,
}

impl ChannelType {
    pub const ALL: [ChannelType; 3] = [ChannelType::Email, ChannelType::ChatWebhook, ChannelType::Bot];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Email => "email",
            ChannelType::ChatWebhook => "chat_webhook",
            ChannelType::Bot => "bot",
        }
    }

    /// Email channels prove ownership with a code; the others with a test message
    pub fn uses_verification_code(&self) -> bool {
        matches!(self, ChannelType::Email)
    }
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChannelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(ChannelType::Email),
            "chat_webhook" => Ok(ChannelType::ChatWebhook),
            "bot" => Ok(ChannelType::Bot),
            other => Err(format!("unknown channel type: {}", other)),
        }
    }
}

/// User-owned delivery channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: Id,
    pub owner_id: Id,
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    /// Email address, webhook URL or chat id depending on the type
    pub target: String,
    pub is_verified: bool,
    pub is_enabled: bool,
    /// Created at registration from the account email; cannot be deleted
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Why a channel cannot receive messages right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotSendable {
    Disabled,
    Unverified,
}

impl std::fmt::Display for NotSendable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotSendable::Disabled => f.write_str("channel is disabled"),
            NotSendable::Unverified => f.write_str("channel is not verified"),
        }
    }
}

impl Channel {
    /// Check whether the dispatcher may hand messages for this channel to a sender
    pub fn check_sendable(&self) -> Result<(), NotSendable> {
        if !self.is_enabled {
            return Err(NotSendable::Disabled);
        }
        if !self.is_verified {
            return Err(NotSendable::Unverified);
        }
        Ok(())
    }

    pub fn is_sendable(&self) -> bool {
        self.check_sendable().is_ok()
    }
}

impl Identifiable for Channel {
    fn id(&self) -> Id {
        self.id
    }
}

impl Owned for Channel {
    fn owner_id(&self) -> Id {
        self.owner_id
    }
}

impl Timestamped for Channel {
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

/// Insert shape for a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChannel {
    pub owner_id: Id,
    pub channel_type: ChannelType,
    pub target: String,
    pub is_verified: bool,
    pub is_default: bool,
}

impl NewChannel {
    /// Unverified, non-default channel as created through the API
    pub fn new(owner_id: Id, channel_type: ChannelType, target: impl Into<String>) -> Self {
        Self {
            owner_id,
            channel_type,
            target: target.into(),
            is_verified: false,
            is_default: false,
        }
    }

    /// Pre-verified email channel created at registration
    pub fn default_for(owner_id: Id, email: impl Into<String>) -> Self {
        Self {
            owner_id,
            channel_type: ChannelType::Email,
            target: email.into(),
            is_verified: true,
            is_default: true,
        }
    }
}
