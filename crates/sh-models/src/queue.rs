//! Notification queue model
//!
//! Table: notification_queue
//!
//! A queue item is one delivery obligation for a single channel and event.
//! Its status only moves forward:
//!
//! ```text
//! pending -> processing -> sent
//!                       -> pending (retry, attempts + 1)
//!                       -> failed
//! ```
//!
//! `sent` and `failed` are terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sh_core::traits::{Id, Identifiable, Timestamped};

/// Which lifecycle point produced the message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Initial,
    Update,
    Resolved,
    Completed,
    Cancelled,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Initial => "initial",
            MessageKind::Update => "update",
            MessageKind::Resolved => "resolved",
            MessageKind::Completed => "completed",
            MessageKind::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initial" => Ok(MessageKind::Initial),
            "update" => Ok(MessageKind::Update),
            "resolved" => Ok(MessageKind::Resolved),
            "completed" => Ok(MessageKind::Completed),
            "cancelled" => Ok(MessageKind::Cancelled),
            other => Err(format!("unknown message kind: {}", other)),
        }
    }
}

/// Queue item status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Processing,
    Sent,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Sent => "sent",
            QueueStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Sent | QueueStatus::Failed)
    }

    /// Allowed edges of the delivery state machine
    pub fn can_transition_to(&self, next: QueueStatus) -> bool {
        matches!(
            (self, next),
            (QueueStatus::Pending, QueueStatus::Processing)
                | (QueueStatus::Processing, QueueStatus::Sent)
                | (QueueStatus::Processing, QueueStatus::Pending)
                | (QueueStatus::Processing, QueueStatus::Failed)
        )
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(QueueStatus::Pending),
            "processing" => Ok(QueueStatus::Processing),
            "sent" => Ok(QueueStatus::Sent),
            "failed" => Ok(QueueStatus::Failed),
            other => Err(format!("unknown queue status: {}", other)),
        }
    }
}

/// A persisted delivery obligation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: Id,
    pub event_id: Id,
    pub channel_id: Id,
    pub message_kind: MessageKind,
    /// Serialized [`crate::event::NotificationPayload`]
    pub payload: serde_json::Value,
    pub status: QueueStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueItem {
    /// No attempts left; the worker fails the item without dispatching
    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Claimable at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == QueueStatus::Pending && self.next_attempt_at <= now
    }

    /// Still processing, last touched before `stale_before`
    pub fn claim_expired(&self, stale_before: DateTime<Utc>) -> bool {
        self.status == QueueStatus::Processing && self.updated_at < stale_before
    }
}

impl Identifiable for QueueItem {
    fn id(&self) -> Id {
        self.id
    }
}

impl Timestamped for QueueItem {
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

/// Insert shape for a queue item
#[derive(Debug, Clone, PartialEq)]
pub struct NewQueueItem {
    pub event_id: Id,
    pub channel_id: Id,
    pub message_kind: MessageKind,
    pub payload: serde_json::Value,
    pub max_attempts: i32,
    /// Defaults to "now" at insert time
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl NewQueueItem {
    pub fn new(
        event_id: Id,
        channel_id: Id,
        message_kind: MessageKind,
        payload: serde_json::Value,
        max_attempts: i32,
    ) -> Self {
        Self {
            event_id,
            channel_id,
            message_kind,
            payload,
            max_attempts,
            next_attempt_at: None,
        }
    }

    /// Schedule the first attempt for later
    pub fn not_before(mut self, at: DateTime<Utc>) -> Self {
        self.next_attempt_at = Some(at);
        self
    }
}

/// Item counts per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: i64,
    pub processing: i64,
    pub sent: i64,
    pub failed: i64,
}

impl QueueStats {
    pub fn total(&self) -> i64 {
        self.pending + self.processing + self.sent + self.failed
    }

    pub fn record(&mut self, status: QueueStatus, count: i64) {
        match status {
            QueueStatus::Pending => self.pending += count,
            QueueStatus::Processing => self.processing += count,
            QueueStatus::Sent => self.sent += count,
            QueueStatus::Failed => self.failed += count,
        }
    }
}
