//! # sh-models
//!
//! Domain models for StatusHub RS.
//!
//! This crate contains the entities owned by the notification subsystem
//! (channels, subscriptions, verification codes, queue items) and the shapes
//! of the lifecycle events handed to it by the incident/maintenance engine.

pub use sh_core::traits::{Id, Identifiable, Owned, Timestamped};

pub mod channel;
pub mod event;
pub mod queue;
pub mod subscription;
pub mod verification;

// Re-exports for convenience
pub use channel::{Channel, ChannelType, NewChannel, NotSendable};
pub use event::{
    Event, EventChanges, EventKind, EventSnapshot, EventUpdate, NotificationPayload,
    PayloadDetail, ServiceStatusChange, StatusTransition,
};
pub use queue::{MessageKind, NewQueueItem, QueueItem, QueueStats, QueueStatus};
pub use subscription::{ChannelSubscriptions, Subscription};
pub use verification::VerificationCode;
