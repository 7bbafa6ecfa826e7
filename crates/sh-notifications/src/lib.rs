//! # sh-notifications
//!
//! Notification delivery for StatusHub RS.
//!
//! ## Features
//!
//! - Durable at-least-once queue with atomic claim (store traits + in-memory stores)
//! - Plain-text rendering of incident and maintenance lifecycle messages
//! - Per-channel-type senders with explicit retryable/permanent failures
//! - Worker pool with exponential backoff and graceful drain
//! - Retention sweep for delivered items
//! - Event lifecycle hooks with a frozen recipient snapshot

pub mod dispatcher;
pub mod memory;
pub mod notifier;
pub mod render;
pub mod sender;
pub mod store;
pub mod worker;

pub use dispatcher::{DispatchError, DispatchResult, Dispatcher};
pub use memory::{MemoryChannelStore, MemoryQueueStore, MemoryServiceCatalog};
pub use notifier::{Notifier, NotifyError, NotifyResult};
pub use render::{RenderError, RenderedMessage, Renderer};
pub use sender::{LogSender, OutgoingMessage, SendError, Sender, SenderRegistry};
pub use store::{
    ChannelStore, QueueStore, ServiceCatalog, SnapshotStore, StoreError, StoreResult,
    VerificationCodeStore, CLAIM_EXPIRED,
};
pub use worker::{
    CounterSnapshot, DeliveryWorker, Outcome, PoolCounters, RetentionSweeper, WorkerPool,
    WorkerPoolConfig, WorkerPoolError,
};
