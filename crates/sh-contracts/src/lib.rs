//! # sh-contracts
//!
//! Contract validation for StatusHub RS.
//!
//! Contracts validate user input before the channel service touches a store.
//! They are pure: checks that need I/O (unknown service ids, duplicate
//! targets) live in the service layer.

pub mod base;
pub mod channels;
pub mod subscriptions;

pub use base::*;
pub use channels::{ChannelInput, CreateChannelContract, VerifyCodeContract};
pub use subscriptions::{SubscriptionContract, SubscriptionInput};
