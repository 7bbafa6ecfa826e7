//! API handlers

pub mod channels;
pub mod subscriptions;
