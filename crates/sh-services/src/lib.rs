//! # sh-services
//!
//! Business logic for the "me" channel surface.
//!
//! Services validate input through the contracts in `sh-contracts`, enforce
//! ownership, and talk to storage only through the store traits, so the same
//! code runs against PostgreSQL and the in-memory stores.

pub mod channels;

pub use channels::ChannelService;
