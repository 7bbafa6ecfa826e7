//! # sh-server
//!
//! Process wiring for StatusHub RS: stores, delivery workers, the retention
//! sweeper, and the HTTP router with health and metrics endpoints.
//!
//! The event engine embeds an [`app::Application`] and calls the hooks on
//! [`app::Application::notifier`]; account registration calls
//! `create_default_channel` on [`app::Application::channels`].

pub mod app;
pub mod health;
pub mod metrics;

pub use app::{Application, Stores};
