//! # sh-core
//!
//! Core types, traits, and utilities for StatusHub RS.
//!
//! This crate provides the foundational building blocks used across all other crates:
//! - Common error types
//! - Result type aliases
//! - Core traits (Clock) and the `Id` alias
//! - Configuration types

pub mod clock;
pub mod config;
pub mod error;
pub mod traits;

pub use clock::*;
pub use error::*;
pub use traits::*;
