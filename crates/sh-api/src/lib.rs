//! # sh-api
//!
//! REST handlers for the authenticated "me" scope.
//!
//! Successful responses are wrapped as `{"data": ...}`, failures as
//! `{"error": {"message": ...}}`.

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod routes;

pub use error::{ApiError, ApiResult};
pub use extractors::{AppState, AuthenticatedUser, Data};
pub use routes::router;
