//! API routes

use axum::{
    routing::{get, patch, post, put},
    Router,
};

use crate::extractors::AppState;
use crate::handlers::{channels, subscriptions};

/// Create the "me" router
pub fn router() -> Router<AppState> {
    Router::new().nest("/me", me_router())
}

fn me_router() -> Router<AppState> {
    Router::new()
        .route(
            "/channels",
            get(channels::list_channels).post(channels::create_channel),
        )
        .route(
            "/channels/:id",
            patch(channels::update_channel).delete(channels::delete_channel),
        )
        .route("/channels/:id/verify", post(channels::verify_channel))
        .route("/channels/:id/resend-code", post(channels::resend_code))
        .route(
            "/channels/:id/subscriptions",
            put(subscriptions::replace_subscription),
        )
        .route("/subscriptions", get(subscriptions::list_subscriptions))
}
