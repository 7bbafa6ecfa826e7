//! Subscription API handlers

use axum::{extract::State, response::IntoResponse};
use sh_contracts::SubscriptionInput;
use sh_core::traits::Id;

use crate::error::ApiResult;
use crate::extractors::{ApiJson, ApiPath, AppState, AuthenticatedUser, Data};

/// Subscription matrix for all own channels
///
/// GET /me/subscriptions
pub async fn list_subscriptions(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> ApiResult<impl IntoResponse> {
    let matrix = state.channels.list_subscriptions(user.id).await?;
    Ok(Data(matrix))
}

/// Replace one channel's subscription
///
/// PUT /me/channels/:id/subscriptions
pub async fn replace_subscription(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    ApiPath(id): ApiPath<Id>,
    ApiJson(body): ApiJson<SubscriptionInput>,
) -> ApiResult<impl IntoResponse> {
    let subscription = state.channels.replace_subscription(user.id, id, body).await?;
    Ok(Data(subscription))
}
