//! Channel API handlers

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use serde::{Deserialize, Serialize};
use sh_contracts::ChannelInput;
use sh_core::traits::Id;

use crate::error::ApiResult;
use crate::extractors::{ApiJson, ApiPath, AppState, AuthenticatedUser, Data};

/// PATCH body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateChannelRequest {
    pub is_enabled: bool,
}

/// Verify body; chat and bot channels send none
#[derive(Debug, Default, Deserialize)]
pub struct VerifyRequest {
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ResendResponse {
    pub message: &'static str,
}

/// Create a channel
///
/// POST /me/channels
pub async fn create_channel(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    ApiJson(body): ApiJson<ChannelInput>,
) -> ApiResult<impl IntoResponse> {
    let channel = state.channels.create(user.id, body).await?;
    Ok((StatusCode::CREATED, Data(channel)))
}

/// List own channels
///
/// GET /me/channels
pub async fn list_channels(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> ApiResult<impl IntoResponse> {
    let channels = state.channels.list(user.id).await?;
    Ok(Data(channels))
}

/// Enable or disable a channel
///
/// PATCH /me/channels/:id
pub async fn update_channel(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    ApiPath(id): ApiPath<Id>,
    ApiJson(body): ApiJson<UpdateChannelRequest>,
) -> ApiResult<impl IntoResponse> {
    let channel = state.channels.set_enabled(user.id, id, body.is_enabled).await?;
    Ok(Data(channel))
}

/// Delete a channel
///
/// DELETE /me/channels/:id
pub async fn delete_channel(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    ApiPath(id): ApiPath<Id>,
) -> ApiResult<impl IntoResponse> {
    state.channels.delete(user.id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Submit a code, or trigger the test message for chat and bot channels
///
/// POST /me/channels/:id/verify
pub async fn verify_channel(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    ApiPath(id): ApiPath<Id>,
    body: Option<ApiJson<VerifyRequest>>,
) -> ApiResult<impl IntoResponse> {
    let code = body.and_then(|ApiJson(body)| body.code);
    let channel = state.channels.verify(user.id, id, code).await?;
    Ok(Data(channel))
}

/// Reissue an email verification code
///
/// POST /me/channels/:id/resend-code
pub async fn resend_code(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    ApiPath(id): ApiPath<Id>,
) -> ApiResult<impl IntoResponse> {
    state.channels.resend_code(user.id, id).await?;
    Ok(Data(ResendResponse {
        message: "verification code sent",
    }))
}
