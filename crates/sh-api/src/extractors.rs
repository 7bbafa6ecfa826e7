//! Axum extractors and response wrappers

use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRef, FromRequest, FromRequestParts, Path},
    http::{header::AUTHORIZATION, request::Parts},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sh_auth::{Authenticator, CurrentUser};
use sh_services::ChannelService;

use crate::error::ApiError;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub channels: Arc<ChannelService>,
    pub auth: Authenticator,
}

impl AppState {
    pub fn new(channels: Arc<ChannelService>, auth: Authenticator) -> Self {
        Self { channels, auth }
    }
}

/// Caller resolved from the bearer token; rejects with 401
pub struct AuthenticatedUser(pub CurrentUser);

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        app_state
            .auth
            .authenticate(header)
            .map(AuthenticatedUser)
            .map_err(|e| ApiError::unauthorized(e.to_string()))
    }
}

impl std::ops::Deref for AuthenticatedUser {
    type Target = CurrentUser;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// JSON body whose rejections use the error envelope
#[derive(FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// Path parameters whose rejections use the error envelope
#[derive(FromRequestParts)]
#[from_request(via(Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);

/// `{"data": ...}` response wrapper
pub struct Data<T: Serialize>(pub T);

#[derive(Serialize)]
struct Envelope<T> {
    data: T,
}

impl<T: Serialize> IntoResponse for Data<T> {
    fn into_response(self) -> Response {
        Json(Envelope { data: self.0 }).into_response()
    }
}
