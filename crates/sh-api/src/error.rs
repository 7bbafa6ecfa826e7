//! API error handling
//!
//! Every failure is rendered as `{"error": {"message": ...}}` with the
//! status code of its [`ShError`] class.

use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sh_core::error::{ShError, ValidationErrors};

/// API error types
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Validation(ValidationErrors),
    Unauthorized(String),
    Forbidden(String),
    BadRequest(String),
    Conflict(String),
    RateLimited {
        message: String,
        retry_after_seconds: Option<u64>,
    },
    Internal(String),
}

impl ApiError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        ApiError::Unauthorized(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError::BadRequest(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Validation(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Validation(errors) => errors.full_messages().join(", "),
            ApiError::NotFound(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg)
            | ApiError::BadRequest(msg)
            | ApiError::Conflict(msg)
            | ApiError::RateLimited { message: msg, .. }
            | ApiError::Internal(msg) => msg.clone(),
        }
    }
}

impl From<ShError> for ApiError {
    fn from(err: ShError) -> Self {
        match err {
            ShError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            ShError::Unauthorized { message } => ApiError::Unauthorized(message),
            ShError::Forbidden { message } => ApiError::Forbidden(message),
            ShError::Validation(errors) => ApiError::Validation(errors),
            ShError::Conflict { message } => ApiError::Conflict(message),
            ShError::RateLimited {
                message,
                retry_after_seconds,
            } => ApiError::RateLimited {
                message,
                retry_after_seconds,
            },
            ShError::Database(_) | ShError::Internal(_) => {
                tracing::error!(error = %err, "Request failed");
                ApiError::Internal("Internal server error".into())
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorMessage,
}

#[derive(Serialize)]
struct ErrorMessage {
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            error: ErrorMessage {
                message: self.message(),
            },
        };

        let mut response = (status, Json(body)).into_response();
        if let ApiError::RateLimited {
            retry_after_seconds: Some(seconds),
            ..
        } = self
        {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(seconds));
        }
        response
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
