//! Request authentication
//!
//! Turns the `Authorization` header into a [`CurrentUser`] or an error the
//! API layer renders as 401.

use std::sync::Arc;

use sh_core::error::ShError;
use thiserror::Error;

use crate::current_user::CurrentUser;
use crate::jwt::{extract_bearer_token, JwtError, JwtService};

/// Authentication errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Authentication required")]
    Required,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Token expired")]
    TokenExpired,
}

impl From<AuthError> for ShError {
    fn from(err: AuthError) -> Self {
        ShError::Unauthorized {
            message: err.to_string(),
        }
    }
}

/// Bearer token authenticator shared by all request handlers
#[derive(Clone)]
pub struct Authenticator {
    jwt: Arc<JwtService>,
}

impl Authenticator {
    pub fn new(jwt: JwtService) -> Self {
        Self { jwt: Arc::new(jwt) }
    }

    /// Authenticate from the raw `Authorization` header value
    pub fn authenticate(&self, authorization: Option<&str>) -> Result<CurrentUser, AuthError> {
        let header = authorization.ok_or(AuthError::Required)?;
        let token = extract_bearer_token(header).ok_or(AuthError::Required)?;

        self.jwt.current_user(token).map_err(|e| {
            tracing::debug!(error = %e, "Rejected bearer token");
            match e {
                JwtError::Expired => AuthError::TokenExpired,
                JwtError::Invalid(_) | JwtError::EncodingFailed(_) => AuthError::InvalidCredentials,
            }
        })
    }
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator").finish_non_exhaustive()
    }
}
