//! Core error types for StatusHub RS
//!
//! Every user-facing failure of the channel surface maps to one of these
//! variants. Dispatch failures never appear here; they stay inside the
//! worker pool and are recorded on the queue item.

use std::collections::BTreeMap;
use thiserror::Error;

/// Core error type for channel and subscription operations
#[derive(Error, Debug)]
pub enum ShError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    #[error("{0}")]
    Validation(#[from] ValidationErrors),

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ShError {
    pub fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        ShError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ShError::Forbidden {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ShError::Conflict {
            message: message.into(),
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        ShError::RateLimited {
            message: message.into(),
            retry_after_seconds: None,
        }
    }

    /// Validation failure not tied to a single field
    pub fn invalid(message: impl Into<String>) -> Self {
        let mut errors = ValidationErrors::new();
        errors.add_base(message);
        ShError::Validation(errors)
    }

    /// Validation failure for one field
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = ValidationErrors::new();
        errors.add(field, message);
        ShError::Validation(errors)
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ShError::NotFound { .. } => 404,
            ShError::Unauthorized { .. } => 401,
            ShError::Forbidden { .. } => 403,
            ShError::Validation(_) => 400,
            ShError::Conflict { .. } => 409,
            ShError::RateLimited { .. } => 429,
            ShError::Database(_) | ShError::Internal(_) => 500,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ShError::NotFound { .. } => "not_found",
            ShError::Unauthorized { .. } => "unauthorized",
            ShError::Forbidden { .. } => "forbidden",
            ShError::Validation(_) => "validation_failed",
            ShError::Conflict { .. } => "conflict",
            ShError::RateLimited { .. } => "rate_limited",
            ShError::Database(_) => "database_error",
            ShError::Internal(_) => "internal_error",
        }
    }
}

/// Result alias used by the service layer
pub type ShResult<T> = Result<T, ShError>;

/// Validation errors collection
///
/// Field errors are kept in a sorted map so rendered messages are stable.
#[derive(Error, Debug, Default, Clone, PartialEq, Eq)]
#[error("{}", self.full_messages().join(", "))]
pub struct ValidationErrors {
    /// Field-specific errors: field_name -> Vec<error_messages>
    pub errors: BTreeMap<String, Vec<String>>,
    /// Base errors not tied to a specific field
    pub base_errors: Vec<String>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    pub fn add_base(&mut self, message: impl Into<String>) {
        self.base_errors.push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty() && self.base_errors.is_empty()
    }

    /// Check if there are errors for a specific field
    pub fn has_error(&self, field: &str) -> bool {
        self.errors.contains_key(field)
    }

    pub fn merge(&mut self, other: ValidationErrors) {
        for (field, messages) in other.errors {
            self.errors.entry(field).or_default().extend(messages);
        }
        self.base_errors.extend(other.base_errors);
    }

    pub fn full_messages(&self) -> Vec<String> {
        let mut messages = self.base_errors.clone();
        for (field, field_messages) in &self.errors {
            for msg in field_messages {
                messages.push(format!("{} {}", field, msg));
            }
        }
        messages
    }

    /// Turn an accumulated set of errors into a result
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}
