//! Channel contracts
//!
//! Targets are checked per channel type:
//! - email: `local@domain.tld`
//! - chat webhook: absolute `http(s)` URL with a host
//! - bot: numeric chat id (optionally negative) or an `@handle`

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use sh_core::error::ValidationErrors;
use sh_models::{ChannelType, verification::CODE_LENGTH};

use crate::base::{Contract, ValidationResult};

/// Valid email pattern
static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap()
});

/// Numeric chat id, groups are negative
static BOT_CHAT_ID_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-?[0-9]{1,20}$").unwrap());

static BOT_HANDLE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^@[a-zA-Z][a-zA-Z0-9_]{4,31}$").unwrap());

const MAX_TARGET_LENGTH: usize = 2048;

/// Raw channel creation input
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelInput {
    #[serde(rename = "type")]
    pub channel_type: String,
    pub target: String,
}

impl ChannelInput {
    pub fn new(channel_type: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            channel_type: channel_type.into(),
            target: target.into(),
        }
    }

    /// Trimmed target; email addresses are compared case-insensitively
    pub fn normalized_target(&self, channel_type: ChannelType) -> String {
        let target = self.target.trim();
        match channel_type {
            ChannelType::Email => target.to_lowercase(),
            ChannelType::ChatWebhook | ChannelType::Bot => target.to_string(),
        }
    }
}

/// Contract for creating a channel
#[derive(Debug, Default, Clone, Copy)]
pub struct CreateChannelContract;

impl CreateChannelContract {
    pub fn new() -> Self {
        Self
    }

    /// Validate and return the parsed type with the normalized target
    pub fn parse(&self, input: &ChannelInput) -> Result<(ChannelType, String), ValidationErrors> {
        self.validate(input)?;
        // validate() has rejected unknown types
        let channel_type = input
            .channel_type
            .parse::<ChannelType>()
            .map_err(|message| {
                let mut errors = ValidationErrors::new();
                errors.add("type", message);
                errors
            })?;
        Ok((channel_type, input.normalized_target(channel_type)))
    }

    fn validate_target(&self, channel_type: ChannelType, target: &str, errors: &mut ValidationErrors) {
        if target.is_empty() {
            errors.add("target", "can't be blank");
            return;
        }
        if target.len() > MAX_TARGET_LENGTH {
            errors.add("target", "is too long (maximum is 2048 characters)");
            return;
        }

        match channel_type {
            ChannelType::Email => {
                if !EMAIL_PATTERN.is_match(target) {
                    errors.add("target", "is not a valid email address");
                }
            }
            ChannelType::ChatWebhook => match url::Url::parse(target) {
                Ok(url) if matches!(url.scheme(), "http" | "https") && url.host().is_some() => {}
                _ => errors.add("target", "must be an absolute http(s) URL"),
            },
            ChannelType::Bot => {
                if !BOT_CHAT_ID_PATTERN.is_match(target) && !BOT_HANDLE_PATTERN.is_match(target) {
                    errors.add("target", "must be a numeric chat id or an @handle");
                }
            }
        }
    }
}

impl Contract<ChannelInput> for CreateChannelContract {
    fn validate(&self, entity: &ChannelInput) -> ValidationResult {
        let mut errors = ValidationErrors::new();

        match entity.channel_type.parse::<ChannelType>() {
            Ok(channel_type) => {
                self.validate_target(channel_type, entity.target.trim(), &mut errors)
            }
            Err(_) => errors.add("type", "must be one of email, chat_webhook, bot"),
        }

        errors.into_result()
    }
}

/// Contract for a submitted verification code
#[derive(Debug, Default, Clone, Copy)]
pub struct VerifyCodeContract;

impl VerifyCodeContract {
    pub fn new() -> Self {
        Self
    }
}

impl Contract<Option<String>> for VerifyCodeContract {
    fn validate(&self, entity: &Option<String>) -> ValidationResult {
        let mut errors = ValidationErrors::new();

        match entity.as_deref().map(str::trim) {
            None | Some("") => errors.add("code", "can't be blank"),
            Some(code) => {
                if code.len() != CODE_LENGTH || !code.bytes().all(|b| b.is_ascii_digit()) {
                    errors.add("code", "must be a 6 digit code");
                }
            }
        }

        errors.into_result()
    }
}
