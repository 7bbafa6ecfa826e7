//! Channel verification
//!
//! Email channels prove ownership with the mailed code. Chat webhook and bot
//! channels are verified by delivering one real test message.

use chrono::Duration;
use sh_contracts::{Contract, VerifyCodeContract};
use sh_core::error::{ShError, ShResult};
use sh_core::traits::Id;
use sh_models::Channel;

use super::ChannelService;

impl ChannelService {
    /// Verify a channel; re-verifying a verified channel does nothing
    pub async fn verify(&self, user_id: Id, channel_id: Id, code: Option<String>) -> ShResult<Channel> {
        let channel = self.owned_channel(user_id, channel_id).await?;
        if channel.is_verified {
            return Ok(channel);
        }

        if !channel.channel_type.uses_verification_code() {
            return self.verify_by_test_message(channel).await;
        }

        VerifyCodeContract::new().validate(&code)?;
        let submitted = code.unwrap_or_default();

        // The attempt is spent before comparing so concurrent guesses cannot
        // overshoot the ceiling
        let Some(stored) = self
            .codes
            .consume_attempt(channel_id, self.config.max_attempts)
            .await?
        else {
            if self.codes.get_code(channel_id).await?.is_none() {
                return Err(ShError::invalid_field("code", "has not been issued, request a new one"));
            }
            tracing::warn!(user_id, channel_id, "Verification attempts exhausted");
            return Err(ShError::rate_limited("too many verification attempts, request a new code"));
        };

        if stored.is_expired(self.clock.now()) {
            return Err(ShError::invalid_field("code", "has expired, request a new one"));
        }

        if !stored.matches(&submitted) {
            tracing::debug!(user_id, channel_id, attempts = stored.attempt_count, "Wrong verification code");
            return Err(ShError::invalid_field("code", "is incorrect"));
        }

        self.codes.delete_code(channel_id).await?;
        let channel = self.channels.mark_channel_verified(channel_id).await?;
        tracing::info!(user_id, channel_id, "Channel verified by code");
        Ok(channel)
    }

    /// Replace the pending code of an unverified email channel
    pub async fn resend_code(&self, user_id: Id, channel_id: Id) -> ShResult<()> {
        let channel = self.owned_channel(user_id, channel_id).await?;

        if !channel.channel_type.uses_verification_code() {
            return Err(ShError::invalid(format!(
                "{} channels are verified with a test message",
                channel.channel_type
            )));
        }
        if channel.is_verified {
            return Err(ShError::invalid("channel is already verified"));
        }

        let cooldown = Duration::seconds(self.config.resend_cooldown_seconds as i64);
        if let Some(existing) = self.codes.get_code(channel_id).await? {
            if let Some(remaining) = existing.cooldown_remaining(self.clock.now(), cooldown) {
                let seconds = remaining.num_seconds().max(1) as u64;
                return Err(ShError::RateLimited {
                    message: format!("a code was sent recently, retry in {} seconds", seconds),
                    retry_after_seconds: Some(seconds),
                });
            }
        }

        self.issue_code(&channel).await?;
        tracing::info!(user_id, channel_id, "Verification code reissued");
        Ok(())
    }

    async fn verify_by_test_message(&self, channel: Channel) -> ShResult<Channel> {
        if let Err(e) = self.dispatcher.send_test(&channel).await {
            tracing::warn!(channel_id = channel.id, error = %e, "Test message failed");
            return Err(ShError::invalid(format!("test message could not be delivered: {}", e)));
        }

        let channel = self.channels.mark_channel_verified(channel.id).await?;
        tracing::info!(channel_id = channel.id, "Channel verified by test message");
        Ok(channel)
    }
}
