//! Channel creation and verification code issuing

use chrono::Duration;
use rand::Rng;
use sh_contracts::{ChannelInput, CreateChannelContract};
use sh_core::error::ShResult;
use sh_core::traits::Id;
use sh_models::{Channel, ChannelType, NewChannel, VerificationCode};

use super::ChannelService;

const CODE_SUBJECT: &str = "[StatusHub] Your verification code";

/// Random zero-padded six digit code
pub fn generate_code() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000))
}

impl ChannelService {
    /// Registration hook: the account email becomes the verified default channel
    pub async fn create_default_channel(&self, user_id: Id, email: &str) -> ShResult<Channel> {
        let input = ChannelInput::new(ChannelType::Email.as_str(), email);
        let (_, target) = CreateChannelContract::new().parse(&input)?;

        let channel = self
            .channels
            .create_channel(NewChannel::default_for(user_id, target))
            .await?;

        tracing::info!(user_id, channel_id = channel.id, "Default channel created");
        Ok(channel)
    }

    /// Create an unverified channel; email channels are sent a code
    pub async fn create(&self, user_id: Id, input: ChannelInput) -> ShResult<Channel> {
        let (channel_type, target) = CreateChannelContract::new().parse(&input)?;

        let channel = self
            .channels
            .create_channel(NewChannel::new(user_id, channel_type, target))
            .await?;

        tracing::info!(
            user_id,
            channel_id = channel.id,
            channel_type = %channel.channel_type,
            "Channel created"
        );

        if channel.channel_type.uses_verification_code() {
            self.issue_code(&channel).await?;
        }

        Ok(channel)
    }

    /// Store a fresh code, replacing any previous one, and mail it
    ///
    /// A delivery failure is logged only; the owner can ask for a resend.
    pub(crate) async fn issue_code(&self, channel: &Channel) -> ShResult<()> {
        let ttl = Duration::seconds(self.config.code_ttl_seconds as i64);
        let code = VerificationCode::new(channel.id, generate_code(), self.clock.now(), ttl);
        let body = format!(
            "Your StatusHub verification code is {}.\n\nIt expires in {} minutes.\n",
            code.code,
            ttl.num_minutes()
        );

        self.codes.replace_code(code).await?;

        if let Err(e) = self.dispatcher.send_message(channel, CODE_SUBJECT, body).await {
            tracing::warn!(
                channel_id = channel.id,
                error = %e,
                "Failed to deliver verification code"
            );
        }
        Ok(())
    }
}
