//! Channel & verification services
//!
//! Every operation is scoped to the calling user: touching a channel owned by
//! someone else fails with `Forbidden`, a missing channel with `NotFound`.

mod create;
mod subscriptions;
mod verify;

use std::sync::Arc;

use sh_core::clock::SharedClock;
use sh_core::config::VerificationConfig;
use sh_core::error::{ShError, ShResult};
use sh_core::traits::Id;
use sh_models::Channel;
use sh_notifications::{ChannelStore, Dispatcher, ServiceCatalog, VerificationCodeStore};

pub use create::generate_code;

/// Channel CRUD, verification and subscription management
pub struct ChannelService {
    channels: Arc<dyn ChannelStore>,
    codes: Arc<dyn VerificationCodeStore>,
    catalog: Arc<dyn ServiceCatalog>,
    dispatcher: Arc<Dispatcher>,
    clock: SharedClock,
    config: VerificationConfig,
}

impl ChannelService {
    pub fn new(
        channels: Arc<dyn ChannelStore>,
        codes: Arc<dyn VerificationCodeStore>,
        catalog: Arc<dyn ServiceCatalog>,
        dispatcher: Arc<Dispatcher>,
        clock: SharedClock,
        config: VerificationConfig,
    ) -> Self {
        Self {
            channels,
            codes,
            catalog,
            dispatcher,
            clock,
            config,
        }
    }

    /// Channels owned by the user, oldest first
    pub async fn list(&self, user_id: Id) -> ShResult<Vec<Channel>> {
        Ok(self.channels.list_channels(user_id).await?)
    }

    /// Enable or disable delivery to a channel
    pub async fn set_enabled(&self, user_id: Id, channel_id: Id, enabled: bool) -> ShResult<Channel> {
        let channel = self.owned_channel(user_id, channel_id).await?;
        if channel.is_enabled == enabled {
            return Ok(channel);
        }

        let channel = self.channels.set_channel_enabled(channel_id, enabled).await?;
        tracing::info!(user_id, channel_id, enabled, "Channel toggled");
        Ok(channel)
    }

    /// Delete a channel with its subscription and pending code
    ///
    /// The default channel cannot be deleted.
    pub async fn delete(&self, user_id: Id, channel_id: Id) -> ShResult<()> {
        let channel = self.owned_channel(user_id, channel_id).await?;
        if channel.is_default {
            return Err(ShError::conflict("the default channel cannot be deleted"));
        }

        if !self.channels.delete_channel(channel_id).await? {
            return Err(ShError::not_found("channel", channel_id));
        }

        tracing::info!(user_id, channel_id, "Channel deleted");
        Ok(())
    }

    /// Load a channel and check that the user owns it
    pub(crate) async fn owned_channel(&self, user_id: Id, channel_id: Id) -> ShResult<Channel> {
        let channel = self
            .channels
            .get_channel(channel_id)
            .await?
            .ok_or_else(|| ShError::not_found("channel", channel_id))?;

        if channel.owner_id != user_id {
            tracing::warn!(user_id, channel_id, "Channel access denied");
            return Err(ShError::forbidden("channel belongs to another user"));
        }
        Ok(channel)
    }
}
