//! Subscription matrix

use sh_contracts::{Contract, SubscriptionContract, SubscriptionInput};
use sh_core::error::{ShError, ShResult, ValidationErrors};
use sh_core::traits::Id;
use sh_models::{ChannelSubscriptions, Subscription};

use super::ChannelService;

impl ChannelService {
    /// One row per owned channel with what it is subscribed to
    pub async fn list_subscriptions(&self, user_id: Id) -> ShResult<Vec<ChannelSubscriptions>> {
        Ok(self.channels.list_subscriptions(user_id).await?)
    }

    /// Fully replace a channel's subscription
    pub async fn replace_subscription(
        &self,
        user_id: Id,
        channel_id: Id,
        input: SubscriptionInput,
    ) -> ShResult<Subscription> {
        self.owned_channel(user_id, channel_id).await?;
        SubscriptionContract::new().validate(&input)?;

        let missing = self.catalog.missing_services(&input.service_ids).await?;
        if !missing.is_empty() {
            let ids: Vec<String> = missing.iter().map(ToString::to_string).collect();
            let mut errors = ValidationErrors::new();
            errors.add("serviceIds", format!("unknown services: {}", ids.join(", ")));
            return Err(ShError::Validation(errors));
        }

        let subscription = self
            .channels
            .replace_subscription(input.into_subscription(channel_id))
            .await?;

        tracing::info!(
            user_id,
            channel_id,
            all_services = subscription.subscribe_to_all_services,
            services = subscription.service_ids.len(),
            "Subscription replaced"
        );
        Ok(subscription)
    }
}
