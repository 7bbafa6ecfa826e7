//! Subscription model
//!
//! Tables: channel_subscriptions, channel_subscription_services

use serde::{Deserialize, Serialize};
use sh_core::traits::Id;

use crate::channel::{Channel, ChannelType};

/// What a channel is subscribed to
///
/// `subscribe_to_all_services` and a non-empty `service_ids` never coexist:
/// the constructors enforce it and the contracts reject requests that try.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub channel_id: Id,
    pub subscribe_to_all_services: bool,
    pub service_ids: Vec<Id>,
}

impl Subscription {
    pub fn all_services(channel_id: Id) -> Self {
        Self {
            channel_id,
            subscribe_to_all_services: true,
            service_ids: Vec::new(),
        }
    }

    /// Explicit service list, sorted and deduplicated
    pub fn services(channel_id: Id, service_ids: impl IntoIterator<Item = Id>) -> Self {
        let mut ids: Vec<Id> = service_ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        Self {
            channel_id,
            subscribe_to_all_services: false,
            service_ids: ids,
        }
    }

    /// Whether an event touching `service_ids` should reach this channel
    pub fn covers(&self, service_ids: &[Id]) -> bool {
        self.subscribe_to_all_services
            || service_ids
                .iter()
                .any(|id| self.service_ids.binary_search(id).is_ok())
    }
}

/// One row of the subscription matrix shown to a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSubscriptions {
    pub channel_id: Id,
    pub channel_type: ChannelType,
    pub target: String,
    pub subscribe_to_all_services: bool,
    pub service_ids: Vec<Id>,
}

impl ChannelSubscriptions {
    /// Combine a channel with its subscription row, if any
    pub fn from_parts(channel: &Channel, subscription: Option<&Subscription>) -> Self {
        Self {
            channel_id: channel.id,
            channel_type: channel.channel_type,
            target: channel.target.clone(),
            subscribe_to_all_services: subscription.is_some_and(|s| s.subscribe_to_all_services),
            service_ids: subscription
                .map(|s| s.service_ids.clone())
                .unwrap_or_default(),
        }
    }
}
