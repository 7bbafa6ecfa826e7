//! Subscription contract
//!
//! A subscription is either "all services" or an explicit list, never both.
//! Whether the listed services exist is checked against the catalog by the
//! channel service.

use serde::Deserialize;
use sh_core::error::ValidationErrors;
use sh_core::traits::Id;
use sh_models::Subscription;

use crate::base::{Contract, ValidationResult};

/// Replacement subscription as submitted by the owner
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionInput {
    #[serde(default)]
    pub subscribe_to_all_services: bool,
    #[serde(default)]
    pub service_ids: Vec<Id>,
}

impl SubscriptionInput {
    /// Build the stored subscription; call after validation
    pub fn into_subscription(self, channel_id: Id) -> Subscription {
        if self.subscribe_to_all_services {
            Subscription::all_services(channel_id)
        } else {
            Subscription::services(channel_id, self.service_ids)
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SubscriptionContract;

impl SubscriptionContract {
    pub fn new() -> Self {
        Self
    }
}

impl Contract<SubscriptionInput> for SubscriptionContract {
    fn validate(&self, entity: &SubscriptionInput) -> ValidationResult {
        let mut errors = ValidationErrors::new();

        if entity.subscribe_to_all_services && !entity.service_ids.is_empty() {
            errors.add_base("subscribeToAllServices and serviceIds are mutually exclusive");
        }

        if entity.service_ids.iter().any(|id| *id <= 0) {
            errors.add("serviceIds", "must contain positive ids");
        }

        errors.into_result()
    }
}
