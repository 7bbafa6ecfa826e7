//! Lifecycle event shapes
//!
//! Incidents and maintenances are owned by the event engine. The notifier
//! only sees them through these types and freezes what it needs into a
//! [`NotificationPayload`] at enqueue time, so later edits to the event do
//! not change messages already queued.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sh_core::traits::Id;

use crate::queue::MessageKind;

/// Incident or scheduled maintenance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Incident,
    Maintenance,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Incident => "incident",
            EventKind::Maintenance => "maintenance",
        }
    }

    /// Capitalized name used in subject prefixes
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::Incident => "Incident",
            EventKind::Maintenance => "Maintenance",
        }
    }

    /// Path segment of the public event page
    pub fn path_segment(&self) -> &'static str {
        match self {
            EventKind::Incident => "incidents",
            EventKind::Maintenance => "maintenances",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event as handed over by the event engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: Id,
    pub kind: EventKind,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    /// Incidents only
    pub severity: Option<String>,
    /// Maintenances only
    pub scheduled_start: Option<DateTime<Utc>>,
    pub scheduled_end: Option<DateTime<Utc>>,
    /// Opt-out flag set by the author of the event
    pub notify_subscribers: bool,
    pub created_at: DateTime<Utc>,
}

/// A status update posted on an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventUpdate {
    pub id: Id,
    pub status: String,
    pub message: String,
    pub notify_subscribers: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub from: String,
    pub to: String,
}

impl StatusTransition {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Status change of one affected service carried by an update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatusChange {
    pub service_id: Id,
    pub service_name: String,
    pub from: String,
    pub to: String,
}

/// What changed with an update
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventChanges {
    pub status: Option<StatusTransition>,
    #[serde(default)]
    pub services: Vec<ServiceStatusChange>,
}

/// Copy of the event fields a message needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSnapshot {
    pub id: Id,
    pub kind: EventKind,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub severity: Option<String>,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub scheduled_end: Option<DateTime<Utc>>,
}

impl From<&Event> for EventSnapshot {
    fn from(event: &Event) -> Self {
        Self {
            id: event.id,
            kind: event.kind,
            title: event.title.clone(),
            description: event.description.clone(),
            status: event.status.clone(),
            severity: event.severity.clone(),
            scheduled_start: event.scheduled_start,
            scheduled_end: event.scheduled_end,
        }
    }
}

/// Message-kind specific part of a payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PayloadDetail {
    Initial {
        service_ids: Vec<Id>,
    },
    Update {
        message: String,
        status_change: Option<StatusTransition>,
        #[serde(default)]
        service_changes: Vec<ServiceStatusChange>,
    },
    Resolved {
        message: String,
    },
    Completed {
        message: String,
    },
    Cancelled {
        reason: String,
    },
}

/// Frozen content of a queue item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub event: EventSnapshot,
    pub generated_at: DateTime<Utc>,
    pub detail: PayloadDetail,
}

impl NotificationPayload {
    pub fn initial(event: &Event, service_ids: &[Id], now: DateTime<Utc>) -> Self {
        Self {
            event: event.into(),
            generated_at: now,
            detail: PayloadDetail::Initial {
                service_ids: service_ids.to_vec(),
            },
        }
    }

    pub fn update(
        event: &Event,
        update: &EventUpdate,
        changes: &EventChanges,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            event: event.into(),
            generated_at: now,
            detail: PayloadDetail::Update {
                message: update.message.clone(),
                status_change: changes.status.clone(),
                service_changes: changes.services.clone(),
            },
        }
    }

    pub fn resolved(event: &Event, message: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self::closing(event, PayloadDetail::Resolved { message: message.into() }, now)
    }

    pub fn completed(event: &Event, message: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self::closing(event, PayloadDetail::Completed { message: message.into() }, now)
    }

    pub fn cancelled(event: &Event, reason: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self::closing(event, PayloadDetail::Cancelled { reason: reason.into() }, now)
    }

    fn closing(event: &Event, detail: PayloadDetail, now: DateTime<Utc>) -> Self {
        Self {
            event: event.into(),
            generated_at: now,
            detail,
        }
    }

    pub fn message_kind(&self) -> MessageKind {
        match self.detail {
            PayloadDetail::Initial { .. } => MessageKind::Initial,
            PayloadDetail::Update { .. } => MessageKind::Update,
            PayloadDetail::Resolved { .. } => MessageKind::Resolved,
            PayloadDetail::Completed { .. } => MessageKind::Completed,
            PayloadDetail::Cancelled { .. } => MessageKind::Cancelled,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }

    pub fn from_json(value: &serde_json::Value) -> serde_json::Result<Self> {
        Self::deserialize(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn incident() -> Event {
        Event {
            id: 7,
            kind: EventKind::Incident,
            title: "API latency".into(),
            description: Some("Elevated response times".into()),
            status: "investigating".into(),
            severity: Some("major".into()),
            scheduled_start: None,
            scheduled_end: None,
            notify_subscribers: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_payload_detail_is_tagged() {
        let payload = NotificationPayload::initial(&incident(), &[1, 2], Utc::now());
        let json = payload.to_json().unwrap();
        assert_eq!(json["detail"]["kind"], "initial");
        assert_eq!(json["detail"]["service_ids"][1], 2);
        assert_eq!(json["event"]["title"], "API latency");
    }

    #[test]
    fn test_message_kind_follows_detail() {
        let event = incident();
        let now = Utc::now();
        assert_eq!(
            NotificationPayload::resolved(&event, "fixed", now).message_kind(),
            MessageKind::Resolved
        );
        assert_eq!(
            NotificationPayload::cancelled(&event, "no longer needed", now).message_kind(),
            MessageKind::Cancelled
        );
    }

    #[test]
    fn test_payload_rejects_unknown_kind() {
        let json = serde_json::json!({
            "event": {
                "id": 1, "kind": "incident", "title": "t", "description": null,
                "status": "s", "severity": null, "scheduledStart": null, "scheduledEnd": null
            },
            "generatedAt": "2024-01-01T00:00:00Z",
            "detail": { "kind": "exploded" }
        });
        assert!(NotificationPayload::from_json(&json).is_err());
    }
}
