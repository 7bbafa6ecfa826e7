//! Message rendering
//!
//! Turns a frozen [`NotificationPayload`] into subject and body text. Pure:
//! the generation timestamp comes from the payload, not the clock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sh_models::{
    EventKind, EventSnapshot, MessageKind, NotificationPayload, PayloadDetail,
    ServiceStatusChange, StatusTransition,
};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("queue item is {expected} but payload is {actual}")]
    KindMismatch {
        expected: MessageKind,
        actual: MessageKind,
    },
}

/// Rendered subject and body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedMessage {
    pub subject: String,
    pub body: String,
}

/// Renders payloads into text, optionally linking the public event page
#[derive(Debug, Clone, Default)]
pub struct Renderer {
    public_base_url: Option<String>,
}

impl Renderer {
    pub fn new(public_base_url: Option<String>) -> Self {
        Self {
            public_base_url: public_base_url.map(|url| url.trim_end_matches('/').to_string()),
        }
    }

    pub fn render(
        &self,
        kind: MessageKind,
        payload: &NotificationPayload,
    ) -> Result<RenderedMessage, RenderError> {
        let actual = payload.message_kind();
        if actual != kind {
            return Err(RenderError::KindMismatch {
                expected: kind,
                actual,
            });
        }

        let event = &payload.event;
        let (headline, mut body) = match &payload.detail {
            PayloadDetail::Initial { service_ids } => {
                (initial_headline(event.kind), initial_body(event, service_ids))
            }
            PayloadDetail::Update {
                message,
                status_change,
                service_changes,
            } => (
                "Update",
                update_body(message, status_change.as_ref(), service_changes),
            ),
            PayloadDetail::Resolved { message } => ("Resolved", format!("{}\n", message)),
            PayloadDetail::Completed { message } => ("Completed", format!("{}\n", message)),
            PayloadDetail::Cancelled { reason } => {
                ("Cancelled", format!("Reason: {}\n", reason))
            }
        };

        body.push_str(&self.footer(event, payload.generated_at));

        Ok(RenderedMessage {
            subject: format!("[{}] {}: {}", event.kind.label(), headline, event.title),
            body,
        })
    }

    fn footer(&self, event: &EventSnapshot, generated_at: DateTime<Utc>) -> String {
        let mut footer = String::from("\n---\n");
        footer.push_str(&format!(
            "Generated at {}\n",
            generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        if let Some(base) = &self.public_base_url {
            footer.push_str(&format!(
                "Details: {}/{}/{}\n",
                base,
                event.kind.path_segment(),
                event.id
            ));
        }
        footer
    }
}

fn initial_headline(kind: EventKind) -> &'static str {
    match kind {
        EventKind::Incident => "New incident",
        EventKind::Maintenance => "Scheduled maintenance",
    }
}

fn initial_body(event: &EventSnapshot, service_ids: &[sh_core::Id]) -> String {
    let mut body = String::new();

    if let Some(description) = event.description.as_deref().filter(|d| !d.is_empty()) {
        body.push_str(&format!("{}\n\n", description));
    }

    body.push_str(&format!("Status: {}\n", event.status));
    if let Some(severity) = &event.severity {
        body.push_str(&format!("Severity: {}\n", severity));
    }

    if event.kind == EventKind::Maintenance {
        if let (Some(start), Some(end)) = (event.scheduled_start, event.scheduled_end) {
            body.push_str(&format!(
                "Scheduled: {} to {}\n",
                start.format("%Y-%m-%d %H:%M UTC"),
                end.format("%Y-%m-%d %H:%M UTC")
            ));
        }
    }

    if !service_ids.is_empty() {
        let services: Vec<String> = service_ids.iter().map(|id| format!("#{}", id)).collect();
        body.push_str(&format!("Affected services: {}\n", services.join(", ")));
    }

    body
}

fn update_body(
    message: &str,
    status_change: Option<&StatusTransition>,
    service_changes: &[ServiceStatusChange],
) -> String {
    let mut body = String::new();

    if let Some(change) = status_change {
        body.push_str(&format!("Status: {} → {}\n\n", change.from, change.to));
    }

    body.push_str(&format!("{}\n", message));

    if !service_changes.is_empty() {
        body.push_str("\nService changes:\n");
        for change in service_changes {
            body.push_str(&format!(
                "- {}: {} → {}\n",
                change.service_name, change.from, change.to
            ));
        }
    }

    body
}
