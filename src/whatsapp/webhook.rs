//! Meta webhook payloads for WhatsApp Cloud.
//!
//! Only text messages are turned into [`InboundMessage`]s; status updates and
//! media are ignored.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::autoreply::types::InboundMessage;

/// Platform tag given to messages arriving through this webhook.
pub const WHATSAPP_PLATFORM: &str = "whatsapp";

/// Top-level webhook notification from Meta.
#[derive(Debug, Default, Deserialize)]
pub struct WebhookNotification {
    /// Should always be "whatsapp_business_account".
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEntry {
    #[serde(default)]
    pub changes: Vec<WebhookChange>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookChange {
    #[serde(default)]
    pub value: Option<WebhookValue>,
}

/// Messages, contacts and metadata for one change.
#[derive(Debug, Deserialize)]
pub struct WebhookValue {
    #[serde(default)]
    pub messages: Vec<WebhookMessage>,
    #[serde(default)]
    pub contacts: Vec<WebhookContact>,
    #[serde(default)]
    pub metadata: Option<WebhookMetadata>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookMessage {
    /// Sender phone number.
    #[serde(default)]
    pub from: String,
    /// WhatsApp message id (`wamid...`).
    #[serde(default)]
    pub id: String,
    /// Unix seconds, as a string.
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub text: Option<WebhookText>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookText {
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct WebhookContact {
    #[serde(default)]
    pub wa_id: String,
    #[serde(default)]
    pub profile: Option<WebhookProfile>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookProfile {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct WebhookMetadata {
    #[serde(default)]
    pub phone_number_id: String,
    #[serde(default)]
    pub display_phone_number: String,
}

/// Query string Meta sends when subscribing a webhook.
#[derive(Debug, Default, Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// Return the challenge to echo back if the subscription request is valid.
///
/// Without a configured token every request is refused.
pub fn verify_subscription(params: &VerifyParams, expected_token: Option<&str>) -> Option<String> {
    let expected = expected_token?;
    if params.mode.as_deref() != Some("subscribe") {
        return None;
    }
    if params.verify_token.as_deref() != Some(expected) {
        return None;
    }
    params.challenge.clone()
}

/// Pull every text message out of a notification.
pub fn extract_text_messages(notification: &WebhookNotification) -> Vec<InboundMessage> {
    let mut messages = Vec::new();

    for change in notification.entry.iter().flat_map(|e| &e.changes) {
        let Some(value) = &change.value else {
            continue;
        };

        for msg in &value.messages {
            if msg.msg_type != "text" {
                debug!(msg_type = %msg.msg_type, "Ignoring non-text WhatsApp message");
                continue;
            }
            let Some(text) = &msg.text else {
                continue;
            };
            let from = msg.from.trim();
            if from.is_empty() {
                continue;
            }

            let mut inbound = InboundMessage::new(WHATSAPP_PLATFORM, from, text.body.clone());
            if !msg.id.is_empty() {
                inbound = inbound.with_id(msg.id.clone());
            }
            if let Some(received_at) = parse_timestamp(&msg.timestamp) {
                inbound = inbound.with_received_at(received_at);
            }
            if let Some(name) = sender_name(value, from) {
                inbound = inbound.with_sender_name(name);
            }
            messages.push(inbound);
        }
    }

    messages
}

/// Contact profile name for `from`, falling back to the first contact.
fn sender_name<'a>(value: &'a WebhookValue, from: &str) -> Option<&'a str> {
    value
        .contacts
        .iter()
        .find(|c| c.wa_id == from)
        .or_else(|| value.contacts.first())
        .and_then(|c| c.profile.as_ref())
        .map(|p| p.name.as_str())
        .filter(|n| !n.is_empty())
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    raw.parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}
