//! WhatsApp Cloud API client.
//!
//! Talks to `{graph}/{version}/{phone_number_id}/...` with a bearer token.
//! Failures carry the provider's `error.message` when it sends one, otherwise
//! a fixed per-operation fallback.

use async_trait::async_trait;
use reqwest::Method;
use secrecy::ExposeSecret;
use serde_json::{Value, json};

use crate::config::WhatsAppConfig;
use crate::error::SenderError;
use crate::whatsapp::{MessageSender, SendReceipt};

/// Template language used when the caller does not pick one.
pub const DEFAULT_TEMPLATE_LANGUAGE: &str = "en";

/// Default page size for history queries.
pub const DEFAULT_LIST_LIMIT: u32 = 50;

/// One outbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Text {
        body: String,
    },
    Image {
        link: String,
        caption: Option<String>,
    },
    Template {
        name: String,
        language: Option<String>,
        components: Option<Value>,
    },
}

impl OutboundMessage {
    pub fn text(body: impl Into<String>) -> Self {
        Self::Text { body: body.into() }
    }

    /// Graph API `messages` payload for recipient `to`.
    pub fn to_payload(&self, to: &str) -> Value {
        let mut payload = json!({
            "messaging_product": "whatsapp",
            "to": to,
        });
        match self {
            Self::Text { body } => {
                payload["type"] = json!("text");
                payload["text"] = json!({ "body": body, "preview_url": false });
            }
            Self::Image { link, caption } => {
                payload["type"] = json!("image");
                payload["image"] = json!({ "link": link });
                if let Some(caption) = caption {
                    payload["image"]["caption"] = json!(caption);
                }
            }
            Self::Template {
                name,
                language,
                components,
            } => {
                payload["type"] = json!("template");
                payload["template"] = json!({
                    "name": name,
                    "language": {
                        "code": language.as_deref().unwrap_or(DEFAULT_TEMPLATE_LANGUAGE)
                    },
                });
                if let Some(components) = components {
                    payload["template"]["components"] = components.clone();
                }
            }
        }
        payload
    }
}

/// WhatsApp Cloud API client bound to one business phone number.
pub struct WhatsAppClient {
    config: WhatsAppConfig,
    client: reqwest::Client,
}

impl WhatsAppClient {
    pub fn new(config: WhatsAppConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, resource: &str) -> String {
        format!(
            "{}/{}/{resource}",
            self.config.base_url(),
            self.config.phone_number_id
        )
    }

    async fn request(
        &self,
        method: Method,
        resource: &str,
        query: &[(&str, String)],
        body: Option<Value>,
        fallback: &str,
    ) -> Result<Value, SenderError> {
        let mut req = self
            .client
            .request(method, self.api_url(resource))
            .bearer_auth(self.config.access_token.expose_secret());
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(body) = body {
            req = req.json(&body);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| SenderError::Http(format!("{fallback}: {e}")))?;

        let status = resp.status();
        let data: Value = resp.json().await.unwrap_or_default();

        if !status.is_success() {
            let message = provider_error_message(&data).unwrap_or(fallback);
            tracing::warn!(
                status = %status,
                resource,
                error = %message,
                "WhatsApp API request failed"
            );
            return Err(SenderError::Provider(message.to_string()));
        }
        Ok(data)
    }

    /// Send a message and return the provider receipt.
    pub async fn send_message(
        &self,
        to: &str,
        message: &OutboundMessage,
    ) -> Result<SendReceipt, SenderError> {
        let data = self
            .request(
                Method::POST,
                "messages",
                &[],
                Some(message.to_payload(to)),
                "Failed to send message",
            )
            .await?;

        let message_id = data
            .pointer("/messages/0/id")
            .and_then(Value::as_str)
            .map(str::to_string);
        tracing::info!(to = %to, message_id = ?message_id, "WhatsApp message sent");

        Ok(SendReceipt {
            to: to.to_string(),
            message_id,
        })
    }

    /// Message history with one phone number.
    pub async fn get_messages(&self, phone_number: &str, limit: u32) -> Result<Value, SenderError> {
        self.request(
            Method::GET,
            "messages",
            &[
                ("phone_number", phone_number.to_string()),
                ("limit", limit.to_string()),
            ],
            None,
            "Failed to fetch messages",
        )
        .await
    }

    pub async fn get_chats(&self, limit: u32) -> Result<Value, SenderError> {
        self.request(
            Method::GET,
            "conversations",
            &[("limit", limit.to_string())],
            None,
            "Failed to fetch chats",
        )
        .await
    }

    pub async fn get_contact_info(&self, phone_number: &str) -> Result<Value, SenderError> {
        self.request(
            Method::GET,
            "contacts",
            &[("phone_number", phone_number.to_string())],
            None,
            "Failed to fetch contact info",
        )
        .await
    }

    pub async fn get_message_templates(&self) -> Result<Value, SenderError> {
        self.request(
            Method::GET,
            "message_templates",
            &[],
            None,
            "Failed to fetch message templates",
        )
        .await
    }

    /// `category` is one of AUTHENTICATION, MARKETING, UTILITY.
    pub async fn create_message_template(
        &self,
        name: &str,
        language: &str,
        category: &str,
        components: Value,
    ) -> Result<Value, SenderError> {
        self.request(
            Method::POST,
            "message_templates",
            &[],
            Some(json!({
                "name": name,
                "language": language,
                "category": category,
                "components": components,
            })),
            "Failed to create message template",
        )
        .await
    }

    pub async fn delete_message_template(&self, name: &str) -> Result<Value, SenderError> {
        self.request(
            Method::DELETE,
            "message_templates",
            &[],
            Some(json!({ "name": name })),
            "Failed to delete message template",
        )
        .await
    }

    pub async fn block_user(&self, phone_number: &str) -> Result<Value, SenderError> {
        self.request(
            Method::POST,
            "blocked",
            &[],
            Some(json!({ "phone_number": phone_number })),
            "Failed to block user",
        )
        .await
    }

    pub async fn unblock_user(&self, phone_number: &str) -> Result<Value, SenderError> {
        self.request(
            Method::DELETE,
            "blocked",
            &[],
            Some(json!({ "phone_number": phone_number })),
            "Failed to unblock user",
        )
        .await
    }

    pub async fn get_blocked_users(&self) -> Result<Value, SenderError> {
        self.request(
            Method::GET,
            "blocked",
            &[],
            None,
            "Failed to fetch blocked users",
        )
        .await
    }
}

#[async_trait]
impl MessageSender for WhatsAppClient {
    async fn send(
        &self,
        to: &str,
        body: &str,
        media_url: Option<&str>,
    ) -> Result<SendReceipt, SenderError> {
        let message = match media_url {
            Some(link) => OutboundMessage::Image {
                link: link.to_string(),
                caption: (!body.is_empty()).then(|| body.to_string()),
            },
            None => OutboundMessage::text(body),
        };
        self.send_message(to, &message).await
    }
}

/// `error.message` from a Graph API error body.
fn provider_error_message(data: &Value) -> Option<&str> {
    data.pointer("/error/message").and_then(Value::as_str)
}
