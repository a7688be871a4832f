//! WhatsApp integration: outbound sending and inbound webhooks.

pub mod client;
pub mod webhook;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::SenderError;

pub use client::{OutboundMessage, WhatsAppClient};

/// Provider acknowledgement for one outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendReceipt {
    pub to: String,
    /// Provider message id (`wamid...`), when the provider returned one.
    pub message_id: Option<String>,
}

/// Outbound delivery seam used by the auto-reply dispatcher.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Deliver `body` to `to`. With `media_url`, the media is sent and `body` becomes its caption.
    async fn send(
        &self,
        to: &str,
        body: &str,
        media_url: Option<&str>,
    ) -> Result<SendReceipt, SenderError>;
}

/// Sender used when no WhatsApp credentials are configured: logs and drops.
#[derive(Debug, Default)]
pub struct LogOnlySender;

#[async_trait]
impl MessageSender for LogOnlySender {
    async fn send(
        &self,
        to: &str,
        body: &str,
        media_url: Option<&str>,
    ) -> Result<SendReceipt, SenderError> {
        tracing::info!(
            to = %to,
            chars = body.chars().count(),
            media = media_url.is_some(),
            "WhatsApp sending disabled; outbound message logged only"
        );
        Ok(SendReceipt {
            to: to.to_string(),
            message_id: None,
        })
    }
}
