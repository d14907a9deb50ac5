//! Instagram Direct Message webhook adapter.
//!
//! Meta messaging envelope: entry → messaging, each with sender/recipient ids
//! and an optional message body. Echo events (`is_echo`) report the business
//! page as sender, so the adapter swaps the pair to keep
//! `sender_external_id` pointing at the customer side.

use serde::{Deserialize, Serialize};

use crate::ingest::{CanonicalMessage, ChannelKind, ChannelNormalizer, Direction, MediaRef};
use crate::shared::errors::AppError;

#[derive(Debug, Deserialize, Serialize)]
pub struct InstagramPayload {
    pub entry: Vec<InstagramEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct InstagramEntry {
    pub id: String,
    pub time: i64,
    pub messaging: Vec<InstagramMessaging>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct InstagramMessaging {
    pub sender: InstagramUser,
    pub recipient: InstagramUser,
    pub timestamp: i64,
    pub message: Option<InstagramMessageContent>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct InstagramUser {
    pub id: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct InstagramMessageContent {
    pub mid: String,
    pub text: Option<String>,
    #[serde(default)]
    pub is_echo: bool,
    pub attachments: Option<Vec<InstagramAttachment>>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct InstagramAttachment {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: InstagramAttachmentPayload,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct InstagramAttachmentPayload {
    pub url: Option<String>,
}

pub struct InstagramNormalizer;

impl ChannelNormalizer for InstagramNormalizer {
    fn channel(&self) -> ChannelKind {
        ChannelKind::Instagram
    }

    fn normalize(&self, raw: &serde_json::Value) -> Result<Vec<CanonicalMessage>, AppError> {
        let payload: InstagramPayload = serde_json::from_value(raw.clone())
            .map_err(|e| AppError::Validation(format!("malformed Instagram payload: {e}")))?;

        let mut out = Vec::new();
        for entry in payload.entry {
            for event in entry.messaging {
                let Some(message) = event.message else {
                    // Reactions, reads and the like; nothing to ingest.
                    continue;
                };

                let (customer, account, direction) = if message.is_echo {
                    (event.recipient, event.sender, Direction::OutboundEcho)
                } else {
                    (event.sender, event.recipient, Direction::Inbound)
                };
                if customer.id.trim().is_empty() {
                    return Err(AppError::Validation(
                        "Instagram event without a customer id".to_string(),
                    ));
                }

                let media: Vec<MediaRef> = message
                    .attachments
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|a| {
                        a.payload.url.map(|url| MediaRef {
                            url,
                            mime_type: None,
                        })
                    })
                    .collect();

                out.push(CanonicalMessage {
                    channel: ChannelKind::Instagram,
                    account_address: account.id,
                    sender_external_id: customer.id,
                    sender_display_name: None,
                    text: message.text.filter(|t| !t.is_empty()),
                    media,
                    external_message_id: Some(message.mid),
                    direction,
                });
            }
        }
        Ok(out)
    }
}
