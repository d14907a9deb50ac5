//! WhatsApp Business webhook adapter.
//!
//! Parses the Meta webhook envelope (entry → changes → value) and extracts
//! canonical messages. The receiving `phone_number_id` is the account address
//! used to resolve the owning tenant; a message whose sender equals the
//! business's own display number is treated as an outbound echo.

use serde::{Deserialize, Serialize};

use crate::ingest::{CanonicalMessage, ChannelKind, ChannelNormalizer, Direction, MediaRef};
use crate::shared::errors::AppError;

#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppPayload {
    pub entry: Vec<WhatsAppEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppEntry {
    pub id: String,
    pub changes: Vec<WhatsAppChange>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppChange {
    pub value: WhatsAppValue,
    pub field: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppValue {
    pub messaging_product: String,
    pub metadata: WhatsAppMetadata,
    pub contacts: Option<Vec<WhatsAppContact>>,
    pub messages: Option<Vec<WhatsAppIncomingMessage>>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppMetadata {
    pub display_phone_number: String,
    pub phone_number_id: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppContact {
    pub profile: WhatsAppProfile,
    pub wa_id: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppProfile {
    pub name: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppIncomingMessage {
    pub from: String,
    pub id: String,
    pub timestamp: String,
    #[serde(rename = "type")]
    pub msg_type: String,
    pub text: Option<WhatsAppText>,
    pub image: Option<WhatsAppMedia>,
    pub document: Option<WhatsAppMedia>,
    pub audio: Option<WhatsAppMedia>,
    pub video: Option<WhatsAppMedia>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppText {
    pub body: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppMedia {
    pub id: String,
    pub mime_type: Option<String>,
    pub caption: Option<String>,
    pub link: Option<String>,
}

impl WhatsAppMedia {
    /// Inbound media arrives as a Graph API object id; a direct link is only
    /// present on some message kinds.
    fn media_ref(&self) -> MediaRef {
        MediaRef {
            url: self
                .link
                .clone()
                .unwrap_or_else(|| format!("https://graph.facebook.com/v17.0/{}", self.id)),
            mime_type: self.mime_type.clone(),
        }
    }
}

pub struct WhatsAppNormalizer;

impl ChannelNormalizer for WhatsAppNormalizer {
    fn channel(&self) -> ChannelKind {
        ChannelKind::WhatsApp
    }

    fn normalize(&self, raw: &serde_json::Value) -> Result<Vec<CanonicalMessage>, AppError> {
        let payload: WhatsAppPayload = serde_json::from_value(raw.clone())
            .map_err(|e| AppError::Validation(format!("malformed WhatsApp payload: {e}")))?;

        let mut out = Vec::new();
        for entry in payload.entry {
            for change in entry.changes {
                if change.field != "messages" {
                    continue;
                }
                let value = change.value;
                let Some(messages) = value.messages else {
                    // Status-only deliveries carry no messages array.
                    continue;
                };
                for message in messages {
                    if message.from.trim().is_empty() {
                        return Err(AppError::Validation(
                            "WhatsApp message without sender".to_string(),
                        ));
                    }

                    let direction = if message.from == value.metadata.display_phone_number {
                        Direction::OutboundEcho
                    } else {
                        Direction::Inbound
                    };

                    let sender_display_name = value.contacts.as_deref().and_then(|contacts| {
                        contacts
                            .iter()
                            .find(|c| c.wa_id == message.from)
                            .map(|c| c.profile.name.clone())
                    });

                    let media: Vec<MediaRef> = [
                        message.image.as_ref(),
                        message.document.as_ref(),
                        message.audio.as_ref(),
                        message.video.as_ref(),
                    ]
                    .into_iter()
                    .flatten()
                    .map(WhatsAppMedia::media_ref)
                    .collect();

                    let text = message
                        .text
                        .map(|t| t.body)
                        .or_else(|| {
                            [&message.image, &message.document]
                                .into_iter()
                                .flatten()
                                .find_map(|m| m.caption.clone())
                        })
                        .filter(|t| !t.is_empty());

                    out.push(CanonicalMessage {
                        channel: ChannelKind::WhatsApp,
                        account_address: value.metadata.phone_number_id.clone(),
                        sender_external_id: message.from,
                        sender_display_name,
                        text,
                        media,
                        external_message_id: Some(message.id),
                        direction,
                    });
                }
            }
        }
        Ok(out)
    }
}
