//! First-party web chat widget adapter. The widget posts a flat JSON shape;
//! the site key identifies the receiving account.

use serde::{Deserialize, Serialize};

use crate::ingest::{CanonicalMessage, ChannelKind, ChannelNormalizer, Direction, MediaRef};
use crate::shared::errors::AppError;

#[derive(Debug, Deserialize, Serialize)]
pub struct WebChatPayload {
    pub site_key: String,
    pub visitor_id: String,
    pub visitor_name: Option<String>,
    pub text: Option<String>,
    #[serde(default)]
    pub media: Vec<WebChatMedia>,
    pub message_id: Option<String>,
    #[serde(default)]
    pub echo: bool,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WebChatMedia {
    pub url: String,
    pub mime_type: Option<String>,
}

pub struct WebChatNormalizer;

impl ChannelNormalizer for WebChatNormalizer {
    fn channel(&self) -> ChannelKind {
        ChannelKind::WebChat
    }

    fn normalize(&self, raw: &serde_json::Value) -> Result<Vec<CanonicalMessage>, AppError> {
        let payload: WebChatPayload = serde_json::from_value(raw.clone())
            .map_err(|e| AppError::Validation(format!("malformed webchat payload: {e}")))?;

        if payload.visitor_id.trim().is_empty() {
            return Err(AppError::Validation("webchat message without visitor id".to_string()));
        }

        Ok(vec![CanonicalMessage {
            channel: ChannelKind::WebChat,
            account_address: payload.site_key,
            sender_external_id: payload.visitor_id,
            sender_display_name: payload.visitor_name,
            text: payload.text.filter(|t| !t.is_empty()),
            media: payload
                .media
                .into_iter()
                .map(|m| MediaRef { url: m.url, mime_type: m.mime_type })
                .collect(),
            external_message_id: payload.message_id,
            direction: if payload.echo { Direction::OutboundEcho } else { Direction::Inbound },
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn widget_message_normalizes() {
        let payload = json!({
            "site_key": "shop-7",
            "visitor_id": "v-123",
            "visitor_name": "Leo",
            "text": "hi there",
            "message_id": "wc-1"
        });
        let out = WebChatNormalizer.normalize(&payload).unwrap();
        assert_eq!(out.len(), 1);
        let msg = &out[0];
        assert_eq!(msg.account_address, "shop-7");
        assert_eq!(msg.sender_external_id, "v-123");
        assert_eq!(msg.sender_display_name.as_deref(), Some("Leo"));
        assert_eq!(msg.direction, Direction::Inbound);
    }

    #[test]
    fn blank_visitor_id_rejected() {
        let payload = json!({ "site_key": "shop-7", "visitor_id": "  ", "text": "hi" });
        assert!(matches!(
            WebChatNormalizer.normalize(&payload),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn media_only_message_has_no_text() {
        let payload = json!({
            "site_key": "shop-7",
            "visitor_id": "v-123",
            "media": [{ "url": "https://cdn.example/file.pdf", "mime_type": "application/pdf" }]
        });
        let out = WebChatNormalizer.normalize(&payload).unwrap();
        assert_eq!(out[0].text, None);
        assert_eq!(out[0].media[0].mime_type.as_deref(), Some("application/pdf"));
    }
}
