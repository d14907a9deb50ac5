//! Responder gate and the seams to the external collaborators.
//!
//! The gate is a side-effect-free read over the ledger's override state. The
//! ingest pipeline consults it twice per turn: once before invoking the
//! reasoning engine and again before committing each outbound message, so a
//! human takeover landing in between suppresses the reply instead of racing it.

use async_trait::async_trait;
use diesel::PgConnection;
use log::info;
use uuid::Uuid;

use crate::ledger::{self, ConversationContext};
use crate::shared::errors::AppError;

/// True iff the automated responder is permitted to answer right now.
pub fn should_respond_automatically(
    conn: &mut PgConnection,
    conversation_id: Uuid,
) -> Result<bool, AppError> {
    ledger::may_automate(conn, conversation_id)
}

/// The language-model reasoning loop, out of scope here. It receives a
/// read-only context bundle and returns zero or more outbound drafts.
#[async_trait]
pub trait ResponderEngine: Send + Sync {
    async fn draft_replies(&self, context: &ConversationContext) -> anyhow::Result<Vec<String>>;
}

/// Outbound channel push, out of scope here.
#[async_trait]
pub trait OutboundDelivery: Send + Sync {
    async fn deliver(&self, channel: &str, recipient: &str, text: &str) -> anyhow::Result<()>;
}

/// Built-in engine so the pipeline is exercisable without the external
/// reasoning component: replies with a single configured acknowledgment.
pub struct CannedResponder {
    pub reply: String,
}

#[async_trait]
impl ResponderEngine for CannedResponder {
    async fn draft_replies(&self, _context: &ConversationContext) -> anyhow::Result<Vec<String>> {
        Ok(vec![self.reply.clone()])
    }
}

/// Built-in delivery that only logs. Real channel push lives outside this core.
pub struct LogOnlyDelivery;

#[async_trait]
impl OutboundDelivery for LogOnlyDelivery {
    async fn deliver(&self, channel: &str, recipient: &str, text: &str) -> anyhow::Result<()> {
        info!("outbound [{channel} -> {recipient}]: {text}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::Conversation;
    use chrono::Utc;

    fn context() -> ConversationContext {
        ConversationContext {
            conversation: Conversation {
                id: Uuid::new_v4(),
                tenant_id: Uuid::new_v4(),
                customer_id: None,
                channel: "webchat".to_string(),
                human_override_until: None,
                last_message_preview: None,
                last_message_at: None,
                metadata: serde_json::json!({}),
                created_at: Utc::now(),
            },
            customer: None,
            recent_messages: vec![],
        }
    }

    #[tokio::test]
    async fn canned_responder_yields_one_draft() {
        let engine = CannedResponder {
            reply: "hello".to_string(),
        };
        let drafts = engine.draft_replies(&context()).await.unwrap();
        assert_eq!(drafts, vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn log_only_delivery_never_fails() {
        LogOnlyDelivery
            .deliver("webchat", "visitor-1", "hi")
            .await
            .unwrap();
    }
}
