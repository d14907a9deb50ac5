use crate::gate::{OutboundDelivery, ResponderEngine};
use crate::shared::config::AppConfig;
use crate::shared::utils::DbPool;
use std::sync::Arc;

/// Shared handler state. Deliberately holds no conversation or override
/// state: "who may speak" is always read from the store (see ledger).
pub struct AppState {
    pub conn: DbPool,
    pub config: AppConfig,
    pub responder: Arc<dyn ResponderEngine>,
    pub delivery: Arc<dyn OutboundDelivery>,
}

impl Clone for AppState {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
            config: self.config.clone(),
            responder: Arc::clone(&self.responder),
            delivery: Arc::clone(&self.delivery),
        }
    }
}
