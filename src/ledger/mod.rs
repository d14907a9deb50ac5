//! Conversation ledger: owns the conversation row per (tenant, customer,
//! channel), its message history, and the human-override lock that decides
//! whether the automated responder may speak.
//!
//! `human_override_until` is the single source of truth for that decision.
//! It is read fresh against the database clock on every check and flipped
//! with a single-row atomic update; concurrent writers resolve last-write-wins.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::DatabaseErrorKind;
use diesel::sql_query;
use diesel::sql_types::Bool;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::shared::errors::AppError;
use crate::shared::models::schema::{conversations, customers, messages};
use crate::shared::models::{Conversation, Customer, Message, MessageRole, NewMessage};
use crate::shared::state::AppState;

const PREVIEW_MAX_CHARS: usize = 160;

/// Read-only bundle handed to the external reasoning component.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationContext {
    pub conversation: Conversation,
    pub customer: Option<Customer>,
    pub recent_messages: Vec<Message>,
}

/// One turn to append. The ledger derives the preview side effect from it.
#[derive(Debug, Clone)]
pub struct AppendMessage {
    pub role: MessageRole,
    pub content: Option<String>,
    pub media_url: Option<String>,
    pub media_mime: Option<String>,
    pub channel: String,
    pub external_message_id: Option<String>,
    pub metadata: serde_json::Value,
}

pub fn get_or_create_conversation(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    customer_id: Uuid,
    channel: &str,
) -> Result<Conversation, AppError> {
    if let Some(existing) = find_conversation(conn, tenant_id, customer_id, channel)? {
        return Ok(existing);
    }

    let conversation = Conversation {
        id: Uuid::new_v4(),
        tenant_id,
        customer_id: Some(customer_id),
        channel: channel.to_string(),
        human_override_until: None,
        last_message_preview: None,
        last_message_at: None,
        metadata: serde_json::json!({}),
        created_at: Utc::now(),
    };

    match diesel::insert_into(conversations::table)
        .values(&conversation)
        .execute(conn)
    {
        Ok(_) => Ok(conversation),
        Err(diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
            debug!("conversation race recovered: tenant={tenant_id} customer={customer_id} channel={channel}");
            find_conversation(conn, tenant_id, customer_id, channel)?.ok_or_else(|| {
                AppError::TransientStore(
                    "conversation vanished after uniqueness violation".to_string(),
                )
            })
        }
        Err(e) => Err(e.into()),
    }
}

pub fn find_conversation(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    customer_id: Uuid,
    channel: &str,
) -> Result<Option<Conversation>, AppError> {
    conversations::table
        .filter(conversations::tenant_id.eq(tenant_id))
        .filter(conversations::customer_id.eq(customer_id))
        .filter(conversations::channel.eq(channel))
        .first(conn)
        .optional()
        .map_err(Into::into)
}

/// Inserts the message and updates the conversation preview/timestamp in the
/// same transaction, so a reader never sees one without the other. A duplicate
/// `external_message_id` aborts the whole transaction and comes back as
/// `ConflictRecovered`: nothing is written, including the preview.
pub fn append_message(
    conn: &mut PgConnection,
    conversation_id: Uuid,
    message: AppendMessage,
) -> Result<Message, AppError> {
    let now = Utc::now();
    let row = NewMessage {
        id: Uuid::new_v4(),
        conversation_id,
        role: message.role as i32,
        content: message.content,
        media_url: message.media_url,
        media_mime: message.media_mime,
        channel: message.channel,
        external_message_id: message.external_message_id,
        metadata: message.metadata,
        created_at: now,
    };
    let preview = make_preview(row.content.as_deref(), row.media_url.is_some());

    let result = conn.transaction::<Message, diesel::result::Error, _>(|conn| {
        let inserted: Message = diesel::insert_into(messages::table)
            .values(&row)
            .get_result(conn)?;

        diesel::update(conversations::table.filter(conversations::id.eq(conversation_id)))
            .set((
                conversations::last_message_preview.eq(preview.as_str()),
                conversations::last_message_at.eq(now),
            ))
            .execute(conn)?;

        Ok(inserted)
    });

    match result {
        Ok(inserted) => Ok(inserted),
        Err(diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
            Err(AppError::ConflictRecovered(format!(
                "duplicate delivery for conversation {conversation_id}"
            )))
        }
        Err(e) => Err(e.into()),
    }
}

/// Single atomic update of the override expiry. `Some(future)` suppresses the
/// automated responder until then, `None` (or a past instant) re-arms it.
/// Concurrent callers interleave whole-write-at-a-time; the last one wins.
pub fn set_human_override(
    conn: &mut PgConnection,
    conversation_id: Uuid,
    until: Option<DateTime<Utc>>,
) -> Result<(), AppError> {
    let updated = diesel::update(conversations::table.filter(conversations::id.eq(conversation_id)))
        .set(conversations::human_override_until.eq(until))
        .execute(conn)?;

    if updated == 0 {
        return Err(AppError::NotFound(format!("conversation {conversation_id}")));
    }
    info!("human override for {conversation_id} set to {until:?}");
    Ok(())
}

#[derive(QueryableByName)]
struct LockRow {
    #[diesel(sql_type = Bool)]
    locked: bool,
}

/// True iff the automated responder may answer right now. Evaluated against
/// the database clock on every call; never cached, so flipping the expiry is
/// visible on the very next read.
pub fn may_automate(conn: &mut PgConnection, conversation_id: Uuid) -> Result<bool, AppError> {
    let row: LockRow = sql_query(
        "SELECT COALESCE(human_override_until > NOW(), FALSE) AS locked
         FROM conversations WHERE id = $1",
    )
    .bind::<diesel::sql_types::Uuid, _>(conversation_id)
    .get_result(conn)
    .map_err(|e| match e {
        diesel::result::Error::NotFound => {
            AppError::NotFound(format!("conversation {conversation_id}"))
        }
        other => other.into(),
    })?;
    Ok(!row.locked)
}

/// Messages in delivery order: `(created_at, seq)`, never timestamp alone.
pub fn load_messages(
    conn: &mut PgConnection,
    conversation_id: Uuid,
    limit: i64,
) -> Result<Vec<Message>, AppError> {
    let mut rows: Vec<Message> = messages::table
        .filter(messages::conversation_id.eq(conversation_id))
        .order((messages::created_at.desc(), messages::seq.desc()))
        .limit(limit)
        .load(conn)?;
    rows.reverse();
    Ok(rows)
}

pub fn load_context(
    conn: &mut PgConnection,
    conversation: &Conversation,
    limit: i64,
) -> Result<ConversationContext, AppError> {
    let customer = match conversation.customer_id {
        Some(id) => customers::table
            .filter(customers::id.eq(id))
            .first(conn)
            .optional()?,
        None => None,
    };
    let recent_messages = load_messages(conn, conversation.id, limit)?;
    Ok(ConversationContext {
        conversation: conversation.clone(),
        customer,
        recent_messages,
    })
}

/// Lock state as derived for display. Authoritative gating always goes
/// through `may_automate`, which uses the database clock.
pub fn lock_is_active(until: Option<DateTime<Utc>>, at: DateTime<Utc>) -> bool {
    matches!(until, Some(t) if t > at)
}

fn make_preview(content: Option<&str>, has_media: bool) -> String {
    match content {
        Some(text) if !text.trim().is_empty() => {
            text.trim().chars().take(PREVIEW_MAX_CHARS).collect()
        }
        _ if has_media => "[media]".to_string(),
        _ => String::new(),
    }
}

#[derive(Debug, Serialize)]
pub struct ConversationView {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub is_locked: bool,
    pub lock_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub channel: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct OverrideRequest {
    /// `null` re-arms automation; a future timestamp pauses it until then.
    pub until: Option<DateTime<Utc>>,
}

pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<Uuid>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ConversationView>>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(|e| AppError::from(e).http())?;

    let mut q = conversations::table
        .filter(conversations::tenant_id.eq(tenant_id))
        .into_boxed();
    if let Some(channel) = query.channel {
        q = q.filter(conversations::channel.eq(channel));
    }

    let rows: Vec<Conversation> = q
        .order(conversations::last_message_at.desc().nulls_last())
        .limit(query.limit.unwrap_or(50))
        .offset(query.offset.unwrap_or(0))
        .load(&mut conn)
        .map_err(|e| AppError::from(e).http())?;

    let now = Utc::now();
    let views = rows
        .into_iter()
        .map(|conversation| ConversationView {
            is_locked: lock_is_active(conversation.human_override_until, now),
            lock_expires_at: conversation.human_override_until,
            conversation,
        })
        .collect();

    Ok(Json(views))
}

pub async fn get_conversation_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Message>>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(|e| AppError::from(e).http())?;
    let rows =
        load_messages(&mut conn, id, query.limit.unwrap_or(100)).map_err(AppError::http)?;
    Ok(Json(rows))
}

pub async fn set_override(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<OverrideRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(|e| AppError::from(e).http())?;
    set_human_override(&mut conn, id, req.until).map_err(AppError::http)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn clear_override(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(|e| AppError::from(e).http())?;
    set_human_override(&mut conn, id, None).map_err(AppError::http)?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn configure_ledger_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/tenants/:id/conversations", get(list_conversations))
        .route("/api/conversations/:id/messages", get(get_conversation_messages))
        .route(
            "/api/conversations/:id/override",
            post(set_override).delete(clear_override),
        )
}
