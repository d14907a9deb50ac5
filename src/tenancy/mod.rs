//! Tenant lifecycle. Tenants are the partition root: every customer,
//! conversation, and message row carries a tenant id, and teardown removes
//! dependents in one transaction in a fixed order so a failure at any step
//! leaves no foreign-key orphans behind.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use diesel::prelude::*;
use log::info;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::shared::errors::AppError;
use crate::shared::models::schema::{
    channel_accounts, conversations, customer_channel_identities, customers, messages, tenants,
};
use crate::shared::models::{ChannelAccount, Tenant};
use crate::shared::state::AppState;

pub fn find_tenant(conn: &mut PgConnection, id: Uuid) -> Result<Tenant, AppError> {
    tenants::table
        .filter(tenants::id.eq(id))
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::NotFound(format!("tenant {id}")))
}

/// Resolves the tenant that owns a receiving channel address. This is how an
/// inbound webhook, which carries no tenant id of its own, gets partitioned.
pub fn find_account(
    conn: &mut PgConnection,
    channel: &str,
    address: &str,
) -> Result<Option<ChannelAccount>, AppError> {
    channel_accounts::table
        .filter(channel_accounts::channel.eq(channel))
        .filter(channel_accounts::address.eq(address))
        .first(conn)
        .optional()
        .map_err(Into::into)
}

/// Deletes a tenant and everything under it, dependency-first:
/// messages, conversations (the handoff state lives there), channel
/// identities, customers, channel credentials, then the tenant row itself.
/// One transaction; any failure aborts the whole teardown.
pub fn delete_tenant_cascade(conn: &mut PgConnection, tenant_id: Uuid) -> Result<(), AppError> {
    find_tenant(conn, tenant_id)?;

    conn.transaction::<_, diesel::result::Error, _>(|conn| {
        let conv_ids = conversations::table
            .filter(conversations::tenant_id.eq(tenant_id))
            .select(conversations::id);
        diesel::delete(messages::table.filter(messages::conversation_id.eq_any(conv_ids)))
            .execute(conn)?;
        diesel::delete(conversations::table.filter(conversations::tenant_id.eq(tenant_id)))
            .execute(conn)?;
        diesel::delete(
            customer_channel_identities::table
                .filter(customer_channel_identities::tenant_id.eq(tenant_id)),
        )
        .execute(conn)?;
        diesel::delete(customers::table.filter(customers::tenant_id.eq(tenant_id)))
            .execute(conn)?;
        diesel::delete(channel_accounts::table.filter(channel_accounts::tenant_id.eq(tenant_id)))
            .execute(conn)?;
        diesel::delete(tenants::table.filter(tenants::id.eq(tenant_id))).execute(conn)?;
        Ok(())
    })?;

    info!("tenant {tenant_id} deleted with all dependents");
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct CreateTenantRequest {
    pub name: String,
    pub bot_address: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateChannelAccountRequest {
    pub channel: String,
    pub address: String,
    pub verify_token: Option<String>,
}

pub async fn create_tenant(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTenantRequest>,
) -> Result<Json<Tenant>, (StatusCode, String)> {
    if req.name.trim().is_empty() {
        return Err(AppError::Validation("tenant name is required".into()).http());
    }
    let mut conn = state.conn.get().map_err(|e| AppError::from(e).http())?;

    let tenant = Tenant {
        id: Uuid::new_v4(),
        name: req.name,
        bot_address: req.bot_address.unwrap_or_default(),
        created_at: Utc::now(),
    };

    diesel::insert_into(tenants::table)
        .values(&tenant)
        .execute(&mut conn)
        .map_err(|e| AppError::from(e).http())?;

    Ok(Json(tenant))
}

pub async fn list_tenants(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Tenant>>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(|e| AppError::from(e).http())?;
    let rows: Vec<Tenant> = tenants::table
        .order(tenants::created_at.asc())
        .load(&mut conn)
        .map_err(|e| AppError::from(e).http())?;
    Ok(Json(rows))
}

pub async fn get_tenant(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Tenant>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(|e| AppError::from(e).http())?;
    let tenant = find_tenant(&mut conn, id).map_err(AppError::http)?;
    Ok(Json(tenant))
}

pub async fn delete_tenant(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(|e| AppError::from(e).http())?;
    delete_tenant_cascade(&mut conn, id).map_err(AppError::http)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn create_channel_account(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<Uuid>,
    Json(req): Json<CreateChannelAccountRequest>,
) -> Result<Json<ChannelAccount>, (StatusCode, String)> {
    if req.channel.trim().is_empty() || req.address.trim().is_empty() {
        return Err(AppError::Validation("channel and address are required".into()).http());
    }
    let mut conn = state.conn.get().map_err(|e| AppError::from(e).http())?;
    find_tenant(&mut conn, tenant_id).map_err(AppError::http)?;

    let account = ChannelAccount {
        id: Uuid::new_v4(),
        tenant_id,
        channel: req.channel,
        address: req.address,
        verify_token: req.verify_token,
        created_at: Utc::now(),
    };

    diesel::insert_into(channel_accounts::table)
        .values(&account)
        .execute(&mut conn)
        .map_err(|e| AppError::from(e).http())?;

    Ok(Json(account))
}

pub async fn list_channel_accounts(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<Vec<ChannelAccount>>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(|e| AppError::from(e).http())?;
    let rows: Vec<ChannelAccount> = channel_accounts::table
        .filter(channel_accounts::tenant_id.eq(tenant_id))
        .order(channel_accounts::created_at.asc())
        .load(&mut conn)
        .map_err(|e| AppError::from(e).http())?;
    Ok(Json(rows))
}

pub fn configure_tenancy_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/tenants", get(list_tenants).post(create_tenant))
        .route("/api/tenants/:id", get(get_tenant).delete(delete_tenant))
        .route(
            "/api/tenants/:id/channel-accounts",
            get(list_channel_accounts).post(create_channel_account),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cascade_deletes_messages_through_a_conversation_subquery() {
        // The message table carries no tenant id, so the teardown reaches it
        // through the tenant's conversations.
        let tenant_id = Uuid::new_v4();
        let conv_ids = conversations::table
            .filter(conversations::tenant_id.eq(tenant_id))
            .select(conversations::id);
        let stmt =
            diesel::delete(messages::table.filter(messages::conversation_id.eq_any(conv_ids)));
        let sql = diesel::debug_query::<diesel::pg::Pg, _>(&stmt).to_string();
        assert!(sql.contains("IN (SELECT"), "expected a subquery: {sql}");
        assert!(sql.contains("tenant_id"), "subquery must scope by tenant: {sql}");
    }
}
