//! Identity resolution: one durable customer per (tenant, channel, external id).
//!
//! Creation races are settled by the compound unique index on the identity
//! table, insert-then-recover style: the insert is attempted first and a
//! uniqueness violation means another writer won, so the winning row is
//! re-read and returned. Distinct customer rows are never merged here;
//! cross-channel linking is an explicit administrative action.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use chrono::Utc;
use diesel::prelude::*;
use diesel::result::DatabaseErrorKind;
use log::debug;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::shared::errors::AppError;
use crate::shared::models::schema::{customer_channel_identities, customers, tenants};
use crate::shared::models::{Customer, CustomerChannelIdentity};
use crate::shared::state::AppState;

/// Optional profile fields carried by the inbound payload. Only ever fills
/// gaps; populated customer fields are never overwritten from a hint.
#[derive(Debug, Clone, Default)]
pub struct ProfileHint {
    pub display_name: Option<String>,
    pub phone: Option<String>,
}

/// Fields that would change if `hint` were applied to `existing`, or `None`
/// when the hint adds nothing.
pub fn merge_profile(existing: &Customer, hint: &ProfileHint) -> Option<(Option<String>, Option<String>)> {
    let display_name = existing
        .display_name
        .clone()
        .or_else(|| hint.display_name.clone());
    let phone = existing.phone.clone().or_else(|| hint.phone.clone());
    if display_name == existing.display_name && phone == existing.phone {
        None
    } else {
        Some((display_name, phone))
    }
}

pub fn resolve_or_create(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    channel: &str,
    channel_user_id: &str,
    hint: &ProfileHint,
) -> Result<Customer, AppError> {
    let channel_user_id = channel_user_id.trim();
    if channel_user_id.is_empty() {
        return Err(AppError::Validation(
            "channel user id is empty; refusing to create an anonymous customer".to_string(),
        ));
    }

    let tenant_exists: i64 = tenants::table
        .filter(tenants::id.eq(tenant_id))
        .count()
        .get_result(conn)?;
    if tenant_exists == 0 {
        return Err(AppError::NotFound(format!("tenant {tenant_id}")));
    }

    if let Some(customer) = find_by_identity(conn, tenant_id, channel, channel_user_id)? {
        return enrich_missing(conn, customer, hint);
    }

    let now = Utc::now();
    let customer = Customer {
        id: Uuid::new_v4(),
        tenant_id,
        display_name: hint.display_name.clone(),
        phone: hint.phone.clone(),
        tags: serde_json::json!([]),
        lifetime_value: 0.0,
        created_at: now,
        updated_at: now,
    };
    let identity = CustomerChannelIdentity {
        id: Uuid::new_v4(),
        tenant_id,
        customer_id: customer.id,
        channel: channel.to_string(),
        external_id: channel_user_id.to_string(),
        created_at: now,
    };

    let inserted = conn.transaction::<_, diesel::result::Error, _>(|conn| {
        diesel::insert_into(customers::table)
            .values(&customer)
            .execute(conn)?;
        diesel::insert_into(customer_channel_identities::table)
            .values(&identity)
            .execute(conn)?;
        Ok(())
    });

    match inserted {
        Ok(()) => Ok(customer),
        Err(diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
            // Another first-contact message won the insert; its row is the
            // durable identity now.
            debug!("identity race recovered: tenant={tenant_id} channel={channel}");
            find_by_identity(conn, tenant_id, channel, channel_user_id)?.ok_or_else(|| {
                AppError::TransientStore(
                    "identity vanished after uniqueness violation".to_string(),
                )
            })
        }
        Err(e) => Err(e.into()),
    }
}

pub fn find_by_identity(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    channel: &str,
    external_id: &str,
) -> Result<Option<Customer>, AppError> {
    let identity: Option<CustomerChannelIdentity> = customer_channel_identities::table
        .filter(customer_channel_identities::tenant_id.eq(tenant_id))
        .filter(customer_channel_identities::channel.eq(channel))
        .filter(customer_channel_identities::external_id.eq(external_id))
        .first(conn)
        .optional()?;

    let Some(identity) = identity else {
        return Ok(None);
    };

    let customer: Customer = customers::table
        .filter(customers::id.eq(identity.customer_id))
        .first(conn)?;
    Ok(Some(customer))
}

fn enrich_missing(
    conn: &mut PgConnection,
    customer: Customer,
    hint: &ProfileHint,
) -> Result<Customer, AppError> {
    let Some((display_name, phone)) = merge_profile(&customer, hint) else {
        return Ok(customer);
    };

    diesel::update(customers::table.filter(customers::id.eq(customer.id)))
        .set((
            customers::display_name.eq(display_name.clone()),
            customers::phone.eq(phone.clone()),
            customers::updated_at.eq(Utc::now()),
        ))
        .execute(conn)?;

    Ok(Customer {
        display_name,
        phone,
        ..customer
    })
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize, AsChangeset)]
#[diesel(table_name = customers)]
pub struct CustomerPatch {
    pub display_name: Option<String>,
    pub phone: Option<String>,
    pub tags: Option<serde_json::Value>,
    pub lifetime_value: Option<f64>,
}

pub async fn list_customers(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<Uuid>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Customer>>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(|e| AppError::from(e).http())?;

    let rows: Vec<Customer> = customers::table
        .filter(customers::tenant_id.eq(tenant_id))
        .order(customers::created_at.desc())
        .limit(query.limit.unwrap_or(50))
        .offset(query.offset.unwrap_or(0))
        .load(&mut conn)
        .map_err(|e| AppError::from(e).http())?;

    Ok(Json(rows))
}

pub async fn update_customer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(patch): Json<CustomerPatch>,
) -> Result<Json<Customer>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(|e| AppError::from(e).http())?;

    diesel::update(customers::table.filter(customers::id.eq(id)))
        .set((&patch, customers::updated_at.eq(Utc::now())))
        .execute(&mut conn)
        .map_err(|e| AppError::from(e).http())?;

    let customer: Customer = customers::table
        .filter(customers::id.eq(id))
        .first(&mut conn)
        .map_err(|_| AppError::NotFound(format!("customer {id}")).http())?;

    Ok(Json(customer))
}

pub fn configure_identity_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/tenants/:id/customers", get(list_customers))
        .route("/api/customers/:id", put(update_customer))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customer(display_name: Option<&str>, phone: Option<&str>) -> Customer {
        let now = Utc::now();
        Customer {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            display_name: display_name.map(str::to_string),
            phone: phone.map(str::to_string),
            tags: serde_json::json!([]),
            lifetime_value: 0.0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn hint_fills_missing_fields_only() {
        let existing = customer(None, Some("+5491122334455"));
        let hint = ProfileHint {
            display_name: Some("Ana".into()),
            phone: Some("+000".into()),
        };
        let (display_name, phone) = merge_profile(&existing, &hint).expect("changes");
        assert_eq!(display_name.as_deref(), Some("Ana"));
        // Populated phone must survive the hint.
        assert_eq!(phone.as_deref(), Some("+5491122334455"));
    }

    #[test]
    fn noop_hint_reports_no_change() {
        let existing = customer(Some("Ana"), Some("+549"));
        let hint = ProfileHint {
            display_name: Some("Anna".into()),
            phone: None,
        };
        assert!(merge_profile(&existing, &hint).is_none());
    }

    #[test]
    fn empty_hint_against_empty_profile_is_noop() {
        let existing = customer(None, None);
        assert!(merge_profile(&existing, &ProfileHint::default()).is_none());
    }
}
