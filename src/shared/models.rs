use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who produced a message turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageRole {
    Customer = 0,
    Responder = 1,
    Operator = 2,
}

impl MessageRole {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Customer),
            1 => Some(Self::Responder),
            2 => Some(Self::Operator),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, Identifiable)]
#[diesel(table_name = tenants)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub bot_address: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, Identifiable)]
#[diesel(table_name = channel_accounts)]
pub struct ChannelAccount {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub channel: String,
    pub address: String,
    pub verify_token: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, Identifiable)]
#[diesel(table_name = customers)]
pub struct Customer {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub display_name: Option<String>,
    pub phone: Option<String>,
    pub tags: serde_json::Value,
    pub lifetime_value: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, Identifiable)]
#[diesel(table_name = customer_channel_identities)]
pub struct CustomerChannelIdentity {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub customer_id: Uuid,
    pub channel: String,
    pub external_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, Identifiable)]
#[diesel(table_name = conversations)]
pub struct Conversation {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub customer_id: Option<Uuid>,
    pub channel: String,
    pub human_override_until: Option<DateTime<Utc>>,
    pub last_message_preview: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Full message row. `seq` is assigned by the database (bigserial) and breaks
/// ties when `created_at` collides at sub-millisecond resolution; readers must
/// sort by `(created_at, seq)`, never the timestamp alone.
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable)]
#[diesel(table_name = messages)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: i32,
    pub content: Option<String>,
    pub media_url: Option<String>,
    pub media_mime: Option<String>,
    pub channel: String,
    pub external_message_id: Option<String>,
    pub metadata: serde_json::Value,
    pub seq: i64,
    pub created_at: DateTime<Utc>,
}

/// Insertable shape; omits `seq` so the database sequence assigns it.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = messages)]
pub struct NewMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: i32,
    pub content: Option<String>,
    pub media_url: Option<String>,
    pub media_mime: Option<String>,
    pub channel: String,
    pub external_message_id: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

pub mod schema {
    diesel::table! {
        tenants (id) {
            id -> Uuid,
            name -> Text,
            bot_address -> Text,
            created_at -> Timestamptz,
        }
    }

    diesel::table! {
        channel_accounts (id) {
            id -> Uuid,
            tenant_id -> Uuid,
            channel -> Text,
            address -> Text,
            verify_token -> Nullable<Text>,
            created_at -> Timestamptz,
        }
    }

    diesel::table! {
        customers (id) {
            id -> Uuid,
            tenant_id -> Uuid,
            display_name -> Nullable<Text>,
            phone -> Nullable<Text>,
            tags -> Jsonb,
            lifetime_value -> Float8,
            created_at -> Timestamptz,
            updated_at -> Timestamptz,
        }
    }

    diesel::table! {
        customer_channel_identities (id) {
            id -> Uuid,
            tenant_id -> Uuid,
            customer_id -> Uuid,
            channel -> Text,
            external_id -> Text,
            created_at -> Timestamptz,
        }
    }

    diesel::table! {
        conversations (id) {
            id -> Uuid,
            tenant_id -> Uuid,
            customer_id -> Nullable<Uuid>,
            channel -> Text,
            human_override_until -> Nullable<Timestamptz>,
            last_message_preview -> Nullable<Text>,
            last_message_at -> Nullable<Timestamptz>,
            metadata -> Jsonb,
            created_at -> Timestamptz,
        }
    }

    diesel::table! {
        messages (id) {
            id -> Uuid,
            conversation_id -> Uuid,
            role -> Int4,
            content -> Nullable<Text>,
            media_url -> Nullable<Text>,
            media_mime -> Nullable<Text>,
            channel -> Text,
            external_message_id -> Nullable<Text>,
            metadata -> Jsonb,
            seq -> Int8,
            created_at -> Timestamptz,
        }
    }

    diesel::table! {
        schema_revisions (revision) {
            revision -> Int4,
            applied_at -> Timestamptz,
        }
    }

    diesel::allow_tables_to_appear_in_same_query!(
        tenants,
        channel_accounts,
        customers,
        customer_channel_identities,
        conversations,
        messages,
    );
}

pub use schema::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trip() {
        for role in [MessageRole::Customer, MessageRole::Responder, MessageRole::Operator] {
            assert_eq!(MessageRole::from_i32(role as i32), Some(role));
        }
        assert_eq!(MessageRole::from_i32(9), None);
    }

    #[test]
    fn messages_sort_by_timestamp_then_seq() {
        // Two rows sharing a timestamp must order on the sequence tiebreaker.
        let t = Utc::now();
        let mut keys = vec![(t, 5i64), (t, 2), (t - chrono::Duration::seconds(1), 9)];
        keys.sort();
        assert_eq!(keys[0].1, 9);
        assert_eq!(keys[1].1, 2);
        assert_eq!(keys[2].1, 5);
    }
}
