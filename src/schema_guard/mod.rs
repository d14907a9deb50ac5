//! Schema registry and repair.
//!
//! The expected shape of the store is data (`expected_tables`), not scattered
//! DDL. At boot every declared table, column, and index is reconciled against
//! the live database with existence-guarded statements, so a re-run against a
//! correct schema is a no-op and two instances booting at once cannot trip
//! each other: a statement that loses the race is retried once and the loser
//! sees the guard short-circuit.

use crate::shared::errors::AppError;
use crate::shared::utils::DbPool;
use diesel::prelude::*;
use diesel::sql_query;
use log::{error, info, warn};

/// Bumped whenever the descriptor below changes shape.
pub const SCHEMA_REVISION: i32 = 1;

pub struct ColumnSpec {
    pub name: &'static str,
    /// Type plus constraints as used for drift repair. Must be addable to a
    /// table that already holds rows: nullable, or NOT NULL with a DEFAULT.
    pub ddl: &'static str,
}

pub struct IndexSpec {
    pub name: &'static str,
    pub create_sql: &'static str,
}

pub struct TableSpec {
    pub name: &'static str,
    pub create_sql: &'static str,
    pub columns: &'static [ColumnSpec],
    pub indexes: &'static [IndexSpec],
}

pub fn expected_tables() -> &'static [TableSpec] {
    &[
        TableSpec {
            name: "tenants",
            create_sql: "CREATE TABLE IF NOT EXISTS tenants (
                id UUID PRIMARY KEY,
                name TEXT NOT NULL,
                bot_address TEXT NOT NULL DEFAULT '',
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
            columns: &[
                ColumnSpec { name: "name", ddl: "TEXT NOT NULL DEFAULT ''" },
                ColumnSpec { name: "bot_address", ddl: "TEXT NOT NULL DEFAULT ''" },
                ColumnSpec { name: "created_at", ddl: "TIMESTAMPTZ NOT NULL DEFAULT NOW()" },
            ],
            indexes: &[],
        },
        TableSpec {
            name: "channel_accounts",
            create_sql: "CREATE TABLE IF NOT EXISTS channel_accounts (
                id UUID PRIMARY KEY,
                tenant_id UUID NOT NULL REFERENCES tenants(id),
                channel TEXT NOT NULL,
                address TEXT NOT NULL,
                verify_token TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
            columns: &[
                ColumnSpec { name: "tenant_id", ddl: "UUID REFERENCES tenants(id)" },
                ColumnSpec { name: "channel", ddl: "TEXT NOT NULL DEFAULT ''" },
                ColumnSpec { name: "address", ddl: "TEXT NOT NULL DEFAULT ''" },
                ColumnSpec { name: "verify_token", ddl: "TEXT" },
                ColumnSpec { name: "created_at", ddl: "TIMESTAMPTZ NOT NULL DEFAULT NOW()" },
            ],
            indexes: &[IndexSpec {
                name: "idx_channel_accounts_channel_address",
                create_sql: "CREATE UNIQUE INDEX IF NOT EXISTS idx_channel_accounts_channel_address
                    ON channel_accounts(channel, address)",
            }],
        },
        TableSpec {
            name: "customers",
            create_sql: "CREATE TABLE IF NOT EXISTS customers (
                id UUID PRIMARY KEY,
                tenant_id UUID NOT NULL REFERENCES tenants(id),
                display_name TEXT,
                phone TEXT,
                tags JSONB NOT NULL DEFAULT '[]',
                lifetime_value DOUBLE PRECISION NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
            columns: &[
                ColumnSpec { name: "tenant_id", ddl: "UUID REFERENCES tenants(id)" },
                ColumnSpec { name: "display_name", ddl: "TEXT" },
                ColumnSpec { name: "phone", ddl: "TEXT" },
                ColumnSpec { name: "tags", ddl: "JSONB NOT NULL DEFAULT '[]'" },
                ColumnSpec { name: "lifetime_value", ddl: "DOUBLE PRECISION NOT NULL DEFAULT 0" },
                ColumnSpec { name: "created_at", ddl: "TIMESTAMPTZ NOT NULL DEFAULT NOW()" },
                ColumnSpec { name: "updated_at", ddl: "TIMESTAMPTZ NOT NULL DEFAULT NOW()" },
            ],
            indexes: &[IndexSpec {
                name: "idx_customers_tenant",
                create_sql: "CREATE INDEX IF NOT EXISTS idx_customers_tenant ON customers(tenant_id)",
            }],
        },
        TableSpec {
            name: "customer_channel_identities",
            create_sql: "CREATE TABLE IF NOT EXISTS customer_channel_identities (
                id UUID PRIMARY KEY,
                tenant_id UUID NOT NULL REFERENCES tenants(id),
                customer_id UUID NOT NULL REFERENCES customers(id),
                channel TEXT NOT NULL,
                external_id TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
            columns: &[
                ColumnSpec { name: "tenant_id", ddl: "UUID REFERENCES tenants(id)" },
                ColumnSpec { name: "customer_id", ddl: "UUID REFERENCES customers(id)" },
                ColumnSpec { name: "channel", ddl: "TEXT NOT NULL DEFAULT ''" },
                ColumnSpec { name: "external_id", ddl: "TEXT NOT NULL DEFAULT ''" },
                ColumnSpec { name: "created_at", ddl: "TIMESTAMPTZ NOT NULL DEFAULT NOW()" },
            ],
            // Final arbiter of the identity-creation race: one durable customer
            // per (tenant, channel, external id).
            indexes: &[IndexSpec {
                name: "idx_identity_tenant_channel_external",
                create_sql: "CREATE UNIQUE INDEX IF NOT EXISTS idx_identity_tenant_channel_external
                    ON customer_channel_identities(tenant_id, channel, external_id)",
            }],
        },
        TableSpec {
            name: "conversations",
            create_sql: "CREATE TABLE IF NOT EXISTS conversations (
                id UUID PRIMARY KEY,
                tenant_id UUID NOT NULL REFERENCES tenants(id),
                customer_id UUID REFERENCES customers(id),
                channel TEXT NOT NULL,
                human_override_until TIMESTAMPTZ,
                last_message_preview TEXT,
                last_message_at TIMESTAMPTZ,
                metadata JSONB NOT NULL DEFAULT '{}',
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
            columns: &[
                ColumnSpec { name: "tenant_id", ddl: "UUID REFERENCES tenants(id)" },
                ColumnSpec { name: "customer_id", ddl: "UUID REFERENCES customers(id)" },
                ColumnSpec { name: "channel", ddl: "TEXT NOT NULL DEFAULT ''" },
                ColumnSpec { name: "human_override_until", ddl: "TIMESTAMPTZ" },
                ColumnSpec { name: "last_message_preview", ddl: "TEXT" },
                ColumnSpec { name: "last_message_at", ddl: "TIMESTAMPTZ" },
                ColumnSpec { name: "metadata", ddl: "JSONB NOT NULL DEFAULT '{}'" },
                ColumnSpec { name: "created_at", ddl: "TIMESTAMPTZ NOT NULL DEFAULT NOW()" },
            ],
            indexes: &[
                IndexSpec {
                    name: "idx_conversations_tenant_customer_channel",
                    create_sql: "CREATE UNIQUE INDEX IF NOT EXISTS idx_conversations_tenant_customer_channel
                        ON conversations(tenant_id, customer_id, channel)",
                },
                IndexSpec {
                    name: "idx_conversations_tenant_last_message",
                    create_sql: "CREATE INDEX IF NOT EXISTS idx_conversations_tenant_last_message
                        ON conversations(tenant_id, last_message_at DESC)",
                },
            ],
        },
        TableSpec {
            name: "messages",
            create_sql: "CREATE TABLE IF NOT EXISTS messages (
                id UUID PRIMARY KEY,
                conversation_id UUID NOT NULL REFERENCES conversations(id),
                role INTEGER NOT NULL DEFAULT 0,
                content TEXT,
                media_url TEXT,
                media_mime TEXT,
                channel TEXT NOT NULL DEFAULT '',
                external_message_id TEXT,
                metadata JSONB NOT NULL DEFAULT '{}',
                seq BIGSERIAL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
            columns: &[
                ColumnSpec { name: "conversation_id", ddl: "UUID REFERENCES conversations(id)" },
                ColumnSpec { name: "role", ddl: "INTEGER NOT NULL DEFAULT 0" },
                ColumnSpec { name: "content", ddl: "TEXT" },
                ColumnSpec { name: "media_url", ddl: "TEXT" },
                ColumnSpec { name: "media_mime", ddl: "TEXT" },
                ColumnSpec { name: "channel", ddl: "TEXT NOT NULL DEFAULT ''" },
                ColumnSpec { name: "external_message_id", ddl: "TEXT" },
                ColumnSpec { name: "metadata", ddl: "JSONB NOT NULL DEFAULT '{}'" },
                // Adding a bigserial backfills existing rows from the new
                // sequence, so ordering reads keep working after repair.
                ColumnSpec { name: "seq", ddl: "BIGSERIAL" },
                ColumnSpec { name: "created_at", ddl: "TIMESTAMPTZ NOT NULL DEFAULT NOW()" },
            ],
            indexes: &[
                // Idempotent re-delivery detection; partial so media-only rows
                // without an upstream id do not collide.
                IndexSpec {
                    name: "idx_messages_conversation_external",
                    create_sql: "CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_conversation_external
                        ON messages(conversation_id, external_message_id)
                        WHERE external_message_id IS NOT NULL",
                },
                IndexSpec {
                    name: "idx_messages_conversation_order",
                    create_sql: "CREATE INDEX IF NOT EXISTS idx_messages_conversation_order
                        ON messages(conversation_id, created_at, seq)",
                },
            ],
        },
        TableSpec {
            name: "schema_revisions",
            create_sql: "CREATE TABLE IF NOT EXISTS schema_revisions (
                revision INTEGER PRIMARY KEY,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
            columns: &[ColumnSpec { name: "applied_at", ddl: "TIMESTAMPTZ NOT NULL DEFAULT NOW()" }],
            indexes: &[],
        },
    ]
}

/// Reconciles the live schema to the descriptor. A single failed statement is
/// logged and skipped (the owning request will fail later, not the boot); the
/// whole repair only errors when no table could be ensured at all, which means
/// the store itself is unusable.
pub fn ensure_schema(pool: &DbPool) -> Result<(), AppError> {
    let mut conn = pool.get()?;
    let tables = expected_tables();
    let mut tables_ok = 0usize;

    for table in tables {
        if run_repair(&mut conn, table.name, "create table", table.create_sql) {
            tables_ok += 1;
        } else {
            continue;
        }

        for column in table.columns {
            let sql = format!(
                "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {} {}",
                table.name, column.name, column.ddl
            );
            run_repair(&mut conn, table.name, column.name, &sql);
        }

        for index in table.indexes {
            run_repair(&mut conn, table.name, index.name, index.create_sql);
        }
    }

    if tables_ok == 0 {
        return Err(AppError::SchemaRepair {
            table: "*".to_string(),
            detail: "no table could be created or verified".to_string(),
        });
    }

    if let Err(e) = sql_query(
        "INSERT INTO schema_revisions (revision, applied_at) VALUES ($1, NOW())
         ON CONFLICT (revision) DO NOTHING",
    )
    .bind::<diesel::sql_types::Integer, _>(SCHEMA_REVISION)
    .execute(&mut conn)
    {
        warn!("schema repair: could not record revision {SCHEMA_REVISION}: {e}");
    }

    info!(
        "schema repair complete: {tables_ok}/{} tables verified (revision {SCHEMA_REVISION})",
        tables.len()
    );
    Ok(())
}

/// Executes one guarded DDL statement. Because every statement is an
/// "if not exists" form, losing a race against a sibling instance either
/// succeeds on the immediate retry or turns into a no-op.
fn run_repair(conn: &mut PgConnection, table: &str, detail: &str, sql: &str) -> bool {
    for attempt in 0..2 {
        match sql_query(sql).execute(conn) {
            Ok(_) => return true,
            Err(e) if attempt == 0 => {
                warn!("schema repair retry: table={table} target={detail}: {e}");
            }
            Err(e) => {
                error!("schema repair failed: table={table} target={detail}: {e}");
                return false;
            }
        }
    }
    false
}
