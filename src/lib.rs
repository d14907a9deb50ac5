pub mod gate;
pub mod identity;
pub mod ingest;
pub mod ledger;
pub mod schema_guard;
pub mod shared;
pub mod tenancy;
