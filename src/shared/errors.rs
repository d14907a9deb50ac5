use axum::http::StatusCode;
use log::error;
use thiserror::Error;
use uuid::Uuid;

/// Error taxonomy for the identity/conversation core.
///
/// `ConflictRecovered` exists so creation races resolved by re-select can be
/// told apart from real failures inside the core; it is never surfaced to
/// callers as an error.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("uniqueness race recovered: {0}")]
    ConflictRecovered(String),

    #[error("schema repair failed on {table}: {detail}")]
    SchemaRepair { table: String, detail: String },

    #[error("transient store error: {0}")]
    TransientStore(String),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),
}

impl AppError {
    /// Errors worth retrying with backoff before surfacing.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::TransientStore(_) | Self::Pool(_) => true,
            Self::Database(diesel::result::Error::DatabaseError(kind, _)) => matches!(
                kind,
                diesel::result::DatabaseErrorKind::ClosedConnection
                    | diesel::result::DatabaseErrorKind::SerializationFailure
            ),
            _ => false,
        }
    }

    /// Maps to the admin-surface HTTP contract. Store-side failures return a
    /// generic "try again" body carrying a correlation id that is also logged,
    /// so operators can find the underlying error without leaking it.
    pub fn http(self) -> (StatusCode, String) {
        match self {
            Self::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::ConflictRecovered(msg) => {
                // Should have been absorbed by the call site; treat as success-shaped
                // noise rather than a client error.
                error!("conflict escaped recovery path: {msg}");
                (StatusCode::OK, String::new())
            }
            other => {
                let correlation_id = Uuid::new_v4();
                error!("request failed [{correlation_id}]: {other}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("temporary failure, try again (ref {correlation_id})"),
                )
            }
        }
    }
}
