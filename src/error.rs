//! Structured error handling for the outbound action core.
//!
//! Provider failures are *not* represented here; the dispatch boundary
//! reduces them to an [`ErrorCategory`](crate::dispatch::ErrorCategory)
//! before any retry decision is made. This type covers structural errors:
//! caller bugs (illegal transitions, malformed payloads) and
//! infrastructure failures (database, configuration).

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("invalid transition for {entity} {id}: {from} -> {requested}")]
    InvalidTransition {
        entity: &'static str,
        id: Uuid,
        from: String,
        requested: String,
    },

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl RelayError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
