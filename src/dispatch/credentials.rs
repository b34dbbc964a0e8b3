//! Credential resolution boundary.
//!
//! Token storage, refresh, and encryption belong to the external
//! credential service. The dispatcher only needs a bearer credential per
//! account, and treats any resolution failure exactly like an
//! `auth_failure` classification from the provider itself.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// A usable bearer credential for one account.
#[derive(Debug, Clone)]
pub struct Credential {
    pub account_id: Uuid,
    pub access_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("account {0} has no stored credential")]
    NotConnected(Uuid),
    #[error("credential for account {0} is expired")]
    Expired(Uuid),
    #[error("credential for account {0} was revoked by the provider")]
    Revoked(Uuid),
    #[error("credential service unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(&self, account_id: Uuid) -> Result<Credential, CredentialError>;
}
