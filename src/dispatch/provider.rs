//! Provider API client boundary.
//!
//! The real HTTP client lives with the embedding host; this core only
//! defines the seam. Implementations are injected into the dispatcher, so
//! tests run against a scripted fake rather than a runtime mode flag.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::dispatch::credentials::Credential;
use crate::models::Job;

/// Verbatim outcome of a provider call that produced an HTTP response.
/// Transport-level failures (DNS, connect, reset) are returned as `Err`
/// from [`ProviderClient::execute`] instead and classified transient.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub http_status: u16,
    pub body: Value,
    /// Provider error code extracted from the body, when present.
    pub error_code: Option<String>,
    /// Provider-supplied backoff hint (`retry-after`), when present.
    pub retry_after: Option<Duration>,
}

impl ProviderResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.http_status)
    }

    /// Identifier of the created resource, for write-backs (e.g. the
    /// published post id).
    pub fn resource_id(&self) -> Option<String> {
        self.body
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_owned)
    }
}

/// One call per action type, multiplexed through the job payload. The
/// job's `idempotency_key` accompanies every call so the provider can
/// deduplicate at-least-once redeliveries.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn execute(
        &self,
        credential: &Credential,
        job: &Job,
    ) -> anyhow::Result<ProviderResponse>;
}
