//! Shared harness for integration tests: a per-test SQLite database, row
//! factories, and injected fakes for the provider and credential seams.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::SqlitePool;
use tempfile::TempDir;
use uuid::Uuid;

use relay_core::config::{DatabaseConfig, DispatcherConfig, RetryConfig};
use relay_core::dispatch::{
    Credential, CredentialError, CredentialResolver, ProviderClient, ProviderResponse,
};
use relay_core::models::scheduled_post::{
    AgentModification, NewScheduledPost, ScheduledPost, SelectionFactors,
};
use relay_core::models::{AgentAccount, Job, JobPayload};

pub struct TestDb {
    pub pool: SqlitePool,
    _dir: TempDir,
}

pub async fn setup_db() -> TestDb {
    relay_core::logging::init_telemetry();

    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("relay-test.db");
    let config = DatabaseConfig {
        url: format!("sqlite://{}", path.display()),
        max_connections: 5,
        busy_timeout_ms: 5_000,
    };
    let pool = relay_core::database::connect(&config)
        .await
        .expect("connect test database");

    TestDb { pool, _dir: dir }
}

pub async fn create_account(pool: &SqlitePool) -> AgentAccount {
    AgentAccount::create(pool, &format!("@agent_{}", Uuid::new_v4().simple()))
        .await
        .expect("create account")
}

pub fn reply_comment_payload() -> JobPayload {
    JobPayload::ReplyComment {
        comment_id: "c_1001".to_string(),
        message: "Thanks for the love! DM us for sizing help.".to_string(),
    }
}

pub fn send_dm_payload() -> JobPayload {
    JobPayload::SendDm {
        recipient_id: "u_2002".to_string(),
        message: "Hey! Your order question is answered in your inbox.".to_string(),
        media_url: None,
    }
}

pub async fn create_draft(pool: &SqlitePool, account_id: Uuid) -> ScheduledPost {
    ScheduledPost::create(
        pool,
        NewScheduledPost {
            account_id,
            caption: "New arrivals just dropped. Link in bio.".to_string(),
            media_url: Some("https://cdn.example.com/drop.jpg".to_string()),
            agent_modifications: vec![AgentModification {
                field: "caption".to_string(),
                original: "New arrivals.".to_string(),
                modified: "New arrivals just dropped. Link in bio.".to_string(),
                reason: "added call to action matching recent engagement data".to_string(),
            }],
            selection_factors: SelectionFactors {
                visual_quality: 88,
                engagement_potential: 74,
                brand_alignment: 91,
                recency: 60,
                uniqueness: 45,
            },
        },
    )
    .await
    .expect("create draft post")
}

/// Retry config with near-instant backoff so drain-mode dispatcher tests
/// finish quickly.
pub fn fast_retry_config() -> RetryConfig {
    RetryConfig {
        base_delay_ms: 1,
        max_delay_ms: 10,
        max_transient_retries: 3,
        max_rate_limit_retries: 3,
        max_unknown_retries: 2,
    }
}

pub fn fast_dispatcher_config(workers: usize) -> DispatcherConfig {
    DispatcherConfig {
        workers,
        batch_size: 5,
        poll_interval_ms: 20,
        poll_jitter_ms: 5,
        claim_timeout_ms: 60_000,
        request_timeout_ms: 5_000,
    }
}

/// Rewind a job's `scheduled_for` so a scheduled retry is due immediately.
pub async fn make_due(pool: &SqlitePool, job_id: Uuid) {
    let past: DateTime<Utc> = Utc::now() - chrono::Duration::seconds(5);
    sqlx::query("UPDATE outbound_jobs SET scheduled_for = $2 WHERE id = $1")
        .bind(job_id)
        .bind(past)
        .execute(pool)
        .await
        .expect("rewind scheduled_for");
}

/// Backdate a claim so the reaper sees it as abandoned.
pub async fn backdate_claim(pool: &SqlitePool, job_id: Uuid, age: Duration) {
    let stale: DateTime<Utc> = Utc::now() - chrono::Duration::from_std(age).unwrap();
    sqlx::query("UPDATE outbound_jobs SET claimed_at = $2 WHERE id = $1")
        .bind(job_id)
        .bind(stale)
        .execute(pool)
        .await
        .expect("backdate claim");
}

#[derive(Debug, Clone)]
pub enum Scripted {
    Response(ProviderResponse),
    TransportError(String),
}

/// Provider fake driven by a FIFO script; drains to a canned success so
/// retry flows can end in completion.
pub struct FakeProvider {
    script: Mutex<VecDeque<Scripted>>,
    pub calls: Mutex<Vec<Uuid>>,
}

impl FakeProvider {
    pub fn always_ok() -> Self {
        Self::with_script(Vec::new())
    }

    pub fn with_script(items: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(items.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn ok_response() -> ProviderResponse {
        ProviderResponse {
            http_status: 200,
            body: json!({ "id": "ext_1001" }),
            error_code: None,
            retry_after: None,
        }
    }

    pub fn error_response(
        http_status: u16,
        error_code: &str,
        retry_after: Option<Duration>,
    ) -> ProviderResponse {
        ProviderResponse {
            http_status,
            body: json!({
                "error": { "code": error_code, "message": "scripted failure" }
            }),
            error_code: Some(error_code.to_string()),
            retry_after,
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ProviderClient for FakeProvider {
    async fn execute(
        &self,
        _credential: &Credential,
        job: &Job,
    ) -> anyhow::Result<ProviderResponse> {
        self.calls.lock().unwrap().push(job.id);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Response(response)) => Ok(response),
            Some(Scripted::TransportError(message)) => Err(anyhow::anyhow!(message)),
            None => Ok(Self::ok_response()),
        }
    }
}

/// Credential resolver that always succeeds.
pub struct StaticCredentials;

#[async_trait]
impl CredentialResolver for StaticCredentials {
    async fn resolve(&self, account_id: Uuid) -> Result<Credential, CredentialError> {
        Ok(Credential {
            account_id,
            access_token: "test-token".to_string(),
            expires_at: None,
        })
    }
}

/// Credential resolver that reports the token revoked.
pub struct RevokedCredentials;

#[async_trait]
impl CredentialResolver for RevokedCredentials {
    async fn resolve(&self, account_id: Uuid) -> Result<Credential, CredentialError> {
        Err(CredentialError::Revoked(account_id))
    }
}
