//! # Outbound Job Model
//!
//! A job is one unit of outbound work against the provider API: a reply, a
//! DM, a publish, or a repost. Jobs are produced by webhook handlers, the
//! approval state machine, and agent decisions; only the dispatcher
//! consumes them.
//!
//! ## Lifecycle
//!
//! ```text
//! pending ──claim──▶ processing ──▶ completed
//!    ▲                   │
//!    │ retry due         ├──▶ failed (awaiting scheduled retry)
//!    └───────────────────┘
//!                        └──▶ dlq   (retries exhausted / unretryable)
//! ```
//!
//! `attempt_count` increments exactly once per dispatch attempt, at claim
//! time. `scheduled_for` never decreases across retries of the same job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{FromRow, SqlitePool};
use std::fmt;
use uuid::Uuid;

use crate::dispatch::ErrorCategory;
use crate::error::{RelayError, Result};

/// The five outbound action kinds the provider API supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ActionType {
    ReplyComment,
    ReplyDm,
    SendDm,
    PublishPost,
    RepostUgc,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReplyComment => write!(f, "reply_comment"),
            Self::ReplyDm => write!(f, "reply_dm"),
            Self::SendDm => write!(f, "send_dm"),
            Self::PublishPost => write!(f, "publish_post"),
            Self::RepostUgc => write!(f, "repost_ugc"),
        }
    }
}

/// High bypasses the normal-priority backlog at claim time, but never an
/// account's active rate-limit cool-down.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum JobPriority {
    Normal = 1,
    High = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Dlq,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Dlq)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Dlq => write!(f, "dlq"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "dlq" => Ok(Self::Dlq),
            _ => Err(format!("invalid job status: {s}")),
        }
    }
}

/// Action-specific parameters, one variant per [`ActionType`]. The
/// dispatcher pattern-matches on this; there is no optional-field probing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum JobPayload {
    ReplyComment {
        comment_id: String,
        message: String,
    },
    ReplyDm {
        thread_id: String,
        message: String,
    },
    SendDm {
        recipient_id: String,
        message: String,
        media_url: Option<String>,
    },
    PublishPost {
        post_id: Uuid,
        caption: String,
        media_url: Option<String>,
    },
    RepostUgc {
        source_post_id: String,
        credit_handle: String,
    },
}

/// Provider-enforced length ceilings.
const MAX_COMMENT_LEN: usize = 2_200;
const MAX_DM_LEN: usize = 1_000;
const MAX_CAPTION_LEN: usize = 2_200;

impl JobPayload {
    pub fn action_type(&self) -> ActionType {
        match self {
            Self::ReplyComment { .. } => ActionType::ReplyComment,
            Self::ReplyDm { .. } => ActionType::ReplyDm,
            Self::SendDm { .. } => ActionType::SendDm,
            Self::PublishPost { .. } => ActionType::PublishPost,
            Self::RepostUgc { .. } => ActionType::RepostUgc,
        }
    }

    /// Structural validation applied before a job is accepted into the
    /// queue. Anything rejected here is a producer bug, not a runtime
    /// condition to retry.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::ReplyComment {
                comment_id,
                message,
            } => {
                require_id("comment_id", comment_id)?;
                require_text("message", message, MAX_COMMENT_LEN)?;
            }
            Self::ReplyDm { thread_id, message } => {
                require_id("thread_id", thread_id)?;
                require_text("message", message, MAX_DM_LEN)?;
            }
            Self::SendDm {
                recipient_id,
                message,
                media_url,
            } => {
                require_id("recipient_id", recipient_id)?;
                require_text("message", message, MAX_DM_LEN)?;
                if let Some(url) = media_url {
                    require_https("media_url", url)?;
                }
            }
            Self::PublishPost {
                caption, media_url, ..
            } => {
                require_text("caption", caption, MAX_CAPTION_LEN)?;
                if let Some(url) = media_url {
                    require_https("media_url", url)?;
                }
            }
            Self::RepostUgc {
                source_post_id,
                credit_handle,
            } => {
                require_id("source_post_id", source_post_id)?;
                require_id("credit_handle", credit_handle)?;
            }
        }
        Ok(())
    }
}

fn require_id(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(RelayError::validation(format!("{field} must not be empty")));
    }
    Ok(())
}

fn require_text(field: &str, value: &str, max_len: usize) -> Result<()> {
    if value.trim().is_empty() {
        return Err(RelayError::validation(format!("{field} must not be empty")));
    }
    if value.chars().count() > max_len {
        return Err(RelayError::validation(format!(
            "{field} exceeds {max_len} characters"
        )));
    }
    Ok(())
}

fn require_https(field: &str, value: &str) -> Result<()> {
    if !value.starts_with("https://") {
        return Err(RelayError::validation(format!("{field} must be an https URL")));
    }
    Ok(())
}

/// A persisted outbound job.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Job {
    pub id: Uuid,
    pub account_id: Uuid,
    pub action_type: ActionType,
    pub payload: Json<JobPayload>,
    pub priority: JobPriority,
    pub status: JobStatus,
    pub attempt_count: i64,
    pub scheduled_for: DateTime<Utc>,
    pub claim_owner: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub error_category: Option<ErrorCategory>,
    /// Sent with every provider call so an at-least-once redelivery can be
    /// deduplicated provider-side.
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn payload(&self) -> &JobPayload {
        &self.payload.0
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM outbound_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(job)
    }
}

/// Parameters for enqueueing a new job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub account_id: Uuid,
    pub payload: JobPayload,
    pub priority: JobPriority,
    /// Earliest dispatch time; `None` means immediately.
    pub scheduled_for: Option<DateTime<Utc>>,
}

impl NewJob {
    pub fn immediate(account_id: Uuid, payload: JobPayload) -> Self {
        Self {
            account_id,
            payload,
            priority: JobPriority::Normal,
            scheduled_for: None,
        }
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }
}
