//! # Content Approval State Machine
//!
//! `pending → {approved, rejected}`; `approved → publishing → {published,
//! failed}`. This module owns the first fork; everything past `approved`
//! belongs to the dispatcher via the `publish_post` job created here.
//!
//! Approval does not start the publish attempt. The post only moves to
//! `publishing` when a worker claims the job, so a backlog of approvals
//! implies no publishing-order guarantee beyond the queue's own ordering.

use chrono::Utc;
use serde_json::json;
use sqlx::SqlitePool;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::audit;
use crate::dispatch::queue_store::QueueStore;
use crate::error::{RelayError, Result};
use crate::models::job::{Job, JobPayload, JobPriority, NewJob};
use crate::models::scheduled_post::{PostStatus, ScheduledPost};

#[derive(Clone)]
pub struct ContentApproval {
    pool: SqlitePool,
}

impl ContentApproval {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Approve a pending draft and enqueue its `publish_post` job at
    /// normal priority, atomically. Returns the updated post and the
    /// created job.
    #[instrument(skip(self), fields(post_id = %post_id, reviewer = reviewer))]
    pub async fn approve(&self, post_id: Uuid, reviewer: &str) -> Result<(ScheduledPost, Job)> {
        let now = Utc::now();
        let actor = format!("operator:{reviewer}");

        let mut tx = self.pool.begin().await?;

        let post = Self::post_in_state(&mut tx, post_id, PostStatus::Approved).await?;

        let post = sqlx::query_as::<_, ScheduledPost>(
            r#"
            UPDATE scheduled_posts
            SET status = 'approved', reviewed_by = $2, reviewed_at = $3,
                updated_at = $3
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(post.id)
        .bind(reviewer)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(RelayError::InvalidTransition {
            entity: "scheduled_post",
            id: post_id,
            from: post.status.to_string(),
            requested: "approved".to_string(),
        })?;

        let job = QueueStore::enqueue_on(
            &mut tx,
            NewJob {
                account_id: post.account_id,
                payload: JobPayload::PublishPost {
                    post_id: post.id,
                    caption: post.caption.clone(),
                    media_url: post.media_url.clone(),
                },
                priority: JobPriority::Normal,
                scheduled_for: None,
            },
            &actor,
            now,
        )
        .await?;

        audit::record(
            &mut tx,
            audit::TABLE_SCHEDULED_POSTS,
            post.id,
            Some("pending"),
            "approved",
            &actor,
            Some(json!({ "job_id": job.id })),
            now,
        )
        .await?;

        tx.commit().await?;
        info!(%post_id, job_id = %job.id, "post approved and publish job enqueued");
        Ok((post, job))
    }

    /// Reject a pending draft. Terminal; no job is created.
    #[instrument(skip(self), fields(post_id = %post_id, reviewer = reviewer))]
    pub async fn reject(
        &self,
        post_id: Uuid,
        reviewer: &str,
        reason: Option<&str>,
    ) -> Result<ScheduledPost> {
        let now = Utc::now();
        let actor = format!("operator:{reviewer}");

        let mut tx = self.pool.begin().await?;

        let post = Self::post_in_state(&mut tx, post_id, PostStatus::Rejected).await?;

        let post = sqlx::query_as::<_, ScheduledPost>(
            r#"
            UPDATE scheduled_posts
            SET status = 'rejected', reviewed_by = $2, reviewed_at = $3,
                failure_reason = $4, updated_at = $3
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(post.id)
        .bind(reviewer)
        .bind(now)
        .bind(reason)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(RelayError::InvalidTransition {
            entity: "scheduled_post",
            id: post_id,
            from: post.status.to_string(),
            requested: "rejected".to_string(),
        })?;

        audit::record(
            &mut tx,
            audit::TABLE_SCHEDULED_POSTS,
            post.id,
            Some("pending"),
            "rejected",
            &actor,
            reason.map(|r| json!({ "reason": r })),
            now,
        )
        .await?;

        tx.commit().await?;
        info!(%post_id, "post rejected");
        Ok(post)
    }

    /// Fetch the post and verify the requested transition is legal from
    /// its current state. Illegal requests are structural errors.
    async fn post_in_state(
        conn: &mut sqlx::SqliteConnection,
        post_id: Uuid,
        requested: PostStatus,
    ) -> Result<ScheduledPost> {
        let post = sqlx::query_as::<_, ScheduledPost>(
            "SELECT * FROM scheduled_posts WHERE id = $1",
        )
        .bind(post_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(RelayError::NotFound {
            entity: "scheduled_post",
            id: post_id,
        })?;

        if !PostStatus::can_transition(post.status, requested) {
            return Err(RelayError::InvalidTransition {
                entity: "scheduled_post",
                id: post_id,
                from: post.status.to_string(),
                requested: requested.to_string(),
            });
        }
        Ok(post)
    }
}
