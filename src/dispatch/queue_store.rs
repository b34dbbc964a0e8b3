//! # Durable Job Queue Store
//!
//! All mutations of `outbound_jobs` live here, each one transactional and
//! paired with its audit entry. Claiming is an atomic conditional update:
//! a job moves `pending → processing` with a stamped owner and claim time,
//! so two workers can never hold the same job and a crashed worker's
//! claims become reclaimable after the claim timeout.
//!
//! Claim selection order is priority descending, then `scheduled_for`
//! ascending, then `created_at` ascending. Selection excludes jobs
//! scheduled in the future, accounts inside a rate-limit cool-down, and
//! accounts that already have a job in flight; one batch never carries two
//! jobs for the same account, which keeps reply ordering coherent per
//! account.

use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::{SqliteConnection, SqlitePool};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::audit;
use crate::dispatch::error_classifier::{is_policy_violation, ErrorCategory};
use crate::dispatch::retry::{RetryDecision, RetryPolicy};
use crate::error::{RelayError, Result};
use crate::models::agent_account::AgentAccount;
use crate::models::job::{Job, JobPayload, JobStatus, NewJob};
use crate::models::system_alert::{AlertType, SystemAlert};

/// Everything the store needs to know about one failed dispatch attempt.
#[derive(Debug, Clone)]
pub struct FailureDetails {
    /// Raw provider error, preserved verbatim for triage.
    pub raw_error: String,
    pub category: ErrorCategory,
    pub provider_code: Option<String>,
    pub retry_after: Option<Duration>,
}

/// Per-status job counts for the dashboard.
#[derive(Debug, Clone, Default)]
pub struct QueueHealth {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub dlq: i64,
    pub oldest_pending_age_secs: Option<i64>,
}

#[derive(Clone)]
pub struct QueueStore {
    pool: SqlitePool,
    retry_policy: RetryPolicy,
}

const CLAIM_SQL: &str = r#"
    UPDATE outbound_jobs
    SET status = 'processing',
        claim_owner = $1,
        claimed_at = $2,
        updated_at = $2,
        attempt_count = attempt_count + 1
    WHERE id IN (
        SELECT id FROM (
            SELECT j.id, j.priority, j.scheduled_for, j.created_at,
                   ROW_NUMBER() OVER (
                       PARTITION BY j.account_id
                       ORDER BY j.priority DESC, j.scheduled_for ASC, j.created_at ASC
                   ) AS account_rank
            FROM outbound_jobs j
            WHERE j.status = 'pending'
              AND j.scheduled_for <= $2
              AND NOT EXISTS (
                  SELECT 1 FROM account_cooldowns c
                  WHERE c.account_id = j.account_id AND c.cooldown_until > $2
              )
              AND NOT EXISTS (
                  SELECT 1 FROM outbound_jobs active
                  WHERE active.account_id = j.account_id
                    AND active.status = 'processing'
              )
        ) ranked
        WHERE account_rank = 1
        ORDER BY priority DESC, scheduled_for ASC, created_at ASC
        LIMIT $3
    )
    RETURNING *
"#;

impl QueueStore {
    pub fn new(pool: SqlitePool, retry_policy: RetryPolicy) -> Self {
        Self { pool, retry_policy }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Accept a job into the queue. Fails only on payload validation; a
    /// rejected payload is a producer bug and never becomes a row.
    #[instrument(skip(self, new_job), fields(account_id = %new_job.account_id))]
    pub async fn enqueue(&self, new_job: NewJob) -> Result<Job> {
        let mut tx = self.pool.begin().await?;
        let job = Self::enqueue_on(&mut tx, new_job, "producer", Utc::now()).await?;
        tx.commit().await?;

        debug!(job_id = %job.id, action = %job.action_type, "job enqueued");
        Ok(job)
    }

    /// Connection-level enqueue so producers with their own transaction
    /// (the approval state machine) can create the job atomically with
    /// their transition.
    pub(crate) async fn enqueue_on(
        conn: &mut SqliteConnection,
        new_job: NewJob,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<Job> {
        new_job.payload.validate()?;

        let scheduled_for = new_job.scheduled_for.unwrap_or(now);
        let job = sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO outbound_jobs
                (id, account_id, action_type, payload, priority, status,
                 attempt_count, scheduled_for, idempotency_key,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, 'pending', 0, $6, $7, $8, $8)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new_job.account_id)
        .bind(new_job.payload.action_type())
        .bind(sqlx::types::Json(&new_job.payload))
        .bind(new_job.priority)
        .bind(scheduled_for)
        .bind(Uuid::new_v4().to_string())
        .bind(now)
        .fetch_one(&mut *conn)
        .await?;

        audit::record(
            conn,
            audit::TABLE_OUTBOUND_JOBS,
            job.id,
            None,
            "pending",
            actor,
            Some(json!({
                "action_type": job.action_type.to_string(),
                "priority": job.priority as i32,
            })),
            now,
        )
        .await?;

        Ok(job)
    }

    /// Atomically claim up to `max_batch` due jobs for `worker_id`.
    ///
    /// Also flips any due `failed` jobs back to `pending` first (their
    /// scheduled retry time arrived), and moves the originating scheduled
    /// post to `publishing` for each claimed `publish_post` job; claim is
    /// the moment a publish attempt actually begins.
    #[instrument(skip(self), fields(worker_id = worker_id))]
    pub async fn claim_next(&self, worker_id: &str, max_batch: i64) -> Result<Vec<Job>> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let due: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE outbound_jobs
            SET status = 'pending', updated_at = $1
            WHERE status = 'failed' AND scheduled_for <= $1
            RETURNING id
            "#,
        )
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        for (job_id,) in &due {
            audit::record(
                &mut tx,
                audit::TABLE_OUTBOUND_JOBS,
                *job_id,
                Some("failed"),
                "pending",
                worker_id,
                Some(json!({ "reason": "retry_due" })),
                now,
            )
            .await?;
        }

        let mut jobs = sqlx::query_as::<_, Job>(CLAIM_SQL)
            .bind(worker_id)
            .bind(now)
            .bind(max_batch)
            .fetch_all(&mut *tx)
            .await?;

        // RETURNING does not guarantee order; restore the selection order.
        jobs.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.scheduled_for.cmp(&b.scheduled_for))
                .then(a.created_at.cmp(&b.created_at))
        });

        for job in &jobs {
            audit::record(
                &mut tx,
                audit::TABLE_OUTBOUND_JOBS,
                job.id,
                Some("pending"),
                "processing",
                worker_id,
                Some(json!({ "attempt": job.attempt_count })),
                now,
            )
            .await?;

            if let JobPayload::PublishPost { post_id, .. } = job.payload() {
                Self::mark_post_publishing(&mut tx, *post_id, job.id, worker_id, now).await?;
            }
        }

        tx.commit().await?;

        if !jobs.is_empty() {
            debug!(claimed = jobs.len(), "claimed jobs");
        }
        Ok(jobs)
    }

    async fn mark_post_publishing(
        conn: &mut SqliteConnection,
        post_id: Uuid,
        job_id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE scheduled_posts
            SET status = 'publishing', updated_at = $2
            WHERE id = $1 AND status = 'approved'
            "#,
        )
        .bind(post_id)
        .bind(now)
        .execute(&mut *conn)
        .await?
        .rows_affected();

        if updated == 1 {
            audit::record(
                conn,
                audit::TABLE_SCHEDULED_POSTS,
                post_id,
                Some("approved"),
                "publishing",
                worker_id,
                Some(json!({ "job_id": job_id })),
                now,
            )
            .await?;
        } else {
            warn!(%post_id, %job_id, "publish job claimed but post is not in approved state");
        }
        Ok(())
    }

    /// Terminal success. For `publish_post` jobs the originating post flips
    /// to `published` in the same transaction, so a worker crash can never
    /// leave a published post stuck in `publishing`.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn complete(
        &self,
        job_id: Uuid,
        external_id: Option<&str>,
        worker_id: &str,
    ) -> Result<Job> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        Self::processing_job(&mut tx, job_id, "complete").await?;

        let job = sqlx::query_as::<_, Job>(
            r#"
            UPDATE outbound_jobs
            SET status = 'completed', last_error = NULL, error_category = NULL,
                updated_at = $2
            WHERE id = $1 AND status = 'processing'
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        audit::record(
            &mut tx,
            audit::TABLE_OUTBOUND_JOBS,
            job_id,
            Some("processing"),
            "completed",
            worker_id,
            Some(json!({ "attempts": job.attempt_count, "external_id": external_id })),
            now,
        )
        .await?;

        if let JobPayload::PublishPost { post_id, .. } = job.payload() {
            let updated = sqlx::query(
                r#"
                UPDATE scheduled_posts
                SET status = 'published', published_at = $2,
                    external_post_id = $3, updated_at = $2
                WHERE id = $1 AND status = 'publishing'
                "#,
            )
            .bind(post_id)
            .bind(now)
            .bind(external_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if updated == 1 {
                audit::record(
                    &mut tx,
                    audit::TABLE_SCHEDULED_POSTS,
                    *post_id,
                    Some("publishing"),
                    "published",
                    worker_id,
                    Some(json!({ "job_id": job_id, "external_post_id": external_id })),
                    now,
                )
                .await?;
            } else {
                warn!(%post_id, %job_id, "publish job completed but post is not in publishing state");
            }
        }

        tx.commit().await?;
        info!(%job_id, "job completed");
        Ok(job)
    }

    /// Record a failed dispatch attempt and apply retry-or-DLQ policy, all
    /// in one transaction with the audit entry.
    ///
    /// Retryable failures park the job in `failed` with a monotonically
    /// non-decreasing `scheduled_for`; a later claim pass releases it back
    /// to `pending` once due. Dead-lettering raises the operator alert and,
    /// for auth failures, disconnects the account atomically.
    #[instrument(skip(self, details), fields(job_id = %job_id, category = %details.category))]
    pub async fn fail(
        &self,
        job_id: Uuid,
        details: FailureDetails,
        worker_id: &str,
    ) -> Result<Job> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let job = Self::processing_job(&mut tx, job_id, "fail").await?;

        let decision = self.retry_policy.decide(
            details.category,
            job.attempt_count as u32,
            details.retry_after,
        );

        let job = match decision {
            RetryDecision::Retry { delay } => {
                self.record_retry(&mut tx, &job, &details, delay, worker_id, now)
                    .await?
            }
            RetryDecision::DeadLetter => {
                self.record_dead_letter(&mut tx, &job, &details, worker_id, now)
                    .await?
            }
        };

        tx.commit().await?;
        Ok(job)
    }

    async fn record_retry(
        &self,
        tx: &mut SqliteConnection,
        job: &Job,
        details: &FailureDetails,
        delay: Duration,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Job> {
        let delay = chrono::Duration::from_std(delay)
            .map_err(|e| RelayError::validation(format!("retry delay out of range: {e}")))?;
        // scheduled_for never decreases across retries of the same job
        let next_attempt_at = (now + delay).max(job.scheduled_for);

        let updated = sqlx::query_as::<_, Job>(
            r#"
            UPDATE outbound_jobs
            SET status = 'failed', scheduled_for = $2, last_error = $3,
                error_category = $4, claim_owner = NULL, claimed_at = NULL,
                updated_at = $5
            WHERE id = $1 AND status = 'processing'
            RETURNING *
            "#,
        )
        .bind(job.id)
        .bind(next_attempt_at)
        .bind(&details.raw_error)
        .bind(details.category)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        audit::record(
            tx,
            audit::TABLE_OUTBOUND_JOBS,
            job.id,
            Some("processing"),
            "failed",
            worker_id,
            Some(json!({
                "error_category": details.category.to_string(),
                "error": details.raw_error,
                "attempt": job.attempt_count,
                "next_attempt_at": next_attempt_at,
            })),
            now,
        )
        .await?;

        if details.category == ErrorCategory::RateLimit {
            Self::upsert_cooldown(tx, job.account_id, next_attempt_at, now).await?;
        }

        debug!(job_id = %job.id, %next_attempt_at, "retry scheduled");
        Ok(updated)
    }

    async fn record_dead_letter(
        &self,
        tx: &mut SqliteConnection,
        job: &Job,
        details: &FailureDetails,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Job> {
        let updated = sqlx::query_as::<_, Job>(
            r#"
            UPDATE outbound_jobs
            SET status = 'dlq', last_error = $2, error_category = $3,
                updated_at = $4
            WHERE id = $1 AND status = 'processing'
            RETURNING *
            "#,
        )
        .bind(job.id)
        .bind(&details.raw_error)
        .bind(details.category)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        let alert_type = match details.category {
            ErrorCategory::AuthFailure => AlertType::AuthFailure,
            ErrorCategory::RateLimit => AlertType::RateLimit,
            ErrorCategory::Permanent => {
                if is_policy_violation(details.provider_code.as_deref()) {
                    AlertType::ContentViolation
                } else {
                    AlertType::SyncFailure
                }
            }
            ErrorCategory::Transient | ErrorCategory::Unknown => AlertType::SyncFailure,
        };

        let alert_id = SystemAlert::create(
            tx,
            Some(job.account_id),
            alert_type,
            &format!(
                "{} job dead-lettered after {} attempt(s): {}",
                job.action_type, job.attempt_count, details.raw_error
            ),
            audit::TABLE_OUTBOUND_JOBS,
            job.id,
            now,
        )
        .await?;

        if details.category == ErrorCategory::AuthFailure {
            // Must land in the same transaction as the dlq flip: the
            // account can never stay claimable against a dead credential.
            AgentAccount::set_disconnected(tx, job.account_id, now).await?;
        }

        if details.category == ErrorCategory::RateLimit {
            let delay = details
                .retry_after
                .unwrap_or_else(|| self.retry_policy.fallback_delay(job.attempt_count as u32));
            let until = now
                + chrono::Duration::from_std(delay)
                    .unwrap_or_else(|_| chrono::Duration::seconds(60));
            Self::upsert_cooldown(tx, job.account_id, until, now).await?;
        }

        if let JobPayload::PublishPost { post_id, .. } = job.payload() {
            let post_updated = sqlx::query(
                r#"
                UPDATE scheduled_posts
                SET status = 'failed', failure_reason = $2, updated_at = $3
                WHERE id = $1 AND status = 'publishing'
                "#,
            )
            .bind(post_id)
            .bind(&details.raw_error)
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if post_updated == 1 {
                audit::record(
                    tx,
                    audit::TABLE_SCHEDULED_POSTS,
                    *post_id,
                    Some("publishing"),
                    "failed",
                    worker_id,
                    Some(json!({ "job_id": job.id, "error": details.raw_error })),
                    now,
                )
                .await?;
            }
        }

        audit::record(
            tx,
            audit::TABLE_OUTBOUND_JOBS,
            job.id,
            Some("processing"),
            "dlq",
            worker_id,
            Some(json!({
                "error_category": details.category.to_string(),
                "error": details.raw_error,
                "attempts": job.attempt_count,
                "alert_id": alert_id,
            })),
            now,
        )
        .await?;

        warn!(job_id = %job.id, category = %details.category, "job dead-lettered");
        Ok(updated)
    }

    /// Cancel a job that has not been claimed yet. Once a job is
    /// `processing` it runs to a terminal state; in-flight provider calls
    /// are never killed mid-request.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn cancel(&self, job_id: Uuid, actor: &str) -> Result<Job> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let job = sqlx::query_as::<_, Job>("SELECT * FROM outbound_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(RelayError::NotFound {
                entity: "job",
                id: job_id,
            })?;

        if job.status != JobStatus::Pending {
            return Err(RelayError::InvalidTransition {
                entity: "job",
                id: job_id,
                from: job.status.to_string(),
                requested: "cancelled".to_string(),
            });
        }

        let deleted = sqlx::query("DELETE FROM outbound_jobs WHERE id = $1 AND status = 'pending'")
            .bind(job_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if deleted != 1 {
            return Err(RelayError::InvalidTransition {
                entity: "job",
                id: job_id,
                from: "unknown".to_string(),
                requested: "cancelled".to_string(),
            });
        }

        audit::record(
            &mut tx,
            audit::TABLE_OUTBOUND_JOBS,
            job_id,
            Some("pending"),
            "cancelled",
            actor,
            Some(json!({ "action_type": job.action_type.to_string() })),
            now,
        )
        .await?;

        tx.commit().await?;
        info!(%job_id, "job cancelled");
        Ok(job)
    }

    /// Operator override: return a dead-lettered job to the queue with a
    /// fresh attempt budget. Never automatic.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn requeue(&self, job_id: Uuid, actor: &str) -> Result<Job> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let job = sqlx::query_as::<_, Job>("SELECT * FROM outbound_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(RelayError::NotFound {
                entity: "job",
                id: job_id,
            })?;

        if job.status != JobStatus::Dlq {
            return Err(RelayError::InvalidTransition {
                entity: "job",
                id: job_id,
                from: job.status.to_string(),
                requested: "pending".to_string(),
            });
        }

        let job = sqlx::query_as::<_, Job>(
            r#"
            UPDATE outbound_jobs
            SET status = 'pending', attempt_count = 0, scheduled_for = $2,
                claim_owner = NULL, claimed_at = NULL, updated_at = $2
            WHERE id = $1 AND status = 'dlq'
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        audit::record(
            &mut tx,
            audit::TABLE_OUTBOUND_JOBS,
            job_id,
            Some("dlq"),
            "pending",
            actor,
            Some(json!({ "reason": "manual_requeue" })),
            now,
        )
        .await?;

        tx.commit().await?;
        info!(%job_id, "job requeued from dlq");
        Ok(job)
    }

    /// Return abandoned claims to `pending`. A claim with no terminal
    /// transition after `claim_timeout` means its worker died; the attempt
    /// it consumed stays counted.
    #[instrument(skip(self))]
    pub async fn reap_stale_claims(&self, claim_timeout: Duration) -> Result<u64> {
        let now = Utc::now();
        let cutoff = now
            - chrono::Duration::from_std(claim_timeout)
                .map_err(|e| RelayError::validation(format!("claim timeout out of range: {e}")))?;

        let mut tx = self.pool.begin().await?;

        let stale: Vec<(Uuid, Option<String>)> = sqlx::query_as(
            r#"
            SELECT id, claim_owner FROM outbound_jobs
            WHERE status = 'processing' AND claimed_at <= $1
            "#,
        )
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await?;

        let mut reaped = 0u64;
        for (job_id, previous_owner) in stale {
            let updated = sqlx::query(
                r#"
                UPDATE outbound_jobs
                SET status = 'pending', claim_owner = NULL, claimed_at = NULL,
                    updated_at = $2
                WHERE id = $1 AND status = 'processing' AND claimed_at <= $3
                "#,
            )
            .bind(job_id)
            .bind(now)
            .bind(cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if updated == 1 {
                audit::record(
                    &mut tx,
                    audit::TABLE_OUTBOUND_JOBS,
                    job_id,
                    Some("processing"),
                    "pending",
                    "reaper",
                    Some(json!({
                        "reason": "claim_expired",
                        "previous_owner": previous_owner,
                    })),
                    now,
                )
                .await?;
                reaped += 1;
            }
        }

        tx.commit().await?;

        if reaped > 0 {
            warn!(reaped, "reaped stale claims");
        }
        Ok(reaped)
    }

    /// Per-status counts plus the age of the oldest waiting job.
    pub async fn queue_health(&self) -> Result<QueueHealth> {
        let counts: Vec<(JobStatus, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM outbound_jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut health = QueueHealth::default();
        for (status, count) in counts {
            match status {
                JobStatus::Pending => health.pending = count,
                JobStatus::Processing => health.processing = count,
                JobStatus::Completed => health.completed = count,
                JobStatus::Failed => health.failed = count,
                JobStatus::Dlq => health.dlq = count,
            }
        }

        let (oldest,): (Option<DateTime<Utc>>,) = sqlx::query_as(
            "SELECT MIN(created_at) FROM outbound_jobs WHERE status = 'pending'",
        )
        .fetch_one(&self.pool)
        .await?;

        health.oldest_pending_age_secs =
            oldest.map(|created| (Utc::now() - created).num_seconds().max(0));

        Ok(health)
    }

    /// Jobs that still have work ahead of them (used for drain detection).
    pub async fn active_backlog(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM outbound_jobs
            WHERE status IN ('pending', 'failed', 'processing')
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn processing_job(
        conn: &mut SqliteConnection,
        job_id: Uuid,
        operation: &str,
    ) -> Result<Job> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM outbound_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or(RelayError::NotFound {
                entity: "job",
                id: job_id,
            })?;

        if job.status != JobStatus::Processing {
            return Err(RelayError::InvalidTransition {
                entity: "job",
                id: job_id,
                from: job.status.to_string(),
                requested: operation.to_string(),
            });
        }
        Ok(job)
    }

    async fn upsert_cooldown(
        conn: &mut SqliteConnection,
        account_id: Uuid,
        until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO account_cooldowns (account_id, cooldown_until, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (account_id) DO UPDATE SET
                cooldown_until = excluded.cooldown_until,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(account_id)
        .bind(until)
        .bind(now)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}
