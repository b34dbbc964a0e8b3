//! # Attribution Review State Machine
//!
//! Flat `pending → {approved, rejected}` over inferred revenue credits.
//! Decisions are idempotent: a reviewer double-submitting the same
//! decision from a slow UI is a no-op, not an error, and produces no
//! duplicate audit entry. The *opposite* decision on an already-decided
//! row is a structural error.
//!
//! Decisions never touch model weights. The periodic learning job reads
//! [`ReviewFeedback`] in aggregate and updates weights through
//! [`ModelWeights::upsert`](crate::models::ModelWeights::upsert) on its
//! own schedule.

use chrono::Utc;
use serde_json::json;
use sqlx::{FromRow, SqlitePool};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::audit;
use crate::error::{RelayError, Result};
use crate::models::attribution::{AttributionReview, ReviewStatus};

/// Outcome of a decision call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewDecision {
    /// The row transitioned and an audit entry was written.
    Applied,
    /// The row was already in the requested state; nothing changed.
    AlreadyDecided,
}

/// Aggregate of decided reviews, consumed by the external learning job.
#[derive(Debug, Clone, Default, FromRow)]
pub struct ReviewFeedback {
    pub pending: i64,
    pub approved: i64,
    pub rejected: i64,
    /// Of the rejected rows, how many had been fraud-flagged at scoring
    /// time. Used by the learning job for threshold tuning.
    pub rejected_fraud_flagged: i64,
}

#[derive(Clone)]
pub struct AttributionReviewQueue {
    pool: SqlitePool,
}

impl AttributionReviewQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Accept the inferred credit.
    pub async fn approve(
        &self,
        review_id: Uuid,
        reviewer: &str,
        notes: Option<&str>,
    ) -> Result<(AttributionReview, ReviewDecision)> {
        self.decide(review_id, ReviewStatus::Approved, reviewer, notes)
            .await
    }

    /// Reject the inferred credit.
    pub async fn reject(
        &self,
        review_id: Uuid,
        reviewer: &str,
        notes: Option<&str>,
    ) -> Result<(AttributionReview, ReviewDecision)> {
        self.decide(review_id, ReviewStatus::Rejected, reviewer, notes)
            .await
    }

    #[instrument(skip(self, notes), fields(review_id = %review_id, decision = %decision))]
    async fn decide(
        &self,
        review_id: Uuid,
        decision: ReviewStatus,
        reviewer: &str,
        notes: Option<&str>,
    ) -> Result<(AttributionReview, ReviewDecision)> {
        let now = Utc::now();
        let actor = format!("operator:{reviewer}");

        let mut tx = self.pool.begin().await?;

        let review = sqlx::query_as::<_, AttributionReview>(
            "SELECT * FROM attribution_reviews WHERE id = $1",
        )
        .bind(review_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(RelayError::NotFound {
            entity: "attribution_review",
            id: review_id,
        })?;

        if review.review_status == decision {
            debug!(%review_id, "duplicate decision, no-op");
            return Ok((review, ReviewDecision::AlreadyDecided));
        }

        if review.review_status != ReviewStatus::Pending {
            return Err(RelayError::InvalidTransition {
                entity: "attribution_review",
                id: review_id,
                from: review.review_status.to_string(),
                requested: decision.to_string(),
            });
        }

        let review = sqlx::query_as::<_, AttributionReview>(
            r#"
            UPDATE attribution_reviews
            SET review_status = $2, reviewed_by = $3, reviewed_at = $4,
                notes = $5, updated_at = $4
            WHERE id = $1 AND review_status = 'pending'
            RETURNING *
            "#,
        )
        .bind(review_id)
        .bind(decision)
        .bind(reviewer)
        .bind(now)
        .bind(notes)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(RelayError::InvalidTransition {
            entity: "attribution_review",
            id: review_id,
            from: review.review_status.to_string(),
            requested: decision.to_string(),
        })?;

        audit::record(
            &mut tx,
            audit::TABLE_ATTRIBUTION_REVIEWS,
            review_id,
            Some("pending"),
            &decision.to_string(),
            &actor,
            Some(json!({
                "fraud_risk": review.fraud_risk,
                "confidence": review.confidence,
            })),
            now,
        )
        .await?;

        tx.commit().await?;
        info!(%review_id, %decision, "attribution review decided");
        Ok((review, ReviewDecision::Applied))
    }

    /// Aggregate decided reviews for the learning job.
    pub async fn feedback_summary(&self) -> Result<ReviewFeedback> {
        let feedback = sqlx::query_as::<_, ReviewFeedback>(
            r#"
            SELECT
                COALESCE(SUM(review_status = 'pending'), 0)  AS pending,
                COALESCE(SUM(review_status = 'approved'), 0) AS approved,
                COALESCE(SUM(review_status = 'rejected'), 0) AS rejected,
                COALESCE(SUM(review_status = 'rejected' AND fraud_risk), 0)
                    AS rejected_fraud_flagged
            FROM attribution_reviews
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(feedback)
    }
}
