//! # Sales Attribution Models
//!
//! A `SalesAttribution` is the scoring collaborator's inference that agent
//! activity contributed to an order, scored under four attribution models.
//! Low-confidence or fraud-flagged inferences additionally get an
//! `AttributionReview` row, which is the human checkpoint this core owns.
//!
//! Review decisions never touch model weights. The periodic learning job
//! reads decided reviews in aggregate and UPSERTs
//! `attribution_model_weights` through [`ModelWeights::upsert`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{FromRow, SqlitePool};
use std::fmt;
use uuid::Uuid;

use crate::error::{RelayError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

impl std::str::FromStr for ReviewStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            _ => Err(format!("invalid review status: {s}")),
        }
    }
}

/// One event on the customer journey leading to the attributed order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Touchpoint {
    pub occurred_at: DateTime<Utc>,
    pub channel: String,
    pub interaction: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SalesAttribution {
    pub id: Uuid,
    pub account_id: Uuid,
    pub order_id: String,
    pub revenue_cents: i64,
    pub currency: String,
    pub first_touch: f64,
    pub last_touch: f64,
    pub linear: f64,
    pub time_decay: f64,
    pub journey_timeline: Json<Vec<Touchpoint>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSalesAttribution {
    pub account_id: Uuid,
    pub order_id: String,
    pub revenue_cents: i64,
    pub currency: String,
    pub first_touch: f64,
    pub last_touch: f64,
    pub linear: f64,
    pub time_decay: f64,
    pub journey_timeline: Vec<Touchpoint>,
}

impl SalesAttribution {
    /// Record an inference. Called by the webhook ingestion layer; this core
    /// does not decide *whether* an inference needs review.
    pub async fn create(
        pool: &SqlitePool,
        new_attribution: NewSalesAttribution,
    ) -> Result<SalesAttribution> {
        if new_attribution.revenue_cents < 0 {
            return Err(RelayError::validation("revenue_cents must not be negative"));
        }

        let attribution = sqlx::query_as::<_, SalesAttribution>(
            r#"
            INSERT INTO sales_attributions
                (id, account_id, order_id, revenue_cents, currency,
                 first_touch, last_touch, linear, time_decay,
                 journey_timeline, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new_attribution.account_id)
        .bind(&new_attribution.order_id)
        .bind(new_attribution.revenue_cents)
        .bind(&new_attribution.currency)
        .bind(new_attribution.first_touch)
        .bind(new_attribution.last_touch)
        .bind(new_attribution.linear)
        .bind(new_attribution.time_decay)
        .bind(Json(&new_attribution.journey_timeline))
        .bind(Utc::now())
        .fetch_one(pool)
        .await?;
        Ok(attribution)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<SalesAttribution>> {
        let attribution = sqlx::query_as::<_, SalesAttribution>(
            "SELECT * FROM sales_attributions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(attribution)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AttributionReview {
    pub id: Uuid,
    pub attribution_id: Uuid,
    pub review_status: ReviewStatus,
    pub fraud_risk: bool,
    /// Combined weighted confidence at scoring time, 0.0-1.0.
    pub confidence: f64,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AttributionReview {
    /// Open a pending review for an attribution. Entry conditions
    /// (confidence threshold, fraud flag) are the scoring collaborator's
    /// call; this core's contract starts once the row exists.
    pub async fn open(
        pool: &SqlitePool,
        attribution_id: Uuid,
        confidence: f64,
        fraud_risk: bool,
    ) -> Result<AttributionReview> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(RelayError::validation(format!(
                "confidence must be within 0.0-1.0, got {confidence}"
            )));
        }

        let now = Utc::now();
        let review = sqlx::query_as::<_, AttributionReview>(
            r#"
            INSERT INTO attribution_reviews
                (id, attribution_id, review_status, fraud_risk, confidence,
                 created_at, updated_at)
            VALUES ($1, $2, 'pending', $3, $4, $5, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(attribution_id)
        .bind(fraud_risk)
        .bind(confidence)
        .bind(now)
        .fetch_one(pool)
        .await?;
        Ok(review)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<AttributionReview>> {
        let review = sqlx::query_as::<_, AttributionReview>(
            "SELECT * FROM attribution_reviews WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(review)
    }
}

/// The four model weights, externally computed. Non-negative is enforced;
/// summing to 1.0 is convention, warned about but not rejected, so an
/// in-progress learning run cannot brick the review queue.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ModelWeights {
    pub first_touch: f64,
    pub last_touch: f64,
    pub linear: f64,
    pub time_decay: f64,
}

impl ModelWeights {
    pub fn sum(&self) -> f64 {
        self.first_touch + self.last_touch + self.linear + self.time_decay
    }

    /// UPSERT the single weights row. Only the periodic learning job calls
    /// this; the review flow has no path here.
    pub async fn upsert(&self, pool: &SqlitePool) -> Result<()> {
        for (name, value) in [
            ("first_touch", self.first_touch),
            ("last_touch", self.last_touch),
            ("linear", self.linear),
            ("time_decay", self.time_decay),
        ] {
            if value < 0.0 || !value.is_finite() {
                return Err(RelayError::validation(format!(
                    "model weight {name} must be a non-negative finite number, got {value}"
                )));
            }
        }

        let sum = self.sum();
        if (sum - 1.0).abs() > 1e-6 {
            tracing::warn!(sum, "attribution model weights do not sum to 1.0");
        }

        sqlx::query(
            r#"
            INSERT INTO attribution_model_weights
                (id, first_touch, last_touch, linear, time_decay, updated_at)
            VALUES (1, $1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                first_touch = excluded.first_touch,
                last_touch = excluded.last_touch,
                linear = excluded.linear,
                time_decay = excluded.time_decay,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(self.first_touch)
        .bind(self.last_touch)
        .bind(self.linear)
        .bind(self.time_decay)
        .bind(Utc::now())
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn current(pool: &SqlitePool) -> Result<Option<ModelWeights>> {
        let weights = sqlx::query_as::<_, ModelWeights>(
            r#"
            SELECT first_touch, last_touch, linear, time_decay
            FROM attribution_model_weights
            WHERE id = 1
            "#,
        )
        .fetch_optional(pool)
        .await?;
        Ok(weights)
    }
}
