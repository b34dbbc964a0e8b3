//! # Scheduled Post Model
//!
//! Agent-authored content waiting for human (or delegated-agent) sign-off.
//! The pipeline is linear: `pending → approved → publishing → published`,
//! with `rejected` and `failed` as terminal exits. A failed post is never
//! retried in place; the agent re-creates a fresh draft.
//!
//! Only the dispatcher, via the `publish_post` job generated at approval,
//! may move a post beyond `approved`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{FromRow, SqlitePool};
use std::fmt;
use uuid::Uuid;

use crate::audit;
use crate::error::{RelayError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum PostStatus {
    Pending,
    Approved,
    Rejected,
    Publishing,
    Published,
    Failed,
}

impl PostStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Published | Self::Failed)
    }

    /// The full legal transition relation. Everything not listed here is a
    /// structural error, rejected synchronously.
    pub fn can_transition(from: PostStatus, to: PostStatus) -> bool {
        matches!(
            (from, to),
            (Self::Pending, Self::Approved)
                | (Self::Pending, Self::Rejected)
                | (Self::Approved, Self::Publishing)
                | (Self::Publishing, Self::Published)
                | (Self::Publishing, Self::Failed)
        )
    }
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
            Self::Publishing => write!(f, "publishing"),
            Self::Published => write!(f, "published"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for PostStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "publishing" => Ok(Self::Publishing),
            "published" => Ok(Self::Published),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid post status: {s}")),
        }
    }
}

/// One automated edit the agent made to the content template. The reason is
/// mandatory; an unexplained edit is rejected at draft creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentModification {
    pub field: String,
    pub original: String,
    pub modified: String,
    pub reason: String,
}

/// 0-100 scored dimensions shown to the operator during review. Never used
/// by dispatch logic.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SelectionFactors {
    pub visual_quality: u8,
    pub engagement_potential: u8,
    pub brand_alignment: u8,
    pub recency: u8,
    pub uniqueness: u8,
}

impl SelectionFactors {
    fn validate(&self) -> Result<()> {
        for (name, score) in [
            ("visual_quality", self.visual_quality),
            ("engagement_potential", self.engagement_potential),
            ("brand_alignment", self.brand_alignment),
            ("recency", self.recency),
            ("uniqueness", self.uniqueness),
        ] {
            if score > 100 {
                return Err(RelayError::validation(format!(
                    "selection factor {name} must be within 0-100, got {score}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ScheduledPost {
    pub id: Uuid,
    pub account_id: Uuid,
    pub caption: String,
    pub media_url: Option<String>,
    pub agent_modifications: Json<Vec<AgentModification>>,
    pub selection_factors: Json<SelectionFactors>,
    pub status: PostStatus,
    pub external_post_id: Option<String>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewScheduledPost {
    pub account_id: Uuid,
    pub caption: String,
    pub media_url: Option<String>,
    pub agent_modifications: Vec<AgentModification>,
    pub selection_factors: SelectionFactors,
}

impl ScheduledPost {
    /// Create a draft in `pending`. Drafting itself is a producer concern
    /// (the webhook / content-selection layer calls this); everything from
    /// `pending` onward belongs to the approval state machine.
    pub async fn create(pool: &SqlitePool, new_post: NewScheduledPost) -> Result<ScheduledPost> {
        if new_post.caption.trim().is_empty() {
            return Err(RelayError::validation("caption must not be empty"));
        }
        new_post.selection_factors.validate()?;
        for modification in &new_post.agent_modifications {
            if modification.reason.trim().is_empty() {
                return Err(RelayError::validation(format!(
                    "agent modification of '{}' is missing a reason",
                    modification.field
                )));
            }
        }

        let now = Utc::now();
        let id = Uuid::new_v4();

        let mut tx = pool.begin().await?;
        let post = sqlx::query_as::<_, ScheduledPost>(
            r#"
            INSERT INTO scheduled_posts
                (id, account_id, caption, media_url, agent_modifications,
                 selection_factors, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7, $7)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(new_post.account_id)
        .bind(&new_post.caption)
        .bind(&new_post.media_url)
        .bind(Json(&new_post.agent_modifications))
        .bind(Json(&new_post.selection_factors))
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        audit::record(
            &mut tx,
            audit::TABLE_SCHEDULED_POSTS,
            id,
            None,
            "pending",
            "producer",
            None,
            now,
        )
        .await?;
        tx.commit().await?;

        Ok(post)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<ScheduledPost>> {
        let post = sqlx::query_as::<_, ScheduledPost>(
            "SELECT * FROM scheduled_posts WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(post)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ALL_STATUSES: [PostStatus; 6] = [
        PostStatus::Pending,
        PostStatus::Approved,
        PostStatus::Rejected,
        PostStatus::Publishing,
        PostStatus::Published,
        PostStatus::Failed,
    ];

    #[test]
    fn legal_transitions() {
        assert!(PostStatus::can_transition(
            PostStatus::Pending,
            PostStatus::Approved
        ));
        assert!(PostStatus::can_transition(
            PostStatus::Approved,
            PostStatus::Publishing
        ));
        assert!(PostStatus::can_transition(
            PostStatus::Publishing,
            PostStatus::Published
        ));
    }

    #[test]
    fn illegal_transitions() {
        // No skipping the publishing stage, no resurrecting terminals.
        assert!(!PostStatus::can_transition(
            PostStatus::Pending,
            PostStatus::Published
        ));
        assert!(!PostStatus::can_transition(
            PostStatus::Approved,
            PostStatus::Published
        ));
        assert!(!PostStatus::can_transition(
            PostStatus::Rejected,
            PostStatus::Approved
        ));
        assert!(!PostStatus::can_transition(
            PostStatus::Failed,
            PostStatus::Publishing
        ));
    }

    fn status_strategy() -> impl Strategy<Value = PostStatus> {
        prop::sample::select(ALL_STATUSES.to_vec())
    }

    proptest! {
        /// Over random transition sequences (legal steps applied, illegal
        /// ones rejected), a post can only arrive at `published` through
        /// `approved` then `publishing`, in that order.
        #[test]
        fn published_only_via_approved_then_publishing(
            requests in prop::collection::vec(status_strategy(), 1..40)
        ) {
            let mut state = PostStatus::Pending;
            let mut history = vec![state];

            for requested in requests {
                if PostStatus::can_transition(state, requested) {
                    state = requested;
                    history.push(state);
                }
            }

            if history.contains(&PostStatus::Published) {
                let approved = history
                    .iter()
                    .position(|s| *s == PostStatus::Approved)
                    .expect("published implies approved");
                let publishing = history
                    .iter()
                    .position(|s| *s == PostStatus::Publishing)
                    .expect("published implies publishing");
                let published = history
                    .iter()
                    .position(|s| *s == PostStatus::Published)
                    .unwrap();
                prop_assert!(approved < publishing && publishing < published);
            }
        }

        /// Terminal states admit no further movement.
        #[test]
        fn terminals_are_absorbing(
            terminal in prop::sample::select(vec![
                PostStatus::Rejected,
                PostStatus::Published,
                PostStatus::Failed,
            ]),
            requested in status_strategy()
        ) {
            prop_assert!(!PostStatus::can_transition(terminal, requested));
        }
    }

    #[test]
    fn selection_factor_bounds() {
        let factors = SelectionFactors {
            visual_quality: 101,
            engagement_potential: 50,
            brand_alignment: 50,
            recency: 50,
            uniqueness: 50,
        };
        assert!(factors.validate().is_err());
    }
}
