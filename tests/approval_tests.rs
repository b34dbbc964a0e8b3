//! The two oversight state machines: content approval gating the publish
//! pipeline, and attribution review gating model feedback.

mod common;

use common::*;
use relay_core::audit;
use relay_core::dispatch::{ErrorCategory, FailureDetails, QueueStore, RetryPolicy};
use relay_core::models::attribution::{
    AttributionReview, ModelWeights, NewSalesAttribution, ReviewStatus, SalesAttribution,
    Touchpoint,
};
use relay_core::models::scheduled_post::{
    AgentModification, NewScheduledPost, ScheduledPost, SelectionFactors,
};
use relay_core::models::{JobStatus, PostStatus};
use relay_core::state_machine::{AttributionReviewQueue, ContentApproval, ReviewDecision};
use relay_core::RelayError;

const WORKER: &str = "worker-test-1";

fn store(pool: &sqlx::SqlitePool) -> QueueStore {
    QueueStore::new(pool.clone(), RetryPolicy::from_config(&fast_retry_config()))
}

#[tokio::test]
async fn approval_enqueues_but_does_not_start_publishing() {
    let db = setup_db().await;
    let account = create_account(&db.pool).await;
    let draft = create_draft(&db.pool, account.id).await;
    let approval = ContentApproval::new(db.pool.clone());

    let (post, job) = approval.approve(draft.id, "dana").await.unwrap();

    // Approval and the publish attempt are decoupled: the post only moves
    // to publishing once a worker claims the job.
    assert_eq!(post.status, PostStatus::Approved);
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(post.reviewed_by.as_deref(), Some("dana"));

    let queue = store(&db.pool);
    let claimed = queue.claim_next(WORKER, 1).await.unwrap();
    assert_eq!(claimed[0].id, job.id);

    let post = ScheduledPost::find_by_id(&db.pool, draft.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(post.status, PostStatus::Publishing);
}

#[tokio::test]
async fn rejection_is_terminal_and_creates_no_job() {
    let db = setup_db().await;
    let account = create_account(&db.pool).await;
    let draft = create_draft(&db.pool, account.id).await;
    let approval = ContentApproval::new(db.pool.clone());

    let post = approval
        .reject(draft.id, "dana", Some("off-brand tone"))
        .await
        .unwrap();
    assert_eq!(post.status, PostStatus::Rejected);
    assert_eq!(post.failure_reason.as_deref(), Some("off-brand tone"));

    let queue = store(&db.pool);
    let health = queue.queue_health().await.unwrap();
    assert_eq!(health.pending, 0);

    // No resurrection.
    assert!(matches!(
        approval.approve(draft.id, "dana").await,
        Err(RelayError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn double_approval_is_a_structural_error() {
    let db = setup_db().await;
    let account = create_account(&db.pool).await;
    let draft = create_draft(&db.pool, account.id).await;
    let approval = ContentApproval::new(db.pool.clone());

    approval.approve(draft.id, "dana").await.unwrap();
    let second = approval.approve(draft.id, "dana").await;
    assert!(matches!(second, Err(RelayError::InvalidTransition { .. })));

    // Exactly one publish job exists.
    let queue = store(&db.pool);
    let health = queue.queue_health().await.unwrap();
    assert_eq!(health.pending, 1);
}

#[tokio::test]
async fn publish_failure_writes_back_onto_the_post() {
    let db = setup_db().await;
    let account = create_account(&db.pool).await;
    let draft = create_draft(&db.pool, account.id).await;
    let approval = ContentApproval::new(db.pool.clone());
    let queue = store(&db.pool);

    let (_, job) = approval.approve(draft.id, "dana").await.unwrap();
    queue.claim_next(WORKER, 1).await.unwrap();

    queue
        .fail(
            job.id,
            FailureDetails {
                raw_error: "HTTP 400: media rejected by content checks".to_string(),
                category: ErrorCategory::Permanent,
                provider_code: Some("2207026".to_string()),
                retry_after: None,
            },
            WORKER,
        )
        .await
        .unwrap();

    let post = ScheduledPost::find_by_id(&db.pool, draft.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(post.status, PostStatus::Failed);
    assert!(post
        .failure_reason
        .as_deref()
        .unwrap()
        .contains("media rejected"));

    let history = audit::history(&db.pool, audit::TABLE_SCHEDULED_POSTS, draft.id)
        .await
        .unwrap();
    let states: Vec<&str> = history.iter().map(|e| e.to_state.as_str()).collect();
    assert_eq!(states, vec!["pending", "approved", "publishing", "failed"]);
}

#[tokio::test]
async fn draft_modifications_require_reasons() {
    let db = setup_db().await;
    let account = create_account(&db.pool).await;

    let result = ScheduledPost::create(
        &db.pool,
        NewScheduledPost {
            account_id: account.id,
            caption: "hello".to_string(),
            media_url: None,
            agent_modifications: vec![AgentModification {
                field: "caption".to_string(),
                original: "hi".to_string(),
                modified: "hello".to_string(),
                reason: "  ".to_string(),
            }],
            selection_factors: SelectionFactors {
                visual_quality: 50,
                engagement_potential: 50,
                brand_alignment: 50,
                recency: 50,
                uniqueness: 50,
            },
        },
    )
    .await;

    assert!(matches!(result, Err(RelayError::Validation(_))));
}

async fn open_review(pool: &sqlx::SqlitePool, fraud_risk: bool) -> AttributionReview {
    let account = create_account(pool).await;
    let attribution = SalesAttribution::create(
        pool,
        NewSalesAttribution {
            account_id: account.id,
            order_id: format!("order_{}", uuid::Uuid::new_v4().simple()),
            revenue_cents: 12_900,
            currency: "USD".to_string(),
            first_touch: 0.4,
            last_touch: 0.2,
            linear: 0.25,
            time_decay: 0.15,
            journey_timeline: vec![Touchpoint {
                occurred_at: chrono::Utc::now() - chrono::Duration::days(2),
                channel: "dm".to_string(),
                interaction: "sizing question answered".to_string(),
            }],
        },
    )
    .await
    .unwrap();

    AttributionReview::open(pool, attribution.id, 0.34, fraud_risk)
        .await
        .unwrap()
}

#[tokio::test]
async fn review_decisions_are_idempotent() {
    let db = setup_db().await;
    let reviews = AttributionReviewQueue::new(db.pool.clone());
    let review = open_review(&db.pool, false).await;

    let (decided, outcome) = reviews.approve(review.id, "dana", None).await.unwrap();
    assert_eq!(outcome, ReviewDecision::Applied);
    assert_eq!(decided.review_status, ReviewStatus::Approved);

    // A slow-UI double submit is a no-op, not an error.
    let (decided, outcome) = reviews.approve(review.id, "dana", None).await.unwrap();
    assert_eq!(outcome, ReviewDecision::AlreadyDecided);
    assert_eq!(decided.review_status, ReviewStatus::Approved);

    // ...and produces no duplicate audit entry.
    let history = audit::history(&db.pool, audit::TABLE_ATTRIBUTION_REVIEWS, review.id)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].to_state, "approved");
}

#[tokio::test]
async fn opposite_decision_on_decided_review_is_rejected() {
    let db = setup_db().await;
    let reviews = AttributionReviewQueue::new(db.pool.clone());
    let review = open_review(&db.pool, false).await;

    reviews.approve(review.id, "dana", None).await.unwrap();
    let result = reviews.reject(review.id, "lee", None).await;
    assert!(matches!(result, Err(RelayError::InvalidTransition { .. })));
}

#[tokio::test]
async fn feedback_summary_aggregates_decisions() {
    let db = setup_db().await;
    let reviews = AttributionReviewQueue::new(db.pool.clone());

    let approved = open_review(&db.pool, false).await;
    let rejected_fraud = open_review(&db.pool, true).await;
    let rejected_plain = open_review(&db.pool, false).await;
    let _still_pending = open_review(&db.pool, false).await;

    reviews.approve(approved.id, "dana", None).await.unwrap();
    reviews
        .reject(rejected_fraud.id, "dana", Some("self-referral pattern"))
        .await
        .unwrap();
    reviews.reject(rejected_plain.id, "lee", None).await.unwrap();

    let feedback = reviews.feedback_summary().await.unwrap();
    assert_eq!(feedback.pending, 1);
    assert_eq!(feedback.approved, 1);
    assert_eq!(feedback.rejected, 2);
    assert_eq!(feedback.rejected_fraud_flagged, 1);
}

#[tokio::test]
async fn review_flow_never_touches_model_weights() {
    let db = setup_db().await;
    let reviews = AttributionReviewQueue::new(db.pool.clone());

    let seeded = ModelWeights {
        first_touch: 0.25,
        last_touch: 0.25,
        linear: 0.25,
        time_decay: 0.25,
    };
    seeded.upsert(&db.pool).await.unwrap();

    let review = open_review(&db.pool, false).await;
    reviews.approve(review.id, "dana", None).await.unwrap();

    let current = ModelWeights::current(&db.pool).await.unwrap().unwrap();
    assert_eq!(current, seeded);
}

#[tokio::test]
async fn weight_upsert_validates_and_replaces() {
    let db = setup_db().await;

    let negative = ModelWeights {
        first_touch: -0.1,
        last_touch: 0.5,
        linear: 0.3,
        time_decay: 0.3,
    };
    assert!(matches!(
        negative.upsert(&db.pool).await,
        Err(RelayError::Validation(_))
    ));
    assert!(ModelWeights::current(&db.pool).await.unwrap().is_none());

    let first = ModelWeights {
        first_touch: 0.4,
        last_touch: 0.2,
        linear: 0.2,
        time_decay: 0.2,
    };
    first.upsert(&db.pool).await.unwrap();

    // The learning job replaces the single row on each run.
    let second = ModelWeights {
        first_touch: 0.3,
        last_touch: 0.3,
        linear: 0.2,
        time_decay: 0.2,
    };
    second.upsert(&db.pool).await.unwrap();
    assert_eq!(
        ModelWeights::current(&db.pool).await.unwrap().unwrap(),
        second
    );
}

#[tokio::test]
async fn review_confidence_is_bounded() {
    let db = setup_db().await;
    let account = create_account(&db.pool).await;
    let attribution = SalesAttribution::create(
        &db.pool,
        NewSalesAttribution {
            account_id: account.id,
            order_id: "order_1".to_string(),
            revenue_cents: 5_000,
            currency: "USD".to_string(),
            first_touch: 0.4,
            last_touch: 0.2,
            linear: 0.25,
            time_decay: 0.15,
            journey_timeline: Vec::new(),
        },
    )
    .await
    .unwrap();

    let result = AttributionReview::open(&db.pool, attribution.id, 1.2, false).await;
    assert!(matches!(result, Err(RelayError::Validation(_))));
}
