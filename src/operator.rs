//! # Operator Surface
//!
//! Read access for the dashboard: filterable, paginated listings over
//! jobs, posts, reviews, and alerts, plus alert acknowledgement. The
//! mutating operations live with their owners (approve/reject on
//! [`ContentApproval`](crate::state_machine::ContentApproval) and
//! [`AttributionReviewQueue`](crate::state_machine::AttributionReviewQueue),
//! cancel/requeue on [`QueueStore`](crate::dispatch::QueueStore)) so the
//! dashboard layer cannot bypass their transition guards.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{RelayError, Result};
use crate::models::{
    ActionType, AlertType, AttributionReview, Job, JobStatus, PostStatus, ReviewStatus,
    ScheduledPost, SystemAlert,
};

const DEFAULT_PER_PAGE: i64 = 25;
const MAX_PER_PAGE: i64 = 200;

/// 1-based pagination request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: i64,
    pub per_page: i64,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

impl PageRequest {
    fn clamped(&self) -> (i64, i64) {
        let per_page = self.per_page.clamp(1, MAX_PER_PAGE);
        let page = self.page.max(1);
        (per_page, (page - 1) * per_page)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PagedResult<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
}

#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub action_type: Option<ActionType>,
    pub account_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default)]
pub struct PostFilter {
    pub status: Option<PostStatus>,
    pub account_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default)]
pub struct ReviewFilter {
    pub status: Option<ReviewStatus>,
    pub fraud_risk: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub alert_type: Option<AlertType>,
    pub unacknowledged_only: bool,
}

pub async fn list_jobs(
    pool: &SqlitePool,
    filter: &JobFilter,
    page: PageRequest,
) -> Result<PagedResult<Job>> {
    let mut conditions = Vec::new();
    if filter.status.is_some() {
        conditions.push("status = ?");
    }
    if filter.action_type.is_some() {
        conditions.push("action_type = ?");
    }
    if filter.account_id.is_some() {
        conditions.push("account_id = ?");
    }
    let where_clause = build_where(&conditions);

    let count_sql = format!("SELECT COUNT(*) FROM outbound_jobs{where_clause}");
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    if let Some(status) = filter.status {
        count_query = count_query.bind(status);
    }
    if let Some(action_type) = filter.action_type {
        count_query = count_query.bind(action_type);
    }
    if let Some(account_id) = filter.account_id {
        count_query = count_query.bind(account_id);
    }
    let total = count_query.fetch_one(pool).await?;

    let (per_page, offset) = page.clamped();
    let list_sql = format!(
        "SELECT * FROM outbound_jobs{where_clause} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
    );
    let mut list_query = sqlx::query_as::<_, Job>(&list_sql);
    if let Some(status) = filter.status {
        list_query = list_query.bind(status);
    }
    if let Some(action_type) = filter.action_type {
        list_query = list_query.bind(action_type);
    }
    if let Some(account_id) = filter.account_id {
        list_query = list_query.bind(account_id);
    }
    let items = list_query.bind(per_page).bind(offset).fetch_all(pool).await?;

    Ok(PagedResult {
        items,
        total,
        page: page.page.max(1),
        per_page,
    })
}

pub async fn list_posts(
    pool: &SqlitePool,
    filter: &PostFilter,
    page: PageRequest,
) -> Result<PagedResult<ScheduledPost>> {
    let mut conditions = Vec::new();
    if filter.status.is_some() {
        conditions.push("status = ?");
    }
    if filter.account_id.is_some() {
        conditions.push("account_id = ?");
    }
    let where_clause = build_where(&conditions);

    let count_sql = format!("SELECT COUNT(*) FROM scheduled_posts{where_clause}");
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    if let Some(status) = filter.status {
        count_query = count_query.bind(status);
    }
    if let Some(account_id) = filter.account_id {
        count_query = count_query.bind(account_id);
    }
    let total = count_query.fetch_one(pool).await?;

    let (per_page, offset) = page.clamped();
    let list_sql = format!(
        "SELECT * FROM scheduled_posts{where_clause} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
    );
    let mut list_query = sqlx::query_as::<_, ScheduledPost>(&list_sql);
    if let Some(status) = filter.status {
        list_query = list_query.bind(status);
    }
    if let Some(account_id) = filter.account_id {
        list_query = list_query.bind(account_id);
    }
    let items = list_query.bind(per_page).bind(offset).fetch_all(pool).await?;

    Ok(PagedResult {
        items,
        total,
        page: page.page.max(1),
        per_page,
    })
}

pub async fn list_reviews(
    pool: &SqlitePool,
    filter: &ReviewFilter,
    page: PageRequest,
) -> Result<PagedResult<AttributionReview>> {
    let mut conditions = Vec::new();
    if filter.status.is_some() {
        conditions.push("review_status = ?");
    }
    if filter.fraud_risk.is_some() {
        conditions.push("fraud_risk = ?");
    }
    let where_clause = build_where(&conditions);

    let count_sql = format!("SELECT COUNT(*) FROM attribution_reviews{where_clause}");
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    if let Some(status) = filter.status {
        count_query = count_query.bind(status);
    }
    if let Some(fraud_risk) = filter.fraud_risk {
        count_query = count_query.bind(fraud_risk);
    }
    let total = count_query.fetch_one(pool).await?;

    let (per_page, offset) = page.clamped();
    let list_sql = format!(
        "SELECT * FROM attribution_reviews{where_clause} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
    );
    let mut list_query = sqlx::query_as::<_, AttributionReview>(&list_sql);
    if let Some(status) = filter.status {
        list_query = list_query.bind(status);
    }
    if let Some(fraud_risk) = filter.fraud_risk {
        list_query = list_query.bind(fraud_risk);
    }
    let items = list_query.bind(per_page).bind(offset).fetch_all(pool).await?;

    Ok(PagedResult {
        items,
        total,
        page: page.page.max(1),
        per_page,
    })
}

pub async fn list_alerts(
    pool: &SqlitePool,
    filter: &AlertFilter,
    page: PageRequest,
) -> Result<PagedResult<SystemAlert>> {
    let mut conditions = Vec::new();
    if filter.alert_type.is_some() {
        conditions.push("alert_type = ?");
    }
    if filter.unacknowledged_only {
        conditions.push("acknowledged = 0");
    }
    let where_clause = build_where(&conditions);

    let count_sql = format!("SELECT COUNT(*) FROM system_alerts{where_clause}");
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    if let Some(alert_type) = filter.alert_type {
        count_query = count_query.bind(alert_type);
    }
    let total = count_query.fetch_one(pool).await?;

    let (per_page, offset) = page.clamped();
    let list_sql = format!(
        "SELECT * FROM system_alerts{where_clause} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
    );
    let mut list_query = sqlx::query_as::<_, SystemAlert>(&list_sql);
    if let Some(alert_type) = filter.alert_type {
        list_query = list_query.bind(alert_type);
    }
    let items = list_query.bind(per_page).bind(offset).fetch_all(pool).await?;

    Ok(PagedResult {
        items,
        total,
        page: page.page.max(1),
        per_page,
    })
}

/// Paginated audit trail, newest first, optionally scoped to one table.
/// Per-record history in chronological order lives at
/// [`audit::history`](crate::audit::history).
pub async fn list_audit(
    pool: &SqlitePool,
    table_name: Option<&str>,
    page: PageRequest,
) -> Result<PagedResult<crate::audit::AuditLogEntry>> {
    let where_clause = if table_name.is_some() {
        " WHERE table_name = ?"
    } else {
        ""
    };

    let count_sql = format!("SELECT COUNT(*) FROM audit_log_entries{where_clause}");
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    if let Some(table) = table_name {
        count_query = count_query.bind(table);
    }
    let total = count_query.fetch_one(pool).await?;

    let (per_page, offset) = page.clamped();
    let list_sql = format!(
        "SELECT * FROM audit_log_entries{where_clause} ORDER BY id DESC LIMIT ? OFFSET ?"
    );
    let mut list_query = sqlx::query_as::<_, crate::audit::AuditLogEntry>(&list_sql);
    if let Some(table) = table_name {
        list_query = list_query.bind(table);
    }
    let items = list_query.bind(per_page).bind(offset).fetch_all(pool).await?;

    Ok(PagedResult {
        items,
        total,
        page: page.page.max(1),
        per_page,
    })
}

/// Mark an alert as seen. Acknowledging twice is a no-op.
pub async fn acknowledge_alert(pool: &SqlitePool, alert_id: Uuid) -> Result<SystemAlert> {
    sqlx::query(
        r#"
        UPDATE system_alerts
        SET acknowledged = 1, acknowledged_at = $2
        WHERE id = $1 AND acknowledged = 0
        "#,
    )
    .bind(alert_id)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    SystemAlert::find_by_id(pool, alert_id)
        .await?
        .ok_or(RelayError::NotFound {
            entity: "system_alert",
            id: alert_id,
        })
}

fn build_where(conditions: &[&str]) -> String {
    if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    }
}
