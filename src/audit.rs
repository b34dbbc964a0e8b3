//! # Audit Trail
//!
//! Append-only record of every state transition across jobs, scheduled
//! posts, and attribution reviews. Entries are written on the same
//! connection (usually inside the same transaction) as the transition they
//! describe, so the trail can reconstruct history without replaying
//! application logic.
//!
//! Nothing in the crate updates or deletes rows in this table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::error::Result;

pub const TABLE_OUTBOUND_JOBS: &str = "outbound_jobs";
pub const TABLE_SCHEDULED_POSTS: &str = "scheduled_posts";
pub const TABLE_ATTRIBUTION_REVIEWS: &str = "attribution_reviews";

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditLogEntry {
    pub id: i64,
    pub table_name: String,
    pub record_id: Uuid,
    pub from_state: Option<String>,
    pub to_state: String,
    /// Who drove the transition: `producer`, `operator:<name>`, or a
    /// dispatcher worker id.
    pub actor: String,
    pub changes: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// Append one transition record.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn record(
    conn: &mut SqliteConnection,
    table_name: &str,
    record_id: Uuid,
    from_state: Option<&str>,
    to_state: &str,
    actor: &str,
    changes: Option<Value>,
    at: DateTime<Utc>,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO audit_log_entries
            (table_name, record_id, from_state, to_state, actor, changes, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(table_name)
    .bind(record_id)
    .bind(from_state)
    .bind(to_state)
    .bind(actor)
    .bind(changes.map(sqlx::types::Json))
    .bind(at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Full transition history for one record, oldest first.
pub async fn history(
    pool: &SqlitePool,
    table_name: &str,
    record_id: Uuid,
) -> Result<Vec<AuditLogEntry>> {
    let entries = sqlx::query_as::<_, AuditLogEntry>(
        r#"
        SELECT id, table_name, record_id, from_state, to_state, actor,
               changes, created_at
        FROM audit_log_entries
        WHERE table_name = $1 AND record_id = $2
        ORDER BY id ASC
        "#,
    )
    .bind(table_name)
    .bind(record_id)
    .fetch_all(pool)
    .await?;
    Ok(entries)
}
