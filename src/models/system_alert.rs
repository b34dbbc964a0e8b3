//! Operator-facing alerts.
//!
//! Write-only from the core's perspective: the dispatcher's dead-letter
//! path creates them, the dashboard reads and acknowledges them. Silently
//! retried failures never produce an alert; only conditions needing
//! operator action do.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use std::fmt;
use uuid::Uuid;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum AlertType {
    AuthFailure,
    RateLimit,
    ContentViolation,
    AgentDown,
    SyncFailure,
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthFailure => write!(f, "auth_failure"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::ContentViolation => write!(f, "content_violation"),
            Self::AgentDown => write!(f, "agent_down"),
            Self::SyncFailure => write!(f, "sync_failure"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SystemAlert {
    pub id: Uuid,
    pub account_id: Option<Uuid>,
    pub alert_type: AlertType,
    pub message: String,
    pub source_table: Option<String>,
    pub source_id: Option<Uuid>,
    pub acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl SystemAlert {
    /// Insert an alert on a caller-supplied connection so the dead-letter
    /// path can create it inside the job's terminal transaction. Returns
    /// the alert id for cross-referencing from the audit entry.
    pub(crate) async fn create(
        conn: &mut SqliteConnection,
        account_id: Option<Uuid>,
        alert_type: AlertType,
        message: &str,
        source_table: &str,
        source_id: Uuid,
        now: DateTime<Utc>,
    ) -> sqlx::Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO system_alerts
                (id, account_id, alert_type, message, source_table, source_id,
                 acknowledged, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, 0, $7)
            "#,
        )
        .bind(id)
        .bind(account_id)
        .bind(alert_type)
        .bind(message)
        .bind(source_table)
        .bind(source_id)
        .bind(now)
        .execute(&mut *conn)
        .await?;
        Ok(id)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<SystemAlert>> {
        let alert =
            sqlx::query_as::<_, SystemAlert>("SELECT * FROM system_alerts WHERE id = $1")
                .bind(id)
                .fetch_optional(pool)
                .await?;
        Ok(alert)
    }
}
