//! Agent account connection state.
//!
//! Credentials themselves live with the external credential resolver; this
//! row only tracks whether the account is usable for dispatch. The
//! `connected` flag is flipped inside the same transaction as an
//! auth-failure dead-letter so the account is never left claimable against
//! a credential already known to be dead.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::error::Result;

#[derive(Debug, Clone, FromRow)]
pub struct AgentAccount {
    pub id: Uuid,
    pub handle: String,
    pub display_name: Option<String>,
    pub connected: bool,
    pub disconnected_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentAccount {
    pub async fn create(pool: &SqlitePool, handle: &str) -> Result<AgentAccount> {
        let now = Utc::now();
        let account = sqlx::query_as::<_, AgentAccount>(
            r#"
            INSERT INTO agent_accounts (id, handle, connected, created_at, updated_at)
            VALUES ($1, $2, 1, $3, $3)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(handle)
        .bind(now)
        .fetch_one(pool)
        .await?;
        Ok(account)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<AgentAccount>> {
        let account = sqlx::query_as::<_, AgentAccount>(
            "SELECT * FROM agent_accounts WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(account)
    }

    /// Mark the account disconnected. Runs on a caller-supplied connection
    /// so the auth-failure path can include it in the job's terminal
    /// transaction.
    pub(crate) async fn set_disconnected(
        conn: &mut SqliteConnection,
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            UPDATE agent_accounts
            SET connected = 0, disconnected_at = $2, updated_at = $2
            WHERE id = $1 AND connected = 1
            "#,
        )
        .bind(account_id)
        .bind(now)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Reconnect after the operator re-authorizes the account.
    pub async fn set_connected(pool: &SqlitePool, account_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE agent_accounts
            SET connected = 1, disconnected_at = NULL, updated_at = $2
            WHERE id = $1
            "#,
        )
        .bind(account_id)
        .bind(Utc::now())
        .execute(pool)
        .await?;
        Ok(())
    }
}
