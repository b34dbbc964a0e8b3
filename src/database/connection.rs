//! SQLite pool setup.
//!
//! WAL journaling keeps reader latency flat while a worker holds a write
//! transaction; the busy timeout absorbs writer contention between
//! concurrent dispatcher workers. Embedded migrations run on connect so an
//! embedding host never needs a separate provisioning step.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::SqlitePool;
use tracing::debug;

use crate::config::DatabaseConfig;
use crate::error::Result;

/// Open a pool against the configured database and bring the schema up to
/// date.
pub async fn connect(config: &DatabaseConfig) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&config.url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    debug!(url = %config.url, "database connected and migrated");
    Ok(pool)
}
