use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

use crate::config::Config;

/// Opens the shared SQLite pool backing all three store adapters (RV, VI,
/// GR — spec §4.6 simplifies all three to tables in one physical database).
/// `acquire_timeout` bounds how long a caller waits under pool exhaustion
/// (spec §5) before failing with a timeout error rather than blocking
/// indefinitely.
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.db.path;

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(config.ingest.pool_acquire_timeout_s))
        .connect_with(options)
        .await?;

    Ok(pool)
}
