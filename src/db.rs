use std::{str::FromStr, time::Duration};

use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};
use time::OffsetDateTime;

/// Opens the SQLite pool and applies the embedded migrations.
pub async fn connect(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5))
        .create_if_missing(true);

    let db_pool = SqlitePoolOptions::new()
        .max_connections(16)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&db_pool).await?;

    Ok(db_pool)
}

/// SQLite-backed persistence for communities and their chat log.
///
/// Query methods live next to the feature that uses them
/// (`communities::store`, `chat::store`).
#[derive(Clone)]
pub struct SqliteStore {
    pub(crate) db_pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }
}

pub(crate) fn to_micros(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000) as i64
}

pub(crate) fn from_micros(micros: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos(micros as i128 * 1_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}
