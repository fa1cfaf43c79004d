//! Database initialization
//!
//! Opens (or creates) the SQLite database and makes sure the `history`
//! relation exists with its uniqueness constraint and indexes. Safe to run
//! on every startup.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Busy timeout applied to every connection (ms)
pub const BUSY_TIMEOUT_MS: u64 = 5000;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL lets the duplicate-window reads of one import run alongside the
    // bulk inserts of another
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;

    sqlx::query(&format!("PRAGMA busy_timeout = {}", BUSY_TIMEOUT_MS))
        .execute(&pool)
        .await?;

    create_history_table(&pool).await?;

    Ok(pool)
}

/// Single-connection in-memory database with the schema applied
///
/// `sqlite::memory:` gives every connection its own database, so the pool
/// is capped at one connection.
pub async fn init_in_memory() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    create_history_table(&pool).await?;
    Ok(pool)
}

/// Create the `history` table and its indexes
///
/// `timestamp` holds Unix microseconds (UTC). The uniqueness constraint over
/// `(user_id, song_name, artist, timestamp)` is the authoritative guard
/// against duplicate rows; the import-time duplicate resolver only reduces
/// how often it is hit.
pub async fn create_history_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            timestamp INTEGER NOT NULL,
            song_name TEXT NOT NULL,
            artist TEXT NOT NULL,
            album_name TEXT,
            played_ms INTEGER,
            platform TEXT,
            UNIQUE (user_id, song_name, artist, timestamp)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_history_user_timestamp ON history(user_id, timestamp DESC)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_history_user_artist ON history(user_id, artist)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_history_user_song ON history(user_id, song_name)")
        .execute(pool)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn column_names(pool: &SqlitePool) -> Vec<String> {
        sqlx::query_scalar::<_, String>("SELECT name FROM pragma_table_info('history')")
            .fetch_all(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_history_schema() {
        let pool = init_in_memory().await.unwrap();
        let columns = column_names(&pool).await;
        for expected in [
            "id",
            "user_id",
            "timestamp",
            "song_name",
            "artist",
            "album_name",
            "played_ms",
            "platform",
        ] {
            assert!(columns.iter().any(|c| c == expected), "missing column {}", expected);
        }
    }

    #[tokio::test]
    async fn test_schema_creation_is_idempotent() {
        let pool = init_in_memory().await.unwrap();
        create_history_table(&pool).await.unwrap();
        create_history_table(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn test_uniqueness_constraint() {
        let pool = init_in_memory().await.unwrap();
        let insert = "INSERT INTO history (user_id, timestamp, song_name, artist) VALUES (1, 100, 'Song', 'Artist')";
        sqlx::query(insert).execute(&pool).await.unwrap();

        let err = sqlx::query(insert).execute(&pool).await.unwrap_err();
        let err = crate::Error::from(err);
        assert!(err.is_unique_violation());

        // Same song for another user is a different row
        sqlx::query(
            "INSERT INTO history (user_id, timestamp, song_name, artist) VALUES (2, 100, 'Song', 'Artist')",
        )
        .execute(&pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_init_database_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("muzi.db");
        let pool = init_database(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(column_names(&pool).await.len(), 8);
    }
}
