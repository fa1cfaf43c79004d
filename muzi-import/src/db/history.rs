//! `history` table queries

use muzi_common::time::to_storage_micros;
use muzi_common::Result;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};

use crate::models::ListenEvent;

/// Rows per INSERT statement (7 binds each, well under SQLite's variable limit)
pub const INSERT_CHUNK_ROWS: usize = 100;

/// Persisted listen as seen by the duplicate resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredListen {
    pub song_name: String,
    pub artist: String,
    /// Unix microseconds (UTC)
    pub timestamp_us: i64,
}

/// All listens of `user_id` with `from_us <= timestamp <= to_us`
///
/// Served by the `(user_id, timestamp DESC)` index.
pub async fn fetch_window(
    pool: &SqlitePool,
    user_id: i64,
    from_us: i64,
    to_us: i64,
) -> Result<Vec<StoredListen>> {
    let rows = sqlx::query(
        r#"
        SELECT song_name, artist, timestamp
        FROM history
        WHERE user_id = ? AND timestamp BETWEEN ? AND ?
        "#,
    )
    .bind(user_id)
    .bind(from_us)
    .bind(to_us)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(StoredListen {
                song_name: row.try_get("song_name")?,
                artist: row.try_get("artist")?,
                timestamp_us: row.try_get("timestamp")?,
            })
        })
        .collect()
}

/// Insert `rows` for `user_id` on an open connection or transaction
///
/// Rows hitting the `(user_id, song_name, artist, timestamp)` constraint are
/// skipped. Returns the number of rows actually inserted.
pub async fn insert_listens(
    conn: &mut SqliteConnection,
    user_id: i64,
    rows: &[ListenEvent],
) -> Result<u64> {
    let mut inserted = 0u64;

    for chunk in rows.chunks(INSERT_CHUNK_ROWS) {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO history (user_id, timestamp, song_name, artist, album_name, played_ms, platform) ",
        );
        builder.push_values(chunk, |mut row, event| {
            row.push_bind(user_id)
                .push_bind(to_storage_micros(&event.timestamp))
                .push_bind(event.song_name.as_str())
                .push_bind(event.artist.as_str())
                .push_bind(event.album_name.as_deref())
                .push_bind(event.played_ms)
                .push_bind(event.platform.as_str());
        });
        builder.push(" ON CONFLICT (user_id, song_name, artist, timestamp) DO NOTHING");

        let result = builder.build().execute(&mut *conn).await?;
        inserted += result.rows_affected();
    }

    Ok(inserted)
}

/// Number of persisted listens for `user_id`
pub async fn count_for_user(pool: &SqlitePool, user_id: i64) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM history WHERE user_id = ?")
        .bind(user_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Platform;
    use chrono::{TimeZone, Utc};

    fn listen(song: &str, secs: i64) -> ListenEvent {
        ListenEvent {
            user_id: 1,
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            song_name: song.to_string(),
            artist: "Artist".to_string(),
            album_name: Some("Album".to_string()),
            played_ms: 30_000,
            platform: Platform::Spotify,
        }
    }

    #[tokio::test]
    async fn test_insert_skips_conflicts() {
        let pool = muzi_common::db::init_in_memory().await.unwrap();
        let rows = vec![listen("a", 100), listen("b", 200)];

        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(insert_listens(&mut conn, 1, &rows).await.unwrap(), 2);
        assert_eq!(insert_listens(&mut conn, 1, &rows).await.unwrap(), 0);
        // Same rows for another user are distinct
        assert_eq!(insert_listens(&mut conn, 2, &rows).await.unwrap(), 2);
        drop(conn);

        assert_eq!(count_for_user(&pool, 1).await.unwrap(), 2);
        assert_eq!(count_for_user(&pool, 2).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_insert_spans_multiple_chunks() {
        let pool = muzi_common::db::init_in_memory().await.unwrap();
        let rows: Vec<_> = (0..(INSERT_CHUNK_ROWS as i64 * 2 + 7))
            .map(|i| listen("song", 1_000 + i * 60))
            .collect();

        let mut conn = pool.acquire().await.unwrap();
        let inserted = insert_listens(&mut conn, 1, &rows).await.unwrap();
        assert_eq!(inserted, rows.len() as u64);
    }

    #[tokio::test]
    async fn test_fetch_window_is_inclusive_and_user_scoped() {
        let pool = muzi_common::db::init_in_memory().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        insert_listens(&mut conn, 1, &[listen("a", 100), listen("b", 200), listen("c", 300)])
            .await
            .unwrap();
        insert_listens(&mut conn, 2, &[listen("z", 200)]).await.unwrap();
        drop(conn);

        let found = fetch_window(&pool, 1, 100_000_000, 200_000_000).await.unwrap();
        let mut names: Vec<_> = found.iter().map(|l| l.song_name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
        assert!(found.iter().all(|l| l.artist == "Artist"));
    }
}
