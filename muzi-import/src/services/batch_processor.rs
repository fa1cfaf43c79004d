//! One batch through filter → resolver → writer

use serde::Serialize;
use sqlx::SqlitePool;

use super::{BulkWriter, DuplicateResolver, ValidityFilter};
use crate::config::ImportConfig;
use crate::models::ListenEvent;

/// Counts for one processed batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    /// Events handed in
    pub submitted: usize,
    /// Events passing the validity filter
    pub valid: usize,
    /// Valid events excluded as duplicates
    pub duplicates: usize,
    /// Rows actually persisted
    pub inserted: u64,
    /// Store error; the batch contributed nothing
    pub failed: bool,
}

#[derive(Clone)]
pub struct BatchProcessor {
    filter: ValidityFilter,
    resolver: DuplicateResolver,
    writer: BulkWriter,
}

impl BatchProcessor {
    pub fn new(db: SqlitePool, config: &ImportConfig) -> Self {
        Self {
            filter: ValidityFilter::new(config.min_play_ms),
            resolver: DuplicateResolver::new(db.clone(), config.duplicate_window()),
            writer: BulkWriter::new(db, config.max_lock_wait_ms),
        }
    }

    /// Process one batch; store errors are logged and absorbed
    pub async fn process(&self, user_id: i64, batch: Vec<ListenEvent>) -> BatchOutcome {
        let mut outcome = BatchOutcome {
            submitted: batch.len(),
            ..BatchOutcome::default()
        };

        let valid = self.filter.apply(batch);
        outcome.valid = valid.len();
        if valid.is_empty() {
            return outcome;
        }

        let duplicates = match self.resolver.resolve(user_id, &valid).await {
            Ok(duplicates) => duplicates,
            Err(e) => {
                tracing::error!(user_id, error = %e, "Duplicate check failed, skipping batch");
                outcome.failed = true;
                return outcome;
            }
        };
        outcome.duplicates = duplicates.len();

        match self.writer.write(user_id, duplicates.retain(valid)).await {
            Ok(inserted) => outcome.inserted = inserted,
            Err(e) => {
                tracing::error!(user_id, error = %e, "Batch insert failed");
                outcome.failed = true;
            }
        }

        tracing::debug!(
            user_id,
            submitted = outcome.submitted,
            valid = outcome.valid,
            duplicates = outcome.duplicates,
            inserted = outcome.inserted,
            "Batch processed"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Platform;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn spotify(artist: &str, song: &str, played_ms: i64, ts: DateTime<Utc>) -> ListenEvent {
        ListenEvent {
            user_id: 1,
            timestamp: ts,
            song_name: song.to_string(),
            artist: artist.to_string(),
            album_name: None,
            played_ms,
            platform: Platform::Spotify,
        }
    }

    #[tokio::test]
    async fn test_three_record_scenario_persists_one_row() {
        let pool = muzi_common::db::init_in_memory().await.unwrap();
        let processor = BatchProcessor::new(pool.clone(), &ImportConfig::default());
        let t = Utc.with_ymd_and_hms(2022, 5, 5, 10, 0, 0).unwrap();

        let outcome = processor
            .process(
                1,
                vec![
                    spotify("ArtistA", "Song1", 25_000, t),
                    spotify("ArtistA", "Song1", 25_000, t + Duration::seconds(5)),
                    spotify("ArtistB", "Song2", 5_000, t),
                ],
            )
            .await;

        assert_eq!(
            outcome,
            BatchOutcome {
                submitted: 3,
                valid: 2,
                duplicates: 1,
                inserted: 1,
                failed: false,
            }
        );

        let (artist, song, ts): (String, String, i64) =
            sqlx::query_as("SELECT artist, song_name, timestamp FROM history WHERE user_id = 1")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(artist, "ArtistA");
        assert_eq!(song, "Song1");
        assert_eq!(ts, t.timestamp_micros());
    }

    #[tokio::test]
    async fn test_second_run_inserts_nothing() {
        let pool = muzi_common::db::init_in_memory().await.unwrap();
        let processor = BatchProcessor::new(pool.clone(), &ImportConfig::default());
        let t = Utc.with_ymd_and_hms(2022, 5, 5, 10, 0, 0).unwrap();
        let batch: Vec<_> = (0..20)
            .map(|i| spotify("Band", &format!("Track {}", i), 60_000, t + Duration::minutes(i)))
            .collect();

        let first = processor.process(1, batch.clone()).await;
        let second = processor.process(1, batch).await;

        assert_eq!(first.inserted, 20);
        assert_eq!(second.inserted, 0);
        assert_eq!(second.duplicates, 20);
    }

    #[tokio::test]
    async fn test_store_error_is_absorbed() {
        let pool = muzi_common::db::init_in_memory().await.unwrap();
        sqlx::query("DROP TABLE history").execute(&pool).await.unwrap();
        let processor = BatchProcessor::new(pool, &ImportConfig::default());

        let outcome = processor
            .process(1, vec![spotify("A", "B", 30_000, Utc::now())])
            .await;
        assert!(outcome.failed);
        assert_eq!(outcome.inserted, 0);
    }
}
