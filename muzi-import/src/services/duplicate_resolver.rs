//! Windowed duplicate detection
//!
//! Two listens of the same `(artist, song_name)` less than the duplicate
//! window apart are the same listen. A batch is checked against itself (the
//! first occurrence wins) and against persisted history, which is fetched
//! with one range query per batch covering `[min_ts - window, max_ts + window]`.
//!
//! The `history` uniqueness constraint remains the authoritative guard; this
//! only keeps most duplicates from reaching the writer.

use muzi_common::time::to_storage_micros;
use muzi_common::Result;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};

use crate::db::{self, StoredListen};
use crate::models::{ListenEvent, ListenKey};

/// Duplicates found in one batch, by position
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DuplicateSet {
    positions: HashSet<usize>,
    keys: Vec<ListenKey>,
    in_batch: usize,
    persisted: usize,
}

impl DuplicateSet {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Whether the event at `position` of the resolved batch is a duplicate
    pub fn contains(&self, position: usize) -> bool {
        self.positions.contains(&position)
    }

    /// Keys of the excluded events, in batch order
    pub fn keys(&self) -> &[ListenKey] {
        &self.keys
    }

    /// Excluded because of an earlier event in the same batch
    pub fn in_batch(&self) -> usize {
        self.in_batch
    }

    /// Excluded because of persisted history
    pub fn persisted(&self) -> usize {
        self.persisted
    }

    /// Lazily yield the events of `batch` that are not duplicates
    ///
    /// `batch` must be the slice this set was resolved from, in the same order.
    pub fn retain(&self, batch: Vec<ListenEvent>) -> impl Iterator<Item = ListenEvent> + '_ {
        batch
            .into_iter()
            .enumerate()
            .filter(move |(position, _)| !self.contains(*position))
            .map(|(_, event)| event)
    }

    fn mark(&mut self, position: usize, key: ListenKey, persisted: bool) {
        if self.positions.insert(position) {
            self.keys.push(key);
            if persisted {
                self.persisted += 1;
            } else {
                self.in_batch += 1;
            }
        }
    }
}

/// Queries persisted history and classifies a batch
#[derive(Clone)]
pub struct DuplicateResolver {
    db: SqlitePool,
    window_us: i64,
}

impl DuplicateResolver {
    pub fn new(db: SqlitePool, window: chrono::Duration) -> Self {
        Self {
            db,
            window_us: window.num_microseconds().unwrap_or(i64::MAX),
        }
    }

    /// Find the events of `batch` that must not be persisted for `user_id`
    pub async fn resolve(&self, user_id: i64, batch: &[ListenEvent]) -> Result<DuplicateSet> {
        let Some((min_us, max_us)) = time_range(batch) else {
            return Ok(DuplicateSet::default());
        };

        let persisted = db::fetch_window(
            &self.db,
            user_id,
            min_us.saturating_sub(self.window_us),
            max_us.saturating_add(self.window_us),
        )
        .await?;

        let duplicates = find_duplicates(batch, &persisted, self.window_us);
        tracing::debug!(
            user_id,
            batch = batch.len(),
            persisted_in_range = persisted.len(),
            in_batch = duplicates.in_batch(),
            against_history = duplicates.persisted(),
            "Resolved duplicates"
        );
        Ok(duplicates)
    }
}

/// `(min, max)` of the batch timestamps in storage micros
fn time_range(batch: &[ListenEvent]) -> Option<(i64, i64)> {
    batch
        .iter()
        .map(|e| to_storage_micros(&e.timestamp))
        .fold(None, |range, ts| match range {
            None => Some((ts, ts)),
            Some((lo, hi)) => Some((lo.min(ts), hi.max(ts))),
        })
}

fn within_window(timestamps: &[i64], ts: i64, window_us: i64) -> bool {
    timestamps
        .iter()
        .any(|&other| (ts as i128 - other as i128).abs() < window_us as i128)
}

/// Classify `batch` against itself and the `persisted` rows in its range
pub fn find_duplicates(batch: &[ListenEvent], persisted: &[StoredListen], window_us: i64) -> DuplicateSet {
    let mut history: HashMap<(&str, &str), Vec<i64>> = HashMap::new();
    for row in persisted {
        history
            .entry((row.artist.as_str(), row.song_name.as_str()))
            .or_default()
            .push(row.timestamp_us);
    }

    let mut duplicates = DuplicateSet::default();
    let mut seen: HashSet<ListenKey> = HashSet::with_capacity(batch.len());
    let mut accepted: HashMap<(&str, &str), Vec<i64>> = HashMap::new();

    for (position, event) in batch.iter().enumerate() {
        let key = event.key();
        let track = (event.artist.as_str(), event.song_name.as_str());

        if !seen.insert(key.clone()) {
            duplicates.mark(position, key, false);
            continue;
        }

        if accepted
            .get(&track)
            .is_some_and(|ts| within_window(ts, key.timestamp_us, window_us))
        {
            duplicates.mark(position, key, false);
            continue;
        }

        if history
            .get(&track)
            .is_some_and(|ts| within_window(ts, key.timestamp_us, window_us))
        {
            duplicates.mark(position, key, true);
            continue;
        }

        accepted.entry(track).or_default().push(key.timestamp_us);
    }

    duplicates
}
