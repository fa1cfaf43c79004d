//! Minimum-quality filter applied to every batch before duplicate resolution

use crate::models::ListenEvent;

/// Drops short plays and events without a track or artist name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidityFilter {
    min_play_ms: i64,
}

impl ValidityFilter {
    pub fn new(min_play_ms: i64) -> Self {
        Self { min_play_ms }
    }

    /// Whether `event` may be imported
    ///
    /// The play-time floor only applies to platforms that report duration.
    pub fn is_valid(&self, event: &ListenEvent) -> bool {
        if event.song_name.is_empty() || event.artist.is_empty() {
            return false;
        }
        !event.platform.reports_duration() || event.played_ms >= self.min_play_ms
    }

    /// Keep valid events, preserving order
    pub fn apply(&self, events: Vec<ListenEvent>) -> Vec<ListenEvent> {
        events.into_iter().filter(|e| self.is_valid(e)).collect()
    }
}
