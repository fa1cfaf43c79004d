//! Listen events: one play of one track by one user

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Origin of a listen event, always set by the decoder that produced it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Spotify extended streaming history export
    Spotify,
    /// LastFM-style scrobble API
    #[serde(rename = "lastfm")]
    LastFm,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Spotify => "spotify",
            Platform::LastFm => "lastfm",
        }
    }

    /// Whether the source reports how long the track was played
    pub fn reports_duration(self) -> bool {
        matches!(self, Platform::Spotify)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One play record from any source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenEvent {
    pub user_id: i64,
    pub timestamp: DateTime<Utc>,
    pub song_name: String,
    pub artist: String,
    pub album_name: Option<String>,
    /// Milliseconds played; 0 when the source does not report it
    pub played_ms: i64,
    pub platform: Platform,
}

impl ListenEvent {
    /// Canonical key used for in-batch duplicate detection
    pub fn key(&self) -> ListenKey {
        ListenKey {
            artist: self.artist.clone(),
            song_name: self.song_name.clone(),
            timestamp_us: muzi_common::time::to_storage_micros(&self.timestamp),
        }
    }
}

/// `(artist, song_name, normalized timestamp)`
///
/// The timestamp is normalized to UTC microseconds, the same precision the
/// `history` table stores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenKey {
    pub artist: String,
    pub song_name: String,
    pub timestamp_us: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(ts: DateTime<Utc>) -> ListenEvent {
        ListenEvent {
            user_id: 7,
            timestamp: ts,
            song_name: "Song".to_string(),
            artist: "Artist".to_string(),
            album_name: None,
            played_ms: 30_000,
            platform: Platform::Spotify,
        }
    }

    #[test]
    fn test_platform_serialization() {
        assert_eq!(serde_json::to_string(&Platform::Spotify).unwrap(), "\"spotify\"");
        assert_eq!(serde_json::to_string(&Platform::LastFm).unwrap(), "\"lastfm\"");
        assert_eq!(Platform::LastFm.to_string(), "lastfm");
        assert!(Platform::Spotify.reports_duration());
        assert!(!Platform::LastFm.reports_duration());
    }

    #[test]
    fn test_key_normalizes_timezone() {
        let utc = Utc.with_ymd_and_hms(2022, 1, 1, 12, 0, 0).unwrap();
        let from_offset = chrono::DateTime::parse_from_rfc3339("2022-01-01T14:00:00+02:00")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(event(utc).key(), event(from_offset).key());
    }

    #[test]
    fn test_key_distinguishes_sub_second_timestamps() {
        let a = Utc.timestamp_micros(1_000_000).unwrap();
        let b = Utc.timestamp_micros(1_000_001).unwrap();
        assert_ne!(event(a).key(), event(b).key());
    }
}
