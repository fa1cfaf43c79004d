//! Spotify extended streaming history decoder
//!
//! Each export file is a JSON array of play records. Only the fields below
//! are read; everything else in a record is ignored.

use chrono::{DateTime, Utc};
use muzi_common::time::parse_rfc3339;
use serde::de::IgnoredAny;
use serde::Deserialize;
use tracing::{debug, warn};

use super::SourceError;
use crate::models::{ListenEvent, Platform};

/// `ts` is an RFC 3339 string; any other JSON value excludes the record
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TimestampField {
    Text(String),
    Other(IgnoredAny),
}

/// One record of an export file
#[derive(Debug, Deserialize)]
struct ExportRecord {
    #[serde(default)]
    ts: Option<TimestampField>,
    #[serde(default)]
    ms_played: Option<i64>,
    master_metadata_track_name: Option<String>,
    master_metadata_album_artist_name: Option<String>,
    master_metadata_album_album_name: Option<String>,
}

impl ExportRecord {
    fn into_event(self, user_id: i64) -> Option<ListenEvent> {
        let timestamp: DateTime<Utc> = match self.ts? {
            TimestampField::Text(raw) => parse_rfc3339(&raw)?,
            TimestampField::Other(_) => return None,
        };
        Some(ListenEvent {
            user_id,
            timestamp,
            song_name: self.master_metadata_track_name.unwrap_or_default(),
            artist: self.master_metadata_album_artist_name.unwrap_or_default(),
            album_name: self.master_metadata_album_album_name.filter(|a| !a.is_empty()),
            played_ms: self.ms_played.unwrap_or(0),
            platform: Platform::Spotify,
        })
    }
}

/// Result of decoding one export buffer
#[derive(Debug, Default)]
pub struct ExportDecode {
    /// Events in file order
    pub events: Vec<ListenEvent>,
    /// Records dropped because their timestamp did not parse
    pub excluded: usize,
}

/// Decode one export buffer
///
/// A buffer that is not a JSON array of records fails as a whole. A record
/// with a missing, mistyped or unparseable `ts` is dropped and counted in
/// `excluded`.
pub fn decode_export(bytes: &[u8], user_id: i64) -> Result<ExportDecode, SourceError> {
    let records: Vec<ExportRecord> = serde_json::from_slice(bytes)?;

    let mut decoded = ExportDecode {
        events: Vec::with_capacity(records.len()),
        excluded: 0,
    };
    for record in records {
        match record.into_event(user_id) {
            Some(event) => decoded.events.push(event),
            None => decoded.excluded += 1,
        }
    }
    Ok(decoded)
}

/// Spotify exports ship video plays in separate files that repeat audio plays
pub fn is_video_history(file_name: &str) -> bool {
    file_name.contains("Video")
}

/// Outcome of decoding a set of export buffers
#[derive(Debug, Default)]
pub struct ExportDecodeReport {
    /// Events from every decoded buffer, concatenated in input order
    pub events: Vec<ListenEvent>,
    pub excluded: usize,
    pub decoded_files: usize,
    /// Video history files that were not decoded
    pub skipped_files: Vec<String>,
    /// Buffers rejected as a whole
    pub failures: Vec<(String, SourceError)>,
}

impl ExportDecodeReport {
    /// True when buffers were supplied and none of them decoded
    pub fn all_failed(&self) -> bool {
        self.decoded_files == 0 && !self.failures.is_empty()
    }
}

/// Decode named export buffers, skipping video history files
pub fn decode_exports<'a, I>(buffers: I, user_id: i64) -> ExportDecodeReport
where
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    let mut report = ExportDecodeReport::default();

    for (name, bytes) in buffers {
        if is_video_history(name) {
            debug!(file = name, "Skipping video history file");
            report.skipped_files.push(name.to_string());
            continue;
        }

        match decode_export(bytes, user_id) {
            Ok(decoded) => {
                debug!(
                    file = name,
                    events = decoded.events.len(),
                    excluded = decoded.excluded,
                    "Decoded export file"
                );
                report.decoded_files += 1;
                report.excluded += decoded.excluded;
                report.events.extend(decoded.events);
            }
            Err(e) => {
                warn!(file = name, error = %e, "Rejected export file");
                report.failures.push((name.to_string(), e));
            }
        }
    }

    report
}

/// `decode_exports` over owned buffers, run on the blocking thread pool
///
/// Decoding is CPU-bound and an upload may hold hundreds of MiB of JSON.
pub async fn decode_exports_blocking(
    files: Vec<(String, Vec<u8>)>,
    user_id: i64,
) -> Result<ExportDecodeReport, tokio::task::JoinError> {
    tokio::task::spawn_blocking(move || {
        decode_exports(
            files.iter().map(|(name, data)| (name.as_str(), data.as_slice())),
            user_id,
        )
    })
    .await
}
