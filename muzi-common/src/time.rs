//! Timestamp utilities
//!
//! Listen timestamps are stored as Unix microseconds (UTC) so the `history`
//! uniqueness constraint compares exact integers and the duplicate window
//! query is a plain integer range.

use chrono::{DateTime, TimeZone, Utc};

/// Convert a timestamp to its storage form (Unix microseconds)
pub fn to_storage_micros(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

/// Convert a stored Unix-microsecond value back to a UTC timestamp
pub fn from_storage_micros(micros: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_micros(micros).single()
}

/// Parse an RFC 3339 timestamp with optional fractional seconds
/// (e.g. `2023-04-01T12:30:45Z`, `2023-04-01T12:30:45.123Z`)
pub fn parse_rfc3339(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Parse a decimal Unix epoch in seconds (e.g. `"1700000000"`)
pub fn parse_unix_seconds(raw: &str) -> Option<DateTime<Utc>> {
    let secs: i64 = raw.trim().parse().ok()?;
    Utc.timestamp_opt(secs, 0).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_round_trip_keeps_sub_second_precision() {
        let ts = parse_rfc3339("2021-03-04T05:06:07.891234Z").unwrap();
        let micros = to_storage_micros(&ts);
        assert_eq!(micros % 1_000_000, 891_234);
        assert_eq!(from_storage_micros(micros), Some(ts));
    }

    #[test]
    fn test_parse_rfc3339_accepts_offsets() {
        let with_offset = parse_rfc3339("2021-03-04T07:06:07+02:00").unwrap();
        let utc = parse_rfc3339("2021-03-04T05:06:07Z").unwrap();
        assert_eq!(with_offset, utc);
    }

    #[test]
    fn test_parse_rfc3339_rejects_garbage() {
        assert!(parse_rfc3339("").is_none());
        assert!(parse_rfc3339("yesterday").is_none());
        assert!(parse_rfc3339("2021-03-04 05:06:07").is_none());
    }

    #[test]
    fn test_parse_unix_seconds() {
        let ts = parse_unix_seconds("1700000000").unwrap();
        assert_eq!(ts.timestamp(), 1_700_000_000);
        assert!(parse_unix_seconds("17e8").is_none());
        assert!(parse_unix_seconds("").is_none());
        assert!(parse_unix_seconds("12.5").is_none());
    }
}
