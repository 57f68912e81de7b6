//! Timestamp encoding for stored rows.
//!
//! Every timestamp is written as fixed-width RFC 3339 UTC text with
//! microsecond precision, so SQLite text comparison orders them by time.
//! Keyset pagination and `since` checkpoints rely on that.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, SubsecRound, Utc};
use tracing::warn;

pub fn format_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current time at storage precision.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub fn now_text() -> String {
    format_time(now())
}

/// Parse a stored timestamp. Rows written by older tooling may carry
/// SQLite's `datetime('now')` format, so that is accepted too.
pub fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>().ok().or_else(|| {
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
            .map(|ndt| ndt.and_utc())
            .ok()
    })
}

/// Like [`parse_time`], but logs and falls back to the epoch for corrupt
/// values instead of failing the whole query.
pub fn parse_time_lossy(raw: &str, what: &str) -> DateTime<Utc> {
    parse_time(raw).unwrap_or_else(|| {
        warn!("Corrupt timestamp '{}' on {}", raw, what);
        DateTime::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn formatted_times_sort_lexicographically() {
        let a = Utc.with_ymd_and_hms(2024, 1, 9, 23, 59, 59).unwrap();
        let b = a + chrono::Duration::microseconds(1);
        let c = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        let (fa, fb, fc) = (format_time(a), format_time(b), format_time(c));
        assert_eq!(fa.len(), fc.len());
        assert!(fa < fb && fb < fc);
        assert!(fa.ends_with('Z'));
    }

    #[test]
    fn parses_both_stored_formats() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        assert_eq!(parse_time(&format_time(at)), Some(at));
        assert_eq!(parse_time("2024-05-01 12:30:00"), Some(at));
        assert_eq!(parse_time("yesterday"), None);
    }

    #[test]
    fn now_survives_a_storage_round_trip() {
        let at = now();
        assert_eq!(at.timestamp_subsec_nanos() % 1_000, 0);
        assert_eq!(parse_time(&format_time(at)), Some(at));
    }

    #[test]
    fn lossy_parse_defaults_to_epoch() {
        assert_eq!(parse_time_lossy("garbage", "test row"), DateTime::<Utc>::default());
    }
}
