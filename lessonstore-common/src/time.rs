//! Timestamp utilities
//!
//! Store timestamps are written as RFC 3339 UTC strings with microsecond
//! precision. Rows created by SQLite defaults use `YYYY-MM-DD HH:MM:SS`.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Format a timestamp the way the store writes it
pub fn to_store(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current timestamp in store format
pub fn now_store() -> String {
    to_store(now())
}

/// Parse a stored timestamp in either RFC 3339 or SQLite `CURRENT_TIMESTAMP` form
pub fn parse_store(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_now_returns_valid_timestamp() {
        let timestamp = now();
        assert!(timestamp.timestamp() > 946_684_800); // 2000-01-01 00:00:00 UTC
    }

    #[test]
    fn test_store_format_round_trips() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let text = to_store(ts);
        assert_eq!(text, "2024-03-01T12:30:00.000000Z");
        assert_eq!(parse_store(&text), Some(ts));
    }

    #[test]
    fn test_parse_sqlite_current_timestamp() {
        let parsed = parse_store("2024-03-01 12:30:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap());
    }

    #[test]
    fn test_parse_garbage_is_none() {
        assert!(parse_store("yesterday").is_none());
        assert!(parse_store("").is_none());
    }

    #[test]
    fn test_store_format_sorts_chronologically() {
        let earlier = to_store(Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap());
        let later = to_store(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert!(earlier < later);
    }
}
