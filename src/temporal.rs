// ⏰ Temporal Comparator - timestamp parsing, storage and equality
//
// The provider sends timestamps as ISO-8601-ish text, sometimes with an
// offset, sometimes without, sometimes with microseconds. Stored values come
// back through RFC 3339 text. Equality must survive those round trips.

use chrono::{DateTime, FixedOffset, Local, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, TimeZone, Utc};

/// Business timestamp as carried by Object records.
pub type Timestamp = DateTime<FixedOffset>;

/// Formats accepted when the text carries an explicit offset.
const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%z",
];

/// Formats accepted for naive (offset-less) text. Interpreted as UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

// ============================================================================
// EQUALITY
// ============================================================================

/// Semantic equality of two optional timestamps.
///
/// - both absent: equal
/// - exactly one absent: not equal
/// - both present: equal when they fall in the same whole second once the
///   offset is normalized away
pub fn timestamps_equal(a: Option<&Timestamp>, b: Option<&Timestamp>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.timestamp() == b.timestamp(),
        _ => false,
    }
}

// ============================================================================
// PARSING / STORAGE
// ============================================================================

/// Parse provider text into a timestamp. `None` for anything unrecognised.
pub fn parse_timestamp(text: &str) -> Option<Timestamp> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts);
    }

    for fmt in OFFSET_FORMATS {
        if let Ok(ts) = DateTime::parse_from_str(text, fmt) {
            return Some(ts);
        }
    }

    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(naive.and_utc().fixed_offset());
        }
    }

    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .map(|date| date.and_time(NaiveTime::MIN).and_utc().fixed_offset())
}

/// Text form written to the store. Keeps the original offset.
pub fn to_storage(ts: &Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, false)
}

/// Inverse of [`to_storage`]. Lenient: unreadable text reads back as absent.
pub fn from_storage(text: Option<String>) -> Option<Timestamp> {
    text.as_deref().and_then(parse_timestamp)
}

/// Bookkeeping timestamp (`created_at` / `updated_at`).
///
/// Fixed-width UTC so that text comparison in SQL orders correctly.
pub fn bookkeeping(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Start of the current local day, as a UTC instant.
pub fn start_of_local_day(now: DateTime<Local>) -> DateTime<Utc> {
    let midnight = now.date_naive().and_time(NaiveTime::MIN);
    match Local.from_local_datetime(&midnight) {
        LocalResult::Single(t) | LocalResult::Ambiguous(t, _) => t.with_timezone(&Utc),
        // Midnight skipped by a DST jump
        LocalResult::None => midnight.and_utc(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ts(text: &str) -> Timestamp {
        parse_timestamp(text).unwrap()
    }

    #[test]
    fn test_both_absent_equal() {
        assert!(timestamps_equal(None, None));
    }

    #[test]
    fn test_one_absent_not_equal() {
        let t = ts("2024-01-01T00:00:00");
        assert!(!timestamps_equal(None, Some(&t)));
        assert!(!timestamps_equal(Some(&t), None));
    }

    #[test]
    fn test_same_timestamp_equal() {
        let t = ts("2024-01-01T12:30:45");
        assert!(timestamps_equal(Some(&t), Some(&t)));
    }

    #[test]
    fn test_sub_second_noise_ignored() {
        let t = ts("2024-01-01T12:30:45");
        let later = t + Duration::milliseconds(500);
        assert!(timestamps_equal(Some(&t), Some(&later)));

        let micro = ts("2024-01-01T12:30:45.123456");
        assert!(timestamps_equal(Some(&t), Some(&micro)));
    }

    #[test]
    fn test_different_seconds_not_equal() {
        let a = ts("2024-01-01T12:30:45");
        let b = ts("2024-01-01T12:30:46");
        assert!(!timestamps_equal(Some(&a), Some(&b)));
    }

    #[test]
    fn test_same_instant_different_zones_equal() {
        let utc = ts("2024-01-01T15:00:00+00:00");
        let sao_paulo = ts("2024-01-01T12:00:00-03:00");
        assert!(timestamps_equal(Some(&utc), Some(&sao_paulo)));
    }

    #[test]
    fn test_parse_accepts_provider_shapes() {
        assert!(parse_timestamp("2024-01-02T03:04:05").is_some());
        assert!(parse_timestamp("2024-01-02 03:04:05").is_some());
        assert!(parse_timestamp("2024-01-02T03:04:05.123").is_some());
        assert!(parse_timestamp("2024-01-02T03:04:05Z").is_some());
        assert!(parse_timestamp("2024-01-02T03:04:05-03:00").is_some());
        assert!(parse_timestamp("2024-01-02 03:04:05+0000").is_some());
        assert!(parse_timestamp("2024-01-02").is_some());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("   ").is_none());
        assert!(parse_timestamp("not a date").is_none());
        assert!(parse_timestamp("2024-13-45T99:00:00").is_none());
    }

    #[test]
    fn test_naive_is_utc() {
        let t = ts("2024-01-02T03:04:05");
        assert_eq!(t.offset().local_minus_utc(), 0);
        assert_eq!(t.timestamp(), ts("2024-01-02T03:04:05Z").timestamp());
    }

    #[test]
    fn test_storage_round_trip_keeps_offset() {
        let t = ts("2024-06-01T08:00:00.250-03:00");
        let back = from_storage(Some(to_storage(&t))).unwrap();
        assert_eq!(back, t);
        assert_eq!(back.offset().local_minus_utc(), -3 * 3600);
    }

    #[test]
    fn test_bookkeeping_is_fixed_width() {
        let a = bookkeeping(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let b = bookkeeping(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 1).unwrap());
        assert_eq!(a, "2024-01-01T00:00:00.000000Z");
        assert_eq!(a.len(), b.len());
        assert!(a < b);
    }

    #[test]
    fn test_start_of_local_day_not_after_now() {
        let now = Local::now();
        let start = start_of_local_day(now);
        assert!(start <= now.with_timezone(&Utc));
        assert!(now.with_timezone(&Utc) - start < Duration::hours(26));
    }
}
