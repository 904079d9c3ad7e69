use chrono::{DateTime, NaiveDateTime, TimeZone as _, Utc};
use tracing::warn;

// ── Epoch conversion ──────────────────────────────────────────────────────────

/// Convert integer epoch seconds into a UTC [`DateTime`].
///
/// Returns `None` when the value is outside chrono's representable range.
pub fn from_epoch_seconds(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

/// Convert fractional epoch seconds, keeping millisecond precision.
pub fn from_epoch_seconds_f64(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    Utc.timestamp_millis_opt((secs * 1000.0).round() as i64)
        .single()
}

// ── String parsing ────────────────────────────────────────────────────────────

/// Parse a timestamp string into a UTC [`DateTime`].
///
/// Accepts RFC 3339 (with `Z` or a fixed offset), naive ISO-like forms which
/// are read as UTC, and plain epoch seconds written as a string.
/// Returns `None` for empty strings or unrecognised formats.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(secs) = s.parse::<i64>() {
        return from_epoch_seconds(secs);
    }

    // Replace trailing 'Z' with '+00:00'.
    let normalised = if let Some(stripped) = s.strip_suffix('Z') {
        format!("{}+00:00", stripped)
    } else {
        s.to_string()
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(&normalised) {
        return Some(dt.with_timezone(&Utc));
    }

    const FMTS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];
    for fmt in FMTS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }

    warn!("could not parse timestamp \"{}\"", s);
    None
}

// ── Serde adapter ─────────────────────────────────────────────────────────────

/// Serde adapter for event timestamps.
///
/// Deserializes integer or fractional epoch seconds and any string accepted by
/// [`parse_timestamp`]; serializes as integer epoch seconds.
pub mod epoch_seconds {
    use chrono::{DateTime, Utc};
    use serde::de::{self, Deserializer, Visitor};
    use serde::Serializer;
    use std::fmt;

    pub fn serialize<S>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(dt.timestamp())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(TimestampVisitor)
    }

    struct TimestampVisitor;

    impl<'de> Visitor<'de> for TimestampVisitor {
        type Value = DateTime<Utc>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("epoch seconds or an RFC 3339 timestamp")
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
            super::from_epoch_seconds(v)
                .ok_or_else(|| E::custom(format!("epoch seconds out of range: {v}")))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
            let secs = i64::try_from(v)
                .map_err(|_| E::custom(format!("epoch seconds out of range: {v}")))?;
            self.visit_i64(secs)
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
            super::from_epoch_seconds_f64(v)
                .ok_or_else(|| E::custom(format!("epoch seconds out of range: {v}")))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            super::parse_timestamp(v)
                .ok_or_else(|| E::custom(format!("invalid timestamp: {v}")))
        }
    }
}

// ── Display ───────────────────────────────────────────────────────────────────

/// Format a UTC [`DateTime`] as `HH:MM:SS`.
pub fn format_clock_time(dt: &DateTime<Utc>) -> String {
    dt.format("%H:%M:%S").to_string()
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_epoch_seconds() {
        let dt = from_epoch_seconds(1_700_000_000).expect("in range");
        assert_eq!(dt.to_rfc3339(), "2023-11-14T22:13:20+00:00");
    }

    #[test]
    fn test_from_epoch_seconds_out_of_range() {
        assert!(from_epoch_seconds(i64::MAX).is_none());
    }

    #[test]
    fn test_from_epoch_seconds_f64_keeps_millis() {
        let dt = from_epoch_seconds_f64(1.25).expect("in range");
        assert_eq!(dt.timestamp_millis(), 1250);
        assert!(from_epoch_seconds_f64(f64::NAN).is_none());
    }

    #[test]
    fn test_parse_timestamp_z_suffix() {
        let dt = parse_timestamp("2024-03-01T12:00:05Z").expect("valid");
        assert_eq!(dt.timestamp(), 1_709_294_405);
    }

    #[test]
    fn test_parse_timestamp_with_offset() {
        let dt = parse_timestamp("2024-03-01T14:00:05+02:00").expect("valid");
        assert_eq!(dt.timestamp(), 1_709_294_405);
    }

    #[test]
    fn test_parse_timestamp_naive_is_utc() {
        let dt = parse_timestamp("2024-03-01 12:00:05").expect("valid");
        assert_eq!(dt.timestamp(), 1_709_294_405);
    }

    #[test]
    fn test_parse_timestamp_numeric_string() {
        let dt = parse_timestamp("42").expect("valid");
        assert_eq!(dt.timestamp(), 42);
    }

    #[test]
    fn test_parse_timestamp_empty_returns_none() {
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("   ").is_none());
    }

    #[test]
    fn test_parse_timestamp_garbage_returns_none() {
        assert!(parse_timestamp("yesterday-ish").is_none());
    }

    #[test]
    fn test_format_clock_time() {
        let dt = from_epoch_seconds(3_723).expect("in range");
        assert_eq!(format_clock_time(&dt), "01:02:03");
    }
}
