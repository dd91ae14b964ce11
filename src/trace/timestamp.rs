//! Radio timestamp parsing.
//!
//! Overheard packets carry a wall-clock-like timestamp of the form
//! `[MM.SS.mmm.uuu]` (minutes, seconds, milliseconds, microseconds) that
//! wraps at the top of every hour. Parsed values are seconds since the
//! start of the current hour and are only meaningful relative to each
//! other within one wrap period.

use std::sync::LazyLock;

use regex::Regex;

/// Trace timestamp in seconds since the start of the (wrapping) hour.
pub type TraceTime = f64;

/// Match: "[MM.SS.mmm.uuu]"
static TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[(\d{1,2})\.(\d{1,2})\.(\d{1,3})\.(\d{1,3})\]$").expect("Invalid timestamp regex")
});

/// Errors produced while decoding a packet timestamp.
///
/// These are recovered locally by the trace parser (the record is skipped);
/// they never abort ingestion.
#[derive(Debug, thiserror::Error)]
pub enum TimestampParseError {
    #[error("invalid timestamp format: {0}")]
    InvalidFormat(String),
    #[error("timestamp field out of range in {0}")]
    FieldOutOfRange(String),
}

/// Parse a `[MM.SS.mmm.uuu]` timestamp into seconds since the hour start.
pub fn parse_timestamp(s: &str) -> Result<TraceTime, TimestampParseError> {
    let caps = TIMESTAMP
        .captures(s.trim())
        .ok_or_else(|| TimestampParseError::InvalidFormat(s.to_string()))?;

    // The regex guarantees digits; width caps the values well below u32 range.
    let minutes: u32 = caps[1].parse().unwrap();
    let seconds: u32 = caps[2].parse().unwrap();
    let millis: u32 = caps[3].parse().unwrap();
    let micros: u32 = caps[4].parse().unwrap();

    if minutes > 59 || seconds > 59 {
        return Err(TimestampParseError::FieldOutOfRange(s.to_string()));
    }

    Ok(minutes as f64 * 60.0
        + seconds as f64
        + millis as f64 / 1_000.0
        + micros as f64 / 1_000_000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp() {
        let ts = parse_timestamp("[12.34.567.890]").unwrap();
        let expected = 12.0 * 60.0 + 34.0 + 0.567 + 0.000890;
        assert!((ts - expected).abs() < 1e-9);
    }

    #[test]
    fn test_parse_timestamp_zero() {
        assert_eq!(parse_timestamp("[0.0.0.0]").unwrap(), 0.0);
    }

    #[test]
    fn test_invalid_format_rejected() {
        assert!(parse_timestamp("12.34.567.890").is_err());
        assert!(parse_timestamp("[12.34.567]").is_err());
        assert!(parse_timestamp("[aa.bb.cc.dd]").is_err());
        assert!(parse_timestamp("").is_err());
    }

    #[test]
    fn test_out_of_range_rejected() {
        assert!(parse_timestamp("[60.00.000.000]").is_err());
        assert!(parse_timestamp("[00.61.000.000]").is_err());
    }

    #[test]
    fn test_ordering_within_hour() {
        let early = parse_timestamp("[5.00.000.000]").unwrap();
        let late = parse_timestamp("[5.00.016.000]").unwrap();
        assert!((late - early - 0.016).abs() < 1e-9);
    }
}
