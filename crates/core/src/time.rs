//! ISO-8601 helpers shared by the scheduler and the service layer.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

use crate::error::CoreError;

/// Zone-less layouts accepted after RFC 3339 fails. Interpreted as UTC.
const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"];

/// Parse an ISO-8601 instant such as `2024-01-15T14:30:00.000Z`.
///
/// Accepts any RFC 3339 offset, and a bare `YYYY-MM-DDTHH:MM:SS[.fff]`
/// which is taken to be UTC.
pub fn parse_timestamp(input: &str) -> Result<DateTime<Utc>, CoreError> {
    let trimmed = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Ok(naive.and_utc());
        }
    }
    Err(CoreError::InvalidTimestamp(input.to_string()))
}

/// Millisecond-precision UTC timestamp, e.g. `2024-01-15T14:30:00.123Z`.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}
