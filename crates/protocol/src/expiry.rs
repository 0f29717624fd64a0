//! TTL and absolute-expiry validation.
//!
//! A stream may carry a relative TTL in seconds or an absolute expiry
//! timestamp, never both. TTLs must be positive decimal integers with no
//! leading zeros; expiry timestamps must be ISO 8601 with explicit seconds
//! and an explicit zone (`Z` or `±HH:MM`).

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

static EXPIRES_AT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}[Tt]\d{2}:\d{2}:\d{2}(\.\d+)?([Zz]|[+-]\d{2}:\d{2})$")
        .expect("invalid expires-at pattern")
});

/// Parse a TTL value. Accepts only `[1-9][0-9]*`.
pub fn parse_ttl(value: &str) -> Option<u64> {
    let mut bytes = value.bytes();
    match bytes.next() {
        Some(b'1'..=b'9') => {}
        _ => return None,
    }
    if !bytes.all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

/// Parse an absolute expiry timestamp: strict shape check, then date parse.
pub fn parse_expires_at(value: &str) -> Option<DateTime<Utc>> {
    if !EXPIRES_AT_PATTERN.is_match(value) {
        return None;
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Whether a stream created at `created_at` (ms since epoch) with the given
/// expiry settings has expired.
pub fn is_expired(
    created_at: i64,
    ttl_seconds: Option<u64>,
    expires_at: Option<DateTime<Utc>>,
) -> bool {
    if let Some(expires_at) = expires_at {
        return Utc::now() >= expires_at;
    }
    if let Some(ttl_seconds) = ttl_seconds {
        return Utc::now().timestamp_millis() >= created_at + ttl_seconds as i64 * 1000;
    }
    false
}
