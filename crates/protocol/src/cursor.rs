//! Cursor system for live-reader liveness hints.
//!
//! Time is divided into fixed intervals since a protocol epoch; the cursor
//! is the current interval number. Clients echo it back on reconnect, and a
//! client whose cursor is at or ahead of the server's clock gets a randomly
//! jittered advance so that reconnections spread out after clock skew
//! events rather than arriving in lockstep.

use chrono::{DateTime, Utc};
use rand::Rng;

/// Options for cursor calculation.
#[derive(Debug, Clone)]
pub struct CursorOptions {
    /// Interval duration in seconds (default: 20).
    pub interval_seconds: u64,
    /// Epoch for interval calculation (default: Oct 9, 2024).
    pub epoch: DateTime<Utc>,
}

impl Default for CursorOptions {
    fn default() -> Self {
        Self {
            interval_seconds: 20,
            epoch: DateTime::parse_from_rfc3339("2024-10-09T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        }
    }
}

/// The current interval number.
pub fn calculate_cursor(options: &CursorOptions) -> u64 {
    let elapsed = Utc::now()
        .signed_duration_since(options.epoch)
        .num_seconds()
        .max(0) as u64;
    elapsed / options.interval_seconds
}

/// Produce the cursor to return for a request.
///
/// Without a client cursor, or when the client is behind the current
/// interval, this is the current interval. When the client cursor is at or
/// ahead of it, the client cursor advances by `ceil(uniform(1..=3600 s) /
/// interval)` (at least one interval).
pub fn generate_response_cursor(client_cursor: Option<u64>, options: &CursorOptions) -> u64 {
    let current_interval = calculate_cursor(options);

    match client_cursor {
        Some(cursor) if cursor >= current_interval => {
            let jitter_seconds: u64 = rand::thread_rng().gen_range(1..=3600);
            cursor + jitter_seconds.div_ceil(options.interval_seconds).max(1)
        }
        _ => current_interval,
    }
}

/// Parse a decimal cursor string.
pub fn parse_cursor(cursor: &str) -> Option<u64> {
    cursor.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_calculate_cursor() {
        let options = CursorOptions {
            interval_seconds: 20,
            epoch: Utc::now() - Duration::seconds(100),
        };
        let cursor = calculate_cursor(&options);
        assert!((4..=6).contains(&cursor));
    }

    #[test]
    fn test_no_client_cursor_returns_current() {
        let options = CursorOptions::default();
        let cursor = generate_response_cursor(None, &options);
        assert_eq!(cursor, calculate_cursor(&options));
    }

    #[test]
    fn test_client_behind_returns_current() {
        let options = CursorOptions {
            interval_seconds: 20,
            epoch: Utc::now() - Duration::seconds(10_000),
        };
        let current = calculate_cursor(&options);
        assert_eq!(generate_response_cursor(Some(current - 10), &options), current);
    }

    #[test]
    fn test_client_ahead_gets_jitter() {
        let options = CursorOptions::default();
        let client = calculate_cursor(&options) + 100;

        let result = generate_response_cursor(Some(client), &options);
        assert!(result > client);
        // Jitter is bounded by an hour's worth of intervals.
        assert!(result <= client + 3600_u64.div_ceil(options.interval_seconds));
    }

    #[test]
    fn test_jitter_is_at_least_one_interval() {
        let options = CursorOptions {
            interval_seconds: 7200,
            epoch: Utc::now(),
        };
        let client = calculate_cursor(&options);
        // With an interval longer than the max jitter window, the floor of
        // one interval still applies.
        assert_eq!(generate_response_cursor(Some(client), &options), client + 1);
    }

    #[test]
    fn test_parse_cursor() {
        assert_eq!(parse_cursor("12345"), Some(12345));
        assert_eq!(parse_cursor("not-a-number"), None);
        assert_eq!(parse_cursor("-3"), None);
    }
}
