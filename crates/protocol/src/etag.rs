//! ETag codec for conditional reads.
//!
//! The ETag is the quoted three-field string `"base64(path):start:end"`.
//! Embedding the path makes collisions across streams impossible.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

/// Format the ETag covering `(path, start_offset, end_offset)`.
pub fn format_etag(path: &str, start_offset: &str, end_offset: &str) -> String {
    format!(
        "\"{}:{}:{}\"",
        URL_SAFE_NO_PAD.encode(path.as_bytes()),
        start_offset,
        end_offset
    )
}

/// Parse an ETag back into `(path, start_offset, end_offset)`.
pub fn parse_etag(etag: &str) -> Option<(String, String, String)> {
    let inner = etag.strip_prefix('"')?.strip_suffix('"')?;
    let mut fields = inner.splitn(3, ':');
    let path_b64 = fields.next()?;
    let start = fields.next()?;
    let end = fields.next()?;

    let path_bytes = URL_SAFE_NO_PAD.decode(path_b64).ok()?;
    let path = String::from_utf8(path_bytes).ok()?;
    Some((path, start.to_string(), end.to_string()))
}

/// Whether a client-supplied `If-None-Match` value matches the freshly
/// computed ETag. The comparison is exact string equality.
pub fn etag_matches(if_none_match: &str, computed: &str) -> bool {
    if_none_match == computed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offset::INITIAL;

    #[test]
    fn test_format_is_quoted_three_fields() {
        let etag = format_etag("/s", INITIAL, "0000000000000001_0000000000000005");
        assert!(etag.starts_with('"') && etag.ends_with('"'));
        assert_eq!(etag.matches(':').count(), 2);
    }

    #[test]
    fn test_roundtrip() {
        let end = "0000000000000002_000000000000000b";
        let etag = format_etag("/streams/a:b", INITIAL, end);
        let (path, start, parsed_end) = parse_etag(&etag).unwrap();
        assert_eq!(path, "/streams/a:b");
        assert_eq!(start, INITIAL);
        assert_eq!(parsed_end, end);
    }

    #[test]
    fn test_distinct_paths_never_collide() {
        assert_ne!(
            format_etag("/a", INITIAL, INITIAL),
            format_etag("/b", INITIAL, INITIAL)
        );
    }

    #[test]
    fn test_matches_is_exact() {
        let etag = format_etag("/s", INITIAL, INITIAL);
        assert!(etag_matches(&etag, &etag));
        assert!(!etag_matches(etag.trim_matches('"'), &etag));
    }

    #[test]
    fn test_parse_rejects_unquoted() {
        assert!(parse_etag("abc:0:0").is_none());
    }
}
