//! Wire header and query-parameter names.

/// Response header carrying the canonical next offset.
pub const STREAM_NEXT_OFFSET: &str = "Stream-Next-Offset";

/// Response header carrying the decimal cursor.
pub const STREAM_CURSOR: &str = "Stream-Cursor";

/// Response header: literal `true` or `false`.
pub const STREAM_UP_TO_DATE: &str = "Stream-Up-To-Date";

/// Request header carrying an opaque monotonic sequence token on append.
pub const STREAM_SEQ: &str = "Stream-Seq";

/// Request header carrying a relative TTL in seconds on create.
pub const STREAM_TTL: &str = "Stream-TTL";

/// Request header carrying an absolute expiry timestamp on create.
pub const STREAM_EXPIRES_AT: &str = "Stream-Expires-At";

/// Content type assumed on create when the request names none.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// `offset` query parameter.
pub const QUERY_OFFSET: &str = "offset";

/// `live` query parameter (`sse` or `long-poll`).
pub const QUERY_LIVE: &str = "live";

/// `cursor` query parameter.
pub const QUERY_CURSOR: &str = "cursor";
