//! Core types shared by every substrate.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rill_protocol::content_type::is_json_content_type;
use rill_protocol::expiry;
use rill_protocol::offset::{format_offset, Offset};

/// A message returned from a read or a resolved wait.
#[derive(Debug, Clone)]
pub struct StreamMessage {
    /// Raw message bytes in the stream's internal representation.
    pub data: Bytes,
    /// The offset the bytes start at, canonical form.
    pub offset: String,
    /// When the message was produced (milliseconds since epoch).
    pub timestamp: i64,
}

/// Stream metadata.
///
/// This is the record persisted by every substrate: a row in the row-store
/// variants, the JSON `meta` object in the two-object variants. The next
/// offset is stored redundantly so reads never have to touch the data
/// blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamMeta {
    /// MIME type fixed at creation.
    pub content_type: Option<String>,
    /// Relative TTL in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<u64>,
    /// Absolute expiry timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Creation time, milliseconds since epoch.
    pub created_at: i64,
    /// Canonical next offset: `(append_count, buffer length)`.
    pub next_offset: String,
    /// Sequence token of the most recent coordinated append.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seq: Option<String>,
    /// Number of committed appends.
    pub append_count: u64,
}

impl StreamMeta {
    /// Fresh metadata for an empty stream.
    pub fn new(
        content_type: Option<String>,
        ttl_seconds: Option<u64>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            content_type,
            ttl_seconds,
            expires_at,
            created_at: Utc::now().timestamp_millis(),
            next_offset: format_offset(0, 0),
            last_seq: None,
            append_count: 0,
        }
    }

    /// Whether the stream's TTL or absolute expiry has elapsed.
    pub fn is_expired(&self) -> bool {
        expiry::is_expired(self.created_at, self.ttl_seconds, self.expires_at)
    }

    /// Whether the stream uses the JSON stitching convention.
    pub fn is_json(&self) -> bool {
        self.content_type
            .as_deref()
            .map(is_json_content_type)
            .unwrap_or(false)
    }

    /// The parsed next offset.
    pub fn next(&self) -> Offset {
        Offset::parse(&self.next_offset).unwrap_or(Offset::ZERO)
    }
}

/// Attributes of a `put` request.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub content_type: Option<String>,
    pub ttl_seconds: Option<u64>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Optional initial payload.
    pub data: Option<Bytes>,
}

/// Result of a `put`.
#[derive(Debug, Clone)]
pub struct PutOutcome {
    /// Whether a stream was created (`false` on an idempotent match).
    pub created: bool,
    pub next_offset: String,
}

/// Attributes of an `append` request.
#[derive(Debug, Clone, Default)]
pub struct AppendOptions {
    /// Declared content type; must match the stream's when present.
    pub content_type: Option<String>,
    /// Opaque monotonic writer-coordination token.
    pub seq: Option<String>,
}

/// Result of a snapshot read.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub messages: Vec<StreamMessage>,
    pub next_offset: String,
    /// Always `true` for snapshot reads.
    pub up_to_date: bool,
    /// Current cursor interval.
    pub cursor: u64,
    /// ETag covering `(path, request offset, next offset)`.
    pub etag: String,
    pub content_type: Option<String>,
}

/// Result of a metadata-only read.
#[derive(Debug, Clone)]
pub struct StreamHead {
    pub content_type: Option<String>,
    pub next_offset: String,
    /// ETag covering `(path, initial offset, next offset)`.
    pub etag: String,
}

/// Result of a timed wait.
#[derive(Debug, Clone)]
pub struct WaitOutcome {
    /// Empty on timeout or stream deletion.
    pub messages: Vec<StreamMessage>,
    pub timed_out: bool,
}

/// Stream lifecycle event for hooks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamLifecycleEvent {
    Created {
        path: String,
        content_type: Option<String>,
        timestamp: i64,
    },
    Deleted {
        path: String,
        timestamp: i64,
    },
}
