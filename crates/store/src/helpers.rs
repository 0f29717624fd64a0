//! Shared substrate logic.
//!
//! Free functions over primitive inputs; substrates call these for every
//! format or validation decision so the semantics stay identical across
//! storage backings.

use bytes::Bytes;
use chrono::Utc;

use rill_protocol::content_type::{is_json_content_type, normalize_content_type};
use rill_protocol::cursor::{calculate_cursor, CursorOptions};
use rill_protocol::etag::format_etag;
use rill_protocol::json;
use rill_protocol::offset::{format_offset, Offset};
use rill_protocol::StoreError;

use crate::types::{
    AppendOptions, PutOptions, Snapshot, StreamHead, StreamMessage, StreamMeta, WaitOutcome,
};

/// Validate an idempotent create against an existing stream.
///
/// A different normalized content type is a mismatch; a different TTL or
/// expiry is a conflict. Equal attributes mean "already present".
pub fn check_idempotent_create(
    existing: &StreamMeta,
    request: &PutOptions,
) -> Result<(), StoreError> {
    let existing_ct = existing.content_type.as_deref().map(normalize_content_type);
    let requested_ct = request.content_type.as_deref().map(normalize_content_type);
    if existing_ct != requested_ct {
        return Err(StoreError::ContentTypeMismatch {
            expected: existing.content_type.clone().unwrap_or_default(),
            received: request.content_type.clone().unwrap_or_default(),
        });
    }
    if existing.ttl_seconds != request.ttl_seconds {
        return Err(StoreError::StreamConflict { attribute: "ttl" });
    }
    if existing.expires_at != request.expires_at {
        return Err(StoreError::StreamConflict {
            attribute: "expiresAt",
        });
    }
    Ok(())
}

/// Build the metadata and initial buffer for a new stream.
///
/// JSON payloads are validated and re-encoded into the trailing-comma
/// form. The append count is 1 iff the final buffer is non-empty.
pub fn prepare_initial_data(options: &PutOptions) -> Result<(StreamMeta, Vec<u8>), StoreError> {
    let json_stream = options
        .content_type
        .as_deref()
        .map(is_json_content_type)
        .unwrap_or(false);

    let buffer = match &options.data {
        None => Vec::new(),
        Some(data) if json_stream => json::encode_create_body(data)?,
        Some(data) => data.to_vec(),
    };

    let mut meta = StreamMeta::new(
        options.content_type.clone(),
        options.ttl_seconds,
        options.expires_at,
    );
    if !buffer.is_empty() {
        meta.append_count = 1;
    }
    meta.next_offset = format_offset(meta.append_count, buffer.len() as u64);
    Ok((meta, buffer))
}

/// The request content type, when declared, must normalize to the stream's.
pub fn validate_append_content_type(
    stream_content_type: Option<&str>,
    request_content_type: Option<&str>,
) -> Result<(), StoreError> {
    if let (Some(stream_ct), Some(request_ct)) = (stream_content_type, request_content_type) {
        if normalize_content_type(stream_ct) != normalize_content_type(request_ct) {
            return Err(StoreError::ContentTypeMismatch {
                expected: stream_ct.to_string(),
                received: request_ct.to_string(),
            });
        }
    }
    Ok(())
}

/// When both are present, the new sequence token must be strictly greater
/// than the last accepted one. The comparison is plain string order; the
/// store does not interpret the tokens.
pub fn validate_append_seq(
    last_seq: Option<&str>,
    seq: Option<&str>,
) -> Result<(), StoreError> {
    if let (Some(last), Some(new)) = (last_seq, seq) {
        if new <= last {
            return Err(StoreError::SequenceConflict {
                expected: last.to_string(),
                received: new.to_string(),
            });
        }
    }
    Ok(())
}

/// Merge appended bytes into a buffer: JSON streams go through the
/// stitching convention, raw streams concatenate.
pub fn merge_data(
    content_type: Option<&str>,
    mut buffer: Vec<u8>,
    incoming: &[u8],
) -> Result<Vec<u8>, StoreError> {
    let json_stream = content_type.map(is_json_content_type).unwrap_or(false);
    if json_stream {
        buffer.extend_from_slice(&json::encode_append_body(incoming)?);
    } else {
        buffer.extend_from_slice(incoming);
    }
    Ok(buffer)
}

/// Run the full append step against loaded state: validate, merge, and
/// commit the new offset and sequence token into `meta`. Returns the
/// merged buffer; `meta.next_offset` is the value to report.
pub fn apply_append(
    meta: &mut StreamMeta,
    buffer: Vec<u8>,
    incoming: &[u8],
    options: &AppendOptions,
) -> Result<Vec<u8>, StoreError> {
    validate_append_content_type(
        meta.content_type.as_deref(),
        options.content_type.as_deref(),
    )?;
    validate_append_seq(meta.last_seq.as_deref(), options.seq.as_deref())?;

    let merged = merge_data(meta.content_type.as_deref(), buffer, incoming)?;

    meta.append_count += 1;
    meta.next_offset = format_offset(meta.append_count, merged.len() as u64);
    if let Some(seq) = &options.seq {
        meta.last_seq = Some(seq.clone());
    }
    Ok(merged)
}

/// Resolve a request offset: absent means initial, the sentinel
/// normalizes, anything else must be canonical.
pub fn resolve_offset(offset: Option<&str>) -> Result<Offset, StoreError> {
    match offset {
        None => Ok(Offset::ZERO),
        Some(s) => Offset::parse(s).ok_or_else(|| StoreError::InvalidOffset(s.to_string())),
    }
}

/// Assemble a snapshot from loaded state. At most one message is
/// produced, covering every byte past the request offset.
pub fn build_snapshot(
    path: &str,
    meta: &StreamMeta,
    buffer: &[u8],
    offset: Option<&str>,
    cursor_options: &CursorOptions,
) -> Result<Snapshot, StoreError> {
    let requested = resolve_offset(offset)?;
    let messages = message_past(requested, buffer);
    let request_offset = requested.to_string();

    Ok(Snapshot {
        messages,
        next_offset: meta.next_offset.clone(),
        up_to_date: true,
        cursor: calculate_cursor(cursor_options),
        etag: format_etag(path, &request_offset, &meta.next_offset),
        content_type: meta.content_type.clone(),
    })
}

/// Assemble a head result: the ETag always covers from the initial offset.
pub fn build_head(path: &str, meta: &StreamMeta) -> StreamHead {
    StreamHead {
        content_type: meta.content_type.clone(),
        next_offset: meta.next_offset.clone(),
        etag: format_etag(path, &Offset::ZERO.to_string(), &meta.next_offset),
    }
}

/// The immediately-available wait outcome, when the buffer already extends
/// past the requested offset.
pub fn immediate_wait_outcome(requested: Offset, buffer: &[u8]) -> Option<WaitOutcome> {
    let messages = message_past(requested, buffer);
    if messages.is_empty() {
        None
    } else {
        Some(WaitOutcome {
            messages,
            timed_out: false,
        })
    }
}

fn message_past(requested: Offset, buffer: &[u8]) -> Vec<StreamMessage> {
    if (requested.position as usize) < buffer.len() {
        vec![StreamMessage {
            data: Bytes::copy_from_slice(&buffer[requested.position as usize..]),
            offset: requested.to_string(),
            timestamp: Utc::now().timestamp_millis(),
        }]
    } else {
        Vec::new()
    }
}

/// Frame messages for the wire given the stream's content type.
pub fn frame_messages(content_type: Option<&str>, messages: &[StreamMessage]) -> Bytes {
    let concatenated: Vec<u8> = messages
        .iter()
        .flat_map(|m| m.data.iter().copied())
        .collect();

    let json_stream = content_type.map(is_json_content_type).unwrap_or(false);
    if json_stream {
        Bytes::from(json::wrap_items(&concatenated))
    } else {
        Bytes::from(concatenated)
    }
}
