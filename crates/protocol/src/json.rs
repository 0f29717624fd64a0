//! The trailing-comma JSON stitching convention.
//!
//! JSON streams store every item as minified JSON followed by a single
//! comma, so appends are O(bytes added) and never re-serialize earlier
//! items. Reads strip the final comma and wrap the buffer in `[` `]`.

use serde_json::Value;

use crate::error::StoreError;

/// Validate and encode the initial body of a JSON stream.
///
/// The body must parse to an array (flattened into items; may be empty) or
/// a single object. Returns the internal trailing-comma encoding.
pub fn encode_create_body(body: &[u8]) -> Result<Vec<u8>, StoreError> {
    let items = parse_items(body)?;
    Ok(encode_items(&items))
}

/// Validate and encode an appended body of a JSON stream.
///
/// Same grammar as [`encode_create_body`], except an empty array is
/// rejected: an append must contribute at least one item.
pub fn encode_append_body(body: &[u8]) -> Result<Vec<u8>, StoreError> {
    let items = parse_items(body)?;
    if items.is_empty() {
        return Err(StoreError::InvalidJson(
            "append requires at least one item".to_string(),
        ));
    }
    Ok(encode_items(&items))
}

/// Wrap internal trailing-comma data into a JSON array for a read.
pub fn wrap_items(data: &[u8]) -> Vec<u8> {
    let mut body = data.to_vec();
    if body.last() == Some(&b',') {
        body.pop();
    }
    let mut wrapped = Vec::with_capacity(body.len() + 2);
    wrapped.push(b'[');
    wrapped.extend_from_slice(&body);
    wrapped.push(b']');
    wrapped
}

fn parse_items(body: &[u8]) -> Result<Vec<Value>, StoreError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| StoreError::InvalidJson(e.to_string()))?;

    match value {
        Value::Array(items) => Ok(items),
        Value::Object(_) => Ok(vec![value]),
        other => Err(StoreError::InvalidJson(format!(
            "expected a JSON array or object, got {}",
            value_kind(&other)
        ))),
    }
}

fn encode_items(items: &[Value]) -> Vec<u8> {
    let mut encoded = Vec::new();
    for item in items {
        // serde_json's compact form is the minified encoding.
        encoded.extend_from_slice(item.to_string().as_bytes());
        encoded.push(b',');
    }
    encoded
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
