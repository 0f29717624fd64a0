//! Content-type normalization and JSON detection.

/// Normalize a content type: lowercase, parameters stripped from the first
/// `;` onward, surrounding whitespace removed.
pub fn normalize_content_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_ascii_lowercase()
}

/// Whether a content type selects the JSON stitching convention:
/// `application/json` or any `+json` suffix type.
pub fn is_json_content_type(content_type: &str) -> bool {
    let normalized = normalize_content_type(content_type);
    normalized == "application/json" || normalized.ends_with("+json")
}
