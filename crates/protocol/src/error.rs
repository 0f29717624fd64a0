//! Tagged errors raised by stream stores.
//!
//! The store never maps these to transport concerns itself; the HTTP
//! adapter inspects the variant and chooses a status code.

/// Error raised by a stream store operation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The path is absent, or was tombstoned by expiry.
    #[error("stream not found: {0}")]
    StreamNotFound(String),

    /// Idempotent create with a conflicting non-content-type attribute.
    #[error("stream already exists with a different {attribute}")]
    StreamConflict {
        /// Which attribute conflicted (`ttl` or `expiresAt`).
        attribute: &'static str,
    },

    /// Append or idempotent create with an incompatible content type.
    #[error("content-type mismatch: expected {expected}, received {received}")]
    ContentTypeMismatch {
        expected: String,
        received: String,
    },

    /// Append sequence token not strictly greater than the last one.
    #[error("sequence conflict: expected > {expected}, received {received}")]
    SequenceConflict {
        expected: String,
        received: String,
    },

    /// Body failed to parse as JSON, or violated the array rules.
    #[error("invalid JSON body: {0}")]
    InvalidJson(String),

    /// Caller supplied an offset whose shape is not valid.
    #[error("invalid offset: {0}")]
    InvalidOffset(String),

    /// The substrate rejected a write with a size-limit failure.
    #[error("payload too large")]
    PayloadTooLarge,

    /// Any other substrate failure, with the driver message preserved.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl StoreError {
    /// Whether this error (or the driver message it wraps) indicates a
    /// size-limit rejection.
    pub fn is_payload_too_large(&self) -> bool {
        match self {
            StoreError::PayloadTooLarge => true,
            StoreError::Storage(message) => {
                let message = message.to_ascii_lowercase();
                message.contains("too large") || message.contains("too big")
            }
            _ => false,
        }
    }
}
