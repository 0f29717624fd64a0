//! Path codec for substrate-safe keys.
//!
//! Stream paths are encoded with base64url (RFC 4648 §5, no padding). Long
//! paths are truncated to 180 characters with a `~`-separated 16-hex-digit
//! SHA-256 suffix so the key stays unique while fitting substrate key
//! limits.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use sha2::{Digest, Sha256};

/// Maximum length of an encoded key before truncation kicks in.
const MAX_ENCODED_LENGTH: usize = 200;
/// Length the base64 body is cut to when truncating.
const TRUNCATE_LENGTH: usize = 180;
/// Hex digits of the SHA-256 suffix appended after `~`.
const HASH_SUFFIX_LENGTH: usize = 16;

/// Encode a stream path to a substrate-safe key.
pub fn encode_path(path: &str) -> String {
    let encoded = URL_SAFE_NO_PAD.encode(path.as_bytes());

    if encoded.len() > MAX_ENCODED_LENGTH {
        let digest = Sha256::digest(path.as_bytes());
        let hash = hex::encode(digest);
        format!(
            "{}~{}",
            &encoded[..TRUNCATE_LENGTH],
            &hash[..HASH_SUFFIX_LENGTH]
        )
    } else {
        encoded
    }
}

/// Decode an encoded key back to a path.
///
/// A trailing `~` followed by 16 hex digits is recognized as a truncation
/// suffix and stripped before decoding; the result is then the (still
/// unique) prefix of the original path rather than the full path.
pub fn decode_path(encoded: &str) -> Option<String> {
    let body = strip_hash_suffix(encoded);
    let bytes = URL_SAFE_NO_PAD.decode(body).ok()?;
    String::from_utf8(bytes).ok()
}

fn strip_hash_suffix(encoded: &str) -> &str {
    if encoded.len() > HASH_SUFFIX_LENGTH {
        let split = encoded.len() - HASH_SUFFIX_LENGTH - 1;
        if encoded.as_bytes()[split] == b'~'
            && encoded[split + 1..]
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return &encoded[..split];
        }
    }
    encoded
}
