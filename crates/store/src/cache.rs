//! Per-instance stream existence cache.
//!
//! Remote substrates answer `has()` and pick a `format_response` framing
//! from this map instead of paying a round trip. It is a hint: it becomes
//! authoritative for a path only after this instance has observed it
//! through some other operation.

use std::collections::HashMap;

use parking_lot::Mutex;

/// Map of known-live paths to their content type.
#[derive(Default)]
pub struct ExistenceCache {
    entries: Mutex<HashMap<String, Option<String>>>,
}

impl ExistenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `path` exists with the given content type.
    pub fn record(&self, path: &str, content_type: Option<&str>) {
        self.entries
            .lock()
            .insert(path.to_string(), content_type.map(String::from));
    }

    /// Drop a path after deletion or observed expiry.
    pub fn forget(&self, path: &str) {
        self.entries.lock().remove(path);
    }

    /// Whether this instance has observed the path.
    pub fn contains(&self, path: &str) -> bool {
        self.entries.lock().contains_key(path)
    }

    /// The cached content type: `None` for unknown paths,
    /// `Some(inner)` once observed.
    pub fn content_type(&self, path: &str) -> Option<Option<String>> {
        self.entries.lock().get(path).cloned()
    }
}
