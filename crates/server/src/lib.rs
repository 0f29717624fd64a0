//! HTTP adapter for rill durable streams.
//!
//! Maps the wire protocol onto any [`StreamStore`](rill_store::StreamStore):
//!
//! ```text
//! PUT    /{path}                     create (idempotent)
//! POST   /{path}                     append
//! GET    /{path}?offset=...          snapshot read
//! GET    /{path}?offset=...&live=long-poll   one timed wait
//! GET    /{path}?offset=...&live=sse         server-sent events
//! HEAD   /{path}                     metadata only
//! DELETE /{path}                     remove
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use rill_server::{start_server, ServerOptions};
//! use rill_store::memory::MemoryStreamStore;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = MemoryStreamStore::new();
//!     start_server(store, ServerOptions::default()).await.unwrap();
//! }
//! ```

pub mod server;

use chrono::{DateTime, Utc};

pub use server::{create_router, start_server, AppState};

/// Server configuration options.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Port to listen on (0 for auto-assign).
    pub port: u16,
    /// Host to bind to.
    pub host: String,
    /// Timeout for a single `waitForData` cycle, in milliseconds.
    pub long_poll_timeout_ms: u64,
    /// Cursor interval in seconds.
    pub cursor_interval_seconds: u64,
    /// Cursor epoch for interval calculation.
    pub cursor_epoch: DateTime<Utc>,
}

impl ServerOptions {
    pub(crate) fn cursor_options(&self) -> rill_protocol::CursorOptions {
        rill_protocol::CursorOptions {
            interval_seconds: self.cursor_interval_seconds,
            epoch: self.cursor_epoch,
        }
    }
}

impl Default for ServerOptions {
    fn default() -> Self {
        let defaults = rill_protocol::CursorOptions::default();
        Self {
            port: 4437,
            host: "127.0.0.1".to_string(),
            long_poll_timeout_ms: 30_000,
            cursor_interval_seconds: defaults.interval_seconds,
            cursor_epoch: defaults.epoch,
        }
    }
}
