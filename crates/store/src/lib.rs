//! Storage substrates for rill durable streams.
//!
//! Every substrate exposes the same [`StreamStore`] contract: idempotent
//! creation, validated appends, offset-addressed snapshot reads, and timed
//! waits for new data. Format decisions (offsets, JSON stitching, ETags)
//! live in `rill-protocol`; the shared validation and merge steps live in
//! [`helpers`]; each substrate contributes only its physical layout.
//!
//! Substrates:
//!
//! - [`memory::MemoryStreamStore`] — in-process reference implementation
//! - [`sqlite::SqliteStreamStore`] — embedded row-store, single process
//! - [`relational::LibsqlStreamStore`] — async relational database
//! - [`nats::NatsStreamStore`] — KV two-object layout on NATS JetStream
//! - [`s3::S3StreamStore`] — two-object layout on an object store

pub mod cache;
pub mod helpers;
pub mod memory;
pub mod nats;
pub mod relational;
pub mod s3;
pub mod sqlite;
pub mod types;
pub mod waiters;

use async_trait::async_trait;
use bytes::Bytes;

pub use rill_protocol::StoreError;
pub use types::{
    AppendOptions, PutOptions, PutOutcome, Snapshot, StreamHead, StreamLifecycleEvent,
    StreamMessage, StreamMeta, WaitOutcome,
};

/// The contract every storage substrate implements.
///
/// Implementations are object-safe so the HTTP adapter can hold an
/// `Arc<dyn StreamStore>` and stay substrate-agnostic.
#[async_trait]
pub trait StreamStore: Send + Sync + 'static {
    /// Create the stream at `path`, or validate an idempotent re-create.
    ///
    /// Returns `created = false` when the stream already exists with the
    /// same attributes; conflicting attributes raise
    /// [`StoreError::ContentTypeMismatch`] or [`StoreError::StreamConflict`].
    async fn put(&self, path: &str, options: PutOptions) -> Result<PutOutcome, StoreError>;

    /// Append `data`, returning the new next offset. Notifies every waiter
    /// whose offset the append satisfies.
    async fn append(
        &self,
        path: &str,
        data: Bytes,
        options: AppendOptions,
    ) -> Result<String, StoreError>;

    /// Snapshot read from `offset` (initial when `None`).
    async fn get(&self, path: &str, offset: Option<&str>) -> Result<Snapshot, StoreError>;

    /// Metadata-only read.
    async fn head(&self, path: &str) -> Result<StreamHead, StoreError>;

    /// Remove the stream and resolve all of its waiters with an empty,
    /// non-timed-out result. Returns whether a stream was removed.
    async fn delete(&self, path: &str) -> Result<bool, StoreError>;

    /// Existence check. Exact for the memory and embedded-row substrates;
    /// a per-instance cache hint for the remote ones.
    async fn has(&self, path: &str) -> bool;

    /// Wait until bytes exist past `offset`, the stream is deleted, or
    /// `timeout_ms` elapses.
    async fn wait_for_data(
        &self,
        path: &str,
        offset: &str,
        timeout_ms: u64,
    ) -> Result<WaitOutcome, StoreError>;

    /// Frame message bytes for the wire: JSON streams get the `[...]` wrap,
    /// raw streams plain concatenation. Unknown paths frame to zero bytes.
    async fn format_response(&self, path: &str, messages: &[StreamMessage]) -> Bytes;
}
