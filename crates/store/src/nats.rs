//! KV two-object substrate on NATS JetStream.
//!
//! Each stream occupies two keys: `stream:{key}:meta` holds the
//! JSON-encoded metadata record, `stream:{key}:data` the raw bytes. The
//! two writes are not atomic; data is always staged before metadata so a
//! reader can never observe a next offset pointing past the stored bytes.

use std::sync::Arc;

use async_nats::jetstream;
use async_nats::jetstream::kv::{Config, Store as KvStore};
use async_nats::jetstream::Context as JetStreamContext;
use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info};

use rill_protocol::cursor::CursorOptions;
use rill_protocol::path::encode_path;
use rill_protocol::StoreError;

use crate::cache::ExistenceCache;
use crate::helpers::{
    apply_append, build_head, build_snapshot, check_idempotent_create, frame_messages,
    immediate_wait_outcome, prepare_initial_data, resolve_offset,
};
use crate::types::{
    AppendOptions, PutOptions, PutOutcome, Snapshot, StreamHead, StreamMessage, StreamMeta,
    WaitOutcome,
};
use crate::waiters::{await_waiter, WaiterRegistry};
use crate::StreamStore;

/// Options for configuring a [`NatsStreamStore`].
pub struct NatsStoreOptions {
    /// The NATS client to use.
    pub client: async_nats::Client,
    /// The KV bucket holding all streams.
    pub bucket: String,
}

/// Stream store backed by a NATS JetStream KV bucket.
pub struct NatsStreamStore {
    jetstream: JetStreamContext,
    bucket: String,
    waiters: WaiterRegistry,
    cache: ExistenceCache,
    cursor_options: CursorOptions,
}

impl NatsStreamStore {
    /// Create a store over the given client and bucket.
    pub fn new(options: NatsStoreOptions) -> Arc<Self> {
        Arc::new(Self {
            jetstream: jetstream::new(options.client),
            bucket: options.bucket,
            waiters: WaiterRegistry::new(),
            cache: ExistenceCache::new(),
            cursor_options: CursorOptions::default(),
        })
    }

    async fn kv(&self) -> Result<KvStore, StoreError> {
        self.jetstream
            .create_key_value(Config {
                bucket: self.bucket.clone(),
                ..Default::default()
            })
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))
    }

    async fn load(&self, path: &str) -> Result<Option<(StreamMeta, Vec<u8>)>, StoreError> {
        let kv = self.kv().await?;

        let Some(raw_meta) = kv
            .get(meta_key(path))
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?
        else {
            self.cache.forget(path);
            return Ok(None);
        };
        let meta: StreamMeta = serde_json::from_slice(&raw_meta)
            .map_err(|e| StoreError::Storage(format!("corrupt stream metadata: {e}")))?;

        if meta.is_expired() {
            self.remove_objects(&kv, path).await?;
            self.waiters.notify_delete(path);
            return Ok(None);
        }

        let data = kv
            .get(data_key(path))
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?
            .map(|bytes| bytes.to_vec())
            .unwrap_or_default();

        self.cache.record(path, meta.content_type.as_deref());
        Ok(Some((meta, data)))
    }

    /// Write both objects, data first.
    async fn persist(
        &self,
        path: &str,
        meta: &StreamMeta,
        buffer: &[u8],
    ) -> Result<(), StoreError> {
        let kv = self.kv().await?;
        let encoded_meta =
            serde_json::to_vec(meta).map_err(|e| StoreError::Storage(e.to_string()))?;

        kv.put(data_key(path), Bytes::copy_from_slice(buffer))
            .await
            .map_err(|e| size_aware_error(e.to_string()))?;
        kv.put(meta_key(path), Bytes::from(encoded_meta))
            .await
            .map_err(|e| size_aware_error(e.to_string()))?;

        self.cache.record(path, meta.content_type.as_deref());
        Ok(())
    }

    /// Remove both objects, metadata first so the stream disappears
    /// before its bytes do.
    async fn remove_objects(&self, kv: &KvStore, path: &str) -> Result<(), StoreError> {
        kv.delete(meta_key(path))
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        kv.delete(data_key(path))
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        self.cache.forget(path);
        Ok(())
    }
}

#[async_trait]
impl StreamStore for NatsStreamStore {
    async fn put(&self, path: &str, options: PutOptions) -> Result<PutOutcome, StoreError> {
        if let Some((existing, _)) = self.load(path).await? {
            check_idempotent_create(&existing, &options)?;
            return Ok(PutOutcome {
                created: false,
                next_offset: existing.next_offset,
            });
        }

        let (meta, buffer) = prepare_initial_data(&options)?;
        self.persist(path, &meta, &buffer).await?;
        info!(path = %path, bucket = %self.bucket, "created stream");

        Ok(PutOutcome {
            created: true,
            next_offset: meta.next_offset,
        })
    }

    async fn append(
        &self,
        path: &str,
        data: Bytes,
        options: AppendOptions,
    ) -> Result<String, StoreError> {
        let Some((mut meta, buffer)) = self.load(path).await? else {
            return Err(StoreError::StreamNotFound(path.to_string()));
        };

        let merged = apply_append(&mut meta, buffer, &data, &options)?;
        self.persist(path, &meta, &merged).await?;
        let next_offset = meta.next_offset.clone();

        debug!(path = %path, offset = %next_offset, "appended to stream");
        self.waiters.notify_append(path, &Bytes::from(merged));

        Ok(next_offset)
    }

    async fn get(&self, path: &str, offset: Option<&str>) -> Result<Snapshot, StoreError> {
        let Some((meta, buffer)) = self.load(path).await? else {
            return Err(StoreError::StreamNotFound(path.to_string()));
        };
        build_snapshot(path, &meta, &buffer, offset, &self.cursor_options)
    }

    async fn head(&self, path: &str) -> Result<StreamHead, StoreError> {
        let Some((meta, _)) = self.load(path).await? else {
            return Err(StoreError::StreamNotFound(path.to_string()));
        };
        Ok(build_head(path, &meta))
    }

    async fn delete(&self, path: &str) -> Result<bool, StoreError> {
        let kv = self.kv().await?;
        let existed = kv
            .get(meta_key(path))
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?
            .is_some();

        self.remove_objects(&kv, path).await?;
        self.waiters.notify_delete(path);
        if existed {
            info!(path = %path, bucket = %self.bucket, "deleted stream");
        }
        Ok(existed)
    }

    async fn has(&self, path: &str) -> bool {
        self.cache.contains(path)
    }

    async fn wait_for_data(
        &self,
        path: &str,
        offset: &str,
        timeout_ms: u64,
    ) -> Result<WaitOutcome, StoreError> {
        let requested = resolve_offset(Some(offset))?;

        let Some((_, buffer)) = self.load(path).await? else {
            return Err(StoreError::StreamNotFound(path.to_string()));
        };
        if let Some(outcome) = immediate_wait_outcome(requested, &buffer) {
            return Ok(outcome);
        }

        let (id, receiver) = self.waiters.enroll(path, requested);
        Ok(await_waiter(&self.waiters, path, id, receiver, timeout_ms).await)
    }

    async fn format_response(&self, path: &str, messages: &[StreamMessage]) -> Bytes {
        match self.cache.content_type(path) {
            Some(content_type) => frame_messages(content_type.as_deref(), messages),
            None => Bytes::new(),
        }
    }
}

fn meta_key(path: &str) -> String {
    format!("stream:{}:meta", encode_path(path))
}

fn data_key(path: &str) -> String {
    format!("stream:{}:data", encode_path(path))
}

fn size_aware_error(message: String) -> StoreError {
    let lowered = message.to_ascii_lowercase();
    if lowered.contains("too large") || lowered.contains("too big") {
        StoreError::PayloadTooLarge
    } else {
        StoreError::Storage(message)
    }
}
