//! Object-store substrate on AWS S3.
//!
//! The same two-object layout as the KV substrate, targeted at larger
//! blobs: a JSON metadata object and a data object per stream. Writes
//! stage data before metadata; deletes remove metadata first.

use std::sync::Arc;

use async_trait::async_trait;
use aws_config::Region;
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

/// Options for configuring an [`S3StreamStore`].
pub struct S3StoreOptions {
    /// The bucket to use (must already exist).
    pub bucket: String,
    /// Optional key prefix for all objects.
    pub prefix: Option<String>,
    /// The AWS region to use.
    pub region: String,
}

/// Stream store backed by an S3 bucket.
pub struct S3StreamStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: Option<String>,
    waiters: WaiterRegistry,
    cache: ExistenceCache,
    cursor_options: CursorOptions,
}

impl S3StreamStore {
    /// Create a store from ambient AWS credentials.
    pub async fn new(options: S3StoreOptions) -> Arc<Self> {
        let config = aws_config::from_env()
            .region(Region::new(options.region))
            .load()
            .await;

        Arc::new(Self {
            client: aws_sdk_s3::Client::new(&config),
            bucket: options.bucket,
            prefix: options.prefix,
            waiters: WaiterRegistry::new(),
            cache: ExistenceCache::new(),
            cursor_options: CursorOptions::default(),
        })
    }

    fn object_key(&self, path: &str, kind: &str) -> String {
        let key = format!("stream:{}:{}", encode_path(path), kind);
        match &self.prefix {
            Some(prefix) => format!("{prefix}/{key}"),
            None => key,
        }
    }

    async fn fetch_object(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match response {
            Ok(output) => {
                let data = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| StoreError::Storage(format!("read object body: {e}")))?;
                Ok(Some(data.into_bytes()))
            }
            Err(e) if e.to_string().contains("NoSuchKey") => Ok(None),
            Err(e) => Err(StoreError::Storage(e.to_string())),
        }
    }

    async fn store_object(&self, key: String, bytes: Bytes) -> Result<(), StoreError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(bytes.into())
            .send()
            .await
            .map_err(|e| size_aware_error(e.to_string()))?;
        Ok(())
    }

    async fn remove_object(&self, key: String) -> Result<(), StoreError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn load(&self, path: &str) -> Result<Option<(StreamMeta, Vec<u8>)>, StoreError> {
        let Some(raw_meta) = self.fetch_object(&self.object_key(path, "meta")).await? else {
            self.cache.forget(path);
            return Ok(None);
        };
        let meta: StreamMeta = serde_json::from_slice(&raw_meta)
            .map_err(|e| StoreError::Storage(format!("corrupt stream metadata: {e}")))?;

        if meta.is_expired() {
            self.remove_object(self.object_key(path, "meta")).await?;
            self.remove_object(self.object_key(path, "data")).await?;
            self.cache.forget(path);
            self.waiters.notify_delete(path);
            return Ok(None);
        }

        let data = self
            .fetch_object(&self.object_key(path, "data"))
            .await?
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
        let encoded_meta =
            serde_json::to_vec(meta).map_err(|e| StoreError::Storage(e.to_string()))?;

        self.store_object(
            self.object_key(path, "data"),
            Bytes::copy_from_slice(buffer),
        )
        .await?;
        self.store_object(self.object_key(path, "meta"), Bytes::from(encoded_meta))
            .await?;

        self.cache.record(path, meta.content_type.as_deref());
        Ok(())
    }
}

#[async_trait]
impl StreamStore for S3StreamStore {
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
        let existed = self
            .fetch_object(&self.object_key(path, "meta"))
            .await?
            .is_some();

        self.remove_object(self.object_key(path, "meta")).await?;
        self.remove_object(self.object_key(path, "data")).await?;
        self.cache.forget(path);
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

fn size_aware_error(message: String) -> StoreError {
    let lowered = message.to_ascii_lowercase();
    if lowered.contains("too large") || lowered.contains("too big") {
        StoreError::PayloadTooLarge
    } else {
        StoreError::Storage(message)
    }
}
