//! In-process stream storage.
//!
//! The reference substrate: one map from path to stream state, expiry
//! checked lazily on every lookup, waiter handoff under the map's write
//! lock so a wait can never miss the append that satisfies it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, info};

use rill_protocol::cursor::CursorOptions;
use rill_protocol::StoreError;

use crate::helpers::{
    apply_append, build_head, build_snapshot, check_idempotent_create, frame_messages,
    immediate_wait_outcome, prepare_initial_data, resolve_offset,
};
use crate::types::{
    AppendOptions, PutOptions, PutOutcome, Snapshot, StreamHead, StreamLifecycleEvent,
    StreamMessage, StreamMeta, WaitOutcome,
};
use crate::waiters::{await_waiter, WaiterRegistry};
use crate::StreamStore;

struct StreamState {
    meta: StreamMeta,
    buffer: Vec<u8>,
}

/// In-memory stream store.
pub struct MemoryStreamStore {
    streams: RwLock<HashMap<String, StreamState>>,
    waiters: WaiterRegistry,
    cursor_options: CursorOptions,
    on_lifecycle: Option<Box<dyn Fn(StreamLifecycleEvent) + Send + Sync>>,
}

impl MemoryStreamStore {
    /// Create a new empty stream store.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            streams: RwLock::new(HashMap::new()),
            waiters: WaiterRegistry::new(),
            cursor_options: CursorOptions::default(),
            on_lifecycle: None,
        })
    }

    /// Create a store that invokes `on_lifecycle` on create and delete.
    pub fn with_lifecycle<F>(on_lifecycle: F) -> Arc<Self>
    where
        F: Fn(StreamLifecycleEvent) + Send + Sync + 'static,
    {
        Arc::new(Self {
            streams: RwLock::new(HashMap::new()),
            waiters: WaiterRegistry::new(),
            cursor_options: CursorOptions::default(),
            on_lifecycle: Some(Box::new(on_lifecycle)),
        })
    }

    /// List all non-expired stream paths.
    pub fn list(&self) -> Vec<String> {
        let streams = self.streams.read();
        streams
            .iter()
            .filter(|(_, s)| !s.meta.is_expired())
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// Drop every stream without resolving waiters.
    pub fn clear(&self) {
        self.streams.write().clear();
    }

    /// Remove an expired entry, resolving its waiters, while the write
    /// lock is held.
    fn evict_expired(&self, streams: &mut HashMap<String, StreamState>, path: &str) {
        if streams.remove(path).is_some() {
            self.waiters.notify_delete(path);
            self.emit_lifecycle(StreamLifecycleEvent::Deleted {
                path: path.to_string(),
                timestamp: Utc::now().timestamp_millis(),
            });
        }
    }

    fn emit_lifecycle(&self, event: StreamLifecycleEvent) {
        if let Some(callback) = &self.on_lifecycle {
            callback(event);
        }
    }
}

#[async_trait]
impl StreamStore for MemoryStreamStore {
    async fn put(&self, path: &str, options: PutOptions) -> Result<PutOutcome, StoreError> {
        let mut streams = self.streams.write();

        if let Some(existing) = streams.get(path) {
            if existing.meta.is_expired() {
                self.evict_expired(&mut streams, path);
            } else {
                check_idempotent_create(&existing.meta, &options)?;
                return Ok(PutOutcome {
                    created: false,
                    next_offset: existing.meta.next_offset.clone(),
                });
            }
        }

        let (meta, buffer) = prepare_initial_data(&options)?;
        let next_offset = meta.next_offset.clone();
        let content_type = meta.content_type.clone();
        streams.insert(path.to_string(), StreamState { meta, buffer });
        drop(streams);

        info!(path = %path, "created stream");
        self.emit_lifecycle(StreamLifecycleEvent::Created {
            path: path.to_string(),
            content_type,
            timestamp: Utc::now().timestamp_millis(),
        });

        Ok(PutOutcome {
            created: true,
            next_offset,
        })
    }

    async fn append(
        &self,
        path: &str,
        data: Bytes,
        options: AppendOptions,
    ) -> Result<String, StoreError> {
        let mut streams = self.streams.write();

        let Some(state) = streams.get_mut(path) else {
            return Err(StoreError::StreamNotFound(path.to_string()));
        };
        if state.meta.is_expired() {
            self.evict_expired(&mut streams, path);
            return Err(StoreError::StreamNotFound(path.to_string()));
        }

        let buffer = std::mem::take(&mut state.buffer);
        let merged = apply_append(&mut state.meta, buffer, &data, &options)?;
        let next_offset = state.meta.next_offset.clone();
        state.buffer = merged;
        let notify_buffer = Bytes::copy_from_slice(&state.buffer);
        drop(streams);

        debug!(path = %path, offset = %next_offset, "appended to stream");
        self.waiters.notify_append(path, &notify_buffer);

        Ok(next_offset)
    }

    async fn get(&self, path: &str, offset: Option<&str>) -> Result<Snapshot, StoreError> {
        let mut streams = self.streams.write();

        let Some(state) = streams.get(path) else {
            return Err(StoreError::StreamNotFound(path.to_string()));
        };
        if state.meta.is_expired() {
            self.evict_expired(&mut streams, path);
            return Err(StoreError::StreamNotFound(path.to_string()));
        }

        build_snapshot(path, &state.meta, &state.buffer, offset, &self.cursor_options)
    }

    async fn head(&self, path: &str) -> Result<StreamHead, StoreError> {
        let mut streams = self.streams.write();

        let Some(state) = streams.get(path) else {
            return Err(StoreError::StreamNotFound(path.to_string()));
        };
        if state.meta.is_expired() {
            self.evict_expired(&mut streams, path);
            return Err(StoreError::StreamNotFound(path.to_string()));
        }

        Ok(build_head(path, &state.meta))
    }

    async fn delete(&self, path: &str) -> Result<bool, StoreError> {
        let removed = self.streams.write().remove(path).is_some();

        if removed {
            info!(path = %path, "deleted stream");
            self.waiters.notify_delete(path);
            self.emit_lifecycle(StreamLifecycleEvent::Deleted {
                path: path.to_string(),
                timestamp: Utc::now().timestamp_millis(),
            });
        }
        Ok(removed)
    }

    async fn has(&self, path: &str) -> bool {
        let mut streams = self.streams.write();
        match streams.get(path) {
            Some(state) if state.meta.is_expired() => {
                self.evict_expired(&mut streams, path);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    async fn wait_for_data(
        &self,
        path: &str,
        offset: &str,
        timeout_ms: u64,
    ) -> Result<WaitOutcome, StoreError> {
        let requested = resolve_offset(Some(offset))?;

        let (id, receiver) = {
            let mut streams = self.streams.write();
            let Some(state) = streams.get(path) else {
                return Err(StoreError::StreamNotFound(path.to_string()));
            };
            if state.meta.is_expired() {
                self.evict_expired(&mut streams, path);
                return Err(StoreError::StreamNotFound(path.to_string()));
            }

            if let Some(outcome) = immediate_wait_outcome(requested, &state.buffer) {
                return Ok(outcome);
            }

            // Enrolled while the map lock is held, so an append committing
            // right after cannot miss this waiter.
            self.waiters.enroll(path, requested)
        };

        Ok(await_waiter(&self.waiters, path, id, receiver, timeout_ms).await)
    }

    async fn format_response(&self, path: &str, messages: &[StreamMessage]) -> Bytes {
        let streams = self.streams.read();
        match streams.get(path) {
            Some(state) if !state.meta.is_expired() => {
                frame_messages(state.meta.content_type.as_deref(), messages)
            }
            _ => Bytes::new(),
        }
    }
}
