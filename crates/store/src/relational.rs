//! Async relational substrate.
//!
//! Same table shape as the embedded row-store, but every operation is an
//! async prepared statement against a remote libsql database. The
//! substrate assumes at most one writer per path; `has()` is served from
//! the local existence cache only, because answering it truthfully would
//! cost a round trip.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use libsql::{Builder, Connection, Value};
use tokio::sync::Mutex;
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

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS streams (
    path         TEXT PRIMARY KEY,
    content_type TEXT,
    ttl_seconds  INTEGER,
    expires_at   TEXT,
    created_at   INTEGER NOT NULL,
    data         BLOB NOT NULL,
    next_offset  TEXT NOT NULL,
    last_seq     TEXT,
    append_count INTEGER NOT NULL
)";

const SELECT_STREAM: &str = "SELECT content_type, ttl_seconds, expires_at, created_at, data,
        next_offset, last_seq, append_count
 FROM streams WHERE path = ?1";

const UPSERT_STREAM: &str = "INSERT OR REPLACE INTO streams
     (path, content_type, ttl_seconds, expires_at, created_at, data,
      next_offset, last_seq, append_count)
 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)";

const DELETE_STREAM: &str = "DELETE FROM streams WHERE path = ?1";

/// Options for connecting a [`LibsqlStreamStore`].
#[derive(Debug, Clone)]
pub struct LibsqlStoreOptions {
    /// Database URL.
    pub url: String,
    /// Auth token for the database.
    pub auth_token: String,
}

/// Stream store backed by a remote libsql database.
pub struct LibsqlStreamStore {
    conn: Arc<Mutex<Connection>>,
    waiters: WaiterRegistry,
    cache: ExistenceCache,
    cursor_options: CursorOptions,
}

impl LibsqlStreamStore {
    /// Connect to the database and create the schema.
    pub async fn connect(options: LibsqlStoreOptions) -> Result<Arc<Self>, StoreError> {
        let db = Builder::new_remote(options.url.clone(), options.auth_token)
            .build()
            .await
            .map_err(storage_error)?;
        let conn = db.connect().map_err(storage_error)?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            waiters: WaiterRegistry::new(),
            cache: ExistenceCache::new(),
            cursor_options: CursorOptions::default(),
        };
        store.initialize().await?;
        info!(url = %options.url, "connected libsql stream store");
        Ok(Arc::new(store))
    }

    /// Create the schema if it does not exist yet.
    pub async fn initialize(&self) -> Result<(), StoreError> {
        self.conn
            .lock()
            .await
            .execute(SCHEMA, Vec::<Value>::new())
            .await
            .map_err(storage_error)?;
        Ok(())
    }

    async fn load(&self, path: &str) -> Result<Option<(StreamMeta, Vec<u8>)>, StoreError> {
        let key = encode_path(path);
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(SELECT_STREAM, vec![Value::Text(key.clone())])
            .await
            .map_err(storage_error)?;

        let Some(row) = rows.next().await.map_err(storage_error)? else {
            self.cache.forget(path);
            return Ok(None);
        };
        let (meta, data) = decode_row(&row)?;

        if meta.is_expired() {
            conn.execute(DELETE_STREAM, vec![Value::Text(key)])
                .await
                .map_err(storage_error)?;
            drop(conn);
            self.cache.forget(path);
            self.waiters.notify_delete(path);
            return Ok(None);
        }

        self.cache.record(path, meta.content_type.as_deref());
        Ok(Some((meta, data)))
    }

    async fn persist(
        &self,
        path: &str,
        meta: &StreamMeta,
        buffer: &[u8],
    ) -> Result<(), StoreError> {
        let params = vec![
            Value::Text(encode_path(path)),
            text_or_null(meta.content_type.clone()),
            meta.ttl_seconds
                .map(|v| Value::Integer(v as i64))
                .unwrap_or(Value::Null),
            text_or_null(meta.expires_at.map(|dt| dt.to_rfc3339())),
            Value::Integer(meta.created_at),
            Value::Blob(buffer.to_vec()),
            Value::Text(meta.next_offset.clone()),
            text_or_null(meta.last_seq.clone()),
            Value::Integer(meta.append_count as i64),
        ];

        self.conn
            .lock()
            .await
            .execute(UPSERT_STREAM, params)
            .await
            .map_err(storage_error)?;
        self.cache.record(path, meta.content_type.as_deref());
        Ok(())
    }
}

#[async_trait]
impl StreamStore for LibsqlStreamStore {
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
        info!(path = %path, "created stream");

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
        let affected = self
            .conn
            .lock()
            .await
            .execute(DELETE_STREAM, vec![Value::Text(encode_path(path))])
            .await
            .map_err(storage_error)?;

        self.cache.forget(path);
        self.waiters.notify_delete(path);
        if affected > 0 {
            info!(path = %path, "deleted stream");
        }
        Ok(affected > 0)
    }

    async fn has(&self, path: &str) -> bool {
        // Cache-only: authoritative once some operation on this instance
        // has observed the path.
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

fn decode_row(row: &libsql::Row) -> Result<(StreamMeta, Vec<u8>), StoreError> {
    let text = |index: i32| -> Result<Option<String>, StoreError> {
        match row.get_value(index).map_err(storage_error)? {
            Value::Text(s) => Ok(Some(s)),
            Value::Null => Ok(None),
            other => Err(StoreError::Storage(format!(
                "unexpected column type at {index}: {other:?}"
            ))),
        }
    };
    let integer = |index: i32| -> Result<Option<i64>, StoreError> {
        match row.get_value(index).map_err(storage_error)? {
            Value::Integer(v) => Ok(Some(v)),
            Value::Null => Ok(None),
            other => Err(StoreError::Storage(format!(
                "unexpected column type at {index}: {other:?}"
            ))),
        }
    };

    let data = match row.get_value(4).map_err(storage_error)? {
        Value::Blob(bytes) => bytes,
        other => {
            return Err(StoreError::Storage(format!(
                "unexpected data column type: {other:?}"
            )))
        }
    };

    let meta = StreamMeta {
        content_type: text(0)?,
        ttl_seconds: integer(1)?.map(|v| v as u64),
        expires_at: text(2)?.as_deref().and_then(parse_stored_timestamp),
        created_at: integer(3)?.unwrap_or_default(),
        next_offset: text(5)?.unwrap_or_default(),
        last_seq: text(6)?,
        append_count: integer(7)?.unwrap_or_default() as u64,
    };
    Ok((meta, data))
}

fn text_or_null(value: Option<String>) -> Value {
    value.map(Value::Text).unwrap_or(Value::Null)
}

fn parse_stored_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn storage_error(error: libsql::Error) -> StoreError {
    let message = error.to_string();
    let lowered = message.to_ascii_lowercase();
    if lowered.contains("too big") || lowered.contains("too large") {
        StoreError::PayloadTooLarge
    } else {
        StoreError::Storage(message)
    }
}
