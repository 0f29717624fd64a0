//! Embedded row-store substrate.
//!
//! One SQLite table holds everything: metadata columns plus the data blob,
//! with the next offset stored redundantly for cheap reads. All operations
//! are serialized through a single connection mutex, which is the
//! substrate's single-writer guarantee.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
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
) STRICT;
";

/// Options for opening a [`SqliteStreamStore`].
#[derive(Debug, Clone, Default)]
pub struct SqliteStoreOptions {
    /// Database file. `None` opens an in-memory database.
    pub path: Option<PathBuf>,
}

/// Stream store backed by an embedded SQLite database.
pub struct SqliteStreamStore {
    conn: Mutex<Connection>,
    waiters: WaiterRegistry,
    cache: ExistenceCache,
    cursor_options: CursorOptions,
}

impl SqliteStreamStore {
    /// Open the database and create the schema.
    pub fn open(options: SqliteStoreOptions) -> Result<Arc<Self>, StoreError> {
        let conn = match &options.path {
            Some(path) => Connection::open(path),
            None => Connection::open_in_memory(),
        }
        .map_err(storage_error)?;

        let store = Self {
            conn: Mutex::new(conn),
            waiters: WaiterRegistry::new(),
            cache: ExistenceCache::new(),
            cursor_options: CursorOptions::default(),
        };
        store.initialize()?;
        info!(path = ?options.path, "opened sqlite stream store");
        Ok(Arc::new(store))
    }

    /// Create the schema if it does not exist yet.
    pub fn initialize(&self) -> Result<(), StoreError> {
        self.conn
            .lock()
            .execute_batch(SCHEMA)
            .map_err(storage_error)
    }

    /// Load a stream row, tombstoning it when expired.
    fn load(
        &self,
        conn: &Connection,
        path: &str,
    ) -> Result<Option<(StreamMeta, Vec<u8>)>, StoreError> {
        let key = encode_path(path);
        let row = conn
            .query_row(
                "SELECT content_type, ttl_seconds, expires_at, created_at, data,
                        next_offset, last_seq, append_count
                 FROM streams WHERE path = ?1",
                params![key],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Option<i64>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, Vec<u8>>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, Option<String>>(6)?,
                        row.get::<_, i64>(7)?,
                    ))
                },
            )
            .optional()
            .map_err(storage_error)?;

        let Some((content_type, ttl, expires_at, created_at, data, next_offset, last_seq, count)) =
            row
        else {
            self.cache.forget(path);
            return Ok(None);
        };

        let meta = StreamMeta {
            content_type,
            ttl_seconds: ttl.map(|v| v as u64),
            expires_at: expires_at.as_deref().and_then(parse_stored_timestamp),
            created_at,
            next_offset,
            last_seq,
            append_count: count as u64,
        };

        if meta.is_expired() {
            conn.execute("DELETE FROM streams WHERE path = ?1", params![key])
                .map_err(storage_error)?;
            self.cache.forget(path);
            self.waiters.notify_delete(path);
            return Ok(None);
        }

        self.cache.record(path, meta.content_type.as_deref());
        Ok(Some((meta, data)))
    }

    fn persist(
        &self,
        conn: &Connection,
        path: &str,
        meta: &StreamMeta,
        buffer: &[u8],
    ) -> Result<(), StoreError> {
        conn.execute(
            "INSERT OR REPLACE INTO streams
                 (path, content_type, ttl_seconds, expires_at, created_at, data,
                  next_offset, last_seq, append_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                encode_path(path),
                meta.content_type,
                meta.ttl_seconds.map(|v| v as i64),
                meta.expires_at.map(|dt| dt.to_rfc3339()),
                meta.created_at,
                buffer,
                meta.next_offset,
                meta.last_seq,
                meta.append_count as i64,
            ],
        )
        .map_err(storage_error)?;
        self.cache.record(path, meta.content_type.as_deref());
        Ok(())
    }
}

#[async_trait]
impl StreamStore for SqliteStreamStore {
    async fn put(&self, path: &str, options: PutOptions) -> Result<PutOutcome, StoreError> {
        let conn = self.conn.lock();

        if let Some((existing, _)) = self.load(&conn, path)? {
            check_idempotent_create(&existing, &options)?;
            return Ok(PutOutcome {
                created: false,
                next_offset: existing.next_offset,
            });
        }

        let (meta, buffer) = prepare_initial_data(&options)?;
        self.persist(&conn, path, &meta, &buffer)?;
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
        let conn = self.conn.lock();

        let Some((mut meta, buffer)) = self.load(&conn, path)? else {
            return Err(StoreError::StreamNotFound(path.to_string()));
        };

        let merged = apply_append(&mut meta, buffer, &data, &options)?;
        self.persist(&conn, path, &meta, &merged)?;
        let next_offset = meta.next_offset.clone();
        drop(conn);

        debug!(path = %path, offset = %next_offset, "appended to stream");
        self.waiters.notify_append(path, &Bytes::from(merged));

        Ok(next_offset)
    }

    async fn get(&self, path: &str, offset: Option<&str>) -> Result<Snapshot, StoreError> {
        let conn = self.conn.lock();
        let Some((meta, buffer)) = self.load(&conn, path)? else {
            return Err(StoreError::StreamNotFound(path.to_string()));
        };
        build_snapshot(path, &meta, &buffer, offset, &self.cursor_options)
    }

    async fn head(&self, path: &str) -> Result<StreamHead, StoreError> {
        let conn = self.conn.lock();
        let Some((meta, _)) = self.load(&conn, path)? else {
            return Err(StoreError::StreamNotFound(path.to_string()));
        };
        Ok(build_head(path, &meta))
    }

    async fn delete(&self, path: &str) -> Result<bool, StoreError> {
        let removed = {
            let conn = self.conn.lock();
            conn.execute(
                "DELETE FROM streams WHERE path = ?1",
                params![encode_path(path)],
            )
            .map_err(storage_error)?
                > 0
        };

        self.cache.forget(path);
        self.waiters.notify_delete(path);
        if removed {
            info!(path = %path, "deleted stream");
        }
        Ok(removed)
    }

    async fn has(&self, path: &str) -> bool {
        let conn = self.conn.lock();
        matches!(self.load(&conn, path), Ok(Some(_)))
    }

    async fn wait_for_data(
        &self,
        path: &str,
        offset: &str,
        timeout_ms: u64,
    ) -> Result<WaitOutcome, StoreError> {
        let requested = resolve_offset(Some(offset))?;

        let (id, receiver) = {
            let conn = self.conn.lock();
            let Some((_, buffer)) = self.load(&conn, path)? else {
                return Err(StoreError::StreamNotFound(path.to_string()));
            };

            if let Some(outcome) = immediate_wait_outcome(requested, &buffer) {
                return Ok(outcome);
            }
            // Enrolled before the connection lock is released, so the next
            // append's notification cannot slip past this waiter.
            self.waiters.enroll(path, requested)
        };

        Ok(await_waiter(&self.waiters, path, id, receiver, timeout_ms).await)
    }

    async fn format_response(&self, path: &str, messages: &[StreamMessage]) -> Bytes {
        let content_type = {
            let conn = self.conn.lock();
            match self.load(&conn, path) {
                Ok(Some((meta, _))) => meta.content_type,
                _ => return Bytes::new(),
            }
        };
        frame_messages(content_type.as_deref(), messages)
    }
}

fn storage_error(error: rusqlite::Error) -> StoreError {
    let message = error.to_string();
    let lowered = message.to_ascii_lowercase();
    if lowered.contains("too big") || lowered.contains("too large") {
        StoreError::PayloadTooLarge
    } else {
        StoreError::Storage(message)
    }
}

fn parse_stored_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_protocol::offset::format_offset;

    fn open_store() -> Arc<SqliteStreamStore> {
        SqliteStreamStore::open(SqliteStoreOptions::default()).unwrap()
    }

    fn put_options(content_type: &str) -> PutOptions {
        PutOptions {
            content_type: Some(content_type.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_put_append_get() {
        let store = open_store();

        let mut options = put_options("application/octet-stream");
        options.data = Some(Bytes::from_static(b"hello"));
        let outcome = store.put("/s", options).await.unwrap();
        assert!(outcome.created);
        assert_eq!(outcome.next_offset, format_offset(1, 5));

        let next = store
            .append("/s", Bytes::from_static(b" world"), AppendOptions::default())
            .await
            .unwrap();
        assert_eq!(next, format_offset(2, 11));

        let snapshot = store.get("/s", Some("-1")).await.unwrap();
        assert_eq!(&snapshot.messages[0].data[..], b"hello world");

        let offset = format_offset(0, 5);
        let tail = store.get("/s", Some(offset.as_str())).await.unwrap();
        assert_eq!(&tail.messages[0].data[..], b" world");
    }

    #[tokio::test]
    async fn test_idempotent_put_and_conflicts() {
        let store = open_store();
        let mut options = put_options("application/json");
        options.ttl_seconds = Some(60);

        assert!(store.put("/s", options.clone()).await.unwrap().created);
        assert!(!store.put("/s", options.clone()).await.unwrap().created);

        options.ttl_seconds = Some(120);
        assert!(matches!(
            store.put("/s", options).await,
            Err(StoreError::StreamConflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_json_convention_persists() {
        let store = open_store();
        let mut options = put_options("application/json");
        options.data = Some(Bytes::from_static(b"{\"a\":1}"));
        store.put("/s", options).await.unwrap();
        store
            .append(
                "/s",
                Bytes::from_static(b"[{\"a\":2}]"),
                AppendOptions::default(),
            )
            .await
            .unwrap();

        let snapshot = store.get("/s", Some("-1")).await.unwrap();
        let body = store.format_response("/s", &snapshot.messages).await;
        assert_eq!(&body[..], b"[{\"a\":1},{\"a\":2}]");
    }

    #[tokio::test]
    async fn test_expired_row_is_tombstoned() {
        let store = open_store();
        let mut options = put_options("text/plain");
        options.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        store.put("/s", options).await.unwrap();

        assert!(!store.has("/s").await);
        assert!(matches!(
            store.get("/s", None).await,
            Err(StoreError::StreamNotFound(_))
        ));
        // The row itself is gone, so a fresh create works.
        assert!(store.put("/s", put_options("text/plain")).await.unwrap().created);
    }

    #[tokio::test]
    async fn test_delete() {
        let store = open_store();
        store.put("/s", put_options("text/plain")).await.unwrap();
        assert!(store.has("/s").await);
        assert!(store.delete("/s").await.unwrap());
        assert!(!store.has("/s").await);
        assert!(!store.delete("/s").await.unwrap());
    }

    #[tokio::test]
    async fn test_sequence_validation() {
        let store = open_store();
        store
            .put("/s", put_options("application/octet-stream"))
            .await
            .unwrap();

        let seq = |s: &str| AppendOptions {
            seq: Some(s.to_string()),
            ..Default::default()
        };
        store.append("/s", Bytes::from_static(b"a"), seq("01")).await.unwrap();
        assert!(matches!(
            store.append("/s", Bytes::from_static(b"b"), seq("01")).await,
            Err(StoreError::SequenceConflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_wait_wakes_on_append() {
        let store = open_store();
        store
            .put("/s", put_options("application/octet-stream"))
            .await
            .unwrap();

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move {
                store.wait_for_data("/s", &format_offset(0, 0), 5_000).await
            })
        };

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        store
            .append("/s", Bytes::from_static(b"x"), AppendOptions::default())
            .await
            .unwrap();

        let outcome = waiter.await.unwrap().unwrap();
        assert!(!outcome.timed_out);
        assert_eq!(&outcome.messages[0].data[..], b"x");
    }
}
