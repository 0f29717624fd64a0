//! Per-path waiter registry.
//!
//! A waiter is a one-shot suspension: a reader parked at an offset,
//! resolved exactly once by a notifying append, by stream deletion, or by
//! its own timeout. The registry is owned by a single store instance and
//! does not survive restarts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use rill_protocol::offset::Offset;

use crate::types::{StreamMessage, WaitOutcome};

struct Waiter {
    id: u64,
    offset: Offset,
    resolver: oneshot::Sender<WaitOutcome>,
}

/// Registry of pending waiters, keyed by path.
#[derive(Default)]
pub struct WaiterRegistry {
    waiters: Mutex<HashMap<String, Vec<Waiter>>>,
    next_id: AtomicU64,
}

impl WaiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a waiter at `offset`. The returned id unlinks it on timeout.
    pub fn enroll(&self, path: &str, offset: Offset) -> (u64, oneshot::Receiver<WaitOutcome>) {
        let (tx, rx) = oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.waiters
            .lock()
            .entry(path.to_string())
            .or_default()
            .push(Waiter {
                id,
                offset,
                resolver: tx,
            });
        (id, rx)
    }

    /// Unlink a waiter without resolving it. Safe if it was already
    /// removed by a notification.
    pub fn remove(&self, path: &str, id: u64) {
        let mut waiters = self.waiters.lock();
        if let Some(list) = waiters.get_mut(path) {
            list.retain(|w| w.id != id);
            if list.is_empty() {
                waiters.remove(path);
            }
        }
    }

    /// Resolve every waiter the new buffer length satisfies with a single
    /// message covering the bytes past its offset. Waiters at or beyond
    /// the new length are re-enrolled.
    pub fn notify_append(&self, path: &str, buffer: &Bytes) {
        let mut waiters = self.waiters.lock();
        let Some(list) = waiters.get_mut(path) else {
            return;
        };

        let pending = std::mem::take(list);
        let now = Utc::now().timestamp_millis();
        let mut resolved = 0usize;

        for waiter in pending {
            if (waiter.offset.position as usize) < buffer.len() {
                let outcome = WaitOutcome {
                    messages: vec![StreamMessage {
                        data: buffer.slice(waiter.offset.position as usize..),
                        offset: waiter.offset.to_string(),
                        timestamp: now,
                    }],
                    timed_out: false,
                };
                // A closed receiver means the caller abandoned the wait.
                let _ = waiter.resolver.send(outcome);
                resolved += 1;
            } else {
                list.push(waiter);
            }
        }

        if list.is_empty() {
            waiters.remove(path);
        }
        if resolved > 0 {
            debug!(path = %path, resolved, "resolved waiters after append");
        }
    }

    /// Resolve every waiter for `path` with an empty, non-timed-out
    /// result: the stream vanished.
    pub fn notify_delete(&self, path: &str) {
        let Some(list) = self.waiters.lock().remove(path) else {
            return;
        };
        for waiter in list {
            let _ = waiter.resolver.send(WaitOutcome {
                messages: Vec::new(),
                timed_out: false,
            });
        }
    }

    /// Number of parked waiters for `path`.
    pub fn pending(&self, path: &str) -> usize {
        self.waiters.lock().get(path).map_or(0, Vec::len)
    }
}

/// Race an enrolled waiter against its timeout.
///
/// On timeout the waiter is unlinked from the registry before returning.
/// A dropped resolver (registry torn down) reads as a deletion.
pub async fn await_waiter(
    registry: &WaiterRegistry,
    path: &str,
    id: u64,
    receiver: oneshot::Receiver<WaitOutcome>,
    timeout_ms: u64,
) -> WaitOutcome {
    match tokio::time::timeout(Duration::from_millis(timeout_ms), receiver).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(_)) => WaitOutcome {
            messages: Vec::new(),
            timed_out: false,
        },
        Err(_) => {
            registry.remove(path, id);
            WaitOutcome {
                messages: Vec::new(),
                timed_out: true,
            }
        }
    }
}
