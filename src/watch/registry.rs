use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;

use crate::ErrorCode;

/// What a watch callback receives.
///
/// `context` is the same `Arc` handed to `watch()`; the registry drops its own
/// reference once the callback has run (or the watch was cancelled).
pub struct WatchEvent<C> {
    pub key: Bytes,
    /// New value; empty when `deleted` is set or on failure
    pub value: Bytes,
    pub deleted: bool,
    pub context: Arc<C>,
}

impl<C> fmt::Debug for WatchEvent<C> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("WatchEvent")
            .field("key", &self.key)
            .field("value", &self.value)
            .field("deleted", &self.deleted)
            .finish_non_exhaustive()
    }
}

/// Untyped payload travelling from a long-poll task to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WatchNotification {
    pub key: Bytes,
    pub value: Bytes,
    pub deleted: bool,
    pub code: ErrorCode,
}

impl WatchNotification {
    pub(crate) fn changed(
        key: Bytes,
        value: Bytes,
        deleted: bool,
    ) -> Self {
        Self {
            key,
            value,
            deleted,
            code: ErrorCode::Ok,
        }
    }

    pub(crate) fn failed(
        key: Bytes,
        code: ErrorCode,
    ) -> Self {
        Self {
            key,
            value: Bytes::new(),
            deleted: false,
            code,
        }
    }
}

pub(crate) type WatchCallback = Box<dyn FnOnce(WatchNotification) + Send + 'static>;

struct WatchEntry {
    key: Bytes,
    callback: WatchCallback,
    /// Stops the long-poll task serving this entry
    cancel: CancellationToken,
}

/// Table of pending watch registrations, keyed by watch id.
///
/// An entry leaves the table exactly once: through [`WatchRegistry::retire`]
/// (the caller then owns and invokes the callback), [`WatchRegistry::cancel`]
/// or [`WatchRegistry::abandon_all`] (the callback is dropped unrun).
pub(crate) struct WatchRegistry {
    table: Mutex<HashMap<u64, WatchEntry>>,
    next_id: AtomicU64,
}

impl fmt::Debug for WatchRegistry {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("WatchRegistry")
            .field("pending", &self.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}

impl WatchRegistry {
    pub(crate) fn new() -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Inserts a registration and returns the caller's handle to it.
    ///
    /// The typed callback and its context are erased here; the context is
    /// moved into the boxed closure so it lives exactly as long as the entry.
    pub(crate) fn register<C, F>(
        self: &Arc<Self>,
        key: Bytes,
        callback: F,
        context: Arc<C>,
        cancel: CancellationToken,
    ) -> WatchHandle
    where
        C: Send + Sync + 'static,
        F: FnOnce(WatchEvent<C>, ErrorCode) + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let erased: WatchCallback = Box::new(move |n: WatchNotification| {
            let event = WatchEvent {
                key: n.key,
                value: n.value,
                deleted: n.deleted,
                context,
            };
            callback(event, n.code);
        });

        self.table.lock().insert(
            id,
            WatchEntry {
                key: key.clone(),
                callback: erased,
                cancel,
            },
        );
        trace!(watch_id = id, key = ?key, "Watch registered");

        WatchHandle {
            id,
            key,
            registry: Arc::downgrade(self),
        }
    }

    /// Removes the entry and hands its callback to the caller.
    ///
    /// Returns `None` if the entry was already retired, cancelled or abandoned.
    pub(crate) fn retire(
        &self,
        id: u64,
    ) -> Option<WatchCallback> {
        let entry = self.table.lock().remove(&id)?;
        entry.cancel.cancel();
        trace!(watch_id = id, key = ?entry.key, "Watch retired");
        Some(entry.callback)
    }

    /// Removes the entry without delivering it.
    pub(crate) fn cancel(
        &self,
        id: u64,
    ) -> bool {
        let removed = self.table.lock().remove(&id);
        match removed {
            Some(entry) => {
                entry.cancel.cancel();
                debug!(watch_id = id, key = ?entry.key, "Watch cancelled");
                // Callback and context are dropped here, outside the table lock
                true
            }
            None => false,
        }
    }

    /// Drops every pending registration unrun. Returns how many were dropped.
    pub(crate) fn abandon_all(&self) -> usize {
        let drained: Vec<(u64, WatchEntry)> = self.table.lock().drain().collect();
        for (_, entry) in &drained {
            entry.cancel.cancel();
        }
        let count = drained.len();
        drop(drained);
        if count > 0 {
            debug!(abandoned = count, "Pending watches abandoned");
        }
        count
    }

    /// Ids and keys of every pending registration, in id order.
    pub(crate) fn pending(&self) -> Vec<(u64, Bytes)> {
        let mut pending: Vec<(u64, Bytes)> = self
            .table
            .lock()
            .iter()
            .map(|(id, entry)| (*id, entry.key.clone()))
            .collect();
        pending.sort_unstable_by_key(|(id, _)| *id);
        pending
    }

    pub(crate) fn contains(
        &self,
        id: u64,
    ) -> bool {
        self.table.lock().contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.table.lock().len()
    }
}

/// Caller-side handle of a watch registration.
///
/// Dropping the handle leaves the watch pending; use [`WatchHandle::cancel`]
/// to withdraw it.
#[derive(Debug, Clone)]
pub struct WatchHandle {
    id: u64,
    key: Bytes,
    registry: Weak<WatchRegistry>,
}

impl WatchHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &Bytes {
        &self.key
    }

    /// Withdraws the watch. Returns `false` if it was already delivered,
    /// cancelled, or its session is gone.
    pub fn cancel(&self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.cancel(self.id),
            None => false,
        }
    }

    /// Whether the callback has yet to run (and still may).
    pub fn is_pending(&self) -> bool {
        self.registry.upgrade().map(|r| r.contains(self.id)).unwrap_or(false)
    }
}
