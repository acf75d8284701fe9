use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;

use parking_lot::Mutex;
use tracing::debug;
use tracing::trace;

pub(crate) type TimeoutCallback = Box<dyn FnOnce() + Send + 'static>;

struct TimeoutEntry {
    id: u64,
    callback: TimeoutCallback,
}

#[derive(Default)]
struct Slots {
    pending: Option<TimeoutEntry>,
    /// Moved here by an expiry; waits for the dispatcher.
    armed: Option<TimeoutEntry>,
}

impl Slots {
    fn holds(
        &self,
        id: u64,
    ) -> bool {
        self.pending.as_ref().map(|e| e.id) == Some(id) || self.armed.as_ref().map(|e| e.id) == Some(id)
    }
}

/// Single-slot table for the session-timeout callback.
///
/// Registering while a callback is pending replaces it: the previous
/// callback and its context are dropped without running. An expiry arms the
/// pending entry, so a later registration cannot displace it before the
/// dispatcher runs it.
pub(crate) struct TimeoutRegistry {
    slots: Mutex<Slots>,
    next_id: AtomicU64,
}

impl fmt::Debug for TimeoutRegistry {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("TimeoutRegistry")
            .field("pending", &self.current())
            .field("next_id", &self.next_id)
            .finish()
    }
}

impl TimeoutRegistry {
    pub(crate) fn new() -> Self {
        Self {
            slots: Mutex::new(Slots::default()),
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn register<C, F>(
        self: &Arc<Self>,
        callback: F,
        context: Arc<C>,
    ) -> TimeoutHandle
    where
        C: Send + Sync + 'static,
        F: FnOnce(Arc<C>) + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let erased: TimeoutCallback = Box::new(move || callback(context));

        let replaced = self.slots.lock().pending.replace(TimeoutEntry { id, callback: erased });
        if let Some(old) = replaced {
            debug!(timeout_id = id, replaced_id = old.id, "Session timeout callback replaced");
        } else {
            trace!(timeout_id = id, "Session timeout callback registered");
        }

        TimeoutHandle {
            id,
            registry: Arc::downgrade(self),
        }
    }

    /// Id of the pending registration, if any.
    pub(crate) fn current(&self) -> Option<u64> {
        self.slots.lock().pending.as_ref().map(|e| e.id)
    }

    /// Moves the pending registration out of reach of replacement and
    /// returns its id for delivery.
    pub(crate) fn arm(&self) -> Option<u64> {
        let mut slots = self.slots.lock();
        let entry = slots.pending.take()?;
        let id = entry.id;
        if let Some(stale) = slots.armed.replace(entry) {
            debug!(timeout_id = stale.id, "Armed session timeout superseded");
        }
        Some(id)
    }

    /// Takes the callback if `id` is still pending or armed.
    pub(crate) fn retire(
        &self,
        id: u64,
    ) -> Option<TimeoutCallback> {
        let mut slots = self.slots.lock();
        if slots.armed.as_ref().map(|e| e.id) == Some(id) {
            return slots.armed.take().map(|e| e.callback);
        }
        if slots.pending.as_ref().map(|e| e.id) == Some(id) {
            return slots.pending.take().map(|e| e.callback);
        }
        None
    }

    fn holds(
        &self,
        id: u64,
    ) -> bool {
        self.slots.lock().holds(id)
    }

    pub(crate) fn cancel(
        &self,
        id: u64,
    ) -> bool {
        let removed = self.retire(id);
        if removed.is_some() {
            debug!(timeout_id = id, "Session timeout callback cancelled");
        }
        removed.is_some()
    }

    pub(crate) fn abandon(&self) -> bool {
        let mut slots = self.slots.lock();
        let pending = slots.pending.take();
        let armed = slots.armed.take();
        drop(slots);
        pending.is_some() || armed.is_some()
    }
}

/// Caller-side handle of a session-timeout registration.
#[derive(Debug, Clone)]
pub struct TimeoutHandle {
    id: u64,
    registry: Weak<TimeoutRegistry>,
}

impl TimeoutHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Withdraws the callback. `false` once it fired, was replaced or cancelled.
    pub fn cancel(&self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.cancel(self.id),
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.registry
            .upgrade()
            .map(|r| r.holds(self.id))
            .unwrap_or(false)
    }
}
