use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::bounded;
use crossbeam_channel::Receiver;
use crossbeam_channel::Sender;
use crossbeam_channel::TrySendError;
use parking_lot::Mutex;
use tracing::debug;
use tracing::error;
use tracing::trace;
use tracing::warn;

use super::TimeoutRegistry;
use super::WatchNotification;
use super::WatchRegistry;
use crate::Result;

/// A request to run one registered callback.
#[derive(Debug)]
pub(crate) enum Delivery {
    Watch {
        id: u64,
        notification: WatchNotification,
    },
    SessionTimeout {
        id: u64,
    },
}

/// Cloneable posting side of the delivery queue, used from runtime tasks.
#[derive(Debug, Clone)]
pub(crate) struct DeliverySender {
    tx: Sender<Delivery>,
}

impl DeliverySender {
    /// Enqueues a delivery. Never blocks a runtime worker: when the queue is
    /// full the blocking send is moved to the blocking pool.
    pub(crate) async fn post(
        &self,
        delivery: Delivery,
    ) {
        match self.tx.try_send(delivery) {
            Ok(()) => {}
            Err(TrySendError::Full(delivery)) => {
                trace!("Delivery queue full, waiting for room");
                let tx = self.tx.clone();
                match tokio::task::spawn_blocking(move || tx.send(delivery)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => debug!("Dispatcher stopped; delivery dropped"),
                    Err(e) => warn!("Blocking delivery task failed: {:?}", e),
                }
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("Dispatcher stopped; delivery dropped");
            }
        }
    }
}

/// Dedicated thread that runs user callbacks off the session runtime.
///
/// Callbacks may call back into the blocking session API; running them on a
/// runtime worker would deadlock `block_on`.
#[derive(Debug)]
pub(crate) struct Dispatcher {
    tx: Sender<Delivery>,
    /// Taken by the thread on start; dropped when it exits so senders
    /// blocked on a full queue are released.
    rx: Mutex<Option<Receiver<Delivery>>>,
    watches: Arc<WatchRegistry>,
    timeouts: Arc<TimeoutRegistry>,
    thread_handle: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: Mutex<Option<Sender<()>>>,
}

impl Dispatcher {
    pub(crate) fn new(
        queue_size: usize,
        watches: Arc<WatchRegistry>,
        timeouts: Arc<TimeoutRegistry>,
    ) -> Self {
        let (tx, rx) = bounded(queue_size);
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            watches,
            timeouts,
            thread_handle: Mutex::new(None),
            shutdown_tx: Mutex::new(None),
        }
    }

    pub(crate) fn sender(&self) -> DeliverySender {
        DeliverySender { tx: self.tx.clone() }
    }

    /// Spawns the dispatcher thread. A dispatcher runs at most once; later
    /// calls are no-ops.
    pub(crate) fn start(&self) -> Result<()> {
        let mut handle_guard = self.thread_handle.lock();
        if handle_guard.is_some() {
            return Ok(());
        }
        let Some(receiver) = self.rx.lock().take() else {
            return Ok(());
        };

        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let watches = self.watches.clone();
        let timeouts = self.timeouts.clone();

        let handle = std::thread::Builder::new().name("nexus-dispatch".to_string()).spawn(move || {
            debug!("Callback dispatcher thread started");
            loop {
                crossbeam_channel::select! {
                    recv(receiver) -> result => {
                        match result {
                            Ok(delivery) => deliver(&watches, &timeouts, delivery),
                            Err(_) => {
                                warn!("Delivery channel closed unexpectedly");
                                break;
                            }
                        }
                    }
                    recv(shutdown_rx) -> _ => {
                        debug!("Callback dispatcher received shutdown signal");
                        break;
                    }
                }
            }
            debug!("Callback dispatcher thread stopped");
        })?;

        *handle_guard = Some(handle);
        *self.shutdown_tx.lock() = Some(shutdown_tx);
        Ok(())
    }

    /// Signals the thread to exit and joins it, unless called from the
    /// dispatcher thread itself (a callback closing its own session).
    pub(crate) fn stop(&self) {
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(());
        }

        let handle = self.thread_handle.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == std::thread::current().id() {
                trace!("Dispatcher stop requested from its own thread; not joining");
                return;
            }
            if handle.join().is_err() {
                error!("Callback dispatcher thread panicked");
            }
        }
    }
}

fn deliver(
    watches: &WatchRegistry,
    timeouts: &TimeoutRegistry,
    delivery: Delivery,
) {
    match delivery {
        Delivery::Watch { id, notification } => match watches.retire(id) {
            Some(callback) => {
                trace!(watch_id = id, code = %notification.code, "Delivering watch event");
                invoke("watch", id, move || callback(notification));
            }
            None => debug!(watch_id = id, "Watch no longer pending; delivery dropped"),
        },
        Delivery::SessionTimeout { id } => match timeouts.retire(id) {
            Some(callback) => {
                trace!(timeout_id = id, "Delivering session timeout");
                invoke("session_timeout", id, callback);
            }
            None => debug!(timeout_id = id, "Timeout no longer pending; delivery dropped"),
        },
    }
}

fn invoke(
    kind: &'static str,
    id: u64,
    callback: impl FnOnce(),
) {
    if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(callback)) {
        error!(kind, id, "Callback panicked: {}", panic_message(&*panic));
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}
