use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::SessionInner;
use crate::network::KeepAliveRequest;
use crate::utils::time::make_session_id;
use crate::watch::Delivery;
use crate::watch::WatchNotification;
use crate::ErrorCode;
use crate::Result;

/// Reports the session and its locks every `keepalive_interval`, and expires
/// the session once `session_timeout` passes without an acknowledgement.
pub(crate) async fn run(inner: Arc<SessionInner>) {
    let mut interval = tokio::time::interval(inner.config.keepalive_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => {
                debug!("Keepalive task stopped");
                return;
            }
            _ = interval.tick() => {}
        }

        match send_keepalive(&inner).await {
            Ok(()) => {
                *inner.last_alive.lock() = Instant::now();
            }
            Err(e) => {
                let silent_for = inner.last_alive.lock().elapsed();
                warn!(silent_ms = silent_for.as_millis() as u64, "Keepalive failed: {}", e);
                if silent_for >= inner.config.session_timeout() {
                    expire(&inner).await;
                }
            }
        }
    }
}

async fn send_keepalive(inner: &SessionInner) -> Result<()> {
    let request = KeepAliveRequest {
        context: inner.context(),
        locks: inner.held_locks.lock().iter().cloned().collect(),
    };
    trace!(locks = request.locks.len(), "Sending keepalive");
    inner
        .call("keepalive", |t, ep| {
            let request = request.clone();
            async move { t.keep_alive(&ep, request).await }
        })
        .await
}

/// The cluster has given up on this session: its locks and login are gone.
///
/// Local state is reset before any callback is queued, so callbacks observe
/// the new session.
pub(crate) async fn expire(inner: &SessionInner) {
    let old_id = inner.session_id();
    let released = std::mem::take(&mut *inner.held_locks.lock());
    if inner.identity.swap(None).is_some() {
        inner.login_expired.store(true, Ordering::Release);
    }
    let new_id = make_session_id();
    inner.session_id.store(Arc::new(new_id.clone()));
    *inner.last_alive.lock() = Instant::now();
    warn!(
        old_session = %old_id,
        new_session = %new_id,
        released_locks = released.len(),
        "Session expired"
    );

    for (id, key) in inner.watches.pending() {
        inner
            .deliveries
            .post(Delivery::Watch {
                id,
                notification: WatchNotification::failed(key, ErrorCode::Timeout),
            })
            .await;
    }
    if let Some(id) = inner.timeouts.arm() {
        inner.deliveries.post(Delivery::SessionTimeout { id }).await;
    }
}
