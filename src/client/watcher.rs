use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;

use super::Session;
use super::SessionInner;
use crate::network::WatchRequest;
use crate::watch::Delivery;
use crate::watch::TimeoutHandle;
use crate::watch::WatchEvent;
use crate::watch::WatchHandle;
use crate::watch::WatchNotification;
use crate::Error;
use crate::ErrorCode;
use crate::Result;

impl SessionInner {
    async fn watch<C, F>(
        self: &Arc<Self>,
        key: Bytes,
        callback: F,
        context: Arc<C>,
    ) -> Result<WatchHandle>
    where
        C: Send + Sync + 'static,
        F: FnOnce(WatchEvent<C>, ErrorCode) + Send + 'static,
    {
        let request_context = self.context();
        let baseline = self.get_raw(request_context.clone(), key.clone()).await?;

        let token = self.shutdown.child_token();
        let handle = self.watches.register(key.clone(), callback, context, token.clone());
        let request = WatchRequest {
            context: request_context,
            key,
            old_value: baseline.clone().unwrap_or_default(),
            key_exist: baseline.is_some(),
        };
        tokio::spawn(long_poll(self.clone(), handle.id(), request, token));
        Ok(handle)
    }
}

/// Waits for the key to leave the baseline in `request`, then posts exactly
/// one delivery.
///
/// Every retry reuses the namespace the baseline was read in, whatever the
/// session logs into meanwhile. Connectivity failures are retried after
/// `watch_retry_delay`; any other failure is delivered with its code.
async fn long_poll(
    inner: Arc<SessionInner>,
    id: u64,
    request: WatchRequest,
    token: CancellationToken,
) {
    loop {
        let polled = tokio::select! {
            _ = token.cancelled() => {
                trace!(watch_id = id, "Watch long-poll stopped");
                return;
            }
            polled = inner.router.call("watch", None, |t, ep| {
                let request = request.clone();
                async move { t.watch(&ep, request).await }
            }) => polled,
        };

        let notification = match polled {
            Ok(changed) => WatchNotification::changed(changed.key, changed.value, changed.deleted),
            Err(e) if matches!(e.code(), ErrorCode::ClusterDown | ErrorCode::Timeout) => {
                debug!(watch_id = id, "Watch long-poll failed, retrying: {}", e);
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(inner.config.watch_retry_delay()) => continue,
                }
            }
            Err(e) => WatchNotification::failed(request.key.clone(), e.code()),
        };

        inner.deliveries.post(Delivery::Watch { id, notification }).await;
        return;
    }
}

impl Session {
    /// Registers a single-shot watch on `key`.
    ///
    /// The key's current state is read first; `callback` runs once, on the
    /// dispatcher thread, when the key changes or is deleted, with
    /// `ErrorCode::Ok`. If the session expires first it runs with
    /// `ErrorCode::Timeout`. `context` is handed back inside the event and
    /// released once the callback ran or the watch was cancelled.
    ///
    /// # Errors
    /// The baseline read failed; no callback will run.
    pub fn watch<C, F>(
        &self,
        key: impl AsRef<[u8]>,
        callback: F,
        context: Arc<C>,
    ) -> Result<WatchHandle>
    where
        C: Send + Sync + 'static,
        F: FnOnce(WatchEvent<C>, ErrorCode) + Send + 'static,
    {
        let key = Bytes::copy_from_slice(key.as_ref());
        self.run("client::watch", self.inner().watch(key, callback, context))
    }

    /// Registers the callback run when the session expires.
    ///
    /// Only one registration is live: a new one replaces the pending one,
    /// whose callback and context are dropped unrun.
    pub fn register_session_timeout<C, F>(
        &self,
        callback: F,
        context: Arc<C>,
    ) -> Result<TimeoutHandle>
    where
        C: Send + Sync + 'static,
        F: FnOnce(Arc<C>) + Send + 'static,
    {
        let result = if self.is_closed() {
            Err(Error::SessionClosed)
        } else {
            Ok(self.inner().timeouts.register(callback, context))
        };
        self.record(&result);
        result
    }
}
