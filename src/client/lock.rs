use bytes::Bytes;
use tracing::debug;
use tracing::trace;

use super::Session;
use super::SessionInner;
use crate::network::LockRequest;
use crate::network::WatchRequest;
use crate::Error;
use crate::ErrorCode;
use crate::Result;

impl SessionInner {
    pub(crate) async fn try_lock(
        &self,
        key: Bytes,
    ) -> Result<()> {
        let request = LockRequest {
            context: self.anonymous_context(),
            key: key.clone(),
        };
        self.call("lock", |t, ep| {
            let request = request.clone();
            async move { t.lock(&ep, request).await }
        })
        .await?;
        self.held_locks.lock().insert(key);
        Ok(())
    }

    pub(crate) async fn lock(
        &self,
        key: Bytes,
    ) -> Result<()> {
        loop {
            match self.try_lock(key.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if e.code() == ErrorCode::LockFail => {}
                Err(e) => return Err(e),
            }

            let holder = match self.get_raw(self.anonymous_context(), key.clone()).await {
                Ok(Some(holder)) => holder,
                // Released between the two requests
                Ok(None) => continue,
                Err(e) => return Err(e),
            };
            trace!(key = ?key, holder = ?holder, "Lock busy, waiting for release");
            self.wait_for_release(key.clone(), holder).await;
        }
    }

    /// Returns once the lock key no longer names `holder`, or after the retry
    /// delay if the cluster can't be watched.
    async fn wait_for_release(
        &self,
        key: Bytes,
        holder: Bytes,
    ) {
        let request = WatchRequest {
            context: self.anonymous_context(),
            key,
            old_value: holder,
            key_exist: true,
        };
        let watched = self
            .router
            .call("lock_wait", None, |t, ep| {
                let request = request.clone();
                async move { t.watch(&ep, request).await }
            })
            .await;
        if let Err(e) = watched {
            debug!("Lock wait could not watch the holder: {}", e);
            tokio::time::sleep(self.config.lock_retry_delay()).await;
        }
    }

    pub(crate) async fn unlock(
        &self,
        key: Bytes,
    ) -> Result<()> {
        if !self.held_locks.lock().contains(&key) {
            return Err(Error::status(ErrorCode::LockFail, format!("lock {key:?} is not held")));
        }
        let request = LockRequest {
            context: self.anonymous_context(),
            key: key.clone(),
        };
        let result = self
            .call("unlock", |t, ep| {
                let request = request.clone();
                async move { t.unlock(&ep, request).await }
            })
            .await;
        match &result {
            Ok(()) => {
                self.held_locks.lock().remove(&key);
            }
            // The cluster no longer attributes the lock to this session
            Err(e) if e.code() == ErrorCode::LockFail => {
                self.held_locks.lock().remove(&key);
            }
            Err(_) => {}
        }
        result
    }
}

impl Session {
    /// Acquires `key`, blocking until the current holder releases it.
    ///
    /// # Errors
    /// `ClusterDown` / `Timeout` when the cluster can't be reached; the wait
    /// also ends with [`Error::SessionClosed`] if the session is closed.
    pub fn lock(
        &self,
        key: impl AsRef<[u8]>,
    ) -> Result<()> {
        let key = Bytes::copy_from_slice(key.as_ref());
        self.run("client::lock", self.inner().lock(key))
    }

    /// Acquires `key` if it is free.
    ///
    /// # Errors
    /// `LockFail` if another live session holds it.
    pub fn trylock(
        &self,
        key: impl AsRef<[u8]>,
    ) -> Result<()> {
        let key = Bytes::copy_from_slice(key.as_ref());
        self.run("client::trylock", self.inner().try_lock(key))
    }

    /// Releases a lock held by this session.
    ///
    /// # Errors
    /// `LockFail` if this session does not hold `key`.
    pub fn unlock(
        &self,
        key: impl AsRef<[u8]>,
    ) -> Result<()> {
        let key = Bytes::copy_from_slice(key.as_ref());
        self.run("client::unlock", self.inner().unlock(key))
    }
}
