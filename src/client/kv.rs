use bytes::Bytes;
use tracing::debug;

use super::Session;
use super::SessionInner;
use crate::network::DeleteRequest;
use crate::network::GetRequest;
use crate::network::PutRequest;
use crate::network::RequestContext;
use crate::network::ScanRequest;
use crate::Error;
use crate::ErrorCode;
use crate::Result;
use crate::ScanBatch;

impl SessionInner {
    pub(crate) async fn put(
        &self,
        key: Bytes,
        value: Bytes,
    ) -> Result<()> {
        let request = PutRequest {
            context: self.context(),
            key,
            value,
        };
        self.call("put", |t, ep| {
            let request = request.clone();
            async move { t.put(&ep, request).await }
        })
        .await
    }

    /// `Ok(None)` when the key does not exist.
    pub(crate) async fn get_raw(
        &self,
        context: RequestContext,
        key: Bytes,
    ) -> Result<Option<Bytes>> {
        let request = GetRequest { context, key };
        self.call("get", |t, ep| {
            let request = request.clone();
            async move { t.get(&ep, request).await }
        })
        .await
    }

    pub(crate) async fn delete(
        &self,
        key: Bytes,
    ) -> Result<()> {
        let request = DeleteRequest {
            context: self.context(),
            key,
        };
        self.call("delete", |t, ep| {
            let request = request.clone();
            async move { t.delete(&ep, request).await }
        })
        .await
    }

    pub(crate) async fn scan_batch(
        &self,
        start_key: Bytes,
        end_key: Bytes,
    ) -> Result<ScanBatch> {
        let request = ScanRequest {
            context: self.context(),
            start_key,
            end_key,
            size_limit: self.config.scan_batch_size,
        };
        let batch = self
            .call("scan", |t, ep| {
                let request = request.clone();
                async move { t.scan(&ep, request).await }
            })
            .await?;
        debug!(items = batch.items.len(), has_more = batch.has_more, "Scan batch received");
        Ok(batch)
    }
}

impl Session {
    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    /// - `ClusterDown` when no member accepted the write
    /// - `Timeout` when every attempt timed out
    /// - `PermissionDenied` when the login token is no longer valid
    pub fn put(
        &self,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
    ) -> Result<()> {
        let key = Bytes::copy_from_slice(key.as_ref());
        let value = Bytes::copy_from_slice(value.as_ref());
        self.run("client::put", self.inner().put(key, value))
    }

    /// Retrieves the value stored under `key`.
    ///
    /// # Errors
    /// - `NoSuchKey` when the key is absent
    /// - `ClusterDown` / `Timeout` as for [`Session::put`]
    pub fn get(
        &self,
        key: impl AsRef<[u8]>,
    ) -> Result<Bytes> {
        let key = Bytes::copy_from_slice(key.as_ref());
        let inner = self.inner();
        self.run("client::get", async move {
            inner
                .get_raw(inner.context(), key.clone())
                .await?
                .ok_or_else(|| Error::status(ErrorCode::NoSuchKey, format!("key {key:?} not found")))
        })
    }

    /// Removes `key`. Deleting an absent key succeeds.
    pub fn delete(
        &self,
        key: impl AsRef<[u8]>,
    ) -> Result<()> {
        let key = Bytes::copy_from_slice(key.as_ref());
        self.run("client::delete", self.inner().delete(key))
    }

    /// Reads one batch of `[start, end)`; an empty `end` is unbounded.
    ///
    /// At most `scan_batch_size` pairs are returned; `has_more` tells whether
    /// the range continues past the last one.
    pub fn scan_once(
        &self,
        start: impl AsRef<[u8]>,
        end: impl AsRef<[u8]>,
    ) -> Result<ScanBatch> {
        let start = Bytes::copy_from_slice(start.as_ref());
        let end = Bytes::copy_from_slice(end.as_ref());
        self.run("client::scan", self.inner().scan_batch(start, end))
    }
}
