//! Network abstraction between the client and cluster members.
//!
//! The bytes-on-wire protocol is not this crate's concern: a [`Transport`]
//! moves one logical request to one member and reports what that member
//! answered. Leader discovery, retries and timeouts live above this layer in
//! the session router.
mod messages;

pub use messages::*;

#[cfg(test)]
use mockall::automock;

use async_trait::async_trait;
use bytes::Bytes;

use crate::ErrorCode;
use crate::ScanBatch;

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// What a single member answered, when it did not answer with success.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The member could not be contacted
    #[error("member {endpoint} is unreachable")]
    Unreachable { endpoint: String },

    /// The member is not the leader; it may know who is
    #[error("member is not the leader (hint: {leader_hint:?})")]
    NotLeader { leader_hint: Option<String> },

    /// The member accepted the request but did not answer in time
    #[error("request timed out")]
    Timeout,

    /// The member processed the request and refused it
    #[error("request rejected: {0}")]
    Rejected(ErrorCode),
}

impl TransportError {
    /// Outcome recorded when this is the final answer of a call.
    pub fn code(&self) -> ErrorCode {
        match self {
            TransportError::Unreachable { .. } | TransportError::NotLeader { .. } => ErrorCode::ClusterDown,
            TransportError::Timeout => ErrorCode::Timeout,
            TransportError::Rejected(code) => *code,
        }
    }
}

impl From<TransportError> for crate::Error {
    fn from(err: TransportError) -> Self {
        crate::Error::status(err.code(), err.to_string())
    }
}

/// One logical call to one cluster member.
///
/// Implementations must be cheap to call concurrently; the session issues
/// requests from several tasks at once (user calls, keepalive, watch
/// long-polls).
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Raft progress of the member (role, term, log positions).
    async fn status(
        &self,
        endpoint: &str,
    ) -> TransportResult<StatusResponse>;

    /// Per-operation throughput counters of the member.
    async fn statistics(
        &self,
        endpoint: &str,
    ) -> TransportResult<StatisticsResponse>;

    async fn put(
        &self,
        endpoint: &str,
        req: PutRequest,
    ) -> TransportResult<()>;

    /// `Ok(None)` when the key is absent.
    async fn get(
        &self,
        endpoint: &str,
        req: GetRequest,
    ) -> TransportResult<Option<Bytes>>;

    async fn delete(
        &self,
        endpoint: &str,
        req: DeleteRequest,
    ) -> TransportResult<()>;

    /// Reads at most `size_limit` pairs of `[start_key, end_key)`.
    async fn scan(
        &self,
        endpoint: &str,
        req: ScanRequest,
    ) -> TransportResult<ScanBatch>;

    /// Non-blocking acquisition; `Rejected(LockFail)` if another live session holds it.
    async fn lock(
        &self,
        endpoint: &str,
        req: LockRequest,
    ) -> TransportResult<()>;

    async fn unlock(
        &self,
        endpoint: &str,
        req: LockRequest,
    ) -> TransportResult<()>;

    /// Long-poll: resolves once the key no longer matches the caller's baseline.
    async fn watch(
        &self,
        endpoint: &str,
        req: WatchRequest,
    ) -> TransportResult<WatchResponse>;

    /// Refreshes the session lease and reports the locks it holds.
    async fn keep_alive(
        &self,
        endpoint: &str,
        req: KeepAliveRequest,
    ) -> TransportResult<()>;

    /// Returns the login token identifying the user on later requests.
    async fn login(
        &self,
        endpoint: &str,
        req: LoginRequest,
    ) -> TransportResult<String>;

    async fn logout(
        &self,
        endpoint: &str,
        token: String,
    ) -> TransportResult<()>;

    async fn register(
        &self,
        endpoint: &str,
        req: Credentials,
    ) -> TransportResult<()>;

    /// Drops binlog entries before `end_index` on that member.
    async fn clean_binlog(
        &self,
        endpoint: &str,
        end_index: i64,
    ) -> TransportResult<()>;
}
