use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;

use crate::NodeRole;
use crate::StatCounter;

/// Who is asking: attached to every data, lock and watch request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub session_id: String,
    /// Login token; `None` for the anonymous user
    pub user_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutRequest {
    pub context: RequestContext,
    pub key: Bytes,
    pub value: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetRequest {
    pub context: RequestContext,
    pub key: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub context: RequestContext,
    pub key: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRequest {
    pub context: RequestContext,
    pub start_key: Bytes,
    /// Exclusive; empty means unbounded
    pub end_key: Bytes,
    pub size_limit: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRequest {
    pub context: RequestContext,
    pub key: Bytes,
}

/// The watcher's view of the key when it subscribed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchRequest {
    pub context: RequestContext,
    pub key: Bytes,
    pub old_value: Bytes,
    pub key_exist: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchResponse {
    pub key: Bytes,
    pub value: Bytes,
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepAliveRequest {
    pub context: RequestContext,
    pub locks: Vec<Bytes>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Login binds the token to the session that obtained it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    pub context: RequestContext,
    pub credentials: Credentials,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub role: NodeRole,
    pub term: i64,
    pub last_log_index: i64,
    pub last_log_term: i64,
    pub commit_index: i64,
    pub last_applied: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsResponse {
    pub role: NodeRole,
    /// Indexed by [`crate::StatKind::index`]
    pub stats: [StatCounter; 8],
}
