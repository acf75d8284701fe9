//! Snapshot records returned by cluster queries and range reads.

use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;

/// Role a member reported for itself, or `Offline` when it did not answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRole {
    Leader,
    Candidate,
    Follower,
    Offline,
}

impl NodeRole {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeRole::Leader => "Leader",
            NodeRole::Candidate => "Candidate",
            NodeRole::Follower => "Follower",
            NodeRole::Offline => "Offline",
        }
    }
}

impl std::fmt::Display for NodeRole {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One member as seen by a single `show()` call.
///
/// Unreachable members are reported with `role == Offline` and `term == -1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterNode {
    pub id: String,
    pub role: NodeRole,
    pub term: i64,
    pub last_log_index: i64,
    pub last_log_term: i64,
    pub commit_index: i64,
    pub last_applied: i64,
}

impl ClusterNode {
    pub(crate) fn offline(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: NodeRole::Offline,
            term: -1,
            last_log_index: 0,
            last_log_term: 0,
            commit_index: 0,
            last_applied: 0,
        }
    }

    pub fn is_reachable(&self) -> bool {
        self.role != NodeRole::Offline
    }
}

/// Operation kinds tracked by per-node statistics, in reporting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatKind {
    Put,
    Get,
    Delete,
    Scan,
    KeepAlive,
    Lock,
    Unlock,
    Watch,
}

impl StatKind {
    pub const ALL: [StatKind; 8] = [
        StatKind::Put,
        StatKind::Get,
        StatKind::Delete,
        StatKind::Scan,
        StatKind::KeepAlive,
        StatKind::Lock,
        StatKind::Unlock,
        StatKind::Watch,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// `current` is the count in the open window, `average` the long-run mean per window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatCounter {
    pub current: i64,
    pub average: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStats {
    pub id: String,
    pub role: NodeRole,
    pub stats: [StatCounter; 8],
}

impl NodeStats {
    pub(crate) fn offline(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: NodeRole::Offline,
            stats: [StatCounter::default(); 8],
        }
    }

    pub fn stat(
        &self,
        kind: StatKind,
    ) -> StatCounter {
        self.stats[kind.index()]
    }

    pub fn is_reachable(&self) -> bool {
        self.role != NodeRole::Offline
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvPair {
    pub key: Bytes,
    pub value: Bytes,
}

impl KvPair {
    pub fn new(
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// One round trip of a range read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanBatch {
    pub items: Vec<KvPair>,
    /// The range holds more pairs after the last item
    pub has_more: bool,
}
