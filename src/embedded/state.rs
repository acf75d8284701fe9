use std::collections::BTreeMap;
use std::collections::HashMap;
use std::time::Duration;
use std::time::Instant;

use bytes::Bytes;
use tracing::debug;
use tracing::info;

use super::stats::NodeCounters;
use super::stats::HISTORY_WINDOWS;
use crate::network::RequestContext;
use crate::network::StatisticsResponse;
use crate::network::StatusResponse;
use crate::network::TransportError;
use crate::network::TransportResult;
use crate::network::WatchRequest;
use crate::network::WatchResponse;
use crate::utils::cluster::in_range;
use crate::utils::cluster::is_majority;
use crate::ErrorCode;
use crate::KvPair;
use crate::NodeRole;
use crate::ScanBatch;
use crate::StatKind;

/// Key space of users that are not logged in; locks always live here.
pub(super) const ANONYMOUS: &str = "";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum StoredValue {
    Data(Bytes),
    /// Lock owned by a session; its visible value is the owner id
    Lock { session_id: String },
}

#[derive(Debug)]
struct SessionRecord {
    last_seen: Instant,
}

#[derive(Debug)]
struct UserRecord {
    password: String,
    token: Option<String>,
}

#[derive(Debug)]
struct Login {
    username: String,
    session_id: String,
}

#[derive(Debug, Default)]
struct NodeProgress {
    online: bool,
    last_applied: i64,
    cleaned_before: i64,
    counters: NodeCounters,
}

/// A change observers of a key may care about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum ClusterEvent {
    KeyChanged { namespace: String, key: Bytes },
    Topology,
}

/// Everything the simulated cluster knows, behind one lock.
#[derive(Debug)]
pub(super) struct ClusterState {
    endpoints: Vec<String>,
    nodes: Vec<NodeProgress>,
    leader: Option<usize>,
    term: i64,
    log_index: i64,
    store: HashMap<String, BTreeMap<Bytes, StoredValue>>,
    sessions: HashMap<String, SessionRecord>,
    users: HashMap<String, UserRecord>,
    logins: HashMap<String, Login>,
    session_expire: Duration,
    /// Length of a statistics window; `None` rolls only on demand.
    stats_window: Option<Duration>,
    window_started: Instant,
}

impl ClusterState {
    pub(super) fn new(
        endpoints: Vec<String>,
        session_expire: Duration,
    ) -> Self {
        let nodes = endpoints
            .iter()
            .map(|_| NodeProgress {
                online: true,
                ..NodeProgress::default()
            })
            .collect();
        Self {
            leader: if endpoints.is_empty() { None } else { Some(0) },
            term: 1,
            endpoints,
            nodes,
            log_index: 0,
            store: HashMap::new(),
            sessions: HashMap::new(),
            users: HashMap::new(),
            logins: HashMap::new(),
            session_expire,
            stats_window: None,
            window_started: Instant::now(),
        }
    }

    pub(super) fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    pub(super) fn set_session_expire(
        &mut self,
        expire: Duration,
    ) {
        self.session_expire = expire;
    }

    pub(super) fn set_stats_window(
        &mut self,
        window: Option<Duration>,
    ) {
        self.stats_window = window.filter(|w| !w.is_zero());
        self.window_started = Instant::now();
    }

    fn index_of(
        &self,
        endpoint: &str,
    ) -> TransportResult<usize> {
        self.endpoints
            .iter()
            .position(|e| e == endpoint)
            .ok_or_else(|| TransportError::Unreachable {
                endpoint: endpoint.to_string(),
            })
    }

    fn online_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.online).count()
    }

    pub(super) fn leader_endpoint(&self) -> Option<String> {
        self.leader.map(|i| self.endpoints[i].clone())
    }

    /// Node index of `endpoint` when it is an online member.
    fn reachable(
        &self,
        endpoint: &str,
    ) -> TransportResult<usize> {
        let idx = self.index_of(endpoint)?;
        if !self.nodes[idx].online {
            return Err(TransportError::Unreachable {
                endpoint: endpoint.to_string(),
            });
        }
        Ok(idx)
    }

    /// Admits a leader-bound request at `endpoint`, counting it under `kind`.
    ///
    /// Expired sessions are swept first so every request sees a consistent
    /// lock and login table.
    pub(super) fn admit(
        &mut self,
        endpoint: &str,
        kind: Option<StatKind>,
        events: &mut Vec<ClusterEvent>,
    ) -> TransportResult<()> {
        self.check_leader(endpoint)?;
        self.roll_due_stats(Instant::now());
        if let Some(kind) = kind {
            if let Some(idx) = self.leader {
                self.nodes[idx].counters.record(kind);
            }
        }
        self.sweep_sessions(Instant::now(), events);
        Ok(())
    }

    pub(super) fn check_leader(
        &self,
        endpoint: &str,
    ) -> TransportResult<()> {
        let idx = self.reachable(endpoint)?;
        if self.leader != Some(idx) {
            return Err(TransportError::NotLeader {
                leader_hint: self.leader_endpoint(),
            });
        }
        if !is_majority(self.online_count(), self.endpoints.len()) {
            return Err(TransportError::Rejected(ErrorCode::ClusterDown));
        }
        Ok(())
    }

    // ---- topology ----

    pub(super) fn set_online(
        &mut self,
        endpoint: &str,
        online: bool,
    ) -> bool {
        let Ok(idx) = self.index_of(endpoint) else {
            return false;
        };
        self.nodes[idx].online = online;
        if online {
            self.nodes[idx].last_applied = self.log_index;
        } else if self.leader == Some(idx) {
            self.leader = None;
            // Survivors with a quorum elect the lowest online member
            if is_majority(self.online_count(), self.endpoints.len()) {
                if let Some(next) = self.nodes.iter().position(|n| n.online) {
                    self.install_leader(next);
                }
            }
        }
        true
    }

    pub(super) fn elect(
        &mut self,
        endpoint: &str,
    ) -> bool {
        match self.reachable(endpoint) {
            Ok(idx) => {
                self.install_leader(idx);
                true
            }
            Err(_) => false,
        }
    }

    fn install_leader(
        &mut self,
        idx: usize,
    ) {
        self.term += 1;
        self.leader = Some(idx);
        info!(leader = %self.endpoints[idx], term = self.term, "Leader elected");
    }

    pub(super) fn status(
        &self,
        endpoint: &str,
    ) -> TransportResult<StatusResponse> {
        let idx = self.reachable(endpoint)?;
        let node = &self.nodes[idx];
        Ok(StatusResponse {
            role: self.role_of(idx),
            term: self.term,
            last_log_index: self.log_index,
            last_log_term: self.term,
            commit_index: node.last_applied,
            last_applied: node.last_applied,
        })
    }

    pub(super) fn statistics(
        &mut self,
        endpoint: &str,
    ) -> TransportResult<StatisticsResponse> {
        let idx = self.reachable(endpoint)?;
        self.roll_due_stats(Instant::now());
        Ok(StatisticsResponse {
            role: self.role_of(idx),
            stats: self.nodes[idx].counters.snapshot(),
        })
    }

    fn role_of(
        &self,
        idx: usize,
    ) -> NodeRole {
        match self.leader {
            Some(leader) if leader == idx => NodeRole::Leader,
            Some(_) => NodeRole::Follower,
            None => NodeRole::Candidate,
        }
    }

    pub(super) fn roll_stats(&mut self) {
        self.nodes.iter_mut().for_each(|n| n.counters.roll());
    }

    /// Closes every window that ended before `now`.
    pub(super) fn roll_due_stats(
        &mut self,
        now: Instant,
    ) {
        let Some(window) = self.stats_window else {
            return;
        };
        let elapsed = now.saturating_duration_since(self.window_started);
        let due = elapsed.as_nanos() / window.as_nanos();
        if due == 0 {
            return;
        }
        // Past a full history every closed window is empty anyway
        for _ in 0..due.min(HISTORY_WINDOWS as u128) {
            self.roll_stats();
        }
        if due > HISTORY_WINDOWS as u128 {
            self.window_started = now;
        } else {
            self.window_started += window * due as u32;
        }
    }

    pub(super) fn clean_binlog(
        &mut self,
        endpoint: &str,
        end_index: i64,
    ) -> TransportResult<()> {
        let idx = self.reachable(endpoint)?;
        let node = &mut self.nodes[idx];
        if end_index > node.last_applied {
            return Err(TransportError::Rejected(ErrorCode::CleanBinlogFail));
        }
        node.cleaned_before = node.cleaned_before.max(end_index);
        debug!(endpoint, end_index, "Binlog cleaned");
        Ok(())
    }

    /// Appends one entry to the replicated log; online members apply it.
    fn append(&mut self) {
        self.log_index += 1;
        let index = self.log_index;
        self.nodes
            .iter_mut()
            .filter(|n| n.online)
            .for_each(|n| n.last_applied = index);
    }

    // ---- sessions ----

    pub(super) fn touch_session(
        &mut self,
        session_id: &str,
    ) {
        self.sessions.insert(
            session_id.to_string(),
            SessionRecord {
                last_seen: Instant::now(),
            },
        );
    }

    fn is_live(
        &self,
        session_id: &str,
    ) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub(super) fn live_sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn sweep_sessions(
        &mut self,
        now: Instant,
        events: &mut Vec<ClusterEvent>,
    ) {
        let expire = self.session_expire;
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, s)| now.duration_since(s.last_seen) >= expire)
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            self.drop_session(&id, events);
        }
    }

    /// Forgets `session_id`, releasing its locks and logins. Returns whether it was known.
    pub(super) fn drop_session(
        &mut self,
        session_id: &str,
        events: &mut Vec<ClusterEvent>,
    ) -> bool {
        let known = self.sessions.remove(session_id).is_some();

        let released: Vec<Bytes> = self
            .store
            .get(ANONYMOUS)
            .map(|space| {
                space
                    .iter()
                    .filter(|(_, v)| matches!(v, StoredValue::Lock { session_id: s } if s == session_id))
                    .map(|(k, _)| k.clone())
                    .collect()
            })
            .unwrap_or_default();
        if let Some(space) = self.store.get_mut(ANONYMOUS) {
            for key in &released {
                space.remove(key);
            }
        }
        for key in released {
            self.append();
            events.push(ClusterEvent::KeyChanged {
                namespace: ANONYMOUS.to_string(),
                key,
            });
        }

        let tokens: Vec<String> = self
            .logins
            .iter()
            .filter(|(_, l)| l.session_id == session_id)
            .map(|(t, _)| t.clone())
            .collect();
        for token in tokens {
            self.remove_login(&token);
        }

        if known {
            info!(session_id, "Session expired");
        }
        known
    }

    // ---- users ----

    /// Key space addressed by `context`.
    pub(super) fn namespace(
        &self,
        context: &RequestContext,
    ) -> TransportResult<String> {
        match &context.user_token {
            None => Ok(ANONYMOUS.to_string()),
            Some(token) => self
                .logins
                .get(token)
                .map(|l| l.username.clone())
                .ok_or(TransportError::Rejected(ErrorCode::PermissionDenied)),
        }
    }

    pub(super) fn register(
        &mut self,
        username: &str,
        password: &str,
    ) -> TransportResult<()> {
        if username.is_empty() || self.users.contains_key(username) {
            return Err(TransportError::Rejected(ErrorCode::UserExists));
        }
        self.users.insert(
            username.to_string(),
            UserRecord {
                password: password.to_string(),
                token: None,
            },
        );
        self.append();
        Ok(())
    }

    pub(super) fn login(
        &mut self,
        session_id: &str,
        username: &str,
        password: &str,
    ) -> TransportResult<String> {
        let user = self
            .users
            .get_mut(username)
            .ok_or(TransportError::Rejected(ErrorCode::UnknownUser))?;
        if user.token.is_some() {
            return Err(TransportError::Rejected(ErrorCode::UserExists));
        }
        if user.password != password {
            return Err(TransportError::Rejected(ErrorCode::PasswordError));
        }

        let token = nanoid::nanoid!();
        user.token = Some(token.clone());
        self.logins.insert(
            token.clone(),
            Login {
                username: username.to_string(),
                session_id: session_id.to_string(),
            },
        );
        self.touch_session(session_id);
        self.append();
        Ok(token)
    }

    pub(super) fn logout(
        &mut self,
        token: &str,
    ) -> TransportResult<()> {
        if !self.remove_login(token) {
            return Err(TransportError::Rejected(ErrorCode::UnknownUser));
        }
        self.append();
        Ok(())
    }

    fn remove_login(
        &mut self,
        token: &str,
    ) -> bool {
        match self.logins.remove(token) {
            Some(login) => {
                if let Some(user) = self.users.get_mut(&login.username) {
                    user.token = None;
                }
                true
            }
            None => false,
        }
    }

    // ---- data ----

    /// Value of `key` as readers see it; locks of dead sessions are absent.
    pub(super) fn visible(
        &self,
        namespace: &str,
        key: &[u8],
    ) -> Option<Bytes> {
        match self.store.get(namespace)?.get(key)? {
            StoredValue::Data(value) => Some(value.clone()),
            StoredValue::Lock { session_id } if self.is_live(session_id) => {
                Some(Bytes::copy_from_slice(session_id.as_bytes()))
            }
            StoredValue::Lock { .. } => None,
        }
    }

    pub(super) fn put(
        &mut self,
        namespace: String,
        key: Bytes,
        value: Bytes,
        events: &mut Vec<ClusterEvent>,
    ) {
        self.store
            .entry(namespace.clone())
            .or_default()
            .insert(key.clone(), StoredValue::Data(value));
        self.append();
        events.push(ClusterEvent::KeyChanged { namespace, key });
    }

    pub(super) fn delete(
        &mut self,
        namespace: String,
        key: Bytes,
        events: &mut Vec<ClusterEvent>,
    ) {
        let removed = self.store.get_mut(&namespace).and_then(|space| space.remove(&key));
        self.append();
        if removed.is_some() {
            events.push(ClusterEvent::KeyChanged { namespace, key });
        }
    }

    pub(super) fn scan(
        &self,
        namespace: &str,
        start: &[u8],
        end: &[u8],
        size_limit: usize,
    ) -> ScanBatch {
        let Some(space) = self.store.get(namespace) else {
            return ScanBatch::default();
        };
        let mut items = Vec::new();
        let mut has_more = false;
        for (key, _) in space.range::<[u8], _>((std::ops::Bound::Included(start), std::ops::Bound::Unbounded)) {
            if !in_range(key, start, end) {
                break;
            }
            let Some(value) = self.visible(namespace, key) else {
                continue;
            };
            if items.len() == size_limit {
                has_more = true;
                break;
            }
            items.push(KvPair {
                key: key.clone(),
                value,
            });
        }
        ScanBatch { items, has_more }
    }

    pub(super) fn lock(
        &mut self,
        key: Bytes,
        session_id: &str,
        events: &mut Vec<ClusterEvent>,
    ) -> TransportResult<()> {
        self.touch_session(session_id);
        let space = self.store.entry(ANONYMOUS.to_string()).or_default();
        if let Some(StoredValue::Lock { session_id: holder }) = space.get(&key) {
            if holder == session_id {
                return Ok(());
            }
            if self.sessions.contains_key(holder) {
                return Err(TransportError::Rejected(ErrorCode::LockFail));
            }
        }
        self.store.entry(ANONYMOUS.to_string()).or_default().insert(
            key.clone(),
            StoredValue::Lock {
                session_id: session_id.to_string(),
            },
        );
        self.append();
        events.push(ClusterEvent::KeyChanged {
            namespace: ANONYMOUS.to_string(),
            key,
        });
        Ok(())
    }

    pub(super) fn unlock(
        &mut self,
        key: Bytes,
        session_id: &str,
        events: &mut Vec<ClusterEvent>,
    ) -> TransportResult<()> {
        let owned = matches!(
            self.store.get(ANONYMOUS).and_then(|space| space.get(&key)),
            Some(StoredValue::Lock { session_id: holder }) if holder == session_id
        );
        if !owned {
            return Err(TransportError::Rejected(ErrorCode::LockFail));
        }
        if let Some(space) = self.store.get_mut(ANONYMOUS) {
            space.remove(&key);
        }
        self.append();
        events.push(ClusterEvent::KeyChanged {
            namespace: ANONYMOUS.to_string(),
            key,
        });
        Ok(())
    }

    /// Current state of the watched key if it differs from the watcher's baseline.
    pub(super) fn watch_outcome(
        &self,
        namespace: &str,
        req: &WatchRequest,
    ) -> Option<WatchResponse> {
        let current = self.visible(namespace, &req.key);
        let changed = match &current {
            Some(value) => !req.key_exist || *value != req.old_value,
            None => req.key_exist,
        };
        changed.then(|| WatchResponse {
            key: req.key.clone(),
            deleted: current.is_none(),
            value: current.unwrap_or_default(),
        })
    }
}
