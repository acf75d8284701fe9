//! In-process simulated cluster.
//!
//! [`MemCluster`] implements [`Transport`] over shared memory: N members, one
//! leader, a replicated log that online members apply instantly, per-user key
//! spaces, session leases, locks and long-poll watches. It backs sessions
//! opened without an explicit transport and lets tests drive elections,
//! partitions and session expiry deterministically.
//!
//! ```ignore
//! let cluster = MemCluster::new(["n1:8868", "n2:8868", "n3:8868"]);
//! let session = Session::builder(cluster.members())
//!     .transport(Arc::new(cluster.clone()))
//!     .build()?;
//! cluster.set_online("n1:8868", false); // n2 takes over
//! session.put("k", "v")?;
//! ```

mod state;
mod stats;


use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;
use tracing::trace;

use self::state::ClusterEvent;
use self::state::ClusterState;
use self::state::ANONYMOUS;
use crate::network::*;
use crate::utils::net::normalize_members;
use crate::ScanBatch;
use crate::StatKind;

/// Lease of a session that stopped sending keepalives.
pub const DEFAULT_SESSION_EXPIRE: Duration = Duration::from_secs(6);

/// Length of one statistics window.
pub const DEFAULT_STATS_WINDOW: Duration = Duration::from_secs(1);

const EVENT_CAPACITY: usize = 1024;

/// Embedded clusters handed out by [`MemCluster::shared`], keyed by member list.
static SHARED: Mutex<BTreeMap<String, MemCluster>> = parking_lot::const_mutex(BTreeMap::new());

struct ClusterInner {
    state: Mutex<ClusterState>,
    events: broadcast::Sender<ClusterEvent>,
}

/// A simulated N-node cluster living in this process.
///
/// Cloning yields another handle to the same cluster.
#[derive(Clone)]
pub struct MemCluster {
    inner: Arc<ClusterInner>,
}

impl std::fmt::Debug for MemCluster {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("MemCluster")
            .field("members", &state.endpoints())
            .field("leader", &state.leader_endpoint())
            .finish_non_exhaustive()
    }
}

impl MemCluster {
    /// Creates a cluster whose first member leads. Invalid entries are skipped.
    pub fn new<I, S>(members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let endpoints = normalize_members(members).unwrap_or_default();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let mut state = ClusterState::new(endpoints, DEFAULT_SESSION_EXPIRE);
        state.set_stats_window(Some(DEFAULT_STATS_WINDOW));
        Self {
            inner: Arc::new(ClusterInner {
                state: Mutex::new(state),
                events,
            }),
        }
    }

    /// The process-wide cluster for exactly these members, created on first use.
    pub fn shared(members: &[String]) -> Self {
        let key = members.join(",");
        SHARED.lock().entry(key).or_insert_with(|| MemCluster::new(members)).clone()
    }

    pub fn members(&self) -> Vec<String> {
        self.inner.state.lock().endpoints().to_vec()
    }

    pub fn leader(&self) -> Option<String> {
        self.inner.state.lock().leader_endpoint()
    }

    /// Sets how long a session survives without a keepalive.
    pub fn set_session_expire(
        &self,
        expire: Duration,
    ) {
        self.inner.state.lock().set_session_expire(expire);
    }

    /// Takes a member offline or brings it back.
    ///
    /// A leader going offline hands over to the lowest online member while a
    /// quorum remains. Returns `false` for an unknown member.
    pub fn set_online(
        &self,
        endpoint: &str,
        online: bool,
    ) -> bool {
        let changed = self.inner.state.lock().set_online(endpoint, online);
        if changed {
            debug!(endpoint, online, "Member availability changed");
            self.publish(vec![ClusterEvent::Topology]);
        }
        changed
    }

    /// Makes an online member the leader of a new term.
    pub fn elect_leader(
        &self,
        endpoint: &str,
    ) -> bool {
        let elected = self.inner.state.lock().elect(endpoint);
        if elected {
            self.publish(vec![ClusterEvent::Topology]);
        }
        elected
    }

    /// Expires `session_id` now, releasing its locks and logins.
    pub fn expire_session(
        &self,
        session_id: &str,
    ) -> bool {
        let mut events = Vec::new();
        let known = self.inner.state.lock().drop_session(session_id, &mut events);
        self.publish(events);
        known
    }

    /// Sessions currently holding a lease.
    pub fn live_sessions(&self) -> Vec<String> {
        self.inner.state.lock().live_sessions()
    }

    /// Owner of lock `key`, if held by a live session.
    pub fn lock_holder(
        &self,
        key: impl AsRef<[u8]>,
    ) -> Option<String> {
        self.inner
            .state
            .lock()
            .visible(ANONYMOUS, key.as_ref())
            .map(|v| String::from_utf8_lossy(&v).into_owned())
    }

    /// Sets the statistics window length. Windows close as requests and
    /// statistics reads observe the clock; `None` leaves rolling to [`MemCluster::tick`].
    pub fn set_stats_window(
        &self,
        window: Option<Duration>,
    ) {
        self.inner.state.lock().set_stats_window(window);
    }

    /// Closes the current statistics window on every member.
    pub fn tick(&self) {
        self.inner.state.lock().roll_stats();
    }

    fn publish(
        &self,
        events: Vec<ClusterEvent>,
    ) {
        for event in events {
            // No receivers simply means nobody is watching
            let _ = self.inner.events.send(event);
        }
    }

    /// Runs `f` on the state of a leader-bound request, then publishes the
    /// events it produced.
    fn on_leader<T>(
        &self,
        endpoint: &str,
        kind: Option<StatKind>,
        f: impl FnOnce(&mut ClusterState, &mut Vec<ClusterEvent>) -> TransportResult<T>,
    ) -> TransportResult<T> {
        let mut events = Vec::new();
        let result = {
            let mut state = self.inner.state.lock();
            state
                .admit(endpoint, kind, &mut events)
                .and_then(|()| f(&mut *state, &mut events))
        };
        self.publish(events);
        result
    }
}

#[async_trait]
impl Transport for MemCluster {
    async fn status(
        &self,
        endpoint: &str,
    ) -> TransportResult<StatusResponse> {
        self.inner.state.lock().status(endpoint)
    }

    async fn statistics(
        &self,
        endpoint: &str,
    ) -> TransportResult<StatisticsResponse> {
        self.inner.state.lock().statistics(endpoint)
    }

    async fn put(
        &self,
        endpoint: &str,
        req: PutRequest,
    ) -> TransportResult<()> {
        self.on_leader(endpoint, Some(StatKind::Put), |state, events| {
            let namespace = state.namespace(&req.context)?;
            state.put(namespace, req.key, req.value, events);
            Ok(())
        })
    }

    async fn get(
        &self,
        endpoint: &str,
        req: GetRequest,
    ) -> TransportResult<Option<Bytes>> {
        self.on_leader(endpoint, Some(StatKind::Get), |state, _| {
            let namespace = state.namespace(&req.context)?;
            Ok(state.visible(&namespace, &req.key))
        })
    }

    async fn delete(
        &self,
        endpoint: &str,
        req: DeleteRequest,
    ) -> TransportResult<()> {
        self.on_leader(endpoint, Some(StatKind::Delete), |state, events| {
            let namespace = state.namespace(&req.context)?;
            state.delete(namespace, req.key, events);
            Ok(())
        })
    }

    async fn scan(
        &self,
        endpoint: &str,
        req: ScanRequest,
    ) -> TransportResult<ScanBatch> {
        self.on_leader(endpoint, Some(StatKind::Scan), |state, _| {
            let namespace = state.namespace(&req.context)?;
            Ok(state.scan(&namespace, &req.start_key, &req.end_key, req.size_limit))
        })
    }

    async fn lock(
        &self,
        endpoint: &str,
        req: LockRequest,
    ) -> TransportResult<()> {
        self.on_leader(endpoint, Some(StatKind::Lock), |state, events| {
            state.lock(req.key, &req.context.session_id, events)
        })
    }

    async fn unlock(
        &self,
        endpoint: &str,
        req: LockRequest,
    ) -> TransportResult<()> {
        self.on_leader(endpoint, Some(StatKind::Unlock), |state, events| {
            state.unlock(req.key, &req.context.session_id, events)
        })
    }

    async fn watch(
        &self,
        endpoint: &str,
        req: WatchRequest,
    ) -> TransportResult<WatchResponse> {
        // Subscribe before reading so no change slips between read and wait
        let mut events = self.inner.events.subscribe();

        let namespace = self.on_leader(endpoint, Some(StatKind::Watch), |state, _| {
            let namespace = state.namespace(&req.context)?;
            Ok((state.watch_outcome(&namespace, &req), namespace))
        });
        let namespace = match namespace? {
            (Some(changed), _) => return Ok(changed),
            (None, namespace) => namespace,
        };
        trace!(key = ?req.key, "Watch waiting for change");

        loop {
            let recheck = match events.recv().await {
                Ok(ClusterEvent::KeyChanged { namespace: ns, key }) => ns == namespace && key == req.key,
                Ok(ClusterEvent::Topology) | Err(RecvError::Lagged(_)) => {
                    self.inner.state.lock().check_leader(endpoint)?;
                    true
                }
                Err(RecvError::Closed) => {
                    return Err(TransportError::Unreachable {
                        endpoint: endpoint.to_string(),
                    })
                }
            };
            if recheck {
                let outcome = self.inner.state.lock().watch_outcome(&namespace, &req);
                if let Some(changed) = outcome {
                    return Ok(changed);
                }
            }
        }
    }

    async fn keep_alive(
        &self,
        endpoint: &str,
        req: KeepAliveRequest,
    ) -> TransportResult<()> {
        self.on_leader(endpoint, Some(StatKind::KeepAlive), |state, _| {
            state.touch_session(&req.context.session_id);
            Ok(())
        })
    }

    async fn login(
        &self,
        endpoint: &str,
        req: LoginRequest,
    ) -> TransportResult<String> {
        self.on_leader(endpoint, None, |state, _| {
            state.login(
                &req.context.session_id,
                &req.credentials.username,
                &req.credentials.password,
            )
        })
    }

    async fn logout(
        &self,
        endpoint: &str,
        token: String,
    ) -> TransportResult<()> {
        self.on_leader(endpoint, None, |state, _| state.logout(&token))
    }

    async fn register(
        &self,
        endpoint: &str,
        req: Credentials,
    ) -> TransportResult<()> {
        self.on_leader(endpoint, None, |state, _| state.register(&req.username, &req.password))
    }

    async fn clean_binlog(
        &self,
        endpoint: &str,
        end_index: i64,
    ) -> TransportResult<()> {
        self.inner.state.lock().clean_binlog(endpoint, end_index)
    }
}
