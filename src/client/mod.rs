//! Blocking client session for the nexus cluster.
//!
//! - [`Session`] - connection to one cluster, owner of every registration
//! - [`SessionBuilder`] - configurable construction
//! - [`ScanCursor`] - range iterator borrowing its session
//!
//! # Basic Usage
//! ```ignore
//! use nexus_client::Session;
//!
//! let session = Session::open("node1:8868,node2:8868,node3:8868")?;
//! session.put("user:1001", "Alice")?;
//! assert_eq!(session.get("user:1001")?, "Alice");
//!
//! for pair in session.scan("user:", "user;")? {
//!     let pair = pair?;
//!     println!("{:?} = {:?}", pair.key, pair.value);
//! }
//! ```
//!
//! Every operation blocks the calling thread on the session's own runtime;
//! calling one from inside an async context panics. Callbacks run on a
//! dedicated dispatcher thread and may use the session freely.

mod auth;
mod builder;
mod cluster;
mod keepalive;
mod kv;
mod lock;
mod router;
mod scan;
mod watcher;

pub use builder::*;
pub use scan::*;

pub(crate) use router::Router;


use std::cell::RefCell;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use arc_swap::ArcSwapOption;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::runtime::Runtime;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::errors::outcome_of;
use crate::network::RequestContext;
use crate::network::Transport;
use crate::network::TransportResult;
use crate::utils::scoped_timer::ScopedTimer;
use crate::watch::DeliverySender;
use crate::watch::Dispatcher;
use crate::watch::TimeoutRegistry;
use crate::watch::WatchRegistry;
use crate::ClientConfig;
use crate::Error;
use crate::ErrorCode;
use crate::Result;

/// Authenticated user of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Identity {
    pub(crate) username: String,
    pub(crate) token: String,
}

/// State shared by the blocking API and the background tasks.
pub(crate) struct SessionInner {
    pub(crate) config: ClientConfig,
    pub(crate) router: Router,
    pub(crate) session_id: ArcSwap<String>,
    pub(crate) identity: ArcSwapOption<Identity>,
    pub(crate) login_expired: AtomicBool,
    pub(crate) held_locks: Mutex<BTreeSet<Bytes>>,
    pub(crate) watches: Arc<WatchRegistry>,
    pub(crate) timeouts: Arc<TimeoutRegistry>,
    pub(crate) deliveries: DeliverySender,
    /// Parent of every background task's token
    pub(crate) shutdown: CancellationToken,
    /// Last time the cluster acknowledged a keepalive
    pub(crate) last_alive: Mutex<Instant>,
    request_timeout_ms: AtomicU64,
    closed: AtomicBool,
}

impl SessionInner {
    pub(crate) fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.load(Ordering::Relaxed))
    }

    pub(crate) fn session_id(&self) -> String {
        self.session_id.load().as_ref().clone()
    }

    /// Context carrying the session and, if logged in, the user token.
    pub(crate) fn context(&self) -> RequestContext {
        RequestContext {
            session_id: self.session_id(),
            user_token: self.identity.load().as_ref().map(|i| i.token.clone()),
        }
    }

    /// Context for the shared lock namespace.
    pub(crate) fn anonymous_context(&self) -> RequestContext {
        RequestContext {
            session_id: self.session_id(),
            user_token: None,
        }
    }

    /// Leader-routed call bounded by the request timeout.
    pub(crate) async fn call<T, F, Fut>(
        &self,
        op: &'static str,
        f: F,
    ) -> Result<T>
    where
        F: Fn(Arc<dyn Transport>, String) -> Fut,
        Fut: Future<Output = TransportResult<T>>,
    {
        self.router.call(op, Some(self.request_timeout()), f).await
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// A client session with one cluster.
///
/// Owns a runtime for network work, a dispatcher thread for callbacks, and
/// the keepalive task that keeps its locks and login alive. Dropping the
/// session closes it.
///
/// `Session` is `Send + Sync`; share it with `Arc` to issue calls from
/// several threads. Each thread sees its own [`Session::last_error`].
pub struct Session {
    inner: Arc<SessionInner>,
    dispatcher: Dispatcher,
    runtime: Option<Runtime>,
    slot_id: u64,
}

static NEXT_SLOT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Outcome of the last call each session made on this thread, keyed by slot id.
    static LAST_ERRORS: RefCell<HashMap<u64, ErrorCode>> = RefCell::new(HashMap::new());
}

impl std::fmt::Debug for Session {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.inner.session_id())
            .field("members", &self.inner.router.members())
            .field("closed", &self.inner.is_closed())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Opens a session on a comma separated member list such as
    /// `"node1:8868,node2:8868,node3:8868"`, with default settings.
    ///
    /// Without an explicit transport the session talks to the in-process
    /// cluster registered for these members (see [`crate::MemCluster::shared`]).
    pub fn open(members: &str) -> Result<Self> {
        SessionBuilder::new(crate::utils::net::parse_members(members)?).build()
    }

    /// Create a configured session builder
    pub fn builder<I, S>(members: I) -> SessionBuilder
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        SessionBuilder::new(members)
    }

    pub(crate) fn from_parts(
        inner: Arc<SessionInner>,
        dispatcher: Dispatcher,
        runtime: Runtime,
    ) -> Self {
        Self {
            inner,
            dispatcher,
            runtime: Some(runtime),
            slot_id: NEXT_SLOT_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Blocks on `fut`, recording its outcome for the calling thread.
    ///
    /// Closing the session from another thread aborts a call in flight.
    pub(crate) fn run<T, Fut>(
        &self,
        op: &'static str,
        fut: Fut,
    ) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let _timer = ScopedTimer::new(op);
        let result = match &self.runtime {
            Some(runtime) if !self.inner.is_closed() => {
                let shutdown = self.inner.shutdown.clone();
                runtime.block_on(async move {
                    tokio::select! {
                        result = fut => result,
                        _ = shutdown.cancelled() => Err(Error::SessionClosed),
                    }
                })
            }
            _ => Err(Error::SessionClosed),
        };
        self.record(&result);
        result
    }

    pub(crate) fn record<T>(
        &self,
        result: &Result<T>,
    ) {
        let code = outcome_of(result);
        let _ = LAST_ERRORS.try_with(|slots| slots.borrow_mut().insert(self.slot_id, code));
    }

    pub(crate) fn inner(&self) -> &Arc<SessionInner> {
        &self.inner
    }

    /// Outcome of the last operation issued by the calling thread.
    pub fn last_error(&self) -> ErrorCode {
        LAST_ERRORS
            .try_with(|slots| slots.borrow().get(&self.slot_id).copied())
            .ok()
            .flatten()
            .unwrap_or_default()
    }

    /// Identifier the cluster knows this session by. Changes after a session expiry.
    pub fn session_id(&self) -> String {
        self.inner.session_id()
    }

    /// Login token of the current user, if logged in.
    pub fn current_user_id(&self) -> Option<String> {
        self.inner.identity.load().as_ref().map(|i| i.token.clone())
    }

    pub fn current_user_name(&self) -> Option<String> {
        self.inner.identity.load().as_ref().map(|i| i.username.clone())
    }

    pub fn is_logged_in(&self) -> bool {
        self.inner.identity.load().is_some() && !self.inner.login_expired.load(Ordering::Acquire)
    }

    /// `true` once a session expiry dropped the login.
    pub fn is_login_expired(&self) -> bool {
        self.inner.login_expired.load(Ordering::Acquire)
    }

    /// Sets the bound for a single request to one member.
    pub fn set_timeout(
        &self,
        timeout: Duration,
    ) {
        let ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX).max(1);
        self.inner.request_timeout_ms.store(ms, Ordering::Relaxed);
    }

    pub fn timeout(&self) -> Duration {
        self.inner.request_timeout()
    }

    pub fn members(&self) -> &[String] {
        self.inner.router.members()
    }

    /// Member currently believed to lead the cluster.
    pub fn leader(&self) -> Option<String> {
        self.inner.router.leader()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Number of watches whose callback has not run yet.
    pub fn pending_watches(&self) -> usize {
        self.inner.watches.len()
    }

    /// Locks this session believes it holds.
    pub fn held_locks(&self) -> Vec<Bytes> {
        self.inner.held_locks.lock().iter().cloned().collect()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Stops background work and drops every pending registration unrun.
    ///
    /// Idempotent. Operations issued afterwards fail with
    /// [`Error::SessionClosed`]. May be called from a callback.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(session_id = %self.inner.session_id(), "Closing session");

        self.inner.shutdown.cancel();
        self.inner.watches.abandon_all();
        self.inner.timeouts.abandon();
        self.dispatcher.stop();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
        let _ = LAST_ERRORS.try_with(|slots| slots.borrow_mut().remove(&self.slot_id));
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

pub(crate) fn new_inner(
    config: ClientConfig,
    router: Router,
    watches: Arc<WatchRegistry>,
    timeouts: Arc<TimeoutRegistry>,
    deliveries: DeliverySender,
    session_id: String,
) -> SessionInner {
    let request_timeout_ms = config.request_timeout_ms;
    SessionInner {
        config,
        router,
        session_id: ArcSwap::from_pointee(session_id),
        identity: ArcSwapOption::empty(),
        login_expired: AtomicBool::new(false),
        held_locks: Mutex::new(BTreeSet::new()),
        watches,
        timeouts,
        deliveries,
        shutdown: CancellationToken::new(),
        last_alive: Mutex::new(Instant::now()),
        request_timeout_ms: AtomicU64::new(request_timeout_ms),
        closed: AtomicBool::new(false),
    }
}
