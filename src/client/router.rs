use std::future::Future;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use rand::Rng;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::network::Transport;
use crate::network::TransportError;
use crate::network::TransportResult;
use crate::Error;
use crate::ErrorCode;
use crate::Result;

/// Sends leader-bound requests to the right member.
///
/// The cached leader is tried first. Without one, members are tried
/// round-robin from a random starting point so concurrent sessions spread
/// their discovery traffic.
pub(crate) struct Router {
    transport: Arc<dyn Transport>,
    members: Vec<String>,
    leader: ArcSwapOption<String>,
    next: AtomicUsize,
    attempts: usize,
}

impl std::fmt::Debug for Router {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("members", &self.members)
            .field("leader", &self.leader.load_full())
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

impl Router {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        members: Vec<String>,
        attempts: usize,
    ) -> Self {
        let start = if members.is_empty() {
            0
        } else {
            rand::thread_rng().gen_range(0..members.len())
        };
        Self {
            transport,
            members,
            leader: ArcSwapOption::empty(),
            next: AtomicUsize::new(start),
            attempts: attempts.max(1),
        }
    }

    pub(crate) fn members(&self) -> &[String] {
        &self.members
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub(crate) fn leader(&self) -> Option<String> {
        self.leader.load_full().map(|l| (*l).clone())
    }

    /// Runs `f` against successive members until one answers.
    ///
    /// `timeout` bounds each attempt; long-polls pass `None`.
    pub(crate) async fn call<T, F, Fut>(
        &self,
        op: &'static str,
        timeout: Option<Duration>,
        f: F,
    ) -> Result<T>
    where
        F: Fn(Arc<dyn Transport>, String) -> Fut,
        Fut: Future<Output = TransportResult<T>>,
    {
        let mut only_timeouts = true;

        for attempt in 0..self.attempts {
            let endpoint = self.pick();
            trace!(op, attempt, endpoint = %endpoint, "Sending request");

            let fut = f(self.transport.clone(), endpoint.clone());
            let outcome = match timeout {
                Some(limit) => tokio::time::timeout(limit, fut)
                    .await
                    .unwrap_or(Err(TransportError::Timeout)),
                None => fut.await,
            };

            match outcome {
                Ok(value) => {
                    self.remember_leader(&endpoint);
                    return Ok(value);
                }
                Err(TransportError::Rejected(code)) => {
                    // The member is reachable and answered; only a quorum loss is worth
                    // re-routing, every other refusal is the final answer.
                    if code == ErrorCode::ClusterDown {
                        only_timeouts = false;
                        self.forget_leader(&endpoint);
                        debug!(op, endpoint = %endpoint, "Member has no quorum");
                        continue;
                    }
                    self.remember_leader(&endpoint);
                    return Err(Error::status(code, format!("{op} rejected by {endpoint}")));
                }
                Err(TransportError::NotLeader { leader_hint }) => {
                    only_timeouts = false;
                    self.follow_hint(&endpoint, leader_hint);
                }
                Err(TransportError::Unreachable { .. }) => {
                    only_timeouts = false;
                    self.forget_leader(&endpoint);
                    debug!(op, endpoint = %endpoint, "Member unreachable");
                }
                Err(TransportError::Timeout) => {
                    self.forget_leader(&endpoint);
                    debug!(op, endpoint = %endpoint, "Member timed out");
                }
            }
        }

        let code = if only_timeouts {
            ErrorCode::Timeout
        } else {
            ErrorCode::ClusterDown
        };
        warn!(op, attempts = self.attempts, %code, "Request failed on every attempt");
        Err(Error::status(code, format!("{op} failed after {} attempts", self.attempts)))
    }

    fn pick(&self) -> String {
        if let Some(leader) = self.leader.load_full() {
            return (*leader).clone();
        }
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.members.len().max(1);
        self.members.get(i).cloned().unwrap_or_default()
    }

    fn remember_leader(
        &self,
        endpoint: &str,
    ) {
        let known = self.leader.load();
        if known.as_deref().map(String::as_str) != Some(endpoint) {
            debug!(leader = %endpoint, "Leader discovered");
            self.leader.store(Some(Arc::new(endpoint.to_string())));
        }
    }

    fn forget_leader(
        &self,
        endpoint: &str,
    ) {
        let known = self.leader.load();
        if known.as_deref().map(String::as_str) == Some(endpoint) {
            self.leader.store(None);
        }
    }

    fn follow_hint(
        &self,
        endpoint: &str,
        hint: Option<String>,
    ) {
        match hint {
            Some(leader) if leader != endpoint && self.members.contains(&leader) => {
                debug!(from = %endpoint, leader = %leader, "Redirected to leader");
                self.leader.store(Some(Arc::new(leader)));
            }
            _ => self.forget_leader(endpoint),
        }
    }
}
