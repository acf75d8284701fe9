use futures::future::join_all;
use tracing::debug;
use tracing::warn;

use super::Session;
use super::SessionInner;
use crate::network::TransportError;
use crate::ClusterNode;
use crate::Error;
use crate::ErrorCode;
use crate::NodeStats;
use crate::Result;

impl SessionInner {
    /// Asks every member for its raft status, in member order.
    ///
    /// Members that do not answer are reported `Offline`; the call fails only
    /// when none answers.
    pub(crate) async fn show(&self) -> Result<Vec<ClusterNode>> {
        let timeout = self.request_timeout();
        let transport = self.router.transport();
        let probes = self.router.members().iter().map(|endpoint| async move {
            let answer = tokio::time::timeout(timeout, transport.status(endpoint))
                .await
                .unwrap_or(Err(TransportError::Timeout));
            match answer {
                Ok(status) => ClusterNode {
                    id: endpoint.clone(),
                    role: status.role,
                    term: status.term,
                    last_log_index: status.last_log_index,
                    last_log_term: status.last_log_term,
                    commit_index: status.commit_index,
                    last_applied: status.last_applied,
                },
                Err(e) => {
                    debug!(endpoint = %endpoint, "Status probe failed: {}", e);
                    ClusterNode::offline(endpoint.clone())
                }
            }
        });
        let nodes = join_all(probes).await;

        if nodes.iter().all(|n| !n.is_reachable()) {
            warn!("No member answered the status probe");
            return Err(Error::status(ErrorCode::ClusterDown, "no member answered"));
        }
        Ok(nodes)
    }

    pub(crate) async fn stat(&self) -> Result<Vec<NodeStats>> {
        let timeout = self.request_timeout();
        let transport = self.router.transport();
        let probes = self.router.members().iter().map(|endpoint| async move {
            let answer = tokio::time::timeout(timeout, transport.statistics(endpoint))
                .await
                .unwrap_or(Err(TransportError::Timeout));
            match answer {
                Ok(stats) => NodeStats {
                    id: endpoint.clone(),
                    role: stats.role,
                    stats: stats.stats,
                },
                Err(e) => {
                    debug!(endpoint = %endpoint, "Statistics probe failed: {}", e);
                    NodeStats::offline(endpoint.clone())
                }
            }
        });
        let stats = join_all(probes).await;

        if stats.iter().all(|s| !s.is_reachable()) {
            warn!("No member answered the statistics probe");
            return Err(Error::status(ErrorCode::ClusterDown, "no member answered"));
        }
        Ok(stats)
    }

    pub(crate) async fn clean_binlog(
        &self,
        server_id: String,
        end_index: i64,
    ) -> Result<()> {
        if !self.router.members().contains(&server_id) {
            return Err(Error::InvalidArgument(format!("{server_id} is not a cluster member")));
        }
        tokio::time::timeout(
            self.request_timeout(),
            self.router.transport().clean_binlog(&server_id, end_index),
        )
        .await
        .unwrap_or(Err(TransportError::Timeout))
        .map_err(Error::from)
    }
}

impl Session {
    /// One record per configured member, in member order.
    ///
    /// # Errors
    /// `ClusterDown` when no member answers.
    pub fn show(&self) -> Result<Vec<ClusterNode>> {
        self.run("client::show", self.inner().show())
    }

    /// Per-member operation counters, in member order.
    ///
    /// `current` counts the open window and `average` is the mean of the
    /// closed ones; how long a window lasts is up to the cluster.
    ///
    /// # Errors
    /// `ClusterDown` when no member answers.
    pub fn stat(&self) -> Result<Vec<NodeStats>> {
        self.run("client::stat", self.inner().stat())
    }

    /// Asks `server_id` to drop binlog entries before `end_index`.
    ///
    /// # Errors
    /// `CleanBinlogFail` if that member has not applied up to `end_index`.
    pub fn clean_binlog(
        &self,
        server_id: &str,
        end_index: i64,
    ) -> Result<()> {
        let server_id = crate::utils::net::address_str(server_id);
        self.run("client::clean_binlog", self.inner().clean_binlog(server_id, end_index))
    }
}
