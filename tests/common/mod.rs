use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use nexus_client::ClientConfig;
use nexus_client::MemCluster;
use nexus_client::Session;

/// Upper bound for a callback to arrive on the dispatcher thread.
pub const CALLBACK_WAIT: Duration = Duration::from_secs(3);

/// Long enough to be confident a callback is not coming.
pub const QUIET_PERIOD: Duration = Duration::from_millis(300);

static CLUSTER_SEQ: AtomicUsize = AtomicUsize::new(0);

/// A fresh embedded cluster of `nodes` members, private to the calling test.
pub fn new_cluster(nodes: usize) -> MemCluster {
    let seq = CLUSTER_SEQ.fetch_add(1, Ordering::Relaxed);
    let members: Vec<String> = (0..nodes).map(|i| format!("node{}-{}:{}", seq, i + 1, 8868 + i)).collect();
    MemCluster::new(members)
}

pub fn connect(cluster: &MemCluster) -> Session {
    connect_with(cluster, test_config())
}

pub fn connect_with(
    cluster: &MemCluster,
    config: ClientConfig,
) -> Session {
    Session::builder(cluster.members())
        .transport(Arc::new(cluster.clone()))
        .set_config(config)
        .build()
        .expect("session should open")
}

/// Short timers so failure paths resolve quickly.
pub fn test_config() -> ClientConfig {
    ClientConfig {
        request_timeout_ms: 300,
        keepalive_interval_ms: 50,
        session_timeout_ms: 400,
        watch_retry_delay_ms: 50,
        lock_retry_delay_ms: 20,
        ..ClientConfig::default()
    }
}
