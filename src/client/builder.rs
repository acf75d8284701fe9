use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::keepalive;
use super::new_inner;
use super::Router;
use super::Session;
use crate::network::Transport;
use crate::utils::net::normalize_members;
use crate::utils::time::make_session_id;
use crate::watch::Dispatcher;
use crate::watch::TimeoutRegistry;
use crate::watch::WatchRegistry;
use crate::ClientConfig;
use crate::Error;
use crate::MemCluster;
use crate::Result;

pub struct SessionBuilder {
    config: ClientConfig,
    members: Vec<String>,
    transport: Option<Arc<dyn Transport>>,
}

impl SessionBuilder {
    /// Create a new builder with default config and specified members
    pub fn new<I, S>(members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            config: ClientConfig::default(),
            members: members.into_iter().map(|m| m.as_ref().to_string()).collect(),
            transport: None,
        }
    }

    /// Set request timeout (default: 2s)
    pub fn request_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.config.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set keepalive interval (default: 2s)
    pub fn keepalive_interval(
        mut self,
        interval: Duration,
    ) -> Self {
        self.config.keepalive_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set how long the session survives without a keepalive (default: 6s)
    pub fn session_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.config.session_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Completely replaces the default configuration
    ///
    /// Settings made earlier through the individual methods are discarded.
    pub fn set_config(
        mut self,
        config: ClientConfig,
    ) -> Self {
        self.config = config;
        self
    }

    /// Routes every request through `transport` instead of the embedded cluster.
    pub fn transport(
        mut self,
        transport: Arc<dyn Transport>,
    ) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Starts the runtime, the dispatcher and the keepalive task.
    ///
    /// No request is sent; an unreachable cluster surfaces on the first call.
    pub fn build(self) -> Result<Session> {
        let config = self.config.validate()?;
        let members = normalize_members(&self.members)?;
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(MemCluster::shared(&members)),
        };

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.worker_threads)
            .thread_name("nexus-session")
            .enable_all()
            .build()
            .map_err(|e| Error::Runtime(format!("failed to start session runtime: {e}")))?;

        let watches = Arc::new(WatchRegistry::new());
        let timeouts = Arc::new(TimeoutRegistry::new());
        let dispatcher = Dispatcher::new(config.dispatcher_queue_size, watches.clone(), timeouts.clone());
        dispatcher.start()?;

        let attempts = config.attempts_for(members.len());
        let router = Router::new(transport, members, attempts);
        let session_id = make_session_id();
        info!(session_id = %session_id, members = ?router.members(), "Opening session");

        let inner = Arc::new(new_inner(
            config,
            router,
            watches,
            timeouts,
            dispatcher.sender(),
            session_id,
        ));
        runtime.spawn(keepalive::run(inner.clone()));

        Ok(Session::from_parts(inner, dispatcher, runtime))
    }
}
