//! Client configuration.
//!
//! Sources are merged in priority order (later overrides earlier):
//! 1. Type defaults
//! 2. File named by the `CONFIG_PATH` environment variable (if set)
//! 3. Environment variables prefixed with `NEXUS__`
//!
//! Loading never validates; call [`ClientConfig::validate`] once every
//! override has been applied.


use std::env;
use std::time::Duration;

use config::Config;
use config::ConfigError;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

const ENV_PREFIX: &str = "NEXUS";

/// Tunables for a [`crate::Session`].
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Upper bound for a single request to one cluster member
    /// Default: 2000ms
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Interval between two keepalive reports
    /// Default: 2000ms
    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,

    /// A session without a successful keepalive for this long is expired
    /// Default: 6000ms
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,

    /// Maximum pairs fetched per scan round trip
    #[serde(default = "default_scan_batch_size")]
    pub scan_batch_size: usize,

    /// Pause before re-issuing a failed watch long-poll
    #[serde(default = "default_watch_retry_delay_ms")]
    pub watch_retry_delay_ms: u64,

    /// Pause between two lock attempts when the holder can't be watched
    #[serde(default = "default_lock_retry_delay_ms")]
    pub lock_retry_delay_ms: u64,

    /// Attempts per request before giving up (0 means twice the member count)
    #[serde(default)]
    pub max_redirects: usize,

    /// Worker threads of the session runtime
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Capacity of the callback delivery queue
    #[serde(default = "default_dispatcher_queue_size")]
    pub dispatcher_queue_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            keepalive_interval_ms: default_keepalive_interval_ms(),
            session_timeout_ms: default_session_timeout_ms(),
            scan_batch_size: default_scan_batch_size(),
            watch_retry_delay_ms: default_watch_retry_delay_ms(),
            lock_retry_delay_ms: default_lock_retry_delay_ms(),
            max_redirects: 0,
            worker_threads: default_worker_threads(),
            dispatcher_queue_size: default_dispatcher_queue_size(),
        }
    }
}

impl ClientConfig {
    /// Loads defaults, then `CONFIG_PATH`, then `NEXUS__*` variables.
    ///
    /// # Example
    /// ```ignore
    /// std::env::set_var("NEXUS__SESSION_TIMEOUT_MS", "9000");
    /// let cfg = ClientConfig::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(Self::environment());

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Merges an additional file on top of the current values.
    ///
    /// Environment variables keep the highest priority.
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(Self::environment())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    pub fn validate(self) -> Result<Self> {
        if self.request_timeout_ms == 0 {
            return Err(invalid("request_timeout_ms must be greater than 0"));
        }
        if self.session_timeout_ms == 0 {
            return Err(invalid("session_timeout_ms must be greater than 0"));
        }
        if self.keepalive_interval_ms == 0 || self.keepalive_interval_ms >= self.session_timeout_ms {
            return Err(invalid(&format!(
                "keepalive_interval_ms ({}) must be in (0, session_timeout_ms={})",
                self.keepalive_interval_ms, self.session_timeout_ms
            )));
        }
        if self.scan_batch_size == 0 {
            return Err(invalid("scan_batch_size must be greater than 0"));
        }
        if self.worker_threads == 0 {
            return Err(invalid("worker_threads must be greater than 0"));
        }
        if self.dispatcher_queue_size == 0 {
            return Err(invalid("dispatcher_queue_size must be greater than 0"));
        }
        Ok(self)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    pub fn watch_retry_delay(&self) -> Duration {
        Duration::from_millis(self.watch_retry_delay_ms)
    }

    pub fn lock_retry_delay(&self) -> Duration {
        Duration::from_millis(self.lock_retry_delay_ms)
    }

    /// Attempts allowed for one request against `members` endpoints.
    pub fn attempts_for(
        &self,
        members: usize,
    ) -> usize {
        if self.max_redirects == 0 {
            (members * 2).max(1)
        } else {
            self.max_redirects
        }
    }

    fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .ignore_empty(true)
            .try_parsing(true)
    }
}

fn invalid(msg: &str) -> Error {
    Error::Config(ConfigError::Message(msg.to_string()))
}

fn default_request_timeout_ms() -> u64 {
    2000
}
fn default_keepalive_interval_ms() -> u64 {
    2000
}
fn default_session_timeout_ms() -> u64 {
    6000
}
fn default_scan_batch_size() -> usize {
    1000
}
fn default_watch_retry_delay_ms() -> u64 {
    1000
}
fn default_lock_retry_delay_ms() -> u64 {
    200
}
fn default_worker_threads() -> usize {
    2
}
fn default_dispatcher_queue_size() -> usize {
    1024
}
