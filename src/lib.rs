//! Blocking client for a Raft-backed key-value store.
//!
//! A [`Session`] talks to the cluster leader on behalf of one process: plain
//! key-value operations, range scans through [`ScanCursor`], distributed
//! locks, single-shot watches and a session-expiry notification. Cluster
//! views come from [`Session::show`] and [`Session::stat`].
//!
//! Networking sits behind the [`Transport`] trait. Sessions built without one
//! use the in-process [`MemCluster`].

mod client;
mod config;
mod embedded;
mod errors;
mod network;
mod types;
pub mod utils;
pub mod watch;


pub use client::*;
pub use self::config::*;
pub use embedded::MemCluster;
pub use embedded::DEFAULT_SESSION_EXPIRE;
pub use embedded::DEFAULT_STATS_WINDOW;
pub use errors::*;
pub use network::*;
pub use types::*;
pub use watch::TimeoutHandle;
pub use watch::WatchEvent;
pub use watch::WatchHandle;
