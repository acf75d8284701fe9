//! Asynchronous notification subsystem.
//!
//! ```text
//! long-poll task / keepalive task (tokio runtime)
//!        |  Delivery::Watch{id, ..} / Delivery::SessionTimeout{id}
//!        v
//!   bounded crossbeam queue
//!        |
//!   dispatcher thread: registry.retire(id) -> invoke callback (at most once)
//! ```
//!
//! Registrations live in two tables, each guarded by one mutex. Whoever removes
//! an entry from its table owns the callback; a cancelled or abandoned entry is
//! simply gone when its delivery arrives, so the delivery is dropped.

mod dispatcher;
mod registry;
mod timeout;


pub(crate) use dispatcher::*;
pub use registry::WatchEvent;
pub use registry::WatchHandle;
pub(crate) use registry::WatchNotification;
pub(crate) use registry::WatchRegistry;
pub use timeout::TimeoutHandle;
pub(crate) use timeout::TimeoutRegistry;
