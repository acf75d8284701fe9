pub mod cluster;

pub mod net;

pub mod time;

pub(crate) mod scoped_timer;
