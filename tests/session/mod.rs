mod auth_test;
mod cluster_view_test;
mod expiry_test;
mod lock_test;
mod scan_test;
mod watch_test;
