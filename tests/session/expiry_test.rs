use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use nexus_client::ErrorCode;

use crate::common::connect;
use crate::common::new_cluster;
use crate::common::CALLBACK_WAIT;
use crate::common::QUIET_PERIOD;

fn take_cluster_down(cluster: &nexus_client::MemCluster) {
    for member in cluster.members() {
        cluster.set_online(&member, false);
    }
}

#[test]
fn test_session_timeout_fires_when_cluster_unreachable() {
    let cluster = new_cluster(3);
    let session = connect(&cluster);
    session.trylock("/l").unwrap();
    let old_id = session.session_id();

    let (tx, rx) = mpsc::channel();
    let handle = session
        .register_session_timeout(move |ctx: Arc<String>| tx.send((*ctx).clone()).unwrap(), Arc::new("expired".to_string()))
        .unwrap();
    assert!(handle.is_pending());

    take_cluster_down(&cluster);
    assert_eq!(rx.recv_timeout(CALLBACK_WAIT).unwrap(), "expired");
    assert!(!handle.is_pending());
    assert_ne!(session.session_id(), old_id);
    assert!(session.held_locks().is_empty());
}

#[test]
fn test_newer_timeout_registration_replaces_older() {
    let cluster = new_cluster(3);
    let session = connect(&cluster);
    let first_ctx = Arc::new(1u8);
    let (tx, rx) = mpsc::channel();

    let first_tx = tx.clone();
    let first = session
        .register_session_timeout(move |ctx: Arc<u8>| first_tx.send(*ctx).unwrap(), first_ctx.clone())
        .unwrap();
    let second = session
        .register_session_timeout(move |ctx: Arc<u8>| tx.send(*ctx).unwrap(), Arc::new(2u8))
        .unwrap();
    assert!(!first.is_pending());
    assert!(second.is_pending());
    assert_eq!(Arc::strong_count(&first_ctx), 1);

    take_cluster_down(&cluster);
    assert_eq!(rx.recv_timeout(CALLBACK_WAIT).unwrap(), 2);
    assert!(rx.recv_timeout(QUIET_PERIOD).is_err());
}

#[test]
fn test_cancelled_timeout_does_not_fire() {
    let cluster = new_cluster(1);
    let session = connect(&cluster);
    let (tx, rx) = mpsc::channel::<()>();
    let handle = session
        .register_session_timeout(move |_: Arc<()>| tx.send(()).unwrap(), Arc::new(()))
        .unwrap();

    assert!(handle.cancel());
    take_cluster_down(&cluster);
    assert!(rx.recv_timeout(Duration::from_millis(800)).is_err());
}

#[test]
fn test_expiry_fails_pending_watches_and_login() {
    let cluster = new_cluster(3);
    let session = connect(&cluster);
    session.register("judy", "pw").unwrap();
    session.login("judy", "pw").unwrap();

    let (tx, rx) = mpsc::channel();
    session
        .watch("k", move |event, code| tx.send((event.value, code)).unwrap(), Arc::new(()))
        .unwrap();

    take_cluster_down(&cluster);
    let (value, code) = rx.recv_timeout(CALLBACK_WAIT).unwrap();
    assert_eq!(code, ErrorCode::Timeout);
    assert!(value.is_empty());

    assert!(session.is_login_expired());
    assert!(!session.is_logged_in());
    assert_eq!(session.current_user_name(), None);
}

#[test]
fn test_session_recovers_after_expiry() {
    let cluster = new_cluster(3);
    let session = connect(&cluster);
    let (tx, rx) = mpsc::channel();
    session
        .register_session_timeout(move |_: Arc<()>| tx.send(()).unwrap(), Arc::new(()))
        .unwrap();

    let members = cluster.members();
    take_cluster_down(&cluster);
    rx.recv_timeout(CALLBACK_WAIT).unwrap();

    for member in &members {
        cluster.set_online(member, true);
    }
    cluster.elect_leader(&members[0]);
    session.put("back", "online").unwrap();
    session.trylock("/again").unwrap();
    assert_eq!(cluster.lock_holder("/again"), Some(session.session_id()));
}
