use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use nexus_client::ErrorCode;

use crate::common::connect;
use crate::common::new_cluster;
use crate::common::CALLBACK_WAIT;
use crate::common::QUIET_PERIOD;

#[test]
fn test_trylock_fails_while_held_elsewhere() {
    let cluster = new_cluster(3);
    let owner = connect(&cluster);
    let rival = connect(&cluster);

    owner.trylock("/leader-election").unwrap();
    let err = rival.trylock("/leader-election").unwrap_err();
    assert_eq!(err.code(), ErrorCode::LockFail);
    assert_eq!(rival.last_error(), ErrorCode::LockFail);

    // Re-acquiring a held lock is fine
    owner.trylock("/leader-election").unwrap();

    owner.unlock("/leader-election").unwrap();
    rival.trylock("/leader-election").unwrap();
    assert_eq!(rival.held_locks(), vec![Bytes::from("/leader-election")]);
}

#[test]
fn test_unlock_requires_ownership() {
    let cluster = new_cluster(3);
    let owner = connect(&cluster);
    let rival = connect(&cluster);

    assert_eq!(owner.unlock("/never").unwrap_err().code(), ErrorCode::LockFail);
    owner.trylock("/mine").unwrap();
    assert_eq!(rival.unlock("/mine").unwrap_err().code(), ErrorCode::LockFail);
    assert_eq!(cluster.lock_holder("/mine"), Some(owner.session_id()));
}

#[test]
fn test_lock_blocks_until_release() {
    let cluster = new_cluster(3);
    let owner = connect(&cluster);
    let waiter = Arc::new(connect(&cluster));
    owner.lock("/resource").unwrap();

    let (tx, rx) = mpsc::channel();
    let blocked = {
        let waiter = waiter.clone();
        thread::spawn(move || {
            let result = waiter.lock("/resource");
            tx.send(()).unwrap();
            result
        })
    };

    assert!(rx.recv_timeout(QUIET_PERIOD).is_err());
    owner.unlock("/resource").unwrap();

    rx.recv_timeout(CALLBACK_WAIT).unwrap();
    blocked.join().unwrap().unwrap();
    assert_eq!(cluster.lock_holder("/resource"), Some(waiter.session_id()));
}

#[test]
fn test_lock_is_released_when_holder_closes() {
    let cluster = new_cluster(3);
    let owner = connect(&cluster);
    let waiter = Arc::new(connect(&cluster));
    owner.trylock("/job").unwrap();
    let owner_id = owner.session_id();

    let blocked = {
        let waiter = waiter.clone();
        thread::spawn(move || waiter.lock("/job"))
    };
    thread::sleep(Duration::from_millis(100));

    // The cluster expires the closed session's lease
    drop(owner);
    assert!(cluster.expire_session(&owner_id));

    blocked.join().unwrap().unwrap();
    assert_eq!(cluster.lock_holder("/job"), Some(waiter.session_id()));
}

#[test]
fn test_locks_live_outside_user_namespaces() {
    let cluster = new_cluster(3);
    let alice = connect(&cluster);
    let anonymous = connect(&cluster);
    alice.register("alice", "pw").unwrap();
    alice.login("alice", "pw").unwrap();

    alice.trylock("/shared").unwrap();
    assert_eq!(anonymous.trylock("/shared").unwrap_err().code(), ErrorCode::LockFail);
}

#[test]
fn test_close_aborts_blocked_lock() {
    let cluster = new_cluster(3);
    let owner = connect(&cluster);
    let waiter = Arc::new(connect(&cluster));
    owner.trylock("/stuck").unwrap();

    let blocked = {
        let waiter = waiter.clone();
        thread::spawn(move || waiter.lock("/stuck"))
    };
    thread::sleep(Duration::from_millis(100));
    waiter.close();

    let err = blocked.join().unwrap().unwrap_err();
    assert!(matches!(err, nexus_client::Error::SessionClosed));
}
