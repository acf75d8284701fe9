use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::sync::Arc;

use bytes::Bytes;
use nexus_client::ErrorCode;

use crate::common::connect;
use crate::common::new_cluster;
use crate::common::CALLBACK_WAIT;
use crate::common::QUIET_PERIOD;

#[test]
fn test_watch_fires_exactly_once() {
    let cluster = new_cluster(3);
    let session = connect(&cluster);
    session.put("config", "v1").unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel();
    session
        .watch(
            "config",
            move |event, code| {
                event.context.fetch_add(1, Ordering::SeqCst);
                tx.send((event.key, event.value, code)).unwrap();
            },
            calls.clone(),
        )
        .unwrap();

    session.put("config", "v2").unwrap();
    session.put("config", "v3").unwrap();

    let (key, value, code) = rx.recv_timeout(CALLBACK_WAIT).unwrap();
    assert_eq!(key, Bytes::from("config"));
    assert!(value == Bytes::from("v2") || value == Bytes::from("v3"));
    assert_eq!(code, ErrorCode::Ok);

    assert!(rx.recv_timeout(QUIET_PERIOD).is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    // The registry released its reference with the callback
    assert_eq!(Arc::strong_count(&calls), 1);
}

#[test]
fn test_watch_sees_writes_from_other_sessions() {
    let cluster = new_cluster(3);
    let watcher = connect(&cluster);
    let writer = connect(&cluster);

    let (tx, rx) = mpsc::channel();
    watcher
        .watch("jobs/next", move |event, code| tx.send((event.value, event.deleted, code)).unwrap(), Arc::new(()))
        .unwrap();

    writer.put("jobs/next", "42").unwrap();
    let (value, deleted, code) = rx.recv_timeout(CALLBACK_WAIT).unwrap();
    assert_eq!(value, Bytes::from("42"));
    assert!(!deleted);
    assert_eq!(code, ErrorCode::Ok);
}

#[test]
fn test_watch_reports_deletion() {
    let cluster = new_cluster(3);
    let session = connect(&cluster);
    session.put("ephemeral", "here").unwrap();

    let (tx, rx) = mpsc::channel();
    session
        .watch("ephemeral", move |event, code| tx.send((event.deleted, code)).unwrap(), Arc::new(()))
        .unwrap();
    session.delete("ephemeral").unwrap();

    assert_eq!(rx.recv_timeout(CALLBACK_WAIT).unwrap(), (true, ErrorCode::Ok));
}

#[test]
fn test_cancelled_watch_releases_context() {
    let cluster = new_cluster(3);
    let session = connect(&cluster);
    let context = Arc::new(String::from("ctx"));
    let (tx, rx) = mpsc::channel::<()>();

    let handle = session
        .watch("k", move |_, _| tx.send(()).unwrap(), context.clone())
        .unwrap();
    assert_eq!(session.pending_watches(), 1);
    assert!(handle.cancel());
    assert!(!handle.cancel());
    assert_eq!(Arc::strong_count(&context), 1);

    session.put("k", "v").unwrap();
    assert!(rx.recv_timeout(QUIET_PERIOD).is_err());
    assert_eq!(session.pending_watches(), 0);
}

#[test]
fn test_dropped_handle_keeps_watch_alive() {
    let cluster = new_cluster(1);
    let session = connect(&cluster);
    let (tx, rx) = mpsc::channel();

    drop(session.watch("k", move |event, _| tx.send(event.value).unwrap(), Arc::new(())).unwrap());
    session.put("k", "late").unwrap();

    assert_eq!(rx.recv_timeout(CALLBACK_WAIT).unwrap(), Bytes::from("late"));
}

#[test]
fn test_many_watches_each_fire_once() {
    let cluster = new_cluster(3);
    let session = connect(&cluster);
    let fired = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel();

    for i in 0..50 {
        let tx = tx.clone();
        session
            .watch(
                format!("key{i}"),
                move |event, _| {
                    event.context.fetch_add(1, Ordering::SeqCst);
                    tx.send(()).unwrap();
                },
                fired.clone(),
            )
            .unwrap();
    }
    for i in 0..50 {
        session.put(format!("key{i}"), "x").unwrap();
    }

    for _ in 0..50 {
        rx.recv_timeout(CALLBACK_WAIT).unwrap();
    }
    assert!(rx.recv_timeout(QUIET_PERIOD).is_err());
    assert_eq!(fired.load(Ordering::SeqCst), 50);
}

#[test]
fn test_callback_may_call_back_into_session() {
    let cluster = new_cluster(3);
    let session = Arc::new(connect(&cluster));
    let (tx, rx) = mpsc::channel();

    let inner = session.clone();
    session
        .watch(
            "trigger",
            move |_, _| {
                inner.put("reaction", "done").unwrap();
                tx.send(inner.get("reaction").unwrap()).unwrap();
            },
            Arc::new(()),
        )
        .unwrap();
    session.put("trigger", "go").unwrap();

    assert_eq!(rx.recv_timeout(CALLBACK_WAIT).unwrap(), Bytes::from("done"));
}

#[test]
fn test_watch_survives_leader_change() {
    let cluster = new_cluster(3);
    let session = connect(&cluster);
    let (tx, rx) = mpsc::channel();
    session
        .watch("k", move |event, code| tx.send((event.value, code)).unwrap(), Arc::new(()))
        .unwrap();

    let members = cluster.members();
    assert!(cluster.elect_leader(&members[2]));
    session.put("k", "after-election").unwrap();

    let (value, code) = rx.recv_timeout(CALLBACK_WAIT).unwrap();
    assert_eq!(code, ErrorCode::Ok);
    assert_eq!(value, Bytes::from("after-election"));
}

const RACE_WATCHES: usize = 40;

struct RaceRound {
    round: usize,
    session: Arc<nexus_client::Session>,
    calls: Vec<Arc<AtomicUsize>>,
    handles: Vec<nexus_client::WatchHandle>,
}

fn race_round(
    cluster: &nexus_client::MemCluster,
    round: usize,
) -> RaceRound {
    let session = Arc::new(connect(cluster));
    let calls: Vec<Arc<AtomicUsize>> = (0..RACE_WATCHES).map(|_| Arc::new(AtomicUsize::new(0))).collect();
    let handles = calls
        .iter()
        .enumerate()
        .map(|(i, counter)| {
            session
                .watch(
                    format!("race-{round}-{i}"),
                    |event, _| {
                        event.context.fetch_add(1, Ordering::SeqCst);
                    },
                    counter.clone(),
                )
                .unwrap()
        })
        .collect();
    RaceRound {
        round,
        session,
        calls,
        handles,
    }
}

/// Puts every watched key from one thread while another cancels every handle.
fn race_puts_and_cancels(round: &RaceRound) -> Vec<bool> {
    let writer = {
        let session = round.session.clone();
        let n = round.round;
        std::thread::spawn(move || {
            for i in 0..RACE_WATCHES {
                session.put(format!("race-{n}-{i}"), "v").ok();
            }
        })
    };
    let handles = round.handles.clone();
    let canceller = std::thread::spawn(move || handles.iter().rev().map(|h| h.cancel()).collect::<Vec<_>>());

    writer.join().unwrap();
    canceller.join().unwrap().into_iter().rev().collect()
}

#[test]
fn test_delivery_racing_cancel_runs_each_callback_at_most_once() {
    let cluster = new_cluster(3);
    for n in 0..10 {
        let round = race_round(&cluster, n);
        let cancelled = race_puts_and_cancels(&round);

        let deadline = std::time::Instant::now() + CALLBACK_WAIT;
        loop {
            let fired = round.calls.iter().filter(|c| c.load(Ordering::SeqCst) > 0).count();
            let withdrawn = cancelled.iter().filter(|c| **c).count();
            if fired + withdrawn == RACE_WATCHES || std::time::Instant::now() > deadline {
                assert_eq!(fired + withdrawn, RACE_WATCHES);
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        std::thread::sleep(QUIET_PERIOD);

        for (counter, was_cancelled) in round.calls.iter().zip(&cancelled) {
            let runs = counter.load(Ordering::SeqCst);
            assert!(runs <= 1);
            if *was_cancelled {
                assert_eq!(runs, 0);
            }
        }
        assert_eq!(round.session.pending_watches(), 0);
    }
}

#[test]
fn test_close_racing_delivery_and_cancel_releases_every_context_once() {
    let cluster = new_cluster(3);
    for n in 0..10 {
        let round = race_round(&cluster, n);
        let closer = {
            let session = round.session.clone();
            std::thread::spawn(move || {
                std::thread::sleep(std::time::Duration::from_millis(2));
                session.close();
            })
        };
        let cancelled = race_puts_and_cancels(&round);
        closer.join().unwrap();
        std::thread::sleep(QUIET_PERIOD);

        for (counter, was_cancelled) in round.calls.iter().zip(&cancelled) {
            let runs = counter.load(Ordering::SeqCst);
            assert!(runs <= 1);
            if *was_cancelled {
                assert_eq!(runs, 0);
            }
            // Fired, cancelled or abandoned: the registration let go of its context
            assert_eq!(Arc::strong_count(counter), 1);
        }
        assert!(round.session.is_closed());
        assert_eq!(round.session.pending_watches(), 0);
    }
}
