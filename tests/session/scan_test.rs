use bytes::Bytes;
use nexus_client::ClientConfig;
use nexus_client::ErrorCode;

use crate::common::connect;
use crate::common::connect_with;
use crate::common::new_cluster;
use crate::common::test_config;

fn small_batches() -> ClientConfig {
    ClientConfig {
        scan_batch_size: 64,
        ..test_config()
    }
}

#[test]
fn test_scan_visits_every_key_once_in_order() {
    let cluster = new_cluster(3);
    let session = connect_with(&cluster, small_batches());
    for i in 0..1000 {
        session.put(format!("{i:03}"), format!("v{i}")).unwrap();
    }

    let mut cursor = session.scan("000", "999").unwrap();
    let mut count = 0;
    while !cursor.done() {
        assert_eq!(cursor.key().unwrap(), &Bytes::from(format!("{count:03}")));
        assert_eq!(cursor.value().unwrap(), &Bytes::from(format!("v{count}")));
        cursor.advance().unwrap();
        count += 1;
    }
    // The end key is exclusive
    assert_eq!(count, 999);
    assert_eq!(cursor.error(), ErrorCode::Ok);
    assert!(cursor.advance().unwrap_err().is_exhausted());
}

#[test]
fn test_scan_with_open_end_reads_to_last_key() {
    let cluster = new_cluster(1);
    let session = connect_with(&cluster, small_batches());
    for i in 0..200 {
        session.put(format!("k{i:04}"), "x").unwrap();
    }
    session.put("other", "x").unwrap();

    let keys: Vec<Bytes> = session
        .scan("k0100", "")
        .unwrap()
        .map(|pair| pair.unwrap().key)
        .collect();
    assert_eq!(keys.len(), 101);
    assert_eq!(keys.first(), Some(&Bytes::from("k0100")));
    assert_eq!(keys.last(), Some(&Bytes::from("other")));
}

#[test]
fn test_scan_sees_only_own_namespace() {
    let cluster = new_cluster(3);
    let session = connect(&cluster);
    session.put("a", "anonymous").unwrap();

    session.register("carol", "secret").unwrap();
    session.login("carol", "secret").unwrap();
    session.put("b", "carol").unwrap();

    let keys: Vec<Bytes> = session.scan("", "").unwrap().map(|p| p.unwrap().key).collect();
    assert_eq!(keys, vec![Bytes::from("b")]);
}

#[test]
fn test_scan_failing_mid_way_reports_error_once() {
    let cluster = new_cluster(3);
    let session = connect_with(
        &cluster,
        ClientConfig {
            scan_batch_size: 2,
            ..test_config()
        },
    );
    for key in ["a", "b", "c", "d"] {
        session.put(key, "v").unwrap();
    }

    let mut cursor = session.scan("a", "z").unwrap();
    let members = cluster.members();
    cluster.set_online(&members[1], false);
    cluster.set_online(&members[2], false);

    let first = cursor.next().unwrap().unwrap();
    assert_eq!(first.key, Bytes::from("a"));
    let second = cursor.next().unwrap();
    assert_eq!(second.unwrap().key, Bytes::from("b"));
    let failure = cursor.next().unwrap().unwrap_err();
    assert_eq!(failure.code(), ErrorCode::ClusterDown);
    assert_eq!(cursor.error(), ErrorCode::ClusterDown);
    assert!(cursor.next().is_none());
    assert!(cursor.done());
}
