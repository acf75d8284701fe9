use std::time::Duration;

use nexus_client::ErrorCode;
use nexus_client::NodeRole;
use nexus_client::StatKind;

use crate::common::connect;
use crate::common::new_cluster;

#[test]
fn test_show_reports_one_leader_per_member() {
    let cluster = new_cluster(5);
    let session = connect(&cluster);
    session.put("k", "v").unwrap();

    let nodes = session.show().unwrap();
    assert_eq!(nodes.len(), 5);
    let ids: Vec<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
    let members = cluster.members();
    assert_eq!(ids, members.iter().map(String::as_str).collect::<Vec<_>>());

    let leaders: Vec<_> = nodes.iter().filter(|n| n.role == NodeRole::Leader).collect();
    assert_eq!(leaders.len(), 1);
    assert_eq!(Some(leaders[0].id.clone()), cluster.leader());
    assert!(nodes.iter().all(|n| n.last_applied >= 1 && n.term >= 1));
}

#[test]
fn test_show_labels_unreachable_members_offline() {
    let cluster = new_cluster(5);
    let session = connect(&cluster);
    let members = cluster.members();
    cluster.set_online(&members[0], false);
    cluster.set_online(&members[3], false);

    let nodes = session.show().unwrap();
    assert_eq!(nodes[0].role, NodeRole::Offline);
    assert_eq!(nodes[0].term, -1);
    assert_eq!(nodes[3].role, NodeRole::Offline);
    assert!(!nodes[3].is_reachable());
    // Three of five remain, so a new leader took over
    assert_eq!(nodes.iter().filter(|n| n.role == NodeRole::Leader).count(), 1);
    assert_eq!(nodes[1].role, NodeRole::Leader);
}

#[test]
fn test_show_fails_when_nobody_answers() {
    let cluster = new_cluster(3);
    let session = connect(&cluster);
    for member in cluster.members() {
        cluster.set_online(&member, false);
    }

    assert_eq!(session.show().unwrap_err().code(), ErrorCode::ClusterDown);
    assert_eq!(session.stat().unwrap_err().code(), ErrorCode::ClusterDown);
    assert_eq!(session.last_error(), ErrorCode::ClusterDown);
}

#[test]
fn test_stat_counts_operations_on_leader() {
    let cluster = new_cluster(3);
    let session = connect(&cluster);
    cluster.set_stats_window(None);
    cluster.tick();

    for i in 0..10 {
        session.put(format!("k{i}"), "v").unwrap();
    }
    session.get("k1").unwrap();

    let stats = session.stat().unwrap();
    assert_eq!(stats.len(), 3);
    let leader = stats.iter().find(|s| s.role == NodeRole::Leader).unwrap();
    assert_eq!(leader.stat(StatKind::Put).current, 10);
    assert!(leader.stat(StatKind::Get).current >= 1);

    cluster.tick();
    let rolled = session.stat().unwrap();
    let leader = rolled.iter().find(|s| s.role == NodeRole::Leader).unwrap();
    assert_eq!(leader.stat(StatKind::Put).current, 0);
    // Mean of the two closed windows: 0 and 10
    assert_eq!(leader.stat(StatKind::Put).average, 5);

    let follower = rolled.iter().find(|s| s.role == NodeRole::Follower).unwrap();
    assert_eq!(follower.stat(StatKind::Put).average, 0);
}

#[test]
fn test_clean_binlog_checks_applied_index() {
    let cluster = new_cluster(3);
    let session = connect(&cluster);
    session.put("a", "1").unwrap();
    session.put("b", "2").unwrap();

    let members = cluster.members();
    let applied = session.show().unwrap()[1].last_applied;
    session.clean_binlog(&members[1], applied).unwrap();
    assert_eq!(
        session.clean_binlog(&members[1], applied + 100).unwrap_err().code(),
        ErrorCode::CleanBinlogFail
    );
    assert!(session.clean_binlog("stranger:1", 1).is_err());
}

#[test]
fn test_stat_windows_close_without_tick() {
    let cluster = new_cluster(3);
    let session = connect(&cluster);
    cluster.set_stats_window(Some(Duration::from_millis(100)));

    for i in 0..10 {
        session.put(format!("k{i}"), "v").unwrap();
    }
    std::thread::sleep(Duration::from_millis(250));

    let stats = session.stat().unwrap();
    let leader = stats.iter().find(|s| s.role == NodeRole::Leader).unwrap();
    assert_eq!(leader.stat(StatKind::Put).current, 0);
    assert!(leader.stat(StatKind::Put).average >= 1);
}
