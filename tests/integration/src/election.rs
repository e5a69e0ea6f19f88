//! Multi-node election scenarios.

use parley_cluster::PeerId;

use crate::helpers::{cluster, settle};

#[tokio::test]
async fn five_nodes_converge_on_highest_id() {
    let cluster = cluster(5);

    // the lowest node starts; leadership must still land on node 5
    cluster.node(1).election.clone().start_election().await;
    settle().await;

    for leader in cluster.leaders() {
        assert_eq!(leader, Some(PeerId(5)));
    }
    assert!(cluster.node(5).state.is_self_leader());
    assert!(!cluster.node(1).state.is_electing());
}

#[tokio::test]
async fn highest_node_elects_itself_directly() {
    let cluster = cluster(3);

    cluster.node(3).election.clone().start_election().await;
    settle().await;

    assert!(cluster.node(3).state.is_self_leader());
    assert_eq!(cluster.node(1).state.leader().map(|l| l.id), Some(PeerId(3)));
}

#[tokio::test]
async fn survivors_elect_next_highest_when_top_node_is_down() {
    let cluster = cluster(5);
    cluster.router.take_down(PeerId(5));

    cluster.node(2).election.clone().start_election().await;
    settle().await;

    for id in 1..=4 {
        assert_eq!(
            cluster.node(id).state.leader().map(|l| l.id),
            Some(PeerId(4)),
            "node {id} should follow node 4"
        );
    }
}

#[tokio::test]
async fn concurrent_starters_agree_on_one_leader() {
    let cluster = cluster(5);

    let (a, b) = (cluster.node(1), cluster.node(3));
    tokio::join!(
        a.election.clone().start_election(),
        b.election.clone().start_election(),
    );
    settle().await;

    for leader in cluster.leaders() {
        assert_eq!(leader, Some(PeerId(5)));
    }
}

#[tokio::test]
async fn returning_top_node_reclaims_leadership() {
    let cluster = cluster(3);
    cluster.router.take_down(PeerId(3));

    cluster.node(1).election.clone().start_election().await;
    settle().await;
    assert!(cluster.node(2).state.is_self_leader());

    // node 3 comes back and runs its own election; everyone switches
    cluster.router.bring_up(PeerId(3));
    cluster.node(3).election.clone().start_election().await;
    settle().await;

    for leader in cluster.leaders() {
        assert_eq!(leader, Some(PeerId(3)));
    }
}
