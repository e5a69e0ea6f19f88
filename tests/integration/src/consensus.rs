//! End-to-end uniqueness verification across a live cluster.

use parley_cluster::{PeerId, ValueKind};

use crate::helpers::{cluster, settle, TestCluster};

async fn with_leader(size: u32) -> TestCluster {
    let cluster = cluster(size);
    cluster.node(size).election.clone().start_election().await;
    settle().await;
    cluster
}

#[tokio::test]
async fn follower_claim_lands_in_every_ledger() {
    let cluster = with_leader(5).await;

    let verdict = cluster
        .node(2)
        .consensus
        .verify_unique(ValueKind::Identity, "alice")
        .await
        .unwrap();
    assert!(verdict);
    settle().await;

    // the leader recorded the requester as owner and gossiped the claim
    for id in 1..=5 {
        let node = cluster.node(id);
        let (identities, _) = node.state.with_ledger(|l| l.snapshot());
        assert_eq!(
            identities.get("alice"),
            Some(&PeerId(2)),
            "node {id} should know alice belongs to node 2"
        );
    }
}

#[tokio::test]
async fn second_claim_for_same_value_is_rejected() {
    let cluster = with_leader(3).await;

    assert!(cluster
        .node(1)
        .consensus
        .verify_unique(ValueKind::RoomId, "lobby")
        .await
        .unwrap());
    assert!(!cluster
        .node(2)
        .consensus
        .verify_unique(ValueKind::RoomId, "lobby")
        .await
        .unwrap());
}

#[tokio::test]
async fn racing_claims_resolve_to_one_winner() {
    let cluster = with_leader(5).await;

    let node1 = cluster.node(1);
    let node2 = cluster.node(2);
    let (a, b) = tokio::join!(
        node1.consensus.verify_unique(ValueKind::Identity, "alice"),
        node2.consensus.verify_unique(ValueKind::Identity, "alice"),
    );
    assert_ne!(a.unwrap(), b.unwrap(), "exactly one racer may win");
}

#[tokio::test]
async fn same_name_allowed_across_namespaces() {
    let cluster = with_leader(3).await;

    assert!(cluster
        .node(1)
        .consensus
        .verify_unique(ValueKind::Identity, "lobby")
        .await
        .unwrap());
    assert!(cluster
        .node(2)
        .consensus
        .verify_unique(ValueKind::RoomId, "lobby")
        .await
        .unwrap());
}

#[tokio::test]
async fn leader_crash_costs_one_election_not_the_claim() {
    let cluster = with_leader(5).await;
    cluster.router.take_down(PeerId(5));

    // the relay to the dead leader fails, node 3 re-elects and retries
    let verdict = cluster
        .node(3)
        .consensus
        .verify_unique(ValueKind::Identity, "alice")
        .await
        .unwrap();
    assert!(verdict);
    assert_eq!(
        cluster.node(3).state.leader().map(|l| l.id),
        Some(PeerId(4)),
        "the next-highest node takes over"
    );
}

#[tokio::test]
async fn cold_start_claim_elects_a_leader_first() {
    let cluster = cluster(3);
    cluster.router.take_down(PeerId(2));
    cluster.router.take_down(PeerId(3));

    // nobody was ever elected; the first attempt fails with no leader
    // known, the retry election promotes node 1, and the second
    // attempt succeeds
    let verdict = cluster
        .node(1)
        .consensus
        .verify_unique(ValueKind::Identity, "alice")
        .await
        .unwrap();
    assert!(verdict);
    assert!(cluster.node(1).state.is_self_leader());
}

#[tokio::test]
async fn claim_during_an_election_waits_out_the_round() {
    let cluster = with_leader(3).await;
    let node = cluster.node(1);
    node.state.set_electing(true);

    // the first attempt fails fast rather than trusting a possibly
    // deposed leader; the retry runs after the settle delay, by which
    // time node 3 has re-announced itself
    let verdict = node
        .consensus
        .verify_unique(ValueKind::Identity, "alice")
        .await
        .unwrap();
    assert!(verdict);
    assert_eq!(node.state.leader().map(|l| l.id), Some(PeerId(3)));
}
