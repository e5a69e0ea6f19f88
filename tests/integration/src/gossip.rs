//! Gossip and failure handling across a live cluster.

use parley_cluster::{Fabric, PeerId, ValueKind};

use crate::helpers::{cluster, settle};

#[tokio::test]
async fn heartbeats_flood_to_every_node() {
    let cluster = cluster(4);

    // a few rounds with advancing timestamps; forwarding plus full
    // fanout makes total coverage effectively certain
    for round in 1..=10u64 {
        cluster.node(3).beat(round * 100).await;
    }
    settle().await;

    for id in [1, 2, 4] {
        assert!(
            cluster.node(id).state.liveness_of(PeerId(3)).is_some(),
            "node {id} never heard about node 3"
        );
    }
}

#[tokio::test]
async fn failed_peers_claims_are_released_cluster_wide() {
    let cluster = cluster(5);
    cluster.node(5).election.clone().start_election().await;
    settle().await;

    assert!(cluster
        .node(2)
        .consensus
        .verify_unique(ValueKind::Identity, "alice")
        .await
        .unwrap());
    settle().await;

    // the leader saw node 2 alive long ago; the next detection round
    // declares it failed and releases its claims
    let leader = cluster.node(5);
    leader.state.observe_heartbeat(PeerId(2), 100);
    cluster.router.take_down(PeerId(2));
    leader.detect(1_000_000).await;
    settle().await;

    assert!(leader.state.is_failed(PeerId(2)));
    for id in [1, 3, 4, 5] {
        assert!(
            !cluster
                .node(id)
                .state
                .with_ledger(|l| l.contains(ValueKind::Identity, "alice")),
            "node {id} should have released alice"
        );
    }

    // the identity is claimable again
    assert!(cluster
        .node(3)
        .consensus
        .verify_unique(ValueKind::Identity, "alice")
        .await
        .unwrap());
}

#[tokio::test]
async fn readmitted_peer_receives_the_leader_ledger() {
    let cluster = cluster(3);
    cluster.node(3).election.clone().start_election().await;
    settle().await;

    assert!(cluster
        .node(1)
        .consensus
        .verify_unique(ValueKind::RoomId, "lobby")
        .await
        .unwrap());
    settle().await;

    // the leader fails node 2, node 2 loses its ledger to quarantine
    let leader = cluster.node(3);
    leader.state.observe_heartbeat(PeerId(2), 100);
    leader.detect(1_000_000).await;
    assert!(leader.state.is_failed(PeerId(2)));
    cluster.node(2).state.quarantine();
    assert!(cluster.node(2).state.with_ledger(|l| l.is_empty()));

    // a fresh heartbeat re-admits node 2 and triggers the snapshot
    for (peer, msg) in leader.gossip.on_heartbeat(PeerId(2), 2_000_000) {
        cluster
            .router
            .send_and_forget(std::slice::from_ref(&peer), &msg)
            .await;
    }
    settle().await;

    assert!(cluster
        .node(2)
        .state
        .with_ledger(|l| l.contains(ValueKind::RoomId, "lobby")));
}
