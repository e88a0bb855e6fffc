//! Multi-peer membership scenarios over real sockets.

use std::sync::Arc;
use std::time::Duration;

use crate::helpers::{eventually, settle_now, spawn_peer};

#[tokio::test]
async fn two_peers_converge() {
    let p1 = spawn_peer(vec![]).await;
    settle_now(&p1).await;
    assert_eq!(p1.status(), "ready");

    let p2 = spawn_peer(vec![p1.self_member().address()]).await;

    for peer in [&p1, &p2] {
        let peer = Arc::clone(peer);
        eventually("both peers see a cluster of two", move || {
            let peer = Arc::clone(&peer);
            async move { peer.cluster_size().await == 2 }
        })
        .await;
    }
}

#[tokio::test]
async fn leave_shrinks_the_cluster() {
    let p1 = spawn_peer(vec![]).await;
    let p2 = spawn_peer(vec![p1.self_member().address()]).await;

    {
        let p1 = Arc::clone(&p1);
        eventually("p1 sees p2", move || {
            let p1 = Arc::clone(&p1);
            async move { p1.cluster_size().await == 2 }
        })
        .await;
    }

    p2.leave(Duration::ZERO).await.unwrap();

    let watching = Arc::clone(&p1);
    eventually("p1 sees p2 gone", move || {
        let p1 = Arc::clone(&watching);
        async move { p1.cluster_size().await == 1 }
    })
    .await;
}

#[tokio::test]
async fn five_peers_agree_on_positions() {
    let p1 = spawn_peer(vec![]).await;
    let seed = p1.self_member().address();

    let mut peers = vec![p1];
    for _ in 0..4 {
        peers.push(spawn_peer(vec![seed.clone()]).await);
    }

    for peer in &peers {
        let peer = Arc::clone(peer);
        eventually("every peer sees all five members", move || {
            let peer = Arc::clone(&peer);
            async move { peer.cluster_size().await == 5 }
        })
        .await;
    }

    // each peer's position equals the index of its name in the sorted
    // name list; together they fill 0..5
    let mut names: Vec<String> = peers.iter().map(|p| p.name()).collect();
    names.sort();

    let mut positions = Vec::new();
    for peer in &peers {
        let position = peer.position().await;
        let expected = names.iter().position(|n| *n == peer.name()).unwrap();
        assert_eq!(position, expected, "peer {} has a shifted position", peer.name());
        positions.push(position);
    }
    positions.sort();
    assert_eq!(positions, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn settle_waits_for_stable_membership() {
    let p1 = spawn_peer(vec![]).await;
    let p2 = spawn_peer(vec![p1.self_member().address()]).await;

    {
        let p2 = Arc::clone(&p2);
        eventually("p2 sees p1", move || {
            let p2 = Arc::clone(&p2);
            async move { p2.cluster_size().await == 2 }
        })
        .await;
    }

    // membership is stable now, so a short poll interval settles quickly
    let settling = Arc::clone(&p2);
    tokio::spawn(async move {
        settling
            .settle(
                tokio_util::sync::CancellationToken::new(),
                Duration::from_millis(20),
            )
            .await;
    });

    tokio::time::timeout(Duration::from_secs(10), p2.wait_ready())
        .await
        .expect("settle should finish on a stable cluster");
    assert!(p2.ready());
}

#[tokio::test]
async fn info_lists_every_member() {
    let p1 = spawn_peer(vec![]).await;
    let p2 = spawn_peer(vec![p1.self_member().address()]).await;

    {
        let p1 = Arc::clone(&p1);
        eventually("p1 sees p2", move || {
            let p1 = Arc::clone(&p1);
            async move { p1.cluster_size().await == 2 }
        })
        .await;
    }

    let info = p1.info().await;
    assert_eq!(info["self"]["name"], p1.name());
    let members = info["members"].as_array().unwrap();
    assert_eq!(members.len(), 2);
    let names: Vec<_> = members.iter().map(|m| m["name"].as_str().unwrap()).collect();
    assert!(names.contains(&p1.name().as_str()));
    assert!(names.contains(&p2.name().as_str()));
}
