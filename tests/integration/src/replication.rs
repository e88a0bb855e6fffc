//! State replication scenarios: broadcasts and push/pull anti-entropy.

use std::sync::Arc;

use bytes::Bytes;

use crate::helpers::{eventually, settle_now, spawn_peer, SetState};

#[tokio::test]
async fn broadcast_reaches_the_other_peer() {
    let p1 = spawn_peer(vec![]).await;
    let p2 = spawn_peer(vec![p1.self_member().address()]).await;

    let s1 = Arc::new(SetState::default());
    let s2 = Arc::new(SetState::default());
    let channel = p1.add_state("sil", s1.clone());
    p2.add_state("sil", s2.clone());

    {
        let p1 = Arc::clone(&p1);
        eventually("peers converge", move || {
            let p1 = Arc::clone(&p1);
            async move { p1.cluster_size().await == 2 }
        })
        .await;
    }
    settle_now(&p1).await;

    s1.insert(42);
    channel.broadcast(Bytes::from_static(&[42]));

    eventually("broadcast merged on p2", move || {
        let s2 = Arc::clone(&s2);
        async move { s2.contains(42) }
    })
    .await;
}

#[tokio::test]
async fn push_pull_syncs_state_both_ways() {
    let p1 = spawn_peer(vec![]).await;
    let p2 = spawn_peer(vec![p1.self_member().address()]).await;

    let s1 = Arc::new(SetState::default());
    let s2 = Arc::new(SetState::default());
    s1.insert(1);
    s2.insert(2);
    p1.add_state("nfl", s1.clone());
    p2.add_state("nfl", s2.clone());

    // the periodic push/pull exchanges full snapshots in both directions
    eventually("states converge to the union", move || {
        let s1 = Arc::clone(&s1);
        let s2 = Arc::clone(&s2);
        async move { s1.len() == 2 && s2.len() == 2 }
    })
    .await;
}

#[tokio::test]
async fn unknown_state_keys_are_ignored() {
    let p1 = spawn_peer(vec![]).await;
    let p2 = spawn_peer(vec![p1.self_member().address()]).await;

    let s1 = Arc::new(SetState::default());
    let registered = Arc::new(SetState::default());
    let channel = p1.add_state("only-on-p1", s1.clone());
    p2.add_state("something-else", registered.clone());

    {
        let p1 = Arc::clone(&p1);
        eventually("peers converge", move || {
            let p1 = Arc::clone(&p1);
            async move { p1.cluster_size().await == 2 }
        })
        .await;
    }

    s1.insert(7);
    channel.broadcast(Bytes::from_static(&[7]));

    // give the broadcast time to arrive; the unmatched key must not leak
    // into the state p2 did register
    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    assert_eq!(registered.len(), 0);
}
