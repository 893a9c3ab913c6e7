//! Durability checks against a real in-memory `Store`, instead of the
//! no-op store the other suites use: a leader's own entries must reach
//! its store, and a granted vote must be durable before anything relies
//! on it.

mod harness;

use harness::{Get, InMemoryStore, NodeId, Op, TestCluster};
use raft_engine::{QueryPolicy, RaftConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

fn fast_config() -> RaftConfig {
    RaftConfig {
        leader_election_timeout: Duration::from_millis(60),
        leader_heartbeat_period: Duration::from_millis(15),
        leader_heartbeat_timeout: Duration::from_millis(200),
        leader_backoff_duration: Duration::from_millis(30),
        append_entries_request_batch_size: 8,
        max_uncommitted_log_entry_count: 64,
        commit_count_to_take_snapshot: 20,
        kept_after_snapshot: 5,
        snapshot_chunk_size: 1 << 16,
        raft_node_report_publish_period: Duration::from_millis(500),
        election_timeout_noise_max: Duration::from_millis(20),
        leadership_transfer_timeout: Duration::from_millis(500),
    }
}

async fn await_leader(cluster: &TestCluster, size: u64) -> u64 {
    for _ in 0..200 {
        for id in 0..size {
            if cluster.nodes[&id].status.borrow().role == raft_engine::Role::Leader {
                return id;
            }
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("no leader elected in time");
}

/// A leader's own locally-appended entry reaches its store and is
/// flushed there, not just applied to its in-memory log.
#[tokio::test]
async fn leader_persists_its_own_entries() {
    let stores: std::sync::Mutex<std::collections::HashMap<u64, Arc<InMemoryStore>>> = std::sync::Mutex::new(std::collections::HashMap::new());
    let cluster = TestCluster::start_with_stores(3, fast_config(), |id| {
        let store = InMemoryStore::new();
        stores.lock().unwrap().insert(id, store.clone());
        store
    })
    .await;
    let leader = await_leader(&cluster, 3).await;

    let index = cluster.handle(leader).replicate(Op::Set("x".into(), 9)).await.expect("replicate").commit_index;
    sleep(Duration::from_millis(100)).await;

    let leader_store = stores.lock().unwrap().get(&leader).unwrap().clone();
    assert!(leader_store.has_entry(index), "leader should have persisted its own entry at index {index}");
    assert!(leader_store.flushed_indices().contains(&index), "leader should have flushed its own entry at index {index}");
}

/// A vote a follower grants is durably recorded in its store before the
/// grant is sent, independent of the in-memory role state.
#[tokio::test]
async fn granted_vote_is_persisted() {
    let stores: std::sync::Mutex<std::collections::HashMap<u64, Arc<InMemoryStore>>> = std::sync::Mutex::new(std::collections::HashMap::new());
    let cluster = TestCluster::start_with_stores(3, fast_config(), |id| {
        let store = InMemoryStore::new();
        stores.lock().unwrap().insert(id, store.clone());
        store
    })
    .await;
    let leader = await_leader(&cluster, 3).await;

    for id in 0..3 {
        let store = stores.lock().unwrap().get(&id).unwrap().clone();
        let (term, voted_for) = store.term_and_vote();
        assert!(term >= 1, "node {id} should have persisted a term of at least 1 once an election ran");
        if id == leader {
            assert_eq!(voted_for, Some(NodeId(leader)), "leader should have durably voted for itself");
        } else {
            assert!(voted_for.is_some(), "follower {id} should have durably recorded its vote");
        }
    }

    let _ = cluster.handle(leader).query(QueryPolicy::AnyLocal, Get("x".into()), 0).await;
}
