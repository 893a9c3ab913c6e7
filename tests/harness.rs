//! In-memory test harness: a `Runtime`/`StateMachine`/`Store` triple that
//! runs an entire small cluster inside one process, driven by its own
//! tokio runtime, wired against actual `Raft<T>` nodes instead of
//! asserting on hand-built fixtures.

use async_trait::async_trait;
use raft_engine::{
    LogEntry, MembershipChangeMode, NodeHandle, Ordered, QueryPolicy, RaftConfig, RaftError, RaftMessage, RaftReport, RaftTypes, Raft, RestoredState, Runtime, SnapshotChunk, SnapshotSink,
    StateMachine, Store,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeId(pub u64);

#[derive(Debug, Clone)]
pub enum Op {
    Set(String, i64),
    Add(String, i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied(pub Option<i64>);

#[derive(Debug, Clone)]
pub struct Get(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetResult(pub Option<i64>);

pub struct KvTypes;
impl RaftTypes for KvTypes {
    type Endpoint = NodeId;
    type Operation = Op;
    type Applied = Applied;
    type Query = Get;
    type QueryResult = GetResult;
}

/// A single process-wide switchboard: every node's `TestRuntime` sends
/// into the target node's mailbox by looking it up here. Network
/// partitions are modeled with a block-list.
pub struct Network {
    handles: Mutex<HashMap<u64, NodeHandle<KvTypes>>>,
    blocked: Mutex<std::collections::HashSet<(u64, u64)>>,
}

impl Network {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            handles: Mutex::new(HashMap::new()),
            blocked: Mutex::new(std::collections::HashSet::new()),
        })
    }

    pub fn register(&self, id: u64, handle: NodeHandle<KvTypes>) {
        self.handles.lock().unwrap().insert(id, handle);
    }

    pub fn partition(&self, a: u64, b: u64) {
        self.blocked.lock().unwrap().insert((a, b));
        self.blocked.lock().unwrap().insert((b, a));
    }

    pub fn heal(&self, a: u64, b: u64) {
        self.blocked.lock().unwrap().remove(&(a, b));
        self.blocked.lock().unwrap().remove(&(b, a));
    }
}

pub struct TestRuntime {
    self_id: u64,
    network: Arc<Network>,
    pub reports: Mutex<Vec<RaftReport<KvTypes>>>,
    pub terminated: Mutex<bool>,
}

#[async_trait]
impl Runtime<KvTypes> for TestRuntime {
    fn send(&self, to: NodeId, message: RaftMessage<KvTypes>) {
        if self.network.blocked.lock().unwrap().contains(&(self.self_id, to.0)) {
            return;
        }
        let handles = self.network.handles.lock().unwrap();
        if let Some(handle) = handles.get(&to.0) {
            handle.deliver(message);
        }
    }

    async fn on_report(&self, report: RaftReport<KvTypes>) {
        self.reports.lock().unwrap().push(report);
    }

    async fn on_group_terminated(&self) {
        *self.terminated.lock().unwrap() = true;
    }
}

#[derive(Default)]
pub struct KvStateMachine {
    state: Mutex<HashMap<String, i64>>,
}

#[async_trait]
impl StateMachine<KvTypes> for KvStateMachine {
    async fn apply(&self, _index: u64, operation: &Op) -> Applied {
        let mut state = self.state.lock().unwrap();
        match operation {
            Op::Set(key, value) => {
                state.insert(key.clone(), *value);
                Applied(Some(*value))
            }
            Op::Add(key, delta) => {
                let entry = state.entry(key.clone()).or_insert(0);
                *entry += delta;
                Applied(Some(*entry))
            }
        }
    }

    async fn take_snapshot(&self, _index: u64, sink: &mut dyn SnapshotSink) {
        let state = self.state.lock().unwrap();
        for (key, value) in state.iter() {
            let bytes = bincode::serde::encode_to_vec((key.clone(), *value), bincode::config::standard()).unwrap();
            sink.write_chunk(bytes);
        }
    }

    async fn install_snapshot(&self, _index: u64, chunk_operations: &[Vec<u8>]) {
        let mut state = self.state.lock().unwrap();
        state.clear();
        for chunk in chunk_operations {
            if let Ok(((key, value), _)) = bincode::serde::decode_from_slice::<(String, i64), _>(chunk, bincode::config::standard()) {
                state.insert(key, value);
            }
        }
    }

    async fn query(&self, _commit_index: u64, query: &Get) -> GetResult {
        GetResult(self.state.lock().unwrap().get(&query.0).copied())
    }
}

/// A real `Store` backed by process memory instead of disk: the same
/// durability bookkeeping (term/vote, entries, snapshot chunks) a disk
/// implementation would do, minus the disk, so tests can assert that a
/// node's writes actually reached its store instead of only trusting
/// `NopStore` to have silently discarded them.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<InMemoryStoreState>,
}

#[derive(Default)]
struct InMemoryStoreState {
    current_term: u64,
    voted_for: Option<NodeId>,
    entries: HashMap<u64, LogEntry<KvTypes>>,
    snapshot_chunks: Vec<SnapshotChunk<KvTypes>>,
    flushed_indices: Vec<u64>,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The durable term/vote pair, as last written by `persist_term`.
    pub fn term_and_vote(&self) -> (u64, Option<NodeId>) {
        let state = self.inner.lock().unwrap();
        (state.current_term, state.voted_for.clone())
    }

    /// Indices of entries that have survived a `flush()` call, in the
    /// order they were flushed.
    pub fn flushed_indices(&self) -> Vec<u64> {
        self.inner.lock().unwrap().flushed_indices.clone()
    }

    /// Whether `persist_entries` has ever recorded this index, flushed
    /// or not.
    pub fn has_entry(&self, index: u64) -> bool {
        self.inner.lock().unwrap().entries.contains_key(&index)
    }
}

#[async_trait]
impl Store<KvTypes> for InMemoryStore {
    async fn persist_term(&self, term: u64, voted_for: Option<NodeId>) -> std::io::Result<()> {
        let mut state = self.inner.lock().unwrap();
        state.current_term = term;
        state.voted_for = voted_for;
        Ok(())
    }

    async fn persist_entries(&self, entries: &[LogEntry<KvTypes>]) -> std::io::Result<()> {
        let mut state = self.inner.lock().unwrap();
        for entry in entries {
            state.entries.insert(entry.index, entry.clone());
        }
        Ok(())
    }

    async fn persist_snapshot_chunk(&self, chunk: &SnapshotChunk<KvTypes>) -> std::io::Result<()> {
        self.inner.lock().unwrap().snapshot_chunks.push(chunk.clone());
        Ok(())
    }

    async fn truncate(&self, from_index: u64) -> std::io::Result<()> {
        self.inner.lock().unwrap().entries.retain(|index, _| *index < from_index);
        Ok(())
    }

    async fn flush(&self) -> std::io::Result<()> {
        let mut state = self.inner.lock().unwrap();
        let mut indices: Vec<u64> = state.entries.keys().copied().collect();
        indices.sort_unstable();
        state.flushed_indices = indices;
        Ok(())
    }

    async fn restore(&self) -> std::io::Result<RestoredState<KvTypes>> {
        let state = self.inner.lock().unwrap();
        let mut entries: Vec<LogEntry<KvTypes>> = state.entries.values().cloned().collect();
        entries.sort_unstable_by_key(|e| e.index);
        Ok(RestoredState {
            current_term: state.current_term,
            voted_for: state.voted_for.clone(),
            entries,
            snapshot_chunks: state.snapshot_chunks.clone(),
        })
    }
}

/// Builds a `TestRuntime` for `self_id` registered on `network`. Exposed
/// so tests that need to construct a node outside `TestCluster` (e.g.
/// to restart one with the same store) can still get a runtime without
/// reaching into private fields.
pub fn test_runtime(self_id: u64, network: Arc<Network>) -> Arc<TestRuntime> {
    Arc::new(TestRuntime {
        self_id,
        network,
        reports: Mutex::new(Vec::new()),
        terminated: Mutex::new(false),
    })
}

pub struct TestCluster {
    pub network: Arc<Network>,
    pub nodes: HashMap<u64, Raft<KvTypes>>,
    pub state_machines: HashMap<u64, Arc<KvStateMachine>>,
}

impl TestCluster {
    pub async fn start(size: u64, config: RaftConfig) -> Self {
        Self::start_with_stores(size, config, |_id| Arc::new(raft_engine::NopStore)).await
    }

    /// Like `start`, but lets the caller supply a `Store` per node id —
    /// used by tests that need to observe what actually got persisted
    /// instead of trusting a no-op store to have discarded it correctly.
    pub async fn start_with_stores<S>(size: u64, config: RaftConfig, mut store_factory: impl FnMut(u64) -> Arc<S>) -> Self
    where
        S: Store<KvTypes>,
    {
        let network = Network::new();
        let members: Vec<NodeId> = (0..size).map(NodeId).collect();
        let mut nodes = HashMap::new();
        let mut state_machines = HashMap::new();

        for id in 0..size {
            let runtime = test_runtime(id, network.clone());
            let state_machine = Arc::new(KvStateMachine::default());
            let store = store_factory(id);

            let raft = Raft::start(NodeId(id), 1, members.clone(), config.clone(), state_machine.clone(), store, runtime)
                .await
                .expect("node start");
            network.register(id, raft.handle.clone());

            nodes.insert(id, raft);
            state_machines.insert(id, state_machine);
        }

        Self { network, nodes, state_machines }
    }

    pub fn handle(&self, id: u64) -> NodeHandle<KvTypes> {
        self.nodes[&id].handle.clone()
    }
}
