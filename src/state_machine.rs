//! `StateMachine` contract: the user's deterministic application logic.
//! The core never interprets `T::Operation`; it only sequences calls
//! into this trait in committed log order.

use crate::common::{LogIndex, RaftTypes};
use async_trait::async_trait;

/// Receives snapshot chunks produced by `StateMachine::take_snapshot`.
/// Each call to `write_chunk` persists independently, so a crash
/// mid-capture leaves only whole chunks behind.
pub trait SnapshotSink: Send {
    fn write_chunk(&mut self, operation: Vec<u8>);
}

pub struct VecSnapshotSink {
    pub chunks: Vec<Vec<u8>>,
}

impl VecSnapshotSink {
    pub fn new() -> Self {
        Self { chunks: Vec::new() }
    }
}

impl Default for VecSnapshotSink {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotSink for VecSnapshotSink {
    fn write_chunk(&mut self, operation: Vec<u8>) {
        self.chunks.push(operation);
    }
}

#[async_trait]
pub trait StateMachine<T: RaftTypes>: Send + Sync + 'static {
    /// Deterministic apply of one committed operation.
    async fn apply(&self, index: LogIndex, operation: &T::Operation) -> T::Applied;

    /// Produces a sequence of chunks whose replay reconstructs state at
    /// `index`. Called by the snapshot procedure once
    /// `commit_index - snapshot_index >= commit_count_to_take_snapshot`.
    async fn take_snapshot(&self, index: LogIndex, sink: &mut dyn SnapshotSink);

    /// Atomically replaces state with the replay of `chunk_operations`.
    async fn install_snapshot(&self, index: LogIndex, chunk_operations: &[Vec<u8>]);

    /// Runs a local read against state as of `commit_index`. Invoked once
    /// a `LEADER_LOCAL` read-index round or an `ANY_LOCAL` local read has
    /// cleared its gate. The core never interprets `T::Query`, it only
    /// sequences this call at the right commit index.
    async fn query(&self, commit_index: LogIndex, query: &T::Query) -> T::QueryResult;

    /// Optional no-op operation appended when a candidate wins an
    /// election, so the new leader can commit something in its own term
    /// before serving writes.
    fn new_term_operation(&self) -> Option<T::Operation> {
        None
    }
}
