//! `Store` contract: durable state, flushed on demand. A `Nop`
//! implementation is provided here, pairing the real trait with a
//! no-op default for tests and benchmarks.

use crate::common::{LogIndex, RaftTypes, Term};
use crate::log::{LogEntry, SnapshotChunk};
use async_trait::async_trait;

/// What `restore()` hands back on startup: durable term/vote plus
/// whatever entries and snapshot chunks survived. The node rebuilds
/// `Log`/`RoleState` from this; no pending futures are restored,
/// callers retry instead.
pub struct RestoredState<T: RaftTypes> {
    pub current_term: Term,
    pub voted_for: Option<T::Endpoint>,
    pub entries: Vec<LogEntry<T>>,
    pub snapshot_chunks: Vec<SnapshotChunk<T>>,
}

#[async_trait]
pub trait Store<T: RaftTypes>: Send + Sync + 'static {
    async fn persist_term(&self, term: Term, voted_for: Option<T::Endpoint>) -> std::io::Result<()>;
    async fn persist_entries(&self, entries: &[LogEntry<T>]) -> std::io::Result<()>;
    async fn persist_snapshot_chunk(&self, chunk: &SnapshotChunk<T>) -> std::io::Result<()>;
    async fn truncate(&self, from_index: LogIndex) -> std::io::Result<()>;
    async fn flush(&self) -> std::io::Result<()>;
    async fn restore(&self) -> std::io::Result<RestoredState<T>>;
}

/// No-op store: accepts every write, restores empty state. Useful for
/// tests and for embedders who persist through some other channel (e.g.
/// replaying the log externally).
pub struct NopStore;

#[async_trait]
impl<T: RaftTypes> Store<T> for NopStore {
    async fn persist_term(&self, _term: Term, _voted_for: Option<T::Endpoint>) -> std::io::Result<()> {
        Ok(())
    }

    async fn persist_entries(&self, _entries: &[LogEntry<T>]) -> std::io::Result<()> {
        Ok(())
    }

    async fn persist_snapshot_chunk(&self, _chunk: &SnapshotChunk<T>) -> std::io::Result<()> {
        Ok(())
    }

    async fn truncate(&self, _from_index: LogIndex) -> std::io::Result<()> {
        Ok(())
    }

    async fn flush(&self) -> std::io::Result<()> {
        Ok(())
    }

    async fn restore(&self) -> std::io::Result<RestoredState<T>> {
        Ok(RestoredState {
            current_term: 0,
            voted_for: None,
            entries: Vec::new(),
            snapshot_chunks: Vec::new(),
        })
    }
}
