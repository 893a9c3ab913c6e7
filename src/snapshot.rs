//! Snapshot capture and installation: trim the log on capture, clear it
//! on install, but split the payload into independently-persisted
//! `SnapshotChunk`s rather than one opaque blob, plus a `keepFromIndex`
//! tail-retention heuristic so a lagging follower can still be caught up
//! by log replay instead of a full reinstall.

use crate::common::{LogIndex, RaftTypes};
use crate::error::RaftError;
use crate::log::{SnapshotChunk, SnapshotEntry};
use crate::node::NodeState;
use crate::state_machine::VecSnapshotSink;
use std::collections::HashSet;

/// Accumulates chunks of an in-progress `InstallSnapshot` on the
/// receiving side so a multi-chunk snapshot survives a crash
/// mid-transfer. Installs only once every chunk index `0..chunk_count`
/// has arrived.
pub struct SnapshotChunkCollector<T: RaftTypes> {
    pub index: LogIndex,
    pub term: crate::common::Term,
    pub chunk_count: u32,
    pub group_members: Vec<T::Endpoint>,
    received: HashSet<u32>,
    chunks: Vec<Option<SnapshotChunk<T>>>,
}

impl<T: RaftTypes> SnapshotChunkCollector<T> {
    pub fn new(index: LogIndex, term: crate::common::Term, chunk_count: u32, group_members: Vec<T::Endpoint>) -> Self {
        Self {
            index,
            term,
            chunk_count,
            group_members,
            received: HashSet::new(),
            chunks: (0..chunk_count).map(|_| None).collect(),
        }
    }

    pub fn accept(&mut self, chunk: SnapshotChunk<T>) {
        if chunk.index != self.index || chunk.chunk_index >= self.chunk_count {
            return;
        }
        self.received.insert(chunk.chunk_index);
        self.chunks[chunk.chunk_index as usize] = Some(chunk);
    }

    pub fn is_complete(&self) -> bool {
        self.received.len() as u32 == self.chunk_count
    }

    pub fn missing_chunk_indices(&self) -> Vec<u32> {
        (0..self.chunk_count).filter(|i| !self.received.contains(i)).collect()
    }

    pub fn into_entry(self) -> Option<SnapshotEntry<T>> {
        if !self.is_complete() {
            return None;
        }
        let chunks = self.chunks.into_iter().collect::<Option<Vec<_>>>()?;
        Some(SnapshotEntry {
            index: self.index,
            term: self.term,
            chunks,
            group_members_log_index: self.index,
            group_members: self.group_members,
        })
    }
}

/// Capture: asks the state machine for a snapshot at `commit_index`,
/// persists each chunk, and truncates the log behind it.
pub async fn capture<T: RaftTypes>(state: &mut NodeState<T>) -> Result<(), RaftError<T>> {
    let index = state.commit_index;
    let term = state
        .log
        .term_at(index)
        .ok_or_else(|| RaftError::internal("commit_index has no term; log and commit_index disagree"))?;

    let mut sink = VecSnapshotSink::new();
    state.state_machine.take_snapshot(index, &mut sink).await;

    let chunk_count = sink.chunks.len().max(1) as u32;
    let mut chunks = Vec::with_capacity(sink.chunks.len());
    for (i, operation) in sink.chunks.into_iter().enumerate() {
        let chunk = SnapshotChunk {
            index,
            term,
            chunk_index: i as u32,
            chunk_count,
            operation,
            group_members_log_index: state.membership.committed.log_index,
            group_members: state.membership.committed.members.clone(),
        };
        state
            .store
            .persist_snapshot_chunk(&chunk)
            .await
            .map_err(|e| RaftError::wrap("persisting snapshot chunk", e))?;
        chunks.push(chunk);
    }

    let entry = SnapshotEntry {
        index,
        term,
        chunks,
        group_members_log_index: state.membership.committed.log_index,
        group_members: state.membership.committed.members.clone(),
    };

    let keep_from_index = choose_keep_from_index(state, index);
    state.log.set_snapshot(entry, keep_from_index);
    Ok(())
}

/// Retains entries for any follower whose known `match_index` is within
/// `kept_after_snapshot` of the new snapshot index, using `match_index -
/// 1` as the cut point for the laggard closest to (but not below) that
/// window: never delete the smallest matchIndex still in range.
fn choose_keep_from_index<T: RaftTypes>(state: &NodeState<T>, snapshot_index: LogIndex) -> LogIndex {
    let window_start = snapshot_index.saturating_sub(state.config.kept_after_snapshot as u64);
    let Some(leader_state) = state.role.leader_state.as_ref() else {
        return snapshot_index;
    };
    leader_state
        .followers
        .values()
        .map(|f| f.match_index)
        .filter(|m| *m >= window_start && *m < snapshot_index)
        .min()
        .map(|m| m.saturating_sub(1))
        .unwrap_or(snapshot_index)
}

/// Install (follower side): verify `snapshot.index > commit_index`, jump
/// the log/commit/applied state forward, and resolve any pending futures
/// whose entries were superseded with `IndeterminateState`.
pub async fn install<T: RaftTypes>(state: &mut NodeState<T>, snapshot: SnapshotEntry<T>) -> Result<(), RaftError<T>> {
    if snapshot.index <= state.commit_index {
        return Ok(());
    }

    state.commit_index = snapshot.index;

    state
        .store
        .truncate(snapshot.index + 1)
        .await
        .map_err(|e| RaftError::wrap("truncating log for snapshot install", e))?;

    let operations: Vec<Vec<u8>> = snapshot.chunks.iter().map(|c| c.operation.clone()).collect();
    state.state_machine.install_snapshot(snapshot.index, &operations).await;

    crate::apply::invalidate_up_to(state, snapshot.index);

    state.membership.committed = crate::membership::MemberSet::new(snapshot.group_members_log_index, snapshot.group_members.clone());
    state.membership.effective = state.membership.committed.clone();

    state.log.set_snapshot(snapshot, state.log.snapshot_index());
    state.last_applied = state.commit_index;

    Ok(())
}
