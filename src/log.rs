//! Replicated log: a bounded ring of entries plus an embedded snapshot
//! slot representing everything at or before `snapshot_index`.
//!
//! `entries: VecDeque<LogEntry>` plus a `first_index` offset means
//! indices never need remapping on truncation. A capacity check guards
//! against unbounded growth, and the snapshot is a chunked
//! `SnapshotEntry` rather than a single blob.

use crate::common::{LogIndex, RaftTypes, Term};
use crate::error::RaftError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One operation slot in the log. `operation` is either a user value or a
/// privileged group operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "T::Endpoint: Serialize + for<'de2> Deserialize<'de2>, T::Operation: Serialize + for<'de2> Deserialize<'de2>")]
pub struct LogEntry<T: RaftTypes> {
    pub index: LogIndex,
    pub term: Term,
    pub operation: EntryPayload<T>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "T::Endpoint: Serialize + for<'de2> Deserialize<'de2>, T::Operation: Serialize + for<'de2> Deserialize<'de2>")]
pub enum EntryPayload<T: RaftTypes> {
    /// A blank entry appended on election win so the new leader can
    /// commit something in its own term before serving writes.
    Blank,
    Operation(T::Operation),
    UpdateMembers {
        endpoint: T::Endpoint,
        mode: crate::common::MembershipChangeMode,
        members: Vec<T::Endpoint>,
    },
    TerminateGroup,
}

/// A chunk of a snapshot payload, persisted and transmitted independently
/// so a multi-chunk snapshot survives a crash mid-transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "T::Endpoint: Serialize + for<'de2> Deserialize<'de2>")]
pub struct SnapshotChunk<T: RaftTypes> {
    pub index: LogIndex,
    pub term: Term,
    pub chunk_index: u32,
    pub chunk_count: u32,
    pub operation: Vec<u8>,
    pub group_members_log_index: LogIndex,
    pub group_members: Vec<T::Endpoint>,
}

/// A complete snapshot: replaces every entry at index <= `index`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "T::Endpoint: Serialize + for<'de2> Deserialize<'de2>")]
pub struct SnapshotEntry<T: RaftTypes> {
    pub index: LogIndex,
    pub term: Term,
    pub chunks: Vec<SnapshotChunk<T>>,
    pub group_members_log_index: LogIndex,
    pub group_members: Vec<T::Endpoint>,
}

/// Append-only semantic log with an embedded snapshot slot.
pub struct Log<T: RaftTypes> {
    entries: VecDeque<LogEntry<T>>,
    /// Index of the first entry in `entries`, i.e. `snapshot_index + 1`
    /// once a snapshot exists.
    first_index: LogIndex,
    snapshot: Option<SnapshotEntry<T>>,
    /// Highest index flushed to the store; gates what replication treats
    /// as safely durable.
    flushed_index: LogIndex,
    capacity: usize,
}

impl<T: RaftTypes> Log<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            first_index: 1,
            snapshot: None,
            flushed_index: 0,
            capacity,
        }
    }

    pub fn snapshot_index(&self) -> LogIndex {
        self.snapshot.as_ref().map(|s| s.index).unwrap_or(0)
    }

    pub fn snapshot_entry(&self) -> Option<&SnapshotEntry<T>> {
        self.snapshot.as_ref()
    }

    pub fn last_log_or_snapshot_index(&self) -> LogIndex {
        self.entries.back().map(|e| e.index).unwrap_or_else(|| self.snapshot_index())
    }

    pub fn last_log_or_snapshot_term(&self) -> Term {
        if let Some(e) = self.entries.back() {
            e.term
        } else {
            self.snapshot.as_ref().map(|s| s.term).unwrap_or(0)
        }
    }

    pub fn flushed_index(&self) -> LogIndex {
        self.flushed_index
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_entry(&self, index: LogIndex) -> bool {
        index > self.snapshot_index() && index <= self.last_log_or_snapshot_index()
    }

    /// `index` must fall in `(snapshot_index, last_log_or_snapshot_index]`.
    pub fn get_entry(&self, index: LogIndex) -> Option<&LogEntry<T>> {
        if index <= self.snapshot_index() {
            return None;
        }
        let offset = index.checked_sub(self.first_index)?;
        self.entries.get(offset as usize)
    }

    pub fn term_at(&self, index: LogIndex) -> Option<Term> {
        if index == 0 {
            return Some(0);
        }
        if index == self.snapshot_index() {
            return self.snapshot.as_ref().map(|s| s.term);
        }
        self.get_entry(index).map(|e| e.term)
    }

    /// The log occupies at most `commit_count_to_take_snapshot +
    /// max_uncommitted_log_entry_count + kept_after_snapshot` slots.
    pub fn append(&mut self, entry: LogEntry<T>) -> Result<(), RaftError<T>> {
        if self.entries.len() >= self.capacity {
            return Err(RaftError::CannotReplicate { leader_hint: None });
        }
        if self.entries.is_empty() && self.first_index != entry.index {
            self.first_index = entry.index;
        }
        self.entries.push_back(entry);
        Ok(())
    }

    /// Removes the suffix at index >= `from`. Only legal for uncommitted
    /// indices on a follower; callers enforce that.
    pub fn truncate_from(&mut self, from: LogIndex) {
        if from <= self.snapshot_index() {
            self.entries.clear();
            return;
        }
        let keep = (from.saturating_sub(self.first_index)) as usize;
        self.entries.truncate(keep);
    }

    /// Installs a snapshot and drops every entry at index <=
    /// `keep_from_index`. Entries above `keep_from_index` (but <=
    /// `snapshot.index`) would be redundant with the snapshot but are
    /// kept when `keep_from_index < snapshot.index`, retaining a tail of
    /// log entries for lagging followers.
    pub fn set_snapshot(&mut self, snapshot: SnapshotEntry<T>, keep_from_index: LogIndex) {
        let cutoff = keep_from_index.max(self.first_index.saturating_sub(1));
        while let Some(front) = self.entries.front() {
            if front.index <= cutoff {
                self.entries.pop_front();
            } else {
                break;
            }
        }
        self.first_index = cutoff + 1;
        self.snapshot = Some(snapshot);
    }

    /// Durability barrier: after this returns, every entry appended so far
    /// is considered stable for commit-index purposes (the leader's own
    /// contribution is `flushed_index` when persistence is enabled).
    pub fn mark_flushed(&mut self, up_to: LogIndex) {
        if up_to > self.flushed_index {
            self.flushed_index = up_to;
        }
    }

    pub fn entries_from(&self, from: LogIndex, to: LogIndex) -> Vec<LogEntry<T>> {
        let mut out = Vec::new();
        let mut idx = from;
        while idx <= to {
            if let Some(e) = self.get_entry(idx) {
                out.push(e.clone());
            }
            idx += 1;
        }
        out
    }
}
