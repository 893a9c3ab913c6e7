//! Wire message shapes, generalized over `T::Endpoint` and extended with
//! `query_round` piggybacks, a `sticky` election flag, pre-vote variants,
//! and chunked snapshots.

use crate::common::{LogIndex, QueryRound, RaftTypes, Term};
use crate::log::{LogEntry, SnapshotChunk};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "T::Endpoint: Serialize + for<'de2> Deserialize<'de2>, T::Operation: Serialize + for<'de2> Deserialize<'de2>")]
pub struct AppendEntriesRequest<T: RaftTypes> {
    pub group_id: u64,
    pub sender: T::Endpoint,
    pub term: Term,
    pub prev_log_index: LogIndex,
    pub prev_log_term: Term,
    pub entries: Vec<LogEntry<T>>,
    pub leader_commit: LogIndex,
    pub query_round: QueryRound,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "T::Endpoint: Serialize + for<'de2> Deserialize<'de2>")]
pub struct AppendEntriesSuccess<T: RaftTypes> {
    pub sender: T::Endpoint,
    pub term: Term,
    pub last_log_index: LogIndex,
    pub query_round: QueryRound,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "T::Endpoint: Serialize + for<'de2> Deserialize<'de2>")]
pub struct AppendEntriesFailure<T: RaftTypes> {
    pub sender: T::Endpoint,
    pub term: Term,
    /// Fast backtracking hint: the follower's current last log index.
    pub expected_next_index: LogIndex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "T::Endpoint: Serialize + for<'de2> Deserialize<'de2>")]
pub struct InstallSnapshotRequest<T: RaftTypes> {
    pub sender: T::Endpoint,
    pub term: Term,
    pub snapshot_index: LogIndex,
    pub snapshot_term: Term,
    pub chunks: Vec<SnapshotChunk<T>>,
    pub total_chunk_count: u32,
    pub group_members: Vec<T::Endpoint>,
    pub query_round: QueryRound,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "T::Endpoint: Serialize + for<'de2> Deserialize<'de2>")]
pub struct InstallSnapshotResponse<T: RaftTypes> {
    pub sender: T::Endpoint,
    pub term: Term,
    pub requested_chunk_indices: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "T::Endpoint: Serialize + for<'de2> Deserialize<'de2>")]
pub struct VoteRequest<T: RaftTypes> {
    pub sender: T::Endpoint,
    pub term: Term,
    pub last_log_index: LogIndex,
    pub last_log_term: Term,
    /// `false` for a transfer-triggered election, which bypasses the
    /// stickiness rule that protects a healthy leader.
    pub sticky: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "T::Endpoint: Serialize + for<'de2> Deserialize<'de2>")]
pub struct VoteResponse<T: RaftTypes> {
    pub sender: T::Endpoint,
    pub term: Term,
    pub vote_granted: bool,
}

/// Pre-vote analogs: identical shape, never mutate durable term/vote.
pub type PreVoteRequest<T> = VoteRequest<T>;
pub type PreVoteResponse<T> = VoteResponse<T>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "T::Endpoint: Serialize + for<'de2> Deserialize<'de2>")]
pub struct TriggerLeaderElection<T: RaftTypes> {
    pub sender: T::Endpoint,
    pub term: Term,
    pub last_log_term: Term,
    pub last_log_index: LogIndex,
}

/// Tagged sum of every inbound message kind: an exhaustive match in
/// place of dynamic dispatch over message kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "T::Endpoint: Serialize + for<'de2> Deserialize<'de2>, T::Operation: Serialize + for<'de2> Deserialize<'de2>")]
pub enum RaftMessage<T: RaftTypes> {
    AppendEntriesRequest(AppendEntriesRequest<T>),
    AppendEntriesSuccess(AppendEntriesSuccess<T>),
    AppendEntriesFailure(AppendEntriesFailure<T>),
    InstallSnapshotRequest(InstallSnapshotRequest<T>),
    InstallSnapshotResponse(InstallSnapshotResponse<T>),
    VoteRequest(VoteRequest<T>),
    VoteResponse(VoteResponse<T>),
    PreVoteRequest(VoteRequest<T>),
    PreVoteResponse(VoteResponse<T>),
    TriggerLeaderElection(TriggerLeaderElection<T>),
}
