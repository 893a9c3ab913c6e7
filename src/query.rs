//! Linearizable local reads: `LEADER_LOCAL` read-index rounds and
//! `ANY_LOCAL` stale-allowed local reads, both gated by `minCommitIndex`.
//!
//! The round-acknowledgment majority computation below mirrors the sort-
//! and-take-the-median shape used for commit-index advancement: a
//! read-index round is "prove a majority still sees me as leader" the
//! same way a commit is "prove a majority has the entry".

use crate::common::{LogIndex, QueryRound, RaftTypes};
use crate::config::RaftConfig;
use crate::error::RaftError;
use crate::role::LeaderState;
use std::collections::VecDeque;
use tokio::sync::oneshot;

pub struct PendingQuery<T: RaftTypes> {
    pub query: T::Query,
    /// `commitIndex` gate: the query may only run once `commit_index >=`
    /// this value (it was `commit_index` at enqueue time).
    pub query_commit_index: LogIndex,
    /// Read-index round this query was attached to; it may run once a
    /// majority has acknowledged a round >= this one.
    pub round: QueryRound,
    pub respond_to: oneshot::Sender<Result<crate::common::Ordered<T::QueryResult>, RaftError<T>>>,
}

pub struct QueryState<T: RaftTypes> {
    pub pending: VecDeque<PendingQuery<T>>,
}

impl<T: RaftTypes> Default for QueryState<T> {
    fn default() -> Self {
        Self { pending: VecDeque::new() }
    }
}

/// A fresh leader whose log is entirely empty (`commit_index == 0`) has
/// no prior-term entry whose staleness it could be hiding, so the
/// current-term-commit requirement is vacuously satisfied. Once anything
/// has ever committed, a current-term commit is required before
/// `LEADER_LOCAL` reads are trusted.
pub fn can_query_linearizable(commit_index: LogIndex, has_current_term_commit: bool) -> bool {
    commit_index == 0 || has_current_term_commit
}

/// Enqueues a `LEADER_LOCAL` query. Caller has already checked role ==
/// Leader and the `min_commit_index` gate.
pub fn enqueue<T: RaftTypes>(
    leader_state: &mut LeaderState<T>,
    config: &RaftConfig,
    commit_index: LogIndex,
    has_current_term_commit: bool,
    query: T::Query,
) -> Result<oneshot::Receiver<Result<crate::common::Ordered<T::QueryResult>, RaftError<T>>>, RaftError<T>> {
    if !can_query_linearizable(commit_index, has_current_term_commit) {
        return Err(RaftError::CannotReplicate { leader_hint: None });
    }
    if leader_state.query_state.pending.len() >= config.max_uncommitted_log_entry_count {
        return Err(RaftError::CannotReplicate { leader_hint: None });
    }
    let (tx, rx) = oneshot::channel();
    leader_state.query_round += 1;
    leader_state.query_state.pending.push_back(PendingQuery {
        query,
        query_commit_index: commit_index,
        round: leader_state.query_round,
        respond_to: tx,
    });
    Ok(rx)
}

/// Records that `follower` has acknowledged AppendEntries carrying
/// `round`. ACKs only move the watermark forward.
pub fn record_ack<T: RaftTypes>(leader_state: &mut LeaderState<T>, follower: &T::Endpoint, round: QueryRound) {
    if let Some(f) = leader_state.followers.get_mut(follower) {
        if round > f.acked_query_round {
            f.acked_query_round = round;
        }
    }
}

/// Highest round acknowledged by a majority of `members`, counting the
/// leader's own current round as self-acknowledged.
pub fn majority_acked_round<T: RaftTypes>(leader_state: &LeaderState<T>, members: &[T::Endpoint], self_id: &T::Endpoint) -> QueryRound {
    if members.is_empty() {
        return leader_state.query_round;
    }
    let mut rounds: Vec<QueryRound> = members
        .iter()
        .map(|m| {
            if m == self_id {
                leader_state.query_round
            } else {
                leader_state.followers.get(m).map(|f| f.acked_query_round).unwrap_or(0)
            }
        })
        .collect();
    rounds.sort_unstable();
    let quorum_size = rounds.len() / 2 + 1;
    rounds[rounds.len() - quorum_size]
}

/// Drains every pending query whose round has majority acknowledgment and
/// whose `query_commit_index` gate is satisfied by `commit_index`. Caller
/// runs each returned query against the state machine and resolves it.
pub fn ready_queries<T: RaftTypes>(leader_state: &mut LeaderState<T>, acked_round: QueryRound, commit_index: LogIndex) -> Vec<PendingQuery<T>> {
    let mut ready = Vec::new();
    while let Some(front) = leader_state.query_state.pending.front() {
        if front.round <= acked_round && front.query_commit_index <= commit_index {
            ready.push(leader_state.query_state.pending.pop_front().unwrap());
        } else {
            break;
        }
    }
    ready
}

/// Fails every pending `LEADER_LOCAL` query with `NotLeader`, used on demotion.
pub fn fail_all_pending<T: RaftTypes>(leader_state: &mut LeaderState<T>, leader_hint: Option<T::Endpoint>) {
    while let Some(pending) = leader_state.query_state.pending.pop_front() {
        let _ = pending.respond_to.send(Err(RaftError::NotLeader { leader_hint: leader_hint.clone() }));
    }
}

/// `ANY_LOCAL` gate: just the `minCommitIndex` check against the local
/// `commit_index`. `min_commit_index == 0` disables the check.
pub fn check_min_commit_index<T: RaftTypes>(commit_index: LogIndex, min_commit_index: LogIndex, leader: Option<T::Endpoint>) -> Result<(), RaftError<T>> {
    if min_commit_index != 0 && commit_index < min_commit_index {
        return Err(RaftError::LaggingCommitIndex {
            current: commit_index,
            expected: min_commit_index,
            leader,
        });
    }
    Ok(())
}
