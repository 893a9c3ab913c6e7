//! Commit index advancement: sort `match_index` values and take the
//! majority element, but only count it if `log[N].term == currentTerm`,
//! the safety rule that rules out committing an older-term entry by
//! indirect majority.

use crate::common::{LogIndex, RaftTypes, Term};
use crate::log::Log;
use crate::role::LeaderState;

/// Highest index held by a majority of `voting_members`. The leader
/// contributes `self_contribution` (`flushed_index` when persistence is
/// enabled, else `last_log_index`) only if it is itself a voting member
/// of the *committed* group; mid-removal leaders exclude their own slot.
pub fn quorum_match_index<T: RaftTypes>(
    leader_state: &LeaderState<T>,
    voting_members: &[T::Endpoint],
    self_id: &T::Endpoint,
    self_is_voting_member: bool,
    self_contribution: LogIndex,
) -> LogIndex {
    let mut indices: Vec<LogIndex> = Vec::with_capacity(voting_members.len());
    for member in voting_members {
        if member == self_id {
            if self_is_voting_member {
                indices.push(self_contribution);
            }
        } else {
            indices.push(leader_state.followers.get(member).map(|f| f.match_index).unwrap_or(0));
        }
    }
    if indices.is_empty() {
        return 0;
    }
    indices.sort_unstable_by(|a, b| b.cmp(a));
    let quorum_size = indices.len() / 2 + 1;
    indices[quorum_size.min(indices.len()) - 1]
}

/// A current-term entry may advance commit by counting; an older-term
/// entry is only committed indirectly once a later current-term entry
/// commits. Returns the new `commit_index` if it can advance, else
/// `None`.
pub fn try_advance<T: RaftTypes>(log: &Log<T>, current_term: Term, commit_index: LogIndex, quorum_index: LogIndex) -> Option<LogIndex> {
    if quorum_index <= commit_index {
        return None;
    }
    if log.term_at(quorum_index) == Some(current_term) {
        Some(quorum_index)
    } else {
        None
    }
}
