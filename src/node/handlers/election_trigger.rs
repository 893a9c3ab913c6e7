//! Election timeout and leadership-transfer-triggered elections, split
//! into a pre-vote `PreCandidate` phase before committing to a real,
//! term-incrementing election.

use crate::common::RaftTypes;
use crate::messages::{RaftMessage, TriggerLeaderElection, VoteRequest};
use crate::node::{handlers, NodeState};
use crate::role::Role;

/// Periodic timer event: if the node hasn't heard from a leader within
/// the election timeout and isn't already mid-election, start a
/// pre-vote round.
pub async fn on_election_tick<T: RaftTypes>(state: &mut NodeState<T>) {
    if state.status.is_terminal() {
        return;
    }
    if state.role.is_leader() {
        handlers::schedule_election_tick(state);
        return;
    }
    if state.role.last_leader_contact.elapsed() < state.config.leader_election_timeout {
        handlers::schedule_election_tick(state);
        return;
    }
    if !state.is_voting_member() {
        handlers::schedule_election_tick(state);
        return;
    }
    start_pre_vote(state, true).await;
}

/// A leadership-transfer target is told to skip the pre-vote/stickiness
/// courtesy and call a sticky-bypassing election immediately: the
/// transfer target may disregard the leader-stickiness check.
pub async fn handle_trigger<T: RaftTypes>(state: &mut NodeState<T>, trigger: TriggerLeaderElection<T>) {
    if trigger.term < state.role.current_term {
        return;
    }
    if trigger.last_log_term > state.log.last_log_or_snapshot_term()
        || (trigger.last_log_term == state.log.last_log_or_snapshot_term() && trigger.last_log_index > state.log.last_log_or_snapshot_index())
    {
        return;
    }
    crate::node::handlers::vote::start_real_election(state).await;
}

async fn start_pre_vote<T: RaftTypes>(state: &mut NodeState<T>, schedule_next_tick: bool) {
    state.role.become_pre_candidate();
    let req = VoteRequest {
        sender: state.self_id.clone(),
        term: state.role.current_term + 1,
        last_log_index: state.log.last_log_or_snapshot_index(),
        last_log_term: state.log.last_log_or_snapshot_term(),
        sticky: false,
    };
    for peer in state.peers() {
        state.runtime.send(peer, RaftMessage::PreVoteRequest(req.clone()));
    }
    if schedule_next_tick {
        handlers::schedule_election_tick(state);
    }
    // Single-voter group: no peers to wait on, win immediately.
    let voting = state.voting_members();
    if state.role.pre_vote_tally.has_majority(&voting, &state.self_id) && state.role.role == Role::PreCandidate {
        crate::node::handlers::vote::start_real_election(state).await;
    }
}
