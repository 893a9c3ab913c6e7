//! `Vote`/`PreVote` request and response handling, split into a pre-vote
//! phase that never mutates `current_term`/`voted_for`. The stickiness
//! rule means a healthy leader's followers refuse non-sticky votes.

use crate::common::RaftTypes;
use crate::messages::{RaftMessage, VoteRequest, VoteResponse};
use crate::node::{handlers, NodeState};
use crate::role::Role;

fn log_is_at_least_as_up_to_date<T: RaftTypes>(state: &NodeState<T>, last_log_term: crate::common::Term, last_log_index: crate::common::LogIndex) -> bool {
    let our_term = state.log.last_log_or_snapshot_term();
    let our_index = state.log.last_log_or_snapshot_index();
    last_log_term > our_term || (last_log_term == our_term && last_log_index >= our_index)
}

pub async fn handle_request<T: RaftTypes>(state: &mut NodeState<T>, req: VoteRequest<T>, is_pre_vote: bool) {
    if is_pre_vote {
        handle_pre_vote_request(state, req);
        return;
    }

    if req.term < state.role.current_term {
        send_vote_response(state, &req.sender, state.role.current_term, false, false);
        return;
    }

    if req.term > state.role.current_term {
        state.become_follower(req.term).await;
    }

    if !req.sticky && state.role.leader_id.is_some() && state.role.last_leader_contact.elapsed() < state.config.leader_election_timeout {
        send_vote_response(state, &req.sender, state.role.current_term, false, false);
        return;
    }

    let can_vote = state.role.voted_for.is_none() || state.role.voted_for.as_ref() == Some(&req.sender);
    let up_to_date = log_is_at_least_as_up_to_date(state, req.last_log_term, req.last_log_index);
    let grant = can_vote && up_to_date;
    if grant {
        state.role.voted_for = Some(req.sender.clone());
        state.role.last_leader_contact = std::time::Instant::now();
        state.persist_vote().await;
    }
    send_vote_response(state, &req.sender, state.role.current_term, grant, false);
}

fn handle_pre_vote_request<T: RaftTypes>(state: &mut NodeState<T>, req: VoteRequest<T>) {
    let term_ok = req.term >= state.role.current_term;
    let up_to_date = log_is_at_least_as_up_to_date(state, req.last_log_term, req.last_log_index);
    let leader_healthy = state.role.leader_id.is_some() && state.role.last_leader_contact.elapsed() < state.config.leader_election_timeout;
    let grant = term_ok && up_to_date && !leader_healthy;
    send_vote_response(state, &req.sender, req.term.max(state.role.current_term), grant, true);
}

fn send_vote_response<T: RaftTypes>(state: &NodeState<T>, to: &T::Endpoint, term: crate::common::Term, vote_granted: bool, is_pre_vote: bool) {
    let response = VoteResponse {
        sender: state.self_id.clone(),
        term,
        vote_granted,
    };
    let message = if is_pre_vote {
        RaftMessage::PreVoteResponse(response)
    } else {
        RaftMessage::VoteResponse(response)
    };
    state.runtime.send(to.clone(), message);
}

pub async fn handle_response<T: RaftTypes>(state: &mut NodeState<T>, resp: VoteResponse<T>, is_pre_vote: bool) {
    if resp.term > state.role.current_term {
        state.become_follower(resp.term).await;
        return;
    }

    if is_pre_vote {
        if state.role.role != Role::PreCandidate || resp.term != state.role.current_term {
            return;
        }
        if !resp.vote_granted {
            return;
        }
        state.role.pre_vote_tally.record(resp.sender);
        let voting = state.voting_members();
        if state.role.pre_vote_tally.has_majority(&voting, &state.self_id) {
            start_real_election(state).await;
        }
        return;
    }

    if state.role.role != Role::Candidate || resp.term != state.role.current_term {
        return;
    }
    if !resp.vote_granted {
        return;
    }
    state.role.vote_tally.record(resp.sender);
    let voting = state.voting_members();
    if state.role.vote_tally.has_majority(&voting, &state.self_id) {
        become_leader(state).await;
    }
}

/// Moves from `PreCandidate` (having won pre-votes) into a real,
/// term-incrementing `Candidate` election.
pub async fn start_real_election<T: RaftTypes>(state: &mut NodeState<T>) {
    state.become_candidate().await;
    let req = VoteRequest {
        sender: state.self_id.clone(),
        term: state.role.current_term,
        last_log_index: state.log.last_log_or_snapshot_index(),
        last_log_term: state.log.last_log_or_snapshot_term(),
        sticky: true,
    };
    for peer in state.peers() {
        state.runtime.send(peer, RaftMessage::VoteRequest(req.clone()));
    }
    handlers::schedule_election_tick(state);
}

async fn become_leader<T: RaftTypes>(state: &mut NodeState<T>) {
    let next_index = state.log.last_log_or_snapshot_index() + 1;
    let peers = state.peers();
    state.role.become_leader(state.self_id.clone(), peers, next_index);
    if let Some(operation) = state.state_machine.new_term_operation() {
        let _ = state.append_local(crate::log::EntryPayload::Operation(operation)).await;
    } else {
        let _ = state.append_local(crate::log::EntryPayload::Blank).await;
    }
    crate::replication::replicate_to_all(state);
    handlers::schedule_heartbeat(state);
}
