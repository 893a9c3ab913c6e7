//! `AppendEntries` request/response handling, generalized with a
//! `query_round` piggyback so read-index rounds ride the regular
//! heartbeat stream instead of needing their own message kind.

use crate::common::RaftTypes;
use crate::messages::{AppendEntriesFailure, AppendEntriesRequest, AppendEntriesSuccess};
use crate::node::{handlers, NodeState};
use crate::query;
use tracing::debug;

pub async fn handle_request<T: RaftTypes>(state: &mut NodeState<T>, req: AppendEntriesRequest<T>) {
    if req.term < state.role.current_term {
        state.runtime.send(
            req.sender.clone(),
            crate::messages::RaftMessage::AppendEntriesFailure(AppendEntriesFailure {
                sender: state.self_id.clone(),
                term: state.role.current_term,
                expected_next_index: state.log.last_log_or_snapshot_index() + 1,
            }),
        );
        return;
    }

    if req.term > state.role.current_term {
        let had_pending_transfer = state.pending_transfer.is_some();
        state.become_follower(req.term).await;
        if had_pending_transfer {
            crate::transfer::cancel(state, Ok(()));
        }
    } else if !state.role.is_leader() {
        state.role.role = crate::role::Role::Follower;
    }
    state.role.leader_id = Some(req.sender.clone());
    state.role.last_leader_contact = std::time::Instant::now();

    let prev_ok = if req.prev_log_index == 0 {
        true
    } else {
        state.log.term_at(req.prev_log_index) == Some(req.prev_log_term)
    };

    if !prev_ok {
        state.runtime.send(
            req.sender.clone(),
            crate::messages::RaftMessage::AppendEntriesFailure(AppendEntriesFailure {
                sender: state.self_id.clone(),
                term: state.role.current_term,
                expected_next_index: state.log.last_log_or_snapshot_index().min(req.prev_log_index).max(state.log.snapshot_index()) + 1,
            }),
        );
        return;
    }

    for entry in req.entries {
        if let Some(existing) = state.log.get_entry(entry.index) {
            if existing.term != entry.term {
                state.log.truncate_from(entry.index);
                if let Err(err) = state.log.append(entry) {
                    debug!(%err, "failed to append conflicting entry");
                    break;
                }
            }
        } else if state.log.get_entry(entry.index).is_none() && entry.index == state.log.last_log_or_snapshot_index() + 1 {
            if let Err(err) = state.log.append(entry) {
                debug!(%err, "failed to append entry");
                break;
            }
        }
    }

    let persist_from = req.prev_log_index + 1;
    let persist_to = state.log.last_log_or_snapshot_index();
    if !state.persist_entries_and_flush(persist_from, persist_to).await {
        return;
    }

    if req.leader_commit > state.commit_index {
        state.commit_index = req.leader_commit.min(state.log.last_log_or_snapshot_index());
        state.advance_commit_and_apply().await;
    }

    state.runtime.send(
        req.sender,
        crate::messages::RaftMessage::AppendEntriesSuccess(AppendEntriesSuccess {
            sender: state.self_id.clone(),
            term: state.role.current_term,
            last_log_index: state.log.last_log_or_snapshot_index(),
            query_round: req.query_round,
        }),
    );

    handlers::schedule_election_tick(state);
}

pub async fn handle_success<T: RaftTypes>(state: &mut NodeState<T>, resp: AppendEntriesSuccess<T>) {
    if resp.term > state.role.current_term {
        state.become_follower(resp.term).await;
        return;
    }
    if !state.role.is_leader() || resp.term != state.role.current_term {
        return;
    }
    let Some(leader_state) = state.role.leader_state.as_mut() else { return };
    if let Some(follower) = leader_state.followers.get_mut(&resp.sender) {
        follower.match_index = follower.match_index.max(resp.last_log_index);
        follower.next_index = resp.last_log_index + 1;
        follower.clear_backoff();
    }
    query::record_ack(leader_state, &resp.sender, resp.query_round);
    state.advance_commit_and_apply().await;
    crate::replication::maybe_replicate_to(state, &resp.sender);
}

pub async fn handle_failure<T: RaftTypes>(state: &mut NodeState<T>, resp: AppendEntriesFailure<T>) {
    if resp.term > state.role.current_term {
        state.become_follower(resp.term).await;
        return;
    }
    if !state.role.is_leader() {
        return;
    }
    if let Some(leader_state) = state.role.leader_state.as_mut() {
        if let Some(follower) = leader_state.followers.get_mut(&resp.sender) {
            follower.next_index = resp.expected_next_index.max(1);
            follower.in_flight = false;
        }
    }
    crate::replication::maybe_replicate_to(state, &resp.sender);
}
