//! Dispatch table for everything the node's mailbox can receive: free
//! functions over `&mut NodeState`, no back-pointers, no dynamic dispatch
//! over message kinds, just an exhaustive match on a tagged sum type.

pub mod append_entries;
pub mod election_trigger;
pub mod install_snapshot;
pub mod vote;

use crate::common::{MembershipChangeMode, Ordered, QueryPolicy, RaftTypes};
use crate::error::{RaftError, RaftResult};
use crate::log::EntryPayload;
use crate::messages::RaftMessage;
use crate::node::{NodeEvent, NodeState, PendingReplicate};
use crate::query;
use crate::runtime::RaftReport;
use std::time::Duration;
use tokio::sync::oneshot;

pub async fn dispatch<T: RaftTypes>(state: &mut NodeState<T>, event: NodeEvent<T>) {
    match event {
        NodeEvent::Message(message) => handle_message(state, message).await,
        NodeEvent::Replicate { operation, respond_to } => handle_replicate(state, operation, respond_to).await,
        NodeEvent::Query {
            policy,
            query,
            min_commit_index,
            respond_to,
        } => handle_query(state, policy, query, min_commit_index, respond_to).await,
        NodeEvent::ChangeMembership {
            endpoint,
            mode,
            expected_commit_index,
            respond_to,
        } => handle_change_membership(state, endpoint, mode, expected_commit_index, respond_to).await,
        NodeEvent::TransferLeadership { target, respond_to } => crate::transfer::start(state, target, respond_to),
        NodeEvent::HeartbeatTick => crate::replication::on_heartbeat_tick(state).await,
        NodeEvent::ElectionTick => election_trigger::on_election_tick(state).await,
        NodeEvent::BackoffReset { follower } => crate::replication::on_backoff_reset(state, follower).await,
        NodeEvent::ReportTick => on_report_tick(state).await,
        NodeEvent::TransferRetryTick => crate::transfer::on_retry_tick(state).await,
    }
}

async fn handle_message<T: RaftTypes>(state: &mut NodeState<T>, message: RaftMessage<T>) {
    match message {
        RaftMessage::AppendEntriesRequest(req) => append_entries::handle_request(state, req).await,
        RaftMessage::AppendEntriesSuccess(resp) => append_entries::handle_success(state, resp).await,
        RaftMessage::AppendEntriesFailure(resp) => append_entries::handle_failure(state, resp).await,
        RaftMessage::InstallSnapshotRequest(req) => install_snapshot::handle_request(state, req).await,
        RaftMessage::InstallSnapshotResponse(resp) => install_snapshot::handle_response(state, resp).await,
        RaftMessage::VoteRequest(req) => vote::handle_request(state, req, false).await,
        RaftMessage::VoteResponse(resp) => vote::handle_response(state, resp, false).await,
        RaftMessage::PreVoteRequest(req) => vote::handle_request(state, req, true).await,
        RaftMessage::PreVoteResponse(resp) => vote::handle_response(state, resp, true).await,
        RaftMessage::TriggerLeaderElection(trigger) => election_trigger::handle_trigger(state, trigger).await,
    }
}

/// `replicate`: append the operation under the leader's current term
/// and park the caller until it commits and applies.
async fn handle_replicate<T: RaftTypes>(state: &mut NodeState<T>, operation: T::Operation, respond_to: oneshot::Sender<RaftResult<Ordered<T::Applied>, T>>) {
    if !state.role.is_leader() {
        let _ = respond_to.send(Err(RaftError::NotLeader {
            leader_hint: state.role.leader_id.clone(),
        }));
        return;
    }
    if state.status.is_terminal() || state.role.leader_state.as_ref().map(|l| l.leadership_transfer.is_some()).unwrap_or(false) {
        let _ = respond_to.send(Err(RaftError::CannotReplicate {
            leader_hint: state.role.leader_id.clone(),
        }));
        return;
    }
    match state.append_local(EntryPayload::Operation(operation)).await {
        Ok(index) => {
            state.pending_replicate.insert(index, PendingReplicate { respond_to });
            crate::replication::replicate_to_all(state);
            state.advance_commit_and_apply().await;
        }
        Err(err) => {
            let _ = respond_to.send(Err(err));
        }
    }
}

/// `query`: `LEADER_LOCAL` enqueues a read-index round; `ANY_LOCAL` only
/// checks `minCommitIndex` and runs immediately.
async fn handle_query<T: RaftTypes>(
    state: &mut NodeState<T>,
    policy: QueryPolicy,
    query: T::Query,
    min_commit_index: crate::common::LogIndex,
    respond_to: oneshot::Sender<RaftResult<Ordered<T::QueryResult>, T>>,
) {
    if let Err(err) = query::check_min_commit_index::<T>(state.commit_index, min_commit_index, state.role.leader_id.clone()) {
        let _ = respond_to.send(Err(err));
        return;
    }
    match policy {
        QueryPolicy::AnyLocal => {
            let result = state.state_machine.query(state.commit_index, &query).await;
            let _ = respond_to.send(Ok(Ordered {
                commit_index: state.commit_index,
                result,
            }));
        }
        QueryPolicy::LeaderLocal => {
            if !state.role.is_leader() {
                let _ = respond_to.send(Err(RaftError::NotLeader {
                    leader_hint: state.role.leader_id.clone(),
                }));
                return;
            }
            let commit_index = state.commit_index;
            let has_commit = state.role.has_committed_in_current_term;
            let config = state.config.clone();
            let Some(leader_state) = state.role.leader_state.as_mut() else { return };
            match crate::query::enqueue(leader_state, &config, commit_index, has_commit, query) {
                Ok(rx) => {
                    crate::replication::replicate_to_all(state);
                    tokio::spawn(forward_query_result(rx, respond_to));
                }
                Err(err) => {
                    let _ = respond_to.send(Err(err));
                }
            }
        }
    }
}

async fn forward_query_result<T: RaftTypes>(
    rx: oneshot::Receiver<RaftResult<Ordered<T::QueryResult>, T>>,
    respond_to: oneshot::Sender<RaftResult<Ordered<T::QueryResult>, T>>,
) {
    if let Ok(result) = rx.await {
        let _ = respond_to.send(result);
    }
}

/// `changeMembership`: single-server add/remove, gated on the caller's
/// view of `committedCommitIndex` and at most one uncommitted change
/// in flight.
async fn handle_change_membership<T: RaftTypes>(
    state: &mut NodeState<T>,
    endpoint: T::Endpoint,
    mode: MembershipChangeMode,
    expected_commit_index: crate::common::LogIndex,
    respond_to: oneshot::Sender<RaftResult<Ordered<()>, T>>,
) {
    if !state.role.is_leader() {
        let _ = respond_to.send(Err(RaftError::NotLeader {
            leader_hint: state.role.leader_id.clone(),
        }));
        return;
    }
    if let Err(err) = state.membership.validate_change_request(expected_commit_index) {
        let _ = respond_to.send(Err(err));
        return;
    }
    if !state.role.has_committed_in_current_term {
        let _ = respond_to.send(Err(RaftError::CannotReplicate {
            leader_hint: state.role.leader_id.clone(),
        }));
        return;
    }
    let next_members = state.membership.next_members(&endpoint, mode);
    let payload = EntryPayload::UpdateMembers {
        endpoint: endpoint.clone(),
        mode,
        members: next_members.clone(),
    };
    match state.append_local(payload).await {
        Ok(index) => {
            state.membership.apply_effective(index, endpoint, mode, &next_members);
            if let Some(leader_state) = state.role.leader_state.as_mut() {
                for member in &next_members {
                    leader_state.followers.entry(member.clone()).or_insert_with(|| crate::role::FollowerState::new(index));
                }
            }
            state.pending_membership.insert(index, respond_to);
            crate::replication::replicate_to_all(state);
            state.advance_commit_and_apply().await;
        }
        Err(err) => {
            let _ = respond_to.send(Err(err));
        }
    }
}

async fn on_report_tick<T: RaftTypes>(state: &mut NodeState<T>) {
    if state.status.is_terminal() {
        return;
    }
    let report = RaftReport {
        node_id: state.self_id.clone(),
        term: state.role.current_term,
        role: state.role.role.clone(),
        leader_id: state.role.leader_id.clone(),
        commit_index: state.commit_index,
        last_applied: state.last_applied,
        last_log_index: state.log.last_log_or_snapshot_index(),
    };
    state.runtime.on_report(report).await;
    let period = state.config.raft_node_report_publish_period;
    state.arm_timer(period, NodeEvent::ReportTick);
}

pub(crate) fn schedule_heartbeat<T: RaftTypes>(state: &mut NodeState<T>) {
    let period = state.config.leader_heartbeat_period;
    state.arm_timer(period, NodeEvent::HeartbeatTick);
}

pub(crate) fn schedule_election_tick<T: RaftTypes>(state: &mut NodeState<T>) {
    use rand::Rng;
    let noise_bound = state.config.election_timeout_noise_max.max(Duration::from_millis(1));
    let jitter = rand::thread_rng().gen_range(Duration::from_millis(0)..noise_bound);
    let delay = state.config.leader_election_timeout + jitter;
    state.arm_timer(delay, NodeEvent::ElectionTick);
}
