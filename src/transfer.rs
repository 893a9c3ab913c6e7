//! Leadership transfer: the retry/backoff schedule reuses the same
//! shape as the replication backoff in `role.rs::FollowerState` rather
//! than inventing a separate scheme.

use crate::common::RaftTypes;
use crate::error::RaftError;
use crate::messages::{RaftMessage, TriggerLeaderElection};
use crate::node::{NodeEvent, NodeState};
use crate::role::LeadershipTransferState;
use tokio::sync::oneshot;

/// `transferLeadership(target)`: refuses a second transfer in flight,
/// then drives the target's log fully caught up before triggering its
/// election.
pub fn start<T: RaftTypes>(state: &mut NodeState<T>, target: T::Endpoint, respond_to: oneshot::Sender<Result<(), RaftError<T>>>) {
    if !state.role.is_leader() {
        let _ = respond_to.send(Err(RaftError::NotLeader {
            leader_hint: state.role.leader_id.clone(),
        }));
        return;
    }
    if !state.membership.effective.contains(&target) {
        let _ = respond_to.send(Err(RaftError::CannotReplicate {
            leader_hint: state.role.leader_id.clone(),
        }));
        return;
    }
    if state.role.leader_state.as_ref().map(|l| l.leadership_transfer.is_some()).unwrap_or(true) {
        let _ = respond_to.send(Err(RaftError::CannotReplicate {
            leader_hint: state.role.leader_id.clone(),
        }));
        return;
    }

    state.pending_transfer = Some(respond_to);
    let initial_delay = state.config.leader_backoff_duration;
    if let Some(leader_state) = state.role.leader_state.as_mut() {
        leader_state.leadership_transfer = Some(LeadershipTransferState::new(target.clone(), initial_delay));
    }

    state.arm_timer(state.config.leadership_transfer_timeout, NodeEvent::TransferRetryTick);
    try_trigger(state, &target);
}

fn try_trigger<T: RaftTypes>(state: &mut NodeState<T>, target: &T::Endpoint) {
    let caught_up = state
        .role
        .leader_state
        .as_ref()
        .and_then(|l| l.followers.get(target))
        .map(|f| f.match_index >= state.log.last_log_or_snapshot_index())
        .unwrap_or(false);
    if !caught_up {
        return;
    }
    let trigger = TriggerLeaderElection {
        sender: state.self_id.clone(),
        term: state.role.current_term,
        last_log_term: state.log.last_log_or_snapshot_term(),
        last_log_index: state.log.last_log_or_snapshot_index(),
    };
    state.runtime.send(target.clone(), RaftMessage::TriggerLeaderElection(trigger));
}

/// Retry/timeout tick: re-triggers if the target is now caught up, backs
/// off and reschedules otherwise, and times the whole transfer out once
/// `leadership_transfer_timeout` has elapsed.
pub async fn on_retry_tick<T: RaftTypes>(state: &mut NodeState<T>) {
    if !state.role.is_leader() {
        return;
    }
    let Some(target) = state.role.leader_state.as_ref().and_then(|l| l.leadership_transfer.as_ref()).map(|t| t.target.clone()) else {
        return;
    };

    let elapsed_timeout = state
        .role
        .leader_state
        .as_ref()
        .and_then(|l| l.leadership_transfer.as_ref())
        .map(|t| t.elapsed() >= state.config.leadership_transfer_timeout)
        .unwrap_or(true);

    if elapsed_timeout {
        cancel(state, Err(RaftError::Timeout));
        return;
    }

    try_trigger(state, &target);

    let cap = state.config.leadership_transfer_timeout;
    let delay = state
        .role
        .leader_state
        .as_mut()
        .and_then(|l| l.leadership_transfer.as_mut())
        .map(|t| t.next_backoff(cap))
        .unwrap_or(cap);
    state.arm_timer(delay, NodeEvent::TransferRetryTick);
}

/// Clears in-progress transfer state and resolves the caller's future.
/// Called both on timeout and implicitly once the target actually wins
/// an election and this node steps down via a higher-term AppendEntries.
pub fn cancel<T: RaftTypes>(state: &mut NodeState<T>, result: Result<(), RaftError<T>>) {
    if let Some(leader_state) = state.role.leader_state.as_mut() {
        leader_state.leadership_transfer = None;
    }
    if let Some(respond_to) = state.pending_transfer.take() {
        let _ = respond_to.send(result);
    }
}
