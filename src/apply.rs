//! Applier: drives `StateMachine` for committed entries, resolves
//! pending replicate/membership futures, and probes for a snapshot once
//! `commit_index` has advanced far enough past `snapshot_index`. The
//! core loop is `while last_applied < commit_index { last_applied += 1;
//! ... }`, applied uniformly to user operations, membership changes,
//! and group termination.

use crate::common::{LogIndex, RaftTypes, Status};
use crate::error::RaftError;
use crate::log::EntryPayload;
use crate::node::NodeState;

/// Applies every committed-but-unapplied entry in order. Returns `true`
/// if a snapshot capture should now run.
pub async fn apply_committed<T: RaftTypes>(state: &mut NodeState<T>) -> bool {
    while state.last_applied < state.commit_index {
        let next = state.last_applied + 1;
        let Some(entry) = state.log.get_entry(next).cloned() else {
            // Compacted into a snapshot concurrently; advance past it.
            state.last_applied = next;
            continue;
        };

        match entry.operation {
            EntryPayload::Blank => {}
            EntryPayload::Operation(op) => {
                let result = state.state_machine.apply(next, &op).await;
                if let Some(pending) = state.pending_replicate.remove(&next) {
                    let _ = pending.respond_to.send(Ok(crate::common::Ordered {
                        commit_index: next,
                        result,
                    }));
                }
            }
            EntryPayload::UpdateMembers { endpoint, mode, members } => {
                state.status = Status::UpdatingGroupMembers;
                state.membership.apply_effective(next, endpoint.clone(), mode, &members);
                state.membership.commit();
                let removes_self = mode == crate::common::MembershipChangeMode::Remove && endpoint == state.self_id;
                state.status = if removes_self { Status::Terminated } else { Status::Active };
                if let Some(pending) = state.pending_membership.remove(&next) {
                    let _ = pending.send(Ok(crate::common::Ordered { commit_index: next, result: () }));
                }
            }
            EntryPayload::TerminateGroup => {
                state.status = Status::Terminated;
            }
        }

        state.last_applied = next;

        if state.status.is_terminal() {
            fail_all_pending(state, RaftError::NotLeader { leader_hint: state.role.leader_id.clone() });
            break;
        }
    }

    state.commit_index.saturating_sub(state.log.snapshot_index()) as usize >= state.config.commit_count_to_take_snapshot
        && !state.status.is_terminal()
}

/// Once `status` is `Terminated`, every pending future fails with `NotLeader`.
pub fn fail_all_pending<T: RaftTypes>(state: &mut NodeState<T>, err_template: RaftError<T>) {
    let leader_hint = match &err_template {
        RaftError::NotLeader { leader_hint } => leader_hint.clone(),
        _ => None,
    };
    for (_, pending) in state.pending_replicate.drain() {
        let _ = pending.respond_to.send(Err(RaftError::NotLeader { leader_hint: leader_hint.clone() }));
    }
    for (_, pending) in state.pending_membership.drain() {
        let _ = pending.send(Err(RaftError::NotLeader { leader_hint: leader_hint.clone() }));
    }
    if let Some(leader_state) = state.role.leader_state.as_mut() {
        crate::query::fail_all_pending(leader_state, leader_hint);
    }
}

/// Invalidates every pending future at index <= `up_to` with
/// `IndeterminateState`, used when a snapshot install supersedes entries
/// a caller was still waiting on.
pub fn invalidate_up_to<T: RaftTypes>(state: &mut NodeState<T>, up_to: LogIndex) {
    let leader = state.role.leader_id.clone();
    let stale: Vec<LogIndex> = state.pending_replicate.keys().copied().filter(|i| *i <= up_to).collect();
    for index in stale {
        if let Some(pending) = state.pending_replicate.remove(&index) {
            let _ = pending.respond_to.send(Err(RaftError::IndeterminateState { leader: leader.clone() }));
        }
    }
    let stale: Vec<LogIndex> = state.pending_membership.keys().copied().filter(|i| *i <= up_to).collect();
    for index in stale {
        if let Some(pending) = state.pending_membership.remove(&index) {
            let _ = pending.send(Err(RaftError::IndeterminateState { leader: leader.clone() }));
        }
    }
}
