//! Leader-side replication: batching and backoff, per-follower
//! in-flight/backoff bookkeeping, and the prev-log-index/term framing
//! each `AppendEntries` carries.

use crate::common::RaftTypes;
use crate::log::SnapshotChunk;
use crate::messages::{AppendEntriesRequest, InstallSnapshotRequest, RaftMessage};
use crate::node::{handlers, NodeEvent, NodeState};

/// Sends (or re-sends) AppendEntries to every peer not already backed
/// off or in flight.
pub fn replicate_to_all<T: RaftTypes>(state: &mut NodeState<T>) {
    if !state.role.is_leader() {
        return;
    }
    let peers: Vec<T::Endpoint> = state.membership.effective.members.iter().filter(|m| **m != state.self_id).cloned().collect();
    for peer in peers {
        maybe_replicate_to(state, &peer);
    }
}

/// Sends to exactly one follower if it is neither in flight nor backed
/// off, falling back to `InstallSnapshot` when the follower's
/// `next_index` has already been compacted away.
pub fn maybe_replicate_to<T: RaftTypes>(state: &mut NodeState<T>, peer: &T::Endpoint) {
    if !state.role.is_leader() {
        return;
    }

    let next_index = {
        let Some(leader_state) = state.role.leader_state.as_ref() else { return };
        let Some(follower) = leader_state.followers.get(peer) else { return };
        if follower.in_flight {
            return;
        }
        follower.next_index
    };

    if next_index <= state.log.snapshot_index() {
        send_snapshot(state, peer, 0);
        return;
    }

    let prev_log_index = next_index - 1;
    let Some(prev_log_term) = state.log.term_at(prev_log_index) else {
        send_snapshot(state, peer, 0);
        return;
    };
    let last = state.log.last_log_or_snapshot_index();
    let batch_end = (next_index + state.config.append_entries_request_batch_size as u64).saturating_sub(1).min(last);
    let entries = if next_index <= last { state.log.entries_from(next_index, batch_end) } else { Vec::new() };

    let query_round = state.role.leader_state.as_ref().map(|l| l.query_round).unwrap_or(0);
    let req = AppendEntriesRequest {
        group_id: state.group_id,
        sender: state.self_id.clone(),
        term: state.role.current_term,
        prev_log_index,
        prev_log_term,
        entries,
        leader_commit: state.commit_index,
        query_round,
    };

    state.runtime.send(peer.clone(), RaftMessage::AppendEntriesRequest(req));
    arm_backoff(state, peer);
}

fn send_snapshot<T: RaftTypes>(state: &mut NodeState<T>, peer: &T::Endpoint, _retry_from_chunk: u32) {
    let Some(snapshot) = state.log.snapshot_entry().cloned() else { return };
    let query_round = state.role.leader_state.as_ref().map(|l| l.query_round).unwrap_or(0);
    let total_chunk_count = snapshot.chunks.len() as u32;
    let req = InstallSnapshotRequest {
        sender: state.self_id.clone(),
        term: state.role.current_term,
        snapshot_index: snapshot.index,
        snapshot_term: snapshot.term,
        chunks: snapshot.chunks,
        total_chunk_count,
        group_members: snapshot.group_members,
        query_round,
    };
    state.runtime.send(peer.clone(), RaftMessage::InstallSnapshotRequest(req));
    arm_backoff(state, peer);
}

/// Re-sends only the chunks the follower's `requestedChunkIndices` names
/// as still missing.
pub fn resend_snapshot_chunks<T: RaftTypes>(state: &mut NodeState<T>, peer: &T::Endpoint, requested: &[u32]) {
    if requested.is_empty() {
        if let Some(leader_state) = state.role.leader_state.as_mut() {
            if let Some(follower) = leader_state.followers.get_mut(peer) {
                follower.clear_backoff();
            }
        }
        maybe_replicate_to(state, peer);
        return;
    }
    let Some(snapshot) = state.log.snapshot_entry() else { return };
    let chunks: Vec<SnapshotChunk<T>> = snapshot.chunks.iter().filter(|c| requested.contains(&c.chunk_index)).cloned().collect();
    let query_round = state.role.leader_state.as_ref().map(|l| l.query_round).unwrap_or(0);
    let req = InstallSnapshotRequest {
        sender: state.self_id.clone(),
        term: state.role.current_term,
        snapshot_index: snapshot.index,
        snapshot_term: snapshot.term,
        chunks,
        total_chunk_count: snapshot.chunks.len() as u32,
        group_members: snapshot.group_members.clone(),
        query_round,
    };
    state.runtime.send(peer.clone(), RaftMessage::InstallSnapshotRequest(req));
    arm_backoff(state, peer);
}

/// Heartbeat tick: leader resends to everyone (catch-up followers get
/// fresh entries, caught-up followers get an empty heartbeat) and rearms
/// the next tick.
pub async fn on_heartbeat_tick<T: RaftTypes>(state: &mut NodeState<T>) {
    if !state.role.is_leader() || state.status.is_terminal() {
        return;
    }
    if state.role.leader_state.as_ref().map(|l| l.followers.is_empty()).unwrap_or(true) {
        handlers::schedule_heartbeat(state);
        return;
    }
    let majority_fresh = {
        let Some(leader_state) = state.role.leader_state.as_ref() else { return };
        let voting = state.membership.effective.members.clone();
        let fresh = voting
            .iter()
            .filter(|m| **m == state.self_id || leader_state.followers.get(*m).and_then(|f| f.last_response_at).map(|t| t.elapsed() < state.config.leader_heartbeat_timeout).unwrap_or(false))
            .count();
        fresh * 2 > voting.len()
    };
    if !majority_fresh {
        let leader_hint = state.role.leader_id.clone();
        let term = state.role.current_term;
        state.become_follower(term).await;
        crate::transfer::cancel(state, Err(crate::error::RaftError::NotLeader { leader_hint: leader_hint.clone() }));
        crate::apply::fail_all_pending(state, crate::error::RaftError::NotLeader { leader_hint });
        return;
    }
    replicate_to_all(state);
    handlers::schedule_heartbeat(state);
}

/// Fires when a follower's backoff window elapses; retries sending to it.
pub async fn on_backoff_reset<T: RaftTypes>(state: &mut NodeState<T>, follower: T::Endpoint) {
    if let Some(leader_state) = state.role.leader_state.as_mut() {
        if let Some(f) = leader_state.followers.get_mut(&follower) {
            f.in_flight = false;
        }
    }
    maybe_replicate_to(state, &follower);
}

/// Arms a backoff-reset timer for `peer` using its current backoff round.
pub fn arm_backoff<T: RaftTypes>(state: &mut NodeState<T>, peer: &T::Endpoint) {
    let delay = {
        let Some(leader_state) = state.role.leader_state.as_mut() else { return };
        let Some(follower) = leader_state.followers.get_mut(peer) else { return };
        follower.set_request_backoff(16);
        follower.backoff_delay(state.config.leader_backoff_duration)
    };
    state.arm_timer(delay, NodeEvent::BackoffReset { follower: peer.clone() });
}
