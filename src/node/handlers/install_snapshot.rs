//! `InstallSnapshot` request/response handling. Unlike a single-blob
//! snapshot replace, this accumulates chunks in a `SnapshotChunkCollector`
//! and only installs once every chunk index has arrived.

use crate::common::RaftTypes;
use crate::messages::{InstallSnapshotRequest, InstallSnapshotResponse, RaftMessage};
use crate::node::NodeState;
use crate::snapshot::SnapshotChunkCollector;
use tracing::warn;

pub async fn handle_request<T: RaftTypes>(state: &mut NodeState<T>, req: InstallSnapshotRequest<T>) {
    if req.term < state.role.current_term {
        return;
    }
    if req.term > state.role.current_term {
        state.become_follower(req.term).await;
    }
    state.role.leader_id = Some(req.sender.clone());
    state.role.last_leader_contact = std::time::Instant::now();

    if req.snapshot_index <= state.commit_index {
        state.runtime.send(
            req.sender,
            RaftMessage::InstallSnapshotResponse(InstallSnapshotResponse {
                sender: state.self_id.clone(),
                term: state.role.current_term,
                requested_chunk_indices: Vec::new(),
            }),
        );
        return;
    }

    let collector = state.snapshot_collector.get_or_insert_with(|| {
        SnapshotChunkCollector::new(req.snapshot_index, req.snapshot_term, req.total_chunk_count, req.group_members.clone())
    });
    if collector.index != req.snapshot_index {
        *collector = SnapshotChunkCollector::new(req.snapshot_index, req.snapshot_term, req.total_chunk_count, req.group_members.clone());
    }
    for chunk in req.chunks {
        if let Err(err) = state.store.persist_snapshot_chunk(&chunk).await {
            warn!(%err, "failed to persist snapshot chunk");
        }
        state.snapshot_collector.as_mut().unwrap().accept(chunk);
    }

    let missing = state.snapshot_collector.as_ref().unwrap().missing_chunk_indices();
    if missing.is_empty() {
        let collector = state.snapshot_collector.take().unwrap();
        if let Some(entry) = collector.into_entry() {
            if let Err(err) = crate::snapshot::install(state, entry).await {
                warn!(%err, "failed to install snapshot");
            }
        }
    }

    state.runtime.send(
        req.sender,
        RaftMessage::InstallSnapshotResponse(InstallSnapshotResponse {
            sender: state.self_id.clone(),
            term: state.role.current_term,
            requested_chunk_indices: missing,
        }),
    );
}

pub async fn handle_response<T: RaftTypes>(state: &mut NodeState<T>, resp: InstallSnapshotResponse<T>) {
    if resp.term > state.role.current_term {
        state.become_follower(resp.term).await;
        return;
    }
    if !state.role.is_leader() {
        return;
    }
    crate::replication::resend_snapshot_chunks(state, &resp.sender, &resp.requested_chunk_indices);
}
