//! The node: owns `NodeState`, runs the single-threaded event loop, and
//! exposes `NodeHandle`/`Raft` as the only way in.
//!
//! Rather than sharing state through a lock any task can grab, the node
//! owns its state through a `tokio::sync::mpsc` mailbox: `NodeState` is
//! touched by exactly one task, and every other call sees it only
//! through a oneshot reply or the `watch::Receiver` status snapshot.

pub mod handlers;

use crate::apply;
use crate::commit;
use crate::common::{LogIndex, MembershipChangeMode, Ordered, QueryPolicy, RaftTypes, Status, Term};
use crate::config::RaftConfig;
use crate::error::{RaftError, RaftResult};
use crate::log::{EntryPayload, Log, LogEntry};
use crate::membership::MembershipState;
use crate::messages::RaftMessage;
use crate::query::{self, PendingQuery};
use crate::role::{Role, RoleState};
use crate::runtime::{RaftReport, Runtime};
use crate::snapshot::{self, SnapshotChunkCollector};
use crate::state_machine::StateMachine;
use crate::store::Store;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

/// A `replicate` call waiting on its entry to commit and apply.
pub struct PendingReplicate<T: RaftTypes> {
    pub respond_to: oneshot::Sender<RaftResult<Ordered<T::Applied>, T>>,
}

/// Every externally- or internally-triggered thing the node's single
/// executor can be asked to do.
pub enum NodeEvent<T: RaftTypes> {
    Message(RaftMessage<T>),
    Replicate {
        operation: T::Operation,
        respond_to: oneshot::Sender<RaftResult<Ordered<T::Applied>, T>>,
    },
    Query {
        policy: QueryPolicy,
        query: T::Query,
        min_commit_index: LogIndex,
        respond_to: oneshot::Sender<RaftResult<Ordered<T::QueryResult>, T>>,
    },
    ChangeMembership {
        endpoint: T::Endpoint,
        mode: MembershipChangeMode,
        expected_commit_index: LogIndex,
        respond_to: oneshot::Sender<RaftResult<Ordered<()>, T>>,
    },
    TransferLeadership {
        target: T::Endpoint,
        respond_to: oneshot::Sender<RaftResult<(), T>>,
    },
    HeartbeatTick,
    ElectionTick,
    BackoffReset { follower: T::Endpoint },
    ReportTick,
    TransferRetryTick,
}

/// Volatile status snapshot, published on every state transition so
/// callers can read term/role/leader without going through the mailbox.
#[derive(Debug, Clone)]
pub struct NodeSnapshot<T: RaftTypes> {
    pub node_id: T::Endpoint,
    pub term: Term,
    pub role: Role,
    pub leader_id: Option<T::Endpoint>,
    pub status: Status,
    pub commit_index: LogIndex,
    pub last_applied: LogIndex,
    pub last_log_index: LogIndex,
}

/// Everything the driver loop owns. Never shared; touched only by the
/// task that owns the mailbox receiver.
pub struct NodeState<T: RaftTypes> {
    pub self_id: T::Endpoint,
    pub group_id: u64,
    pub config: RaftConfig,
    pub role: RoleState<T>,
    pub log: Log<T>,
    pub membership: MembershipState<T>,
    pub status: Status,
    pub commit_index: LogIndex,
    pub last_applied: LogIndex,
    pub pending_replicate: HashMap<LogIndex, PendingReplicate<T>>,
    pub pending_membership: HashMap<LogIndex, oneshot::Sender<RaftResult<Ordered<()>, T>>>,
    pub pending_transfer: Option<oneshot::Sender<RaftResult<(), T>>>,
    pub state_machine: Arc<dyn StateMachine<T>>,
    pub store: Arc<dyn Store<T>>,
    pub runtime: Arc<dyn Runtime<T>>,
    pub snapshot_collector: Option<SnapshotChunkCollector<T>>,
    pub last_voter_reset_at: std::time::Instant,
    /// Self-scheduled ticks (heartbeat, election, backoff-reset, report,
    /// transfer-retry), raced against the mailbox in `drive` instead of
    /// round-tripping through `Runtime` (see `runtime` module doc).
    timers: Vec<(Instant, NodeEvent<T>)>,
}

impl<T: RaftTypes> NodeState<T> {
    fn peers(&self) -> Vec<T::Endpoint> {
        self.membership
            .effective
            .members
            .iter()
            .filter(|m| **m != self.self_id)
            .cloned()
            .collect()
    }

    fn voting_members(&self) -> Vec<T::Endpoint> {
        self.membership.effective.members.clone()
    }

    fn is_voting_member(&self) -> bool {
        self.membership.effective.contains(&self.self_id)
    }

    /// Arms a one-shot internal tick; `drive`'s select loop wakes and
    /// dispatches it once `delay` elapses.
    pub(crate) fn arm_timer(&mut self, delay: Duration, event: NodeEvent<T>) {
        self.timers.push((Instant::now() + delay, event));
    }

    fn publish_snapshot(&self, status_tx: &watch::Sender<NodeSnapshot<T>>) {
        let snap = NodeSnapshot {
            node_id: self.self_id.clone(),
            term: self.role.current_term,
            role: self.role.role.clone(),
            leader_id: self.role.leader_id.clone(),
            status: self.status,
            commit_index: self.commit_index,
            last_applied: self.last_applied,
            last_log_index: self.log.last_log_or_snapshot_index(),
        };
        let _ = status_tx.send(snap);
    }

    /// Appends `payload` as a new log entry in the current term, persists
    /// and flushes it, and wires the leader's own `match_index` forward.
    /// A leader's own entries are durable the same way a follower's
    /// replicated ones are; nothing downstream (replication, commit)
    /// should ever see an index the store hasn't accepted.
    async fn append_local(&mut self, payload: EntryPayload<T>) -> RaftResult<LogIndex, T> {
        let index = self.log.last_log_or_snapshot_index() + 1;
        let entry = LogEntry {
            index,
            term: self.role.current_term,
            operation: payload,
        };
        self.log.append(entry)?;
        if !self.persist_entries_and_flush(index, index).await {
            return Err(RaftError::internal("node terminated before the entry could be persisted"));
        }
        if let Some(leader_state) = self.role.leader_state.as_mut() {
            if let Some(f) = leader_state.followers.get_mut(&self.self_id) {
                f.match_index = index;
            }
        }
        Ok(index)
    }

    /// Persists the log slice `[from, to]` and flushes it. On success,
    /// advances `flushed_index` to `to`. A persist or flush failure is
    /// unrecoverable for this node's durability guarantee, so it
    /// terminates rather than continue as though the entries were safe.
    pub(crate) async fn persist_entries_and_flush(&mut self, from: LogIndex, to: LogIndex) -> bool {
        if to < from {
            return true;
        }
        let entries = self.log.entries_from(from, to);
        if let Err(err) = self.store.persist_entries(&entries).await {
            warn!(error = %err, "failed to persist log entries, terminating node");
            self.status = Status::Terminated;
            return false;
        }
        if let Err(err) = self.store.flush().await {
            warn!(error = %err, "failed to flush log entries, terminating node");
            self.status = Status::Terminated;
            return false;
        }
        self.log.mark_flushed(to);
        true
    }

    /// Applies the term rule: moves to `Follower` in `new_term`, and if
    /// the term actually advanced, persists the cleared vote before
    /// returning so no message or state transition depending on it can
    /// precede the write.
    pub(crate) async fn become_follower(&mut self, new_term: Term) {
        let term_changed = new_term > self.role.current_term;
        self.role.become_follower(new_term);
        if term_changed {
            self.persist_vote().await;
        }
    }

    /// Enters `Candidate` for a new term, persisting the self-vote before
    /// any `VoteRequest` can go out.
    pub(crate) async fn become_candidate(&mut self) {
        let self_id = self.self_id.clone();
        self.role.become_candidate(self_id);
        self.persist_vote().await;
    }

    async fn persist_vote(&self) {
        if let Err(err) = self.store.persist_term(self.role.current_term, self.role.voted_for.clone()).await {
            warn!(error = %err, "failed to persist term/vote");
        }
    }

    /// Recomputes `commit_index` from the leader's view of follower
    /// `match_index`, applies committed entries, and runs a snapshot
    /// capture if the applier says one is due.
    async fn advance_commit_and_apply(&mut self) {
        if self.role.is_leader() {
            if let Some(leader_state) = self.role.leader_state.as_ref() {
                let voting = self.voting_members();
                let self_contribution = if self.log.flushed_index() > 0 {
                    self.log.flushed_index()
                } else {
                    self.log.last_log_or_snapshot_index()
                };
                let quorum_index = commit::quorum_match_index(leader_state, &voting, &self.self_id, self.is_voting_member(), self_contribution);
                if let Some(new_commit) = commit::try_advance(&self.log, self.role.current_term, self.commit_index, quorum_index) {
                    self.commit_index = new_commit;
                    self.role.has_committed_in_current_term = true;
                }
            }
        }
        let should_snapshot = apply::apply_committed(self).await;
        if should_snapshot {
            if let Err(err) = snapshot::capture(self).await {
                warn!(error = %err, "snapshot capture failed");
            }
        }
        if self.role.is_leader() {
            self.resolve_ready_queries().await;
        }
    }

    /// Runs every `LEADER_LOCAL` query whose read-index round now has
    /// majority acknowledgment against the state machine.
    async fn resolve_ready_queries(&mut self) {
        let ready: Vec<PendingQuery<T>> = {
            let Some(leader_state) = self.role.leader_state.as_mut() else { return };
            let voting = self.membership.effective.members.clone();
            let acked = query::majority_acked_round(leader_state, &voting, &self.self_id);
            query::ready_queries(leader_state, acked, self.commit_index)
        };
        for pending in ready {
            let result = self.state_machine.query(pending.query_commit_index, &pending.query).await;
            let _ = pending.respond_to.send(Ok(Ordered {
                commit_index: pending.query_commit_index,
                result,
            }));
        }
    }
}

/// Public handle: cheap to clone, the only way callers reach a running
/// node.
pub struct NodeHandle<T: RaftTypes> {
    tx: mpsc::UnboundedSender<NodeEvent<T>>,
}

impl<T: RaftTypes> Clone for NodeHandle<T> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<T: RaftTypes> NodeHandle<T> {
    /// Delivers an inbound wire message. Fire-and-forget; the node's own
    /// responses go back out through `Runtime::send`.
    pub fn deliver(&self, message: RaftMessage<T>) {
        let _ = self.tx.send(NodeEvent::Message(message));
    }

    pub async fn replicate(&self, operation: T::Operation) -> RaftResult<Ordered<T::Applied>, T> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(NodeEvent::Replicate { operation, respond_to: tx })
            .map_err(|_| RaftError::internal("node loop has shut down"))?;
        rx.await.map_err(|_| RaftError::internal("node loop dropped the reply"))?
    }

    pub async fn query(&self, policy: QueryPolicy, query: T::Query, min_commit_index: LogIndex) -> RaftResult<Ordered<T::QueryResult>, T> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(NodeEvent::Query {
                policy,
                query,
                min_commit_index,
                respond_to: tx,
            })
            .map_err(|_| RaftError::internal("node loop has shut down"))?;
        rx.await.map_err(|_| RaftError::internal("node loop dropped the reply"))?
    }

    pub async fn change_membership(&self, endpoint: T::Endpoint, mode: MembershipChangeMode, expected_commit_index: LogIndex) -> RaftResult<Ordered<()>, T> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(NodeEvent::ChangeMembership {
                endpoint,
                mode,
                expected_commit_index,
                respond_to: tx,
            })
            .map_err(|_| RaftError::internal("node loop has shut down"))?;
        rx.await.map_err(|_| RaftError::internal("node loop dropped the reply"))?
    }

    pub async fn transfer_leadership(&self, target: T::Endpoint) -> RaftResult<(), T> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(NodeEvent::TransferLeadership { target, respond_to: tx })
            .map_err(|_| RaftError::internal("node loop has shut down"))?;
        rx.await.map_err(|_| RaftError::internal("node loop dropped the reply"))?
    }
}

/// Top-level entry point: boots a node from durable state and spawns its
/// driver task. Dropping every clone of `handle` lets the driver task
/// exit once the mailbox closes.
pub struct Raft<T: RaftTypes> {
    pub handle: NodeHandle<T>,
    pub status: watch::Receiver<NodeSnapshot<T>>,
}

impl<T: RaftTypes> Raft<T> {
    pub async fn start(
        self_id: T::Endpoint,
        group_id: u64,
        initial_members: Vec<T::Endpoint>,
        config: RaftConfig,
        state_machine: Arc<dyn StateMachine<T>>,
        store: Arc<dyn Store<T>>,
        runtime: Arc<dyn Runtime<T>>,
    ) -> Result<Self, RaftError<T>> {
        let restored = store.restore().await.map_err(|e| RaftError::wrap("restoring durable state", e))?;

        let capacity = config.commit_count_to_take_snapshot + config.max_uncommitted_log_entry_count + config.kept_after_snapshot;
        let mut log = Log::new(capacity);
        for entry in restored.entries {
            log.append(entry).map_err(|e| RaftError::wrap("replaying restored log", std::io::Error::other(e.to_string())))?;
        }
        if let Some(last_chunk) = restored.snapshot_chunks.last().cloned() {
            let index = last_chunk.index;
            let term = last_chunk.term;
            let chunks: Vec<_> = restored.snapshot_chunks.into_iter().filter(|c| c.index == index).collect();
            log.set_snapshot(
                crate::log::SnapshotEntry {
                    index,
                    term,
                    chunks,
                    group_members_log_index: last_chunk.group_members_log_index,
                    group_members: last_chunk.group_members.clone(),
                },
                index,
            );
        }

        let mut role = RoleState::new();
        role.current_term = restored.current_term;
        role.voted_for = restored.voted_for;

        let commit_index = log.snapshot_index();
        let membership = MembershipState::new(if initial_members.is_empty() { vec![self_id.clone()] } else { initial_members });

        let state = NodeState {
            self_id: self_id.clone(),
            group_id,
            config,
            role,
            log,
            membership,
            status: Status::Active,
            commit_index,
            last_applied: commit_index,
            pending_replicate: HashMap::new(),
            pending_membership: HashMap::new(),
            pending_transfer: None,
            state_machine,
            store,
            runtime: runtime.clone(),
            snapshot_collector: None,
            last_voter_reset_at: std::time::Instant::now(),
            timers: Vec::new(),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(NodeSnapshot {
            node_id: self_id.clone(),
            term: state.role.current_term,
            role: state.role.role.clone(),
            leader_id: None,
            status: Status::Active,
            commit_index: state.commit_index,
            last_applied: state.last_applied,
            last_log_index: state.log.last_log_or_snapshot_index(),
        });

        state.arm_timer(state.config.leader_election_timeout, NodeEvent::ElectionTick);
        state.arm_timer(state.config.raft_node_report_publish_period, NodeEvent::ReportTick);

        tokio::spawn(drive(state, rx, status_tx));

        Ok(Self {
            handle: NodeHandle { tx },
            status: status_rx,
        })
    }
}

/// Drains every timer due by `now` out of `state.timers`, in arm order.
fn drain_due_timers<T: RaftTypes>(state: &mut NodeState<T>, now: Instant) -> Vec<NodeEvent<T>> {
    let mut due = Vec::new();
    let mut pending = Vec::new();
    for entry in state.timers.drain(..) {
        if entry.0 <= now {
            due.push(entry.1);
        } else {
            pending.push(entry);
        }
    }
    state.timers = pending;
    due
}

/// The event loop: the only task that ever touches `NodeState`.
/// Races the mailbox against the node's own timer queue so heartbeats,
/// election timeouts, backoff resets, report ticks, and transfer retries
/// never need a `Runtime` round trip (see `runtime` module doc).
async fn drive<T: RaftTypes>(mut state: NodeState<T>, mut rx: mpsc::UnboundedReceiver<NodeEvent<T>>, status_tx: watch::Sender<NodeSnapshot<T>>) {
    info!(node_id = ?state.self_id, "raft node starting");
    loop {
        let next_fire = state.timers.iter().map(|(at, _)| *at).min();
        let sleep = match next_fire {
            Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at.max(Instant::now()))),
            None => tokio::time::sleep(Duration::from_secs(3600)),
        };
        tokio::select! {
            maybe_event = rx.recv() => {
                let Some(event) = maybe_event else { break };
                if state.status.is_terminal() && matches!(&event, NodeEvent::Message(_) | NodeEvent::HeartbeatTick | NodeEvent::ElectionTick | NodeEvent::BackoffReset { .. } | NodeEvent::TransferRetryTick) {
                    continue;
                }
                handlers::dispatch(&mut state, event).await;
            }
            _ = sleep, if next_fire.is_some() => {
                let due = drain_due_timers(&mut state, Instant::now());
                for event in due {
                    if state.status.is_terminal() && matches!(&event, NodeEvent::HeartbeatTick | NodeEvent::ElectionTick | NodeEvent::BackoffReset { .. } | NodeEvent::TransferRetryTick) {
                        continue;
                    }
                    handlers::dispatch(&mut state, event).await;
                }
            }
        }
        state.publish_snapshot(&status_tx);
        if state.status.is_terminal() {
            state.runtime.on_group_terminated().await;
            break;
        }
    }
    debug!(node_id = ?state.self_id, "raft node driver loop exited");
}
