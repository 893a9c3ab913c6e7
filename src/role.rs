//! Role state machine: Follower / PreCandidate / Candidate / Leader,
//! plus the leader's per-follower bookkeeping.
//!
//! Per-follower `next_index`/`match_index` live in a dedicated
//! `LeaderState<T>` that is created on promotion and dropped wholesale
//! on demotion, rather than flat fields that would otherwise need to be
//! overwritten in place.

use crate::common::{LogIndex, QueryRound, RaftTypes, Term};
use crate::query::QueryState;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Follower,
    PreCandidate,
    Candidate,
    Leader,
}

/// Per-follower bookkeeping held by the leader.
pub struct FollowerState {
    pub next_index: LogIndex,
    pub match_index: LogIndex,
    /// Exponentially growing, bounded backoff round. `0` means no
    /// outstanding backoff.
    pub backoff_round: u32,
    pub in_flight: bool,
    pub last_response_at: Option<Instant>,
    /// Highest queryRound this follower has acknowledged.
    pub acked_query_round: QueryRound,
}

impl FollowerState {
    pub fn new(next_index: LogIndex) -> Self {
        Self {
            next_index,
            match_index: 0,
            backoff_round: 0,
            in_flight: false,
            last_response_at: None,
            acked_query_round: 0,
        }
    }

    /// Arms a request backoff; the leader won't resend to this follower
    /// until the backoff round's reset task fires or a response arrives.
    pub fn set_request_backoff(&mut self, max_round: u32) {
        self.in_flight = true;
        self.backoff_round = (self.backoff_round + 1).min(max_round);
    }

    /// Any inbound response clears backoff immediately.
    pub fn clear_backoff(&mut self) {
        self.backoff_round = 0;
        self.in_flight = false;
        self.last_response_at = Some(Instant::now());
    }

    pub fn backoff_delay(&self, unit: Duration) -> Duration {
        unit.saturating_mul(1 << self.backoff_round.min(16))
    }
}

/// Candidate/pre-candidate vote tally, keyed by voter.
#[derive(Default)]
pub struct VoteTally<T: RaftTypes> {
    pub granted: std::collections::HashSet<T::Endpoint>,
}

impl<T: RaftTypes> VoteTally<T> {
    pub fn record(&mut self, voter: T::Endpoint) {
        self.granted.insert(voter);
    }

    pub fn has_majority(&self, voting_members: &[T::Endpoint], self_id: &T::Endpoint) -> bool {
        let votes = voting_members
            .iter()
            .filter(|m| *m == self_id || self.granted.contains(*m))
            .count();
        votes * 2 > voting_members.len()
    }
}

/// Leader-only state: created on promotion, dropped on demotion.
pub struct LeaderState<T: RaftTypes> {
    pub followers: HashMap<T::Endpoint, FollowerState>,
    pub query_round: QueryRound,
    pub query_state: QueryState<T>,
    pub leadership_transfer: Option<LeadershipTransferState<T>>,
}

impl<T: RaftTypes> LeaderState<T> {
    pub fn new(peers: impl IntoIterator<Item = T::Endpoint>, next_index: LogIndex) -> Self {
        let mut followers = HashMap::new();
        for peer in peers {
            followers.insert(peer, FollowerState::new(next_index));
        }
        Self {
            followers,
            query_round: 0,
            query_state: QueryState::default(),
            leadership_transfer: None,
        }
    }
}

/// Tracks a leadership-transfer-in-progress.
pub struct LeadershipTransferState<T: RaftTypes> {
    pub target: T::Endpoint,
    pub started_at: Instant,
    pub retry_delay: Duration,
    pub attempts: u32,
}

impl<T: RaftTypes> LeadershipTransferState<T> {
    pub fn new(target: T::Endpoint, initial_delay: Duration) -> Self {
        Self {
            target,
            started_at: Instant::now(),
            retry_delay: initial_delay,
            attempts: 0,
        }
    }

    pub fn next_backoff(&mut self, cap: Duration) -> Duration {
        self.attempts += 1;
        self.retry_delay = (self.retry_delay * 2).min(cap);
        self.retry_delay
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// The node's current role plus the data specific to that role. Kept as
/// plain data; handlers are free functions over `&mut NodeState`, never
/// methods that own the node.
pub struct RoleState<T: RaftTypes> {
    pub role: Role,
    pub current_term: Term,
    pub voted_for: Option<T::Endpoint>,
    pub leader_id: Option<T::Endpoint>,
    pub last_leader_contact: Instant,
    pub pre_vote_tally: VoteTally<T>,
    pub vote_tally: VoteTally<T>,
    pub leader_state: Option<LeaderState<T>>,
    /// Set once `commit.rs::try_advance` has committed an entry of
    /// `current_term`; cleared on every term change. Backs the
    /// `LEADER_LOCAL`/membership-change gates without re-scanning the
    /// log on every check.
    pub has_committed_in_current_term: bool,
}

impl<T: RaftTypes> RoleState<T> {
    pub fn new() -> Self {
        Self {
            role: Role::Follower,
            current_term: 0,
            voted_for: None,
            leader_id: None,
            last_leader_contact: Instant::now(),
            pre_vote_tally: VoteTally::default(),
            vote_tally: VoteTally::default(),
            leader_state: None,
            has_committed_in_current_term: false,
        }
    }

    pub fn is_leader(&self) -> bool {
        matches!(self.role, Role::Leader)
    }

    /// Moves to `Follower` in `new_term`; always legal, and clears the
    /// known leader only if the term actually advances. `new_term` may
    /// equal `current_term` (e.g. a failed leadership transfer demoting
    /// voluntarily).
    pub fn become_follower(&mut self, new_term: Term) {
        if new_term > self.current_term {
            self.current_term = new_term;
            self.voted_for = None;
            self.leader_id = None;
            self.has_committed_in_current_term = false;
        }
        self.role = Role::Follower;
        self.leader_state = None;
        self.pre_vote_tally = VoteTally::default();
        self.vote_tally = VoteTally::default();
    }

    pub fn become_pre_candidate(&mut self) {
        self.role = Role::PreCandidate;
        self.pre_vote_tally = VoteTally::default();
    }

    pub fn become_candidate(&mut self, self_id: T::Endpoint) {
        self.role = Role::Candidate;
        self.current_term += 1;
        self.voted_for = Some(self_id.clone());
        self.leader_id = None;
        self.vote_tally = VoteTally::default();
        self.vote_tally.record(self_id);
        self.has_committed_in_current_term = false;
    }

    pub fn become_leader(&mut self, self_id: T::Endpoint, peers: impl IntoIterator<Item = T::Endpoint>, next_index: LogIndex) {
        self.role = Role::Leader;
        self.leader_id = Some(self_id);
        self.leader_state = Some(LeaderState::new(peers, next_index));
    }
}

impl<T: RaftTypes> Default for RoleState<T> {
    fn default() -> Self {
        Self::new()
    }
}
