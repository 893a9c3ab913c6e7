//! Shared scalar types and small value types used across the engine.

use std::fmt::Debug;
use std::hash::Hash;

/// Term number: a monotonically increasing, non-negative logical clock.
pub type Term = u64;

/// 1-based log index. Index `0` is the sentinel "no entry".
pub type LogIndex = u64;

/// Monotonically increasing counter piggybacked on AppendEntries to prove
/// current-leader status for linearizable reads without appending an entry.
pub type QueryRound = u64;

/// Bundles the two type parameters an embedder supplies: the opaque peer
/// identity and the opaque user operation. Grouping them behind one trait
/// keeps every `Log<T>` / `NodeState<T>` / `RaftError<T>` signature to a
/// single parameter instead of repeating `<E, O>` on every item in the crate.
pub trait RaftTypes: Send + Sync + 'static {
    /// Peer identity. Comparable by equality, cheap to clone.
    type Endpoint: Clone + Eq + Hash + Debug + Send + Sync + 'static;
    /// Opaque operation applied to the user state machine.
    type Operation: Clone + Debug + Send + Sync + 'static;
    /// Value returned by `StateMachine::apply` for one operation.
    type Applied: Debug + Send + Sync + 'static;
    /// Opaque local-read request for `QUERY` operations. The core never
    /// inspects it; it is handed straight to
    /// `StateMachine::query` once the read-index/commit-index gate for
    /// the chosen policy is satisfied.
    type Query: Debug + Send + Sync + 'static;
    /// Value returned by `StateMachine::query`.
    type QueryResult: Debug + Send + Sync + 'static;
}

/// Node lifecycle status. `is_terminal` is checked at the top of every
/// timer callback and handler before it touches `NodeState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Active,
    UpdatingGroupMembers,
    Terminated,
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Terminated)
    }
}

/// Successful result of a replicate/query/membership-change call: the log
/// index (or snapshot-relative commit index) at which the operation took
/// effect, plus whatever the state machine (or query) produced.
#[derive(Debug, Clone)]
pub struct Ordered<R> {
    pub commit_index: LogIndex,
    pub result: R,
}

/// Linearizable-read policy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPolicy {
    /// Requires leadership and a read-index round; linearizable.
    LeaderLocal,
    /// Runs locally against `commitIndex` immediately; may be stale.
    AnyLocal,
}

/// Single-server membership change direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipChangeMode {
    Add,
    Remove,
}
