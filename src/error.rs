//! Error kinds surfaced to callers: `thiserror::Error` with one
//! `#[error("...")]` variant per failure family and `#[source]` for
//! wrapped causes, since `RaftError` needs to carry a typed leader hint
//! back to the caller rather than a flat string.

use crate::common::{LogIndex, RaftTypes};
use thiserror::Error;

/// Result alias used throughout the crate.
pub type RaftResult<R, T> = std::result::Result<R, RaftError<T>>;

#[derive(Error, Debug)]
pub enum RaftError<T: RaftTypes> {
    /// Operation requires leader role and the local node is not the
    /// leader, or the leader was demoted before the operation completed.
    #[error("not leader (hint: {leader_hint:?})")]
    NotLeader { leader_hint: Option<T::Endpoint> },

    /// Capacity exceeded, a membership change is already in flight, or a
    /// leadership transfer is pending.
    #[error("cannot replicate right now (hint: {leader_hint:?})")]
    CannotReplicate { leader_hint: Option<T::Endpoint> },

    /// `minCommitIndex` gate failed on a query.
    #[error("commit index {current} is behind the required {expected}")]
    LaggingCommitIndex {
        current: LogIndex,
        expected: LogIndex,
        leader: Option<T::Endpoint>,
    },

    /// The entry this operation was waiting on was superseded by a
    /// snapshot before its outcome could be observed.
    #[error("state became indeterminate before the operation resolved (leader: {leader:?})")]
    IndeterminateState { leader: Option<T::Endpoint> },

    /// Leadership transfer did not complete before its deadline.
    #[error("leadership transfer timed out")]
    Timeout,

    /// Unexpected internal failure: persistence I/O, a panicking state
    /// machine, or a broken invariant.
    #[error("internal raft failure: {message}")]
    RaftException {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl<T: RaftTypes> RaftError<T> {
    pub fn internal(message: impl Into<String>) -> Self {
        RaftError::RaftException {
            message: message.into(),
            source: None,
        }
    }

    pub fn wrap(message: impl Into<String>, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        RaftError::RaftException {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}
