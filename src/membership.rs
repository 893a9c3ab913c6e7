//! Membership tracking and the single-server change pipeline. Separate
//! committed/effective member sets enforce that at most one effective
//! membership-change entry may be uncommitted at any time; there is no
//! joint-consensus C_old,new step, only single-server add/remove.

use crate::common::{LogIndex, MembershipChangeMode, RaftTypes};
use crate::error::RaftError;

/// A member set effective as of a particular log index.
#[derive(Debug, Clone)]
pub struct MemberSet<T: RaftTypes> {
    pub log_index: LogIndex,
    pub members: Vec<T::Endpoint>,
}

impl<T: RaftTypes> MemberSet<T> {
    pub fn new(log_index: LogIndex, members: Vec<T::Endpoint>) -> Self {
        Self { log_index, members }
    }

    pub fn contains(&self, endpoint: &T::Endpoint) -> bool {
        self.members.iter().any(|m| m == endpoint)
    }

    pub fn quorum_size(&self) -> usize {
        self.members.len() / 2 + 1
    }
}

/// Two distinguished member sets per node: `committed` (a committed
/// `UpdateMembers` has applied) and `effective` (latest appended,
/// possibly uncommitted).
pub struct MembershipState<T: RaftTypes> {
    pub committed: MemberSet<T>,
    pub effective: MemberSet<T>,
}

impl<T: RaftTypes> MembershipState<T> {
    pub fn new(initial_members: Vec<T::Endpoint>) -> Self {
        let set = MemberSet::new(0, initial_members);
        Self {
            committed: set.clone(),
            effective: set,
        }
    }

    /// At most one effective `UpdateMembers` entry may be uncommitted.
    pub fn has_uncommitted_change(&self) -> bool {
        self.effective.log_index != self.committed.log_index
    }

    /// Effective members flip on append.
    pub fn apply_effective(&mut self, log_index: LogIndex, endpoint: T::Endpoint, mode: MembershipChangeMode, members: &[T::Endpoint]) {
        let _ = (endpoint, mode);
        self.effective = MemberSet::new(log_index, members.to_vec());
    }

    /// Committed members flip on commit, via the applier.
    pub fn commit(&mut self) {
        self.committed = MemberSet::new(self.effective.log_index, self.effective.members.clone());
    }

    /// Validates a `changeMembership` request: the caller's view of the
    /// committed index must be current, and at most one change may be
    /// uncommitted at a time.
    pub fn validate_change_request(&self, expected_commit_index: LogIndex) -> Result<(), RaftError<T>> {
        if expected_commit_index != self.committed.log_index {
            return Err(RaftError::CannotReplicate { leader_hint: None });
        }
        if self.has_uncommitted_change() {
            return Err(RaftError::CannotReplicate { leader_hint: None });
        }
        Ok(())
    }

    pub fn next_members(&self, endpoint: &T::Endpoint, mode: MembershipChangeMode) -> Vec<T::Endpoint> {
        let mut members = self.effective.members.clone();
        match mode {
            MembershipChangeMode::Add => {
                if !members.iter().any(|m| m == endpoint) {
                    members.push(endpoint.clone());
                }
            }
            MembershipChangeMode::Remove => {
                members.retain(|m| m != endpoint);
            }
        }
        members
    }
}
