//! `Runtime` contract: the node's only way to affect the outside world.
//! The node never opens sockets; it hands outbound messages to a
//! `Runtime` and receives inbound messages on its own event queue (see
//! `node::NodeHandle`).
//!
//! Timer scheduling (heartbeats, election timeouts, backoff resets) is
//! deliberately NOT part of this trait: it is driven entirely by the
//! node's own event loop (`node::drive`) against its own timer queue.
//! Exposing `NodeEvent` re-injection through `Runtime` would require an
//! implementor to hold a `NodeHandle` that does not exist until after
//! the node has already started.

use crate::common::RaftTypes;
use crate::messages::RaftMessage;
use async_trait::async_trait;

/// Periodic operator-facing status snapshot.
#[derive(Debug, Clone)]
pub struct RaftReport<T: RaftTypes> {
    pub node_id: T::Endpoint,
    pub term: crate::common::Term,
    pub role: crate::role::Role,
    pub leader_id: Option<T::Endpoint>,
    pub commit_index: crate::common::LogIndex,
    pub last_applied: crate::common::LogIndex,
    pub last_log_index: crate::common::LogIndex,
}

#[async_trait]
pub trait Runtime<T: RaftTypes>: Send + Sync + 'static {
    /// Best-effort send; may drop. No ordering across destinations is
    /// required, but messages from the same sender to the same
    /// destination must arrive in send order.
    fn send(&self, to: T::Endpoint, message: RaftMessage<T>);

    /// Operator callback, invoked on `raft_node_report_publish_period`.
    async fn on_report(&self, report: RaftReport<T>);

    /// Final callback once the node reaches `Status::Terminated` and has
    /// drained its pending futures.
    async fn on_group_terminated(&self);
}
