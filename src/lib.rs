//! Per-node Raft consensus core: event loop, role state machine,
//! replicated log, snapshotting, and linearizable reads, driven entirely
//! through the `Runtime`/`Store`/`StateMachine` collaborator traits.

pub mod apply;
pub mod commit;
pub mod common;
pub mod config;
pub mod error;
pub mod log;
pub mod membership;
pub mod messages;
pub mod node;
pub mod query;
pub mod replication;
pub mod role;
pub mod runtime;
pub mod snapshot;
pub mod state_machine;
pub mod store;
pub mod transfer;

pub use common::{LogIndex, MembershipChangeMode, Ordered, QueryPolicy, QueryRound, RaftTypes, Status, Term};
pub use config::RaftConfig;
pub use error::{RaftError, RaftResult};
pub use log::{EntryPayload, Log, LogEntry, SnapshotChunk, SnapshotEntry};
pub use membership::{MemberSet, MembershipState};
pub use messages::RaftMessage;
pub use node::{NodeEvent, NodeHandle, NodeSnapshot, Raft};
pub use role::Role;
pub use runtime::{RaftReport, Runtime};
pub use state_machine::{SnapshotSink, StateMachine, VecSnapshotSink};
pub use store::{NopStore, RestoredState, Store};
