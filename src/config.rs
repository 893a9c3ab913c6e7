//! Engine configuration: plain, `Default`-constructible data. Loading
//! these values from a file or CLI flags is an external collaborator's
//! job; this crate only defines the knobs.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RaftConfig {
    /// Base timeout before a follower with no known leader starts a
    /// pre-vote round. A randomized 0-100ms is added on top (see
    /// `election_timeout_noise_max`).
    pub leader_election_timeout: Duration,

    /// Interval at which a leader sends AppendEntries to followers that
    /// are caught up (heartbeat cadence).
    pub leader_heartbeat_period: Duration,

    /// How long a follower waits without hearing from a leader before it
    /// starts a pre-vote. Also used by the leader itself: if a majority
    /// of followers have not acknowledged within this period, the leader
    /// demotes to follower.
    pub leader_heartbeat_timeout: Duration,

    /// Ceiling for a follower's request backoff while a request to it is
    /// outstanding and unacknowledged.
    pub leader_backoff_duration: Duration,

    /// Entries per AppendEntries batch.
    pub append_entries_request_batch_size: usize,

    /// Upper bound on uncommitted log entries, shared as the bound on
    /// batched LEADER_LOCAL queries awaiting a read-index round.
    pub max_uncommitted_log_entry_count: usize,

    /// Number of additional commits (past `snapshotIndex`) that trigger a
    /// new snapshot capture.
    pub commit_count_to_take_snapshot: usize,

    /// Log entries to retain behind the new snapshot index for followers
    /// whose known `matchIndex` is already close to it.
    pub kept_after_snapshot: usize,

    /// Snapshot payload is cut into chunks no larger than this so a
    /// multi-chunk snapshot survives a crash mid-transfer.
    pub snapshot_chunk_size: usize,

    /// Periodic cadence at which `Runtime::on_report` is invoked.
    pub raft_node_report_publish_period: Duration,

    /// Upper bound of the randomized jitter added to election timeouts.
    pub election_timeout_noise_max: Duration,

    /// Deadline for a leadership transfer before it fails with `Timeout`.
    pub leadership_transfer_timeout: Duration,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            leader_election_timeout: Duration::from_millis(1_000),
            leader_heartbeat_period: Duration::from_millis(150),
            leader_heartbeat_timeout: Duration::from_millis(1_000),
            leader_backoff_duration: Duration::from_millis(1_000),
            append_entries_request_batch_size: 100,
            max_uncommitted_log_entry_count: 1_000,
            commit_count_to_take_snapshot: 10_000,
            kept_after_snapshot: 100,
            snapshot_chunk_size: 1 << 20,
            raft_node_report_publish_period: Duration::from_secs(10),
            election_timeout_noise_max: Duration::from_millis(100),
            leadership_transfer_timeout: Duration::from_secs(10),
        }
    }
}
