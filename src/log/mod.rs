pub mod edit;
pub mod election;
pub mod ledger;
pub mod memory;
pub mod replicated;
pub mod sequence;

pub use edit::StatusEdit;
pub use memory::MemoryLog;
pub use replicated::ReplicatedLog;
pub use sequence::LogSequenceNumber;

use crate::error::Result;
use crate::state::snapshot::BrokerStatusSnapshot;

/// Consumer invoked for every edit during recovery or follower tailing.
pub type EditConsumer<'a> = &'a mut dyn FnMut(LogSequenceNumber, StatusEdit);

/// Notified when the log acquires or loses the right to write.
///
/// The log owns leader election because it must serialize epoch allocation;
/// the broker reacts to these callbacks. Implementations must be idempotent:
/// the same transition may be signalled more than once.
pub trait LeadershipListener: Send + Sync {
    fn leadership_acquired(&self);
    fn leadership_lost(&self);
}

/// Append-only journal of status edits, with snapshot lifecycle and leader
/// election.
///
/// Two implementations exist: [`MemoryLog`] for single-node deployments and
/// [`ReplicatedLog`] backed by an external shared-log service plus a
/// coordination service.
///
/// Failure semantics: an error from [`append`](StatusChangesLog::append) is
/// fatal to the local writer. The leader must drop its writable flag, close
/// the ledger and step down; it must never mutate state outside the
/// log-then-apply pairing.
pub trait StatusChangesLog: Send + Sync {
    /// Durably record an edit. Leader-only; on a follower or after a write
    /// failure this returns `LogUnavailable`. The returned sequence number is
    /// strictly greater than every number returned before, by this or any
    /// prior leader.
    fn append(&self, edit: &StatusEdit) -> Result<LogSequenceNumber>;

    /// Allocate a new epoch so subsequent appends succeed. Called once
    /// leadership has been acquired.
    fn start_writing(&self) -> Result<()>;

    fn is_writable(&self) -> bool;

    /// Replay every edit with sequence number strictly greater than
    /// `skip_past`, in total order.
    fn recover(&self, skip_past: LogSequenceNumber, consumer: EditConsumer<'_>) -> Result<()>;

    /// Newest persisted snapshot, or the empty snapshot at `(-1, -1)`.
    fn load_latest_snapshot(&self) -> Result<BrokerStatusSnapshot>;

    /// Persist a snapshot atomically, then truncate journal prefixes that are
    /// no longer needed. A snapshot that failed to persist never truncates
    /// anything.
    fn checkpoint(&self, snapshot: &BrokerStatusSnapshot) -> Result<()>;

    fn request_leadership(&self) -> Result<()>;

    fn is_leader(&self) -> bool;

    /// Tail the log from a follower, starting strictly after `skip_past`.
    /// Semantically like `recover` but may return early and be retried.
    fn follow_the_leader(
        &self,
        skip_past: LogSequenceNumber,
        consumer: EditConsumer<'_>,
    ) -> Result<()>;

    fn close(&self);

    fn is_closed(&self) -> bool;
}
