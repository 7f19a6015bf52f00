use crate::error::Result;

/// Contract of the external shared-log service backing [`ReplicatedLog`].
///
/// Entries are opaque bytes; the service assigns densely increasing offsets
/// within a ledger. Creating a ledger fences every writer opened before it,
/// so a superseded leader's next append fails. This is the split-brain
/// guarantee the broker relies on.
///
/// [`ReplicatedLog`]: crate::log::ReplicatedLog
pub trait LedgerStore: Send + Sync {
    /// Open a fresh ledger for writing, fencing all prior writers.
    fn create_ledger(&self) -> Result<Box<dyn LedgerWriter>>;

    /// Open an existing ledger for reading.
    fn open_ledger(&self, ledger_id: u64) -> Result<Box<dyn LedgerReader>>;

    /// Drop a ledger whose entries are covered by a snapshot.
    fn delete_ledger(&self, ledger_id: u64) -> Result<()>;
}

pub trait LedgerWriter: Send {
    fn ledger_id(&self) -> u64;

    /// Append an entry, returning its offset within the ledger.
    fn append(&mut self, entry: &[u8]) -> Result<i64>;

    fn close(&mut self);
}

pub trait LedgerReader: Send {
    /// Offset of the last durable entry, or -1 for an empty ledger.
    fn last_confirmed(&self) -> Result<i64>;

    /// Entries in `[from, to]` as `(offset, bytes)` pairs, in order.
    fn read(&self, from: i64, to: i64) -> Result<Vec<(i64, Vec<u8>)>>;
}
