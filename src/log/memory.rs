use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::error::{BrokerError, Result};
use crate::log::sequence::LogSequenceNumber;
use crate::log::{EditConsumer, StatusChangesLog, StatusEdit};
use crate::state::snapshot::BrokerStatusSnapshot;

/// One retained log line.
#[derive(Debug, Clone)]
pub struct MemoryLogLine {
    pub sequence_number: LogSequenceNumber,
    pub edit: StatusEdit,
}

/// Non-replicated in-process status-changes log for single-node mode.
///
/// The whole journal lives in memory under a single ledger id. A boot log
/// and boot snapshot can be injected to exercise recovery without real
/// storage.
pub struct MemoryLog {
    inner: Mutex<Inner>,
    writable: AtomicBool,
    closed: AtomicBool,
}

struct Inner {
    next_offset: i64,
    lines: Vec<MemoryLogLine>,
    boot_lines: Option<Vec<MemoryLogLine>>,
    boot_snapshot: BrokerStatusSnapshot,
}

const MEMORY_LEDGER_ID: i64 = 1;

impl MemoryLog {
    pub fn new() -> Self {
        Self::with_boot_data(Vec::new(), BrokerStatusSnapshot::empty())
    }

    /// Build a log that replays `boot_lines` past `boot_snapshot` on
    /// recovery, as if they had been written by a previous incarnation.
    pub fn with_boot_data(
        boot_lines: Vec<MemoryLogLine>,
        boot_snapshot: BrokerStatusSnapshot,
    ) -> Self {
        // Appends must resume past everything the previous incarnation
        // wrote, whether it survives as a log line or inside the snapshot.
        let next_offset = boot_lines
            .iter()
            .map(|line| line.sequence_number.offset)
            .chain(std::iter::once(boot_snapshot.offset))
            .max()
            .map_or(0, |offset| offset + 1);
        Self {
            inner: Mutex::new(Inner {
                next_offset,
                lines: Vec::new(),
                boot_lines: Some(boot_lines),
                boot_snapshot,
            }),
            writable: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Copy of the retained journal, for tests and for seeding a restarted
    /// instance through [`MemoryLog::with_boot_data`].
    pub fn lines(&self) -> Vec<MemoryLogLine> {
        self.inner.lock().expect("memory log lock poisoned").lines.clone()
    }
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusChangesLog for MemoryLog {
    fn append(&self, edit: &StatusEdit) -> Result<LogSequenceNumber> {
        if !self.is_writable() {
            return Err(BrokerError::LogUnavailable(
                "log is not open for writing".to_string(),
            ));
        }
        let mut inner = self.inner.lock().expect("memory log lock poisoned");
        let sequence_number = LogSequenceNumber::new(MEMORY_LEDGER_ID, inner.next_offset);
        inner.next_offset += 1;
        inner.lines.push(MemoryLogLine {
            sequence_number,
            edit: edit.clone(),
        });
        Ok(sequence_number)
    }

    fn start_writing(&self) -> Result<()> {
        self.writable.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_writable(&self) -> bool {
        self.writable.load(Ordering::SeqCst) && !self.is_closed()
    }

    fn recover(&self, skip_past: LogSequenceNumber, consumer: EditConsumer<'_>) -> Result<()> {
        let boot_lines = {
            let mut inner = self.inner.lock().expect("memory log lock poisoned");
            inner.boot_lines.take()
        };
        if let Some(lines) = boot_lines {
            for line in lines {
                if line.sequence_number.after(skip_past) {
                    consumer(line.sequence_number, line.edit);
                }
            }
        }
        Ok(())
    }

    fn load_latest_snapshot(&self) -> Result<BrokerStatusSnapshot> {
        Ok(self
            .inner
            .lock()
            .expect("memory log lock poisoned")
            .boot_snapshot
            .clone())
    }

    fn checkpoint(&self, snapshot: &BrokerStatusSnapshot) -> Result<()> {
        let covered = snapshot.sequence_number();
        let mut inner = self.inner.lock().expect("memory log lock poisoned");
        inner
            .lines
            .retain(|line| line.sequence_number.after(covered));
        tracing::debug!(covered = %covered, retained = inner.lines.len(), "checkpoint done");
        Ok(())
    }

    fn request_leadership(&self) -> Result<()> {
        // Single node, always the leader.
        Ok(())
    }

    fn is_leader(&self) -> bool {
        true
    }

    fn follow_the_leader(
        &self,
        _skip_past: LogSequenceNumber,
        _consumer: EditConsumer<'_>,
    ) -> Result<()> {
        // There is no remote leader to follow in single-node mode.
        Ok(())
    }

    fn close(&self) {
        self.writable.store(false, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
