use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{BrokerError, Result};
use crate::log::election::ClusterCoordinator;
use crate::log::ledger::{LedgerStore, LedgerWriter};
use crate::log::sequence::LogSequenceNumber;
use crate::log::{EditConsumer, StatusChangesLog, StatusEdit};
use crate::state::snapshot::BrokerStatusSnapshot;

const SNAPSHOT_FILE_EXTENSION: &str = ".snap.json";

/// Status-changes log replicated on an external shared-log service, with
/// leader election delegated to a coordination service.
///
/// Each leadership term writes into its own ledger; the ledger id doubles as
/// the epoch of every [`LogSequenceNumber`] it produces. The authoritative
/// ledger list lives in the coordination service so followers and recovering
/// leaders read the same journal. Snapshots are JSON files named
/// `<ledger_id>_<offset>.snap.json` in the snapshots directory.
pub struct ReplicatedLog {
    store: Arc<dyn LedgerStore>,
    coordinator: Arc<dyn ClusterCoordinator>,
    writer: Mutex<WriterState>,
    snapshot_lock: Mutex<()>,
    snapshots_directory: PathBuf,
    snapshot_ledger_id: AtomicI64,
    closed: AtomicBool,
}

struct WriterState {
    writer: Option<Box<dyn LedgerWriter>>,
    current_ledger_id: i64,
}

impl ReplicatedLog {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        coordinator: Arc<dyn ClusterCoordinator>,
        snapshots_directory: impl Into<PathBuf>,
    ) -> Result<Self> {
        let snapshots_directory = snapshots_directory.into();
        fs::create_dir_all(&snapshots_directory).map_err(BrokerError::log_unavailable)?;
        Ok(Self {
            store,
            coordinator,
            writer: Mutex::new(WriterState {
                writer: None,
                current_ledger_id: -1,
            }),
            snapshot_lock: Mutex::new(()),
            snapshots_directory,
            snapshot_ledger_id: AtomicI64::new(-1),
            closed: AtomicBool::new(false),
        })
    }

    fn open_new_ledger(&self) -> Result<()> {
        let mut state = self.writer.lock().expect("writer lock poisoned");
        let mut ledgers = self.coordinator.ledgers_list()?;
        let writer = self.store.create_ledger()?;
        let ledger_id = writer.ledger_id();
        ledgers.push(ledger_id);
        self.coordinator.save_ledgers_list(&ledgers)?;
        tracing::info!(ledger_id, "opened new ledger");
        state.current_ledger_id = ledger_id as i64;
        state.writer = Some(writer);
        Ok(())
    }

    fn parse_snapshot_filename(filename: &str) -> Option<LogSequenceNumber> {
        let stem = filename.strip_suffix(SNAPSHOT_FILE_EXTENSION)?;
        let (ledger, offset) = stem.split_once('_')?;
        Some(LogSequenceNumber::new(
            ledger.parse().ok()?,
            offset.parse().ok()?,
        ))
    }

    /// Delete snapshot files older than `latest` and ledgers fully covered by
    /// it. The snapshot's own ledger is kept: offsets past the snapshot are
    /// still needed for recovery.
    fn drop_covered_prefixes(&self, latest: LogSequenceNumber) -> Result<()> {
        let entries = fs::read_dir(&self.snapshots_directory).map_err(BrokerError::log_unavailable)?;
        for entry in entries.flatten() {
            let filename = entry.file_name().to_string_lossy().into_owned();
            if let Some(number) = Self::parse_snapshot_filename(&filename) {
                if latest.after(number) {
                    if let Err(error) = fs::remove_file(entry.path()) {
                        tracing::warn!(%filename, %error, "could not remove stale snapshot");
                    }
                }
            }
        }

        if latest.ledger_id < 0 {
            return Ok(());
        }
        let dropped: Vec<u64> = {
            // The writer lock serializes this read-modify-write of the
            // ledger list against ledger rollover.
            let _state = self.writer.lock().expect("writer lock poisoned");
            let mut ledgers = self.coordinator.ledgers_list()?;
            let dropped: Vec<u64> = ledgers
                .iter()
                .copied()
                .filter(|id| (*id as i64) < latest.ledger_id)
                .collect();
            if dropped.is_empty() {
                return Ok(());
            }
            ledgers.retain(|id| (*id as i64) >= latest.ledger_id);
            self.coordinator.save_ledgers_list(&ledgers)?;
            dropped
        };
        for ledger_id in dropped {
            tracing::info!(ledger_id, "dropping ledger covered by snapshot");
            self.store.delete_ledger(ledger_id)?;
        }
        Ok(())
    }
}

impl StatusChangesLog for ReplicatedLog {
    fn append(&self, edit: &StatusEdit) -> Result<LogSequenceNumber> {
        let bytes = edit.serialize()?;
        let mut state = self.writer.lock().expect("writer lock poisoned");
        if !self.coordinator.is_leader() {
            if let Some(mut writer) = state.writer.take() {
                writer.close();
            }
            return Err(BrokerError::LogUnavailable(
                "leadership lost, ledger closed".to_string(),
            ));
        }
        let ledger_id = state.current_ledger_id;
        let writer = state.writer.as_mut().ok_or_else(|| {
            BrokerError::LogUnavailable("no ledger opened for writing".to_string())
        })?;
        match writer.append(&bytes) {
            Ok(offset) => Ok(LogSequenceNumber::new(ledger_id, offset)),
            Err(error) => {
                // A failed append is fatal to this writer: close the ledger
                // and step down so the next leader takes over cleanly.
                tracing::error!(%error, ledger_id, "append failed, closing writer");
                if let Some(mut writer) = state.writer.take() {
                    writer.close();
                }
                Err(error)
            }
        }
    }

    fn start_writing(&self) -> Result<()> {
        self.open_new_ledger()
    }

    fn is_writable(&self) -> bool {
        !self.is_closed() && self.writer.lock().expect("writer lock poisoned").writer.is_some()
    }

    fn recover(&self, skip_past: LogSequenceNumber, consumer: EditConsumer<'_>) -> Result<()> {
        let ledgers = self.coordinator.ledgers_list()?;
        let snapshot_ledger_id = self.snapshot_ledger_id.load(Ordering::SeqCst);
        tracing::info!(?ledgers, snapshot_ledger_id, "recovering");
        if snapshot_ledger_id >= 0 && !ledgers.contains(&(snapshot_ledger_id as u64)) {
            return Err(BrokerError::LogUnavailable(format!(
                "ledger list {:?} does not include the snapshot ledger {}; \
                 pick up a recent snapshot from a live broker",
                ledgers, snapshot_ledger_id
            )));
        }
        for ledger_id in ledgers {
            let reader = self.store.open_ledger(ledger_id)?;
            let last_confirmed = reader.last_confirmed()?;
            tracing::debug!(ledger_id, last_confirmed, "recovering ledger");
            if last_confirmed < 0 {
                continue;
            }
            for (offset, bytes) in reader.read(0, last_confirmed)? {
                let number = LogSequenceNumber::new(ledger_id as i64, offset);
                if number.after(skip_past) {
                    consumer(number, StatusEdit::read(&bytes)?);
                }
            }
        }
        Ok(())
    }

    fn load_latest_snapshot(&self) -> Result<BrokerStatusSnapshot> {
        let mut latest: Option<(LogSequenceNumber, PathBuf)> = None;
        let entries = fs::read_dir(&self.snapshots_directory).map_err(BrokerError::log_unavailable)?;
        for entry in entries.flatten() {
            let filename = entry.file_name().to_string_lossy().into_owned();
            if !filename.ends_with(SNAPSHOT_FILE_EXTENSION) {
                continue;
            }
            match Self::parse_snapshot_filename(&filename) {
                Some(number) => {
                    if latest.as_ref().map_or(true, |(best, _)| number.after(*best)) {
                        latest = Some((number, entry.path()));
                    }
                }
                None => {
                    tracing::warn!(%filename, "ignoring malformed snapshot filename");
                }
            }
        }
        match latest {
            Some((number, path)) => {
                let bytes = fs::read(&path).map_err(BrokerError::log_unavailable)?;
                let snapshot = BrokerStatusSnapshot::read(&bytes)?;
                self.snapshot_ledger_id
                    .store(snapshot.ledger_id, Ordering::SeqCst);
                tracing::info!(snapshot = %number, path = %path.display(), "loaded snapshot");
                Ok(snapshot)
            }
            None => {
                tracing::info!("no snapshot available, starting with a brand new status");
                self.snapshot_ledger_id.store(-1, Ordering::SeqCst);
                Ok(BrokerStatusSnapshot::empty())
            }
        }
    }

    fn checkpoint(&self, snapshot: &BrokerStatusSnapshot) -> Result<()> {
        let _guard = self.snapshot_lock.lock().expect("snapshot lock poisoned");
        let number = snapshot.sequence_number();
        let filename = format!(
            "{}_{}{}",
            number.ledger_id, number.offset, SNAPSHOT_FILE_EXTENSION
        );
        let path = self.snapshots_directory.join(&filename);
        let tmp = self.snapshots_directory.join(format!("{}.tmp", filename));
        tracing::info!(path = %path.display(), "checkpoint");
        fs::write(&tmp, snapshot.serialize()?).map_err(BrokerError::log_unavailable)?;
        fs::rename(&tmp, &path).map_err(BrokerError::log_unavailable)?;
        self.snapshot_ledger_id
            .store(snapshot.ledger_id, Ordering::SeqCst);
        self.drop_covered_prefixes(number)
    }

    fn request_leadership(&self) -> Result<()> {
        self.coordinator.request_leadership()
    }

    fn is_leader(&self) -> bool {
        !self.is_closed() && self.coordinator.is_leader()
    }

    fn follow_the_leader(
        &self,
        skip_past: LogSequenceNumber,
        consumer: EditConsumer<'_>,
    ) -> Result<()> {
        let ledgers = self.coordinator.ledgers_list()?;
        let to_read: Vec<u64> = if skip_past.ledger_id >= 0 {
            ledgers
                .into_iter()
                .filter(|id| (*id as i64) >= skip_past.ledger_id)
                .collect()
        } else {
            ledgers
        };
        let mut next_entry = skip_past.offset + 1;
        for ledger_id in to_read {
            if (ledger_id as i64) != skip_past.ledger_id {
                next_entry = 0;
            }
            let reader = self.store.open_ledger(ledger_id)?;
            let last_confirmed = reader.last_confirmed()?;
            if next_entry > last_confirmed {
                continue;
            }
            for (offset, bytes) in reader.read(next_entry, last_confirmed)? {
                let number = LogSequenceNumber::new(ledger_id as i64, offset);
                consumer(number, StatusEdit::read(&bytes)?);
            }
        }
        Ok(())
    }

    fn close(&self) {
        tracing::info!("closing replicated log");
        {
            let mut state = self.writer.lock().expect("writer lock poisoned");
            if let Some(mut writer) = state.writer.take() {
                writer.close();
            }
        }
        self.coordinator.close();
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
