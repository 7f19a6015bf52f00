//! Tests for the in-memory status-changes log: write gating, sequence
//! allocation and checkpoint truncation.

use taskmill::error::BrokerError;
use taskmill::log::memory::MemoryLog;
use taskmill::log::sequence::LogSequenceNumber;
use taskmill::log::{StatusChangesLog, StatusEdit};
use taskmill::state::snapshot::BrokerStatusSnapshot;

fn sample_edit(task_id: u64) -> StatusEdit {
    StatusEdit::AddTask {
        task_id,
        task_type: 10,
        user_id: "u1".to_string(),
        parameter: "p".to_string(),
        created_timestamp: 1_000,
    }
}

#[test]
fn test_append_requires_start_writing() {
    let log = MemoryLog::new();
    let err = log.append(&sample_edit(1)).unwrap_err();
    assert!(matches!(err, BrokerError::LogUnavailable(_)));
    assert!(!log.is_writable());

    log.start_writing().unwrap();
    assert!(log.is_writable());
    log.append(&sample_edit(1)).unwrap();
}

#[test]
fn test_sequence_numbers_strictly_increase() {
    let log = MemoryLog::new();
    log.start_writing().unwrap();

    let mut previous = LogSequenceNumber::START;
    for task_id in 1..=10u64 {
        let number = log.append(&sample_edit(task_id)).unwrap();
        assert!(number.after(previous));
        previous = number;
    }
}

#[test]
fn test_checkpoint_truncates_covered_prefix() {
    let log = MemoryLog::new();
    log.start_writing().unwrap();

    for task_id in 1..=5u64 {
        log.append(&sample_edit(task_id)).unwrap();
    }
    assert_eq!(log.lines().len(), 5);

    let mut snapshot = BrokerStatusSnapshot::empty();
    let third = log.lines()[2].sequence_number;
    snapshot.ledger_id = third.ledger_id;
    snapshot.offset = third.offset;
    log.checkpoint(&snapshot).unwrap();

    let remaining = log.lines();
    assert_eq!(remaining.len(), 2);
    assert!(remaining
        .iter()
        .all(|line| line.sequence_number.after(third)));
}

#[test]
fn test_recovery_skips_past_snapshot() {
    let seeded = MemoryLog::new();
    seeded.start_writing().unwrap();
    for task_id in 1..=4u64 {
        seeded.append(&sample_edit(task_id)).unwrap();
    }
    let skip_past = seeded.lines()[1].sequence_number;

    let log = MemoryLog::with_boot_data(seeded.lines(), BrokerStatusSnapshot::empty());
    let mut replayed = Vec::new();
    log.recover(skip_past, &mut |number, edit| {
        replayed.push((number, edit));
    })
    .unwrap();

    assert_eq!(replayed.len(), 2);
    assert!(replayed.iter().all(|(number, _)| number.after(skip_past)));

    // The boot journal is consumed: a second recovery replays nothing.
    let mut second = 0;
    log.recover(LogSequenceNumber::START, &mut |_, _| second += 1)
        .unwrap();
    assert_eq!(second, 0);
}

#[test]
fn test_appends_resume_past_boot_snapshot() {
    let mut snapshot = BrokerStatusSnapshot::empty();
    snapshot.ledger_id = 1;
    snapshot.offset = 5;
    let boot_sequence = snapshot.sequence_number();

    let log = MemoryLog::with_boot_data(Vec::new(), snapshot);
    log.start_writing().unwrap();
    let number = log.append(&sample_edit(1)).unwrap();
    assert!(number.after(boot_sequence));
}

#[test]
fn test_closed_log_rejects_writes() {
    let log = MemoryLog::new();
    log.start_writing().unwrap();
    log.append(&sample_edit(1)).unwrap();

    log.close();
    assert!(log.is_closed());
    assert!(!log.is_writable());
    let err = log.append(&sample_edit(2)).unwrap_err();
    assert!(matches!(err, BrokerError::LogUnavailable(_)));
}

#[test]
fn test_empty_snapshot_at_boot() {
    let log = MemoryLog::new();
    let snapshot = log.load_latest_snapshot().unwrap();
    assert_eq!(snapshot.sequence_number(), LogSequenceNumber::START);
    assert!(snapshot.tasks.is_empty());
    assert!(snapshot.workers.is_empty());
}
