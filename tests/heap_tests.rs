//! Tests for the waiting-tasks heap: group filtering, per-type capacity,
//! back-pressure and compaction behavior.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use taskmill::dispatch::{GroupMapper, TasksHeap, GROUP_ANY};
use taskmill::error::BrokerError;

const TASK_TYPE_A: i32 = 10;
const TASK_TYPE_B: i32 = 20;
const GROUP_U1: i32 = 42;
const GROUP_U2: i32 = 43;

/// Maps users "u1"/"u2" to distinct groups, everyone else to the anonymous
/// group.
struct UserGroupMapper;

impl GroupMapper for UserGroupMapper {
    fn group_for(&self, _task_id: u64, _task_type: i32, assigner_data: &str) -> i32 {
        match assigner_data {
            "u1" => GROUP_U1,
            "u2" => GROUP_U2,
            _ => GROUP_ANY,
        }
    }
}

fn any_group() -> HashSet<i32> {
    HashSet::from([GROUP_ANY])
}

#[test]
fn test_group_filter() {
    let mut heap = TasksHeap::new(16, Arc::new(UserGroupMapper));
    heap.insert(1, TASK_TYPE_A, "u1").unwrap();
    heap.insert(2, TASK_TYPE_A, "u2").unwrap();

    let mut space = HashMap::from([(TASK_TYPE_A, 10)]);
    let taken = heap.take(10, &HashSet::from([GROUP_U1]), &mut space);
    assert_eq!(taken, vec![1]);
    assert_eq!(heap.size(), 1);

    // The remaining task belongs to the other group.
    let mut space = HashMap::from([(TASK_TYPE_A, 10)]);
    let taken = heap.take(10, &HashSet::from([GROUP_U2]), &mut space);
    assert_eq!(taken, vec![2]);
}

#[test]
fn test_group_any_accepts_everything() {
    let mut heap = TasksHeap::new(16, Arc::new(UserGroupMapper));
    heap.insert(1, TASK_TYPE_A, "u1").unwrap();
    heap.insert(2, TASK_TYPE_A, "u2").unwrap();

    let mut space = HashMap::from([(TASK_TYPE_A, 10)]);
    let taken = heap.take(10, &any_group(), &mut space);
    assert_eq!(taken, vec![1, 2]);
}

#[test]
fn test_per_type_capacity_respected_exactly() {
    let mut heap = TasksHeap::new(64, Arc::new(UserGroupMapper));
    for id in 1..=5u64 {
        heap.insert(id, TASK_TYPE_A, "other").unwrap();
    }
    for id in 6..=10u64 {
        heap.insert(id, TASK_TYPE_B, "other").unwrap();
    }

    let mut space = HashMap::from([(TASK_TYPE_A, 2), (TASK_TYPE_B, 3)]);
    let taken = heap.take(100, &any_group(), &mut space);

    assert_eq!(taken.len(), 5);
    assert_eq!(taken.iter().filter(|id| **id <= 5).count(), 2);
    assert_eq!(taken.iter().filter(|id| **id > 5).count(), 3);
    assert_eq!(space[&TASK_TYPE_A], 0);
    assert_eq!(space[&TASK_TYPE_B], 0);
    assert_eq!(heap.size(), 5);
}

#[test]
fn test_type_without_space_is_skipped() {
    let mut heap = TasksHeap::new(16, Arc::new(UserGroupMapper));
    heap.insert(1, TASK_TYPE_A, "other").unwrap();
    heap.insert(2, TASK_TYPE_B, "other").unwrap();

    // No entry for TASK_TYPE_A at all: it must not be claimed.
    let mut space = HashMap::from([(TASK_TYPE_B, 5)]);
    let taken = heap.take(10, &any_group(), &mut space);
    assert_eq!(taken, vec![2]);
    assert_eq!(heap.size(), 1);
}

#[test]
fn test_heap_full_rejection() {
    let mut heap = TasksHeap::new(4, Arc::new(UserGroupMapper));
    for id in 1..=4u64 {
        heap.insert(id, TASK_TYPE_A, "other").unwrap();
    }

    let err = heap.insert(5, TASK_TYPE_A, "other").unwrap_err();
    assert!(matches!(err, BrokerError::HeapFull));
    assert_eq!(heap.size(), 4);
}

#[test]
fn test_no_task_returned_twice() {
    let mut heap = TasksHeap::new(32, Arc::new(UserGroupMapper));
    for id in 1..=20u64 {
        heap.insert(id, TASK_TYPE_A, "other").unwrap();
    }

    let mut seen = HashSet::new();
    for _ in 0..10 {
        let mut space = HashMap::from([(TASK_TYPE_A, 2)]);
        for id in heap.take(2, &any_group(), &mut space) {
            assert!(seen.insert(id), "task {} returned twice", id);
        }
    }
    assert_eq!(seen.len(), 20);
    assert_eq!(heap.size(), 0);
}

#[test]
fn test_insert_after_drain_reuses_slots() {
    let mut heap = TasksHeap::new(4, Arc::new(UserGroupMapper));
    for round in 0..5u64 {
        for offset in 1..=4u64 {
            heap.insert(round * 4 + offset, TASK_TYPE_A, "other").unwrap();
        }
        let mut space = HashMap::from([(TASK_TYPE_A, 4)]);
        let taken = heap.take(4, &any_group(), &mut space);
        assert_eq!(taken.len(), 4);
        assert_eq!(heap.size(), 0);
    }
}

#[test]
fn test_compaction_triggered_by_fragmentation() {
    let mut heap = TasksHeap::new(128, Arc::new(UserGroupMapper));
    heap.set_max_fragmentation(0.1);
    for id in 1..=100u64 {
        heap.insert(id, TASK_TYPE_A, "other").unwrap();
    }

    // Drain in small batches; holes accumulate below the insert cursor and
    // compaction must kick in without losing entries.
    let mut drained = 0;
    while heap.size() > 0 {
        let mut space = HashMap::from([(TASK_TYPE_A, 7)]);
        drained += heap.take(7, &any_group(), &mut space).len();
    }
    assert_eq!(drained, 100);
}

#[test]
fn test_scan_visits_live_entries_only() {
    let mut heap = TasksHeap::new(16, Arc::new(UserGroupMapper));
    heap.insert(1, TASK_TYPE_A, "u1").unwrap();
    heap.insert(2, TASK_TYPE_B, "u2").unwrap();
    let mut space = HashMap::from([(TASK_TYPE_A, 1)]);
    heap.take(1, &any_group(), &mut space);

    let mut entries = Vec::new();
    heap.scan(|entry| entries.push((entry.task_id, entry.task_type, entry.group_id)));
    assert_eq!(entries, vec![(2, TASK_TYPE_B, GROUP_U2)]);
}
