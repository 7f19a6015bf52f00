use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::dispatch::group::{GroupMapper, GROUP_ANY};
use crate::error::{BrokerError, Result};

/// One heap slot. `task_id == 0` marks an empty slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskEntry {
    pub task_id: u64,
    pub task_type: i32,
    pub group_id: i32,
}

const EMPTY: TaskEntry = TaskEntry {
    task_id: 0,
    task_type: 0,
    group_id: 0,
};

/// Bounded buffer of waiting tasks, optimized for group-aware batched take.
///
/// A fixed array of slots with two cursors: `insert_pos` probes linearly
/// (wrapping) for the next free slot, and a rotating take cursor spreads
/// batch scans across the array. Taking tasks leaves holes; once the ratio
/// of holes left of `insert_pos` to the live size passes the fragmentation
/// threshold the live entries are stable-packed to the left, keeping scans
/// cheap without per-insert rebalancing.
///
/// The heap holds exactly the WAITING tasks that are not claimed by an
/// in-flight assignment batch. Group ids are computed once, at insert, by
/// the configured [`GroupMapper`].
pub struct TasksHeap {
    slots: Vec<TaskEntry>,
    size: usize,
    insert_pos: usize,
    take_cursor: usize,
    fragmentation: usize,
    max_fragmentation: f64,
    mapper: Arc<dyn GroupMapper>,
}

impl TasksHeap {
    pub fn new(capacity: usize, mapper: Arc<dyn GroupMapper>) -> Self {
        Self {
            slots: vec![EMPTY; capacity],
            size: 0,
            insert_pos: 0,
            take_cursor: 0,
            fragmentation: 0,
            max_fragmentation: 0.25,
            mapper,
        }
    }

    /// Compact once the ratio of slots freed below the insert cursor to the
    /// live size exceeds `threshold`.
    pub fn set_max_fragmentation(&mut self, threshold: f64) {
        self.max_fragmentation = threshold;
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_full(&self) -> bool {
        self.size == self.slots.len()
    }

    /// Place a waiting task into the heap.
    pub fn insert(&mut self, task_id: u64, task_type: i32, user_id: &str) -> Result<()> {
        if self.is_full() {
            return Err(BrokerError::HeapFull);
        }
        let group_id = self.mapper.group_for(task_id, task_type, user_id);
        let capacity = self.slots.len();
        loop {
            let pos = self.insert_pos;
            self.insert_pos = (self.insert_pos + 1) % capacity;
            if self.slots[pos].task_id == 0 {
                self.slots[pos] = TaskEntry {
                    task_id,
                    task_type,
                    group_id,
                };
                self.size += 1;
                return Ok(());
            }
        }
    }

    /// Claim up to `max` tasks whose group is accepted and whose type still
    /// has space, consuming `available_space` as tasks are picked.
    ///
    /// Scans at most one full pass from the rotating cursor. Deterministic
    /// given heap contents, cursor, `groups` and `available_space`.
    pub fn take(
        &mut self,
        max: usize,
        groups: &HashSet<i32>,
        available_space: &mut HashMap<i32, i32>,
    ) -> Vec<u64> {
        let capacity = self.slots.len();
        let accept_any = groups.contains(&GROUP_ANY);
        let mut taken = Vec::new();
        let start = self.take_cursor;
        for step in 0..capacity {
            if taken.len() >= max {
                break;
            }
            let pos = (start + step) % capacity;
            let entry = self.slots[pos];
            if entry.task_id == 0 {
                continue;
            }
            if !accept_any && !groups.contains(&entry.group_id) {
                continue;
            }
            let Some(space) = available_space.get_mut(&entry.task_type) else {
                continue;
            };
            if *space <= 0 {
                continue;
            }
            *space -= 1;
            self.slots[pos] = EMPTY;
            self.size -= 1;
            if pos < self.insert_pos {
                self.fragmentation += 1;
            }
            self.take_cursor = (pos + 1) % capacity;
            taken.push(entry.task_id);
        }
        if self.over_fragmented() {
            self.compact();
        }
        taken
    }

    fn over_fragmented(&self) -> bool {
        if self.fragmentation == 0 {
            return false;
        }
        if self.size == 0 {
            return true;
        }
        self.fragmentation as f64 / self.size as f64 > self.max_fragmentation
    }

    /// Visit every live entry, for diagnostics.
    pub fn scan(&self, mut visitor: impl FnMut(&TaskEntry)) {
        for entry in &self.slots {
            if entry.task_id != 0 {
                visitor(entry);
            }
        }
    }

    /// Drop every entry. Used when leadership is lost and the heap will be
    /// rebuilt from the state machine on the next acquisition.
    pub fn clear(&mut self) {
        self.slots.fill(EMPTY);
        self.size = 0;
        self.insert_pos = 0;
        self.take_cursor = 0;
        self.fragmentation = 0;
    }

    fn compact(&mut self) {
        let mut write = 0;
        for read in 0..self.slots.len() {
            if self.slots[read].task_id != 0 {
                self.slots.swap(read, write);
                write += 1;
            }
        }
        debug_assert_eq!(write, self.size);
        self.insert_pos = self.size % self.slots.len();
        self.take_cursor = 0;
        self.fragmentation = 0;
        tracing::debug!(size = self.size, "tasks heap compacted");
    }
}
