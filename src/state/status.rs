use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::error::Result;
use crate::log::sequence::LogSequenceNumber;
use crate::log::{StatusChangesLog, StatusEdit};
use crate::state::snapshot::BrokerStatusSnapshot;
use crate::state::task::{Task, TaskStatus, WorkerState, WorkerStatus};

/// Outcome of a successfully logged and applied edit.
#[derive(Debug, Clone, Copy)]
pub struct ModificationResult {
    pub sequence_number: LogSequenceNumber,
    pub new_task_id: Option<u64>,
}

/// Replicated status of the broker.
///
/// Every replica, leader or follower, holds a copy of this state and reaches
/// it by applying the same edits in the same order. The leader mutates
/// through [`apply_modification`](BrokerStatus::apply_modification), which
/// appends to the status-changes log first and applies only after the log
/// accepted the edit; followers replay the log and call the same internal
/// apply.
pub struct BrokerStatus {
    inner: RwLock<StatusInner>,
    next_task_id: AtomicU64,
    log: Arc<dyn StatusChangesLog>,
}

struct StatusInner {
    tasks: HashMap<u64, Task>,
    workers: HashMap<String, WorkerStatus>,
    max_task_id: u64,
    last_applied: LogSequenceNumber,
}

impl BrokerStatus {
    pub fn new(log: Arc<dyn StatusChangesLog>) -> Self {
        Self {
            inner: RwLock::new(StatusInner {
                tasks: HashMap::new(),
                workers: HashMap::new(),
                max_task_id: 0,
                last_applied: LogSequenceNumber::START,
            }),
            next_task_id: AtomicU64::new(1),
            log,
        }
    }

    /// Allocate a fresh task id. Leader-only; ids never repeat because the
    /// counter restarts above `max_task_id` on recovery.
    pub fn next_task_id(&self) -> u64 {
        self.next_task_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Log the edit, then apply it. The append happens with no state lock
    /// held; if it fails nothing is mutated and the caller sees
    /// `LogUnavailable`.
    pub fn apply_modification(&self, edit: &StatusEdit) -> Result<ModificationResult> {
        let sequence_number = self.log.append(edit)?;
        Ok(self.apply(sequence_number, edit))
    }

    /// Apply an edit the log has already accepted.
    ///
    /// This cannot fail: a failure here means this replica has diverged from
    /// the log and the process must die, so inconsistencies panic.
    pub(crate) fn apply(
        &self,
        sequence_number: LogSequenceNumber,
        edit: &StatusEdit,
    ) -> ModificationResult {
        tracing::trace!(seq = %sequence_number, %edit, "apply");
        let mut inner = self.inner.write().expect("broker status lock poisoned");
        if !sequence_number.after(inner.last_applied) {
            panic!(
                "non-monotone apply: {} after {}",
                sequence_number, inner.last_applied
            );
        }
        inner.last_applied = sequence_number;
        let mut new_task_id = None;
        match edit {
            StatusEdit::AddTask {
                task_id,
                task_type,
                user_id,
                parameter,
                created_timestamp,
            } => {
                let task = Task::new(
                    *task_id,
                    *task_type,
                    user_id.clone(),
                    parameter.clone(),
                    *created_timestamp,
                );
                inner.max_task_id = inner.max_task_id.max(*task_id);
                inner.tasks.insert(*task_id, task);
                new_task_id = Some(*task_id);
            }
            StatusEdit::AssignTaskToWorker { task_id, worker_id } => {
                let task = inner
                    .tasks
                    .get_mut(task_id)
                    .unwrap_or_else(|| panic!("assign of unknown task {}", task_id));
                if task.status != TaskStatus::Waiting {
                    panic!(
                        "assign of task {} in status {}, expected waiting",
                        task_id, task.status
                    );
                }
                task.status = TaskStatus::Running;
                task.worker_id = Some(worker_id.clone());
            }
            StatusEdit::TaskFinished {
                task_id,
                worker_id,
                status,
                result,
                timestamp,
            } => {
                let task = inner
                    .tasks
                    .get_mut(task_id)
                    .unwrap_or_else(|| panic!("finish of unknown task {}", task_id));
                if task.worker_id.as_deref() != Some(worker_id.as_str()) {
                    panic!(
                        "task {}, bad worker {}, expected {:?}",
                        task_id, worker_id, task.worker_id
                    );
                }
                if !status.is_terminal() {
                    panic!("finish of task {} with non-terminal status {}", task_id, status);
                }
                task.status = *status;
                task.result = Some(result.clone());
                task.finished_timestamp = Some(*timestamp);
            }
            StatusEdit::WorkerConnected {
                worker_id,
                location,
                process_id,
                timestamp,
            } => {
                let worker = inner
                    .workers
                    .entry(worker_id.clone())
                    .or_insert_with(|| {
                        WorkerStatus::new(
                            worker_id.clone(),
                            location.clone(),
                            process_id.clone(),
                            *timestamp,
                        )
                    });
                worker.state = WorkerState::Connected;
                worker.location = location.clone();
                worker.process_id = process_id.clone();
                worker.last_connection_ts = *timestamp;
            }
            StatusEdit::WorkerDisconnected { worker_id, .. } => {
                let worker = inner
                    .workers
                    .get_mut(worker_id)
                    .unwrap_or_else(|| panic!("disconnect of unknown worker {}", worker_id));
                worker.state = WorkerState::Disconnected;
            }
            StatusEdit::WorkerDied { worker_id, .. } => {
                let worker = inner
                    .workers
                    .get_mut(worker_id)
                    .unwrap_or_else(|| panic!("death of unknown worker {}", worker_id));
                worker.state = WorkerState::Dead;
            }
            StatusEdit::PurgeTasks { task_ids } => {
                for task_id in task_ids {
                    match inner.tasks.remove(task_id) {
                        Some(task) if task.status.is_terminal() => {}
                        Some(task) => {
                            panic!("purge of task {} in status {}", task_id, task.status)
                        }
                        None => panic!("purge of unknown task {}", task_id),
                    }
                }
            }
        }
        ModificationResult {
            sequence_number,
            new_task_id,
        }
    }

    /// Rebuild state from the latest snapshot plus the log suffix, then
    /// restart the task id allocator above every id ever seen.
    pub fn recover(&self) -> Result<()> {
        let snapshot = self.log.load_latest_snapshot()?;
        let skip_past = snapshot.sequence_number();
        {
            let mut inner = self.inner.write().expect("broker status lock poisoned");
            inner.tasks = snapshot
                .tasks
                .into_iter()
                .map(|task| (task.task_id, task))
                .collect();
            inner.workers = snapshot
                .workers
                .into_iter()
                .map(|worker| (worker.worker_id.clone(), worker))
                .collect();
            inner.max_task_id = snapshot.max_task_id;
            inner.last_applied = skip_past;
        }
        self.log.recover(skip_past, &mut |sequence_number, edit| {
            self.apply(sequence_number, &edit);
        })?;
        let max_task_id = self.inner.read().expect("broker status lock poisoned").max_task_id;
        self.next_task_id.store(max_task_id + 1, Ordering::SeqCst);
        tracing::info!(max_task_id, last_applied = %self.last_applied(), "recovery complete");
        Ok(())
    }

    /// Consistent copy of the whole state for checkpointing. Entries are
    /// ordered by id so the serialized form is identical on every replica.
    pub fn snapshot(&self) -> BrokerStatusSnapshot {
        let inner = self.inner.read().expect("broker status lock poisoned");
        let mut tasks: Vec<Task> = inner.tasks.values().cloned().collect();
        tasks.sort_by_key(|task| task.task_id);
        let mut workers: Vec<WorkerStatus> = inner.workers.values().cloned().collect();
        workers.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        BrokerStatusSnapshot {
            ledger_id: inner.last_applied.ledger_id,
            offset: inner.last_applied.offset,
            max_task_id: inner.max_task_id,
            tasks,
            workers,
        }
    }

    pub fn last_applied(&self) -> LogSequenceNumber {
        self.inner.read().expect("broker status lock poisoned").last_applied
    }

    pub fn task(&self, task_id: u64) -> Option<Task> {
        self.inner
            .read()
            .expect("broker status lock poisoned")
            .tasks
            .get(&task_id)
            .cloned()
    }

    pub fn all_tasks(&self) -> Vec<Task> {
        let inner = self.inner.read().expect("broker status lock poisoned");
        let mut tasks: Vec<Task> = inner.tasks.values().cloned().collect();
        tasks.sort_by_key(|task| task.task_id);
        tasks
    }

    pub fn worker(&self, worker_id: &str) -> Option<WorkerStatus> {
        self.inner
            .read()
            .expect("broker status lock poisoned")
            .workers
            .get(worker_id)
            .cloned()
    }

    pub fn all_workers(&self) -> Vec<WorkerStatus> {
        let inner = self.inner.read().expect("broker status lock poisoned");
        let mut workers: Vec<WorkerStatus> = inner.workers.values().cloned().collect();
        workers.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        workers
    }

    /// Waiting tasks as `(id, type, user)` triples ordered by id, used to
    /// rebuild the dispatch heap when leadership is acquired.
    pub fn waiting_tasks(&self) -> Vec<(u64, i32, String)> {
        let inner = self.inner.read().expect("broker status lock poisoned");
        let mut waiting: Vec<(u64, i32, String)> = inner
            .tasks
            .values()
            .filter(|task| task.status == TaskStatus::Waiting)
            .map(|task| (task.task_id, task.task_type, task.user_id.clone()))
            .collect();
        waiting.sort_by_key(|(task_id, _, _)| *task_id);
        waiting
    }

    /// Terminal tasks whose retention expired, oldest first, capped at `max`.
    pub fn expired_finished_tasks(&self, now: i64, retention_millis: i64, max: usize) -> Vec<u64> {
        let inner = self.inner.read().expect("broker status lock poisoned");
        let mut expired: Vec<(i64, u64)> = inner
            .tasks
            .values()
            .filter(|task| task.status.is_terminal())
            .filter_map(|task| {
                let finished = task.finished_timestamp?;
                (finished + retention_millis <= now).then_some((finished, task.task_id))
            })
            .collect();
        expired.sort_unstable();
        expired.truncate(max);
        expired.into_iter().map(|(_, task_id)| task_id).collect()
    }
}
