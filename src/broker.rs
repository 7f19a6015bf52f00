use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::config::BrokerConfig;
use crate::dispatch::{resolve_group_mapper, TasksHeap};
use crate::error::{BrokerError, Result};
use crate::log::{LeadershipListener, StatusChangesLog, StatusEdit};
use crate::state::task::TaskStatus;
use crate::state::BrokerStatus;

/// Payload handed to the transport for delivery to a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskAssignment {
    pub task_id: u64,
    pub task_type: i32,
    pub parameter: String,
}

/// Coordination point of the system: wires the replicated status, the
/// status-changes log and the waiting-tasks heap, and turns client and
/// worker requests into edits.
///
/// All mutations go through the log-then-apply path of [`BrokerStatus`]; the
/// heap is a leader-local index over the WAITING tasks, rebuilt from the
/// state machine whenever leadership is acquired.
pub struct Broker {
    config: BrokerConfig,
    log: Arc<dyn StatusChangesLog>,
    status: BrokerStatus,
    heap: Mutex<TasksHeap>,
    clock: Arc<dyn Clock>,
    writable: AtomicBool,
}

impl Broker {
    pub fn new(
        config: BrokerConfig,
        log: Arc<dyn StatusChangesLog>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let mapper = resolve_group_mapper(&config.group_mapper)?;
        Ok(Self {
            status: BrokerStatus::new(log.clone()),
            heap: Mutex::new(TasksHeap::new(config.tasks_heap_size, mapper)),
            config,
            log,
            clock,
            writable: AtomicBool::new(false),
        })
    }

    pub fn status(&self) -> &BrokerStatus {
        &self.status
    }

    pub fn is_writable(&self) -> bool {
        self.writable.load(Ordering::SeqCst)
    }

    /// Enter the election. The log reports the outcome through the
    /// leadership listener; on success the broker transitions through
    /// [`start_as_leader`](Broker::start_as_leader).
    pub fn request_leadership(&self) -> Result<()> {
        self.log.request_leadership()
    }

    /// Become the active broker: open a fresh ledger, rebuild state from the
    /// latest snapshot plus the log, rebuild the heap from the WAITING set
    /// and open for client writes.
    pub fn start_as_leader(&self) -> Result<()> {
        self.log.start_writing()?;
        self.status.recover()?;
        {
            let mut heap = self.heap.lock().expect("tasks heap lock poisoned");
            heap.clear();
            for (task_id, task_type, user_id) in self.status.waiting_tasks() {
                heap.insert(task_id, task_type, &user_id)?;
            }
        }
        self.writable.store(true, Ordering::SeqCst);
        tracing::info!(last_applied = %self.status.last_applied(), "broker is leader");
        Ok(())
    }

    /// Stop accepting mutations and drop the dispatch heap; it will be
    /// rebuilt on the next leadership acquisition.
    pub fn become_follower(&self) {
        self.writable.store(false, Ordering::SeqCst);
        self.heap.lock().expect("tasks heap lock poisoned").clear();
        tracing::info!("broker is follower");
    }

    /// Catch up with the current leader, applying every edit past the last
    /// applied sequence number. May return early; callers retry.
    pub fn follow_once(&self) -> Result<()> {
        let skip_past = self.status.last_applied();
        self.log.follow_the_leader(skip_past, &mut |sequence_number, edit| {
            self.status.apply(sequence_number, &edit);
        })
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.is_writable() {
            Ok(())
        } else {
            Err(BrokerError::NotLeader)
        }
    }

    fn on_log_failure(&self, error: &BrokerError) {
        tracing::error!(%error, "write path failed, stepping down");
        self.writable.store(false, Ordering::SeqCst);
    }

    /// Accept a task for execution. A full heap rejects the submission
    /// before anything is logged.
    ///
    /// The heap lock is held from the admission check through the insert, so
    /// concurrent submitters cannot both pass admission for the last slot:
    /// an accepted `AddTask` edit always finds room in the heap.
    pub fn submit_task(&self, task_type: i32, user_id: &str, parameter: &str) -> Result<u64> {
        self.ensure_writable()?;
        let mut heap = self.heap.lock().expect("tasks heap lock poisoned");
        if heap.is_full() {
            return Err(BrokerError::HeapFull);
        }
        let task_id = self.status.next_task_id();
        let edit = StatusEdit::AddTask {
            task_id,
            task_type,
            user_id: user_id.to_string(),
            parameter: parameter.to_string(),
            created_timestamp: self.clock.now_millis(),
        };
        self.status.apply_modification(&edit).inspect_err(|error| {
            self.on_log_failure(error);
        })?;
        heap.insert(task_id, task_type, user_id)?;
        tracing::debug!(task_id, task_type, user_id, "task submitted");
        Ok(task_id)
    }

    pub fn worker_connected(
        &self,
        worker_id: &str,
        location: &str,
        process_id: &str,
    ) -> Result<()> {
        self.ensure_writable()?;
        let edit = StatusEdit::WorkerConnected {
            worker_id: worker_id.to_string(),
            location: location.to_string(),
            process_id: process_id.to_string(),
            timestamp: self.clock.now_millis(),
        };
        self.status.apply_modification(&edit).inspect_err(|error| {
            self.on_log_failure(error);
        })?;
        tracing::info!(worker_id, location, "worker connected");
        Ok(())
    }

    pub fn worker_disconnected(&self, worker_id: &str) -> Result<()> {
        self.ensure_writable()?;
        if self.status.worker(worker_id).is_none() {
            return Err(BrokerError::WorkerNotFound(worker_id.to_string()));
        }
        let edit = StatusEdit::WorkerDisconnected {
            worker_id: worker_id.to_string(),
            timestamp: self.clock.now_millis(),
        };
        self.status.apply_modification(&edit).inspect_err(|error| {
            self.on_log_failure(error);
        })?;
        tracing::info!(worker_id, "worker disconnected");
        Ok(())
    }

    pub fn worker_died(&self, worker_id: &str) -> Result<()> {
        self.ensure_writable()?;
        if self.status.worker(worker_id).is_none() {
            return Err(BrokerError::WorkerNotFound(worker_id.to_string()));
        }
        let edit = StatusEdit::WorkerDied {
            worker_id: worker_id.to_string(),
            timestamp: self.clock.now_millis(),
        };
        self.status.apply_modification(&edit).inspect_err(|error| {
            self.on_log_failure(error);
        })?;
        tracing::warn!(worker_id, "worker declared dead");
        Ok(())
    }

    /// Answer a worker capacity query: claim up to `max` waiting tasks the
    /// worker's groups accept, within its per-type space, and record one
    /// assignment edit per claimed task.
    pub fn assign_tasks(
        &self,
        worker_id: &str,
        max: usize,
        groups: &HashSet<i32>,
        available_space: &mut HashMap<i32, i32>,
    ) -> Result<Vec<TaskAssignment>> {
        self.ensure_writable()?;
        if self.status.worker(worker_id).is_none() {
            return Err(BrokerError::WorkerNotFound(worker_id.to_string()));
        }
        let taken = self
            .heap
            .lock()
            .expect("tasks heap lock poisoned")
            .take(max, groups, available_space);
        let mut assignments = Vec::with_capacity(taken.len());
        for task_id in taken {
            let edit = StatusEdit::AssignTaskToWorker {
                task_id,
                worker_id: worker_id.to_string(),
            };
            self.status.apply_modification(&edit).inspect_err(|error| {
                self.on_log_failure(error);
            })?;
            let task = self
                .status
                .task(task_id)
                .ok_or_else(|| BrokerError::TaskNotFound(task_id))?;
            assignments.push(TaskAssignment {
                task_id,
                task_type: task.task_type,
                parameter: task.parameter,
            });
        }
        if !assignments.is_empty() {
            tracing::debug!(worker_id, count = assignments.len(), "tasks assigned");
        }
        Ok(assignments)
    }

    /// Record the outcome a worker reported for one of its tasks.
    pub fn task_finished(
        &self,
        task_id: u64,
        worker_id: &str,
        status: TaskStatus,
        result: &str,
    ) -> Result<()> {
        self.ensure_writable()?;
        if !status.is_terminal() {
            return Err(BrokerError::InvalidRequest(format!(
                "task outcome must be terminal, got {}",
                status
            )));
        }
        let task = self
            .status
            .task(task_id)
            .ok_or(BrokerError::TaskNotFound(task_id))?;
        if task.worker_id.as_deref() != Some(worker_id) {
            return Err(BrokerError::InvalidRequest(format!(
                "task {} is not assigned to worker {}",
                task_id, worker_id
            )));
        }
        if task.status != TaskStatus::Running {
            return Err(BrokerError::InvalidRequest(format!(
                "task {} is not running ({})",
                task_id, task.status
            )));
        }
        let edit = StatusEdit::TaskFinished {
            task_id,
            worker_id: worker_id.to_string(),
            status,
            result: result.to_string(),
            timestamp: self.clock.now_millis(),
        };
        self.status.apply_modification(&edit).inspect_err(|error| {
            self.on_log_failure(error);
        })?;
        tracing::debug!(task_id, worker_id, %status, "task finished");
        Ok(())
    }

    /// Capture a consistent snapshot and hand it to the log. On failure the
    /// snapshot is discarded; the next cycle retries.
    pub fn checkpoint(&self) -> Result<()> {
        let snapshot = self.status.snapshot();
        self.log.checkpoint(&snapshot)
    }

    /// Purge finished tasks whose retention expired, through a single
    /// `PurgeTasks` edit so followers converge by replay. Returns the number
    /// of purged tasks.
    pub fn purge_expired_tasks(&self) -> Result<usize> {
        if !self.is_writable() {
            return Ok(0);
        }
        let now = self.clock.now_millis();
        let task_ids = self.status.expired_finished_tasks(
            now,
            self.config.finished_tasks_retention.as_millis() as i64,
            self.config.max_expired_tasks_per_cycle,
        );
        if task_ids.is_empty() {
            return Ok(0);
        }
        let purged = task_ids.len();
        let edit = StatusEdit::PurgeTasks { task_ids };
        self.status.apply_modification(&edit).inspect_err(|error| {
            self.on_log_failure(error);
        })?;
        tracing::info!(purged, "expired tasks purged");
        Ok(purged)
    }

    /// Live heap entries as `(task_id, task_type, group_id)`, for admin
    /// diagnostics.
    pub fn heap_entries(&self) -> Vec<(u64, i32, i32)> {
        let heap = self.heap.lock().expect("tasks heap lock poisoned");
        let mut entries = Vec::with_capacity(heap.size());
        heap.scan(|entry| entries.push((entry.task_id, entry.task_type, entry.group_id)));
        entries
    }

    /// Spawn the checkpoint and purge schedulers. They run until the token
    /// is cancelled; both are leader-side no-ops while following.
    pub fn run_schedulers(self: &Arc<Self>, shutdown: CancellationToken) {
        let broker = self.clone();
        let token = shutdown.clone();
        let checkpoint_time = self.config.checkpoint_time;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(checkpoint_time);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if broker.is_writable() {
                            if let Err(error) = broker.checkpoint() {
                                tracing::error!(%error, "checkpoint failed");
                            }
                        }
                    }
                }
            }
        });

        let broker = self.clone();
        let purge_period = self.config.finished_tasks_purge_scheduler_period;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(purge_period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(error) = broker.purge_expired_tasks() {
                            tracing::error!(%error, "purge cycle failed");
                        }
                    }
                }
            }
        });
    }

    pub fn close(&self) {
        self.writable.store(false, Ordering::SeqCst);
        self.log.close();
    }
}

/// Leadership listener handed to the log at construction time.
///
/// The log must not hold a reference back to the broker (the broker already
/// owns the log), so the adapter starts empty and is bound to the broker
/// once both exist.
#[derive(Default)]
pub struct BrokerLeadershipListener {
    broker: OnceLock<Weak<Broker>>,
}

impl BrokerLeadershipListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn bind(&self, broker: &Arc<Broker>) {
        if self.broker.set(Arc::downgrade(broker)).is_err() {
            tracing::warn!("leadership listener already bound");
        }
    }

    fn with_broker(&self, f: impl FnOnce(&Broker)) {
        if let Some(broker) = self.broker.get().and_then(Weak::upgrade) {
            f(&broker);
        }
    }
}

impl LeadershipListener for BrokerLeadershipListener {
    fn leadership_acquired(&self) {
        self.with_broker(|broker| {
            if let Err(error) = broker.start_as_leader() {
                tracing::error!(%error, "could not take leadership, stepping down");
                broker.become_follower();
            }
        });
    }

    fn leadership_lost(&self) {
        self.with_broker(Broker::become_follower);
    }
}
