use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Waiting,
    Running,
    Finished,
    Error,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Finished | TaskStatus::Error)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Waiting => write!(f, "waiting"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Finished => write!(f, "finished"),
            TaskStatus::Error => write!(f, "error"),
        }
    }
}

/// A unit of work tracked by the broker.
///
/// Task ids are allocated monotonically by the leader; id 0 is reserved as
/// the empty-slot sentinel of the tasks heap, so real ids start at 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: u64,
    pub task_type: i32,
    pub user_id: String,
    pub parameter: String,
    pub created_timestamp: i64,
    pub status: TaskStatus,
    pub worker_id: Option<String>,
    pub result: Option<String>,
    pub finished_timestamp: Option<i64>,
}

impl Task {
    pub fn new(
        task_id: u64,
        task_type: i32,
        user_id: String,
        parameter: String,
        created_timestamp: i64,
    ) -> Self {
        Self {
            task_id,
            task_type,
            user_id,
            parameter,
            created_timestamp,
            status: TaskStatus::Waiting,
            worker_id: None,
            result: None,
            finished_timestamp: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Connected,
    Disconnected,
    Dead,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerState::Connected => write!(f, "connected"),
            WorkerState::Disconnected => write!(f, "disconnected"),
            WorkerState::Dead => write!(f, "dead"),
        }
    }
}

/// Broker-side record of a worker process. Created on the first
/// `WorkerConnected` edit for a given id and reused afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub worker_id: String,
    pub location: String,
    pub process_id: String,
    pub last_connection_ts: i64,
    pub state: WorkerState,
}

impl WorkerStatus {
    pub fn new(worker_id: String, location: String, process_id: String, connected_at: i64) -> Self {
        Self {
            worker_id,
            location,
            process_id,
            last_connection_ts: connected_at,
            state: WorkerState::Connected,
        }
    }
}
