use serde::{Deserialize, Serialize};

use crate::error::{BrokerError, Result};
use crate::state::task::TaskStatus;

/// One atomic mutation of the broker status.
///
/// Edits are the only way state changes: the leader appends an edit to the
/// status-changes log and applies it once the log has accepted it; followers
/// replay the same edits in the same order. All data needed by `apply` is
/// carried inside the edit (including timestamps) so replay is deterministic.
///
/// The wire encoding is tagged JSON. Unknown fields are ignored on read so
/// newer brokers can add fields without breaking older replicas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "edit", rename_all = "snake_case")]
pub enum StatusEdit {
    AddTask {
        task_id: u64,
        task_type: i32,
        user_id: String,
        parameter: String,
        created_timestamp: i64,
    },
    AssignTaskToWorker {
        task_id: u64,
        worker_id: String,
    },
    TaskFinished {
        task_id: u64,
        worker_id: String,
        status: TaskStatus,
        result: String,
        timestamp: i64,
    },
    WorkerConnected {
        worker_id: String,
        location: String,
        process_id: String,
        timestamp: i64,
    },
    WorkerDisconnected {
        worker_id: String,
        timestamp: i64,
    },
    WorkerDied {
        worker_id: String,
        timestamp: i64,
    },
    PurgeTasks {
        task_ids: Vec<u64>,
    },
}

impl StatusEdit {
    pub fn serialize(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(BrokerError::log_unavailable)
    }

    pub fn read(data: &[u8]) -> Result<StatusEdit> {
        serde_json::from_slice(data).map_err(BrokerError::log_unavailable)
    }
}

impl std::fmt::Display for StatusEdit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusEdit::AddTask {
                task_id, task_type, ..
            } => {
                write!(f, "add_task id={} type={}", task_id, task_type)
            }
            StatusEdit::AssignTaskToWorker { task_id, worker_id } => {
                write!(f, "assign_task id={} worker={}", task_id, worker_id)
            }
            StatusEdit::TaskFinished {
                task_id,
                worker_id,
                status,
                ..
            } => {
                write!(
                    f,
                    "task_finished id={} worker={} status={}",
                    task_id, worker_id, status
                )
            }
            StatusEdit::WorkerConnected { worker_id, .. } => {
                write!(f, "worker_connected {}", worker_id)
            }
            StatusEdit::WorkerDisconnected { worker_id, .. } => {
                write!(f, "worker_disconnected {}", worker_id)
            }
            StatusEdit::WorkerDied { worker_id, .. } => write!(f, "worker_died {}", worker_id),
            StatusEdit::PurgeTasks { task_ids } => {
                write!(f, "purge_tasks count={}", task_ids.len())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_every_variant() {
        let edits = vec![
            StatusEdit::AddTask {
                task_id: 1,
                task_type: 10,
                user_id: "u1".to_string(),
                parameter: "p".to_string(),
                created_timestamp: 1234,
            },
            StatusEdit::AssignTaskToWorker {
                task_id: 1,
                worker_id: "w1".to_string(),
            },
            StatusEdit::TaskFinished {
                task_id: 1,
                worker_id: "w1".to_string(),
                status: TaskStatus::Finished,
                result: "r".to_string(),
                timestamp: 2345,
            },
            StatusEdit::WorkerConnected {
                worker_id: "w1".to_string(),
                location: "host:7000".to_string(),
                process_id: "pid-9".to_string(),
                timestamp: 99,
            },
            StatusEdit::WorkerDisconnected {
                worker_id: "w1".to_string(),
                timestamp: 100,
            },
            StatusEdit::WorkerDied {
                worker_id: "w1".to_string(),
                timestamp: 101,
            },
            StatusEdit::PurgeTasks {
                task_ids: vec![1, 2, 3],
            },
        ];

        for edit in edits {
            let bytes = edit.serialize().unwrap();
            let back = StatusEdit::read(&bytes).unwrap();
            assert_eq!(edit, back);
        }
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let data = br#"{"edit":"assign_task_to_worker","task_id":7,"worker_id":"w1","future_field":true}"#;
        let edit = StatusEdit::read(data).unwrap();
        assert_eq!(
            edit,
            StatusEdit::AssignTaskToWorker {
                task_id: 7,
                worker_id: "w1".to_string(),
            }
        );
    }
}
