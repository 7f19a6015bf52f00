use serde::{Deserialize, Serialize};

use crate::error::{BrokerError, Result};
use crate::log::sequence::LogSequenceNumber;
use crate::state::task::{Task, WorkerStatus};

/// Durable full-state checkpoint of the broker status.
///
/// Holds everything needed to rehydrate a replica without replaying the
/// whole log: all tasks, all workers, the highest task id ever allocated and
/// the sequence number of the last edit included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerStatusSnapshot {
    pub ledger_id: i64,
    pub offset: i64,
    pub max_task_id: u64,
    pub tasks: Vec<Task>,
    pub workers: Vec<WorkerStatus>,
}

impl BrokerStatusSnapshot {
    /// Snapshot of a broker that has never applied an edit.
    pub fn empty() -> Self {
        Self {
            ledger_id: -1,
            offset: -1,
            max_task_id: 0,
            tasks: Vec::new(),
            workers: Vec::new(),
        }
    }

    pub fn sequence_number(&self) -> LogSequenceNumber {
        LogSequenceNumber::new(self.ledger_id, self.offset)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(BrokerError::log_unavailable)
    }

    pub fn read(data: &[u8]) -> Result<BrokerStatusSnapshot> {
        serde_json::from_slice(data).map_err(BrokerError::log_unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::task::{TaskStatus, WorkerState};

    #[test]
    fn test_empty_snapshot_precedes_all_edits() {
        let snapshot = BrokerStatusSnapshot::empty();
        assert_eq!(snapshot.sequence_number(), LogSequenceNumber::START);
        assert!(LogSequenceNumber::new(0, 0).after(snapshot.sequence_number()));
    }

    #[test]
    fn test_round_trip() {
        let mut snapshot = BrokerStatusSnapshot::empty();
        snapshot.ledger_id = 3;
        snapshot.offset = 42;
        snapshot.max_task_id = 7;
        snapshot.tasks.push(Task {
            task_id: 7,
            task_type: 10,
            user_id: "u1".to_string(),
            parameter: "p".to_string(),
            created_timestamp: 1234,
            status: TaskStatus::Running,
            worker_id: Some("w1".to_string()),
            result: None,
            finished_timestamp: None,
        });
        snapshot.workers.push(WorkerStatus {
            worker_id: "w1".to_string(),
            location: "host:7000".to_string(),
            process_id: "pid-1".to_string(),
            last_connection_ts: 55,
            state: WorkerState::Connected,
        });

        let bytes = snapshot.serialize().unwrap();
        let back = BrokerStatusSnapshot::read(&bytes).unwrap();
        assert_eq!(snapshot, back);
    }
}
