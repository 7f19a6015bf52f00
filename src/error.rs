use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("status changes log unavailable: {0}")]
    LogUnavailable(String),

    #[error("tasks heap is full")]
    HeapFull,

    #[error("not the leader")]
    NotLeader,

    #[error("task not found: {0}")]
    TaskNotFound(u64),

    #[error("worker not found: {0}")]
    WorkerNotFound(String),

    #[error("unknown group mapper: {0}")]
    UnknownGroupMapper(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl BrokerError {
    /// Wrap any storage or coordination failure as a log-unavailable error.
    pub fn log_unavailable(err: impl std::fmt::Display) -> Self {
        BrokerError::LogUnavailable(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;
