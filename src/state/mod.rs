pub mod snapshot;
pub mod status;
pub mod task;

pub use snapshot::BrokerStatusSnapshot;
pub use status::{BrokerStatus, ModificationResult};
pub use task::{Task, TaskStatus, WorkerState, WorkerStatus};
