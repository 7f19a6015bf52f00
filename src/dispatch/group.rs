use std::sync::Arc;

use crate::error::{BrokerError, Result};

/// Group id accepted by every worker. Mappers may also return it to place a
/// task in the anonymous group.
pub const GROUP_ANY: i32 = 0;

/// Maps a task to the group of workers allowed to run it.
///
/// Must be deterministic and side-effect free: it is called under the tasks
/// heap lock and its result is baked into the heap slot at insert time.
pub trait GroupMapper: Send + Sync {
    fn group_for(&self, task_id: u64, task_type: i32, assigner_data: &str) -> i32;
}

/// Places every task in the anonymous group.
#[derive(Debug, Default)]
pub struct DefaultGroupMapper;

impl GroupMapper for DefaultGroupMapper {
    fn group_for(&self, _task_id: u64, _task_type: i32, _assigner_data: &str) -> i32 {
        GROUP_ANY
    }
}

/// Resolve the mapper named in the configuration.
pub fn resolve_group_mapper(name: &str) -> Result<Arc<dyn GroupMapper>> {
    match name {
        "default" => Ok(Arc::new(DefaultGroupMapper)),
        other => Err(BrokerError::UnknownGroupMapper(other.to_string())),
    }
}
