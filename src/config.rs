use std::time::Duration;

/// Broker runtime configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Capacity of the waiting-tasks heap.
    pub tasks_heap_size: usize,
    /// Identifier of the group mapper, resolved at startup.
    pub group_mapper: String,
    /// Interval between checkpoints of the broker status.
    pub checkpoint_time: Duration,
    /// How long finished tasks are retained before becoming purgeable.
    pub finished_tasks_retention: Duration,
    /// Interval between runs of the finished-tasks purge scheduler.
    pub finished_tasks_purge_scheduler_period: Duration,
    /// Upper bound on tasks purged in a single scheduler cycle.
    pub max_expired_tasks_per_cycle: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            tasks_heap_size: 10_000,
            group_mapper: "default".to_string(),
            checkpoint_time: Duration::from_secs(60),
            finished_tasks_retention: Duration::from_secs(10 * 60),
            finished_tasks_purge_scheduler_period: Duration::from_secs(30),
            max_expired_tasks_per_cycle: 500,
        }
    }
}

impl BrokerConfig {
    pub fn new(tasks_heap_size: usize) -> Self {
        Self {
            tasks_heap_size,
            ..Default::default()
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.finished_tasks_retention = retention;
        self
    }
}
