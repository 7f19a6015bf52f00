use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use taskmill::broker::Broker;
use taskmill::clock::SystemClock;
use taskmill::config::BrokerConfig;
use taskmill::log::{MemoryLog, StatusChangesLog};
use taskmill::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "taskmill")]
#[command(about = "A replicated task-dispatch broker")]
struct Args {
    /// Capacity of the waiting-tasks heap
    #[arg(long, default_value = "10000")]
    tasks_heap_size: usize,

    /// Seconds between checkpoints of the broker status
    #[arg(long, default_value = "60")]
    checkpoint_secs: u64,

    /// Seconds a finished task is retained before it becomes purgeable
    #[arg(long, default_value = "600")]
    finished_tasks_retention_secs: u64,

    /// Seconds between purge scheduler cycles
    #[arg(long, default_value = "30")]
    purge_period_secs: u64,

    /// Upper bound on tasks purged per cycle
    #[arg(long, default_value = "500")]
    max_expired_tasks_per_cycle: usize,

    /// Group mapper identifier
    #[arg(long, default_value = "default")]
    group_mapper: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = BrokerConfig {
        tasks_heap_size: args.tasks_heap_size,
        group_mapper: args.group_mapper,
        checkpoint_time: Duration::from_secs(args.checkpoint_secs),
        finished_tasks_retention: Duration::from_secs(args.finished_tasks_retention_secs),
        finished_tasks_purge_scheduler_period: Duration::from_secs(args.purge_period_secs),
        max_expired_tasks_per_cycle: args.max_expired_tasks_per_cycle,
        ..Default::default()
    };

    tracing::info!(
        tasks_heap_size = config.tasks_heap_size,
        checkpoint_secs = args.checkpoint_secs,
        "starting taskmill broker (single-node)"
    );

    // Single-node mode: the in-process log, always the leader.
    let log: Arc<dyn StatusChangesLog> = Arc::new(MemoryLog::new());
    log.request_leadership()?;

    let broker = Arc::new(Broker::new(config, log, Arc::new(SystemClock))?);
    broker.start_as_leader()?;

    let shutdown = install_shutdown_handler();
    broker.run_schedulers(shutdown.clone());

    shutdown.cancelled().await;
    broker.close();
    tracing::info!("broker stopped");

    Ok(())
}
