//! Hidden `sandstorm worker`: one process's share of a fanned-out batch

use anyhow::{Context, Result};
use sandstorm_config::ConfigLoader;
use sandstorm_execution::{
    build_worker_runtime, BatchScheduler, BlockingPool, ResourceRegistry, SchedulerPlan,
    UnitEnvironment, UnitSettings,
};
use sandstorm_logging::{init_batch_logging, ConsoleTarget};
use sandstorm_resilience::ShutdownSupervisor;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;

use super::{collaborators, CleanupGuard};
use crate::cli::WorkerArgs;

pub fn run(log_level: Option<&str>, args: &WorkerArgs) -> Result<ExitCode> {
    let config = ConfigLoader::from_snapshot(&args.config_snapshot).with_context(|| {
        format!(
            "Failed to load config snapshot {}",
            args.config_snapshot.display()
        )
    })?;
    let worker_id = config
        .worker
        .as_ref()
        .map(|assignment| assignment.worker_id)
        .context("Config snapshot carries no worker assignment")?;

    let _log_guard = init_batch_logging(
        &config.logging,
        log_level,
        Some(&args.output_dir),
        ConsoleTarget::Stderr,
    )?;

    let pool_size = config.batch.effective_thread_pool_size();
    let runtime = build_worker_runtime(pool_size).context("Failed to build runtime")?;

    let supervisor = Arc::new(ShutdownSupervisor::new());
    let registry = Arc::new(ResourceRegistry::new());
    supervisor.attach_resources(registry.clone());
    let _cleanup = CleanupGuard::new(supervisor.clone());

    let (provider, drivers) = collaborators(&config)?;
    let env = UnitEnvironment {
        provider,
        drivers,
        registry,
        pool: BlockingPool::new(pool_size),
        settings: Arc::new(UnitSettings::from_config(&config)),
    };
    let plan = SchedulerPlan {
        worker_id: Some(worker_id),
        unit_offset: args.unit_offset,
        unit_count: args.unit_count,
        directory: args.output_dir.clone(),
    };
    let scheduler = BatchScheduler::new(env, plan, &config);

    let run = runtime.block_on(async {
        supervisor.spawn_signal_listener();
        scheduler.run().await
    })?;
    info!(
        "Worker {} finished: {}/{} sandbox(es) succeeded",
        worker_id, run.report.summary.successful_sandboxes, run.report.summary.total_sandboxes
    );
    Ok(ExitCode::SUCCESS)
}
