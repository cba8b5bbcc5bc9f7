//! `sandstorm batch`: single-process run or fan-out coordinator

use anyhow::{Context, Result};
use chrono::Local;
use sandstorm_config::{ConfigLoader, ProviderKind, SandstormConfig};
use sandstorm_execution::store::task_dir_name;
use sandstorm_execution::{
    build_coordinator_runtime, build_worker_runtime, BatchScheduler, BlockingPool,
    CurrentExeLauncher, FanOutCoordinator, ResourceRegistry, SchedulerPlan, UnitEnvironment,
    UnitSettings,
};
use sandstorm_logging::{init_batch_logging, ConsoleTarget};
use sandstorm_resilience::ShutdownSupervisor;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};

use super::{collaborators, CleanupGuard};
use crate::cli::BatchArgs;

/// Load the configuration and fold the command-line flags into it
fn resolve_config(config_path: Option<&Path>, args: &BatchArgs) -> Result<SandstormConfig> {
    let mut config = ConfigLoader::new().load_raw(config_path)?;

    if let Some(units) = args.units {
        config.batch.unit_count = units;
    }
    if let Some(processes) = args.processes {
        config.batch.process_count = processes;
    }
    if let Some(size) = args.thread_pool_size {
        config.batch.thread_pool_size = Some(size);
    }
    if args.use_pre_mounted_assets {
        config.batch.use_pre_mounted_assets = true;
    }
    if let Some(dir) = &args.output_dir {
        config.output.directory = dir.clone();
    }
    if args.simulate {
        config.provider.kind = ProviderKind::Simulated;
    }
    config.worker = None;

    config.validate_all()?;
    Ok(config)
}

fn create_task_dir(config: &SandstormConfig) -> Result<PathBuf> {
    let name = task_dir_name(
        config.batch.unit_count,
        config.batch.effective_process_count(),
        Local::now(),
    );
    let task_dir = config.output.directory.join(name);
    std::fs::create_dir_all(&task_dir)
        .with_context(|| format!("Failed to create task directory {}", task_dir.display()))?;
    Ok(task_dir)
}

pub fn run(config_path: Option<&Path>, log_level: Option<&str>, args: &BatchArgs) -> Result<ExitCode> {
    let config = resolve_config(config_path, args)?;
    let task_dir = create_task_dir(&config)?;
    let _log_guard = init_batch_logging(&config.logging, log_level, Some(&task_dir), ConsoleTarget::Stdout)?;

    for warning in config.warnings() {
        warn!("{}", warning);
    }
    info!(
        "Batch of {} unit(s) across {} process(es), output in {}",
        config.batch.unit_count,
        config.batch.effective_process_count(),
        task_dir.display()
    );

    if config.is_sole_process() {
        run_single_process(config, task_dir)
    } else {
        run_coordinator(config, task_dir, log_level)
    }?;
    Ok(ExitCode::SUCCESS)
}

fn run_single_process(config: SandstormConfig, task_dir: PathBuf) -> Result<()> {
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
        worker_id: None,
        unit_offset: 0,
        unit_count: config.batch.unit_count,
        directory: task_dir,
    };
    let scheduler = BatchScheduler::new(env, plan, &config).with_report_printing(true);

    let run = runtime.block_on(async {
        supervisor.spawn_signal_listener();
        scheduler.run().await
    })?;
    info!(
        "Batch finished: {}/{} sandbox(es) succeeded",
        run.report.summary.successful_sandboxes, run.report.summary.total_sandboxes
    );
    Ok(())
}

fn run_coordinator(config: SandstormConfig, task_dir: PathBuf, log_level: Option<&str>) -> Result<()> {
    let runtime = build_coordinator_runtime().context("Failed to build runtime")?;
    let supervisor = Arc::new(ShutdownSupervisor::new());
    let _cleanup = CleanupGuard::new(supervisor.clone());

    let launcher = CurrentExeLauncher::current()
        .context("Cannot locate the sandstorm executable")?
        .with_log_level(log_level.map(str::to_string));
    let coordinator = FanOutCoordinator::new(config, task_dir, Arc::new(launcher), supervisor.clone());

    let report = runtime.block_on(async {
        supervisor.spawn_signal_listener();
        coordinator.run().await
    })?;
    info!(
        "Batch finished: {}/{} sandbox(es) succeeded",
        report.summary.successful_sandboxes, report.summary.total_sandboxes
    );
    Ok(())
}
