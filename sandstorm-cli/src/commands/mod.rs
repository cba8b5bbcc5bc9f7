//! Subcommand handlers and the pieces they share

pub mod batch;
pub mod config;
pub mod drive;
pub mod worker;

use anyhow::{Context, Result};
use sandstorm_config::{ProviderKind, SandstormConfig};
use sandstorm_core::{DriverFactory, SandboxProvider};
use sandstorm_execution::{SimulatedDriverFactory, SimulatedProvider};
use sandstorm_http::{RemoteSandboxProvider, WebDriverFactory};
use sandstorm_resilience::{ShutdownError, ShutdownSupervisor};
use std::sync::Arc;
use tracing::debug;

/// Provisioning backend and driver factory for the configured provider kind
pub fn collaborators(
    config: &SandstormConfig,
) -> Result<(Arc<dyn SandboxProvider>, Arc<dyn DriverFactory>)> {
    match config.provider.kind {
        ProviderKind::Remote => {
            let provider = RemoteSandboxProvider::new(&config.provider)
                .context("Failed to build provisioning client")?;
            let drivers = WebDriverFactory::from_provider(&config.provider);
            Ok((Arc::new(provider), Arc::new(drivers)))
        }
        ProviderKind::Simulated => Ok((
            Arc::new(SimulatedProvider::from_config(&config.provider)),
            Arc::new(SimulatedDriverFactory::from_config(&config.provider, &config.app)),
        )),
    }
}

/// Runs the blocking cleanup when the process leaves `main`, however it leaves
pub struct CleanupGuard {
    supervisor: Arc<ShutdownSupervisor>,
}

impl CleanupGuard {
    pub fn new(supervisor: Arc<ShutdownSupervisor>) -> Self {
        Self { supervisor }
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if let Err(ShutdownError::AlreadyShuttingDown) = self.supervisor.cleanup_blocking() {
            debug!("Exit cleanup already done");
        }
    }
}
