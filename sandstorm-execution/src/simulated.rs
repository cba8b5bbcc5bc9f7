//! In-memory provider and device used for dry runs and tests
//!
//! The simulated device keeps a tiny file system so that the upload, checksum
//! and install steps behave like they would on a real device. Faults can be
//! injected per call category.

use async_trait::async_trait;
use base64::Engine;
use parking_lot::Mutex;
use sandstorm_config::domains::app::MOUNT_PATH_PREFIX;
use sandstorm_config::{AppConfig, ProviderConfig};
use sandstorm_core::{
    AppState, DeviceDriver, DriverEndpoint, DriverError, DriverFactory, ProvisionError,
    SandboxHandle, SandboxProvider, ScreenSize,
};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Which simulated calls fail
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// The first N create calls of the provider fail
    pub failing_creates: usize,
    /// The first N driver connections fail
    pub failing_connects: usize,
    /// Shell commands (first word) that always fail
    pub failing_commands: Vec<String>,
    /// Sandbox kills fail
    pub failing_kills: bool,
}

impl FaultPlan {
    fn command_fails(&self, command: &str) -> bool {
        self.failing_commands.iter().any(|c| c == command)
    }
}

#[derive(Default)]
struct ProviderState {
    creates: AtomicUsize,
    kills: AtomicUsize,
    warm_ups: AtomicUsize,
    live: Mutex<HashSet<String>>,
}

/// Provisioning service that hands out in-memory sandboxes
pub struct SimulatedProvider {
    latency: Duration,
    faults: FaultPlan,
    state: Arc<ProviderState>,
}

impl SimulatedProvider {
    pub fn new(latency: Duration, faults: FaultPlan) -> Self {
        Self {
            latency,
            faults,
            state: Arc::new(ProviderState::default()),
        }
    }

    pub fn from_config(config: &ProviderConfig) -> Self {
        Self::new(Duration::from_millis(config.simulated_latency_ms), FaultPlan::default())
    }

    /// Create calls made so far, failed ones included
    pub fn create_calls(&self) -> usize {
        self.state.creates.load(Ordering::SeqCst)
    }

    pub fn kills(&self) -> usize {
        self.state.kills.load(Ordering::SeqCst)
    }

    pub fn warm_ups(&self) -> usize {
        self.state.warm_ups.load(Ordering::SeqCst)
    }

    pub fn live_sandboxes(&self) -> usize {
        self.state.live.lock().len()
    }

    fn handle(&self, id: String) -> Arc<dyn SandboxHandle> {
        Arc::new(SimulatedSandbox {
            id,
            latency: self.latency,
            failing_kills: self.faults.failing_kills,
            state: self.state.clone(),
        })
    }
}

#[async_trait]
impl SandboxProvider for SimulatedProvider {
    async fn warm_up(&self) -> Result<(), ProvisionError> {
        self.state.warm_ups.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        Ok(())
    }

    async fn create(
        &self,
        template: &str,
        _idle_timeout: Duration,
    ) -> Result<Arc<dyn SandboxHandle>, ProvisionError> {
        let call = self.state.creates.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;

        if call < self.faults.failing_creates {
            return Err(ProvisionError::Simulated(format!(
                "template {} is at capacity",
                template
            )));
        }

        let id = format!("sim-{:05}", call);
        self.state.live.lock().insert(id.clone());
        Ok(self.handle(id))
    }

    async fn connect(&self, sandbox_id: &str) -> Result<Arc<dyn SandboxHandle>, ProvisionError> {
        tokio::time::sleep(self.latency).await;
        if self.state.live.lock().contains(sandbox_id) {
            Ok(self.handle(sandbox_id.to_string()))
        } else {
            Err(ProvisionError::NotFound(sandbox_id.to_string()))
        }
    }
}

struct SimulatedSandbox {
    id: String,
    latency: Duration,
    failing_kills: bool,
    state: Arc<ProviderState>,
}

#[async_trait]
impl SandboxHandle for SimulatedSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    fn endpoint(&self, port: u16) -> String {
        format!("http://{}-{}.simulated", port, self.id)
    }

    fn access_token(&self) -> Option<String> {
        Some(format!("token-{}", self.id))
    }

    async fn kill(&self) -> Result<(), ProvisionError> {
        self.state.kills.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        if self.failing_kills {
            return Err(ProvisionError::Simulated(format!("kill of {} rejected", self.id)));
        }
        self.state.live.lock().remove(&self.id);
        Ok(())
    }
}

#[derive(Default)]
struct FactoryState {
    connects: AtomicUsize,
    quits: Arc<AtomicUsize>,
}

/// Builds simulated device sessions
pub struct SimulatedDriverFactory {
    latency: Duration,
    faults: FaultPlan,
    package: String,
    screen: ScreenSize,
    state: FactoryState,
}

impl SimulatedDriverFactory {
    pub fn new(latency: Duration, faults: FaultPlan) -> Self {
        Self {
            latency,
            faults,
            package: AppConfig::default().package,
            screen: ScreenSize::default(),
            state: FactoryState::default(),
        }
    }

    pub fn from_config(provider: &ProviderConfig, app: &AppConfig) -> Self {
        Self::new(Duration::from_millis(provider.simulated_latency_ms), FaultPlan::default())
            .with_package(&app.package)
    }

    /// Package that `pm install` puts on the device
    pub fn with_package(mut self, package: &str) -> Self {
        self.package = package.to_string();
        self
    }

    pub fn with_screen(mut self, screen: ScreenSize) -> Self {
        self.screen = screen;
        self
    }

    pub fn connect_calls(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn quits(&self) -> usize {
        self.state.quits.load(Ordering::SeqCst)
    }
}

impl DriverFactory for SimulatedDriverFactory {
    fn connect(&self, endpoint: &DriverEndpoint) -> Result<Arc<dyn DeviceDriver>, DriverError> {
        let call = self.state.connects.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.latency);

        if call < self.faults.failing_connects {
            return Err(DriverError::Simulated(format!(
                "no automation server at {}",
                endpoint.url
            )));
        }

        Ok(Arc::new(SimulatedDevice {
            latency: self.latency,
            faults: self.faults.clone(),
            package: self.package.clone(),
            screen: self.screen,
            quits: self.state.quits.clone(),
            state: Mutex::new(DeviceState::default()),
        }))
    }
}

#[derive(Default)]
struct DeviceState {
    files: HashMap<String, Vec<u8>>,
    installed: HashSet<String>,
    foreground: Option<String>,
}

impl DeviceState {
    fn remove_tree(&mut self, path: &str) {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        self.files.retain(|name, _| name != path && !name.starts_with(&prefix));
    }
}

struct SimulatedDevice {
    latency: Duration,
    faults: FaultPlan,
    package: String,
    screen: ScreenSize,
    quits: Arc<AtomicUsize>,
    state: Mutex<DeviceState>,
}

impl SimulatedDevice {
    fn pause(&self) {
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
    }

    fn run_shell(&self, command: &str, args: &[String]) -> Option<String> {
        let mut state = self.state.lock();
        let positional: Vec<&str> = args
            .iter()
            .map(String::as_str)
            .filter(|a| !a.starts_with('-'))
            .collect();

        match command {
            "rm" => {
                for path in &positional {
                    state.remove_tree(path);
                }
                None
            }
            "mkdir" | "input" => None,
            "cp" => {
                if let [source, target] = positional.as_slice() {
                    let content = state.files.get(*source).cloned()?;
                    state.files.insert((*target).to_string(), content);
                }
                None
            }
            "cat" => match positional.as_slice() {
                [source, ">>", target] => {
                    let content = state.files.get(*source).cloned()?;
                    state
                        .files
                        .entry((*target).to_string())
                        .or_default()
                        .extend_from_slice(&content);
                    None
                }
                [source] => state
                    .files
                    .get(*source)
                    .map(|bytes| String::from_utf8_lossy(bytes).into_owned()),
                _ => None,
            },
            "md5sum" => {
                let path = positional.first()?;
                Some(match state.files.get(*path) {
                    Some(bytes) => format!("{:x}  {}", md5::compute(bytes), path),
                    None => format!("md5sum: {}: No such file or directory", path),
                })
            }
            "pm" => match positional.as_slice() {
                ["install", .., path] => {
                    let present = state.files.contains_key(*path) || path.starts_with(MOUNT_PATH_PREFIX);
                    if present {
                        state.installed.insert(self.package.clone());
                        Some("Success".to_string())
                    } else {
                        Some("Failure [INSTALL_FAILED_INVALID_URI]".to_string())
                    }
                }
                _ => None,
            },
            "getprop" => Some("Sandstorm Virtual Device\n".to_string()),
            "am" => {
                let url = positional.last().copied().unwrap_or_default();
                Some(format!(
                    "Starting: Intent {{ act=android.intent.action.VIEW dat={} }}",
                    url
                ))
            }
            "logcat" => Some(
                "--------- beginning of main\nI/ActivityManager: Start proc for activity\n"
                    .to_string(),
            ),
            _ => None,
        }
    }
}

impl DeviceDriver for SimulatedDevice {
    fn execute_shell(&self, command: &str, args: &[String]) -> Result<Option<String>, DriverError> {
        self.pause();
        if self.faults.command_fails(command) {
            return Err(DriverError::Simulated(format!("shell command '{}' failed", command)));
        }
        Ok(self.run_shell(command, args))
    }

    fn screenshot(&self, path: &Path) -> Result<bool, DriverError> {
        self.pause();
        if self.faults.command_fails("screenshot") {
            return Err(DriverError::Simulated("screen capture failed".to_string()));
        }
        // PNG signature is enough for a non-empty file
        std::fs::write(path, [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a])?;
        Ok(true)
    }

    fn page_source(&self) -> Result<Option<String>, DriverError> {
        self.pause();
        let state = self.state.lock();
        let package = state.foreground.as_deref().unwrap_or("com.android.launcher3");
        Ok(Some(format!(
            "<?xml version='1.0' encoding='UTF-8' standalone='yes' ?>\
             <hierarchy rotation=\"0\"><node package=\"{}\" bounds=\"[0,0][{},{}]\"/></hierarchy>",
            package, self.screen.width, self.screen.height
        )))
    }

    fn window_size(&self) -> Result<ScreenSize, DriverError> {
        self.pause();
        Ok(self.screen)
    }

    fn query_app_state(&self, package: &str) -> Result<AppState, DriverError> {
        self.pause();
        let state = self.state.lock();
        Ok(if !state.installed.contains(package) {
            AppState::NotInstalled
        } else if state.foreground.as_deref() == Some(package) {
            AppState::Foreground
        } else {
            AppState::NotRunning
        })
    }

    fn activate_app(&self, package: &str) -> Result<(), DriverError> {
        self.pause();
        let mut state = self.state.lock();
        if !state.installed.contains(package) {
            return Err(DriverError::Session(format!("{} is not installed", package)));
        }
        state.foreground = Some(package.to_string());
        Ok(())
    }

    fn terminate_app(&self, package: &str) -> Result<bool, DriverError> {
        self.pause();
        let mut state = self.state.lock();
        if state.foreground.as_deref() == Some(package) {
            state.foreground = None;
            return Ok(true);
        }
        Ok(false)
    }

    fn remove_app(&self, package: &str) -> Result<bool, DriverError> {
        self.pause();
        let mut state = self.state.lock();
        if state.foreground.as_deref() == Some(package) {
            state.foreground = None;
        }
        Ok(state.installed.remove(package))
    }

    fn push_file(&self, remote_path: &str, payload: &str) -> Result<(), DriverError> {
        self.pause();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload)
            .map_err(|e| DriverError::InvalidResponse(format!("payload is not base64: {}", e)))?;
        self.state.lock().files.insert(remote_path.to_string(), bytes);
        Ok(())
    }

    fn current_activity(&self) -> Result<Option<String>, DriverError> {
        self.pause();
        Ok(self
            .state
            .lock()
            .foreground
            .as_ref()
            .map(|_| ".MainActivity".to_string()))
    }

    fn current_package(&self) -> Result<Option<String>, DriverError> {
        self.pause();
        Ok(self.state.lock().foreground.clone())
    }

    fn quit(&self) -> Result<(), DriverError> {
        self.quits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
