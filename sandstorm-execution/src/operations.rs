//! The Operate phase: one implementation per [`OperationKind`]
//!
//! Steps run on a pool thread and call the blocking driver directly. Each
//! step yields a [`StepOutput`]; `Empty` and `Rejected` count as failures,
//! everything else as success.

use base64::Engine;
use rand::Rng;
use sandstorm_core::{
    AppState, DeviceDriver, DriverError, ExternalFailure, OperationKind, OperationMetrics,
    ScreenSize,
};
use sandstorm_resilience::RetryExecutor;
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::unit::UnitSettings;

/// Staging directory for upload chunks on the device
pub const CHUNK_DIR: &str = "/data/local/tmp/chunks";

/// Raw bytes per pushed chunk
pub const CHUNK_SIZE: usize = 20 * 1024 * 1024;

/// Minimum distance of a random tap from the left and right edges
const TAP_MARGIN_X: u32 = 100;
/// Minimum distance of a random tap from the top and bottom edges
const TAP_MARGIN_Y: u32 = 200;

/// What a step produced
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutput {
    Done,
    Skipped(String),
    Text(String),
    Json(serde_json::Value),
    /// Nothing came back
    Empty,
    /// The step ran but its check failed
    Rejected(String),
}

impl StepOutput {
    pub fn is_success(&self) -> bool {
        !matches!(self, StepOutput::Empty | StepOutput::Rejected(_))
    }
}

impl fmt::Display for StepOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutput::Done => write!(f, "done"),
            StepOutput::Skipped(reason) => write!(f, "skipped ({})", reason),
            StepOutput::Text(text) => write!(f, "{}", text),
            StepOutput::Json(value) => write!(f, "{}", value),
            StepOutput::Empty => write!(f, "None"),
            StepOutput::Rejected(reason) => write!(f, "False ({})", reason),
        }
    }
}

/// Everything a step may touch
#[derive(Clone)]
pub struct OperationContext {
    pub unit_id: usize,
    pub driver: Arc<dyn DeviceDriver>,
    pub settings: Arc<UnitSettings>,
    /// `<process dir>/unit_<id>`
    pub output_dir: PathBuf,
    pub screen: ScreenSize,
}

impl OperationContext {
    fn shell(&self, command: &str, args: &[&str]) -> Result<Option<String>, DriverError> {
        shell(self.driver.as_ref(), command, args)
    }
}

/// A single measurable automation step
pub trait Step {
    fn run(&self, ctx: &OperationContext) -> Result<StepOutput, DriverError>;
}

impl Step for OperationKind {
    fn run(&self, ctx: &OperationContext) -> Result<StepOutput, DriverError> {
        match self {
            OperationKind::UploadApk => upload_apk(ctx),
            OperationKind::InstallApk => install_apk(ctx),
            OperationKind::LaunchApk => launch_apk(ctx),
            OperationKind::FirstScreenshot => screenshot(ctx, 1),
            OperationKind::FirstRandomTap | OperationKind::SecondRandomTap => tap_random(ctx),
            OperationKind::PageXml => page_xml(ctx),
            OperationKind::DeviceInfo => device_info(ctx),
            OperationKind::OpenBrowser => open_browser(ctx),
            OperationKind::SecondScreenshot => screenshot(ctx, 2),
            OperationKind::DeviceLogs => device_logs(ctx),
        }
    }
}

/// Per-operation metrics of one unit and whether every operation succeeded
#[derive(Debug, Default)]
pub struct OperationsOutcome {
    pub all_ok: bool,
    pub metrics: BTreeMap<OperationKind, OperationMetrics>,
}

/// Run the whole sequence in order. Each operation is retried on its own and
/// timed across all of its attempts; a failure never stops later operations.
pub fn run_operations(ctx: &OperationContext, executor: &RetryExecutor) -> OperationsOutcome {
    let mut outcome = OperationsOutcome {
        all_ok: true,
        metrics: BTreeMap::new(),
    };
    let total = OperationKind::SEQUENCE.len();

    for kind in OperationKind::SEQUENCE {
        let label = format!("[unit {:>2}] {}", ctx.unit_id, kind.key());
        let attempt = executor.execute_blocking(&label, |_| match kind.run(ctx) {
            Ok(output) if output.is_success() => Ok(output),
            Ok(output) => Err(format!("Operation returned: {}", output)),
            Err(e) => Err(e.describe()),
        });

        let metrics = outcome
            .metrics
            .entry(kind)
            .or_insert_with(|| OperationMetrics::new(kind.metric_name()));
        let latency = attempt.elapsed_ms();
        match &attempt.result {
            Ok(_) => {
                metrics.record_success(latency, attempt.retried());
                info!(
                    "[unit {:>2}] [{}/{}] {} ok ({:.0}ms)",
                    ctx.unit_id,
                    kind.position(),
                    total,
                    kind.display_name(),
                    latency
                );
            }
            Err(error) => {
                metrics.record_failure(error, latency, attempt.retried());
                outcome.all_ok = false;
                warn!(
                    "[unit {:>2}] [{}/{}] {} failed ({:.0}ms): {}",
                    ctx.unit_id,
                    kind.position(),
                    total,
                    kind.display_name(),
                    latency,
                    error
                );
            }
        }
    }

    outcome
}

fn upload_apk(ctx: &OperationContext) -> Result<StepOutput, DriverError> {
    if ctx.settings.use_pre_mounted_assets {
        return Ok(StepOutput::Skipped("assets are pre-mounted".to_string()));
    }

    let app = &ctx.settings.app;
    debug!(
        "[unit {:>2}] Uploading {} to {}",
        ctx.unit_id, app.apk_path, app.remote_path
    );
    push_apk(ctx.driver.as_ref(), Path::new(&app.apk_path), &app.remote_path)
}

/// Run a shell command with borrowed arguments
pub fn shell(
    driver: &dyn DeviceDriver,
    command: &str,
    args: &[&str],
) -> Result<Option<String>, DriverError> {
    let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
    driver.execute_shell(command, &args)
}

/// Push a local file to `remote` in base64 chunks, merge them on the device
/// and verify the result by MD5.
pub fn push_apk(
    driver: &dyn DeviceDriver,
    local: &Path,
    remote: &str,
) -> Result<StepOutput, DriverError> {
    let bytes = std::fs::read(local)?;
    let local_md5 = format!("{:x}", md5::compute(&bytes));

    shell(driver, "rm", &["-rf", CHUNK_DIR])?;
    shell(driver, "mkdir", &["-p", CHUNK_DIR])?;
    shell(driver, "rm", &["-f", remote])?;

    let engine = base64::engine::general_purpose::STANDARD;
    let mut chunks = Vec::new();
    for (index, chunk) in bytes.chunks(CHUNK_SIZE).enumerate() {
        let path = format!("{}/chunk_{:04}", CHUNK_DIR, index);
        driver.push_file(&path, &engine.encode(chunk))?;
        chunks.push(path);
    }

    for (index, chunk) in chunks.iter().enumerate() {
        if index == 0 {
            shell(driver, "cp", &[chunk.as_str(), remote])?;
        } else {
            shell(driver, "cat", &[chunk.as_str(), ">>", remote])?;
        }
    }
    for chunk in &chunks {
        shell(driver, "rm", &["-f", chunk.as_str()])?;
    }
    shell(driver, "rm", &["-rf", CHUNK_DIR])?;

    let output = shell(driver, "md5sum", &[remote])?;
    let remote_md5 = output
        .as_deref()
        .and_then(|o| o.split_whitespace().next())
        .unwrap_or_default();
    if remote_md5.eq_ignore_ascii_case(&local_md5) {
        Ok(StepOutput::Text(remote.to_string()))
    } else {
        Ok(StepOutput::Rejected(format!(
            "checksum mismatch: local {} remote {}",
            local_md5, remote_md5
        )))
    }
}

fn install_apk(ctx: &OperationContext) -> Result<StepOutput, DriverError> {
    let app = &ctx.settings.app;
    let package = app.package.as_str();
    if ctx.driver.query_app_state(package)?.is_installed() {
        return Ok(StepOutput::Skipped("already installed".to_string()));
    }

    let path = app.install_path(ctx.settings.use_pre_mounted_assets);
    let output = ctx.shell("pm", &["install", "-r", "-g", path])?;
    let installed = match &output {
        Some(text) if text.contains("Success") => true,
        _ => ctx.driver.query_app_state(package)?.is_installed(),
    };
    if !installed {
        let detail = output.unwrap_or_default();
        return Ok(StepOutput::Rejected(format!(
            "pm install did not succeed: {}",
            detail.trim()
        )));
    }

    for permission in &app.permissions {
        if let Err(e) = ctx.shell("pm", &["grant", package, permission.as_str()]) {
            debug!(
                "[unit {:>2}] Grant {} failed: {}",
                ctx.unit_id,
                permission,
                e
            );
        }
    }
    Ok(StepOutput::Done)
}

fn launch_apk(ctx: &OperationContext) -> Result<StepOutput, DriverError> {
    let package = ctx.settings.app.package.as_str();
    ctx.driver.activate_app(package)?;
    std::thread::sleep(ctx.settings.settle_delay);

    let state = ctx.driver.query_app_state(package)?;
    if state == AppState::Foreground {
        Ok(StepOutput::Done)
    } else {
        Ok(StepOutput::Rejected(format!("app state {}", state)))
    }
}

fn screenshot(ctx: &OperationContext, index: u32) -> Result<StepOutput, DriverError> {
    let path = ctx.output_dir.join(format!("screenshot_{}.png", index));
    let reported = ctx.driver.screenshot(&path)?;
    let on_disk = std::fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false);

    if reported || on_disk {
        Ok(StepOutput::Text(path.display().to_string()))
    } else {
        Ok(StepOutput::Rejected("screenshot was not saved".to_string()))
    }
}

/// Inclusive tap range along one axis; collapses to the margin on tiny screens
pub fn tap_range(extent: u32, margin: u32) -> (u32, u32) {
    let high = extent.saturating_sub(margin).max(margin);
    (margin, high)
}

fn tap_random(ctx: &OperationContext) -> Result<StepOutput, DriverError> {
    let (x_low, x_high) = tap_range(ctx.screen.width, TAP_MARGIN_X);
    let (y_low, y_high) = tap_range(ctx.screen.height, TAP_MARGIN_Y);
    let (x, y) = {
        let mut rng = rand::thread_rng();
        (rng.gen_range(x_low..=x_high), rng.gen_range(y_low..=y_high))
    };

    let (x_arg, y_arg) = (x.to_string(), y.to_string());
    ctx.shell("input", &["tap", x_arg.as_str(), y_arg.as_str()])?;
    Ok(StepOutput::Text(format!("tapped ({}, {})", x, y)))
}

fn page_xml(ctx: &OperationContext) -> Result<StepOutput, DriverError> {
    match ctx.driver.page_source()? {
        Some(xml) => {
            if !xml.trim().is_empty() {
                std::fs::write(ctx.output_dir.join("page_1.xml"), &xml)?;
            }
            Ok(StepOutput::Text(format!("{} chars", xml.chars().count())))
        }
        None => Ok(StepOutput::Empty),
    }
}

fn device_info(ctx: &OperationContext) -> Result<StepOutput, DriverError> {
    let output = ctx.shell("getprop", &["ro.product.model"])?;
    let model = output
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or("N/A");

    let info = json!({ "model": model });
    let rendered = serde_json::to_string_pretty(&info)
        .map_err(|e| DriverError::InvalidResponse(e.to_string()))?;
    std::fs::write(ctx.output_dir.join("device_info.json"), rendered)?;
    Ok(StepOutput::Json(info))
}

fn open_browser(ctx: &OperationContext) -> Result<StepOutput, DriverError> {
    let url = ctx.settings.browser_url.as_str();
    ctx.shell(
        "am",
        &["start", "-a", "android.intent.action.VIEW", "-d", url],
    )?;
    std::thread::sleep(ctx.settings.settle_delay);
    Ok(StepOutput::Done)
}

fn device_logs(ctx: &OperationContext) -> Result<StepOutput, DriverError> {
    match ctx.shell("logcat", &["-d"])? {
        Some(logs) => {
            std::fs::write(ctx.output_dir.join("logcat.txt"), &logs)?;
            Ok(StepOutput::Text(format!("{} lines", logs.lines().count())))
        }
        None => Ok(StepOutput::Empty),
    }
}
