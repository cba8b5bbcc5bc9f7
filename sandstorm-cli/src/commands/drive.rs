//! `sandstorm drive`: run a list of actions against one existing sandbox

use anyhow::{bail, Context, Result};
use chrono::Local;
use colored::Colorize;
use regex::Regex;
use sandstorm_config::{AppConfig, ConfigError, ConfigLoader, ProviderKind, SandstormConfig};
use sandstorm_core::{AppState, DeviceDriver, DriverEndpoint, ExternalFailure};
use sandstorm_execution::{build_worker_runtime, push_apk, shell};
use serde_json::json;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::collaborators;
use crate::cli::DriveArgs;

/// Where screenshots, dumps and logs are saved
pub const DRIVE_OUTPUT_DIR: &str = "output/drive_output";

const GMS_PACKAGE: &str = "com.google.android.gms";
const LOCATION_PACKAGE: &str = "io.appium.settings";
const SHELL_OUTPUT_LIMIT: usize = 500;
const RULE_WIDTH: usize = 70;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveAction {
    UploadApp,
    InstallApp,
    LaunchApp,
    CheckApp,
    GrantAppPermissions,
    CloseApp,
    UninstallApp,
    GetAppState,
    TapScreen,
    Screenshot,
    SetScreenResolution,
    ResetScreenResolution,
    GetWindowSize,
    DumpUi,
    InputText,
    SetLocation,
    GetLocation,
    DeviceInfo,
    GetDeviceModel,
    GetCurrentActivity,
    GetCurrentPackage,
    OpenBrowser,
    DisableGms,
    EnableGms,
    GetDeviceLogs,
    Shell,
}

impl DriveAction {
    pub const ALL: [DriveAction; 26] = [
        DriveAction::UploadApp,
        DriveAction::InstallApp,
        DriveAction::LaunchApp,
        DriveAction::CheckApp,
        DriveAction::GrantAppPermissions,
        DriveAction::CloseApp,
        DriveAction::UninstallApp,
        DriveAction::GetAppState,
        DriveAction::TapScreen,
        DriveAction::Screenshot,
        DriveAction::SetScreenResolution,
        DriveAction::ResetScreenResolution,
        DriveAction::GetWindowSize,
        DriveAction::DumpUi,
        DriveAction::InputText,
        DriveAction::SetLocation,
        DriveAction::GetLocation,
        DriveAction::DeviceInfo,
        DriveAction::GetDeviceModel,
        DriveAction::GetCurrentActivity,
        DriveAction::GetCurrentPackage,
        DriveAction::OpenBrowser,
        DriveAction::DisableGms,
        DriveAction::EnableGms,
        DriveAction::GetDeviceLogs,
        DriveAction::Shell,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DriveAction::UploadApp => "upload_app",
            DriveAction::InstallApp => "install_app",
            DriveAction::LaunchApp => "launch_app",
            DriveAction::CheckApp => "check_app",
            DriveAction::GrantAppPermissions => "grant_app_permissions",
            DriveAction::CloseApp => "close_app",
            DriveAction::UninstallApp => "uninstall_app",
            DriveAction::GetAppState => "get_app_state",
            DriveAction::TapScreen => "tap_screen",
            DriveAction::Screenshot => "screenshot",
            DriveAction::SetScreenResolution => "set_screen_resolution",
            DriveAction::ResetScreenResolution => "reset_screen_resolution",
            DriveAction::GetWindowSize => "get_window_size",
            DriveAction::DumpUi => "dump_ui",
            DriveAction::InputText => "input_text",
            DriveAction::SetLocation => "set_location",
            DriveAction::GetLocation => "get_location",
            DriveAction::DeviceInfo => "device_info",
            DriveAction::GetDeviceModel => "get_device_model",
            DriveAction::GetCurrentActivity => "get_current_activity",
            DriveAction::GetCurrentPackage => "get_current_package",
            DriveAction::OpenBrowser => "open_browser",
            DriveAction::DisableGms => "disable_gms",
            DriveAction::EnableGms => "enable_gms",
            DriveAction::GetDeviceLogs => "get_device_logs",
            DriveAction::Shell => "shell",
        }
    }

    fn category(&self) -> &'static str {
        use DriveAction::*;
        match self {
            UploadApp | InstallApp | LaunchApp | CheckApp | GrantAppPermissions | CloseApp
            | UninstallApp | GetAppState => "App",
            TapScreen | Screenshot | SetScreenResolution | ResetScreenResolution | GetWindowSize => {
                "Screen"
            }
            DumpUi | InputText | SetLocation | GetLocation => "UI and location",
            DeviceInfo | GetDeviceModel | GetCurrentActivity | GetCurrentPackage => "Device",
            OpenBrowser | DisableGms | EnableGms | GetDeviceLogs | Shell => "System",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            DriveAction::UploadApp => "Upload the APK in chunks (--apk-path)",
            DriveAction::InstallApp => "Install the uploaded APK",
            DriveAction::LaunchApp => "Launch the app",
            DriveAction::CheckApp => "Check whether the app is installed",
            DriveAction::GrantAppPermissions => "Grant the configured runtime permissions",
            DriveAction::CloseApp => "Stop the app",
            DriveAction::UninstallApp => "Uninstall the app",
            DriveAction::GetAppState => "Print the app state",
            DriveAction::TapScreen => "Tap a point (--tap-x, --tap-y)",
            DriveAction::Screenshot => "Save a screenshot",
            DriveAction::SetScreenResolution => "Change resolution (--width, --height, --dpi)",
            DriveAction::ResetScreenResolution => "Restore the default resolution",
            DriveAction::GetWindowSize => "Print the window size",
            DriveAction::DumpUi => "Save the UI hierarchy and list clickable elements",
            DriveAction::InputText => "Type text into the focused field (--text)",
            DriveAction::SetLocation => "Mock GPS (--latitude, --longitude, --altitude)",
            DriveAction::GetLocation => "Print the last known location",
            DriveAction::DeviceInfo => "Print and save device details",
            DriveAction::GetDeviceModel => "Print the device model",
            DriveAction::GetCurrentActivity => "Print the foreground activity",
            DriveAction::GetCurrentPackage => "Print the foreground package",
            DriveAction::OpenBrowser => "Open a URL (--url)",
            DriveAction::DisableGms => "Disable Google Play Services",
            DriveAction::EnableGms => "Enable Google Play Services",
            DriveAction::GetDeviceLogs => "Save logcat output",
            DriveAction::Shell => "Run a shell command (--shell-cmd)",
        }
    }
}

impl fmt::Display for DriveAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DriveAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        DriveAction::ALL
            .iter()
            .copied()
            .find(|action| action.name() == name)
            .ok_or_else(|| format!("Unknown action: {}", name))
    }
}

fn print_action_list() {
    println!("Available actions:");
    let mut category = "";
    for action in DriveAction::ALL {
        if action.category() != category {
            category = action.category();
            println!("\n  {}:", category);
        }
        println!("    {:<25} {}", action.name(), action.description());
    }
}

/// A position parsed from `dumpsys location`
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub provider: &'static str,
}

/// Last known location from `dumpsys location`, trying gps, network and fused in turn
pub fn parse_dumpsys_location(output: &str) -> Option<Location> {
    for provider in ["gps", "network", "fused"] {
        let pattern = format!(
            r"(?s){p} provider.*?last location=Location\[{p}\s+(-?[\d.]+),(-?[\d.]+).*?alt=(-?[\d.]+)",
            p = provider
        );
        let Ok(re) = Regex::new(&pattern) else {
            continue;
        };
        if let Some(caps) = re.captures(output) {
            let number = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<f64>().ok());
            if let (Some(latitude), Some(longitude), Some(altitude)) = (number(1), number(2), number(3)) {
                return Some(Location {
                    latitude,
                    longitude,
                    altitude,
                    provider,
                });
            }
        }
    }
    None
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((index, _)) => format!("{}...", &text[..index]),
        None => text.to_string(),
    }
}

fn ok(message: impl fmt::Display) {
    println!("{} {}", "✓".green(), message);
}

fn warn_line(message: impl fmt::Display) {
    println!("{} {}", "⚠".yellow(), message);
}

fn fail(message: impl fmt::Display) {
    println!("{} {}", "✗".red(), message);
}

/// One connected device plus what the actions need to know about it
pub struct DriveSession {
    driver: Arc<dyn DeviceDriver>,
    app: AppConfig,
    pre_mounted: bool,
    settle: Duration,
    output_dir: PathBuf,
}

impl DriveSession {
    pub fn new(driver: Arc<dyn DeviceDriver>, config: &SandstormConfig, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            driver,
            app: config.app.clone(),
            pre_mounted: config.batch.use_pre_mounted_assets,
            settle: config.batch.settle_delay(),
            output_dir: output_dir.into(),
        }
    }

    fn shell(&self, command: &str, args: &[&str]) -> Result<Option<String>> {
        Ok(shell(self.driver.as_ref(), command, args)?)
    }

    fn output_path(&self, name: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("Failed to create {}", self.output_dir.display()))?;
        Ok(self.output_dir.join(name))
    }

    fn is_installed(&self, package: &str) -> bool {
        match self.driver.query_app_state(package) {
            Ok(state) => state.is_installed(),
            Err(e) => {
                debug!("App state query failed, falling back to pm list: {}", e);
                self.shell("pm", &["list", "packages", package])
                    .ok()
                    .flatten()
                    .map(|out| out.contains(package))
                    .unwrap_or(false)
            }
        }
    }

    /// Run every action in order, print a summary, and return the per-action results
    pub fn execute_all(&self, actions: &[String], args: &DriveArgs) -> Vec<(String, bool)> {
        let mut results = Vec::with_capacity(actions.len());
        let total = actions.len();

        for (index, raw) in actions.iter().enumerate() {
            let name = raw.trim().to_string();
            println!("[{}/{}] Executing action: {}", index + 1, total, name);
            println!("{}", "-".repeat(RULE_WIDTH));

            let succeeded = match name.parse::<DriveAction>() {
                Ok(action) => match self.perform(action, args) {
                    Ok(result) => result,
                    Err(e) => {
                        fail(format!("{} failed: {:#}", action, e));
                        false
                    }
                },
                Err(e) => {
                    fail(e);
                    false
                }
            };
            println!();
            results.push((name, succeeded));
        }

        print_summary(&results);
        results
    }

    pub fn perform(&self, action: DriveAction, args: &DriveArgs) -> Result<bool> {
        match action {
            DriveAction::UploadApp => self.upload_app(args.apk_path.as_deref()),
            DriveAction::InstallApp => self.install_app(),
            DriveAction::LaunchApp => self.launch_app(),
            DriveAction::CheckApp => Ok(self.check_app()),
            DriveAction::GrantAppPermissions => Ok(self.grant_app_permissions()),
            DriveAction::CloseApp => {
                self.driver.terminate_app(&self.app.package)?;
                ok(format!("{} closed", self.app.name));
                Ok(true)
            }
            DriveAction::UninstallApp => self.uninstall_app(),
            DriveAction::GetAppState => {
                let state = self.driver.query_app_state(&self.app.package)?;
                ok(format!("App state: {}", state));
                Ok(true)
            }
            DriveAction::TapScreen => {
                let (Some(x), Some(y)) = (args.tap_x, args.tap_y) else {
                    bail!("tap_screen requires --tap-x and --tap-y");
                };
                let (x, y) = (x.to_string(), y.to_string());
                self.shell("input", &["tap", x.as_str(), y.as_str()])?;
                ok(format!("Tapped ({}, {})", x, y));
                Ok(true)
            }
            DriveAction::Screenshot => self.screenshot(),
            DriveAction::SetScreenResolution => {
                let (Some(width), Some(height)) = (args.width, args.height) else {
                    bail!("set_screen_resolution requires --width and --height");
                };
                self.set_screen_resolution(width, height, args.dpi)
            }
            DriveAction::ResetScreenResolution => {
                self.shell("wm", &["size", "reset"])?;
                self.shell("wm", &["density", "reset"])?;
                std::thread::sleep(self.settle);
                let size = self.shell("wm", &["size"])?.unwrap_or_default();
                ok(format!("Screen resolution reset {}", size.trim()));
                Ok(true)
            }
            DriveAction::GetWindowSize => {
                let size = self.driver.window_size()?;
                ok(format!("Window size: {}", size));
                Ok(true)
            }
            DriveAction::DumpUi => self.dump_ui(),
            DriveAction::InputText => {
                let Some(text) = args.text.as_deref() else {
                    bail!("input_text requires --text");
                };
                self.input_text(text)
            }
            DriveAction::SetLocation => {
                let (Some(latitude), Some(longitude)) = (args.latitude, args.longitude) else {
                    bail!("set_location requires --latitude and --longitude");
                };
                self.set_location(latitude, longitude, args.altitude.unwrap_or(0.0))
            }
            DriveAction::GetLocation => self.get_location(),
            DriveAction::DeviceInfo => self.device_info(),
            DriveAction::GetDeviceModel => {
                let model = self.shell("getprop", &["ro.product.model"])?;
                let model = model.as_deref().map(str::trim).filter(|m| !m.is_empty()).unwrap_or("N/A");
                ok(format!("Device model: {}", model));
                Ok(true)
            }
            DriveAction::GetCurrentActivity => match self.driver.current_activity()? {
                Some(activity) => {
                    ok(format!("Current activity: {}", activity));
                    Ok(true)
                }
                None => Ok(false),
            },
            DriveAction::GetCurrentPackage => match self.driver.current_package()? {
                Some(package) => {
                    ok(format!("Current package: {}", package));
                    Ok(true)
                }
                None => Ok(false),
            },
            DriveAction::OpenBrowser => {
                let Some(url) = args.url.as_deref() else {
                    bail!("open_browser requires --url");
                };
                self.shell("am", &["start", "-a", "android.intent.action.VIEW", "-d", url])?;
                std::thread::sleep(self.settle);
                ok(format!("Browser opened at {}", url));
                Ok(true)
            }
            DriveAction::DisableGms => {
                if !self.is_installed(GMS_PACKAGE) {
                    warn_line("GMS is not installed, nothing to disable");
                    return Ok(true);
                }
                self.shell("pm", &["disable-user", "--user", "0", GMS_PACKAGE])?;
                ok("GMS disabled");
                Ok(true)
            }
            DriveAction::EnableGms => {
                self.shell("pm", &["enable", GMS_PACKAGE])?;
                ok("GMS enabled");
                Ok(true)
            }
            DriveAction::GetDeviceLogs => self.device_logs(),
            DriveAction::Shell => {
                let Some(command_line) = args.shell_cmd.as_deref() else {
                    bail!("shell requires --shell-cmd");
                };
                let mut parts = command_line.split_whitespace();
                let Some(command) = parts.next() else {
                    bail!("shell requires a non-empty --shell-cmd");
                };
                let rest: Vec<&str> = parts.collect();
                match self.shell(command, &rest)? {
                    Some(output) => ok(format!(
                        "Command output:\n{}",
                        truncate_chars(&output, SHELL_OUTPUT_LIMIT)
                    )),
                    None => ok("Command executed (no output)"),
                }
                Ok(true)
            }
        }
    }

    fn upload_app(&self, apk_path: Option<&Path>) -> Result<bool> {
        let local = apk_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(&self.app.apk_path));
        let Ok(metadata) = std::fs::metadata(&local) else {
            fail(format!("APK file not found: {}", local.display()));
            return Ok(false);
        };
        println!("  - Local APK: {}", local.display());
        println!("  - Size: {:.2} MB", metadata.len() as f64 / 1024.0 / 1024.0);

        let output = push_apk(self.driver.as_ref(), &local, &self.app.remote_path)?;
        if output.is_success() {
            ok(format!("Uploaded to {}", self.app.remote_path));
            Ok(true)
        } else {
            fail(format!("Upload verification failed: {}", output));
            Ok(false)
        }
    }

    fn install_app(&self) -> Result<bool> {
        let package = self.app.package.as_str();
        if self.is_installed(package) {
            warn_line(format!("{} already installed, skipping", self.app.name));
            return Ok(true);
        }

        let path = self.app.install_path(self.pre_mounted);
        let output = self.shell("pm", &["install", "-r", "-g", path])?;
        if output.as_deref().is_some_and(|o| o.to_lowercase().contains("success")) {
            ok(format!("{} installed", self.app.name));
            return Ok(true);
        }

        std::thread::sleep(self.settle);
        if self.is_installed(package) {
            ok(format!("{} installed (verified)", self.app.name));
            Ok(true)
        } else {
            fail(format!("{} installation failed", self.app.name));
            Ok(false)
        }
    }

    fn launch_app(&self) -> Result<bool> {
        self.driver.activate_app(&self.app.package)?;
        ok(format!("{} launched", self.app.name));
        std::thread::sleep(self.settle);

        match self.driver.query_app_state(&self.app.package)? {
            AppState::Foreground => ok("App is running in the foreground"),
            AppState::Background => warn_line("App is running in the background"),
            other => warn_line(format!("App state: {}", other)),
        }
        Ok(true)
    }

    fn check_app(&self) -> bool {
        let installed = self.is_installed(&self.app.package);
        if installed {
            ok(format!("{} is installed ({})", self.app.name, self.app.package));
        } else {
            fail(format!("{} is not installed", self.app.name));
        }
        installed
    }

    fn grant_app_permissions(&self) -> bool {
        if self.app.permissions.is_empty() {
            ok("No permissions to grant");
            return true;
        }

        let mut granted = 0;
        for permission in &self.app.permissions {
            let short = permission.rsplit('.').next().unwrap_or(permission);
            match self.shell("pm", &["grant", self.app.package.as_str(), permission.as_str()]) {
                Ok(_) => {
                    println!("  - {} {}", short, "✓".green());
                    granted += 1;
                }
                Err(_) => println!("  - {} {}", short, "skipped".yellow()),
            }
        }
        println!("Permissions granted: {}/{}", granted, self.app.permissions.len());
        granted > 0
    }

    fn uninstall_app(&self) -> Result<bool> {
        let package = self.app.package.as_str();
        if !self.is_installed(package) {
            warn_line(format!("{} is not installed, nothing to uninstall", self.app.name));
            return Ok(true);
        }

        if let Err(e) = self.driver.terminate_app(package) {
            debug!("Stopping {} before uninstall failed: {}", package, e);
        }
        self.driver.remove_app(package)?;
        ok(format!("{} uninstalled", self.app.name));

        std::thread::sleep(self.settle);
        if self.is_installed(package) {
            warn_line(format!("{} still present on the device", self.app.name));
        }
        Ok(true)
    }

    fn screenshot(&self) -> Result<bool> {
        let name = format!("screenshot_{}.png", Local::now().format("%Y%m%d_%H%M%S"));
        let path = self.output_path(&name)?;
        let reported = self.driver.screenshot(&path)?;
        let on_disk = std::fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false);
        if reported || on_disk {
            ok(format!("Screenshot saved to {}", path.display()));
            Ok(true)
        } else {
            fail("Screenshot was not saved");
            Ok(false)
        }
    }

    fn set_screen_resolution(&self, width: u32, height: u32, dpi: Option<u32>) -> Result<bool> {
        let current = self.shell("wm", &["size"])?.unwrap_or_default();
        println!("  - Current: {}", current.trim());

        let expected = format!("{}x{}", width, height);
        let result = self.shell("wm", &["size", expected.as_str()])?;
        if result.as_deref().is_some_and(|r| r.to_lowercase().contains("error")) {
            fail(format!("wm size rejected {}", expected));
            return Ok(false);
        }

        if let Some(dpi) = dpi {
            let dpi = dpi.to_string();
            let result = self.shell("wm", &["density", dpi.as_str()])?;
            if result.as_deref().is_some_and(|r| r.to_lowercase().contains("error")) {
                warn_line(format!("wm density rejected {}", dpi));
            }
        }

        std::thread::sleep(self.settle);
        let applied = self.shell("wm", &["size"])?.unwrap_or_default();
        if applied.contains(&expected) {
            ok(format!("Screen resolution set to {}", expected));
        } else {
            warn_line("Resolution not confirmed yet; the app may need a restart");
        }
        Ok(true)
    }

    fn dump_ui(&self) -> Result<bool> {
        let Some(xml) = self.driver.page_source()?.filter(|x| !x.trim().is_empty()) else {
            fail("Empty UI hierarchy");
            return Ok(false);
        };
        let path = self.output_path("ui_dump.xml")?;
        std::fs::write(&path, &xml)?;
        ok(format!("UI hierarchy saved to {}", path.display()));
        print_ui_summary(&xml);
        Ok(true)
    }

    fn input_text(&self, text: &str) -> Result<bool> {
        let has_cjk = text.chars().any(|c| ('\u{4e00}'..='\u{9fff}').contains(&c));
        if has_cjk {
            self.shell(
                "am",
                &["broadcast", "-a", "ADB_INPUT_TEXT", "--es", "msg", text],
            )?;
            ok("Text entered (broadcast)");
        } else {
            let escaped = text.replace(' ', "%s");
            self.shell("input", &["text", escaped.as_str()])?;
            ok("Text entered");
        }
        Ok(true)
    }

    fn set_location(&self, latitude: f64, longitude: f64, altitude: f64) -> Result<bool> {
        if !(-90.0..=90.0).contains(&latitude) {
            fail(format!("Latitude {} out of range", latitude));
            return Ok(false);
        }
        if !(-180.0..=180.0).contains(&longitude) {
            fail(format!("Longitude {} out of range", longitude));
            return Ok(false);
        }

        for permission in ["ACCESS_FINE_LOCATION", "ACCESS_COARSE_LOCATION"] {
            let permission = format!("android.permission.{}", permission);
            if let Err(e) = self.shell("pm", &["grant", LOCATION_PACKAGE, permission.as_str()]) {
                debug!("Grant {} failed: {}", permission, e);
            }
        }
        self.shell("appops", &["set", LOCATION_PACKAGE, "android:mock_location", "allow"])?;

        let service = format!("{}/.LocationService", LOCATION_PACKAGE);
        let (lon, lat, alt) = (longitude.to_string(), latitude.to_string(), altitude.to_string());
        self.shell(
            "am",
            &[
                "start-foreground-service",
                "--user",
                "0",
                "-n",
                service.as_str(),
                "--es",
                "longitude",
                lon.as_str(),
                "--es",
                "latitude",
                lat.as_str(),
                "--es",
                "altitude",
                alt.as_str(),
            ],
        )?;
        std::thread::sleep(self.settle);
        ok(format!("GPS location set: ({}, {})", latitude, longitude));
        Ok(true)
    }

    fn get_location(&self) -> Result<bool> {
        let output = self.shell("dumpsys", &["location"])?.unwrap_or_default();
        match parse_dumpsys_location(&output) {
            Some(location) => {
                ok(format!(
                    "GPS location ({}): ({}, {}) alt {}",
                    location.provider, location.latitude, location.longitude, location.altitude
                ));
                Ok(true)
            }
            None => {
                fail("Unable to get GPS location");
                Ok(false)
            }
        }
    }

    fn device_info(&self) -> Result<bool> {
        let window = self.driver.window_size()?;
        let wm_size = self.shell("wm", &["size"]).ok().flatten();
        let wm_density = self.shell("wm", &["density"]).ok().flatten();
        let model = self.shell("getprop", &["ro.product.model"]).ok().flatten();
        let clean = |v: Option<String>| {
            v.map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "N/A".to_string())
        };

        let info = json!({
            "model": clean(model),
            "windowSize": {"width": window.width, "height": window.height},
            "wmSize": clean(wm_size),
            "wmDensity": clean(wm_density),
        });
        println!("  - Model: {}", info["model"].as_str().unwrap_or("N/A"));
        println!("  - Window size: {}", window);
        println!("  - Screen resolution: {}", info["wmSize"].as_str().unwrap_or("N/A"));
        println!("  - Screen DPI: {}", info["wmDensity"].as_str().unwrap_or("N/A"));

        let path = self.output_path("device_info.json")?;
        std::fs::write(&path, serde_json::to_string_pretty(&info)?)?;
        ok("Device info retrieved");
        Ok(true)
    }

    fn device_logs(&self) -> Result<bool> {
        let Some(logs) = self.shell("logcat", &["-d"])? else {
            fail("No logs returned");
            return Ok(false);
        };
        let name = format!("device_logs_{}.txt", Local::now().format("%Y%m%d_%H%M%S"));
        let path = self.output_path(&name)?;
        std::fs::write(&path, &logs)?;
        ok(format!(
            "Logs saved to {} ({:.2} KB)",
            path.display(),
            logs.len() as f64 / 1024.0
        ));
        Ok(true)
    }
}

/// Clickable elements and input fields found in a UI dump
fn print_ui_summary(xml: &str) {
    let (Ok(clickable), Ok(inputs)) = (
        Regex::new(r#"<[^>]*clickable="true"[^>]*>"#),
        Regex::new(r#"<[^>]*class="[^"]*EditText[^"]*"[^>]*>"#),
    ) else {
        return;
    };
    let attribute = |node: &str, name: &str| -> String {
        Regex::new(&format!(r#"{}="([^"]*)""#, regex::escape(name)))
            .ok()
            .and_then(|re| re.captures(node).map(|c| c[1].to_string()))
            .unwrap_or_default()
    };
    let center = |node: &str| -> Option<(i64, i64)> {
        let re = Regex::new(r#"bounds="\[(\d+),(\d+)\]\[(\d+),(\d+)\]""#).ok()?;
        let caps = re.captures(node)?;
        let n = |i: usize| caps[i].parse::<i64>().ok();
        Some(((n(1)? + n(3)?) / 2, (n(2)? + n(4)?) / 2))
    };

    let nodes: Vec<&str> = clickable.find_iter(xml).map(|m| m.as_str()).collect();
    if !nodes.is_empty() {
        println!("\n  Clickable elements ({} total):", nodes.len());
        let mut shown = 0;
        for node in nodes {
            if shown >= 15 {
                break;
            }
            let text = attribute(node, "text");
            let id = attribute(node, "resource-id");
            let desc = attribute(node, "content-desc");
            if text.is_empty() && id.is_empty() && desc.is_empty() {
                continue;
            }
            let label = if !text.is_empty() { text } else { desc };
            let short_id = id.rsplit('/').next().unwrap_or_default().to_string();
            match center(node) {
                Some((x, y)) => println!("    - {:<22} id={:<20} center=({}, {})", label, short_id, x, y),
                None => println!("    - {:<22} id={}", label, short_id),
            }
            shown += 1;
        }
    }

    let fields: Vec<&str> = inputs.find_iter(xml).map(|m| m.as_str()).collect();
    if !fields.is_empty() {
        println!("\n  Input fields ({} total):", fields.len());
        for node in fields.iter().take(5) {
            let id = attribute(node, "resource-id");
            println!("    - id={}", id.rsplit('/').next().unwrap_or_default());
        }
    }
}

fn print_summary(results: &[(String, bool)]) {
    println!("{}", "=".repeat(RULE_WIDTH));
    println!("Execution Summary");
    println!("{}", "=".repeat(RULE_WIDTH));
    for (action, succeeded) in results {
        let status = if *succeeded {
            "✓ Success".green()
        } else {
            "✗ Failed".red()
        };
        println!("{:<25} : {}", action, status);
    }
    println!("{}", "-".repeat(RULE_WIDTH));
    let passed = results.iter().filter(|(_, ok)| *ok).count();
    println!("Total: {}/{} succeeded", passed, results.len());
    println!("{}", "=".repeat(RULE_WIDTH));
}

/// Only the provider credentials matter for driving an existing sandbox
fn resolve_config(config_path: Option<&Path>) -> Result<SandstormConfig> {
    let config = ConfigLoader::new().load_raw(config_path)?;
    if config.provider.kind == ProviderKind::Remote {
        let mut missing = Vec::new();
        if config.provider.api_key.trim().is_empty() {
            missing.push("provider: api_key is required".to_string());
        }
        if config.provider.domain.trim().is_empty() {
            missing.push("provider: domain is required".to_string());
        }
        if !missing.is_empty() {
            return Err(ConfigError::Invalid(missing).into());
        }
    }
    Ok(config)
}

pub fn run(config_path: Option<&Path>, log_level: Option<&str>, args: &DriveArgs) -> Result<ExitCode> {
    if args.list_actions {
        print_action_list();
        return Ok(ExitCode::SUCCESS);
    }

    let config = resolve_config(config_path)?;
    sandstorm_logging::init_simple_tracing(log_level.unwrap_or(config.logging.level.as_filter()))?;
    let Some(sandbox_id) = args.sandbox_id.as_deref() else {
        bail!("--sandbox-id is required");
    };

    println!("{}", "=".repeat(RULE_WIDTH));
    println!("Sandbox ID: {}", sandbox_id);
    println!("Domain:     {}", config.provider.domain);
    println!("{}", "=".repeat(RULE_WIDTH));

    let (provider, drivers) = collaborators(&config)?;
    let runtime = build_worker_runtime(1).context("Failed to build runtime")?;
    let sandbox = match runtime.block_on(provider.connect(sandbox_id)) {
        Ok(sandbox) => {
            ok("Sandbox connected");
            sandbox
        }
        Err(e) => {
            fail(format!("Sandbox connection failed: {}", e.describe()));
            return Ok(ExitCode::FAILURE);
        }
    };

    let endpoint = DriverEndpoint {
        url: sandbox.endpoint(config.provider.driver_port),
        access_token: sandbox.access_token(),
    };
    let driver = match drivers.connect(&endpoint) {
        Ok(driver) => {
            ok(format!("Driver connected at {}", endpoint.url));
            driver
        }
        Err(e) => {
            fail(format!("Driver connection failed: {}", e.describe()));
            return Ok(ExitCode::FAILURE);
        }
    };
    println!();

    let session = DriveSession::new(driver.clone(), &config, DRIVE_OUTPUT_DIR);
    session.execute_all(&args.action, args);

    if let Err(e) = driver.quit() {
        warn_line(format!("Closing the session failed (ignored): {}", e));
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandstorm_core::DriverFactory;
    use sandstorm_execution::{FaultPlan, SimulatedDriverFactory};

    fn session(dir: &Path, faults: FaultPlan) -> (DriveSession, SandstormConfig) {
        let mut config = SandstormConfig::default();
        config.batch.settle_delay_ms = 0;
        config.app.apk_path = dir.join("app.apk").display().to_string();
        std::fs::write(dir.join("app.apk"), vec![3u8; 2048]).unwrap();

        let driver = SimulatedDriverFactory::new(Duration::ZERO, faults)
            .with_package(&config.app.package)
            .connect(&DriverEndpoint {
                url: "http://sim".to_string(),
                access_token: None,
            })
            .unwrap();
        (DriveSession::new(driver, &config, dir.join("out")), config)
    }

    #[test]
    fn test_action_names_round_trip() {
        for action in DriveAction::ALL {
            assert_eq!(action.name().parse::<DriveAction>(), Ok(action));
        }
        assert!("click_element".parse::<DriveAction>().is_err());
    }

    #[test]
    fn test_app_lifecycle_actions() {
        let dir = tempfile::tempdir().unwrap();
        let (session, _) = session(dir.path(), FaultPlan::default());
        let args = DriveArgs::default();

        let actions: Vec<String> = [
            "check_app",
            "upload_app",
            "install_app",
            "launch_app",
            "get_app_state",
            "close_app",
            "uninstall_app",
            "check_app",
        ]
        .iter()
        .map(|a| a.to_string())
        .collect();
        let results = session.execute_all(&actions, &args);

        let outcome: Vec<bool> = results.iter().map(|(_, ok)| *ok).collect();
        assert_eq!(outcome, vec![false, true, true, true, true, true, true, false]);
    }

    #[test]
    fn test_missing_parameters_fail_only_that_action() {
        let dir = tempfile::tempdir().unwrap();
        let (session, _) = session(dir.path(), FaultPlan::default());
        let args = DriveArgs {
            shell_cmd: Some("getprop ro.product.model".to_string()),
            ..Default::default()
        };

        let actions: Vec<String> = ["tap_screen", "bogus", "shell", "screenshot", "device_info"]
            .iter()
            .map(|a| a.to_string())
            .collect();
        let results = session.execute_all(&actions, &args);

        assert_eq!(
            results,
            vec![
                ("tap_screen".to_string(), false),
                ("bogus".to_string(), false),
                ("shell".to_string(), true),
                ("screenshot".to_string(), true),
                ("device_info".to_string(), true),
            ]
        );
        assert!(dir.path().join("out").join("device_info.json").exists());
    }

    #[test]
    fn test_failing_command_is_reported_not_propagated() {
        let dir = tempfile::tempdir().unwrap();
        let faults = FaultPlan {
            failing_commands: vec!["logcat".to_string()],
            ..Default::default()
        };
        let (session, _) = session(dir.path(), faults);

        let results = session.execute_all(&["get_device_logs".to_string()], &DriveArgs::default());
        assert_eq!(results, vec![("get_device_logs".to_string(), false)]);
    }

    #[test]
    fn test_parse_dumpsys_location() {
        let output = "Location Manager State:\n  \
            gps provider:\n    last location=null\n  \
            network provider:\n    \
            last location=Location[network 31.230416,121.473701 hAcc=20 et=+1d2h alt=12.5 vAcc=3]\n";

        let location = parse_dumpsys_location(output).unwrap();
        assert_eq!(location.provider, "network");
        assert_eq!(location.latitude, 31.230416);
        assert_eq!(location.longitude, 121.473701);
        assert_eq!(location.altitude, 12.5);

        assert_eq!(parse_dumpsys_location("no providers"), None);
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("abcdef", 3), "abc...");
        assert_eq!(truncate_chars("abc", 3), "abc");
    }
}
