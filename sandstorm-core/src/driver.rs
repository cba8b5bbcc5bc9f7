//! Blocking device-automation driver interface

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::error::ExternalFailure;

/// Driver failures
#[derive(Debug, Error)]
pub enum DriverError {
    /// The automation server answered with an error
    #[error("{message}")]
    Http {
        status: u16,
        message: String,
        request: Option<String>,
        body: Option<String>,
    },

    #[error("Transport failure: {message}")]
    Transport {
        message: String,
        request: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Session error: {0}")]
    Session(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Simulated failure: {0}")]
    Simulated(String),
}

impl ExternalFailure for DriverError {
    fn kind(&self) -> &'static str {
        match self {
            DriverError::Http { .. } => "DriverError::Http",
            DriverError::Transport { .. } => "DriverError::Transport",
            DriverError::Session(_) => "DriverError::Session",
            DriverError::InvalidResponse(_) => "DriverError::InvalidResponse",
            DriverError::Io(_) => "DriverError::Io",
            DriverError::Simulated(_) => "DriverError::Simulated",
        }
    }

    fn status_code(&self) -> Option<u16> {
        match self {
            DriverError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    fn body_snippet(&self) -> Option<&str> {
        match self {
            DriverError::Http { body, .. } => body.as_deref(),
            _ => None,
        }
    }

    fn request_line(&self) -> Option<&str> {
        match self {
            DriverError::Http { request, .. } | DriverError::Transport { request, .. } => {
                request.as_deref()
            }
            _ => None,
        }
    }
}

/// Application lifecycle state as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppState {
    NotInstalled,
    NotRunning,
    BackgroundSuspended,
    Background,
    Foreground,
    Unknown(i64),
}

impl AppState {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => AppState::NotInstalled,
            1 => AppState::NotRunning,
            2 => AppState::BackgroundSuspended,
            3 => AppState::Background,
            4 => AppState::Foreground,
            other => AppState::Unknown(other),
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            AppState::NotInstalled => 0,
            AppState::NotRunning => 1,
            AppState::BackgroundSuspended => 2,
            AppState::Background => 3,
            AppState::Foreground => 4,
            AppState::Unknown(code) => *code,
        }
    }

    pub fn is_installed(&self) -> bool {
        !matches!(self, AppState::NotInstalled)
    }
}

impl fmt::Display for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AppState::NotInstalled => "Not installed",
            AppState::NotRunning => "Not running",
            AppState::BackgroundSuspended => "Background (suspended)",
            AppState::Background => "Background (running)",
            AppState::Foreground => "Foreground (running)",
            AppState::Unknown(_) => "Unknown",
        };
        write!(f, "{} ({})", self.code(), label)
    }
}

/// Device window dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

impl Default for ScreenSize {
    fn default() -> Self {
        Self {
            width: 720,
            height: 1280,
        }
    }
}

impl fmt::Display for ScreenSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Where and how to reach a device automation server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverEndpoint {
    pub url: String,
    pub access_token: Option<String>,
}

/// Remote-control session on one device. Every call blocks the calling thread.
pub trait DeviceDriver: Send + Sync {
    /// Run a shell command; `None` when the command printed nothing.
    fn execute_shell(&self, command: &str, args: &[String]) -> Result<Option<String>, DriverError>;

    /// Save a PNG screenshot to `path`; `false` when the server produced none.
    fn screenshot(&self, path: &Path) -> Result<bool, DriverError>;

    /// Current UI hierarchy as XML.
    fn page_source(&self) -> Result<Option<String>, DriverError>;

    fn window_size(&self) -> Result<ScreenSize, DriverError>;

    fn query_app_state(&self, package: &str) -> Result<AppState, DriverError>;

    fn activate_app(&self, package: &str) -> Result<(), DriverError>;

    fn terminate_app(&self, package: &str) -> Result<bool, DriverError>;

    fn remove_app(&self, package: &str) -> Result<bool, DriverError>;

    /// Write base64 `payload` to `remote_path` on the device.
    fn push_file(&self, remote_path: &str, payload: &str) -> Result<(), DriverError>;

    fn current_activity(&self) -> Result<Option<String>, DriverError>;

    fn current_package(&self) -> Result<Option<String>, DriverError>;

    /// End the session.
    fn quit(&self) -> Result<(), DriverError>;
}

/// Builds driver sessions. Blocking.
pub trait DriverFactory: Send + Sync {
    fn connect(&self, endpoint: &DriverEndpoint) -> Result<Arc<dyn DeviceDriver>, DriverError>;
}
