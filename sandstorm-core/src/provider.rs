//! Sandbox provisioning service interface

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::error::ExternalFailure;

/// Provisioning failures
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The service answered with a non-success status
    #[error("{message}")]
    Http {
        status: u16,
        message: String,
        request_id: Option<String>,
        request: Option<String>,
        body: Option<String>,
    },

    /// The request never produced a response
    #[error("Transport failure: {message}")]
    Transport {
        message: String,
        request: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Sandbox not found: {0}")]
    NotFound(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Injected by the simulated provider
    #[error("Simulated failure: {0}")]
    Simulated(String),
}

impl ExternalFailure for ProvisionError {
    fn kind(&self) -> &'static str {
        match self {
            ProvisionError::Http { .. } => "ProvisionError::Http",
            ProvisionError::Transport { .. } => "ProvisionError::Transport",
            ProvisionError::NotFound(_) => "ProvisionError::NotFound",
            ProvisionError::InvalidResponse(_) => "ProvisionError::InvalidResponse",
            ProvisionError::Simulated(_) => "ProvisionError::Simulated",
        }
    }

    fn status_code(&self) -> Option<u16> {
        match self {
            ProvisionError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    fn request_id(&self) -> Option<&str> {
        match self {
            ProvisionError::Http { request_id, .. } => request_id.as_deref(),
            _ => None,
        }
    }

    fn body_snippet(&self) -> Option<&str> {
        match self {
            ProvisionError::Http { body, .. } => body.as_deref(),
            _ => None,
        }
    }

    fn request_line(&self) -> Option<&str> {
        match self {
            ProvisionError::Http { request, .. } | ProvisionError::Transport { request, .. } => {
                request.as_deref()
            }
            _ => None,
        }
    }
}

/// A live remote sandbox.
#[async_trait]
pub trait SandboxHandle: Send + Sync {
    /// Identifier assigned by the provisioning service
    fn id(&self) -> &str;

    /// Public URL of a port exposed by the sandbox
    fn endpoint(&self, port: u16) -> String;

    /// Token the sandbox expects on proxied requests
    fn access_token(&self) -> Option<String>;

    /// Destroy the sandbox. Killing an already dead sandbox succeeds.
    async fn kill(&self) -> Result<(), ProvisionError>;
}

/// Asynchronous provisioning service.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Prime connection pools before units start.
    async fn warm_up(&self) -> Result<(), ProvisionError> {
        Ok(())
    }

    /// Create a sandbox from `template`. `idle_timeout` is the sandbox's
    /// lifetime without activity, not a deadline for this call.
    async fn create(
        &self,
        template: &str,
        idle_timeout: Duration,
    ) -> Result<Arc<dyn SandboxHandle>, ProvisionError>;

    /// Attach to an existing sandbox.
    async fn connect(&self, sandbox_id: &str) -> Result<Arc<dyn SandboxHandle>, ProvisionError>;
}
