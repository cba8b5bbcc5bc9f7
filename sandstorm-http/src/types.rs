//! HTTP types and wire formats

use serde::{Deserialize, Serialize};
use std::fmt;

/// Methods used by the adapters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Body of `POST /sandboxes`
#[derive(Debug, Clone, Serialize)]
pub struct CreateSandboxRequest {
    #[serde(rename = "templateID")]
    pub template_id: String,
    /// Idle lifetime in seconds
    pub timeout: u64,
}

/// A sandbox as returned by the provisioning API
#[derive(Debug, Clone, Deserialize)]
pub struct SandboxInfo {
    #[serde(rename = "sandboxID")]
    pub sandbox_id: String,
    #[serde(rename = "clientID", default)]
    pub client_id: Option<String>,
    #[serde(rename = "envdAccessToken", default)]
    pub access_token: Option<String>,
    /// Set when the sandbox lives under a different domain than the API
    #[serde(default)]
    pub domain: Option<String>,
}

/// Error payload of a provisioning API response
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: Option<u16>,
    pub message: String,
}

/// Error object inside a WebDriver response's `value`
#[derive(Debug, Clone, Deserialize)]
pub struct WebDriverErrorValue {
    pub error: String,
    #[serde(default)]
    pub message: String,
}
