//! REST client for the sandbox provisioning service

use async_trait::async_trait;
use sandstorm_config::ProviderConfig;
use sandstorm_core::{ProvisionError, SandboxHandle, SandboxProvider};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::HttpConfig;
use crate::errors::HttpError;
use crate::types::{ApiErrorBody, CreateSandboxRequest, HttpMethod, SandboxInfo};

pub const API_KEY_HEADER: &str = "X-API-Key";
/// Header the sandbox proxy expects on forwarded requests
pub const ACCESS_TOKEN_HEADER: &str = "X-Access-Token";
const REQUEST_ID_HEADER: &str = "x-request-id";

struct ApiClient {
    client: reqwest::Client,
    base: String,
    api_key: String,
}

impl ApiClient {
    async fn send(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<&JsonValue>,
    ) -> Result<Option<JsonValue>, ProvisionError> {
        let url = format!("{}{}", self.base, path);
        let request_line = format!("{} {}", method, url);
        debug!("{}", request_line);

        let mut request = self
            .client
            .request(method.into(), &url)
            .header(API_KEY_HEADER, &self.api_key);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| transport_failure(&request_line, e))?;
        let status = response.status();
        let request_id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let text = response
            .text()
            .await
            .map_err(|e| transport_failure(&request_line, e))?;

        if !status.is_success() {
            return Err(http_failure(status.as_u16(), request_id, request_line, text));
        }
        if text.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| ProvisionError::InvalidResponse(format!("{}: {}", request_line, e)))
    }
}

fn transport_failure(request_line: &str, error: reqwest::Error) -> ProvisionError {
    let message = if error.is_timeout() {
        "request timed out".to_string()
    } else if error.is_connect() {
        "connection failed".to_string()
    } else {
        "request failed".to_string()
    };
    ProvisionError::Transport {
        message,
        request: Some(request_line.to_string()),
        source: Some(Box::new(error)),
    }
}

fn http_failure(
    status: u16,
    request_id: Option<String>,
    request_line: String,
    body: String,
) -> ProvisionError {
    let message = serde_json::from_str::<ApiErrorBody>(&body)
        .map(|e| e.message)
        .unwrap_or_else(|_| {
            reqwest::StatusCode::from_u16(status)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or("request rejected")
                .to_string()
        });
    ProvisionError::Http {
        status,
        message,
        request_id,
        request: Some(request_line),
        body: Some(body),
    }
}

fn parse_info(value: Option<JsonValue>, request: &str) -> Result<SandboxInfo, ProvisionError> {
    let value = value.ok_or_else(|| ProvisionError::InvalidResponse(format!("{}: empty body", request)))?;
    serde_json::from_value(value)
        .map_err(|e| ProvisionError::InvalidResponse(format!("{}: {}", request, e)))
}

/// Provisioning service reached at `https://api.<domain>`
pub struct RemoteSandboxProvider {
    api: Arc<ApiClient>,
    domain: String,
}

impl RemoteSandboxProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, HttpError> {
        let api_base = format!("https://api.{}", config.domain);
        Self::with_api_base(config, &api_base)
    }

    /// Use an explicit API base instead of the one derived from the domain
    pub fn with_api_base(config: &ProviderConfig, api_base: &str) -> Result<Self, HttpError> {
        let base = Url::parse(api_base).map_err(|e| HttpError::InvalidUrl(format!("{}: {}", api_base, e)))?;
        let http = HttpConfig::from(config);
        let client = reqwest::Client::builder()
            .timeout(http.timeout)
            .connect_timeout(http.connect_timeout)
            .user_agent(&http.user_agent)
            .build()?;

        Ok(Self {
            api: Arc::new(ApiClient {
                client,
                base: base.as_str().trim_end_matches('/').to_string(),
                api_key: config.api_key.clone(),
            }),
            domain: config.domain.clone(),
        })
    }

    fn handle(&self, info: SandboxInfo) -> Arc<dyn SandboxHandle> {
        Arc::new(RemoteSandbox {
            domain: info.domain.unwrap_or_else(|| self.domain.clone()),
            id: info.sandbox_id,
            access_token: info.access_token,
            api: self.api.clone(),
        })
    }
}

#[async_trait]
impl SandboxProvider for RemoteSandboxProvider {
    async fn warm_up(&self) -> Result<(), ProvisionError> {
        self.api.send(HttpMethod::Get, "/sandboxes", None).await?;
        Ok(())
    }

    async fn create(
        &self,
        template: &str,
        idle_timeout: Duration,
    ) -> Result<Arc<dyn SandboxHandle>, ProvisionError> {
        let body = serde_json::to_value(CreateSandboxRequest {
            template_id: template.to_string(),
            timeout: idle_timeout.as_secs(),
        })
        .map_err(|e| ProvisionError::InvalidResponse(e.to_string()))?;

        let value = self.api.send(HttpMethod::Post, "/sandboxes", Some(&body)).await?;
        Ok(self.handle(parse_info(value, "POST /sandboxes")?))
    }

    async fn connect(&self, sandbox_id: &str) -> Result<Arc<dyn SandboxHandle>, ProvisionError> {
        let path = format!("/sandboxes/{}", sandbox_id);
        match self.api.send(HttpMethod::Get, &path, None).await {
            Ok(value) => Ok(self.handle(parse_info(value, &path)?)),
            Err(ProvisionError::Http { status: 404, .. }) => {
                Err(ProvisionError::NotFound(sandbox_id.to_string()))
            }
            Err(e) => Err(e),
        }
    }
}

struct RemoteSandbox {
    id: String,
    domain: String,
    access_token: Option<String>,
    api: Arc<ApiClient>,
}

#[async_trait]
impl SandboxHandle for RemoteSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    fn endpoint(&self, port: u16) -> String {
        format!("https://{}-{}.{}", port, self.id, self.domain)
    }

    fn access_token(&self) -> Option<String> {
        self.access_token.clone()
    }

    async fn kill(&self) -> Result<(), ProvisionError> {
        let path = format!("/sandboxes/{}", self.id);
        match self.api.send(HttpMethod::Delete, &path, None).await {
            Ok(_) => Ok(()),
            // Already gone
            Err(ProvisionError::Http { status: 404, .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandstorm_core::ExternalFailure;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config() -> ProviderConfig {
        ProviderConfig {
            api_key: "key-123".to_string(),
            domain: "sandbox.example.com".to_string(),
            template: "mobile-v1".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_and_kill() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/sandboxes"))
            .and(header("x-api-key", "key-123"))
            .and(body_partial_json(json!({"templateID": "mobile-v1", "timeout": 300})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "sandboxID": "sbx42",
                "clientID": "c1",
                "envdAccessToken": "tok"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        // A 404 on delete means the sandbox is already gone
        Mock::given(method("DELETE"))
            .and(path("/sandboxes/sbx42"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(json!({"code": 404, "message": "sandbox not found"})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider = RemoteSandboxProvider::with_api_base(&config(), &mock_server.uri()).unwrap();

        let sandbox = provider
            .create("mobile-v1", Duration::from_secs(300))
            .await
            .unwrap();
        assert_eq!(sandbox.id(), "sbx42");
        assert_eq!(sandbox.endpoint(4723), "https://4723-sbx42.sandbox.example.com");
        assert_eq!(sandbox.access_token().as_deref(), Some("tok"));

        sandbox.kill().await.unwrap();
    }

    #[tokio::test]
    async fn test_http_failure_is_described() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/sandboxes"))
            .respond_with(
                ResponseTemplate::new(500)
                    .insert_header("X-Request-Id", "req-9")
                    .set_body_json(json!({"code": 500, "message": "capacity exhausted"})),
            )
            .mount(&mock_server)
            .await;

        let provider = RemoteSandboxProvider::with_api_base(&config(), &mock_server.uri()).unwrap();

        let err = match provider.create("mobile-v1", Duration::from_secs(300)).await {
            Err(e) => e,
            Ok(_) => panic!("create should fail"),
        };
        assert_eq!(err.status_code(), Some(500));
        let description = err.describe();
        assert!(description.contains("capacity exhausted"));
        assert!(description.contains("HTTP 500"));
        assert!(description.contains("Request-Id: req-9"));
        assert!(description.contains("Request: POST "));
    }

    #[tokio::test]
    async fn test_connect_unknown_sandbox() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/sandboxes/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "nope"})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider = RemoteSandboxProvider::with_api_base(&config(), &mock_server.uri()).unwrap();

        let result = provider.connect("missing").await;
        assert!(matches!(result, Err(ProvisionError::NotFound(id)) if id == "missing"));
    }

    #[tokio::test]
    async fn test_warm_up_lists_sandboxes() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/sandboxes"))
            .and(header("x-api-key", "key-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider = RemoteSandboxProvider::with_api_base(&config(), &mock_server.uri()).unwrap();
        provider.warm_up().await.unwrap();
    }

    #[test]
    fn test_invalid_api_base_rejected() {
        assert!(matches!(
            RemoteSandboxProvider::with_api_base(&config(), "not a url"),
            Err(HttpError::InvalidUrl(_))
        ));
    }
}
