//! W3C WebDriver client for the automation server inside each sandbox
//!
//! Sessions are blocking: every call runs on a pool thread owned by the
//! unit that opened the session. Device-specific commands go through the
//! `mobile:` execute-script extensions.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue};
use sandstorm_config::ProviderConfig;
use sandstorm_core::{AppState, DeviceDriver, DriverEndpoint, DriverError, DriverFactory, ScreenSize};
use sandstorm_resilience::{RetryExecutor, RetryPolicy};
use serde_json::{json, Value as JsonValue};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::HttpConfig;
use crate::provisioning::ACCESS_TOKEN_HEADER;
use crate::types::{HttpMethod, WebDriverErrorValue};

const SESSION_ATTEMPTS: u32 = 3;
const SESSION_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Capabilities requested for every session
pub fn default_capabilities() -> JsonValue {
    json!({
        "platformName": "Android",
        "appium:automationName": "UiAutomator2",
        "appium:newCommandTimeout": 0,
    })
}

/// Opens WebDriver sessions against sandbox endpoints
pub struct WebDriverFactory {
    http: HttpConfig,
    retry: RetryPolicy,
    capabilities: JsonValue,
}

impl WebDriverFactory {
    pub fn new(http: &HttpConfig) -> Self {
        Self {
            http: http.clone(),
            retry: RetryPolicy::fixed(SESSION_ATTEMPTS - 1, SESSION_RETRY_DELAY),
            capabilities: default_capabilities(),
        }
    }

    pub fn from_provider(config: &ProviderConfig) -> Self {
        Self::new(&HttpConfig::from(config))
    }

    /// Override the session-creation retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_capabilities(mut self, capabilities: JsonValue) -> Self {
        self.capabilities = capabilities;
        self
    }

    fn build_client(&self, access_token: Option<&str>) -> Result<Client, DriverError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = access_token {
            let value = HeaderValue::from_str(token)
                .map_err(|e| DriverError::Session(format!("Invalid access token: {}", e)))?;
            headers.insert(ACCESS_TOKEN_HEADER, value);
        }

        Client::builder()
            .timeout(self.http.timeout)
            .connect_timeout(self.http.connect_timeout)
            .user_agent(self.http.user_agent.clone())
            .default_headers(headers)
            .build()
            .map_err(|e| DriverError::Transport {
                message: "failed to build client".to_string(),
                request: None,
                source: Some(Box::new(e)),
            })
    }
}

impl DriverFactory for WebDriverFactory {
    fn connect(&self, endpoint: &DriverEndpoint) -> Result<Arc<dyn DeviceDriver>, DriverError> {
        let client = self.build_client(endpoint.access_token.as_deref())?;
        let base = endpoint.url.trim_end_matches('/').to_string();
        let payload = json!({
            "capabilities": {
                "alwaysMatch": self.capabilities,
                "firstMatch": [{}],
            }
        });

        let outcome = RetryExecutor::new(self.retry.clone()).execute_blocking("webdriver session", |_| {
            let value = send(&client, HttpMethod::Post, &format!("{}/session", base), Some(&payload))?;
            session_id(&value)
        });
        let session_id = outcome.result?;
        info!("Opened WebDriver session {} at {}", session_id, base);

        Ok(Arc::new(WebDriverSession {
            client,
            base,
            session_id,
        }))
    }
}

fn session_id(value: &JsonValue) -> Result<String, DriverError> {
    value
        .get("sessionId")
        .and_then(JsonValue::as_str)
        .map(str::to_string)
        .ok_or_else(|| DriverError::Session("response carried no sessionId".to_string()))
}

/// Send one WebDriver request and unwrap the `value` member of the response
fn send(
    client: &Client,
    method: HttpMethod,
    url: &str,
    body: Option<&JsonValue>,
) -> Result<JsonValue, DriverError> {
    let request_line = format!("{} {}", method, url);
    debug!("{}", request_line);

    let mut request = client.request(method.into(), url);
    if let Some(body) = body {
        request = request.json(body);
    }

    let transport = |message: &str, e: reqwest::Error| DriverError::Transport {
        message: message.to_string(),
        request: Some(request_line.clone()),
        source: Some(Box::new(e)),
    };
    let response = request.send().map_err(|e| {
        let message = if e.is_timeout() { "request timed out" } else { "request failed" };
        transport(message, e)
    })?;
    let status = response.status();
    let text = response.text().map_err(|e| transport("failed to read body", e))?;

    if !status.is_success() {
        let message = serde_json::from_str::<JsonValue>(&text)
            .ok()
            .and_then(|v| v.get("value").cloned())
            .and_then(|v| serde_json::from_value::<WebDriverErrorValue>(v).ok())
            .map(|e| format!("{}: {}", e.error, e.message))
            .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
        return Err(DriverError::Http {
            status: status.as_u16(),
            message,
            request: Some(request_line),
            body: Some(text),
        });
    }

    if text.trim().is_empty() {
        return Ok(JsonValue::Null);
    }
    let parsed: JsonValue = serde_json::from_str(&text)
        .map_err(|e| DriverError::InvalidResponse(format!("{}: {}", request_line, e)))?;
    Ok(parsed.get("value").cloned().unwrap_or(JsonValue::Null))
}

fn optional_string(value: JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// One open WebDriver session
pub struct WebDriverSession {
    client: Client,
    base: String,
    session_id: String,
}

impl WebDriverSession {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn command(&self, method: HttpMethod, path: &str, body: Option<&JsonValue>) -> Result<JsonValue, DriverError> {
        let url = format!("{}/session/{}{}", self.base, self.session_id, path);
        send(&self.client, method, &url, body)
    }

    fn mobile(&self, script: &str, args: JsonValue) -> Result<JsonValue, DriverError> {
        let body = json!({
            "script": format!("mobile: {}", script),
            "args": [args],
        });
        self.command(HttpMethod::Post, "/execute/sync", Some(&body))
    }
}

impl DeviceDriver for WebDriverSession {
    fn execute_shell(&self, command: &str, args: &[String]) -> Result<Option<String>, DriverError> {
        let value = self.mobile("shell", json!({"command": command, "args": args}))?;
        Ok(match value {
            JsonValue::Object(map) => map.get("stdout").cloned().and_then(optional_string),
            other => optional_string(other),
        }
        .filter(|s| !s.is_empty()))
    }

    fn screenshot(&self, path: &Path) -> Result<bool, DriverError> {
        let value = self.command(HttpMethod::Get, "/screenshot", None)?;
        let Some(encoded) = value.as_str().filter(|s| !s.is_empty()) else {
            return Ok(false);
        };
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| DriverError::InvalidResponse(format!("screenshot is not base64: {}", e)))?;
        std::fs::write(path, bytes)?;
        Ok(true)
    }

    fn page_source(&self) -> Result<Option<String>, DriverError> {
        Ok(optional_string(self.command(HttpMethod::Get, "/source", None)?))
    }

    fn window_size(&self) -> Result<ScreenSize, DriverError> {
        let value = self.command(HttpMethod::Get, "/window/rect", None)?;
        let dimension = |name: &str| {
            value
                .get(name)
                .and_then(JsonValue::as_f64)
                .map(|v| v as u32)
                .ok_or_else(|| DriverError::InvalidResponse(format!("window rect has no {}", name)))
        };
        Ok(ScreenSize {
            width: dimension("width")?,
            height: dimension("height")?,
        })
    }

    fn query_app_state(&self, package: &str) -> Result<AppState, DriverError> {
        let value = self.mobile("queryAppState", json!({"appId": package}))?;
        value
            .as_i64()
            .map(AppState::from_code)
            .ok_or_else(|| DriverError::InvalidResponse(format!("unexpected app state {}", value)))
    }

    fn activate_app(&self, package: &str) -> Result<(), DriverError> {
        self.mobile("activateApp", json!({"appId": package}))?;
        Ok(())
    }

    fn terminate_app(&self, package: &str) -> Result<bool, DriverError> {
        Ok(self
            .mobile("terminateApp", json!({"appId": package}))?
            .as_bool()
            .unwrap_or(false))
    }

    fn remove_app(&self, package: &str) -> Result<bool, DriverError> {
        Ok(self
            .mobile("removeApp", json!({"appId": package}))?
            .as_bool()
            .unwrap_or(false))
    }

    fn push_file(&self, remote_path: &str, payload: &str) -> Result<(), DriverError> {
        self.mobile("pushFile", json!({"remotePath": remote_path, "payload": payload}))?;
        Ok(())
    }

    fn current_activity(&self) -> Result<Option<String>, DriverError> {
        Ok(optional_string(self.mobile("getCurrentActivity", json!({}))?))
    }

    fn current_package(&self) -> Result<Option<String>, DriverError> {
        Ok(optional_string(self.mobile("getCurrentPackage", json!({}))?))
    }

    fn quit(&self) -> Result<(), DriverError> {
        let url = format!("{}/session/{}", self.base, self.session_id);
        send(&self.client, HttpMethod::Delete, &url, None)?;
        debug!("Closed WebDriver session {}", self.session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandstorm_core::ExternalFailure;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn factory() -> WebDriverFactory {
        WebDriverFactory::new(&HttpConfig::default())
            .with_retry(RetryPolicy::fixed(2, Duration::from_millis(10)))
    }

    fn endpoint(base: &str) -> DriverEndpoint {
        DriverEndpoint {
            url: base.to_string(),
            access_token: Some("tok-1".to_string()),
        }
    }

    async fn mount_session(mock_server: &MockServer, session_id: &str) {
        Mock::given(method("POST"))
            .and(path("/session"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"value": {"sessionId": session_id, "capabilities": {}}})),
            )
            .mount(mock_server)
            .await;
    }

    /// The blocking client must not run on an async worker thread
    async fn blocking<T, F>(job: F) -> T
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        tokio::task::spawn_blocking(job).await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_session_shell_and_quit() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/session"))
            .and(header("x-access-token", "tok-1"))
            .and(body_partial_json(json!({
                "capabilities": {"alwaysMatch": {"appium:automationName": "UiAutomator2"}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": {"sessionId": "s-1", "capabilities": {}}})))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/session/s-1/execute/sync"))
            .and(body_partial_json(json!({"script": "mobile: shell"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": "Sandstorm Virtual Device\n"})))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/session/s-1/window/rect"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"value": {"x": 0, "y": 0, "width": 1080, "height": 1920}})),
            )
            .mount(&mock_server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/session/s-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": null})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let base = mock_server.uri();
        let (output, size) = blocking(move || {
            let driver = factory().connect(&endpoint(&base)).unwrap();
            let output = driver
                .execute_shell("getprop", &["ro.product.model".to_string()])
                .unwrap();
            let size = driver.window_size().unwrap();
            driver.quit().unwrap();
            (output, size)
        })
        .await;

        assert_eq!(output.as_deref(), Some("Sandstorm Virtual Device\n"));
        assert_eq!(size, ScreenSize { width: 1080, height: 1920 });
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_session_creation_retried() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/session"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "value": {"error": "session not created", "message": "device offline"}
            })))
            .up_to_n_times(1)
            .expect(1)
            .mount(&mock_server)
            .await;
        mount_session(&mock_server, "s-2").await;

        let base = mock_server.uri();
        let connected = blocking(move || factory().connect(&endpoint(&base)).is_ok()).await;
        assert!(connected);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_command_error_carries_protocol_details() {
        let mock_server = MockServer::start().await;
        mount_session(&mock_server, "s-3").await;
        Mock::given(method("GET"))
            .and(path("/session/s-3/source"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "value": {"error": "no such element", "message": "nothing matched"}
            })))
            .mount(&mock_server)
            .await;

        let base = mock_server.uri();
        let err = blocking(move || {
            let driver = factory().connect(&endpoint(&base)).unwrap();
            driver.page_source().unwrap_err()
        })
        .await;

        assert_eq!(err.status_code(), Some(404));
        assert_eq!(err.to_string(), "no such element: nothing matched");
        assert!(err.describe().contains("Request: GET "));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_screenshot_written_to_disk() {
        let mock_server = MockServer::start().await;
        mount_session(&mock_server, "s-4").await;
        let png = STANDARD.encode([0x89u8, b'P', b'N', b'G']);
        Mock::given(method("GET"))
            .and(path("/session/s-4/screenshot"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": png})))
            .mount(&mock_server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let shot = dir.path().join("shot.png");
        let base = mock_server.uri();
        let target = shot.clone();
        let written = blocking(move || {
            let driver = factory().connect(&endpoint(&base)).unwrap();
            driver.screenshot(&target).unwrap()
        })
        .await;

        assert!(written);
        assert_eq!(std::fs::read(&shot).unwrap(), vec![0x89u8, b'P', b'N', b'G']);
    }
}
