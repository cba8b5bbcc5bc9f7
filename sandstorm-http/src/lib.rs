//! HTTP adapters for Sandstorm's external collaborators
//!
//! [`RemoteSandboxProvider`] talks to the sandbox provisioning REST API with
//! an async client. [`WebDriverFactory`] opens W3C WebDriver sessions against
//! the automation server exposed by each sandbox, using a blocking client
//! since driver calls always run on pool threads.

pub mod config;
pub mod errors;
pub mod provisioning;
pub mod types;
pub mod webdriver;

pub use config::HttpConfig;
pub use errors::HttpError;
pub use provisioning::{RemoteSandboxProvider, ACCESS_TOKEN_HEADER, API_KEY_HEADER};
pub use types::HttpMethod;
pub use webdriver::{default_capabilities, WebDriverFactory, WebDriverSession};
