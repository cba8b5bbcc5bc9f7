//! Error taxonomy and bounded failure descriptions

use thiserror::Error;

/// Longest error message kept in metrics and result records.
pub const MAX_ERROR_MESSAGE_LEN: usize = 200;

/// Longest response body excerpt included in a failure description.
pub const MAX_BODY_SNIPPET_LEN: usize = 200;

/// Longest failure description produced by [`ExternalFailure::describe`].
pub const MAX_DESCRIPTION_LEN: usize = 1024;

/// Harness-level errors. Configuration, provisioning and driver failures have
/// their own types (`ConfigError`, `ProvisionError`, `DriverError`).
#[derive(Debug, Error)]
pub enum HarnessError {
    /// A worker's result files were unusable at merge time
    #[error("Results of worker {worker_id} unavailable: {reason}")]
    AggregationGap { worker_id: usize, reason: String },

    /// Anything escaping a unit's workflow
    #[error("Unexpected failure: {0}")]
    Unexpected(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type HarnessResult<T> = Result<T, HarnessError>;

/// Truncate to at most `max` characters, respecting char boundaries.
pub fn truncate_message(message: &str, max: usize) -> String {
    match message.char_indices().nth(max) {
        Some((idx, _)) => message[..idx].to_string(),
        None => message.to_string(),
    }
}

/// Failures raised by external collaborators.
///
/// Implementors expose whatever protocol details they captured; `describe`
/// turns them into one bounded line suitable for metrics and reports.
pub trait ExternalFailure: std::error::Error {
    /// Short variant name, e.g. `ProvisionError::Http`
    fn kind(&self) -> &'static str;

    fn status_code(&self) -> Option<u16> {
        None
    }

    fn request_id(&self) -> Option<&str> {
        None
    }

    fn body_snippet(&self) -> Option<&str> {
        None
    }

    /// `METHOD url` of the failing request, when known
    fn request_line(&self) -> Option<&str> {
        None
    }

    fn describe(&self) -> String {
        let mut parts = vec![self.kind().to_string(), self.to_string()];

        if let Some(status) = self.status_code() {
            parts.push(format!("HTTP {}", status));
        }
        if let Some(request_id) = self.request_id() {
            parts.push(format!("Request-Id: {}", request_id));
        }
        if let Some(request) = self.request_line() {
            parts.push(format!("Request: {}", request));
        }
        if let Some(body) = self.body_snippet().filter(|b| !b.trim().is_empty()) {
            parts.push(format!(
                "Body: {}",
                truncate_message(body.trim(), MAX_BODY_SNIPPET_LEN)
            ));
        }

        let mut causes = Vec::new();
        let mut source = self.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }
        if !causes.is_empty() {
            parts.push(format!("Caused by: {}", causes.join(" <- ")));
        }

        truncate_message(&parts.join(" | "), MAX_DESCRIPTION_LEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("inner io failure")]
    struct Inner;

    #[derive(Debug, Error)]
    #[error("request rejected")]
    struct Rejected {
        body: String,
        #[source]
        inner: Inner,
    }

    impl ExternalFailure for Rejected {
        fn kind(&self) -> &'static str {
            "Rejected"
        }

        fn status_code(&self) -> Option<u16> {
            Some(429)
        }

        fn request_id(&self) -> Option<&str> {
            Some("req-7")
        }

        fn body_snippet(&self) -> Option<&str> {
            Some(&self.body)
        }
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_message("héllo", 2), "hé");
        assert_eq!(truncate_message("abc", 10), "abc");
        assert_eq!(truncate_message("", 3), "");
    }

    #[test]
    fn test_describe_includes_protocol_details_and_causes() {
        let err = Rejected {
            body: "slow down".to_string(),
            inner: Inner,
        };

        let text = err.describe();
        assert!(text.starts_with("Rejected | request rejected"));
        assert!(text.contains("HTTP 429"));
        assert!(text.contains("Request-Id: req-7"));
        assert!(text.contains("Body: slow down"));
        assert!(text.contains("Caused by: inner io failure"));
    }

    #[test]
    fn test_describe_bounds_body_and_total_length() {
        let err = Rejected {
            body: "x".repeat(10_000),
            inner: Inner,
        };

        let text = err.describe();
        let body = text
            .split(" | ")
            .find(|p| p.starts_with("Body: "))
            .unwrap();
        assert_eq!(body.len(), "Body: ".len() + MAX_BODY_SNIPPET_LEN);
        assert!(text.chars().count() <= MAX_DESCRIPTION_LEN);
    }

    #[test]
    fn test_aggregation_gap_names_worker() {
        let gap = HarnessError::AggregationGap {
            worker_id: 3,
            reason: "summary.json missing".to_string(),
        };
        assert_eq!(gap.to_string(), "Results of worker 3 unavailable: summary.json missing");
    }
}
