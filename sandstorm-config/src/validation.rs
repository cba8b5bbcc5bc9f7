//! Configuration validation traits and utilities

use crate::error::{ConfigError, ConfigResult};

/// Trait for validatable configuration
pub trait Validatable {
    /// Validate the configuration, reporting every violation at once
    fn validate(&self) -> ConfigResult<()>;

    /// Get the domain name for error reporting
    fn domain_name(&self) -> &'static str;

    /// Helper to create a domain-specific validation error
    fn validation_error(&self, message: impl Into<String>) -> ConfigError {
        ConfigError::DomainError {
            domain: self.domain_name().to_string(),
            message: message.into(),
        }
    }
}

/// Accumulates violations instead of stopping at the first one.
#[derive(Debug, Default)]
pub struct Violations {
    messages: Vec<String>,
}

impl Violations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the error of a failed check, if any.
    pub fn check(&mut self, result: ConfigResult<()>) {
        if let Err(err) = result {
            self.absorb(err);
        }
    }

    pub fn push(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    /// Record an error, unpacking nested violation lists.
    pub fn absorb(&mut self, err: ConfigError) {
        match err {
            ConfigError::Invalid(messages) => self.messages.extend(messages),
            other => self.messages.push(other.to_string()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn into_result(self) -> ConfigResult<()> {
        if self.messages.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(self.messages))
        }
    }
}

/// Validate a required string field
pub fn validate_required_string(value: &str, field_name: &str, domain: &str) -> ConfigResult<()> {
    if value.trim().is_empty() {
        return Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!("{} cannot be empty", field_name),
        });
    }
    Ok(())
}

/// Validate a positive number
pub fn validate_positive<T>(value: T, field_name: &str, domain: &str) -> ConfigResult<()>
where
    T: PartialOrd + Default + std::fmt::Display,
{
    if value <= T::default() {
        return Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!("{} must be greater than 0, got {}", field_name, value),
        });
    }
    Ok(())
}

/// Validate a lower bound
pub fn validate_at_least<T>(value: T, minimum: T, field_name: &str, domain: &str) -> ConfigResult<()>
where
    T: PartialOrd + std::fmt::Display,
{
    if value < minimum {
        return Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!("{} must be >= {}, got {}", field_name, minimum, value),
        });
    }
    Ok(())
}

/// Validate a URL
pub fn validate_url(url: &str, field_name: &str, domain: &str) -> ConfigResult<()> {
    validate_required_string(url, field_name, domain)?;

    url::Url::parse(url).map_err(|e| ConfigError::DomainError {
        domain: domain.to_string(),
        message: format!("{} has invalid URL format: {}", field_name, e),
    })?;

    Ok(())
}

/// Validate a port number
pub fn validate_port_range(port: u16, field_name: &str, domain: &str) -> ConfigResult<()> {
    if port == 0 {
        return Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!("{} cannot be 0", field_name),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violations_collect_everything() {
        let mut violations = Violations::new();
        violations.check(validate_required_string("", "api_key", "provider"));
        violations.check(validate_positive(0usize, "unit_count", "batch"));
        violations.check(validate_at_least(30u64, 60, "sandbox_timeout", "provider"));
        violations.check(validate_port_range(4723, "driver_port", "provider"));

        match violations.into_result() {
            Err(ConfigError::Invalid(messages)) => {
                assert_eq!(messages.len(), 3);
                assert_eq!(messages[0], "provider: api_key cannot be empty");
                assert!(messages[2].contains("sandbox_timeout must be >= 60"));
            }
            other => panic!("expected collected violations, got {:?}", other),
        }
    }

    #[test]
    fn test_absorb_flattens_nested_lists() {
        let mut violations = Violations::new();
        violations.absorb(ConfigError::Invalid(vec!["a".into(), "b".into()]));
        violations.push("c");
        assert_eq!(violations.into_result().unwrap_err().messages(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_url_validation() {
        assert!(validate_url("https://example.com", "browser_url", "batch").is_ok());
        assert!(validate_url("not a url", "browser_url", "batch").is_err());
        assert!(validate_url("", "browser_url", "batch").is_err());
    }
}
