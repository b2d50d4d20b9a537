//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges and cross-field
//! constraints. Every problem is reported, not just the first.

use std::fmt;

use crate::config::schema::ClientConfig;
use crate::schema::compile_definition;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ClientConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if url::Url::parse(&config.transport.base_url).is_err() {
        errors.push(ValidationError::new(
            "transport.base_url",
            format!("'{}' is not a valid URL", config.transport.base_url),
        ));
    }

    if config.timeout_ms == 0 {
        errors.push(ValidationError::new("timeout_ms", "must be greater than 0"));
    }

    let retry = &config.retry;
    if retry.max_delay_ms < retry.base_delay_ms {
        errors.push(ValidationError::new(
            "retry.max_delay_ms",
            "must be greater than or equal to retry.base_delay_ms",
        ));
    }

    let breaker = &config.circuit_breaker;
    if breaker.failure_threshold == 0 {
        errors.push(ValidationError::new(
            "circuit_breaker.failure_threshold",
            "must be greater than 0",
        ));
    }
    if breaker.monitoring_period_ms == 0 {
        errors.push(ValidationError::new(
            "circuit_breaker.monitoring_period_ms",
            "must be greater than 0",
        ));
    }

    let rate = &config.rate_limit;
    if rate.queue_processing_interval_ms == 0 {
        errors.push(ValidationError::new(
            "rate_limit.queue_processing_interval_ms",
            "must be greater than 0",
        ));
    }
    if rate.max_queue_size == 0 {
        errors.push(ValidationError::new(
            "rate_limit.max_queue_size",
            "must be greater than 0",
        ));
    }
    if rate.requests_per_interval == 0 {
        errors.push(ValidationError::new(
            "rate_limit.requests_per_interval",
            "must be greater than 0",
        ));
    }

    if config.session.session_token_expires_at_ms.is_some() && config.session.session_token.is_none() {
        errors.push(ValidationError::new(
            "session.session_token_expires_at_ms",
            "set without session.session_token",
        ));
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<std::net::SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "is not a valid socket address",
        ));
    }

    for (name, definition) in &config.schemas {
        if let Err(e) = compile_definition(definition) {
            errors.push(ValidationError::new(format!("schemas.{}", name), e));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&ClientConfig::default()).is_ok());
    }

    #[test]
    fn test_reports_all_errors() {
        let mut config = ClientConfig::default();
        config.timeout_ms = 0;
        config.circuit_breaker.failure_threshold = 0;
        config.retry.base_delay_ms = 5000;
        config.retry.max_delay_ms = 100;
        config.transport.base_url = "not a url".to_string();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "transport.base_url",
                "timeout_ms",
                "retry.max_delay_ms",
                "circuit_breaker.failure_threshold",
            ]
        );
    }

    #[test]
    fn test_bad_schema_pattern() {
        let raw = r#"
            [schemas.Broken]
            type = "string"
            pattern = "(unclosed"
        "#;
        let config: ClientConfig = toml::from_str(raw).unwrap();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "schemas.Broken");
    }
}
