//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (delays > 0, base <= max, capacity > 0)
//! - Check URLs and socket addresses parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ResilienceConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use thiserror::Error;
use url::Url;

use crate::config::schema::{ResilienceConfig, RetryConfig};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Validate a full configuration.
pub fn validate_config(config: &ResilienceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = validate_retry(&config.retry);

    if config.queue.capacity == 0 {
        errors.push(ValidationError::new("queue.capacity", "must be greater than 0"));
    }
    if config.queue.default_max_attempts == 0 {
        errors.push(ValidationError::new(
            "queue.default_max_attempts",
            "must be greater than 0",
        ));
    }
    if config.queue.storage_key.trim().is_empty() {
        errors.push(ValidationError::new("queue.storage_key", "must not be empty"));
    }
    if config.queue.drain_interval_secs == 0 {
        errors.push(ValidationError::new(
            "queue.drain_interval_secs",
            "must be greater than 0",
        ));
    }

    if config.connection.recheck_interval_secs == 0 {
        errors.push(ValidationError::new(
            "connection.recheck_interval_secs",
            "must be greater than 0",
        ));
    }
    if config.connection.probe_interval_secs == 0 {
        errors.push(ValidationError::new(
            "connection.probe_interval_secs",
            "must be greater than 0",
        ));
    }
    if let Err(e) = Url::parse(&config.connection.probe_url) {
        errors.push(ValidationError::new(
            "connection.probe_url",
            format!("invalid URL: {}", e),
        ));
    }

    if config.transport.request_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "transport.request_timeout_secs",
            "must be greater than 0",
        ));
    }

    if config.storage.directory.trim().is_empty() {
        errors.push(ValidationError::new("storage.directory", "must not be empty"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "must be a socket address (host:port)",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate the retry section on its own (also used before hot-swapping a policy).
pub fn validate_retry(retry: &RetryConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if retry.base_delay_ms == 0 {
        errors.push(ValidationError::new("retry.base_delay_ms", "must be greater than 0"));
    }
    if retry.max_delay_ms == 0 {
        errors.push(ValidationError::new("retry.max_delay_ms", "must be greater than 0"));
    }
    if retry.base_delay_ms > retry.max_delay_ms {
        errors.push(ValidationError::new(
            "retry.base_delay_ms",
            format!(
                "base delay {}ms exceeds max delay {}ms",
                retry.base_delay_ms, retry.max_delay_ms
            ),
        ));
    }

    errors
}
