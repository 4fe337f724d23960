//! Failure classification.
//!
//! # Taxonomy
//! - Network: connectivity and timeouts, retryable
//! - Client: 4xx, the caller must fix the request
//! - Server: 5xx, transient, retryable up to a lower ceiling
//! - RateLimited: 429, retryable after the server's wait when given
//! - Unknown: anything else, never retried

use std::time::Duration;

use crate::http::RequestError;

/// Broad class of a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Network,
    Client(u16),
    Server(u16),
    RateLimited { retry_after: Option<Duration> },
    Unknown,
}

impl ErrorClass {
    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorClass::Network => "network",
            ErrorClass::Client(_) => "client",
            ErrorClass::Server(_) => "server",
            ErrorClass::RateLimited { .. } => "rate_limited",
            ErrorClass::Unknown => "unknown",
        }
    }

    /// Whether any retry is ever worth attempting.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorClass::Network | ErrorClass::Server(_) | ErrorClass::RateLimited { .. }
        )
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the computed backoff.
    Retry,
    /// Retry after exactly this long, ignoring backoff.
    RetryAfter(Duration),
    /// Surface the error now.
    Abort,
}

/// Errors that know their own class.
pub trait Classify {
    fn classify(&self) -> ErrorClass;
}

/// Classify an HTTP status code.
pub fn classify_status(status: u16, retry_after: Option<Duration>) -> ErrorClass {
    match status {
        429 => ErrorClass::RateLimited { retry_after },
        408 => ErrorClass::Network,
        400..=499 => ErrorClass::Client(status),
        500..=599 => ErrorClass::Server(status),
        _ => ErrorClass::Unknown,
    }
}

impl Classify for RequestError {
    fn classify(&self) -> ErrorClass {
        match self {
            RequestError::Network(_) | RequestError::Timeout => ErrorClass::Network,
            RequestError::Status {
                status,
                retry_after,
                ..
            } => classify_status(*status, *retry_after),
            RequestError::Invalid(_) => ErrorClass::Unknown,
        }
    }
}
