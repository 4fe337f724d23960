//! Retry executor.
//!
//! # Responsibilities
//! - Run one async operation with bounded, classified retry
//! - Back off exponentially, or for exactly the server-mandated wait
//! - Stop early while the connection monitor reports offline
//!
//! # Per-invocation state machine
//! ```text
//! Attempting → Succeeded                          (terminal)
//! Attempting → Classifying → Aborted              (terminal)
//! Attempting → Classifying → Waiting → Attempting
//! Attempting → Classifying → Exhausted            (terminal, last error)
//! ```
//!
//! `max_retries` counts retries after the first try: an operation runs at
//! most `max_retries + 1` times.

use arc_swap::ArcSwap;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::config::validation::{validate_retry, ValidationError};
use crate::connection::ConnectionMonitor;
use crate::http::{HttpRequest, HttpResponse, HttpSender, RequestError};
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::classify::{Classify, ErrorClass, RetryDecision};

type RetryHook = Arc<dyn Fn(u32, Duration) + Send + Sync>;

/// Runtime retry policy.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Ceiling for 5xx retries.
    pub max_server_retries: u32,
    /// Cap on server-mandated waits.
    pub max_retry_after: Duration,
    pub jitter: bool,
    pub abort_when_offline: bool,
}

impl RetryPolicy {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_delays(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay = base;
        self.max_delay = max;
        self
    }

    pub fn with_max_server_retries(mut self, max_server_retries: u32) -> Self {
        self.max_server_retries = max_server_retries;
        self
    }

    /// Check `0 < base_delay <= max_delay`.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let errors = validate_retry(&RetryConfig::from(self));
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Default decision for a classified failure of attempt number `attempt`.
    pub fn decide(&self, class: &ErrorClass, attempt: u32) -> RetryDecision {
        match class {
            ErrorClass::Network => RetryDecision::Retry,
            ErrorClass::Server(_) if attempt <= self.max_server_retries => RetryDecision::Retry,
            ErrorClass::Server(_) => RetryDecision::Abort,
            ErrorClass::RateLimited {
                retry_after: Some(wait),
            } => RetryDecision::RetryAfter(*wait),
            ErrorClass::RateLimited { retry_after: None } => RetryDecision::Retry,
            ErrorClass::Client(_) | ErrorClass::Unknown => RetryDecision::Abort,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_server_retries: config.max_server_retries,
            max_retry_after: Duration::from_millis(config.max_retry_after_ms),
            jitter: config.jitter,
            abort_when_offline: config.abort_when_offline,
        }
    }
}

impl From<&RetryPolicy> for RetryConfig {
    fn from(policy: &RetryPolicy) -> Self {
        Self {
            max_retries: policy.max_retries,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            max_server_retries: policy.max_server_retries,
            max_retry_after_ms: policy.max_retry_after.as_millis() as u64,
            jitter: policy.jitter,
            abort_when_offline: policy.abort_when_offline,
        }
    }
}

/// Executes operations under a [`RetryPolicy`].
pub struct RetryExecutor {
    policy: ArcSwap<RetryPolicy>,
    monitor: Option<Arc<ConnectionMonitor>>,
    on_retry: Option<RetryHook>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy: ArcSwap::from_pointee(policy),
            monitor: None,
            on_retry: None,
        }
    }

    /// Consult `monitor` before scheduling a retry.
    pub fn with_monitor(mut self, monitor: Arc<ConnectionMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Called with `(attempt, delay)` before each backoff wait.
    pub fn on_retry<F>(mut self, hook: F) -> Self
    where
        F: Fn(u32, Duration) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(hook));
        self
    }

    pub fn policy(&self) -> Arc<RetryPolicy> {
        self.policy.load_full()
    }

    /// Replace the policy. Invocations already running keep the old one.
    pub fn set_policy(&self, policy: RetryPolicy) {
        tracing::info!(
            max_retries = policy.max_retries,
            base_delay_ms = policy.base_delay.as_millis() as u64,
            max_delay_ms = policy.max_delay.as_millis() as u64,
            "Retry policy updated"
        );
        self.policy.store(Arc::new(policy));
    }

    /// Run `operation` with the default classification of its error type.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        let policy = self.policy.load_full();
        self.run(&policy, operation, |err: &E, attempt| {
            policy.decide(&err.classify(), attempt)
        })
        .await
    }

    /// Run `operation`, deciding retries with `classify`.
    ///
    /// Only `max_retries` bounds the attempts; the 5xx ceiling is part of the
    /// default classification.
    pub async fn execute_with<T, E, F, Fut, C>(&self, operation: F, classify: C) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        C: Fn(&E) -> RetryDecision,
    {
        let policy = self.policy.load_full();
        self.run(&policy, operation, |err: &E, _| classify(err)).await
    }

    /// Send `request`, treating any non-2xx response as a classified failure.
    pub async fn fetch(
        &self,
        sender: &dyn HttpSender,
        request: &HttpRequest,
    ) -> Result<HttpResponse, RequestError> {
        self.execute(|| async move {
            sender.send(request).await?.error_for_status(&request.url)
        })
        .await
    }

    async fn run<T, E, F, Fut, D>(
        &self,
        policy: &RetryPolicy,
        mut operation: F,
        decide: D,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        D: Fn(&E, u32) -> RetryDecision,
    {
        let mut attempt: u32 = 1;

        loop {
            let err = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(attempts = attempt, "Operation succeeded after retry");
                    }
                    metrics::record_operation("success", attempt);
                    return Ok(value);
                }
                Err(err) => err,
            };

            let (delay, kind) = match decide(&err, attempt) {
                RetryDecision::Abort => {
                    tracing::debug!(attempt, error = %err, "Non-retryable failure");
                    metrics::record_operation("aborted", attempt);
                    return Err(err);
                }
                RetryDecision::Retry => (
                    calculate_backoff(attempt, policy.base_delay, policy.max_delay, policy.jitter),
                    "backoff",
                ),
                RetryDecision::RetryAfter(wait) => (wait.min(policy.max_retry_after), "retry_after"),
            };

            if attempt > policy.max_retries {
                tracing::warn!(attempts = attempt, error = %err, "Retries exhausted");
                metrics::record_operation("exhausted", attempt);
                return Err(err);
            }

            if policy.abort_when_offline && self.monitor.as_ref().is_some_and(|m| !m.is_online()) {
                tracing::warn!(attempt, error = %err, "Offline; not scheduling retry");
                metrics::record_operation("offline", attempt);
                return Err(err);
            }

            tracing::info!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying operation"
            );
            metrics::record_retry(kind);
            if let Some(hook) = &self.on_retry {
                hook(attempt, delay);
            }

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::default()
    }

    #[test]
    fn test_default_decisions() {
        let p = policy();
        assert_eq!(p.decide(&ErrorClass::Network, 1), RetryDecision::Retry);
        assert_eq!(p.decide(&ErrorClass::Client(400), 1), RetryDecision::Abort);
        assert_eq!(p.decide(&ErrorClass::Unknown, 1), RetryDecision::Abort);
        assert_eq!(
            p.decide(
                &ErrorClass::RateLimited {
                    retry_after: Some(Duration::from_secs(2))
                },
                1
            ),
            RetryDecision::RetryAfter(Duration::from_secs(2))
        );
        assert_eq!(
            p.decide(&ErrorClass::RateLimited { retry_after: None }, 1),
            RetryDecision::Retry
        );
    }

    #[test]
    fn test_server_errors_have_lower_ceiling() {
        let p = policy().with_max_retries(5).with_max_server_retries(2);
        assert_eq!(p.decide(&ErrorClass::Server(503), 1), RetryDecision::Retry);
        assert_eq!(p.decide(&ErrorClass::Server(503), 2), RetryDecision::Retry);
        assert_eq!(p.decide(&ErrorClass::Server(503), 3), RetryDecision::Abort);
        assert_eq!(p.decide(&ErrorClass::Network, 3), RetryDecision::Retry);
    }

    #[test]
    fn test_policy_validation() {
        assert!(policy().validate().is_ok());
        let bad = policy().with_delays(Duration::from_secs(5), Duration::from_secs(1));
        assert_eq!(bad.validate().unwrap_err()[0].field, "retry.base_delay_ms");
    }

    #[test]
    fn test_config_round_trip_defaults() {
        let config = RetryConfig::default();
        assert_eq!(RetryConfig::from(&RetryPolicy::from(&config)), config);
    }
}
