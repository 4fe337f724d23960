//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! resilience layer. All types derive Serde traits for deserialization from
//! config files, and every section has defaults so a minimal file works.

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Retry executor policy.
    pub retry: RetryConfig,

    /// Offline request queue settings.
    pub queue: QueueConfig,

    /// Connection monitor and probe settings.
    pub connection: ConnectionConfig,

    /// Outbound HTTP transport settings.
    pub transport: TransportConfig,

    /// Durable storage for the queue.
    pub storage: StorageConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt. Total attempts are `max_retries + 1`.
    pub max_retries: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Retry ceiling for 5xx responses (lower than `max_retries`).
    pub max_server_retries: u32,

    /// Upper bound applied to server-mandated `Retry-After` waits.
    pub max_retry_after_ms: u64,

    /// Add 0-10% random jitter to computed backoff.
    pub jitter: bool,

    /// Give up on retryable failures while the monitor reports offline.
    pub abort_when_offline: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
            max_server_retries: 2,
            max_retry_after_ms: 60_000,
            jitter: false,
            abort_when_offline: true,
        }
    }
}

/// Offline queue configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Soft capacity; beyond it the lowest-priority evictable entry is dropped.
    pub capacity: usize,

    /// Default attempt budget for newly queued requests.
    pub default_max_attempts: u32,

    /// Age after which entries are purged by `remove_stale`, in seconds.
    pub stale_after_secs: u64,

    /// Interval of the agent's background drain, in seconds.
    pub drain_interval_secs: u64,

    /// Keep succeeded entries until `clear_completed` instead of removing them.
    pub keep_succeeded: bool,

    /// Storage key the snapshot is persisted under.
    pub storage_key: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            default_max_attempts: 3,
            stale_after_secs: 3600,
            drain_interval_secs: 30,
            keep_succeeded: false,
            storage_key: "offline_queue".to_string(),
        }
    }
}

/// Connection monitor configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Fallback re-check interval in seconds.
    pub recheck_interval_secs: u64,

    /// URL probed by the native network platform.
    pub probe_url: String,

    /// Probe interval in seconds.
    pub probe_interval_secs: u64,

    /// Probe timeout in milliseconds.
    pub probe_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            recheck_interval_secs: 30,
            probe_url: "http://localhost:3000/health".to_string(),
            probe_interval_secs: 10,
            probe_timeout_ms: 5000,
        }
    }
}

/// Outbound HTTP transport configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Bearer token added as `Authorization` when a request carries none.
    pub auth_token: Option<String>,

    /// User agent sent with every request.
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            auth_token: None,
            user_agent: concat!("resilient-fetch/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Durable storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding one JSON file per storage key.
    pub directory: String,

    /// Optional per-key byte quota.
    pub max_bytes: Option<usize>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            directory: ".resilient-fetch".to_string(),
            max_bytes: Some(5 * 1024 * 1024), // 5MB, the usual localStorage budget
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit logs as JSON lines.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
