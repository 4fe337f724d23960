//! Metrics collection and exposition.
//!
//! # Metrics
//! - `resilience_operations_total` (counter): executor outcomes by result
//! - `resilience_retries_total` (counter): scheduled retries by wait kind (`backoff`, `retry_after`)
//! - `queue_depth` (gauge): queued requests by state
//! - `queue_dispatch_total` (counter): drain dispatches by result
//! - `queue_evictions_total` (counter): entries evicted by reason
//! - `queue_persist_failures_total` (counter): failed snapshot writes
//! - `connection_online` (gauge): 1=online, 0=offline
//!
//! Without an installed recorder every call is a no-op.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

use crate::connection::ConnectionState;
use crate::queue::QueueStatus;

/// Install the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record the terminal outcome of one `RetryExecutor` invocation.
pub fn record_operation(outcome: &'static str, attempts: u32) {
    counter!("resilience_operations_total", "outcome" => outcome).increment(1);
    counter!("resilience_attempts_total").increment(u64::from(attempts));
}

/// Record a scheduled retry. `kind` says where the wait came from.
pub fn record_retry(kind: &'static str) {
    counter!("resilience_retries_total", "kind" => kind).increment(1);
}

/// Publish per-state queue depth.
pub fn record_queue_depth(status: &QueueStatus) {
    gauge!("queue_depth", "state" => "pending").set(status.pending as f64);
    gauge!("queue_depth", "state" => "in_flight").set(status.in_flight as f64);
    gauge!("queue_depth", "state" => "succeeded").set(status.succeeded as f64);
    gauge!("queue_depth", "state" => "failed").set(status.failed as f64);
}

/// Record one drain dispatch.
pub fn record_dispatch(result: &'static str) {
    counter!("queue_dispatch_total", "result" => result).increment(1);
}

/// Record an eviction.
pub fn record_eviction(reason: &'static str, count: usize) {
    counter!("queue_evictions_total", "reason" => reason).increment(count as u64);
}

/// Record a failed snapshot write.
pub fn record_persist_failure() {
    counter!("queue_persist_failures_total").increment(1);
}

/// Publish the current connection state.
pub fn record_connection_state(state: &ConnectionState) {
    gauge!("connection_online").set(if state.online { 1.0 } else { 0.0 });
}
