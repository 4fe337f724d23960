//! Client-side resilience layer for unreliable networks.
//!
//! Keeps a live view of connectivity, retries failed HTTP calls with
//! classified backoff, and holds mutating requests in a durable priority
//! queue until the connection comes back.

pub mod config;
pub mod connection;
pub mod context;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod queue;
pub mod resilience;

pub use config::schema::ResilienceConfig;
pub use connection::{ConnectionMonitor, ConnectionQuality, ConnectionState};
pub use context::{FetchOutcome, ResilienceContext};
pub use http::{HttpRequest, HttpResponse, HttpSender, RequestError};
pub use lifecycle::Shutdown;
pub use queue::{OfflineQueue, RequestPriority};
pub use resilience::{RetryExecutor, RetryPolicy};
