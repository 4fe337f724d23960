//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Operation invoked through retries.rs:
//!     → attempt
//!     → On failure: classify.rs (Network / Client / Server / RateLimited / Unknown)
//!     → policy decision (retry, retry after server wait, abort)
//!     → backoff.rs (exponential delay, capped)
//!     → connection monitor consulted (no retries while offline)
//! ```
//!
//! # Design Decisions
//! - Callers get the success value or the last real error, never a wrapper
//! - Unknown failures are not retried to avoid endless loops
//! - 429 waits follow the server, not the backoff curve
//! - Backoff sleeps are cooperative (tokio), never blocking

pub mod backoff;
pub mod classify;
pub mod retries;

pub use backoff::calculate_backoff;
pub use classify::{classify_status, Classify, ErrorClass, RetryDecision};
pub use retries::{RetryExecutor, RetryPolicy};
