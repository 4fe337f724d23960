//! HTTP plumbing shared by the executor and the queue.
//!
//! # Components
//! - `request.rs`: owned request description (serializable, so it can be queued)
//! - `response.rs`: fully read response, `RequestError`, `Retry-After` parsing
//! - `sender.rs`: `HttpSender` trait and the reqwest implementation
//!
//! # Design Decisions
//! - Requests are plain data so the queue can persist them verbatim
//! - Transport never retries; retry policy lives in `resilience`

pub mod request;
pub mod response;
pub mod sender;

pub use request::HttpRequest;
pub use response::{parse_retry_after, HttpResponse, RequestError};
pub use sender::{HttpSender, ReqwestSender};
