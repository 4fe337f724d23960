//! Offline queue data types.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::http::HttpRequest;

/// Version tag written with every persisted snapshot.
pub const SCHEMA_VERSION: u32 = 1;

/// Replay priority. Higher is served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestPriority {
    Low,
    Normal,
    High,
    Critical,
}

impl Default for RequestPriority {
    fn default() -> Self {
        RequestPriority::Normal
    }
}

impl std::str::FromStr for RequestPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(RequestPriority::Low),
            "normal" => Ok(RequestPriority::Normal),
            "high" => Ok(RequestPriority::High),
            "critical" => Ok(RequestPriority::Critical),
            other => Err(format!("unknown priority '{}'", other)),
        }
    }
}

/// Lifecycle of a queued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Pending,
    InFlight,
    Succeeded,
    Failed,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestState::Succeeded | RequestState::Failed)
    }
}

/// A durable queued request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedRequest {
    pub id: String,
    #[serde(flatten)]
    pub request: HttpRequest,
    pub priority: RequestPriority,
    /// Milliseconds since the UNIX epoch.
    pub created_at: u64,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub state: RequestState,
    pub last_error: Option<String>,
}

impl QueuedRequest {
    /// Create a pending entry with a fresh id.
    pub fn new(new: NewRequest, default_max_attempts: u32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            request: new.request,
            priority: new.priority,
            created_at: now_millis(),
            attempt_count: 0,
            max_attempts: new.max_attempts.unwrap_or(default_max_attempts).max(1),
            state: RequestState::Pending,
            last_error: None,
        }
    }

    /// Age relative to `now` (ms since epoch).
    pub fn age_millis(&self, now: u64) -> u64 {
        now.saturating_sub(self.created_at)
    }
}

/// Input to [`OfflineQueue::enqueue`](crate::queue::OfflineQueue::enqueue).
#[derive(Debug, Clone)]
pub struct NewRequest {
    pub request: HttpRequest,
    pub priority: RequestPriority,
    /// Falls back to the queue's configured default.
    pub max_attempts: Option<u32>,
}

impl NewRequest {
    pub fn new(request: HttpRequest) -> Self {
        Self {
            request,
            priority: RequestPriority::default(),
            max_attempts: None,
        }
    }

    pub fn priority(mut self, priority: RequestPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

impl From<HttpRequest> for NewRequest {
    fn from(request: HttpRequest) -> Self {
        Self::new(request)
    }
}

/// Persisted form of the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub version: u32,
    pub requests: Vec<QueuedRequest>,
}

/// Entry counts by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub pending: usize,
    pub in_flight: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total: usize,
}

impl QueueStatus {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a QueuedRequest>) -> Self {
        let mut status = QueueStatus::default();
        for entry in entries {
            match entry.state {
                RequestState::Pending => status.pending += 1,
                RequestState::InFlight => status.in_flight += 1,
                RequestState::Succeeded => status.succeeded += 1,
                RequestState::Failed => status.failed += 1,
            }
            status.total += 1;
        }
        status
    }
}

/// What one drain pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub dispatched: usize,
    pub succeeded: usize,
    /// Failed but back to pending with attempts left.
    pub requeued: usize,
    /// Moved to the terminal failed state.
    pub failed: usize,
    /// Removed while in flight; outcome dropped.
    pub discarded: usize,
    /// Stopped early because the connection dropped.
    pub interrupted: bool,
}

/// Result of calling `drain`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Another drain is active; this call did nothing.
    AlreadyRunning,
    /// The monitor reports offline; nothing was dispatched.
    Offline,
    Completed(DrainReport),
}

/// Milliseconds since the UNIX epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
