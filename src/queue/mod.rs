//! Offline request queue subsystem.
//!
//! # Data Flow
//! ```text
//! enqueue (offline, or a mutating request that failed transiently)
//!     → types.rs (QueuedRequest, Pending)
//!     → offline.rs (capacity check, persist via storage.rs)
//!     → connection online → drain: priority desc, created_at asc
//!     → HttpSender → removed | back to Pending | Failed
//! ```

pub mod offline;
pub mod storage;
pub mod types;

pub use offline::OfflineQueue;
pub use storage::{FileStorage, MemoryStorage, QueueStorage, StorageError};
pub use types::{
    DrainOutcome, DrainReport, NewRequest, QueueSnapshot, QueueStatus, QueuedRequest,
    RequestPriority, RequestState, SCHEMA_VERSION,
};
