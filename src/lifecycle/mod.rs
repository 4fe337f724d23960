//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Ctrl+C → trigger → probe loop, drain ticker and config reload exit
//!     → context shutdown → queue stays persisted
//! ```

pub mod shutdown;

pub use shutdown::Shutdown;
