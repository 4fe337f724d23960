//! Connection monitoring subsystem.
//!
//! # Data Flow
//! ```text
//! Platform signals (platform.rs / probe.rs):
//!     online/offline events, network-information changes
//!     → monitor.rs (recompute ConnectionState)
//!     → subscribers (retry executor, offline queue, UI)
//!
//! Fallback:
//!     periodic timer → monitor.rs (re-check)
//! ```
//!
//! # Design Decisions
//! - The monitor only reads platforms through `NetworkPlatform`
//! - Missing network details degrade to binary online/offline
//! - State is read-only to everyone but the monitor

pub mod monitor;
pub mod platform;
pub mod probe;
pub mod state;

pub use monitor::{ConnectionMonitor, Subscription};
pub use platform::{ManualNetwork, NetworkEvent, NetworkPlatform};
pub use probe::ProbeNetwork;
pub use state::{classify_quality, ConnectionQuality, ConnectionState, NetworkInformation};
