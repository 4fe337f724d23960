//! Network platform capabilities.
//!
//! The monitor never talks to the environment directly. A platform reports
//! the online flag, optional network details and, when it can, pushes change
//! events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use tokio::sync::broadcast;

use crate::connection::state::NetworkInformation;

/// A network signal pushed by a platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
    Online,
    Offline,
    /// Network details changed (effective type, save-data, ...).
    Change,
}

/// Source of network signals.
pub trait NetworkPlatform: Send + Sync {
    /// Current reachability.
    fn is_online(&self) -> bool;

    /// Network details, or `None` when the capability is unavailable.
    fn network_information(&self) -> Option<NetworkInformation> {
        None
    }

    /// Subscribe to change events, when the platform emits any.
    fn events(&self) -> Option<broadcast::Receiver<NetworkEvent>> {
        None
    }
}

/// A platform whose state is set by its owner.
///
/// Embedders that already track connectivity feed it here; tests use it to
/// toggle the network.
pub struct ManualNetwork {
    online: AtomicBool,
    info: RwLock<Option<NetworkInformation>>,
    tx: broadcast::Sender<NetworkEvent>,
}

impl ManualNetwork {
    pub fn new(online: bool) -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            online: AtomicBool::new(online),
            info: RwLock::new(None),
            tx,
        }
    }

    /// Flip reachability, emitting an event when it changed.
    pub fn set_online(&self, online: bool) {
        let previous = self.online.swap(online, Ordering::SeqCst);
        if previous != online {
            let event = if online {
                NetworkEvent::Online
            } else {
                NetworkEvent::Offline
            };
            let _ = self.tx.send(event);
        }
    }

    /// Replace the network details and emit a change event.
    pub fn set_information(&self, info: Option<NetworkInformation>) {
        match self.info.write() {
            Ok(mut guard) => *guard = info,
            Err(poisoned) => *poisoned.into_inner() = info,
        }
        let _ = self.tx.send(NetworkEvent::Change);
    }
}

impl Default for ManualNetwork {
    fn default() -> Self {
        Self::new(true)
    }
}

impl NetworkPlatform for ManualNetwork {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn network_information(&self) -> Option<NetworkInformation> {
        match self.info.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn events(&self) -> Option<broadcast::Receiver<NetworkEvent>> {
        Some(self.tx.subscribe())
    }
}
