//! Process-wide connection monitor.
//!
//! # Responsibilities
//! - Hold the current `ConnectionState` (lock-free reads)
//! - Recompute it on platform events and on a fallback timer
//! - Notify subscribers on change, isolating listener panics
//!
//! # Design Decisions
//! - Optimistic default (`online`, `Unknown`) so reads never block
//! - One listener task per monitor; `initialize` replaces it
//! - Subscribers are called outside any lock, so they may unsubscribe

use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time;

use crate::config::ConnectionConfig;
use crate::connection::platform::{NetworkEvent, NetworkPlatform};
use crate::connection::state::ConnectionState;
use crate::observability::metrics;

type Listener = Arc<dyn Fn(&ConnectionState) + Send + Sync>;
type Listeners = DashMap<u64, Listener>;

/// Observes network signals and publishes a simplified state.
pub struct ConnectionMonitor {
    platform: Arc<dyn NetworkPlatform>,
    recheck_interval: Duration,
    state: ArcSwap<ConnectionState>,
    listeners: Arc<Listeners>,
    next_id: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionMonitor {
    pub fn new(platform: Arc<dyn NetworkPlatform>, config: &ConnectionConfig) -> Self {
        Self {
            platform,
            recheck_interval: Duration::from_secs(config.recheck_interval_secs.max(1)),
            state: ArcSwap::from_pointee(ConnectionState::default()),
            listeners: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
            task: Mutex::new(None),
        }
    }

    /// Attach to platform events and the fallback timer, then compute the
    /// state once. Calling it again replaces the previous listener task.
    pub fn initialize(self: &Arc<Self>) {
        self.stop_task();
        self.refresh();

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No async runtime; connection monitor will only update on refresh()");
            return;
        };

        let monitor = Arc::downgrade(self);
        let events = self.platform.events();
        if events.is_none() {
            tracing::debug!("Platform emits no network events; relying on periodic re-check");
        }
        let task = handle.spawn(listen(monitor, events, self.recheck_interval));

        *self.task.lock().unwrap_or_else(|p| p.into_inner()) = Some(task);
        tracing::info!(
            recheck_secs = self.recheck_interval.as_secs(),
            "Connection monitor initialized"
        );
    }

    /// Stop listening for signals. The last state stays readable.
    pub fn shutdown(&self) {
        self.stop_task();
    }

    /// Current snapshot.
    pub fn state(&self) -> ConnectionState {
        **self.state.load()
    }

    pub fn is_online(&self) -> bool {
        self.state.load().online
    }

    /// Register `callback`; it runs now with the current state and again on
    /// every change.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ConnectionState) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let listener: Listener = Arc::new(callback);
        self.listeners.insert(id, listener.clone());

        invoke(&listener, &self.state());

        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.listeners.len()
    }

    /// Recompute from the platform and notify subscribers if it changed.
    pub fn refresh(&self) -> ConnectionState {
        let next = ConnectionState::from_signals(
            self.platform.is_online(),
            self.platform.network_information().as_ref(),
        );
        let previous = self.state.swap(Arc::new(next));

        if *previous != next {
            tracing::info!(
                online = next.online,
                quality = ?next.quality,
                previous_quality = ?previous.quality,
                "Connection state changed"
            );
            metrics::record_connection_state(&next);
            self.notify(&next);
        }
        next
    }

    fn notify(&self, state: &ConnectionState) {
        // Snapshot first so listeners can unsubscribe without deadlocking.
        let listeners: Vec<Listener> = self.listeners.iter().map(|r| r.value().clone()).collect();
        for listener in &listeners {
            invoke(listener, state);
        }
    }

    fn stop_task(&self) {
        if let Some(task) = self.task.lock().unwrap_or_else(|p| p.into_inner()).take() {
            task.abort();
        }
    }
}

impl Drop for ConnectionMonitor {
    fn drop(&mut self) {
        self.stop_task();
    }
}

/// Handle returned by [`ConnectionMonitor::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    listeners: Weak<Listeners>,
}

impl Subscription {
    /// Remove the callback. A no-op when already removed.
    pub fn unsubscribe(&self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.remove(&self.id);
        }
    }
}

fn invoke(listener: &Listener, state: &ConnectionState) {
    if catch_unwind(AssertUnwindSafe(|| listener(state))).is_err() {
        tracing::warn!("Connection listener panicked; continuing with remaining listeners");
    }
}

async fn listen(
    monitor: Weak<ConnectionMonitor>,
    mut events: Option<broadcast::Receiver<NetworkEvent>>,
    interval: Duration,
) {
    let mut ticker = time::interval(interval);
    // The first tick fires immediately and `initialize` already refreshed.
    ticker.tick().await;

    loop {
        let closed = tokio::select! {
            _ = ticker.tick() => false,
            open = next_signal(&mut events) => !open,
        };
        if closed {
            events = None;
            continue;
        }

        let Some(monitor) = monitor.upgrade() else {
            break;
        };
        monitor.refresh();
    }
}

async fn next_signal(events: &mut Option<broadcast::Receiver<NetworkEvent>>) -> bool {
    match events {
        Some(rx) => match rx.recv().await {
            Ok(_) | Err(RecvError::Lagged(_)) => true,
            Err(RecvError::Closed) => false,
        },
        None => std::future::pending().await,
    }
}
