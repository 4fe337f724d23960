//! Durable offline request queue.
//!
//! # Responsibilities
//! - Accept requests that could not be sent and persist them
//! - Replay them in priority order once the connection returns
//! - Bound the queue by evicting low-value entries
//!
//! # Entry lifecycle
//! ```text
//! Pending → InFlight → removed | Succeeded      (success)
//! Pending → InFlight → Pending                  (failure, attempts left)
//! Pending → InFlight → Failed                   (failure, final)
//! InFlight on reload → Pending
//! ```
//!
//! # Design Decisions
//! - Entries live behind a std mutex that is never held across an await
//! - Every mutation is persisted while still holding the lock, so
//!   the stored snapshot never reorders two writes
//! - Persistence failures are logged and counted; memory stays authoritative
//! - At most one drain runs at a time; concurrent callers return immediately
//! - Capacity is soft: when nothing is evictable, the entry is still admitted

use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use crate::config::QueueConfig;
use crate::connection::{ConnectionMonitor, Subscription};
use crate::http::{HttpRequest, HttpResponse, HttpSender, RequestError};
use crate::observability::metrics;
use crate::queue::storage::{QueueStorage, StorageError};
use crate::queue::types::{
    now_millis, DrainOutcome, DrainReport, NewRequest, QueueSnapshot, QueueStatus, QueuedRequest,
    RequestPriority, RequestState, SCHEMA_VERSION,
};
use crate::resilience::Classify;

#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u32,
    requests: &'a [QueuedRequest],
}

#[derive(serde::Deserialize)]
struct VersionProbe {
    version: Option<u32>,
}

/// Priority-ordered, persisted queue of requests awaiting replay.
pub struct OfflineQueue {
    entries: Mutex<Vec<QueuedRequest>>,
    storage: Arc<dyn QueueStorage>,
    sender: Arc<dyn HttpSender>,
    monitor: Arc<ConnectionMonitor>,
    config: QueueConfig,
    draining: AtomicBool,
    rerun: AtomicBool,
    subscription: Mutex<Option<Subscription>>,
}

impl OfflineQueue {
    /// Restore from `storage` (or start empty).
    ///
    /// Entries that were in flight when the previous process stopped are
    /// returned to pending. Unreadable snapshots are discarded with a warning.
    pub fn load(
        config: QueueConfig,
        storage: Arc<dyn QueueStorage>,
        sender: Arc<dyn HttpSender>,
        monitor: Arc<ConnectionMonitor>,
    ) -> Self {
        let mut entries = restore(storage.as_ref(), &config.storage_key);

        let mut recovered = 0;
        for entry in entries.iter_mut().filter(|e| e.state == RequestState::InFlight) {
            entry.state = RequestState::Pending;
            recovered += 1;
        }

        let queue = Self {
            entries: Mutex::new(entries),
            storage,
            sender,
            monitor,
            config,
            draining: AtomicBool::new(false),
            rerun: AtomicBool::new(false),
            subscription: Mutex::new(None),
        };

        let entries = queue.lock();
        if recovered > 0 {
            tracing::info!(recovered, "Returned interrupted requests to pending");
            queue.persist(&entries);
        }
        tracing::info!(
            entries = entries.len(),
            key = %queue.config.storage_key,
            "Offline queue loaded"
        );
        metrics::record_queue_depth(&QueueStatus::from_entries(entries.iter()));
        drop(entries);

        queue
    }

    /// Drain whenever the monitor reports a transition to online.
    ///
    /// Also drains right away if already online. Calling again replaces the
    /// previous subscription.
    pub fn attach(self: &Arc<Self>) {
        self.detach();

        let queue: Weak<Self> = Arc::downgrade(self);
        let was_online = AtomicBool::new(false);
        let subscription = self.monitor.subscribe(move |state| {
            let previous = was_online.swap(state.online, Ordering::SeqCst);
            if state.online && !previous {
                if let Some(queue) = queue.upgrade() {
                    tracing::info!("Connection available; draining offline queue");
                    queue.spawn_drain();
                }
            }
        });

        *self.subscription.lock().unwrap_or_else(|p| p.into_inner()) = Some(subscription);
    }

    /// Stop reacting to connection changes.
    pub fn detach(&self) {
        if let Some(subscription) = self
            .subscription
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
        {
            subscription.unsubscribe();
        }
    }

    /// Queue a request and return its id.
    ///
    /// If online, a drain is started in the background.
    pub fn enqueue(self: &Arc<Self>, new: impl Into<NewRequest>) -> String {
        let entry = QueuedRequest::new(new.into(), self.config.default_max_attempts);
        let id = entry.id.clone();
        let priority = entry.priority;
        let method = entry.request.method.clone();
        let url = entry.request.url.clone();

        {
            let mut entries = self.lock();
            if entries.len() >= self.config.capacity {
                match eviction_candidate(&entries) {
                    Some(index) => {
                        let evicted = entries.remove(index);
                        tracing::warn!(
                            id = %evicted.id,
                            priority = ?evicted.priority,
                            state = ?evicted.state,
                            "Queue at capacity; evicted entry"
                        );
                        metrics::record_eviction("capacity", 1);
                    }
                    None => tracing::warn!(
                        capacity = self.config.capacity,
                        "Queue at capacity with nothing evictable; admitting anyway"
                    ),
                }
            }
            entries.push(entry);
            self.persist(&entries);
        }

        tracing::info!(id = %id, priority = ?priority, method = %method, url = %url, "Request queued");

        if self.monitor.is_online() {
            self.spawn_drain();
        }
        id
    }

    /// Replay pending entries, highest priority first.
    ///
    /// Each entry is dispatched at most once per call. Stops as soon as the
    /// monitor reports offline.
    pub async fn drain(&self) -> DrainOutcome {
        // Raised before the flag check so a finishing drain cannot miss it.
        self.rerun.store(true, Ordering::SeqCst);
        if !self.try_begin_drain() {
            tracing::debug!("Drain already running");
            return DrainOutcome::AlreadyRunning;
        }
        let mut running = DrainFlag(&self.draining);

        if !self.monitor.is_online() {
            tracing::debug!("Offline; skipping drain");
            return DrainOutcome::Offline;
        }

        let mut report = DrainReport::default();
        let mut attempted = HashSet::new();
        loop {
            self.rerun.store(false, Ordering::SeqCst);
            if !self.drain_pass(&mut report, &mut attempted).await {
                report.interrupted = true;
                break;
            }
            // Entries queued while this drain was running.
            if self.rerun.load(Ordering::SeqCst) {
                continue;
            }
            std::mem::forget(running);
            if !self.end_drain() {
                break;
            }
            running = DrainFlag(&self.draining);
        }

        if report.dispatched > 0 {
            tracing::info!(
                dispatched = report.dispatched,
                succeeded = report.succeeded,
                requeued = report.requeued,
                failed = report.failed,
                interrupted = report.interrupted,
                "Drain finished"
            );
        }
        DrainOutcome::Completed(report)
    }

    fn try_begin_drain(&self) -> bool {
        self.draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Clears the drain flag. Returns true if a drain was turned away in the
    /// meantime and the flag was taken back to serve it.
    fn end_drain(&self) -> bool {
        self.draining.store(false, Ordering::SeqCst);
        self.rerun.load(Ordering::SeqCst) && self.try_begin_drain()
    }

    /// Returns false if the pass stopped because the connection dropped.
    async fn drain_pass(&self, report: &mut DrainReport, attempted: &mut HashSet<String>) -> bool {
        let order: Vec<String> = {
            let entries = self.lock();
            let mut pending: Vec<&QueuedRequest> = entries
                .iter()
                .filter(|e| e.state == RequestState::Pending && !attempted.contains(&e.id))
                .collect();
            pending.sort_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then(a.created_at.cmp(&b.created_at))
            });
            pending.into_iter().map(|e| e.id.clone()).collect()
        };

        for id in order {
            if !self.monitor.is_online() {
                tracing::info!("Connection lost; pausing drain");
                return false;
            }

            let request = match self.begin_dispatch(&id) {
                Some(request) => request,
                None => continue,
            };
            attempted.insert(id.clone());
            report.dispatched += 1;

            let guard = InFlight {
                queue: self,
                id: &id,
                armed: true,
            };
            let result = match self.sender.send(&request).await {
                Ok(response) => response.error_for_status(&request.url),
                Err(e) => Err(e),
            };
            guard.disarm();

            self.finish_dispatch(&id, result, report);
        }
        true
    }

    fn begin_dispatch(&self, id: &str) -> Option<HttpRequest> {
        let mut entries = self.lock();
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id && e.state == RequestState::Pending)?;
        entry.state = RequestState::InFlight;
        let request = entry.request.clone();
        self.persist(&entries);
        Some(request)
    }

    fn finish_dispatch(
        &self,
        id: &str,
        result: Result<HttpResponse, RequestError>,
        report: &mut DrainReport,
    ) {
        let mut entries = self.lock();
        let Some(index) = entries.iter().position(|e| e.id == id) else {
            tracing::debug!(id, "Entry removed while in flight; discarding result");
            report.discarded += 1;
            metrics::record_dispatch("discarded");
            return;
        };

        match result {
            Ok(response) => {
                tracing::info!(id, status = response.status, "Queued request delivered");
                report.succeeded += 1;
                metrics::record_dispatch("success");
                if self.config.keep_succeeded {
                    let entry = &mut entries[index];
                    entry.state = RequestState::Succeeded;
                    entry.last_error = None;
                } else {
                    entries.remove(index);
                }
            }
            Err(err) => {
                let class = err.classify();
                let entry = &mut entries[index];
                entry.attempt_count += 1;
                entry.last_error = Some(err.to_string());

                if !class.is_retryable() || entry.attempt_count >= entry.max_attempts {
                    entry.state = RequestState::Failed;
                    report.failed += 1;
                    metrics::record_dispatch("failed");
                    tracing::warn!(
                        id,
                        attempts = entry.attempt_count,
                        class = class.label(),
                        error = %err,
                        "Queued request failed permanently"
                    );
                } else {
                    entry.state = RequestState::Pending;
                    report.requeued += 1;
                    metrics::record_dispatch("requeued");
                    tracing::info!(
                        id,
                        attempts = entry.attempt_count,
                        max_attempts = entry.max_attempts,
                        class = class.label(),
                        error = %err,
                        "Queued request will be retried"
                    );
                }
            }
        }
        self.persist(&entries);
    }

    /// Counts by state.
    pub fn status(&self) -> QueueStatus {
        QueueStatus::from_entries(self.lock().iter())
    }

    /// All entries, in replay order.
    pub fn snapshot(&self) -> Vec<QueuedRequest> {
        let mut entries = self.lock().clone();
        entries.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        entries
    }

    pub fn get(&self, id: &str) -> Option<QueuedRequest> {
        self.lock().iter().find(|e| e.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Remove one entry in any state. Returns whether it existed.
    ///
    /// An in-flight send is not cancelled; its result is discarded.
    pub fn remove(&self, id: &str) -> bool {
        let mut entries = self.lock();
        let Some(index) = entries.iter().position(|e| e.id == id) else {
            return false;
        };
        let removed = entries.remove(index);
        if removed.state == RequestState::InFlight {
            tracing::debug!(id, "Removed in-flight entry; its result will be discarded");
        }
        self.persist(&entries);
        true
    }

    /// Drop succeeded and failed entries. Returns how many were removed.
    pub fn clear_completed(&self) -> usize {
        self.retain(|e| !e.state.is_terminal(), "completed")
    }

    /// Drop every entry, including in-flight ones.
    pub fn clear_all(&self) -> usize {
        self.retain(|_| false, "cleared")
    }

    /// Drop entries older than `max_age`, in any state.
    pub fn remove_stale(&self, max_age: Duration) -> usize {
        let now = now_millis();
        let max_age = max_age.as_millis() as u64;
        self.retain(|e| e.age_millis(now) <= max_age, "stale")
    }

    /// [`remove_stale`](Self::remove_stale) with the configured age.
    pub fn remove_stale_default(&self) -> usize {
        self.remove_stale(Duration::from_secs(self.config.stale_after_secs))
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    fn retain(&self, keep: impl Fn(&QueuedRequest) -> bool, reason: &'static str) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|e| keep(e));
        let removed = before - entries.len();
        if removed > 0 {
            tracing::info!(removed, reason, "Removed queued requests");
            metrics::record_eviction(reason, removed);
            self.persist(&entries);
        }
        removed
    }

    fn spawn_drain(self: &Arc<Self>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No async runtime; drain deferred");
            return;
        };
        let queue = Arc::clone(self);
        handle.spawn(async move {
            queue.drain().await;
        });
    }

    fn persist(&self, entries: &[QueuedRequest]) {
        metrics::record_queue_depth(&QueueStatus::from_entries(entries.iter()));

        let snapshot = SnapshotRef {
            version: SCHEMA_VERSION,
            requests: entries,
        };
        let result = serde_json::to_string(&snapshot)
            .map_err(StorageError::from)
            .and_then(|json| self.storage.persist(&self.config.storage_key, &json));

        if let Err(e) = result {
            tracing::error!(
                key = %self.config.storage_key,
                entries = entries.len(),
                error = %e,
                "Failed to persist offline queue"
            );
            metrics::record_persist_failure();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<QueuedRequest>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Drop for OfflineQueue {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Clears the single-flight flag when a drain ends or is cancelled.
struct DrainFlag<'a>(&'a AtomicBool);

impl Drop for DrainFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Returns an entry to pending if its dispatch future is dropped mid-send.
struct InFlight<'a> {
    queue: &'a OfflineQueue,
    id: &'a str,
    armed: bool,
}

impl InFlight<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut entries = self.queue.lock();
        if let Some(entry) = entries
            .iter_mut()
            .find(|e| e.id == self.id && e.state == RequestState::InFlight)
        {
            entry.state = RequestState::Pending;
            self.queue.persist(&entries);
        }
    }
}

fn restore(storage: &dyn QueueStorage, key: &str) -> Vec<QueuedRequest> {
    let raw = match storage.load(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return Vec::new(),
        Err(e) => {
            tracing::error!(key, error = %e, "Failed to read offline queue; starting empty");
            return Vec::new();
        }
    };

    match serde_json::from_str::<VersionProbe>(&raw) {
        Ok(VersionProbe {
            version: Some(SCHEMA_VERSION),
        }) => {}
        Ok(probe) => {
            tracing::warn!(
                key,
                found = ?probe.version,
                expected = SCHEMA_VERSION,
                "Discarding offline queue with unknown schema version"
            );
            return Vec::new();
        }
        Err(e) => {
            tracing::warn!(key, error = %e, "Discarding unreadable offline queue");
            return Vec::new();
        }
    }

    match serde_json::from_str::<QueueSnapshot>(&raw) {
        Ok(snapshot) => snapshot.requests,
        Err(e) => {
            tracing::warn!(key, error = %e, "Discarding unreadable offline queue");
            Vec::new()
        }
    }
}

/// Lowest priority first, terminal before pending, oldest first.
/// In-flight entries and pending critical entries are never evicted.
fn eviction_candidate(entries: &[QueuedRequest]) -> Option<usize> {
    entries
        .iter()
        .enumerate()
        .filter(|(_, e)| {
            e.state != RequestState::InFlight
                && !(e.state == RequestState::Pending && e.priority == RequestPriority::Critical)
        })
        .min_by_key(|(_, e)| (e.priority, !e.state.is_terminal(), e.created_at))
        .map(|(index, _)| index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::connection::ManualNetwork;
    use crate::queue::storage::MemoryStorage;
    use async_trait::async_trait;

    struct Unreachable;

    #[async_trait]
    impl HttpSender for Unreachable {
        async fn send(&self, _request: &HttpRequest) -> Result<HttpResponse, RequestError> {
            Err(RequestError::Network("unreachable".into()))
        }
    }

    fn offline_queue(config: QueueConfig, storage: Arc<dyn QueueStorage>) -> Arc<OfflineQueue> {
        let monitor = Arc::new(ConnectionMonitor::new(
            Arc::new(ManualNetwork::new(false)),
            &ConnectionConfig::default(),
        ));
        monitor.refresh();
        Arc::new(OfflineQueue::load(config, storage, Arc::new(Unreachable), monitor))
    }

    fn entry(priority: RequestPriority, state: RequestState, created_at: u64) -> QueuedRequest {
        let mut entry = QueuedRequest::new(
            NewRequest::new(HttpRequest::post("http://api/x")).priority(priority),
            3,
        );
        entry.state = state;
        entry.created_at = created_at;
        entry
    }

    #[test]
    fn test_eviction_prefers_low_priority_terminal_oldest() {
        let entries = vec![
            entry(RequestPriority::Normal, RequestState::Pending, 1),
            entry(RequestPriority::Low, RequestState::Pending, 2),
            entry(RequestPriority::Low, RequestState::Failed, 3),
            entry(RequestPriority::Low, RequestState::Failed, 4),
        ];
        assert_eq!(eviction_candidate(&entries), Some(2));
    }

    #[test]
    fn test_eviction_spares_critical_and_in_flight() {
        let entries = vec![
            entry(RequestPriority::Critical, RequestState::Pending, 1),
            entry(RequestPriority::Low, RequestState::InFlight, 2),
        ];
        assert_eq!(eviction_candidate(&entries), None);

        let entries = vec![
            entry(RequestPriority::Critical, RequestState::Pending, 1),
            entry(RequestPriority::Critical, RequestState::Failed, 2),
        ];
        assert_eq!(eviction_candidate(&entries), Some(1));
    }

    #[test]
    fn test_enqueue_persists_snapshot() {
        let storage = Arc::new(MemoryStorage::new());
        let queue = offline_queue(QueueConfig::default(), storage.clone());

        let id = queue.enqueue(HttpRequest::post("http://api/orders").body("{\"qty\":1}"));

        let raw = storage.load("offline_queue").unwrap().unwrap();
        let snapshot: QueueSnapshot = serde_json::from_str(&raw).unwrap();
        assert_eq!(snapshot.version, SCHEMA_VERSION);
        assert_eq!(snapshot.requests.len(), 1);
        assert_eq!(snapshot.requests[0].id, id);
        assert_eq!(snapshot.requests[0].state, RequestState::Pending);
    }

    #[test]
    fn test_capacity_is_soft_when_nothing_evictable() {
        let config = QueueConfig {
            capacity: 1,
            ..QueueConfig::default()
        };
        let queue = offline_queue(config, Arc::new(MemoryStorage::new()));

        queue.enqueue(NewRequest::new(HttpRequest::post("http://api/a")).priority(RequestPriority::Critical));
        queue.enqueue(NewRequest::new(HttpRequest::post("http://api/b")).priority(RequestPriority::Critical));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_unknown_schema_version_is_discarded() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .persist("offline_queue", r#"{"version":99,"requests":[{"whatever":true}]}"#)
            .unwrap();
        let queue = offline_queue(QueueConfig::default(), storage);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_corrupt_snapshot_starts_empty() {
        let storage = Arc::new(MemoryStorage::new());
        storage.persist("offline_queue", "not json").unwrap();
        let queue = offline_queue(QueueConfig::default(), storage);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_clear_completed_keeps_pending() {
        let queue = offline_queue(QueueConfig::default(), Arc::new(MemoryStorage::new()));
        let keep = queue.enqueue(HttpRequest::post("http://api/a"));
        let done = queue.enqueue(HttpRequest::post("http://api/b"));
        queue.lock().iter_mut().find(|e| e.id == done).unwrap().state = RequestState::Failed;

        assert_eq!(queue.clear_completed(), 1);
        assert!(queue.get(&keep).is_some());
        assert!(queue.get(&done).is_none());
        assert_eq!(queue.clear_all(), 1);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_drain_is_noop_offline() {
        let queue = offline_queue(QueueConfig::default(), Arc::new(MemoryStorage::new()));
        queue.enqueue(HttpRequest::post("http://api/a"));
        assert_eq!(queue.drain().await, DrainOutcome::Offline);
        assert_eq!(queue.status().pending, 1);
    }

    #[tokio::test]
    async fn test_turned_away_drain_is_taken_over_on_release() {
        let queue = offline_queue(QueueConfig::default(), Arc::new(MemoryStorage::new()));
        assert!(queue.try_begin_drain());
        assert_eq!(queue.drain().await, DrainOutcome::AlreadyRunning);

        assert!(queue.end_drain());
        assert!(queue.draining.load(Ordering::SeqCst));

        queue.rerun.store(false, Ordering::SeqCst);
        assert!(!queue.end_drain());
        assert!(!queue.draining.load(Ordering::SeqCst));
    }
}
