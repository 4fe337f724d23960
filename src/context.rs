//! Process-wide resilience context.
//!
//! Built once at startup and shared by `Arc`. Owns the connection monitor,
//! the retry executor and the offline queue, and wires them together:
//! the executor consults the monitor before retrying, and the queue drains
//! on every offline → online transition.

use std::sync::Arc;

use crate::config::ResilienceConfig;
use crate::connection::{ConnectionMonitor, NetworkPlatform};
use crate::http::{HttpRequest, HttpResponse, HttpSender, RequestError};
use crate::queue::{NewRequest, OfflineQueue, QueueStorage, RequestPriority};
use crate::resilience::{Classify, RetryExecutor, RetryPolicy};

/// Result of [`ResilienceContext::send`].
#[derive(Debug)]
pub enum FetchOutcome {
    /// The request completed with a 2xx response.
    Delivered(HttpResponse),
    /// The request was queued for replay. `cause` is the error that made the
    /// live attempt fail, if one was made.
    Queued {
        id: String,
        cause: Option<RequestError>,
    },
}

/// Shared handle to the three resilience components.
pub struct ResilienceContext {
    monitor: Arc<ConnectionMonitor>,
    executor: Arc<RetryExecutor>,
    queue: Arc<OfflineQueue>,
    sender: Arc<dyn HttpSender>,
}

impl ResilienceContext {
    pub fn new(
        config: &ResilienceConfig,
        platform: Arc<dyn NetworkPlatform>,
        storage: Arc<dyn QueueStorage>,
        sender: Arc<dyn HttpSender>,
    ) -> Self {
        let monitor = Arc::new(ConnectionMonitor::new(platform, &config.connection));
        let executor = Arc::new(
            RetryExecutor::new(RetryPolicy::from(&config.retry)).with_monitor(monitor.clone()),
        );
        let queue = Arc::new(OfflineQueue::load(
            config.queue.clone(),
            storage,
            sender.clone(),
            monitor.clone(),
        ));

        Self {
            monitor,
            executor,
            queue,
            sender,
        }
    }

    /// Start observing the network and replaying the queue on reconnect.
    pub fn start(&self) {
        self.monitor.initialize();
        self.queue.attach();
        tracing::info!(
            online = self.monitor.is_online(),
            queued = self.queue.len(),
            "Resilience context started"
        );
    }

    /// Stop background work. Queued entries stay persisted.
    pub fn shutdown(&self) {
        self.queue.detach();
        self.monitor.shutdown();
        tracing::info!("Resilience context stopped");
    }

    pub fn monitor(&self) -> &Arc<ConnectionMonitor> {
        &self.monitor
    }

    pub fn executor(&self) -> &Arc<RetryExecutor> {
        &self.executor
    }

    pub fn queue(&self) -> &Arc<OfflineQueue> {
        &self.queue
    }

    /// Send `request` with retry and no queue fallback.
    pub async fn fetch(&self, request: &HttpRequest) -> Result<HttpResponse, RequestError> {
        self.executor.fetch(self.sender.as_ref(), request).await
    }

    /// Send `request`, falling back to the offline queue for mutating
    /// requests.
    ///
    /// While offline a mutating request is queued without a live attempt.
    /// Otherwise it is sent through the executor; if it still fails with a
    /// retryable error it is queued, else the error is returned. Reads are
    /// never queued.
    pub async fn send(
        &self,
        request: HttpRequest,
        priority: RequestPriority,
    ) -> Result<FetchOutcome, RequestError> {
        if request.is_mutating() && !self.monitor.is_online() {
            let id = self
                .queue
                .enqueue(NewRequest::new(request).priority(priority));
            return Ok(FetchOutcome::Queued { id, cause: None });
        }

        match self.fetch(&request).await {
            Ok(response) => Ok(FetchOutcome::Delivered(response)),
            Err(err) if request.is_mutating() && err.classify().is_retryable() => {
                tracing::warn!(
                    method = %request.method,
                    url = %request.url,
                    error = %err,
                    "Live attempt failed; queueing for replay"
                );
                let id = self
                    .queue
                    .enqueue(NewRequest::new(request).priority(priority));
                Ok(FetchOutcome::Queued {
                    id,
                    cause: Some(err),
                })
            }
            Err(err) => Err(err),
        }
    }
}
