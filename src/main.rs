//! resilient-fetch replay agent.
//!
//! ```text
//!   ProbeNetwork ──events──▶ ConnectionMonitor ──online──▶ OfflineQueue.drain()
//!        │                          │                            │
//!   GET probe_url             RetryExecutor               ReqwestSender ──▶ backend
//!                                   ▲                            ▲
//!   config.toml ──notify──▶ ConfigWatcher ── retry policy        │
//!   drain ticker ──────── remove_stale + drain ──────────────────┘
//! ```
//!
//! Usage: `resilient-fetch [config.toml]`. Without a file the defaults apply.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use resilient_fetch::config::{load_config, ConfigWatcher, ResilienceConfig};
use resilient_fetch::connection::ProbeNetwork;
use resilient_fetch::http::ReqwestSender;
use resilient_fetch::lifecycle::Shutdown;
use resilient_fetch::observability::{logging, metrics};
use resilient_fetch::queue::FileStorage;
use resilient_fetch::{ResilienceContext, RetryPolicy};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = if config_path.exists() {
        load_config(&config_path)?
    } else {
        ResilienceConfig::default()
    };

    logging::init(&config.observability);
    tracing::info!("resilient-fetch v{} starting", env!("CARGO_PKG_VERSION"));
    if !config_path.exists() {
        tracing::warn!(path = %config_path.display(), "Config file not found; using defaults");
    }

    tracing::info!(
        probe_url = %config.connection.probe_url,
        max_retries = config.retry.max_retries,
        queue_capacity = config.queue.capacity,
        storage_dir = %config.storage.directory,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();

    let probe = Arc::new(ProbeNetwork::new(config.connection.clone()));
    let storage = Arc::new(FileStorage::open(
        &config.storage.directory,
        config.storage.max_bytes,
    )?);
    let sender = Arc::new(ReqwestSender::new(&config.transport)?);

    let ctx = Arc::new(ResilienceContext::new(
        &config,
        probe.clone(),
        storage,
        sender,
    ));

    // Establish connectivity before the monitor's first read.
    probe.probe_once().await;
    ctx.start();

    let probe_task = {
        let probe = probe.clone();
        let rx = shutdown.subscribe();
        tokio::spawn(async move { probe.run(rx).await })
    };

    let ticker_task = {
        let ctx = ctx.clone();
        let mut rx = shutdown.subscribe();
        let interval = Duration::from_secs(config.queue.drain_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let queue = ctx.queue();
                        queue.remove_stale_default();
                        queue.drain().await;
                    }
                    _ = rx.recv() => {
                        tracing::info!("Drain ticker received shutdown signal, exiting loop");
                        break;
                    }
                }
            }
        })
    };

    // Hot reload of the retry policy.
    let _watcher = if config_path.exists() {
        let (watcher, mut updates) = ConfigWatcher::new(&config_path);
        let ctx = ctx.clone();
        let mut rx = shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(new_config) = updates.recv() => {
                        let policy = RetryPolicy::from(&new_config.retry);
                        if *ctx.executor().policy() != policy {
                            ctx.executor().set_policy(policy);
                        }
                    }
                    _ = rx.recv() => break,
                }
            }
        });
        match watcher.run() {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                tracing::error!(error = %e, "Failed to watch config file; hot reload disabled");
                None
            }
        }
    } else {
        None
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    shutdown.trigger();

    let _ = probe_task.await;
    let _ = ticker_task.await;
    ctx.shutdown();

    let status = ctx.queue().status();
    tracing::info!(
        pending = status.pending,
        failed = status.failed,
        "Shutdown complete"
    );
    Ok(())
}
