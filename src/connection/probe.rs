//! Active connectivity probing.
//!
//! # Responsibilities
//! - Periodically GET a probe URL
//! - Derive reachability and an effective connection type from the round trip
//! - Broadcast changes to the connection monitor
//!
//! Any HTTP response counts as reachable; only transport errors and timeouts
//! mean offline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::time;

use crate::config::ConnectionConfig;
use crate::connection::platform::{NetworkEvent, NetworkPlatform};
use crate::connection::state::{effective_type_from_rtt, NetworkInformation};

/// Native network platform backed by HTTP probes.
pub struct ProbeNetwork {
    client: reqwest::Client,
    config: ConnectionConfig,
    online: AtomicBool,
    info: RwLock<Option<NetworkInformation>>,
    tx: broadcast::Sender<NetworkEvent>,
}

impl ProbeNetwork {
    pub fn new(config: ConnectionConfig) -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            client: reqwest::Client::new(),
            config,
            online: AtomicBool::new(true),
            info: RwLock::new(None),
            tx,
        }
    }

    /// Probe until shutdown.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            url = %self.config.probe_url,
            interval = self.config.probe_interval_secs,
            "Connectivity probe starting"
        );

        let mut ticker = time::interval(Duration::from_secs(self.config.probe_interval_secs));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.probe_once().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Connectivity probe received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Run a single probe and publish the result. Returns reachability.
    pub async fn probe_once(&self) -> bool {
        let timeout = Duration::from_millis(self.config.probe_timeout_ms);
        let started = Instant::now();
        let request = self
            .client
            .get(&self.config.probe_url)
            .header("user-agent", "resilient-fetch-probe")
            .send();

        let reachable = match time::timeout(timeout, request).await {
            Ok(Ok(response)) => {
                tracing::trace!(status = %response.status(), "Probe answered");
                true
            }
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "Probe failed: connection error");
                false
            }
            Err(_) => {
                tracing::debug!("Probe failed: timeout");
                false
            }
        };

        if reachable {
            let rtt_ms = started.elapsed().as_millis() as u64;
            self.update_information(NetworkInformation {
                effective_type: Some(effective_type_from_rtt(rtt_ms).to_string()),
                downlink_mbps: None,
                rtt_ms: Some(rtt_ms),
                save_data: false,
            });
        }
        self.update_online(reachable);
        reachable
    }

    fn update_online(&self, online: bool) {
        let previous = self.online.swap(online, Ordering::SeqCst);
        if previous != online {
            if online {
                tracing::info!("Probe: network ONLINE");
            } else {
                tracing::warn!("Probe: network OFFLINE");
            }
            let event = if online {
                NetworkEvent::Online
            } else {
                NetworkEvent::Offline
            };
            let _ = self.tx.send(event);
        }
    }

    fn update_information(&self, info: NetworkInformation) {
        let mut guard = match self.info.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let changed = guard.as_ref().map(|old| old.effective_type != info.effective_type);
        *guard = Some(info);
        drop(guard);

        if changed.unwrap_or(true) {
            let _ = self.tx.send(NetworkEvent::Change);
        }
    }
}

impl NetworkPlatform for ProbeNetwork {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_probe_goes_offline() {
        let config = ConnectionConfig {
            // Port 9 (discard) on loopback is closed on any sane test host.
            probe_url: "http://127.0.0.1:9/health".to_string(),
            probe_timeout_ms: 500,
            ..Default::default()
        };
        let network = ProbeNetwork::new(config);
        let mut rx = network.events().unwrap();

        assert!(network.is_online());
        assert!(!network.probe_once().await);
        assert!(!network.is_online());
        assert_eq!(rx.try_recv().unwrap(), NetworkEvent::Offline);
    }
}
