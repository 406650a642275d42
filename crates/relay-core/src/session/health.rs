use async_trait::async_trait;
use futures::future::join_all;
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpStream, sync::broadcast, time::interval};
use tracing::{debug, info, warn};

use super::{endpoint::Endpoint, manager::ConsumerSessionManager};
use crate::metrics::SessionMetrics;

/// Liveness check for a single endpoint.
///
/// Implementations perform real I/O; the monitor never calls them while holding a
/// registry lock.
#[async_trait]
pub trait EndpointProbe: Send + Sync {
    /// Returns `true` if the endpoint accepted the probe.
    async fn probe(&self, endpoint: &Endpoint) -> bool;
}

/// Probes an endpoint by opening a TCP connection to its host and port.
///
/// The network address may carry a scheme (`grpc://`, `https://`) and a path; both are
/// ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnectProbe;

impl TcpConnectProbe {
    fn socket_address(network_address: &str) -> &str {
        let without_scheme =
            network_address.split_once("://").map_or(network_address, |(_, rest)| rest);
        without_scheme.split('/').next().unwrap_or(without_scheme)
    }
}

#[async_trait]
impl EndpointProbe for TcpConnectProbe {
    async fn probe(&self, endpoint: &Endpoint) -> bool {
        let address = Self::socket_address(endpoint.network_address());
        match TcpStream::connect(address).await {
            Ok(_) => true,
            Err(e) => {
                debug!(endpoint = address, error = %e, "tcp probe failed");
                false
            }
        }
    }
}

/// Outcome of one probe round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeRound {
    pub probed: usize,
    pub connected: usize,
    pub disconnected: usize,
    /// Endpoints whose liveness flag flipped during the round.
    pub changed: usize,
}

/// Periodically refreshes the `connected` flag of every endpoint in the current pairing.
///
/// Each round snapshots the endpoints (cloning `Arc`s under the pairing read lock),
/// releases the lock and probes them concurrently, each under `probe_timeout`. A probe
/// that times out counts as a refusal.
pub struct EndpointHealthMonitor {
    manager: Arc<ConsumerSessionManager>,
    probe: Arc<dyn EndpointProbe>,
    check_interval: Duration,
    probe_timeout: Duration,
    metrics: SessionMetrics,
}

impl EndpointHealthMonitor {
    #[must_use]
    pub fn new(
        manager: Arc<ConsumerSessionManager>,
        probe: Arc<dyn EndpointProbe>,
        check_interval: Duration,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            manager,
            probe,
            check_interval,
            probe_timeout,
            metrics: SessionMetrics::disabled(),
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: SessionMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Runs probe rounds every `check_interval` until `shutdown_rx` fires.
    #[must_use]
    pub fn start_with_shutdown(
        self: Arc<Self>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.check_interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let round = self.check_once().await;
                        debug!(
                            probed = round.probed,
                            connected = round.connected,
                            changed = round.changed,
                            "endpoint probe round complete"
                        );
                    }
                    _ = shutdown_rx.recv() => {
                        info!("endpoint health monitor shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Probes every endpoint of the current pairing once.
    pub async fn check_once(&self) -> ProbeRound {
        let endpoints = self.manager.current_endpoints();
        let probe_timeout = self.probe_timeout;

        let probes = endpoints.iter().map(|(_, endpoint)| {
            let probe = Arc::clone(&self.probe);
            async move {
                tokio::time::timeout(probe_timeout, probe.probe(endpoint)).await.unwrap_or(false)
            }
        });
        let results = join_all(probes).await;

        let mut round = ProbeRound { probed: endpoints.len(), ..ProbeRound::default() };
        for ((provider, endpoint), connected) in endpoints.iter().zip(results) {
            if connected {
                round.connected += 1;
            } else {
                round.disconnected += 1;
            }

            if endpoint.set_connected(connected) {
                round.changed += 1;
                if connected {
                    info!(
                        provider = %provider,
                        endpoint = %endpoint.network_address(),
                        "endpoint reachable again"
                    );
                } else {
                    warn!(
                        provider = %provider,
                        endpoint = %endpoint.network_address(),
                        refusals = endpoint.connection_refusals(),
                        "endpoint unreachable, excluded from selection"
                    );
                }
            }
            self.metrics.record_endpoint_liveness(provider, endpoint.network_address(), connected);
        }

        round
    }
}
