//! Drives the session manager with a simulated relay workload.
//!
//! Pairings come from a TOML schedule (`[[epochs]]` tables, each with its
//! `[[epochs.providers]]`). Workers relay through a fake transport that fails at a
//! configurable rate, retrying on other providers the way a consumer would.

use clap::Args;
use rand::Rng;
use relay_core::{
    config::AppConfig,
    metrics::SessionMetrics,
    session::{
        ConsumerSessionManager, EndpointHealthMonitor, EndpointProbe, ManagerStats, QosSample,
        RelayError, SessionError, TcpConnectProbe,
    },
    types::EpochPairing,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashSet, VecDeque},
    path::Path,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use super::utils::{print_info, print_success, CliError, CliResult};

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Pairing schedule to replay
    #[arg(short, long, default_value = "config/pairing.example.toml")]
    pub pairing: String,

    /// Total number of relays to run
    #[arg(short, long, default_value = "1000")]
    pub relays: u64,

    /// Concurrent relay workers
    #[arg(short, long, default_value = "8")]
    pub workers: usize,

    /// Install the next scheduled epoch after this many relays (0 = never)
    #[arg(long, default_value = "0")]
    pub epoch_every: u64,

    /// Probability in [0, 1] that a simulated relay fails
    #[arg(long, default_value = "0.1")]
    pub failure_rate: f64,

    /// Providers tried per relay after the first one fails
    #[arg(long, default_value = "3")]
    pub max_retries: u32,

    /// Compute units charged per relay
    #[arg(long, default_value = "10")]
    pub compute_units: u64,

    /// Upper bound of the simulated relay latency in milliseconds
    #[arg(long, default_value = "5")]
    pub max_latency_ms: u64,

    /// Probe endpoints over TCP in the background
    #[arg(long)]
    pub probe: bool,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,

    /// Print the Prometheus exposition after the report
    #[arg(long)]
    pub metrics: bool,
}

/// A sequence of pairings installed one after another.
#[derive(Debug, Clone, Deserialize)]
pub struct PairingSchedule {
    #[serde(default)]
    pub epochs: Vec<EpochPairing>,
}

impl PairingSchedule {
    pub fn from_file(path: impl AsRef<Path>) -> CliResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let schedule: Self = toml::from_str(&content)?;
        if schedule.epochs.is_empty() {
            return Err(CliError::Input("pairing schedule has no epochs".to_string()));
        }
        Ok(schedule)
    }
}

#[derive(Debug, Default)]
struct Counters {
    started: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    exhausted: AtomicU64,
    retries: AtomicU64,
    session_failures: AtomicU64,
    epochs_installed: AtomicU64,
}

#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub relays: u64,
    pub succeeded: u64,
    /// Relays that ran out of retries after provider failures.
    pub failed: u64,
    /// Relays that could not get a session at all.
    pub exhausted: u64,
    pub retries: u64,
    pub session_failures: u64,
    pub epochs_installed: u64,
    pub elapsed_ms: u64,
    pub reported_providers: Vec<String>,
    pub stats: ManagerStats,
    pub providers: Vec<ProviderReport>,
}

/// Per-provider outcome of the current epoch.
#[derive(Debug, Serialize)]
pub struct ProviderReport {
    pub address: String,
    pub committed_compute_units: u64,
    pub relays: u64,
    pub available_sessions: usize,
    pub failure_streak: u32,
    pub average_latency_ms: Option<u64>,
    pub average_blocks_behind: Option<u64>,
    pub endpoints: Vec<EndpointReport>,
}

#[derive(Debug, Serialize)]
pub struct EndpointReport {
    pub address: String,
    pub connected: bool,
    pub connection_refusals: u64,
    /// Milliseconds since the last liveness update, `None` if never probed.
    pub last_checked_ms_ago: Option<u64>,
}

struct Simulation {
    manager: Arc<ConsumerSessionManager>,
    schedule: Mutex<VecDeque<EpochPairing>>,
    counters: Counters,
    args: SimulateArgs,
}

pub async fn run_simulation(args: SimulateArgs, config: &AppConfig) -> CliResult<()> {
    validate_args(&args)?;
    let mut schedule: VecDeque<EpochPairing> =
        PairingSchedule::from_file(&args.pairing)?.epochs.into();

    let metrics =
        if config.metrics.enabled { SessionMetrics::new() } else { SessionMetrics::disabled() };
    let manager =
        Arc::new(ConsumerSessionManager::with_metrics(config.session.clone(), metrics.clone()));

    if let Some(first) = schedule.pop_front() {
        manager.update_all_providers(first.epoch, first.providers)?;
    }
    print_info(&format!(
        "Epoch {} installed with {} providers",
        manager.current_epoch(),
        manager.pairing_addresses().len()
    ));

    let (shutdown_tx, _) = broadcast::channel(1);
    let monitor_handle = if args.probe && config.health_check.enabled {
        let monitor = EndpointHealthMonitor::new(
            Arc::clone(&manager),
            Arc::new(TcpConnectProbe) as Arc<dyn EndpointProbe>,
            config.health_check_interval(),
            config.probe_timeout(),
        )
        .with_metrics(metrics.clone());
        let monitor = Arc::new(monitor);
        let round = monitor.check_once().await;
        print_info(&format!(
            "Probed {} endpoints: {} reachable",
            round.probed, round.connected
        ));
        Some(monitor.start_with_shutdown(shutdown_tx.subscribe()))
    } else {
        None
    };

    let simulation = Arc::new(Simulation {
        manager: Arc::clone(&manager),
        schedule: Mutex::new(schedule),
        counters: Counters::default(),
        args: args.clone(),
    });

    let started = Instant::now();
    let workers: Vec<_> = (0..args.workers)
        .map(|worker| {
            let simulation = Arc::clone(&simulation);
            tokio::spawn(async move { simulation.worker(worker).await })
        })
        .collect();
    for result in futures::future::join_all(workers).await {
        if let Err(e) = result {
            warn!(error = %e, "relay worker panicked");
        }
    }
    let elapsed = started.elapsed();

    if let Some(handle) = monitor_handle {
        if shutdown_tx.send(()).is_err() {
            debug!("health monitor already stopped");
        }
        if let Err(e) = handle.await {
            warn!(error = %e, "health monitor task panicked");
        }
    }

    let report = simulation.report(elapsed);
    print_report(&report, args.json)?;

    if args.metrics {
        match metrics.render() {
            Some(exposition) => println!("{exposition}"),
            None => print_info("Metrics are disabled in the configuration"),
        }
    }

    Ok(())
}

fn validate_args(args: &SimulateArgs) -> CliResult<()> {
    if args.workers == 0 {
        return Err(CliError::Input("at least one worker is required".to_string()));
    }
    if !(0.0..=1.0).contains(&args.failure_rate) {
        return Err(CliError::Input(format!(
            "failure rate {} is outside [0, 1]",
            args.failure_rate
        )));
    }
    Ok(())
}

impl Simulation {
    async fn worker(&self, worker: usize) {
        loop {
            let relay = self.counters.started.fetch_add(1, Ordering::Relaxed);
            if relay >= self.args.relays {
                break;
            }

            if self.args.epoch_every > 0 && relay > 0 && relay % self.args.epoch_every == 0 {
                self.advance_epoch().await;
            }

            self.relay_with_retry(worker, relay).await;
        }
    }

    async fn advance_epoch(&self) {
        let Some(next) = self.schedule.lock().await.pop_front() else {
            return;
        };

        let epoch = next.epoch;
        match self.manager.update_all_providers(epoch, next.providers) {
            Ok(()) => {
                self.counters.epochs_installed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => warn!(epoch, error = %e, "scheduled pairing rejected"),
        }
    }

    async fn relay_with_retry(&self, worker: usize, relay: u64) {
        let mut banned: HashSet<String> = HashSet::new();
        let mut banned_epoch = self.manager.current_epoch();

        for attempt in 0..=self.args.max_retries {
            if attempt > 0 {
                self.counters.retries.fetch_add(1, Ordering::Relaxed);
            }

            let acquired = if banned.is_empty() {
                self.manager.get_session(self.args.compute_units)
            } else {
                self.manager.get_session_from_all_except(
                    &banned,
                    self.args.compute_units,
                    banned_epoch,
                )
            };

            let lease = match acquired {
                Ok(lease) => lease,
                Err(e) => {
                    log_acquisition_error(worker, relay, &e);
                    self.counters.exhausted.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            };

            match simulated_relay(self.args.failure_rate, self.args.max_latency_ms).await {
                Ok((qos, latest_block)) => {
                    if let Err(e) = self.manager.done_with_session(&lease, qos, latest_block) {
                        warn!(worker, relay, error = %e, "completion rejected");
                    }
                    self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(relay_error) => {
                    debug!(
                        worker,
                        relay,
                        provider = lease.provider_address(),
                        error = %relay_error,
                        "relay failed"
                    );
                    self.counters.session_failures.fetch_add(1, Ordering::Relaxed);
                    if let Err(e) = self.manager.session_failure(&lease, &relay_error) {
                        warn!(worker, relay, error = %e, "failure report rejected");
                    }

                    // Bans from an older epoch are ignored by the manager; start over.
                    if lease.epoch() != banned_epoch {
                        banned.clear();
                        banned_epoch = lease.epoch();
                    }
                    banned.insert(lease.provider_address().to_string());
                }
            }
        }

        self.counters.failed.fetch_add(1, Ordering::Relaxed);
    }

    fn report(&self, elapsed: Duration) -> SimulationReport {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        let epoch = self.manager.current_epoch();

        SimulationReport {
            relays: self.args.relays,
            succeeded: load(&self.counters.succeeded),
            failed: load(&self.counters.failed),
            exhausted: load(&self.counters.exhausted),
            retries: load(&self.counters.retries),
            session_failures: load(&self.counters.session_failures),
            epochs_installed: load(&self.counters.epochs_installed),
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            reported_providers: self.manager.get_reported_providers(epoch),
            stats: self.manager.stats(),
            providers: self.provider_reports(),
        }
    }

    fn provider_reports(&self) -> Vec<ProviderReport> {
        self.manager
            .pairing_addresses()
            .into_iter()
            .filter_map(|address| self.manager.provider(&address))
            .map(|provider| {
                let qos = provider.qos_summary();
                let endpoints = provider
                    .endpoints()
                    .iter()
                    .map(|endpoint| EndpointReport {
                        address: endpoint.network_address().to_string(),
                        connected: endpoint.is_connected(),
                        connection_refusals: endpoint.connection_refusals(),
                        last_checked_ms_ago: endpoint
                            .time_since_last_check()
                            .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)),
                    })
                    .collect();

                ProviderReport {
                    address: provider.address().to_string(),
                    committed_compute_units: provider.committed_compute_units(),
                    relays: qos.relays,
                    available_sessions: provider.available_sessions(),
                    failure_streak: provider.failure_streak(),
                    average_latency_ms: qos.average_latency_ms(),
                    average_blocks_behind: qos.average_blocks_behind(),
                    endpoints,
                }
            })
            .collect()
    }
}

fn log_acquisition_error(worker: usize, relay: u64, error: &SessionError) {
    if error.is_retryable() {
        debug!(worker, relay, error = %error, "no session available");
    } else {
        warn!(worker, relay, error = %error, "session acquisition failed");
    }
}

/// Pretends to send a relay. Fails with a random error kind at `failure_rate`.
async fn simulated_relay(
    failure_rate: f64,
    max_latency_ms: u64,
) -> Result<(QosSample, u64), RelayError> {
    // ThreadRng is not Send; draw everything before the await.
    let (latency, outcome) = {
        let mut rng = rand::rng();
        let latency = Duration::from_millis(rng.random_range(0..=max_latency_ms));
        let outcome = if rng.random_bool(failure_rate) {
            Err(random_relay_error(rng.random_range(0..8)))
        } else {
            Ok((QosSample::new(latency, rng.random_range(0..3)), 1_000 + rng.random_range(0..10)))
        };
        (latency, outcome)
    };

    tokio::time::sleep(latency).await;
    outcome
}

fn random_relay_error(kind: u8) -> RelayError {
    match kind {
        0 | 1 => RelayError::Timeout,
        2 => RelayError::RateLimited,
        3 => RelayError::ConnectionFailed("connection refused".to_string()),
        4 => RelayError::InvalidResponse("truncated body".to_string()),
        5 => RelayError::ProtocolViolation("unsigned reply".to_string()),
        6 => RelayError::Rpc(-32700, "parse error".to_string()),
        _ => RelayError::Rpc(-32000, "execution reverted".to_string()),
    }
}

fn print_report(report: &SimulationReport, json: bool) -> CliResult<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    print_success(&format!(
        "{} of {} relays succeeded in {}ms",
        report.succeeded, report.relays, report.elapsed_ms
    ));

    println!("\n[Relays]");
    println!("  Failed after retries: {}", report.failed);
    println!("  No session available: {}", report.exhausted);
    println!("  Retries: {}", report.retries);
    println!("  Session failures: {}", report.session_failures);
    println!("  Epochs installed: {}", report.epochs_installed);

    let stats = &report.stats;
    println!("\n[Epoch {}]", stats.epoch);
    println!("  Paired providers: {}", stats.paired_providers);
    println!("  Valid providers: {}", stats.valid_providers);
    println!("  Blocked providers: {}", stats.blocked_providers);
    println!("  Reported providers: {}", report.reported_providers.join(", "));
    println!(
        "  Sessions: {} ({} available, {} blocklisted)",
        stats.total_sessions, stats.available_sessions, stats.blocklisted_sessions
    );
    println!("  Committed compute units: {}", stats.committed_compute_units);

    println!("\n[Providers]");
    for provider in &report.providers {
        println!(
            "  {}: {} relays, {} CU, {} free sessions, latency {}, lag {}",
            provider.address,
            provider.relays,
            provider.committed_compute_units,
            provider.available_sessions,
            provider.average_latency_ms.map_or_else(|| "-".to_string(), |ms| format!("{ms}ms")),
            provider
                .average_blocks_behind
                .map_or_else(|| "-".to_string(), |blocks| format!("{blocks} blocks")),
        );
        for endpoint in &provider.endpoints {
            let checked = endpoint
                .last_checked_ms_ago
                .map_or_else(|| "never probed".to_string(), |ms| format!("probed {ms}ms ago"));
            println!(
                "    {} {} ({} refusals, {checked})",
                endpoint.address,
                if endpoint.connected { "up" } else { "down" },
                endpoint.connection_refusals,
            );
        }
    }

    info!(
        succeeded = report.succeeded,
        failed = report.failed,
        exhausted = report.exhausted,
        "simulation finished"
    );

    Ok(())
}
