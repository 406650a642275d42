use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// Milliseconds since the unix epoch, `0` if the clock is before it.
fn now_ms() -> u64 {
    #[allow(clippy::cast_possible_truncation)]
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// One network-reachable address of a provider.
///
/// The liveness flag is best-effort: it is refreshed out-of-band (by the
/// [`EndpointHealthMonitor`](super::health::EndpointHealthMonitor) or by the transport)
/// and read lock-free by the selector. Endpoints start out connected so a fresh pairing
/// is usable before the first probe completes.
pub struct Endpoint {
    network_address: Arc<str>,
    connected: AtomicBool,
    /// Number of probes or relays that found the endpoint unreachable.
    connection_refusals: AtomicU64,
    /// Timestamp (ms since epoch) of the last liveness update, `0` if never updated.
    last_checked_ms: AtomicU64,
}

impl Endpoint {
    #[must_use]
    pub fn new(network_address: impl Into<Arc<str>>) -> Self {
        Self {
            network_address: network_address.into(),
            connected: AtomicBool::new(true),
            connection_refusals: AtomicU64::new(0),
            last_checked_ms: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn network_address(&self) -> &str {
        &self.network_address
    }

    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Records the outcome of a liveness check.
    ///
    /// Returns `true` if the liveness flag changed.
    pub fn set_connected(&self, connected: bool) -> bool {
        self.last_checked_ms.store(now_ms(), Ordering::Relaxed);
        if !connected {
            self.connection_refusals.fetch_add(1, Ordering::Relaxed);
        }
        self.connected.swap(connected, Ordering::AcqRel) != connected
    }

    #[must_use]
    pub fn connection_refusals(&self) -> u64 {
        self.connection_refusals.load(Ordering::Relaxed)
    }

    /// Time since the last liveness update, `None` if it was never checked.
    #[must_use]
    pub fn time_since_last_check(&self) -> Option<Duration> {
        let last = self.last_checked_ms.load(Ordering::Relaxed);
        if last == 0 {
            return None;
        }
        Some(Duration::from_millis(now_ms().saturating_sub(last)))
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("network_address", &self.network_address)
            .field("connected", &self.is_connected())
            .field("connection_refusals", &self.connection_refusals())
            .finish()
    }
}
