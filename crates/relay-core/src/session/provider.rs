use std::{
    fmt,
    sync::{
        atomic::{AtomicU32, AtomicU64, Ordering},
        Arc,
    },
};

use super::{
    consumer_session::{ConsumerSession, SessionId},
    endpoint::Endpoint,
    qos::QosInfo,
};
use crate::types::ProviderPairing;

/// All sessions and endpoints of one provider for one epoch.
///
/// Built once from a [`ProviderPairing`] when the epoch's pairing is installed and
/// never structurally modified afterwards: endpoints and sessions are fixed, only
/// their atomic flags and accounting change. Owned by the pairing registry; leases
/// hold an `Arc` to it so a retired provider stays alive for completion and failure
/// reporting until its generation is dropped.
///
/// Sessions are created `sessions_per_endpoint` at a time for each endpoint, in
/// endpoint order, with ids starting at `1`. Within an endpoint the scan order is the
/// id order, giving a deterministic preference for lower-indexed free sessions.
pub struct ProviderSessions {
    address: Arc<str>,
    endpoints: Vec<Arc<Endpoint>>,
    sessions: Vec<Arc<ConsumerSession>>,
    max_compute_units: Option<u64>,
    /// Compute units in flight plus committed during this epoch.
    used_compute_units: AtomicU64,
    /// Consecutive session failures that did not block the provider outright.
    failure_streak: AtomicU32,
}

impl ProviderSessions {
    #[must_use]
    pub fn new(pairing: &ProviderPairing, sessions_per_endpoint: usize) -> Self {
        let address: Arc<str> = Arc::from(pairing.address.as_str());
        let endpoints: Vec<Arc<Endpoint>> = pairing
            .endpoints
            .iter()
            .map(|network_address| Arc::new(Endpoint::new(network_address.as_str())))
            .collect();

        let mut sessions = Vec::with_capacity(endpoints.len() * sessions_per_endpoint);
        let mut next_id = 1u64;
        for endpoint in &endpoints {
            for _ in 0..sessions_per_endpoint {
                sessions.push(Arc::new(ConsumerSession::new(
                    SessionId(next_id),
                    Arc::clone(&address),
                    Arc::clone(endpoint),
                )));
                next_id += 1;
            }
        }

        Self {
            address,
            endpoints,
            sessions,
            max_compute_units: pairing.max_compute_units,
            used_compute_units: AtomicU64::new(0),
            failure_streak: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    pub(crate) fn address_arc(&self) -> &Arc<str> {
        &self.address
    }

    #[must_use]
    pub fn endpoints(&self) -> &[Arc<Endpoint>] {
        &self.endpoints
    }

    #[must_use]
    pub fn sessions(&self) -> &[Arc<ConsumerSession>] {
        &self.sessions
    }

    #[must_use]
    pub fn session(&self, id: SessionId) -> Option<&Arc<ConsumerSession>> {
        self.sessions.iter().find(|session| session.id() == id)
    }

    /// Returns the first endpoint currently flagged as connected.
    #[must_use]
    pub fn fetch_endpoint(&self) -> Option<&Arc<Endpoint>> {
        self.connected_endpoints().next()
    }

    /// Connected endpoints in preference order.
    pub fn connected_endpoints(&self) -> impl Iterator<Item = &Arc<Endpoint>> {
        self.endpoints.iter().filter(|endpoint| endpoint.is_connected())
    }

    /// Sessions bound to `endpoint`, in scan order.
    pub fn sessions_for_endpoint<'a>(
        &'a self,
        endpoint: &'a Arc<Endpoint>,
    ) -> impl Iterator<Item = &'a Arc<ConsumerSession>> + 'a {
        self.sessions.iter().filter(move |session| Arc::ptr_eq(session.endpoint(), endpoint))
    }

    /// Try-locks the first free, non-blocklisted session bound to `endpoint`.
    ///
    /// Never waits: a session held by another caller is skipped.
    pub(crate) fn try_lock_session(
        &self,
        endpoint: &Arc<Endpoint>,
    ) -> Option<(Arc<ConsumerSession>, u64)> {
        self.sessions_for_endpoint(endpoint)
            .filter(|session| !session.is_blocklisted())
            .find_map(|session| session.try_lock().map(|token| (Arc::clone(session), token)))
    }

    #[must_use]
    pub fn max_compute_units(&self) -> Option<u64> {
        self.max_compute_units
    }

    #[must_use]
    pub fn used_compute_units(&self) -> u64 {
        self.used_compute_units.load(Ordering::Acquire)
    }

    /// Reserves `compute_units` against the provider's epoch budget.
    ///
    /// Returns `false` without reserving anything if the budget cannot absorb them.
    pub(crate) fn try_reserve_compute_units(&self, compute_units: u64) -> bool {
        self.used_compute_units
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                let next = used.checked_add(compute_units)?;
                match self.max_compute_units {
                    Some(max) if next > max => None,
                    _ => Some(next),
                }
            })
            .is_ok()
    }

    /// Returns previously reserved compute units to the budget.
    pub(crate) fn release_compute_units(&self, compute_units: u64) {
        if compute_units == 0 {
            return;
        }
        // The closure never returns `None`, so the update cannot fail.
        let _ = self.used_compute_units.fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
            Some(used.saturating_sub(compute_units))
        });
    }

    /// Counts one more session failure. Returns the new streak length.
    pub(crate) fn record_session_failure(&self) -> u32 {
        self.failure_streak.fetch_add(1, Ordering::AcqRel).saturating_add(1)
    }

    pub(crate) fn reset_failure_streak(&self) {
        self.failure_streak.store(0, Ordering::Release);
    }

    #[must_use]
    pub fn failure_streak(&self) -> u32 {
        self.failure_streak.load(Ordering::Acquire)
    }

    /// Number of sessions that are neither locked nor blocklisted.
    #[must_use]
    pub fn available_sessions(&self) -> usize {
        self.sessions.iter().filter(|s| !s.is_locked() && !s.is_blocklisted()).count()
    }

    /// Number of sessions retired after a failure.
    #[must_use]
    pub fn blocklisted_sessions(&self) -> usize {
        self.sessions.iter().filter(|s| s.is_blocklisted()).count()
    }

    /// Total compute units committed across all sessions.
    #[must_use]
    pub fn committed_compute_units(&self) -> u64 {
        self.sessions.iter().map(|s| s.accounting().cu_sum).sum()
    }

    /// Provider-level QoS: the merge of every session's rolling info.
    #[must_use]
    pub fn qos_summary(&self) -> QosInfo {
        self.sessions.iter().fold(QosInfo::default(), |mut summary, session| {
            summary.merge(&session.accounting().qos);
            summary
        })
    }
}

impl fmt::Debug for ProviderSessions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSessions")
            .field("address", &self.address)
            .field("endpoints", &self.endpoints.len())
            .field("sessions", &self.sessions.len())
            .field("max_compute_units", &self.max_compute_units)
            .field("used_compute_units", &self.used_compute_units())
            .finish()
    }
}
