use parking_lot::RwLock;
use rand::Rng;
use serde::Serialize;
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tracing::{debug, info, warn};

use super::{
    consumer_session::{Finalize, SessionLease},
    endpoint::Endpoint,
    errors::{RelayError, SessionError},
    provider::ProviderSessions,
    qos::QosSample,
};
use crate::{config::SessionManagerConfig, metrics::SessionMetrics, types::ProviderPairing};

/// Providers paired for one epoch, keyed by address.
struct PairingGeneration {
    epoch: u64,
    providers: HashMap<Arc<str>, Arc<ProviderSessions>>,
}

impl PairingGeneration {
    fn empty(epoch: u64) -> Self {
        Self { epoch, providers: HashMap::new() }
    }
}

/// The live generation plus the one it replaced.
///
/// The retired generation is only kept so in-flight leases and lookups by address
/// still resolve; it is dropped on the following transition.
struct Generations {
    current: PairingGeneration,
    purge: Option<PairingGeneration>,
}

/// Selection state of the current epoch.
///
/// `valid` and `blocked` partition `pairing_addresses`; `reported` is a subset of
/// `blocked`.
struct AddressBook {
    epoch: u64,
    pairing_addresses: Vec<Arc<str>>,
    valid: Vec<Arc<str>>,
    blocked: Vec<Arc<str>>,
    reported: Vec<Arc<str>>,
}

impl AddressBook {
    fn new(epoch: u64, pairing_addresses: Vec<Arc<str>>) -> Self {
        Self {
            epoch,
            valid: pairing_addresses.clone(),
            pairing_addresses,
            blocked: Vec::new(),
            reported: Vec::new(),
        }
    }
}

/// Point-in-time view of the manager, for logs and operator output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    pub epoch: u64,
    pub paired_providers: usize,
    pub valid_providers: usize,
    pub blocked_providers: usize,
    pub reported_providers: usize,
    pub purge_providers: usize,
    pub total_sessions: usize,
    pub locked_sessions: usize,
    pub blocklisted_sessions: usize,
    /// Sessions that are neither locked nor blocklisted.
    pub available_sessions: usize,
    pub committed_compute_units: u64,
}

/// Hands out exclusive sessions on the providers paired for the current epoch.
///
/// # Locking
///
/// Two `RwLock`s guard the registry:
///
/// - `pairing` holds the provider generations. Selection holds it shared for the
///   whole call; only [`update_all_providers`](Self::update_all_providers) takes it
///   exclusively.
/// - `addresses` holds the valid/blocked/reported address sets. Draws take it shared
///   for a moment; [`provider_block`](Self::provider_block) and epoch transitions take
///   it exclusively.
///
/// The order is always `pairing` before `addresses`. Sessions themselves are never
/// waited on: a busy session is skipped and the selector moves to another provider.
pub struct ConsumerSessionManager {
    config: SessionManagerConfig,
    current_epoch: AtomicU64,
    pairing: RwLock<Generations>,
    addresses: RwLock<AddressBook>,
    metrics: SessionMetrics,
}

impl ConsumerSessionManager {
    /// Creates an empty manager at epoch `0` that records no metrics.
    ///
    /// The first pairing delivered through
    /// [`update_all_providers`](Self::update_all_providers) must be for epoch `1` or later.
    #[must_use]
    pub fn new(config: SessionManagerConfig) -> Self {
        Self::with_metrics(config, SessionMetrics::disabled())
    }

    #[must_use]
    pub fn with_metrics(config: SessionManagerConfig, metrics: SessionMetrics) -> Self {
        Self {
            config,
            current_epoch: AtomicU64::new(0),
            pairing: RwLock::new(Generations { current: PairingGeneration::empty(0), purge: None }),
            addresses: RwLock::new(AddressBook::new(0, Vec::new())),
            metrics,
        }
    }

    #[must_use]
    pub fn config(&self) -> &SessionManagerConfig {
        &self.config
    }

    #[must_use]
    pub fn current_epoch(&self) -> u64 {
        self.current_epoch.load(Ordering::Acquire)
    }

    /// Installs the pairing of a new epoch.
    ///
    /// The current generation is demoted to the purge slot (dropping whatever was
    /// there), the address book is rebuilt from `pairing_list` in order, and all
    /// provider blocks and reports are cleared. Duplicate addresses keep their first
    /// occurrence.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::StaleEpoch`] if `epoch` is not newer than the current
    /// epoch. Nothing is changed in that case.
    pub fn update_all_providers(
        &self,
        epoch: u64,
        pairing_list: Vec<ProviderPairing>,
    ) -> Result<(), SessionError> {
        let mut pairing = self.pairing.write();
        let current = pairing.current.epoch;
        if epoch <= current {
            warn!(requested = epoch, current, "rejected stale pairing update");
            return Err(SessionError::StaleEpoch { requested: epoch, current });
        }

        let mut providers: HashMap<Arc<str>, Arc<ProviderSessions>> =
            HashMap::with_capacity(pairing_list.len());
        let mut pairing_addresses = Vec::with_capacity(pairing_list.len());
        for provider_pairing in &pairing_list {
            if providers.contains_key(provider_pairing.address.as_str()) {
                warn!(
                    epoch,
                    provider = %provider_pairing.address,
                    "duplicate provider in pairing list, keeping first entry"
                );
                continue;
            }

            let provider = Arc::new(ProviderSessions::new(
                provider_pairing,
                self.config.sessions_per_endpoint,
            ));
            let address = Arc::clone(provider.address_arc());
            pairing_addresses.push(Arc::clone(&address));
            providers.insert(address, provider);
        }

        let paired = pairing_addresses.len();
        let previous =
            std::mem::replace(&mut pairing.current, PairingGeneration { epoch, providers });
        let purged = pairing.purge.replace(previous).map_or(0, |dropped| dropped.providers.len());

        *self.addresses.write() = AddressBook::new(epoch, pairing_addresses);
        self.current_epoch.store(epoch, Ordering::Release);

        info!(
            epoch,
            previous_epoch = current,
            providers = paired,
            purged_providers = purged,
            "installed pairing for new epoch"
        );
        self.metrics.record_epoch_transition(epoch, paired);
        self.metrics.record_valid_providers(paired, 0);

        Ok(())
    }

    /// Draws one valid address uniformly at random, skipping `excluded`.
    ///
    /// Callers must hold the pairing read lock so the address book cannot be swapped
    /// for another epoch mid-selection.
    fn get_valid_provider_address(
        &self,
        excluded: &HashSet<Arc<str>>,
    ) -> Result<Arc<str>, SessionError> {
        let book = self.addresses.read();
        if book.valid.is_empty() {
            return Err(SessionError::EmptyPairingList { epoch: book.epoch });
        }

        let candidates: Vec<&Arc<str>> =
            book.valid.iter().filter(|address| !excluded.contains(*address)).collect();
        if candidates.is_empty() {
            return Err(SessionError::NoAvailableSession {
                epoch: book.epoch,
                providers: book.valid.len(),
            });
        }

        let index = rand::rng().random_range(0..candidates.len());
        Ok(Arc::clone(candidates[index]))
    }

    /// Locks a free session on a randomly chosen valid provider.
    ///
    /// `compute_units` is debited optimistically on the session and reserved against
    /// the provider's epoch budget. The returned lease must be passed to
    /// [`done_with_session`](Self::done_with_session) or
    /// [`session_failure`](Self::session_failure).
    ///
    /// # Errors
    ///
    /// - [`SessionError::EmptyPairingList`] if the epoch has no valid providers.
    /// - [`SessionError::NoAvailableSession`] if every provider was tried and none had a
    ///   connected endpoint, budget left and a free session.
    pub fn get_session(&self, compute_units: u64) -> Result<SessionLease, SessionError> {
        self.select_session(None, compute_units)
    }

    /// Like [`get_session`](Self::get_session), but never picks an address in `banned`.
    ///
    /// Bans only apply to the epoch they were recorded in: if `banned_epoch` is not the
    /// epoch of the pairing the selection runs against, the list is ignored.
    ///
    /// # Errors
    ///
    /// Same as [`get_session`](Self::get_session). If every valid provider is banned
    /// the result is [`SessionError::NoAvailableSession`].
    pub fn get_session_from_all_except(
        &self,
        banned: &HashSet<String>,
        compute_units: u64,
        banned_epoch: u64,
    ) -> Result<SessionLease, SessionError> {
        self.select_session(Some((banned, banned_epoch)), compute_units)
    }

    fn select_session(
        &self,
        banned: Option<(&HashSet<String>, u64)>,
        compute_units: u64,
    ) -> Result<SessionLease, SessionError> {
        let pairing = self.pairing.read();
        let generation = &pairing.current;
        let epoch = generation.epoch;

        // Compared under the read lock: a transition cannot slip in between.
        let mut excluded: HashSet<Arc<str>> = match banned {
            Some((banned, banned_epoch)) if banned_epoch == epoch => {
                banned.iter().map(|address| Arc::from(address.as_str())).collect()
            }
            Some((banned, banned_epoch)) => {
                if !banned.is_empty() {
                    debug!(banned_epoch, epoch, "ignoring provider bans from another epoch");
                }
                HashSet::new()
            }
            None => HashSet::new(),
        };
        let max_attempts = self.addresses.read().valid.len();

        let result =
            self.select_from_generation(generation, &mut excluded, compute_units, max_attempts);
        drop(pairing);

        if let Err(e) = &result {
            debug!(epoch, error = %e, compute_units, "no session acquired");
            self.metrics.record_acquisition_error(e);
        }
        result
    }

    fn select_from_generation(
        &self,
        generation: &PairingGeneration,
        excluded: &mut HashSet<Arc<str>>,
        compute_units: u64,
        max_attempts: usize,
    ) -> Result<SessionLease, SessionError> {
        let epoch = generation.epoch;

        for attempt in 0..max_attempts.max(1) {
            let address = match self.get_valid_provider_address(excluded) {
                Ok(address) => address,
                Err(e) if attempt == 0 => return Err(e),
                Err(_) => break,
            };
            excluded.insert(Arc::clone(&address));

            let Some(provider) = generation.providers.get(&address) else {
                debug!(epoch, provider = %address, "valid address missing from pairing");
                continue;
            };

            if provider.fetch_endpoint().is_none() {
                debug!(epoch, provider = %address, "no connected endpoint, trying next provider");
                continue;
            }

            if !provider.try_reserve_compute_units(compute_units) {
                debug!(
                    epoch,
                    provider = %address,
                    compute_units,
                    used = provider.used_compute_units(),
                    max = ?provider.max_compute_units(),
                    "provider compute unit budget exhausted, trying another provider"
                );
                continue;
            }

            let locked = provider
                .connected_endpoints()
                .find_map(|endpoint| provider.try_lock_session(endpoint));

            let Some((session, token)) = locked else {
                provider.release_compute_units(compute_units);
                debug!(epoch, provider = %address, "all sessions busy or blocklisted");
                continue;
            };

            session.begin_relay(compute_units);
            debug!(
                epoch,
                provider = %address,
                session = %session.id(),
                endpoint = %session.endpoint().network_address(),
                compute_units,
                attempts = attempt + 1,
                "session acquired"
            );
            self.metrics.record_session_acquired(&address, compute_units, attempt + 1);

            let provider = Arc::clone(provider);
            return Ok(SessionLease::new(session, provider, epoch, token, compute_units));
        }

        Err(SessionError::NoAvailableSession { epoch, providers: max_attempts })
    }

    /// Retires the leased session after a failed relay.
    ///
    /// The optimistic debit is discarded, the session is blocklisted for good and its
    /// lock released. Depending on [`RelayError::failure_action`] (and the provider's
    /// failure streak) the provider is then blocked for the rest of the lease's epoch.
    ///
    /// Of several calls racing on one lease (or against
    /// [`done_with_session`](Self::done_with_session)) exactly one succeeds.
    ///
    /// # Errors
    ///
    /// - [`SessionError::AlreadyBlocklisted`] if the session was already retired.
    /// - [`SessionError::SessionNotLocked`] if the lease no longer holds the session.
    pub fn session_failure(
        &self,
        lease: &SessionLease,
        error: &RelayError,
    ) -> Result<(), SessionError> {
        let session = lease.session();
        let already_blocklisted = || SessionError::AlreadyBlocklisted {
            session_id: session.id(),
            provider: session.provider_address().to_string(),
        };
        if session.is_blocklisted() {
            return Err(already_blocklisted());
        }

        match session.claim(lease.token(), Finalize::Fail) {
            Ok(()) => {}
            // Another report on this lease won the claim. The blocklist flag is set
            // before the claim is released, so it is visible once the marker is gone.
            Err(Some(Finalize::Fail)) => return Err(already_blocklisted()),
            Err(_) if session.is_blocklisted() => return Err(already_blocklisted()),
            Err(_) => {
                return Err(SessionError::SessionNotLocked {
                    session_id: session.id(),
                    provider: session.provider_address().to_string(),
                });
            }
        }

        let provider = lease.provider();
        let discarded = session.rollback_relay();
        provider.release_compute_units(discarded);
        session.blocklist();
        session.release_claim();

        let action = error.failure_action();
        warn!(
            provider = %lease.provider_address(),
            session = %session.id(),
            epoch = lease.epoch(),
            error = %error,
            action = action.as_str(),
            "relay failed, session blocklisted"
        );
        self.metrics.record_session_failure(lease.provider_address(), error, action);

        let mut block = action.blocks_provider();
        if !block && error.counts_against_provider() {
            let streak = provider.record_session_failure();
            if let Some(threshold) = self.config.provider_failure_threshold {
                if streak >= threshold {
                    info!(
                        provider = %lease.provider_address(),
                        streak,
                        threshold,
                        "provider failure streak reached threshold"
                    );
                    block = true;
                }
            }
        }

        if block {
            self.provider_block(lease.provider_address(), action.reports_provider(), lease.epoch());
        }

        Ok(())
    }

    /// Removes `address` from selection for the rest of `epoch`.
    ///
    /// With `report` set the provider is also listed by
    /// [`get_reported_providers`](Self::get_reported_providers). Returns `true` if the
    /// block took effect; stale epochs, unknown and already-blocked addresses are
    /// ignored.
    pub fn provider_block(&self, address: &str, report: bool, epoch: u64) -> bool {
        let mut book = self.addresses.write();
        if book.epoch != epoch {
            debug!(
                provider = address,
                epoch,
                current = book.epoch,
                "ignoring block for past epoch"
            );
            return false;
        }

        let Some(position) = book.valid.iter().position(|valid| valid.as_ref() == address) else {
            debug!(provider = address, epoch, "provider already blocked or not paired");
            return false;
        };

        let blocked = book.valid.remove(position);
        if report && !book.reported.contains(&blocked) {
            book.reported.push(Arc::clone(&blocked));
        }
        book.blocked.push(blocked);

        info!(
            provider = address,
            epoch,
            reported = report,
            valid_remaining = book.valid.len(),
            "provider blocked for the rest of the epoch"
        );
        self.metrics.record_provider_blocked(address, report);
        self.metrics.record_valid_providers(book.valid.len(), book.blocked.len());

        true
    }

    /// Commits the leased relay and returns the session to the pool.
    ///
    /// Leases from a retired epoch are still committed against their provider, which
    /// lives on in the purge generation.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SessionNotLocked`] if the lease no longer holds the
    /// session, including when a racing call on the same lease finalised it first.
    pub fn done_with_session(
        &self,
        lease: &SessionLease,
        qos: QosSample,
        latest_serviced_block: u64,
    ) -> Result<(), SessionError> {
        let session = lease.session();
        if session.claim(lease.token(), Finalize::Complete).is_err() {
            return Err(SessionError::SessionNotLocked {
                session_id: session.id(),
                provider: session.provider_address().to_string(),
            });
        }

        let committed = session.commit_relay(qos, latest_serviced_block);
        lease.provider().reset_failure_streak();
        session.release_claim();

        let current = self.current_epoch();
        if lease.epoch() != current {
            debug!(
                provider = %lease.provider_address(),
                session = %session.id(),
                lease_epoch = lease.epoch(),
                current,
                "completed session from a retired epoch"
            );
        }

        #[allow(clippy::cast_possible_truncation)]
        let latency_ms = qos.latency.as_millis() as u64;
        self.metrics.record_session_done(lease.provider_address(), committed, latency_ms);

        Ok(())
    }

    /// Providers flagged for unavailability reporting during `epoch`.
    ///
    /// Empty for any epoch other than the current one.
    #[must_use]
    pub fn get_reported_providers(&self, epoch: u64) -> Vec<String> {
        let book = self.addresses.read();
        if book.epoch != epoch {
            return Vec::new();
        }
        book.reported.iter().map(ToString::to_string).collect()
    }

    /// Addresses currently eligible for selection, in pairing order.
    #[must_use]
    pub fn valid_addresses(&self) -> Vec<String> {
        self.addresses.read().valid.iter().map(ToString::to_string).collect()
    }

    #[must_use]
    pub fn blocked_addresses(&self) -> Vec<String> {
        self.addresses.read().blocked.iter().map(ToString::to_string).collect()
    }

    /// Every address paired for the current epoch, in pairing order.
    #[must_use]
    pub fn pairing_addresses(&self) -> Vec<String> {
        self.addresses.read().pairing_addresses.iter().map(ToString::to_string).collect()
    }

    /// Looks a provider up in the current generation, then in the purge generation.
    #[must_use]
    pub fn provider(&self, address: &str) -> Option<Arc<ProviderSessions>> {
        let pairing = self.pairing.read();
        pairing
            .current
            .providers
            .get(address)
            .or_else(|| pairing.purge.as_ref().and_then(|purge| purge.providers.get(address)))
            .cloned()
    }

    /// Endpoints of the current generation with their provider address.
    ///
    /// Only `Arc`s are cloned under the read lock, so callers can probe the endpoints
    /// without blocking selection or transitions.
    #[must_use]
    pub fn current_endpoints(&self) -> Vec<(Arc<str>, Arc<Endpoint>)> {
        let pairing = self.pairing.read();
        pairing
            .current
            .providers
            .values()
            .flat_map(|provider| {
                provider
                    .endpoints()
                    .iter()
                    .map(|endpoint| (Arc::clone(provider.address_arc()), Arc::clone(endpoint)))
            })
            .collect()
    }

    #[must_use]
    pub fn stats(&self) -> ManagerStats {
        let pairing = self.pairing.read();
        let book = self.addresses.read();

        let mut stats = ManagerStats {
            epoch: pairing.current.epoch,
            paired_providers: book.pairing_addresses.len(),
            valid_providers: book.valid.len(),
            blocked_providers: book.blocked.len(),
            reported_providers: book.reported.len(),
            purge_providers: pairing.purge.as_ref().map_or(0, |purge| purge.providers.len()),
            ..ManagerStats::default()
        };

        for provider in pairing.current.providers.values() {
            stats.total_sessions += provider.sessions().len();
            stats.locked_sessions += provider.sessions().iter().filter(|s| s.is_locked()).count();
            stats.blocklisted_sessions += provider.blocklisted_sessions();
            stats.available_sessions += provider.available_sessions();
            stats.committed_compute_units += provider.committed_compute_units();
        }

        stats
    }
}

impl std::fmt::Debug for ConsumerSessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerSessionManager")
            .field("config", &self.config)
            .field("current_epoch", &self.current_epoch())
            .finish_non_exhaustive()
    }
}
