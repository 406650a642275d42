use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use super::{
    endpoint::Endpoint,
    provider::ProviderSessions,
    qos::{QosInfo, QosSample},
};

/// Identifier of a session, unique within its provider entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Source of lease tokens. `0` is reserved for "unlocked", the top two values for the
/// finalisation markers below.
static NEXT_LEASE_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Owner word while a lease is being completed.
const COMPLETING: u64 = u64::MAX;
/// Owner word while a lease is being failed.
const FAILING: u64 = u64::MAX - 1;

/// How a lease is being finalised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Finalize {
    Complete,
    Fail,
}

impl Finalize {
    fn marker(self) -> u64 {
        match self {
            Self::Complete => COMPLETING,
            Self::Fail => FAILING,
        }
    }

    fn from_marker(owner: u64) -> Option<Self> {
        match owner {
            COMPLETING => Some(Self::Complete),
            FAILING => Some(Self::Fail),
            _ => None,
        }
    }
}

/// Accounting state of a session, mutated only by the current lease holder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionAccounting {
    /// Compute units billed over the session's lifetime.
    pub cu_sum: u64,
    /// Optimistic debit of the relay in flight; committed on success, discarded on failure.
    pub latest_relay_cu: u64,
    /// Number of successfully completed relays.
    pub relay_num: u64,
    pub qos: QosInfo,
    /// Highest block the provider has reported serving through this session.
    pub latest_block: u64,
}

/// A lockable accounting handle bound to one endpoint of one provider.
///
/// # Locking
///
/// The lock is a single atomic owner word: `0` when free, otherwise the token of the
/// [`SessionLease`] holding it. Acquisition is a non-blocking compare-and-swap, so a
/// busy session is skipped rather than waited on. Because the word stores the holder's
/// token, completion and failure calls can verify that the caller really holds the
/// session, and a stale lease can never release a lock that has since been taken by
/// someone else.
///
/// Finalising a lease first swaps the owner word from the lease token to a marker, so
/// of several callers racing on one lease exactly one gets to finalise it.
///
/// `blocklisted` is terminal and is read without the lock by the selector.
pub struct ConsumerSession {
    id: SessionId,
    provider: Arc<str>,
    endpoint: Arc<Endpoint>,
    owner: AtomicU64,
    blocklisted: AtomicBool,
    accounting: Mutex<SessionAccounting>,
}

impl ConsumerSession {
    pub(crate) fn new(id: SessionId, provider: Arc<str>, endpoint: Arc<Endpoint>) -> Self {
        Self {
            id,
            provider,
            endpoint,
            owner: AtomicU64::new(0),
            blocklisted: AtomicBool::new(false),
            accounting: Mutex::new(SessionAccounting::default()),
        }
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub fn provider_address(&self) -> &str {
        &self.provider
    }

    #[must_use]
    pub fn endpoint(&self) -> &Arc<Endpoint> {
        &self.endpoint
    }

    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.owner.load(Ordering::Acquire) != 0
    }

    #[inline]
    #[must_use]
    pub fn is_blocklisted(&self) -> bool {
        self.blocklisted.load(Ordering::Acquire)
    }

    /// Returns a copy of the accounting state.
    #[must_use]
    pub fn accounting(&self) -> SessionAccounting {
        self.accounting.lock().clone()
    }

    /// Attempts to take the lock without waiting. Returns the lease token on success.
    pub(crate) fn try_lock(&self) -> Option<u64> {
        if self.is_blocklisted() {
            return None;
        }

        let token = NEXT_LEASE_TOKEN.fetch_add(1, Ordering::Relaxed);
        if self.owner.compare_exchange(0, token, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return None;
        }

        // A previous holder may have blocklisted the session just before releasing it.
        if self.is_blocklisted() {
            self.unlock(token);
            return None;
        }

        Some(token)
    }

    #[inline]
    pub(crate) fn is_held_by(&self, token: u64) -> bool {
        token != 0 && self.owner.load(Ordering::Acquire) == token
    }

    /// Releases the lock if `token` still holds it.
    pub(crate) fn unlock(&self, token: u64) -> bool {
        self.owner.compare_exchange(token, 0, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    /// Moves the lock from `token` to the finalisation marker of `finalize`.
    ///
    /// On failure returns the finalisation already in progress on this session, if any.
    pub(crate) fn claim(&self, token: u64, finalize: Finalize) -> Result<(), Option<Finalize>> {
        if token == 0 {
            return Err(None);
        }
        self.owner
            .compare_exchange(token, finalize.marker(), Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(Finalize::from_marker)
    }

    /// Frees a lock previously taken over by [`claim`](Self::claim).
    pub(crate) fn release_claim(&self) {
        self.owner.store(0, Ordering::Release);
    }

    pub(crate) fn begin_relay(&self, compute_units: u64) {
        self.accounting.lock().latest_relay_cu = compute_units;
    }

    /// Commits the pending debit and folds the relay outcome in. Returns the committed CU.
    pub(crate) fn commit_relay(&self, sample: QosSample, latest_serviced_block: u64) -> u64 {
        let mut accounting = self.accounting.lock();
        let committed = std::mem::take(&mut accounting.latest_relay_cu);
        accounting.cu_sum = accounting.cu_sum.saturating_add(committed);
        accounting.qos.record(sample);
        accounting.relay_num += 1;
        accounting.latest_block = accounting.latest_block.max(latest_serviced_block);
        committed
    }

    /// Drops the pending debit without charging it. Returns the discarded CU.
    pub(crate) fn rollback_relay(&self) -> u64 {
        std::mem::take(&mut self.accounting.lock().latest_relay_cu)
    }

    /// Marks the session as retired. Returns `false` if it already was.
    pub(crate) fn blocklist(&self) -> bool {
        !self.blocklisted.swap(true, Ordering::AcqRel)
    }
}

impl fmt::Debug for ConsumerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerSession")
            .field("id", &self.id)
            .field("provider", &self.provider)
            .field("endpoint", &self.endpoint.network_address())
            .field("locked", &self.is_locked())
            .field("blocklisted", &self.is_blocklisted())
            .finish_non_exhaustive()
    }
}

/// Exclusive hold on a session, handed out by the selector.
///
/// The lease remembers the epoch the session was obtained under and the token that
/// owns the session lock. It must be finalised through
/// [`done_with_session`](super::ConsumerSessionManager::done_with_session) or
/// [`session_failure`](super::ConsumerSessionManager::session_failure). If it is dropped
/// while still holding the lock (e.g. the caller's relay future was cancelled), the
/// optimistic debit is rolled back and the lock released so the session returns to
/// the pool.
pub struct SessionLease {
    session: Arc<ConsumerSession>,
    provider: Arc<ProviderSessions>,
    epoch: u64,
    token: u64,
    compute_units: u64,
}

impl SessionLease {
    pub(crate) fn new(
        session: Arc<ConsumerSession>,
        provider: Arc<ProviderSessions>,
        epoch: u64,
        token: u64,
        compute_units: u64,
    ) -> Self {
        Self { session, provider, epoch, token, compute_units }
    }

    #[must_use]
    pub fn session(&self) -> &Arc<ConsumerSession> {
        &self.session
    }

    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session.id()
    }

    #[must_use]
    pub fn provider_address(&self) -> &str {
        self.session.provider_address()
    }

    #[must_use]
    pub fn endpoint(&self) -> &Arc<Endpoint> {
        self.session.endpoint()
    }

    /// Epoch the session was handed out under.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Compute units debited optimistically for this relay.
    #[must_use]
    pub fn compute_units(&self) -> u64 {
        self.compute_units
    }

    /// Returns `true` while this lease still owns the session lock.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.session.is_held_by(self.token)
    }

    pub(crate) fn provider(&self) -> &Arc<ProviderSessions> {
        &self.provider
    }

    pub(crate) fn token(&self) -> u64 {
        self.token
    }
}

impl fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionLease")
            .field("session", &self.session.id())
            .field("provider", &self.session.provider_address())
            .field("epoch", &self.epoch)
            .field("compute_units", &self.compute_units)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if !self.session.is_held_by(self.token) {
            return;
        }

        let discarded = self.session.rollback_relay();
        self.provider.release_compute_units(discarded);
        self.session.unlock(self.token);

        tracing::warn!(
            provider = %self.session.provider_address(),
            session = %self.session.id(),
            epoch = self.epoch,
            discarded_cu = discarded,
            "session lease dropped without completion, lock released"
        );
    }
}
