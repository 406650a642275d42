use thiserror::Error;

use super::consumer_session::SessionId;

/// Errors surfaced to callers of the session manager.
///
/// Every variant is scoped to a single relay attempt; none of them is fatal to the
/// process. Each carries enough context (epoch, provider count, session id) to be
/// logged or turned into a metric label without further lookups.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionError {
    /// A pairing update arrived for an epoch that is not newer than the current one.
    ///
    /// No registry state was changed; the caller should drop the update.
    #[error("Stale epoch update: requested {requested}, current {current}")]
    StaleEpoch { requested: u64, current: u64 },

    /// The current pairing has no valid providers at all.
    #[error("Pairing list is empty for epoch {epoch}")]
    EmptyPairingList { epoch: u64 },

    /// Providers exist, but every candidate was disconnected, over budget, busy or
    /// blocklisted.
    #[error("No available session in epoch {epoch} across {providers} providers")]
    NoAvailableSession { epoch: u64, providers: usize },

    /// The session already failed once and was retired.
    #[error("Session {session_id} of provider {provider} is already blocklisted")]
    AlreadyBlocklisted { session_id: SessionId, provider: String },

    /// The lease used for a completion or failure call does not hold the session lock.
    #[error("Session {session_id} of provider {provider} is not locked by this lease")]
    SessionNotLocked { session_id: SessionId, provider: String },
}

impl SessionError {
    /// Returns `true` if retrying later (or on another provider) may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::EmptyPairingList { .. } | Self::NoAvailableSession { .. })
    }

    /// Returns `true` if this error means the caller broke the lease contract.
    #[must_use]
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Self::SessionNotLocked { .. })
    }

    /// Returns a static string representation for metrics labels.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StaleEpoch { .. } => "stale_epoch",
            Self::EmptyPairingList { .. } => "empty_pairing_list",
            Self::NoAvailableSession { .. } => "no_available_session",
            Self::AlreadyBlocklisted { .. } => "already_blocklisted",
            Self::SessionNotLocked { .. } => "session_not_locked",
        }
    }
}

/// What the failure path should do to the provider after retiring a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureAction {
    /// Retire the session only; the provider stays selectable.
    SessionOnly,
    /// Remove the provider from selection for the rest of the epoch.
    BlockProvider,
    /// Block the provider and flag it for QoS unavailability reporting.
    BlockAndReport,
}

impl FailureAction {
    #[must_use]
    pub fn blocks_provider(&self) -> bool {
        !matches!(self, Self::SessionOnly)
    }

    #[must_use]
    pub fn reports_provider(&self) -> bool {
        matches!(self, Self::BlockAndReport)
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionOnly => "session_only",
            Self::BlockProvider => "block_provider",
            Self::BlockAndReport => "block_and_report",
        }
    }
}

/// JSON-RPC code for a response the provider sent that could not be parsed.
const RPC_PARSE_ERROR: i32 = -32700;

/// Failure observed by the transport while relaying through a session.
///
/// The transport itself lives outside this crate; it hands one of these to
/// [`ConsumerSessionManager::session_failure`](super::ConsumerSessionManager::session_failure),
/// which uses [`RelayError::failure_action`] to decide how far the failure propagates.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RelayError {
    /// The provider did not answer within the relay deadline.
    #[error("Relay timeout")]
    Timeout,

    /// The provider throttled the request.
    #[error("Rate limited by provider")]
    RateLimited,

    /// The caller abandoned the relay.
    #[error("Relay cancelled")]
    Cancelled,

    /// The endpoint could not be reached at all.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The provider answered with something that is not a valid response.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The provider broke the relay protocol (bad signature envelope, wrong chain, ...).
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// JSON-RPC error returned by the provider.
    #[error("RPC error {0}: {1}")]
    Rpc(i32, String),
}

impl RelayError {
    /// Classifies this failure.
    ///
    /// Transient conditions retire only the session. Unreachable endpoints and
    /// protocol violations are reported for unavailability; malformed responses
    /// block the provider without a report.
    #[must_use]
    pub fn failure_action(&self) -> FailureAction {
        match self {
            Self::Timeout | Self::RateLimited | Self::Cancelled => FailureAction::SessionOnly,
            Self::ConnectionFailed(_) | Self::ProtocolViolation(_) => FailureAction::BlockAndReport,
            Self::InvalidResponse(_) => FailureAction::BlockProvider,
            Self::Rpc(code, _) if *code == RPC_PARSE_ERROR => FailureAction::BlockProvider,
            Self::Rpc(_, _) => FailureAction::SessionOnly,
        }
    }

    /// Returns `true` if the failure counts toward the provider's failure streak.
    ///
    /// Cancellations are the caller's doing and never count.
    #[must_use]
    pub fn counts_against_provider(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::Cancelled => "cancelled",
            Self::ConnectionFailed(_) => "connection_failed",
            Self::InvalidResponse(_) => "invalid_response",
            Self::ProtocolViolation(_) => "protocol_violation",
            Self::Rpc(_, _) => "rpc_error",
        }
    }
}
