//! Consumer-side session management.
//!
//! A consumer relays work to the providers it is paired with for the current epoch.
//! [`ConsumerSessionManager`] owns that pairing and hands out exclusive
//! [`SessionLease`]s: each lease locks one [`ConsumerSession`] on one endpoint of one
//! provider and carries the epoch it was issued under.
//!
//! # Lifecycle of a relay
//!
//! 1. [`ConsumerSessionManager::get_session`] (or
//!    [`get_session_from_all_except`](ConsumerSessionManager::get_session_from_all_except)
//!    when retrying) picks a random valid provider and try-locks a free session on a
//!    connected endpoint, debiting the relay's compute units optimistically.
//! 2. The caller performs the relay through its own transport.
//! 3. The caller finalises the lease with exactly one of
//!    [`done_with_session`](ConsumerSessionManager::done_with_session) (commit) or
//!    [`session_failure`](ConsumerSessionManager::session_failure) (discard and retire the
//!    session). A lease dropped without either is rolled back.
//!
//! # Epochs
//!
//! [`update_all_providers`](ConsumerSessionManager::update_all_providers) replaces the
//! pairing when the epoch advances. The previous pairing is kept for one more epoch so
//! leases issued under it can still be finalised.

mod consumer_session;
mod endpoint;
mod errors;
mod health;
mod manager;
mod provider;
mod qos;

pub use consumer_session::{ConsumerSession, SessionAccounting, SessionId, SessionLease};
pub use endpoint::Endpoint;
pub use errors::{FailureAction, RelayError, SessionError};
pub use health::{EndpointHealthMonitor, EndpointProbe, ProbeRound, TcpConnectProbe};
pub use manager::{ConsumerSessionManager, ManagerStats};
pub use provider::ProviderSessions;
pub use qos::{QosInfo, QosSample};
