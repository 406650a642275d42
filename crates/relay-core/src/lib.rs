//! # Relay Core
//!
//! Client-side session management for a consumer relaying work to a rotating set of
//! paired providers.
//!
//! - **[`session`]**: the epoch-scoped pairing registry, the session selector with
//!   provider failover, and the failure and completion paths that finalise a relay.
//!   Also hosts the out-of-band endpoint health monitor.
//!
//! - **[`spec`]**: service specifications admitted through governance proposals, used
//!   to price relays in compute units.
//!
//! - **[`config`]**: layered configuration (defaults, TOML file, `RELAY__*` environment).
//!
//! - **[`metrics`]**: counters and gauges for session activity, rendered for Prometheus.
//!
//! - **[`types`]**: pairing descriptors delivered by the epoch feed.
//!
//! ## Relay Flow
//!
//! ```text
//! Epoch feed ──► update_all_providers(epoch, pairing)
//!                        │
//!                        ▼
//!                ┌────────────────┐       ┌────────────────────┐
//!  Caller ─────► │  get_session   │ ────► │ random valid       │
//!                │ (pairing read) │       │ provider → endpoint│
//!                └───────┬────────┘       │ → try-lock session │
//!                        │ SessionLease   └────────────────────┘
//!                        ▼
//!                 transport relay
//!                        │
//!          ┌─────────────┴─────────────┐
//!          ▼                           ▼
//!  done_with_session            session_failure
//!  (commit CU, QoS,             (discard CU, blocklist
//!   unlock)                      session, maybe block
//!                                and report provider)
//! ```

pub mod config;
pub mod metrics;
pub mod session;
pub mod spec;
pub mod types;
