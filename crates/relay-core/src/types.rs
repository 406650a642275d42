//! Descriptors delivered by the epoch/pairing feed.
//!
//! The feed (an external epoch sentry) decides which providers a consumer is paired
//! with for an epoch. It hands the session manager plain descriptors; the manager
//! builds its own endpoint and session state from them.

use serde::{Deserialize, Serialize};

/// One provider of the pairing list.
///
/// # Example
///
/// ```
/// use relay_core::types::ProviderPairing;
///
/// let provider = ProviderPairing::new("lava@provider1", vec!["grpc://10.0.0.1:2220".into()])
///     .with_max_compute_units(10_000);
/// assert_eq!(provider.max_compute_units, Some(10_000));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderPairing {
    /// Account address of the provider; the key of the pairing table.
    pub address: String,

    /// Network addresses of the provider's endpoints, in preference order.
    pub endpoints: Vec<String>,

    /// Compute units the consumer may spend with this provider during the epoch.
    /// `None` means unbounded.
    #[serde(default)]
    pub max_compute_units: Option<u64>,
}

impl ProviderPairing {
    #[must_use]
    pub fn new(address: impl Into<String>, endpoints: Vec<String>) -> Self {
        Self { address: address.into(), endpoints, max_compute_units: None }
    }

    #[must_use]
    pub fn with_max_compute_units(mut self, max_compute_units: u64) -> Self {
        self.max_compute_units = Some(max_compute_units);
        self
    }
}

/// A full pairing delivery: the epoch and the providers valid during it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochPairing {
    pub epoch: u64,
    #[serde(default)]
    pub providers: Vec<ProviderPairing>,
}
