//! Test Fixtures
//!
//! Builders for pairing lists and managers. Provider `i` is addressed `provider-{i}` and
//! its endpoints `grpc://provider-{i}:{port}` with ports starting at `2220`.

use relay_core::{
    config::SessionManagerConfig, session::ConsumerSessionManager, types::ProviderPairing,
};
use std::sync::Arc;

/// Address of the `index`-th test provider.
#[must_use]
pub fn provider_address(index: usize) -> String {
    format!("provider-{index}")
}

/// Network address of the `endpoint`-th endpoint of the `index`-th test provider.
#[must_use]
pub fn endpoint_address(index: usize, endpoint: usize) -> String {
    format!("grpc://provider-{index}:{}", 2220 + endpoint)
}

#[must_use]
pub fn provider_pairing(index: usize, endpoints: usize) -> ProviderPairing {
    ProviderPairing::new(
        provider_address(index),
        (0..endpoints).map(|endpoint| endpoint_address(index, endpoint)).collect(),
    )
}

/// `providers` providers with `endpoints` endpoints each, in index order.
#[must_use]
pub fn pairing_list(providers: usize, endpoints: usize) -> Vec<ProviderPairing> {
    (0..providers).map(|index| provider_pairing(index, endpoints)).collect()
}

/// Config with the given pool size and the streak check disabled, so only the error
/// classification decides when a provider is blocked.
#[must_use]
pub fn config(sessions_per_endpoint: usize) -> SessionManagerConfig {
    SessionManagerConfig { sessions_per_endpoint, provider_failure_threshold: None }
}

/// A manager already paired for `epoch` with `providers` single-endpoint providers.
///
/// # Panics
///
/// Panics if `epoch` is `0`.
#[must_use]
pub fn paired_manager(
    epoch: u64,
    providers: usize,
    sessions_per_endpoint: usize,
) -> Arc<ConsumerSessionManager> {
    let manager = Arc::new(ConsumerSessionManager::new(config(sessions_per_endpoint)));
    manager
        .update_all_providers(epoch, pairing_list(providers, 1))
        .expect("fresh manager accepts any epoch above zero");
    manager
}
