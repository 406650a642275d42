//! Session manager metrics.
//!
//! All recording goes through the `metrics` facade, so it costs a few atomic
//! operations when a recorder is installed and nothing otherwise. The Prometheus
//! recorder is installed lazily and at most once per process; binaries render it
//! with [`SessionMetrics::render`].
//!
//! Provider addresses are used as label values. Pairings are small (tens of
//! providers per epoch), so label cardinality stays bounded.

use crate::session::{FailureAction, RelayError, SessionError};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn init_prometheus_recorder() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "failed to install Prometheus recorder, metrics will not be globally visible"
                );
                PrometheusBuilder::new().build_recorder().handle()
            }
        })
        .clone()
}

/// Records session manager activity.
///
/// A disabled instance turns every call into a no-op, which keeps tests and
/// embedding applications free of global recorder side effects.
#[derive(Clone, Default)]
pub struct SessionMetrics {
    prometheus_handle: Option<PrometheusHandle>,
}

impl SessionMetrics {
    /// Creates an enabled collector, installing the Prometheus recorder if needed.
    #[must_use]
    pub fn new() -> Self {
        Self { prometheus_handle: Some(init_prometheus_recorder()) }
    }

    /// Creates a collector that records nothing.
    #[must_use]
    pub fn disabled() -> Self {
        Self { prometheus_handle: None }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.prometheus_handle.is_some()
    }

    /// Renders all recorded metrics in the Prometheus text format.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.prometheus_handle.as_ref().map(PrometheusHandle::render)
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn record_session_acquired(&self, provider: &str, compute_units: u64, attempts: usize) {
        if !self.is_enabled() {
            return;
        }
        counter!("relay_sessions_acquired_total", "provider" => provider.to_string()).increment(1);
        counter!("relay_compute_units_reserved_total", "provider" => provider.to_string())
            .increment(compute_units);
        histogram!("relay_session_selection_attempts").record(attempts as f64);
    }

    pub fn record_acquisition_error(&self, error: &SessionError) {
        if !self.is_enabled() {
            return;
        }
        counter!("relay_session_acquisition_errors_total", "error_type" => error.as_str())
            .increment(1);
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn record_session_done(&self, provider: &str, compute_units: u64, latency_ms: u64) {
        if !self.is_enabled() {
            return;
        }
        counter!("relay_sessions_done_total", "provider" => provider.to_string()).increment(1);
        counter!("relay_compute_units_committed_total", "provider" => provider.to_string())
            .increment(compute_units);
        histogram!("relay_latency_seconds", "provider" => provider.to_string())
            .record(latency_ms as f64 / 1000.0);
    }

    pub fn record_session_failure(
        &self,
        provider: &str,
        error: &RelayError,
        action: FailureAction,
    ) {
        if !self.is_enabled() {
            return;
        }
        counter!(
            "relay_session_failures_total",
            "provider" => provider.to_string(),
            "error_type" => error.as_str(),
            "action" => action.as_str()
        )
        .increment(1);
    }

    pub fn record_provider_blocked(&self, provider: &str, reported: bool) {
        if !self.is_enabled() {
            return;
        }
        counter!(
            "relay_providers_blocked_total",
            "provider" => provider.to_string(),
            "reported" => if reported { "true" } else { "false" }
        )
        .increment(1);
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn record_epoch_transition(&self, epoch: u64, providers: usize) {
        if !self.is_enabled() {
            return;
        }
        counter!("relay_epoch_transitions_total").increment(1);
        gauge!("relay_current_epoch").set(epoch as f64);
        gauge!("relay_paired_providers").set(providers as f64);
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn record_valid_providers(&self, valid: usize, blocked: usize) {
        if !self.is_enabled() {
            return;
        }
        gauge!("relay_valid_providers").set(valid as f64);
        gauge!("relay_blocked_providers").set(blocked as f64);
    }

    pub fn record_endpoint_liveness(&self, provider: &str, endpoint: &str, connected: bool) {
        if !self.is_enabled() {
            return;
        }
        gauge!(
            "relay_endpoint_connected",
            "provider" => provider.to_string(),
            "endpoint" => endpoint.to_string()
        )
        .set(if connected { 1.0 } else { 0.0 });
    }
}
