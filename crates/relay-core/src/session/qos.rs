//! Rolling quality-of-service accounting for sessions.
//!
//! Every successful relay contributes one [`QosSample`]; the session folds it into its
//! [`QosInfo`]. Provider-level figures are produced by merging the infos of all of a
//! provider's sessions, which the reporting path reads when deciding what to send
//! upstream for QoS penalties.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Measurement taken by the transport for one successful relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QosSample {
    /// Time from sending the relay to receiving the full response.
    pub latency: Duration,
    /// How many blocks the provider's answer trailed the consumer's view of the tip.
    pub blocks_behind: u64,
}

impl QosSample {
    #[must_use]
    pub fn new(latency: Duration, blocks_behind: u64) -> Self {
        Self { latency, blocks_behind }
    }
}

/// Accumulated QoS figures.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QosInfo {
    /// Number of samples folded in.
    pub relays: u64,
    pub latency_sum_ms: u64,
    pub max_latency_ms: u64,
    pub blocks_behind_sum: u64,
    /// Most recent sample, if any.
    pub last_sample: Option<QosSample>,
}

impl QosInfo {
    /// Folds one relay measurement in.
    pub fn record(&mut self, sample: QosSample) {
        #[allow(clippy::cast_possible_truncation)]
        let latency_ms = sample.latency.as_millis() as u64;

        self.relays = self.relays.saturating_add(1);
        self.latency_sum_ms = self.latency_sum_ms.saturating_add(latency_ms);
        self.max_latency_ms = self.max_latency_ms.max(latency_ms);
        self.blocks_behind_sum = self.blocks_behind_sum.saturating_add(sample.blocks_behind);
        self.last_sample = Some(sample);
    }

    /// Combines another info into this one (used for provider-level summaries).
    pub fn merge(&mut self, other: &QosInfo) {
        self.relays = self.relays.saturating_add(other.relays);
        self.latency_sum_ms = self.latency_sum_ms.saturating_add(other.latency_sum_ms);
        self.max_latency_ms = self.max_latency_ms.max(other.max_latency_ms);
        self.blocks_behind_sum = self.blocks_behind_sum.saturating_add(other.blocks_behind_sum);
        if other.last_sample.is_some() {
            self.last_sample = other.last_sample;
        }
    }

    /// Average relay latency in milliseconds, `None` before the first sample.
    #[must_use]
    pub fn average_latency_ms(&self) -> Option<u64> {
        (self.relays > 0).then(|| self.latency_sum_ms / self.relays)
    }

    /// Average sync lag in blocks, `None` before the first sample.
    #[must_use]
    pub fn average_blocks_behind(&self) -> Option<u64> {
        (self.relays > 0).then(|| self.blocks_behind_sum / self.relays)
    }
}
