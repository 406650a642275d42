//! Service specifications admitted by governance.
//!
//! A [`ServiceSpec`] describes one chain or service a provider can serve and prices each
//! of its APIs in compute units. Specs reach the consumer through governance proposals:
//! [`SpecProposalHandler`] validates a [`SpecProposal`] against a [`SpecKeeper`] and
//! stores the specs it carries. Nothing here is consulted during session selection; a
//! caller uses [`ServiceSpec::compute_units_for`] to price a relay before asking the
//! session manager for a session.

mod proposal;
mod store;

pub use proposal::{SpecProposal, SpecProposalHandler, MIN_CU};
pub use store::{InMemorySpecStore, SpecKeeper};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One priced API of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceApi {
    pub name: String,
    pub compute_units: u64,
}

impl ServiceApi {
    #[must_use]
    pub fn new(name: impl Into<String>, compute_units: u64) -> Self {
        Self { name: name.into(), compute_units }
    }
}

/// Specification of a service, keyed by `index` (the chain id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub index: String,
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub apis: Vec<ServiceApi>,
}

impl ServiceSpec {
    #[must_use]
    pub fn new(index: impl Into<String>, name: impl Into<String>) -> Self {
        Self { index: index.into(), name: name.into(), enabled: true, apis: Vec::new() }
    }

    #[must_use]
    pub fn with_api(mut self, name: impl Into<String>, compute_units: u64) -> Self {
        self.apis.push(ServiceApi::new(name, compute_units));
        self
    }

    /// Price of one call to `api`, `None` if the spec does not define it.
    #[must_use]
    pub fn compute_units_for(&self, api: &str) -> Option<u64> {
        self.apis.iter().find(|candidate| candidate.name == api).map(|found| found.compute_units)
    }
}

/// Reasons a spec proposal is rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SpecError {
    #[error("Spec {index} already exists")]
    DuplicateSpec { index: String },

    #[error("Spec {index} not found")]
    SpecNotFound { index: String },

    #[error("Compute units {compute_units} of api {api} in spec {index} out of range [{min}, {max}]")]
    ComputeUnitsOutOfRange { index: String, api: String, compute_units: u64, min: u64, max: u64 },
}

impl SpecError {
    /// Returns a static string representation for metrics labels and event names.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DuplicateSpec { .. } => "spec_add_dup",
            Self::SpecNotFound { .. } => "spec_modify_missing",
            Self::ComputeUnitsOutOfRange { .. } => "spec_cu_out_of_range",
        }
    }
}
