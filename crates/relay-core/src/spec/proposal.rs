use parking_lot::Mutex;
use std::{collections::HashSet, sync::Arc};
use tracing::{info, warn};

use super::{store::SpecKeeper, ServiceSpec, SpecError};

/// Lowest price an API may carry.
pub const MIN_CU: u64 = 1;

/// Governance content carrying specs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecProposal {
    /// Introduces specs whose index is not yet known.
    Add(Vec<ServiceSpec>),
    /// Replaces existing specs.
    Modify(Vec<ServiceSpec>),
}

impl SpecProposal {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add(_) => "spec_add",
            Self::Modify(_) => "spec_modify",
        }
    }

    #[must_use]
    pub fn specs(&self) -> &[ServiceSpec] {
        match self {
            Self::Add(specs) | Self::Modify(specs) => specs,
        }
    }
}

/// Validates spec proposals and applies them to a [`SpecKeeper`].
///
/// A proposal is all-or-nothing: every spec is validated before any is stored.
///
/// Validation and apply run under one handler-wide lock, so proposals sharing a
/// handler are applied one at a time. Keepers shared between several handlers must
/// have a single writer.
pub struct SpecProposalHandler {
    keeper: Arc<dyn SpecKeeper>,
    apply_lock: Mutex<()>,
}

impl SpecProposalHandler {
    #[must_use]
    pub fn new(keeper: Arc<dyn SpecKeeper>) -> Self {
        Self { keeper, apply_lock: Mutex::new(()) }
    }

    /// Applies `proposal`.
    ///
    /// # Errors
    ///
    /// - [`SpecError::DuplicateSpec`] if an added spec already exists (or appears twice).
    /// - [`SpecError::SpecNotFound`] if a modified spec does not exist.
    /// - [`SpecError::ComputeUnitsOutOfRange`] if any API is priced outside
    ///   `[MIN_CU, max_cu]`.
    pub fn handle(&self, proposal: &SpecProposal) -> Result<(), SpecError> {
        let _guard = self.apply_lock.lock();
        if let Err(e) = self.validate(proposal) {
            warn!(kind = proposal.as_str(), error = %e, "spec proposal rejected");
            return Err(e);
        }

        for spec in proposal.specs() {
            self.keeper.set_spec(spec.clone());
            info!(
                kind = proposal.as_str(),
                spec = %spec.name,
                chain_id = %spec.index,
                enabled = spec.enabled,
                apis = spec.apis.len(),
                "spec proposal accepted"
            );
        }

        Ok(())
    }

    fn validate(&self, proposal: &SpecProposal) -> Result<(), SpecError> {
        let max_cu = self.keeper.max_cu();
        let mut seen = HashSet::new();

        for spec in proposal.specs() {
            let exists = self.keeper.get_spec(&spec.index).is_some();
            match proposal {
                SpecProposal::Add(_) if exists || !seen.insert(spec.index.as_str()) => {
                    return Err(SpecError::DuplicateSpec { index: spec.index.clone() });
                }
                SpecProposal::Modify(_) if !exists => {
                    return Err(SpecError::SpecNotFound { index: spec.index.clone() });
                }
                _ => {}
            }

            if let Some(api) =
                spec.apis.iter().find(|api| !(MIN_CU..=max_cu).contains(&api.compute_units))
            {
                return Err(SpecError::ComputeUnitsOutOfRange {
                    index: spec.index.clone(),
                    api: api.name.clone(),
                    compute_units: api.compute_units,
                    min: MIN_CU,
                    max: max_cu,
                });
            }
        }

        Ok(())
    }
}
