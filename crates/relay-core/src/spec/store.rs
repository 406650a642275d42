use parking_lot::RwLock;
use std::collections::HashMap;

use super::ServiceSpec;

/// Storage the proposal handler validates against and writes to.
pub trait SpecKeeper: Send + Sync {
    fn get_spec(&self, index: &str) -> Option<ServiceSpec>;

    /// Inserts or replaces the spec stored under `spec.index`.
    fn set_spec(&self, spec: ServiceSpec);

    /// Upper bound on the compute units of any single API.
    fn max_cu(&self) -> u64;
}

/// Process-local [`SpecKeeper`].
#[derive(Debug)]
pub struct InMemorySpecStore {
    specs: RwLock<HashMap<String, ServiceSpec>>,
    max_cu: u64,
}

impl InMemorySpecStore {
    #[must_use]
    pub fn new(max_cu: u64) -> Self {
        Self { specs: RwLock::new(HashMap::new()), max_cu }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.read().is_empty()
    }

    /// Indexes of all stored specs, sorted.
    #[must_use]
    pub fn indexes(&self) -> Vec<String> {
        let mut indexes: Vec<String> = self.specs.read().keys().cloned().collect();
        indexes.sort();
        indexes
    }
}

impl SpecKeeper for InMemorySpecStore {
    fn get_spec(&self, index: &str) -> Option<ServiceSpec> {
        self.specs.read().get(index).cloned()
    }

    fn set_spec(&self, spec: ServiceSpec) {
        self.specs.write().insert(spec.index.clone(), spec);
    }

    fn max_cu(&self) -> u64 {
        self.max_cu
    }
}
