//! Process-wide registry of ANN backend factories.
//!
//! The registry maps a backend name to a factory that can produce fresh
//! backend instances. It is append-mostly shared state: the built-in
//! factories are installed on first access, applications may register their
//! own, and duplicate names are rejected. Lookup is by exact name; the
//! vector store handles fallback when a requested name is absent.

use crate::anns::backend::AnnBackend;
use crate::anns::brute_force::BruteForceFactory;
use crate::anns::ivf_flat::IvfFlatFactory;
use crate::distance::DistanceMetric;
use crate::error::{EmberDbError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Factory producing instances of a registered backend.
pub trait BackendFactory: Send + Sync {
    /// The registry name this factory serves.
    fn backend_name(&self) -> &'static str;

    /// Human-readable description.
    fn description(&self) -> &'static str;

    /// Metrics instances of this backend can serve.
    fn supported_metrics(&self) -> Vec<DistanceMetric>;

    /// Create a fresh, uninitialized backend instance.
    fn create(&self) -> Box<dyn AnnBackend>;
}

/// Registry of backend factories keyed by name.
pub struct AnnRegistry {
    factories: RwLock<HashMap<String, Box<dyn BackendFactory>>>,
}

impl AnnRegistry {
    fn with_builtins() -> Self {
        let registry = Self {
            factories: RwLock::new(HashMap::new()),
        };
        registry
            .register(Box::new(BruteForceFactory))
            .expect("registering built-in brute_force factory");
        registry
            .register(Box::new(IvfFlatFactory))
            .expect("registering built-in ivf_flat factory");
        registry
    }

    /// Register a factory under its own name.
    ///
    /// Fails with `AlreadyRegistered` when the name is taken.
    pub fn register(&self, factory: Box<dyn BackendFactory>) -> Result<()> {
        let name = factory.backend_name().to_string();
        let mut factories = self.factories.write();
        if factories.contains_key(&name) {
            return Err(EmberDbError::AlreadyRegistered(name));
        }
        factories.insert(name, factory);
        Ok(())
    }

    /// Check whether a backend name is registered.
    pub fn is_registered(&self, name: &str) -> bool {
        self.factories.read().contains_key(name)
    }

    /// Create a fresh instance of the named backend, if registered.
    pub fn create(&self, name: &str) -> Option<Box<dyn AnnBackend>> {
        self.factories.read().get(name).map(|factory| factory.create())
    }

    /// Names of all registered backends, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Names of backends that can serve the given metric, sorted.
    pub fn supporting_metric(&self, metric: DistanceMetric) -> Vec<String> {
        let factories = self.factories.read();
        let mut names: Vec<String> = factories
            .iter()
            .filter(|(_, factory)| factory.supported_metrics().contains(&metric))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

static REGISTRY: LazyLock<AnnRegistry> = LazyLock::new(AnnRegistry::with_builtins);

/// The process-wide backend registry.
pub fn registry() -> &'static AnnRegistry {
    &REGISTRY
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anns::brute_force::BRUTE_FORCE_NAME;
    use crate::anns::ivf_flat::IVF_FLAT_NAME;

    #[test]
    fn test_builtins_registered() {
        let registry = registry();
        assert!(registry.is_registered(BRUTE_FORCE_NAME));
        assert!(registry.is_registered(IVF_FLAT_NAME));
        assert!(registry.list().contains(&BRUTE_FORCE_NAME.to_string()));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let result = registry().register(Box::new(BruteForceFactory));
        assert!(matches!(result, Err(EmberDbError::AlreadyRegistered(name)) if name == BRUTE_FORCE_NAME));
    }

    #[test]
    fn test_create_unknown_backend() {
        assert!(registry().create("nonexistent").is_none());
    }

    #[test]
    fn test_create_returns_fresh_instance() {
        let backend = registry().create(BRUTE_FORCE_NAME).unwrap();
        assert!(backend.is_empty());
        assert_eq!(backend.name(), BRUTE_FORCE_NAME);
    }

    #[test]
    fn test_supporting_metric() {
        let names = registry().supporting_metric(DistanceMetric::Cosine);
        assert!(names.contains(&BRUTE_FORCE_NAME.to_string()));
        assert!(names.contains(&IVF_FLAT_NAME.to_string()));
    }
}
