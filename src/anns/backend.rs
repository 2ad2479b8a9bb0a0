//! The ANN backend contract.
//!
//! A backend is any object implementing [`AnnBackend`]: a concrete
//! approximate-nearest-neighbor algorithm that can be trained on `(id,
//! vector)` entries and then answer top-k, batch, and range queries. The
//! vector store owns exactly one backend instance and drives it through this
//! trait; backends never see the canonical storage.

use crate::config::DatabaseConfig;
use crate::distance::DistanceMetric;
use crate::error::{EmberDbError, Result};
use crate::types::VectorId;
use crate::vector::Vector;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Opaque string-keyed parameters forwarded to a backend.
///
/// Build and query parameters travel as `key=value` string pairs so new
/// backends can introduce knobs without touching the core types. Typed
/// access goes through [`AlgorithmParams::get_or`].
#[derive(Debug, Clone, Default)]
pub struct AlgorithmParams {
    params: HashMap<String, String>,
}

impl AlgorithmParams {
    /// Create an empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a parameter, stringifying the value.
    pub fn set(&mut self, key: impl Into<String>, value: impl ToString) {
        self.params.insert(key.into(), value.to_string());
    }

    /// Get the raw string value for a key.
    pub fn get_raw(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Get a typed value, falling back to `default` when the key is absent
    /// or fails to parse.
    pub fn get_or<T: FromStr>(&self, key: &str, default: T) -> T {
        self.params
            .get(key)
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(default)
    }

    /// Check whether a key is present.
    pub fn has(&self, key: &str) -> bool {
        self.params.contains_key(key)
    }

    /// Copy raw entries from a plain string map (config passthrough).
    pub fn extend_raw(&mut self, entries: &HashMap<String, String>) {
        for (key, value) in entries {
            self.params.insert(key.clone(), value.clone());
        }
    }
}

/// Metrics reported by a successful `fit`.
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    /// Number of entries indexed by the build.
    pub entries_indexed: usize,
    /// Wall-clock build duration.
    pub build_time: Duration,
    /// Backend-specific build metrics.
    pub metrics: HashMap<String, f64>,
}

/// A pluggable ANN algorithm.
///
/// # Lifecycle
///
/// `initialize` must be called exactly once before any other operation.
/// Backends that require training answer `is_trained() == false` until
/// either [`AnnBackend::train`] or [`AnnBackend::fit`] succeeds; calling
/// `search` before then is a contract violation the store prevents via its
/// training gate.
///
/// # Thread safety
///
/// Implementations must be `Send + Sync`; the store serializes mutation and
/// search behind its own mutex, so interior mutability is not required.
pub trait AnnBackend: Send + Sync {
    /// Stable identifying name (matches the registry entry).
    fn name(&self) -> &'static str;

    /// Implementation version string.
    fn version(&self) -> &'static str;

    /// Human-readable description.
    fn description(&self) -> &'static str;

    /// The metrics this backend can serve.
    fn supported_metrics(&self) -> Vec<DistanceMetric>;

    /// Whether `add` is legal after training.
    fn supports_incremental_add(&self) -> bool;

    /// Whether `remove` is legal.
    fn supports_delete(&self) -> bool;

    /// Whether `range_search` is legal.
    fn supports_range_query(&self) -> bool;

    /// Prepare internal state from the database configuration.
    fn initialize(&mut self, config: &DatabaseConfig) -> Result<()>;

    /// Learn internal structure (e.g. a coarse quantizer) from sample
    /// vectors without indexing them.
    ///
    /// Backends with no training step accept any input and simply become
    /// trained. After a successful return `is_trained()` is true.
    fn train(&mut self, samples: &[Vec<f32>], params: &AlgorithmParams) -> Result<()>;

    /// Build the index from `(id, vector)` entries, replacing any previous
    /// contents. After a successful return `is_trained()` is true.
    fn fit(&mut self, entries: &[Vector], params: &AlgorithmParams) -> Result<BuildReport>;

    /// Extend the index with new entries.
    ///
    /// Fails with `Unsupported` when `supports_incremental_add()` is false.
    fn add(&mut self, entries: &[Vector]) -> Result<()> {
        let _ = entries;
        Err(EmberDbError::unsupported(format!(
            "{} does not support adding vectors",
            self.name()
        )))
    }

    /// Invalidate the listed ids.
    ///
    /// Fails with `Unsupported` when `supports_delete()` is false. Unknown
    /// ids are ignored.
    fn remove(&mut self, ids: &[VectorId]) -> Result<()> {
        let _ = ids;
        Err(EmberDbError::unsupported(format!(
            "{} does not support removing vectors",
            self.name()
        )))
    }

    /// Return up to `k` `(id, score)` pairs, best first.
    fn search(
        &self,
        query: &[f32],
        k: usize,
        params: &AlgorithmParams,
    ) -> Result<Vec<(VectorId, f32)>>;

    /// Per-query `search`, order preserved.
    fn batch_search(
        &self,
        queries: &[Vec<f32>],
        k: usize,
        params: &AlgorithmParams,
    ) -> Result<Vec<Vec<(VectorId, f32)>>> {
        queries
            .iter()
            .map(|query| self.search(query, k, params))
            .collect()
    }

    /// Return all `(id, score)` pairs within `radius`, best first.
    ///
    /// Fails with `Unsupported` when `supports_range_query()` is false.
    fn range_search(
        &self,
        query: &[f32],
        radius: f32,
        params: &AlgorithmParams,
    ) -> Result<Vec<(VectorId, f32)>> {
        let _ = (query, radius, params);
        Err(EmberDbError::unsupported(format!(
            "{} does not support range queries",
            self.name()
        )))
    }

    /// Serialize backend-private state to `path`.
    ///
    /// May be a no-op; the store will then rebuild on load.
    fn save(&self, path: &Path) -> Result<()>;

    /// Restore backend-private state from `path`, returning the number of
    /// entries restored.
    fn load(&mut self, path: &Path) -> Result<usize>;

    /// True when `search` is legal.
    fn is_trained(&self) -> bool;

    /// Number of live entries in the index.
    fn len(&self) -> usize;

    /// True when the index holds no live entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Opaque observability counters.
    fn stats(&self) -> HashMap<String, f64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_typed_access() {
        let mut params = AlgorithmParams::new();
        params.set("nprobe", 8);
        params.set("radius", 0.5f32);

        assert_eq!(params.get_or("nprobe", 1usize), 8);
        assert!((params.get_or("radius", 0.0f32) - 0.5).abs() < 1e-6);
        assert_eq!(params.get_or("missing", 42usize), 42);
        assert!(params.has("nprobe"));
        assert!(!params.has("missing"));
    }

    #[test]
    fn test_params_bad_parse_falls_back() {
        let mut params = AlgorithmParams::new();
        params.set("nprobe", "not-a-number");
        assert_eq!(params.get_or("nprobe", 3usize), 3);
    }

    #[test]
    fn test_params_extend_raw() {
        let mut extra = HashMap::new();
        extra.insert("ef".to_string(), "128".to_string());

        let mut params = AlgorithmParams::new();
        params.extend_raw(&extra);
        assert_eq!(params.get_or("ef", 0usize), 128);
    }
}
