//! Database facade.
//!
//! [`Database`] bundles the vector store, the metadata store, and the query
//! engine behind one entry point. It validates dimensions at the boundary,
//! routes metadata-aware writes to both stores (vector first; a metadata
//! failure never rolls the id back), and coordinates the per-component
//! files on save and load.

use crate::config::{DatabaseConfig, IndexType};
use crate::error::{EmberDbError, Result};
use crate::metadata::MetadataStore;
use crate::persistence::path_with_suffix;
use crate::query::{QueryEngine, SearchStats, TextScorer};
use crate::types::{Metadata, QueryResult, SearchParams, VectorId};
use crate::vector_store::VectorStore;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Outcome of a metadata update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The record was replaced with the supplied metadata.
    Updated,
    /// The supplied metadata was empty; the record was removed.
    Cleared,
}

/// An embeddable vector database instance.
pub struct Database {
    config: DatabaseConfig,
    vector_store: Arc<VectorStore>,
    metadata_store: Arc<MetadataStore>,
    query_engine: QueryEngine,
}

impl Database {
    /// Assemble a database from a validated configuration.
    pub fn new(config: DatabaseConfig) -> Result<Self> {
        config.validate()?;

        let vector_store = Arc::new(VectorStore::new(config.clone())?);
        let metadata_store = Arc::new(MetadataStore::new());
        let query_engine = QueryEngine::new(vector_store.clone(), metadata_store.clone());

        Ok(Self {
            config,
            vector_store,
            metadata_store,
            query_engine,
        })
    }

    /// Replace the text scorer used by hybrid search.
    pub fn with_text_scorer(mut self, scorer: Box<dyn TextScorer>) -> Self {
        self.query_engine = self.query_engine.with_text_scorer(scorer);
        self
    }

    // -----------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------

    /// Add a vector with optional metadata, returning its id.
    ///
    /// The vector add happens first. If the metadata write then fails the
    /// id is not rolled back: the vector stays searchable without metadata
    /// and the failure is logged and returned.
    pub fn add(&self, vector: Vec<f32>, metadata: Metadata) -> Result<VectorId> {
        let id = self.vector_store.add_vector(vector)?;

        if !metadata.is_empty() {
            if let Err(err) = self.metadata_store.set_metadata(id, metadata) {
                tracing::warn!(
                    id = id.as_u64(),
                    error = %err,
                    "metadata write failed after vector add; vector retained without metadata"
                );
                return Err(err);
            }
        }
        Ok(id)
    }

    /// Add a batch of vectors with optional per-vector metadata.
    ///
    /// `metadata` must be empty or the same length as `vectors`.
    pub fn add_batch(
        &self,
        vectors: Vec<Vec<f32>>,
        metadata: Vec<Metadata>,
    ) -> Result<Vec<VectorId>> {
        if !metadata.is_empty() && metadata.len() != vectors.len() {
            return Err(EmberDbError::invalid_parameter(
                "vectors and metadata must have the same length",
            ));
        }

        let ids = self.vector_store.add_vectors(vectors)?;

        if !metadata.is_empty() {
            if let Err(err) = self.metadata_store.set_batch_metadata(&ids, metadata) {
                tracing::warn!(
                    error = %err,
                    "batch metadata write failed after vector add; vectors retained without metadata"
                );
                return Err(err);
            }
        }
        Ok(ids)
    }

    /// Remove a vector and its metadata.
    ///
    /// Fails with `NotFound` for unknown ids.
    pub fn remove(&self, id: VectorId) -> Result<()> {
        self.vector_store.remove_vector(id)?;
        self.metadata_store.remove_metadata(id);
        Ok(())
    }

    /// Replace the metadata for an existing vector.
    ///
    /// Empty metadata clears the record. Vector payloads cannot be updated
    /// in place; replace the vector by removing and re-adding it.
    pub fn update_metadata(&self, id: VectorId, metadata: Metadata) -> Result<UpdateOutcome> {
        if !self.vector_store.contains(id) {
            return Err(EmberDbError::NotFound(id.as_u64()));
        }

        if metadata.is_empty() {
            self.metadata_store.remove_metadata(id);
            Ok(UpdateOutcome::Cleared)
        } else {
            self.metadata_store.set_metadata(id, metadata)?;
            Ok(UpdateOutcome::Updated)
        }
    }

    // -----------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------

    /// Top-k search with default parameters.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<QueryResult>> {
        self.query_engine.search(query, &SearchParams::with_k(k))
    }

    /// Top-k search with explicit parameters.
    pub fn search_with_params(
        &self,
        query: &[f32],
        params: &SearchParams,
    ) -> Result<Vec<QueryResult>> {
        self.query_engine.search(query, params)
    }

    /// Filtered search over a metadata predicate.
    pub fn filtered_search(
        &self,
        query: &[f32],
        params: &SearchParams,
        filter: impl Fn(&Metadata) -> bool,
    ) -> Result<Vec<QueryResult>> {
        self.query_engine.filtered_search(query, params, filter)
    }

    /// Filtered search matching one metadata key/value pair.
    pub fn search_with_metadata(
        &self,
        query: &[f32],
        params: &SearchParams,
        key: &str,
        value: &str,
    ) -> Result<Vec<QueryResult>> {
        self.query_engine
            .search_with_metadata(query, params, key, value)
    }

    /// Batch top-k search.
    pub fn batch_search(
        &self,
        queries: &[Vec<f32>],
        params: &SearchParams,
    ) -> Result<Vec<Vec<QueryResult>>> {
        self.query_engine.batch_search(queries, params)
    }

    /// Per-query filtered search over a batch.
    pub fn batch_filtered_search(
        &self,
        queries: &[Vec<f32>],
        params: &SearchParams,
        filter: impl Fn(&Metadata) -> bool,
    ) -> Result<Vec<Vec<QueryResult>>> {
        self.query_engine
            .batch_filtered_search(queries, params, filter)
    }

    /// Every hit within `radius` under the configured metric.
    pub fn range_search(
        &self,
        query: &[f32],
        radius: f32,
        params: &SearchParams,
    ) -> Result<Vec<QueryResult>> {
        self.query_engine.range_search(query, radius, params)
    }

    /// Hybrid vector + text search with explicit weights.
    pub fn hybrid_search(
        &self,
        query: &[f32],
        params: &SearchParams,
        text_query: &str,
        vector_weight: f32,
        text_weight: f32,
    ) -> Result<Vec<QueryResult>> {
        self.query_engine
            .hybrid_search(query, params, text_query, vector_weight, text_weight)
    }

    /// Rerank the top candidates with a caller-supplied scoring function.
    pub fn search_with_rerank(
        &self,
        query: &[f32],
        params: &SearchParams,
        rerank_fn: impl Fn(&[f32], &Metadata, f32) -> f32,
        rerank_k: usize,
    ) -> Result<Vec<QueryResult>> {
        self.query_engine
            .search_with_rerank(query, params, rerank_fn, rerank_k)
    }

    // -----------------------------------------------------------------
    // Metadata access
    // -----------------------------------------------------------------

    /// Attach metadata to an id without touching the vector.
    pub fn set_metadata(&self, id: VectorId, metadata: Metadata) -> Result<()> {
        self.metadata_store.set_metadata(id, metadata)
    }

    /// The metadata record for an id, if any.
    pub fn get_metadata(&self, id: VectorId) -> Option<Metadata> {
        self.metadata_store.get_metadata(id)
    }

    /// Ids whose metadata maps `key` exactly to `value`.
    pub fn find_by_metadata(&self, key: &str, value: &str) -> Vec<VectorId> {
        self.metadata_store.find_by_key_value(key, value)
    }

    /// Ids whose metadata maps `key` to a value starting with `prefix`.
    pub fn find_by_metadata_prefix(&self, key: &str, prefix: &str) -> Vec<VectorId> {
        self.metadata_store.find_by_prefix(key, prefix)
    }

    /// All distinct metadata keys.
    pub fn metadata_keys(&self) -> Vec<String> {
        self.metadata_store.keys()
    }

    // -----------------------------------------------------------------
    // Index lifecycle
    // -----------------------------------------------------------------

    /// Build the backend index from the stored vectors.
    pub fn build_index(&self) -> Result<()> {
        self.vector_store.build_index()
    }

    /// Train the backend on caller-supplied vectors.
    pub fn train_index(&self, samples: &[Vec<f32>]) -> Result<()> {
        self.vector_store.train_index(samples)
    }

    /// Whether the index can serve queries.
    pub fn is_trained(&self) -> bool {
        self.vector_store.is_trained()
    }

    // -----------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------

    /// Number of stored vectors.
    pub fn size(&self) -> usize {
        self.vector_store.size()
    }

    /// Configured vector dimension.
    pub fn dimension(&self) -> u32 {
        self.config.dimension
    }

    /// Configured index type hint.
    pub fn index_type(&self) -> IndexType {
        self.config.index_type
    }

    /// The configuration this database was built with.
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Store and backend observability counters.
    pub fn stats(&self) -> HashMap<String, f64> {
        self.vector_store.stats()
    }

    /// Statistics for the most recent search.
    pub fn last_search_stats(&self) -> SearchStats {
        self.query_engine.get_last_search_stats()
    }

    /// The query engine, for callers composing their own search flows.
    pub fn query_engine(&self) -> &QueryEngine {
        &self.query_engine
    }

    // -----------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------

    /// Persist all components next to the `path` prefix.
    ///
    /// Writes `<path>.config`, `<path>.vectors` (plus the backend blob and
    /// order sidecar as `.vectors.anns` / `.vectors.order`), and
    /// `<path>.metadata`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let base = path.as_ref();
        self.config.save(path_with_suffix(base, ".config"))?;
        self.vector_store.save(&path_with_suffix(base, ".vectors"))?;
        self.metadata_store.save(path_with_suffix(base, ".metadata"))?;
        Ok(())
    }

    /// Open a database from files written by [`Database::save`].
    ///
    /// The config and vectors files are authoritative and fail loudly. The
    /// backend blob is optional: when it is missing or inconsistent the
    /// index is rebuilt from the vectors. A missing or corrupt metadata
    /// stream yields an empty metadata store.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let base = path.as_ref();

        let config = DatabaseConfig::load(path_with_suffix(base, ".config"))?;
        let db = Database::new(config)?;

        db.vector_store.load(&path_with_suffix(base, ".vectors"))?;

        let metadata_path = path_with_suffix(base, ".metadata");
        if metadata_path.exists() {
            if let Err(err) = db.metadata_store.load(&metadata_path) {
                tracing::warn!(
                    path = %metadata_path.display(),
                    error = %err,
                    "metadata stream unusable, starting empty"
                );
                db.metadata_store.clear();
            }
        }

        Ok(db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::DistanceMetric;

    fn meta(pairs: &[(&str, &str)]) -> Metadata {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_new_rejects_zero_dimension() {
        let result = Database::new(DatabaseConfig::new(0));
        assert!(matches!(result, Err(EmberDbError::InvalidConfig(_))));
    }

    #[test]
    fn test_add_and_search() {
        let db = Database::new(DatabaseConfig::new(4).metric(DistanceMetric::L2)).unwrap();
        let a = db.add(vec![1.0, 0.0, 0.0, 0.0], meta(&[("tag", "a")])).unwrap();
        let _b = db.add(vec![0.0, 1.0, 0.0, 0.0], Metadata::new()).unwrap();

        assert_eq!(db.size(), 2);

        let results = db.search(&[1.0, 0.0, 0.0, 0.0], 1).unwrap();
        assert_eq!(results[0].id, a);
        assert_eq!(results[0].metadata.as_ref().unwrap()["tag"], "a");
    }

    #[test]
    fn test_dimension_validated_at_boundary() {
        let db = Database::new(DatabaseConfig::new(4)).unwrap();
        assert!(matches!(
            db.add(vec![1.0], Metadata::new()),
            Err(EmberDbError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            db.search(&[1.0], 1),
            Err(EmberDbError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_remove_unknown_is_not_found() {
        let db = Database::new(DatabaseConfig::new(2)).unwrap();
        assert!(matches!(
            db.remove(VectorId(5)),
            Err(EmberDbError::NotFound(5))
        ));
    }

    #[test]
    fn test_remove_clears_metadata() {
        let db = Database::new(DatabaseConfig::new(2)).unwrap();
        let id = db.add(vec![1.0, 0.0], meta(&[("k", "v")])).unwrap();

        db.remove(id).unwrap();
        assert_eq!(db.size(), 0);
        assert!(db.get_metadata(id).is_none());
    }

    #[test]
    fn test_update_metadata_outcomes() {
        let db = Database::new(DatabaseConfig::new(2)).unwrap();
        let id = db.add(vec![1.0, 0.0], meta(&[("k", "v1")])).unwrap();

        let outcome = db.update_metadata(id, meta(&[("k", "v2")])).unwrap();
        assert_eq!(outcome, UpdateOutcome::Updated);
        assert_eq!(db.get_metadata(id).unwrap()["k"], "v2");

        let outcome = db.update_metadata(id, Metadata::new()).unwrap();
        assert_eq!(outcome, UpdateOutcome::Cleared);
        assert!(db.get_metadata(id).is_none());

        assert!(matches!(
            db.update_metadata(VectorId(999), meta(&[("k", "v")])),
            Err(EmberDbError::NotFound(999))
        ));
    }

    #[test]
    fn test_add_batch_length_mismatch() {
        let db = Database::new(DatabaseConfig::new(2)).unwrap();
        let result = db.add_batch(
            vec![vec![0.0, 0.0], vec![1.0, 1.0]],
            vec![meta(&[("n", "0")])],
        );
        assert!(matches!(result, Err(EmberDbError::InvalidParameter(_))));
    }

    #[test]
    fn test_find_by_metadata() {
        let db = Database::new(DatabaseConfig::new(2)).unwrap();
        let a = db.add(vec![0.0, 0.0], meta(&[("cat", "x"), ("name", "alpha")])).unwrap();
        let _b = db.add(vec![1.0, 0.0], meta(&[("cat", "y"), ("name", "beta")])).unwrap();

        assert_eq!(db.find_by_metadata("cat", "x"), vec![a]);
        assert_eq!(db.find_by_metadata_prefix("name", "al"), vec![a]);
        assert_eq!(db.metadata_keys(), vec!["cat".to_string(), "name".to_string()]);
    }
}
