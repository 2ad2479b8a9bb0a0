//! Brute force backend for exact nearest neighbor search.
//!
//! The reference implementation of the backend contract: always available,
//! always trained, 100% recall. It doubles as the fallback whenever a
//! requested backend is not registered. Search maintains a bounded best-k
//! heap over a full scan, O(N·D) per query, with a rayon-parallel variant
//! for larger datasets.

use crate::anns::backend::{AlgorithmParams, AnnBackend, BuildReport};
use crate::anns::registry::BackendFactory;
use crate::config::DatabaseConfig;
use crate::constants::scan::{BRUTE_FORCE_CHUNK_SIZE, PARALLEL_THRESHOLD};
use crate::distance::DistanceMetric;
use crate::error::{EmberDbError, Result};
use crate::persistence;
use crate::types::VectorId;
use crate::vector::Vector;
use rayon::prelude::*;
use roaring::RoaringTreemap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Instant;

/// Registry name of the brute force backend.
pub const BRUTE_FORCE_NAME: &str = "brute_force";

/// A candidate with its ranking key, used for heap operations.
///
/// `key` is the score mapped so that smaller is always better, letting one
/// max-heap serve every metric orientation.
#[derive(Clone, Copy)]
struct ScoredCandidate {
    id: VectorId,
    key: f32,
    score: f32,
}

impl PartialEq for ScoredCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for ScoredCandidate {}

impl PartialOrd for ScoredCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoredCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.partial_cmp(&other.key).unwrap_or(Ordering::Equal)
    }
}

/// Push a candidate into a bounded best-k heap.
#[inline]
fn heap_offer(heap: &mut BinaryHeap<ScoredCandidate>, candidate: ScoredCandidate, k: usize) {
    if heap.len() < k {
        heap.push(candidate);
    } else if candidate.key < heap.peek().map(|worst| worst.key).unwrap_or(f32::MAX) {
        heap.pop();
        heap.push(candidate);
    }
}

/// Serialized form of the backend state.
#[derive(Serialize, Deserialize)]
struct BruteForceState {
    metric_code: u32,
    dimension: u64,
    entries: Vec<(u64, Vec<f32>)>,
    tombstones: Vec<u64>,
}

/// Exact-search backend storing `(id, vector)` pairs in insertion order.
///
/// Deletes are tombstones: the entry stays in the scan array but is skipped
/// and excluded from `len()`.
pub struct BruteForceBackend {
    metric: DistanceMetric,
    dimension: usize,
    vectors: Vec<Vector>,
    id_to_index: HashMap<VectorId, usize>,
    tombstones: RoaringTreemap,
    distance_computations: AtomicU64,
}

impl Default for BruteForceBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl BruteForceBackend {
    /// Create an empty backend with the default metric.
    pub fn new() -> Self {
        Self {
            metric: DistanceMetric::L2,
            dimension: 0,
            vectors: Vec::new(),
            id_to_index: HashMap::new(),
            tombstones: RoaringTreemap::new(),
            distance_computations: AtomicU64::new(0),
        }
    }

    fn rank_key(&self, score: f32) -> f32 {
        if self.metric.sorts_descending() {
            -score
        } else {
            score
        }
    }

    fn check_dimension(&mut self, data: &[f32]) -> Result<()> {
        if self.dimension == 0 {
            self.dimension = data.len();
            return Ok(());
        }
        if data.len() != self.dimension {
            return Err(EmberDbError::dimension_mismatch(self.dimension, data.len()));
        }
        Ok(())
    }

    fn insert_entry(&mut self, entry: &Vector) {
        self.tombstones.remove(entry.id.as_u64());
        self.id_to_index.insert(entry.id, self.vectors.len());
        self.vectors.push(entry.clone());
    }

    /// Single-threaded bounded-heap scan.
    fn scan_serial(&self, query: &[f32], k: usize) -> Vec<(VectorId, f32)> {
        let mut heap: BinaryHeap<ScoredCandidate> = BinaryHeap::with_capacity(k);
        let mut computed = 0u64;

        for vector in &self.vectors {
            if self.tombstones.contains(vector.id.as_u64()) {
                continue;
            }
            let score = self.metric.compute(query, &vector.data);
            computed += 1;
            heap_offer(
                &mut heap,
                ScoredCandidate {
                    id: vector.id,
                    key: self.rank_key(score),
                    score,
                },
                k,
            );
        }

        self.distance_computations
            .fetch_add(computed, AtomicOrdering::Relaxed);
        drain_sorted(heap)
    }

    /// Rayon-parallel scan: per-chunk bounded heaps merged by reduction.
    fn scan_parallel(&self, query: &[f32], k: usize) -> Vec<(VectorId, f32)> {
        let final_heap = self
            .vectors
            .par_chunks(BRUTE_FORCE_CHUNK_SIZE)
            .map(|chunk| {
                let mut local_heap: BinaryHeap<ScoredCandidate> = BinaryHeap::with_capacity(k);
                let mut computed = 0u64;

                for vector in chunk {
                    if self.tombstones.contains(vector.id.as_u64()) {
                        continue;
                    }
                    let score = self.metric.compute(query, &vector.data);
                    computed += 1;
                    heap_offer(
                        &mut local_heap,
                        ScoredCandidate {
                            id: vector.id,
                            key: self.rank_key(score),
                            score,
                        },
                        k,
                    );
                }

                self.distance_computations
                    .fetch_add(computed, AtomicOrdering::Relaxed);
                local_heap
            })
            .reduce(
                || BinaryHeap::with_capacity(k),
                |mut a, b| {
                    for candidate in b {
                        heap_offer(&mut a, candidate, k);
                    }
                    a
                },
            );

        drain_sorted(final_heap)
    }
}

/// Convert a bounded heap into a best-first result list.
fn drain_sorted(heap: BinaryHeap<ScoredCandidate>) -> Vec<(VectorId, f32)> {
    let mut candidates: Vec<ScoredCandidate> = heap.into_iter().collect();
    candidates.sort_by(|a, b| a.key.partial_cmp(&b.key).unwrap_or(Ordering::Equal));
    candidates.into_iter().map(|c| (c.id, c.score)).collect()
}

impl AnnBackend for BruteForceBackend {
    fn name(&self) -> &'static str {
        BRUTE_FORCE_NAME
    }

    fn version(&self) -> &'static str {
        "1.0.0"
    }

    fn description(&self) -> &'static str {
        "Exact nearest neighbor search by full scan"
    }

    fn supported_metrics(&self) -> Vec<DistanceMetric> {
        vec![
            DistanceMetric::L2,
            DistanceMetric::InnerProduct,
            DistanceMetric::Cosine,
        ]
    }

    fn supports_incremental_add(&self) -> bool {
        true
    }

    fn supports_delete(&self) -> bool {
        true
    }

    fn supports_range_query(&self) -> bool {
        true
    }

    fn initialize(&mut self, config: &DatabaseConfig) -> Result<()> {
        self.metric = config.metric;
        self.dimension = config.dimension as usize;
        Ok(())
    }

    fn train(&mut self, _samples: &[Vec<f32>], _params: &AlgorithmParams) -> Result<()> {
        // No training step; the scan array is the index.
        Ok(())
    }

    fn fit(&mut self, entries: &[Vector], params: &AlgorithmParams) -> Result<BuildReport> {
        let start = Instant::now();

        if let Some(code) = params.get_raw("metric").and_then(|raw| raw.parse().ok()) {
            if let Some(metric) = DistanceMetric::from_code(code) {
                self.metric = metric;
            }
        }

        self.vectors.clear();
        self.id_to_index.clear();
        self.tombstones.clear();

        for entry in entries {
            self.check_dimension(&entry.data)?;
            self.insert_entry(entry);
        }

        let mut metrics = HashMap::new();
        metrics.insert(
            "index_size_bytes".to_string(),
            (self.vectors.len() * self.dimension * std::mem::size_of::<f32>()) as f64,
        );

        Ok(BuildReport {
            entries_indexed: entries.len(),
            build_time: start.elapsed(),
            metrics,
        })
    }

    fn add(&mut self, entries: &[Vector]) -> Result<()> {
        for entry in entries {
            self.check_dimension(&entry.data)?;
        }
        for entry in entries {
            self.insert_entry(entry);
        }
        Ok(())
    }

    fn remove(&mut self, ids: &[VectorId]) -> Result<()> {
        for id in ids {
            if self.id_to_index.contains_key(id) {
                self.tombstones.insert(id.as_u64());
            }
        }
        Ok(())
    }

    fn search(
        &self,
        query: &[f32],
        k: usize,
        _params: &AlgorithmParams,
    ) -> Result<Vec<(VectorId, f32)>> {
        if k == 0 || self.vectors.is_empty() {
            return Ok(Vec::new());
        }
        if self.dimension != 0 && query.len() != self.dimension {
            return Err(EmberDbError::dimension_mismatch(self.dimension, query.len()));
        }

        if self.vectors.len() >= PARALLEL_THRESHOLD {
            Ok(self.scan_parallel(query, k))
        } else {
            Ok(self.scan_serial(query, k))
        }
    }

    fn batch_search(
        &self,
        queries: &[Vec<f32>],
        k: usize,
        params: &AlgorithmParams,
    ) -> Result<Vec<Vec<(VectorId, f32)>>> {
        queries
            .par_iter()
            .map(|query| self.search(query, k, params))
            .collect()
    }

    fn range_search(
        &self,
        query: &[f32],
        radius: f32,
        _params: &AlgorithmParams,
    ) -> Result<Vec<(VectorId, f32)>> {
        if self.dimension != 0 && query.len() != self.dimension {
            return Err(EmberDbError::dimension_mismatch(self.dimension, query.len()));
        }

        let mut results: Vec<(VectorId, f32)> = Vec::new();
        let mut computed = 0u64;
        for vector in &self.vectors {
            if self.tombstones.contains(vector.id.as_u64()) {
                continue;
            }
            let score = self.metric.compute(query, &vector.data);
            computed += 1;
            if self.metric.within_radius(score, radius) {
                results.push((vector.id, score));
            }
        }
        self.distance_computations
            .fetch_add(computed, AtomicOrdering::Relaxed);

        self.metric.sort_best_first(&mut results);
        Ok(results)
    }

    fn save(&self, path: &Path) -> Result<()> {
        let state = BruteForceState {
            metric_code: self.metric.code(),
            dimension: self.dimension as u64,
            entries: self
                .vectors
                .iter()
                .map(|v| (v.id.as_u64(), v.data.to_vec()))
                .collect(),
            tombstones: self.tombstones.iter().collect(),
        };
        let body = bincode::serialize(&state)?;
        persistence::write_blob(path, BRUTE_FORCE_NAME, &body)
    }

    fn load(&mut self, path: &Path) -> Result<usize> {
        let body = persistence::read_blob(path, BRUTE_FORCE_NAME)?;
        let state: BruteForceState = bincode::deserialize(&body)?;

        self.metric = DistanceMetric::from_code(state.metric_code)
            .ok_or_else(|| EmberDbError::invalid_format("unknown metric code in blob"))?;
        self.dimension = state.dimension as usize;

        self.vectors.clear();
        self.id_to_index.clear();
        self.tombstones.clear();

        for (raw_id, data) in state.entries {
            let entry = Vector::new(VectorId(raw_id), data);
            self.id_to_index.insert(entry.id, self.vectors.len());
            self.vectors.push(entry);
        }
        for raw_id in state.tombstones {
            self.tombstones.insert(raw_id);
        }

        Ok(self.len())
    }

    fn is_trained(&self) -> bool {
        true
    }

    fn len(&self) -> usize {
        self.vectors.len() - self.tombstones.len() as usize
    }

    fn stats(&self) -> HashMap<String, f64> {
        let mut stats = HashMap::new();
        stats.insert("num_vectors".to_string(), self.len() as f64);
        stats.insert("num_tombstones".to_string(), self.tombstones.len() as f64);
        stats.insert(
            "memory_bytes".to_string(),
            (self.vectors.len() * self.dimension * std::mem::size_of::<f32>()) as f64,
        );
        stats.insert(
            "distance_computations".to_string(),
            self.distance_computations.load(AtomicOrdering::Relaxed) as f64,
        );
        stats
    }
}

/// Factory for [`BruteForceBackend`].
pub struct BruteForceFactory;

impl BackendFactory for BruteForceFactory {
    fn backend_name(&self) -> &'static str {
        BRUTE_FORCE_NAME
    }

    fn description(&self) -> &'static str {
        "Exact nearest neighbor search by full scan"
    }

    fn supported_metrics(&self) -> Vec<DistanceMetric> {
        vec![
            DistanceMetric::L2,
            DistanceMetric::InnerProduct,
            DistanceMetric::Cosine,
        ]
    }

    fn create(&self) -> Box<dyn AnnBackend> {
        Box::new(BruteForceBackend::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(count: u64, dim: usize) -> Vec<Vector> {
        (1..=count).map(|i| Vector::random(i, dim)).collect()
    }

    fn backend_with(count: u64, dim: usize, metric: DistanceMetric) -> BruteForceBackend {
        let mut backend = BruteForceBackend::new();
        backend.metric = metric;
        backend
            .fit(&entries(count, dim), &AlgorithmParams::new())
            .unwrap();
        backend
    }

    #[test]
    fn test_search_returns_sorted_results() {
        let backend = backend_with(100, 16, DistanceMetric::L2);
        let query = Vector::random(999, 16);

        let results = backend
            .search(&query.data, 10, &AlgorithmParams::new())
            .unwrap();
        assert_eq!(results.len(), 10);
        for pair in results.windows(2) {
            assert!(pair[0].1 <= pair[1].1);
        }
    }

    #[test]
    fn test_inner_product_sorts_descending() {
        let backend = backend_with(100, 16, DistanceMetric::InnerProduct);
        let query = Vector::random(999, 16);

        let results = backend
            .search(&query.data, 10, &AlgorithmParams::new())
            .unwrap();
        for pair in results.windows(2) {
            assert!(pair[0].1 >= pair[1].1);
        }
    }

    #[test]
    fn test_exact_match_is_first() {
        let mut backend = BruteForceBackend::new();
        backend
            .fit(
                &[
                    Vector::new(VectorId(1), vec![1.0, 0.0, 0.0, 0.0]),
                    Vector::new(VectorId(2), vec![0.0, 1.0, 0.0, 0.0]),
                    Vector::new(VectorId(3), vec![0.0, 0.0, 1.0, 0.0]),
                ],
                &AlgorithmParams::new(),
            )
            .unwrap();

        let results = backend
            .search(&[1.0, 0.0, 0.0, 0.0], 2, &AlgorithmParams::new())
            .unwrap();
        assert_eq!(results[0].0, VectorId(1));
        assert!(results[0].1.abs() < 1e-6);
        assert!((results[1].1 - std::f32::consts::SQRT_2).abs() < 1e-5);
    }

    #[test]
    fn test_parallel_matches_serial() {
        let backend = backend_with(5000, 32, DistanceMetric::L2);
        let query = Vector::random(9999, 32);

        let serial = backend.scan_serial(&query.data, 10);
        let parallel = backend.scan_parallel(&query.data, 10);

        assert_eq!(serial.len(), parallel.len());
        for (a, b) in serial.iter().zip(parallel.iter()) {
            assert_eq!(a.0, b.0);
        }
    }

    #[test]
    fn test_remove_tombstones_entry() {
        let mut backend = backend_with(10, 8, DistanceMetric::L2);
        assert_eq!(backend.len(), 10);

        backend.remove(&[VectorId(3)]).unwrap();
        assert_eq!(backend.len(), 9);

        let query = backend.vectors[2].data.to_vec();
        let results = backend.search(&query, 10, &AlgorithmParams::new()).unwrap();
        assert!(results.iter().all(|(id, _)| *id != VectorId(3)));
    }

    #[test]
    fn test_k_zero_and_k_beyond_len() {
        let backend = backend_with(5, 8, DistanceMetric::L2);
        let query = Vector::random(99, 8);

        let empty = backend
            .search(&query.data, 0, &AlgorithmParams::new())
            .unwrap();
        assert!(empty.is_empty());

        let all = backend
            .search(&query.data, 50, &AlgorithmParams::new())
            .unwrap();
        assert_eq!(all.len(), 5);
    }

    #[test]
    fn test_range_search() {
        let mut backend = BruteForceBackend::new();
        backend
            .fit(
                &[
                    Vector::new(VectorId(1), vec![0.0, 0.0]),
                    Vector::new(VectorId(2), vec![1.0, 0.0]),
                    Vector::new(VectorId(3), vec![5.0, 0.0]),
                ],
                &AlgorithmParams::new(),
            )
            .unwrap();

        let results = backend
            .range_search(&[0.0, 0.0], 1.5, &AlgorithmParams::new())
            .unwrap();
        let ids: Vec<VectorId> = results.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![VectorId(1), VectorId(2)]);
    }

    #[test]
    fn test_dimension_mismatch_on_add() {
        let mut backend = backend_with(5, 8, DistanceMetric::L2);
        let result = backend.add(&[Vector::new(VectorId(100), vec![1.0, 2.0])]);
        assert!(matches!(
            result,
            Err(EmberDbError::DimensionMismatch { expected: 8, actual: 2 })
        ));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bf.anns");

        let mut backend = backend_with(50, 8, DistanceMetric::Cosine);
        backend.remove(&[VectorId(7)]).unwrap();
        backend.save(&path).unwrap();

        let mut restored = BruteForceBackend::new();
        let count = restored.load(&path).unwrap();
        assert_eq!(count, 49);
        assert_eq!(restored.metric, DistanceMetric::Cosine);

        let query = Vector::random(999, 8);
        let a = backend
            .search(&query.data, 5, &AlgorithmParams::new())
            .unwrap();
        let b = restored
            .search(&query.data, 5, &AlgorithmParams::new())
            .unwrap();
        assert_eq!(
            a.iter().map(|(id, _)| *id).collect::<Vec<_>>(),
            b.iter().map(|(id, _)| *id).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_always_trained() {
        let backend = BruteForceBackend::new();
        assert!(backend.is_trained());
        assert!(backend.is_empty());
    }
}
