//! Inverted File (IVF) backend with flat storage.
//!
//! Partitions the vector space with k-means, then searches only the
//! `nprobe` nearest partitions per query. Unlike the brute force backend
//! this one requires training: `search` is illegal until `train` or `fit`
//! has produced centroids, and the vector store's training gate enforces
//! that.

use crate::anns::backend::{AlgorithmParams, AnnBackend, BuildReport};
use crate::anns::registry::BackendFactory;
use crate::config::DatabaseConfig;
use crate::distance::{euclidean_distance_squared, DistanceMetric};
use crate::error::{EmberDbError, Result};
use crate::kmeans::KMeans;
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

/// Registry name of the IVF-Flat backend.
pub const IVF_FLAT_NAME: &str = "ivf_flat";

/// A candidate with its ranking key, used for heap operations.
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
struct IvfFlatState {
    metric_code: u32,
    dimension: u64,
    nlist: u64,
    centroids: Vec<Vec<f32>>,
    partitions: Vec<Vec<(u64, Vec<f32>)>>,
    tombstones: Vec<u64>,
}

/// IVF backend: k-means centroids route vectors and queries to partitions.
pub struct IvfFlatBackend {
    metric: DistanceMetric,
    dimension: usize,
    nlist: usize,
    default_nprobe: usize,
    centroids: Vec<Vec<f32>>,
    partitions: Vec<Vec<Vector>>,
    id_to_partition: HashMap<VectorId, usize>,
    tombstones: RoaringTreemap,
    trained: bool,
    distance_computations: AtomicU64,
}

impl Default for IvfFlatBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl IvfFlatBackend {
    /// Create an untrained backend with default tuning.
    pub fn new() -> Self {
        Self {
            metric: DistanceMetric::L2,
            dimension: 0,
            nlist: 100,
            default_nprobe: 1,
            centroids: Vec::new(),
            partitions: Vec::new(),
            id_to_partition: HashMap::new(),
            tombstones: RoaringTreemap::new(),
            trained: false,
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

    /// Learn centroids from raw sample vectors, clearing any indexed data.
    fn learn_centroids(&mut self, samples: &[&[f32]], nlist: usize) -> Result<()> {
        if samples.len() < nlist {
            return Err(EmberDbError::insufficient_vectors(nlist, samples.len()));
        }

        let mut kmeans = KMeans::new(nlist);
        kmeans.fit(samples);

        self.nlist = nlist;
        self.centroids = kmeans.centroids;
        self.partitions = (0..self.centroids.len()).map(|_| Vec::new()).collect();
        self.id_to_partition.clear();
        self.tombstones.clear();
        self.trained = true;
        Ok(())
    }

    fn assign_entry(&mut self, entry: &Vector) {
        let partition = nearest_centroid(&self.centroids, &entry.data);
        self.tombstones.remove(entry.id.as_u64());
        self.id_to_partition.insert(entry.id, partition);
        self.partitions[partition].push(entry.clone());
    }

    /// Indices of the `nprobe` partitions nearest to the query.
    fn probe_order(&self, query: &[f32], nprobe: usize) -> Vec<usize> {
        let mut centroid_distances: Vec<(usize, f32)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(idx, c)| (idx, euclidean_distance_squared(query, c)))
            .collect();

        centroid_distances
            .sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));

        centroid_distances
            .into_iter()
            .take(nprobe)
            .map(|(idx, _)| idx)
            .collect()
    }

    fn effective_nprobe(&self, params: &AlgorithmParams) -> usize {
        params
            .get_or("nprobe", self.default_nprobe)
            .clamp(1, self.centroids.len().max(1))
    }
}

/// Index of the centroid nearest to `vector` under squared L2.
fn nearest_centroid(centroids: &[Vec<f32>], vector: &[f32]) -> usize {
    centroids
        .iter()
        .enumerate()
        .map(|(idx, c)| (idx, euclidean_distance_squared(vector, c)))
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))
        .map(|(idx, _)| idx)
        .unwrap_or(0)
}

impl AnnBackend for IvfFlatBackend {
    fn name(&self) -> &'static str {
        IVF_FLAT_NAME
    }

    fn version(&self) -> &'static str {
        "1.0.0"
    }

    fn description(&self) -> &'static str {
        "Inverted file index with flat storage and k-means partitioning"
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
        self.nlist = config.nlist.max(1) as usize;
        Ok(())
    }

    fn train(&mut self, samples: &[Vec<f32>], params: &AlgorithmParams) -> Result<()> {
        let nlist = params.get_or("nlist", self.nlist).max(1);
        for sample in samples {
            self.check_dimension(sample)?;
        }
        let refs: Vec<&[f32]> = samples.iter().map(|v| v.as_slice()).collect();
        self.learn_centroids(&refs, nlist)
    }

    fn fit(&mut self, entries: &[Vector], params: &AlgorithmParams) -> Result<BuildReport> {
        let start = Instant::now();

        let nlist = params.get_or("nlist", self.nlist).max(1);
        for entry in entries {
            self.check_dimension(&entry.data)?;
        }

        let refs: Vec<&[f32]> = entries.iter().map(|e| &e.data[..]).collect();
        self.learn_centroids(&refs, nlist)?;

        for entry in entries {
            self.assign_entry(entry);
        }

        let sizes: Vec<usize> = self.partitions.iter().map(|p| p.len()).collect();
        let mut metrics = HashMap::new();
        metrics.insert("num_partitions".to_string(), self.partitions.len() as f64);
        metrics.insert(
            "partition_size_max".to_string(),
            sizes.iter().copied().max().unwrap_or(0) as f64,
        );
        metrics.insert(
            "partition_size_min".to_string(),
            sizes.iter().copied().min().unwrap_or(0) as f64,
        );

        Ok(BuildReport {
            entries_indexed: entries.len(),
            build_time: start.elapsed(),
            metrics,
        })
    }

    fn add(&mut self, entries: &[Vector]) -> Result<()> {
        if !self.trained {
            return Err(EmberDbError::NotTrained);
        }
        for entry in entries {
            self.check_dimension(&entry.data)?;
        }
        for entry in entries {
            self.assign_entry(entry);
        }
        Ok(())
    }

    fn remove(&mut self, ids: &[VectorId]) -> Result<()> {
        for id in ids {
            if self.id_to_partition.contains_key(id) {
                self.tombstones.insert(id.as_u64());
            }
        }
        Ok(())
    }

    fn search(
        &self,
        query: &[f32],
        k: usize,
        params: &AlgorithmParams,
    ) -> Result<Vec<(VectorId, f32)>> {
        if !self.trained {
            return Err(EmberDbError::NotTrained);
        }
        if k == 0 {
            return Ok(Vec::new());
        }
        if self.dimension != 0 && query.len() != self.dimension {
            return Err(EmberDbError::dimension_mismatch(self.dimension, query.len()));
        }

        let nprobe = self.effective_nprobe(params);
        let mut heap: BinaryHeap<ScoredCandidate> = BinaryHeap::with_capacity(k);
        let mut computed = 0u64;

        for partition_id in self.probe_order(query, nprobe) {
            for vector in &self.partitions[partition_id] {
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
        }

        self.distance_computations
            .fetch_add(computed, AtomicOrdering::Relaxed);

        let mut candidates: Vec<ScoredCandidate> = heap.into_iter().collect();
        candidates.sort_by(|a, b| a.key.partial_cmp(&b.key).unwrap_or(Ordering::Equal));
        Ok(candidates.into_iter().map(|c| (c.id, c.score)).collect())
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
        params: &AlgorithmParams,
    ) -> Result<Vec<(VectorId, f32)>> {
        if !self.trained {
            return Err(EmberDbError::NotTrained);
        }
        if self.dimension != 0 && query.len() != self.dimension {
            return Err(EmberDbError::dimension_mismatch(self.dimension, query.len()));
        }

        let nprobe = self.effective_nprobe(params);
        let mut results: Vec<(VectorId, f32)> = Vec::new();
        let mut computed = 0u64;

        for partition_id in self.probe_order(query, nprobe) {
            for vector in &self.partitions[partition_id] {
                if self.tombstones.contains(vector.id.as_u64()) {
                    continue;
                }
                let score = self.metric.compute(query, &vector.data);
                computed += 1;
                if self.metric.within_radius(score, radius) {
                    results.push((vector.id, score));
                }
            }
        }

        self.distance_computations
            .fetch_add(computed, AtomicOrdering::Relaxed);

        self.metric.sort_best_first(&mut results);
        Ok(results)
    }

    fn save(&self, path: &Path) -> Result<()> {
        let state = IvfFlatState {
            metric_code: self.metric.code(),
            dimension: self.dimension as u64,
            nlist: self.nlist as u64,
            centroids: self.centroids.clone(),
            partitions: self
                .partitions
                .iter()
                .map(|partition| {
                    partition
                        .iter()
                        .map(|v| (v.id.as_u64(), v.data.to_vec()))
                        .collect()
                })
                .collect(),
            tombstones: self.tombstones.iter().collect(),
        };
        let body = bincode::serialize(&state)?;
        persistence::write_blob(path, IVF_FLAT_NAME, &body)
    }

    fn load(&mut self, path: &Path) -> Result<usize> {
        let body = persistence::read_blob(path, IVF_FLAT_NAME)?;
        let state: IvfFlatState = bincode::deserialize(&body)?;

        self.metric = DistanceMetric::from_code(state.metric_code)
            .ok_or_else(|| EmberDbError::invalid_format("unknown metric code in blob"))?;
        self.dimension = state.dimension as usize;
        self.nlist = state.nlist as usize;
        self.centroids = state.centroids;

        self.partitions = state
            .partitions
            .into_iter()
            .map(|partition| {
                partition
                    .into_iter()
                    .map(|(raw_id, data)| Vector::new(VectorId(raw_id), data))
                    .collect()
            })
            .collect();

        self.id_to_partition.clear();
        for (partition_id, partition) in self.partitions.iter().enumerate() {
            for vector in partition {
                self.id_to_partition.insert(vector.id, partition_id);
            }
        }

        self.tombstones.clear();
        for raw_id in state.tombstones {
            self.tombstones.insert(raw_id);
        }

        self.trained = !self.centroids.is_empty();
        Ok(self.len())
    }

    fn is_trained(&self) -> bool {
        self.trained
    }

    fn len(&self) -> usize {
        self.id_to_partition.len() - self.tombstones.len() as usize
    }

    fn stats(&self) -> HashMap<String, f64> {
        let sizes: Vec<usize> = self.partitions.iter().map(|p| p.len()).collect();
        let mut stats = HashMap::new();
        stats.insert("num_vectors".to_string(), self.len() as f64);
        stats.insert("num_partitions".to_string(), self.partitions.len() as f64);
        stats.insert("num_tombstones".to_string(), self.tombstones.len() as f64);
        stats.insert(
            "partition_size_max".to_string(),
            sizes.iter().copied().max().unwrap_or(0) as f64,
        );
        stats.insert(
            "distance_computations".to_string(),
            self.distance_computations.load(AtomicOrdering::Relaxed) as f64,
        );
        stats
    }
}

/// Factory for [`IvfFlatBackend`].
pub struct IvfFlatFactory;

impl BackendFactory for IvfFlatFactory {
    fn backend_name(&self) -> &'static str {
        IVF_FLAT_NAME
    }

    fn description(&self) -> &'static str {
        "Inverted file index with flat storage and k-means partitioning"
    }

    fn supported_metrics(&self) -> Vec<DistanceMetric> {
        vec![
            DistanceMetric::L2,
            DistanceMetric::InnerProduct,
            DistanceMetric::Cosine,
        ]
    }

    fn create(&self) -> Box<dyn AnnBackend> {
        Box::new(IvfFlatBackend::new())
    }
}
