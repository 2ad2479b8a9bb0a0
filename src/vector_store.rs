//! Canonical vector storage and backend lifecycle.
//!
//! The store owns two views of the dataset: the canonical insertion-ordered
//! array (authoritative, always complete) and the active backend's index (a
//! cache that can be rebuilt from the canonical array at any time). Writes
//! always land in the canonical array; they reach the backend immediately
//! when it is trained and supports incremental add, or at the next
//! train/build otherwise. Every search path passes the training gate first.
//!
//! A single mutex guards mutation, the training transition, and backend
//! delegation, so a vector is visible to every search that starts after its
//! add returns.

use crate::anns::{registry, AlgorithmParams, AnnBackend, BuildReport, BRUTE_FORCE_NAME, IVF_FLAT_NAME};
use crate::config::{DatabaseConfig, IndexType};
use crate::error::{EmberDbError, Result};
use crate::persistence::{path_with_suffix, read_f32_vec, read_u64, write_f32_slice, write_u64};
use crate::types::{SearchParams, VectorId};
use crate::vector::Vector;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

struct StoreInner {
    entries: Vec<Vector>,
    id_to_index: HashMap<VectorId, usize>,
    backend: Box<dyn AnnBackend>,
    backend_name: String,
    next_id: u64,
    /// Canonical entries not yet reflected in the backend.
    index_dirty: bool,
    /// Ids in the order they were handed to the backend.
    order: Vec<VectorId>,
    fallback_used: bool,
    rebuilt_on_load: bool,
    last_build: Option<BuildReport>,
}

/// Owner of the canonical dataset and the active ANN backend.
pub struct VectorStore {
    config: DatabaseConfig,
    inner: Mutex<StoreInner>,
}

impl VectorStore {
    /// Create a store for the given configuration, resolving the backend.
    ///
    /// An unknown `anns_algorithm` silently falls back to the brute force
    /// backend; the substitution is visible through [`VectorStore::stats`].
    pub fn new(config: DatabaseConfig) -> Result<Self> {
        config.validate()?;

        let requested = select_algorithm(&config);
        let (backend, backend_name, fallback_used) = match registry().create(requested) {
            Some(backend) => (backend, requested.to_string(), false),
            None => {
                tracing::warn!(
                    requested,
                    "ANN backend not registered, falling back to brute force"
                );
                let backend = registry().create(BRUTE_FORCE_NAME).ok_or_else(|| {
                    EmberDbError::backend("default brute_force backend is not registered")
                })?;
                (backend, BRUTE_FORCE_NAME.to_string(), true)
            }
        };

        let mut backend = backend;
        backend.initialize(&config)?;

        Ok(Self {
            config,
            inner: Mutex::new(StoreInner {
                entries: Vec::new(),
                id_to_index: HashMap::new(),
                backend,
                backend_name,
                next_id: 1,
                index_dirty: false,
                order: Vec::new(),
                fallback_used,
                rebuilt_on_load: false,
                last_build: None,
            }),
        })
    }

    /// The immutable configuration this store was built with.
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Configured vector dimension.
    pub fn dimension(&self) -> u32 {
        self.config.dimension
    }

    /// Name of the backend actually in use (after any fallback).
    pub fn backend_name(&self) -> String {
        self.inner.lock().backend_name.clone()
    }

    /// Number of vectors in the canonical store.
    pub fn size(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the given id is present.
    pub fn contains(&self, id: VectorId) -> bool {
        self.inner.lock().id_to_index.contains_key(&id)
    }

    /// Add a single vector, returning its freshly allocated id.
    pub fn add_vector(&self, data: Vec<f32>) -> Result<VectorId> {
        self.validate_dimension(&data)?;
        let mut inner = self.inner.lock();

        let id = VectorId(inner.next_id);
        inner.next_id += 1;

        let entry = Vector::new(id, data);
        let index = inner.entries.len();
        inner.entries.push(entry.clone());
        inner.id_to_index.insert(id, index);

        if inner.backend.is_trained() && inner.backend.supports_incremental_add() {
            if let Err(err) = inner.backend.add(&[entry]) {
                inner.index_dirty = true;
                return Err(err);
            }
            inner.order.push(id);
        } else {
            inner.index_dirty = true;
        }

        Ok(id)
    }

    /// Add a batch of vectors under one lock acquisition and one backend
    /// call, returning their ids in input order.
    pub fn add_vectors(&self, batch: Vec<Vec<f32>>) -> Result<Vec<VectorId>> {
        for data in &batch {
            self.validate_dimension(data)?;
        }
        let mut inner = self.inner.lock();

        let mut ids = Vec::with_capacity(batch.len());
        let mut new_entries = Vec::with_capacity(batch.len());
        for data in batch {
            let id = VectorId(inner.next_id);
            inner.next_id += 1;

            let entry = Vector::new(id, data);
            let index = inner.entries.len();
            inner.entries.push(entry.clone());
            inner.id_to_index.insert(id, index);
            ids.push(id);
            new_entries.push(entry);
        }

        if new_entries.is_empty() {
            return Ok(ids);
        }

        if inner.backend.is_trained() && inner.backend.supports_incremental_add() {
            if let Err(err) = inner.backend.add(&new_entries) {
                inner.index_dirty = true;
                return Err(err);
            }
            inner.order.extend(ids.iter().copied());
        } else {
            inner.index_dirty = true;
        }

        Ok(ids)
    }

    /// Remove a vector from the canonical store.
    ///
    /// Unknown ids fail with `NotFound`. The backend is told to invalidate
    /// the id when it supports deletes; otherwise the index is marked stale
    /// and refreshed at the next build.
    pub fn remove_vector(&self, id: VectorId) -> Result<()> {
        let mut inner = self.inner.lock();

        let index = inner
            .id_to_index
            .remove(&id)
            .ok_or(EmberDbError::NotFound(id.as_u64()))?;

        inner.entries.swap_remove(index);
        if index < inner.entries.len() {
            let moved = inner.entries[index].id;
            inner.id_to_index.insert(moved, index);
        }
        inner.order.retain(|&ordered| ordered != id);

        if inner.backend.supports_delete() {
            inner.backend.remove(&[id])?;
        } else {
            inner.index_dirty = true;
        }

        Ok(())
    }

    /// Top-k search delegated to the backend.
    ///
    /// Results come back normalized to "best first" order for the
    /// configured metric; callers never see raw backend orientation.
    pub fn search(&self, query: &[f32], params: &SearchParams) -> Result<Vec<(VectorId, f32)>> {
        self.validate_dimension(query)?;
        let mut inner = self.inner.lock();

        if inner.entries.is_empty() || params.k == 0 {
            return Ok(Vec::new());
        }
        self.ensure_ready(&mut inner)?;

        let query_params = self.compose_query_params(params);
        let raw = inner.backend.search(query, params.k, &query_params)?;
        Ok(self.normalize(&inner, raw))
    }

    /// Batch top-k search, preferring the backend's native batch call.
    pub fn batch_search(
        &self,
        queries: &[Vec<f32>],
        params: &SearchParams,
    ) -> Result<Vec<Vec<(VectorId, f32)>>> {
        for query in queries {
            self.validate_dimension(query)?;
        }
        let mut inner = self.inner.lock();

        if inner.entries.is_empty() || params.k == 0 {
            return Ok(queries.iter().map(|_| Vec::new()).collect());
        }
        self.ensure_ready(&mut inner)?;

        let query_params = self.compose_query_params(params);
        let raw = inner.backend.batch_search(queries, params.k, &query_params)?;
        Ok(raw
            .into_iter()
            .map(|results| self.normalize(&inner, results))
            .collect())
    }

    /// Range search: every hit within `radius` under the configured metric.
    pub fn range_search(
        &self,
        query: &[f32],
        radius: f32,
        params: &SearchParams,
    ) -> Result<Vec<(VectorId, f32)>> {
        self.validate_dimension(query)?;
        let mut inner = self.inner.lock();

        if inner.entries.is_empty() {
            return Ok(Vec::new());
        }
        self.ensure_ready(&mut inner)?;

        if !inner.backend.supports_range_query() {
            return Err(EmberDbError::unsupported(format!(
                "{} does not support range queries",
                inner.backend.name()
            )));
        }

        let query_params = self.compose_query_params(params);
        let raw = inner.backend.range_search(query, radius, &query_params)?;
        Ok(self.normalize(&inner, raw))
    }

    /// Build the backend index from the canonical store.
    ///
    /// For backends that require training this is the implicit training
    /// path; it fails with `InsufficientVectors` when the canonical store
    /// holds fewer than `nlist` vectors.
    pub fn build_index(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        self.fit_from_canonical(&mut inner)
    }

    /// Train the backend on caller-supplied vectors, then stream the full
    /// canonical store into it in one batched add.
    pub fn train_index(&self, samples: &[Vec<f32>]) -> Result<()> {
        for sample in samples {
            self.validate_dimension(sample)?;
        }
        let mut inner = self.inner.lock();

        let mut train_params = self.compose_build_params();
        train_params.set("training_size", samples.len());
        inner.backend.train(samples, &train_params)?;

        if inner.entries.is_empty() {
            inner.order.clear();
            inner.index_dirty = false;
            return Ok(());
        }

        if inner.backend.supports_incremental_add() {
            let entries = inner.entries.clone();
            inner.backend.add(&entries)?;
            let order: Vec<VectorId> = inner.entries.iter().map(|e| e.id).collect();
            inner.order = order;
            inner.index_dirty = false;
            Ok(())
        } else {
            self.fit_from_canonical(&mut inner)
        }
    }

    /// Whether the training gate is open: the backend is trained and the
    /// index reflects the canonical store.
    pub fn is_trained(&self) -> bool {
        let inner = self.inner.lock();
        inner.backend.is_trained() && !inner.index_dirty
    }

    /// Write the canonical vectors, the backend blob, and the id order
    /// sidecar. `path` is the `.vectors` file; the blob and sidecar are
    /// written next to it as `.anns` and `.order` suffixes.
    pub fn save(&self, path: &Path) -> Result<()> {
        let inner = self.inner.lock();

        let file = fs::File::create(path)?;
        let mut out = BufWriter::new(file);
        write_u64(&mut out, inner.entries.len() as u64)?;
        for entry in &inner.entries {
            write_u64(&mut out, entry.id.as_u64())?;
            write_u64(&mut out, entry.data.len() as u64)?;
            write_f32_slice(&mut out, &entry.data)?;
        }
        out.flush()?;
        drop(out);

        let anns_path = path_with_suffix(path, ".anns");
        let order_path = path_with_suffix(path, ".order");

        if inner.backend.is_trained() && !inner.index_dirty {
            inner.backend.save(&anns_path)?;

            let file = fs::File::create(&order_path)?;
            let mut out = BufWriter::new(file);
            write_u64(&mut out, inner.order.len() as u64)?;
            for id in &inner.order {
                write_u64(&mut out, id.as_u64())?;
            }
            out.flush()?;
        } else {
            // A stale blob from an earlier save would shadow the canonical
            // data on reload.
            let _ = fs::remove_file(&anns_path);
            let _ = fs::remove_file(&order_path);
        }

        Ok(())
    }

    /// Restore the canonical vectors, then try the backend blob and order
    /// sidecar. The vectors file is authoritative and fails loudly; the
    /// blob and sidecar are caches that are discarded on any mismatch, in
    /// which case the backend is rebuilt from the canonical vectors.
    pub fn load(&self, path: &Path) -> Result<()> {
        let mut inner = self.inner.lock();

        let file = fs::File::open(path)?;
        let mut input = BufReader::new(file);

        let count = read_u64(&mut input)?;
        let mut entries = Vec::new();
        let mut id_to_index = HashMap::new();
        let mut max_id = 0u64;

        for _ in 0..count {
            let raw_id = read_u64(&mut input)?;
            let dim = read_u64(&mut input)? as usize;
            if dim != self.config.dimension as usize {
                return Err(EmberDbError::invalid_format(format!(
                    "vector dimension {dim} does not match configured dimension {}",
                    self.config.dimension
                )));
            }
            let data = read_f32_vec(&mut input, dim)?;

            let id = VectorId(raw_id);
            id_to_index.insert(id, entries.len());
            entries.push(Vector::new(id, data));
            max_id = max_id.max(raw_id);
        }

        inner.entries = entries;
        inner.id_to_index = id_to_index;
        inner.next_id = max_id + 1;
        inner.order.clear();
        inner.last_build = None;

        // Fresh backend instance so state from a previous load cannot leak.
        self.reset_backend(&mut inner)?;

        if inner.entries.is_empty() {
            inner.index_dirty = false;
            return Ok(());
        }

        let anns_path = path_with_suffix(path, ".anns");
        let order_path = path_with_suffix(path, ".order");

        if self.try_restore_backend(&mut inner, &anns_path, &order_path) {
            inner.index_dirty = false;
            return Ok(());
        }

        // Blob missing or inconsistent: the canonical vectors win.
        self.reset_backend(&mut inner)?;
        match self.fit_from_canonical(&mut inner) {
            Ok(()) => {
                inner.rebuilt_on_load = true;
                tracing::warn!(path = %path.display(), "index blob unusable, rebuilt from canonical vectors");
                Ok(())
            }
            // Too few vectors to train: the gate simply stays closed.
            Err(EmberDbError::InsufficientVectors { .. }) => {
                inner.index_dirty = true;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Merged observability counters: backend stats plus store-level flags.
    pub fn stats(&self) -> HashMap<String, f64> {
        let inner = self.inner.lock();
        let mut stats = inner.backend.stats();
        stats.insert("size".to_string(), inner.entries.len() as f64);
        stats.insert("dimension".to_string(), self.config.dimension as f64);
        stats.insert(
            "fallback_used".to_string(),
            if inner.fallback_used { 1.0 } else { 0.0 },
        );
        stats.insert(
            "rebuilt_on_load".to_string(),
            if inner.rebuilt_on_load { 1.0 } else { 0.0 },
        );
        stats.insert(
            "trained".to_string(),
            if inner.backend.is_trained() && !inner.index_dirty {
                1.0
            } else {
                0.0
            },
        );
        if let Some(report) = &inner.last_build {
            stats.insert(
                "build_time_seconds".to_string(),
                report.build_time.as_secs_f64(),
            );
            stats.insert(
                "entries_indexed".to_string(),
                report.entries_indexed as f64,
            );
        }
        stats
    }

    fn validate_dimension(&self, data: &[f32]) -> Result<()> {
        if data.len() != self.config.dimension as usize {
            return Err(EmberDbError::dimension_mismatch(
                self.config.dimension as usize,
                data.len(),
            ));
        }
        Ok(())
    }

    /// Training gate plus lazy refresh of a stale-but-trained index.
    fn ensure_ready(&self, inner: &mut StoreInner) -> Result<()> {
        if !inner.backend.is_trained() {
            return Err(EmberDbError::NotTrained);
        }
        if inner.index_dirty {
            self.fit_from_canonical(inner)?;
        }
        Ok(())
    }

    /// Fit the backend from the canonical store and record the hand-off
    /// order. An empty canonical store leaves the backend untouched.
    fn fit_from_canonical(&self, inner: &mut StoreInner) -> Result<()> {
        if inner.entries.is_empty() {
            inner.order.clear();
            inner.index_dirty = false;
            return Ok(());
        }

        let build_params = self.compose_build_params();
        let entries = inner.entries.clone();
        let report = inner.backend.fit(&entries, &build_params)?;
        inner.last_build = Some(report);
        let order: Vec<VectorId> = inner.entries.iter().map(|e| e.id).collect();
        inner.order = order;
        inner.index_dirty = false;
        Ok(())
    }

    fn reset_backend(&self, inner: &mut StoreInner) -> Result<()> {
        let mut backend = registry().create(&inner.backend_name).ok_or_else(|| {
            EmberDbError::backend(format!(
                "backend {} is no longer registered",
                inner.backend_name
            ))
        })?;
        backend.initialize(&self.config)?;
        inner.backend = backend;
        Ok(())
    }

    /// Try to adopt a persisted backend blob. Returns true only when the
    /// blob and the order sidecar both agree with the canonical store.
    fn try_restore_backend(
        &self,
        inner: &mut StoreInner,
        anns_path: &Path,
        order_path: &Path,
    ) -> bool {
        let restored = match inner.backend.load(anns_path) {
            Ok(count) => count,
            Err(err) => {
                tracing::debug!(error = %err, "backend blob not loaded");
                return false;
            }
        };
        if restored != inner.entries.len() {
            tracing::debug!(
                restored,
                canonical = inner.entries.len(),
                "backend blob count disagrees with canonical store"
            );
            return false;
        }

        let order = match self.read_order_file(order_path) {
            Ok(order) => order,
            Err(err) => {
                tracing::debug!(error = %err, "order sidecar not loaded");
                return false;
            }
        };
        if order.len() != inner.entries.len()
            || !order.iter().all(|id| inner.id_to_index.contains_key(id))
        {
            tracing::debug!("order sidecar disagrees with canonical store");
            return false;
        }

        inner.order = order;
        true
    }

    fn read_order_file(&self, path: &Path) -> Result<Vec<VectorId>> {
        let file = fs::File::open(path)?;
        let mut input = BufReader::new(file);
        let count = read_u64(&mut input)?;
        let mut order = Vec::new();
        for _ in 0..count {
            order.push(VectorId(read_u64(&mut input)?));
        }
        Ok(order)
    }

    fn compose_build_params(&self) -> AlgorithmParams {
        let mut params = AlgorithmParams::new();
        params.set("metric", self.config.metric.code());
        params.set("dimension", self.config.dimension);
        params.set("nlist", self.config.nlist);
        params.extend_raw(&self.config.anns_build_params);
        params
    }

    fn compose_query_params(&self, search: &SearchParams) -> AlgorithmParams {
        let mut params = AlgorithmParams::new();
        params.extend_raw(&self.config.anns_query_params);
        if search.nprobe > 0 {
            params.set("nprobe", search.nprobe);
        }
        if let Some(radius) = search.radius {
            params.set("radius", radius);
        }
        params
    }

    /// Drop hits whose ids are no longer canonical and enforce best-first
    /// orientation for the configured metric.
    fn normalize(
        &self,
        inner: &StoreInner,
        mut results: Vec<(VectorId, f32)>,
    ) -> Vec<(VectorId, f32)> {
        results.retain(|(id, _)| inner.id_to_index.contains_key(id));
        self.config.metric.sort_best_first(&mut results);
        results
    }
}

/// Resolve the backend name for a configuration.
///
/// An explicit `anns_algorithm` wins. Otherwise the `index_type` hint
/// selects the closest registered family, so the choice survives reload
/// even though the persisted config carries only the hint.
fn select_algorithm(config: &DatabaseConfig) -> &str {
    let requested = config.anns_algorithm.as_str();
    if !requested.is_empty() && !requested.eq_ignore_ascii_case("auto") {
        return requested;
    }
    match config.index_type {
        IndexType::IvfFlat | IndexType::IvfPq => IVF_FLAT_NAME,
        IndexType::Hnsw => "hnsw",
        IndexType::Flat | IndexType::Auto => BRUTE_FORCE_NAME,
    }
}
