//! Query engine: k-NN, filtered, batch, range, hybrid, and reranked search.
//!
//! The engine composes the vector store and the metadata store without
//! mutating either. Each public operation records a [`SearchStats`] snapshot
//! describing the most recent search on this engine instance; concurrent
//! searches on one engine may interleave their snapshots.

use crate::constants::query::{
    DEFAULT_RERANK_K, DEFAULT_TEXT_WEIGHT, DEFAULT_VECTOR_WEIGHT, HYBRID_CANDIDATE_FACTOR,
    OVERFETCH_CEILING, OVERFETCH_FACTOR,
};
use crate::error::Result;
use crate::metadata::MetadataStore;
use crate::types::{Metadata, QueryResult, SearchParams, VectorId};
use crate::vector_store::VectorStore;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Statistics describing the most recent search on an engine instance.
#[derive(Debug, Clone, Default)]
pub struct SearchStats {
    /// Candidates produced by the vector store.
    pub total_candidates: usize,
    /// Candidates that survived filtering (equals `total_candidates` for
    /// unfiltered searches).
    pub filtered_candidates: usize,
    /// Results actually returned.
    pub final_results: usize,
    /// Time spent in the vector store.
    pub search_time: Duration,
    /// Time spent filtering and attaching metadata.
    pub filter_time: Duration,
    /// End-to-end time.
    pub total_time: Duration,
}

/// Scores a text query against a record's metadata. Higher is better.
pub trait TextScorer: Send + Sync {
    /// Relevance of `metadata` to `text_query`, in any non-negative scale;
    /// hybrid search min-max normalizes the scores within a candidate set.
    fn score(&self, text_query: &str, metadata: &Metadata) -> f32;
}

/// Default text scorer: 1.0 when any metadata value contains the query as a
/// substring, 0.0 otherwise.
pub struct SubstringScorer;

impl TextScorer for SubstringScorer {
    fn score(&self, text_query: &str, metadata: &Metadata) -> f32 {
        if metadata.values().any(|value| value.contains(text_query)) {
            1.0
        } else {
            0.0
        }
    }
}

/// Coordinates vector search and metadata lookup.
pub struct QueryEngine {
    vector_store: Arc<VectorStore>,
    metadata_store: Arc<MetadataStore>,
    text_scorer: Option<Box<dyn TextScorer>>,
    last_stats: RwLock<SearchStats>,
}

impl QueryEngine {
    /// Create an engine over the two stores with the default substring
    /// text scorer.
    pub fn new(vector_store: Arc<VectorStore>, metadata_store: Arc<MetadataStore>) -> Self {
        Self {
            vector_store,
            metadata_store,
            text_scorer: Some(Box::new(SubstringScorer)),
            last_stats: RwLock::new(SearchStats::default()),
        }
    }

    /// Replace the text scorer used by hybrid search.
    pub fn with_text_scorer(mut self, scorer: Box<dyn TextScorer>) -> Self {
        self.text_scorer = Some(scorer);
        self
    }

    /// Remove the text scorer; hybrid search then reduces to plain k-NN.
    pub fn without_text_scorer(mut self) -> Self {
        self.text_scorer = None;
        self
    }

    /// Plain k-NN search.
    pub fn search(&self, query: &[f32], params: &SearchParams) -> Result<Vec<QueryResult>> {
        let start = Instant::now();
        let hits = self.vector_store.search(query, params)?;
        let search_time = start.elapsed();

        let results = self.attach_metadata(hits, params.include_metadata);
        let total_time = start.elapsed();

        self.update_stats(SearchStats {
            total_candidates: results.len(),
            filtered_candidates: results.len(),
            final_results: results.len(),
            search_time,
            filter_time: total_time.saturating_sub(search_time),
            total_time,
        });
        Ok(results)
    }

    /// Filtered search with adaptive overfetch.
    ///
    /// Starts by requesting `k * 4` candidates and doubles the factor while
    /// fewer than `k` pass the predicate, stopping once the store returns
    /// fewer candidates than requested (the dataset is exhausted) or the
    /// factor reaches its ceiling. Ids without metadata are evaluated
    /// against an empty map.
    pub fn filtered_search(
        &self,
        query: &[f32],
        params: &SearchParams,
        filter: impl Fn(&Metadata) -> bool,
    ) -> Result<Vec<QueryResult>> {
        let start = Instant::now();
        let mut factor = OVERFETCH_FACTOR;
        let mut search_time = Duration::ZERO;
        let mut candidates: Vec<(VectorId, f32)>;
        let mut passing: Vec<(VectorId, f32, Metadata)>;

        loop {
            let fetch_k = params.k.saturating_mul(factor);
            let mut request = params.clone();
            request.k = fetch_k;

            let fetch_start = Instant::now();
            candidates = self.vector_store.search(query, &request)?;
            search_time += fetch_start.elapsed();

            passing = Vec::new();
            for (id, score) in &candidates {
                let metadata = self.metadata_store.get_metadata(*id).unwrap_or_default();
                if filter(&metadata) {
                    passing.push((*id, *score, metadata));
                }
            }

            let exhausted = candidates.len() < fetch_k;
            if passing.len() >= params.k || exhausted || factor >= OVERFETCH_CEILING {
                break;
            }
            factor *= 2;
        }

        let filtered_count = passing.len();
        passing.truncate(params.k);

        let results: Vec<QueryResult> = passing
            .into_iter()
            .map(|(id, score, metadata)| QueryResult {
                id,
                score,
                metadata: params.include_metadata.then_some(metadata),
            })
            .collect();

        let total_time = start.elapsed();
        self.update_stats(SearchStats {
            total_candidates: candidates.len(),
            filtered_candidates: filtered_count,
            final_results: results.len(),
            search_time,
            filter_time: total_time.saturating_sub(search_time),
            total_time,
        });
        Ok(results)
    }

    /// Filtered search matching one metadata key/value pair exactly.
    pub fn search_with_metadata(
        &self,
        query: &[f32],
        params: &SearchParams,
        key: &str,
        value: &str,
    ) -> Result<Vec<QueryResult>> {
        self.filtered_search(query, params, |metadata| {
            metadata.get(key).map(String::as_str) == Some(value)
        })
    }

    /// Batch k-NN search through the backend's native batch call.
    pub fn batch_search(
        &self,
        queries: &[Vec<f32>],
        params: &SearchParams,
    ) -> Result<Vec<Vec<QueryResult>>> {
        let start = Instant::now();
        let batches = self.vector_store.batch_search(queries, params)?;
        let search_time = start.elapsed();

        let results: Vec<Vec<QueryResult>> = batches
            .into_iter()
            .map(|hits| self.attach_metadata(hits, params.include_metadata))
            .collect();

        let returned: usize = results.iter().map(Vec::len).sum();
        let total_time = start.elapsed();
        self.update_stats(SearchStats {
            total_candidates: returned,
            filtered_candidates: returned,
            final_results: returned,
            search_time,
            filter_time: total_time.saturating_sub(search_time),
            total_time,
        });
        Ok(results)
    }

    /// Per-query filtered search over a batch.
    pub fn batch_filtered_search(
        &self,
        queries: &[Vec<f32>],
        params: &SearchParams,
        filter: impl Fn(&Metadata) -> bool,
    ) -> Result<Vec<Vec<QueryResult>>> {
        queries
            .iter()
            .map(|query| self.filtered_search(query, params, &filter))
            .collect()
    }

    /// Every hit within `radius` under the configured metric, best first.
    pub fn range_search(
        &self,
        query: &[f32],
        radius: f32,
        params: &SearchParams,
    ) -> Result<Vec<QueryResult>> {
        let start = Instant::now();
        let hits = self.vector_store.range_search(query, radius, params)?;
        let search_time = start.elapsed();

        let results = self.attach_metadata(hits, params.include_metadata);
        let total_time = start.elapsed();

        self.update_stats(SearchStats {
            total_candidates: results.len(),
            filtered_candidates: results.len(),
            final_results: results.len(),
            search_time,
            filter_time: total_time.saturating_sub(search_time),
            total_time,
        });
        Ok(results)
    }

    /// Hybrid vector + text search.
    ///
    /// Fetches `k * 2` vector candidates, scores each against `text_query`
    /// with the configured text scorer, min-max normalizes both sub-scores
    /// to [0, 1] within the candidate set (inverting distance-oriented
    /// vector scores so 1 is best), and ranks by
    /// `vector_weight * v_norm + text_weight * t_norm`, descending.
    ///
    /// An empty text query or an engine without a text scorer reduces to
    /// plain k-NN.
    pub fn hybrid_search(
        &self,
        query: &[f32],
        params: &SearchParams,
        text_query: &str,
        vector_weight: f32,
        text_weight: f32,
    ) -> Result<Vec<QueryResult>> {
        let scorer = match (&self.text_scorer, text_query.is_empty()) {
            (Some(scorer), false) => scorer,
            _ => {
                return self.search(query, params);
            }
        };

        let start = Instant::now();
        let mut fetch = params.clone();
        fetch.k = params.k.saturating_mul(HYBRID_CANDIDATE_FACTOR);
        let candidates = self.vector_store.search(query, &fetch)?;
        let search_time = start.elapsed();

        let with_metadata: Vec<(VectorId, f32, Metadata)> = candidates
            .iter()
            .map(|(id, score)| {
                let metadata = self.metadata_store.get_metadata(*id).unwrap_or_default();
                (*id, *score, metadata)
            })
            .collect();

        let vector_norms = normalize_scores(
            &with_metadata.iter().map(|(_, s, _)| *s).collect::<Vec<_>>(),
            // Distance metrics rank ascending, so invert to "1 is best"
            !self.vector_store.config().metric.sorts_descending(),
        );
        let text_scores: Vec<f32> = with_metadata
            .iter()
            .map(|(_, _, metadata)| scorer.score(text_query, metadata))
            .collect();
        let text_norms = normalize_scores(&text_scores, false);

        let mut ranked: Vec<QueryResult> = with_metadata
            .into_iter()
            .zip(vector_norms.iter().zip(text_norms.iter()))
            .map(|((id, _, metadata), (v_norm, t_norm))| QueryResult {
                id,
                score: vector_weight * v_norm + text_weight * t_norm,
                metadata: params.include_metadata.then_some(metadata),
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked.truncate(params.k);

        let total_time = start.elapsed();
        self.update_stats(SearchStats {
            total_candidates: candidates.len(),
            filtered_candidates: ranked.len(),
            final_results: ranked.len(),
            search_time,
            filter_time: total_time.saturating_sub(search_time),
            total_time,
        });
        Ok(ranked)
    }

    /// Hybrid search with the default weights.
    pub fn hybrid_search_default(
        &self,
        query: &[f32],
        params: &SearchParams,
        text_query: &str,
    ) -> Result<Vec<QueryResult>> {
        self.hybrid_search(
            query,
            params,
            text_query,
            DEFAULT_VECTOR_WEIGHT,
            DEFAULT_TEXT_WEIGHT,
        )
    }

    /// Rerank the top `rerank_k` candidates with a caller-supplied scoring
    /// function, then return the best `k` under the new scores.
    ///
    /// The function receives the query, the candidate's metadata, and its
    /// vector score; its return value replaces the score and candidates are
    /// re-sorted in the configured metric's orientation.
    pub fn search_with_rerank(
        &self,
        query: &[f32],
        params: &SearchParams,
        rerank_fn: impl Fn(&[f32], &Metadata, f32) -> f32,
        rerank_k: usize,
    ) -> Result<Vec<QueryResult>> {
        let start = Instant::now();
        let mut fetch = params.clone();
        fetch.k = rerank_k.max(params.k);
        let candidates = self.vector_store.search(query, &fetch)?;
        let search_time = start.elapsed();
        let total_candidates = candidates.len();

        let mut rescored: Vec<QueryResult> = candidates
            .into_iter()
            .map(|(id, score)| {
                let metadata = self.metadata_store.get_metadata(id).unwrap_or_default();
                let new_score = rerank_fn(query, &metadata, score);
                QueryResult {
                    id,
                    score: new_score,
                    metadata: params.include_metadata.then_some(metadata),
                }
            })
            .collect();

        let metric = self.vector_store.config().metric;
        rescored.sort_by(|a, b| metric.cmp_best_first(a.score, b.score));
        rescored.truncate(params.k);

        let total_time = start.elapsed();
        self.update_stats(SearchStats {
            total_candidates,
            filtered_candidates: rescored.len(),
            final_results: rescored.len(),
            search_time,
            filter_time: total_time.saturating_sub(search_time),
            total_time,
        });
        Ok(rescored)
    }

    /// Rerank with the default candidate pool size.
    pub fn search_with_rerank_default(
        &self,
        query: &[f32],
        params: &SearchParams,
        rerank_fn: impl Fn(&[f32], &Metadata, f32) -> f32,
    ) -> Result<Vec<QueryResult>> {
        self.search_with_rerank(query, params, rerank_fn, DEFAULT_RERANK_K)
    }

    /// Snapshot of the statistics recorded by the most recent search.
    pub fn get_last_search_stats(&self) -> SearchStats {
        self.last_stats.read().clone()
    }

    fn attach_metadata(&self, hits: Vec<(VectorId, f32)>, include: bool) -> Vec<QueryResult> {
        hits.into_iter()
            .map(|(id, score)| QueryResult {
                id,
                score,
                metadata: include
                    .then(|| self.metadata_store.get_metadata(id).unwrap_or_default()),
            })
            .collect()
    }

    fn update_stats(&self, stats: SearchStats) {
        *self.last_stats.write() = stats;
    }
}

/// Min-max normalize scores to [0, 1]; `invert` flips orientation so that
/// 1 is always "best". A degenerate range maps every score to 1.0.
fn normalize_scores(scores: &[f32], invert: bool) -> Vec<f32> {
    let Some((min, max)) = min_max(scores) else {
        return Vec::new();
    };
    let range = max - min;

    scores
        .iter()
        .map(|&score| {
            let norm = if range < f32::EPSILON {
                1.0
            } else {
                (score - min) / range
            };
            if invert {
                1.0 - norm
            } else {
                norm
            }
        })
        .collect()
}

/// Single-pass min/max computation.
fn min_max(scores: &[f32]) -> Option<(f32, f32)> {
    if scores.is_empty() {
        return None;
    }
    let mut min = f32::MAX;
    let mut max = f32::MIN;
    for &score in scores {
        if score < min {
            min = score;
        }
        if score > max {
            max = score;
        }
    }
    Some((min, max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;

    fn engine_with_grid() -> (QueryEngine, Vec<VectorId>) {
        let vector_store = Arc::new(VectorStore::new(DatabaseConfig::new(2)).unwrap());
        let metadata_store = Arc::new(MetadataStore::new());

        let mut ids = Vec::new();
        for i in 0..20 {
            let id = vector_store.add_vector(vec![i as f32, 0.0]).unwrap();
            let mut metadata = Metadata::new();
            metadata.insert(
                "parity".to_string(),
                if i % 2 == 0 { "even" } else { "odd" }.to_string(),
            );
            metadata.insert("text".to_string(), format!("point number {i}"));
            metadata_store.set_metadata(id, metadata).unwrap();
            ids.push(id);
        }

        (QueryEngine::new(vector_store, metadata_store), ids)
    }

    #[test]
    fn test_search_attaches_metadata() {
        let (engine, ids) = engine_with_grid();
        let results = engine
            .search(&[0.0, 0.0], &SearchParams::with_k(1))
            .unwrap();
        assert_eq!(results[0].id, ids[0]);
        assert_eq!(
            results[0].metadata.as_ref().unwrap()["parity"],
            "even"
        );

        let results = engine
            .search(&[0.0, 0.0], &SearchParams::with_k(1).include_metadata(false))
            .unwrap();
        assert!(results[0].metadata.is_none());
    }

    #[test]
    fn test_search_updates_stats() {
        let (engine, _) = engine_with_grid();
        engine
            .search(&[0.0, 0.0], &SearchParams::with_k(5))
            .unwrap();

        let stats = engine.get_last_search_stats();
        assert_eq!(stats.total_candidates, 5);
        assert_eq!(stats.final_results, 5);
        assert!(stats.total_time >= stats.search_time);
    }

    #[test]
    fn test_filtered_search_overfetches_until_k() {
        let (engine, _) = engine_with_grid();
        // Ten of twenty vectors are "odd"; k=8 needs overfetch past 8 hits
        let results = engine
            .filtered_search(&[0.0, 0.0], &SearchParams::with_k(8), |m| {
                m.get("parity").map(String::as_str) == Some("odd")
            })
            .unwrap();

        assert_eq!(results.len(), 8);
        for pair in results.windows(2) {
            assert!(pair[0].score <= pair[1].score);
        }
        assert!(results
            .iter()
            .all(|r| r.metadata.as_ref().unwrap()["parity"] == "odd"));
    }

    #[test]
    fn test_filtered_search_accept_all_equals_knn() {
        let (engine, _) = engine_with_grid();
        let plain = engine
            .search(&[5.0, 0.0], &SearchParams::with_k(6))
            .unwrap();
        let filtered = engine
            .filtered_search(&[5.0, 0.0], &SearchParams::with_k(6), |_| true)
            .unwrap();

        assert_eq!(
            plain.iter().map(|r| r.id).collect::<Vec<_>>(),
            filtered.iter().map(|r| r.id).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_filtered_search_reject_all() {
        let (engine, _) = engine_with_grid();
        let results = engine
            .filtered_search(&[0.0, 0.0], &SearchParams::with_k(5), |_| false)
            .unwrap();
        assert!(results.is_empty());

        let stats = engine.get_last_search_stats();
        assert_eq!(stats.filtered_candidates, 0);
        // The engine kept widening until it had scanned the whole store
        assert_eq!(stats.total_candidates, 20);
    }

    #[test]
    fn test_batch_search_order_preserved() {
        let (engine, ids) = engine_with_grid();
        let queries = vec![vec![0.0, 0.0], vec![19.0, 0.0]];
        let batches = engine
            .batch_search(&queries, &SearchParams::with_k(1))
            .unwrap();

        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0][0].id, ids[0]);
        assert_eq!(batches[1][0].id, ids[19]);
    }

    #[test]
    fn test_range_search() {
        let (engine, _) = engine_with_grid();
        let results = engine
            .range_search(&[0.0, 0.0], 2.5, &SearchParams::default())
            .unwrap();
        // Points at distance 0, 1, 2
        assert_eq!(results.len(), 3);
        for pair in results.windows(2) {
            assert!(pair[0].score <= pair[1].score);
        }
    }

    #[test]
    fn test_hybrid_reduces_to_knn_without_text() {
        let (engine, _) = engine_with_grid();
        let plain = engine
            .search(&[3.0, 0.0], &SearchParams::with_k(4))
            .unwrap();
        let hybrid = engine
            .hybrid_search(&[3.0, 0.0], &SearchParams::with_k(4), "", 0.7, 0.3)
            .unwrap();

        assert_eq!(
            plain.iter().map(|r| r.id).collect::<Vec<_>>(),
            hybrid.iter().map(|r| r.id).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_hybrid_text_match_boosts() {
        let (engine, ids) = engine_with_grid();
        // "point number 7" matches exactly one candidate's metadata
        let results = engine
            .hybrid_search(
                &[6.0, 0.0],
                &SearchParams::with_k(3),
                "point number 7",
                0.3,
                0.7,
            )
            .unwrap();
        assert_eq!(results[0].id, ids[7]);
    }

    #[test]
    fn test_hybrid_weights() {
        // Candidate 1: best vector score, no text match.
        // Candidate 2: worst vector score, text match.
        let vector_store = Arc::new(VectorStore::new(DatabaseConfig::new(1)).unwrap());
        let metadata_store = Arc::new(MetadataStore::new());

        let a = vector_store.add_vector(vec![0.0]).unwrap();
        let b = vector_store.add_vector(vec![1.0]).unwrap();
        let mut meta_b = Metadata::new();
        meta_b.insert("text".to_string(), "needle".to_string());
        metadata_store.set_metadata(b, meta_b).unwrap();

        let engine = QueryEngine::new(vector_store, metadata_store);
        let results = engine
            .hybrid_search(&[0.0], &SearchParams::with_k(2), "needle", 0.7, 0.3)
            .unwrap();

        // v_norms are [1, 0], t_norms are [0, 1]: 0.7 beats 0.3
        assert_eq!(results[0].id, a);
        assert!((results[0].score - 0.7).abs() < 1e-6);
        assert_eq!(results[1].id, b);
        assert!((results[1].score - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_rerank() {
        let (engine, ids) = engine_with_grid();
        // Rerank to prefer "odd" vectors regardless of distance
        let results = engine
            .search_with_rerank(
                &[0.0, 0.0],
                &SearchParams::with_k(3),
                |_query, metadata, score| {
                    if metadata.get("parity").map(String::as_str) == Some("odd") {
                        score
                    } else {
                        score + 1000.0
                    }
                },
                20,
            )
            .unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].id, ids[1]);
        assert!(results
            .iter()
            .all(|r| r.metadata.as_ref().unwrap()["parity"] == "odd"));
    }

    #[test]
    fn test_rerank_identity_is_noop() {
        let (engine, _) = engine_with_grid();
        let plain = engine
            .search(&[4.0, 0.0], &SearchParams::with_k(5))
            .unwrap();
        let reranked = engine
            .search_with_rerank(
                &[4.0, 0.0],
                &SearchParams::with_k(5),
                |_, _, score| score,
                20,
            )
            .unwrap();

        assert_eq!(
            plain.iter().map(|r| r.id).collect::<Vec<_>>(),
            reranked.iter().map(|r| r.id).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_normalize_scores() {
        let norms = normalize_scores(&[1.0, 3.0, 2.0], false);
        assert_eq!(norms, vec![0.0, 1.0, 0.5]);

        let inverted = normalize_scores(&[1.0, 3.0, 2.0], true);
        assert_eq!(inverted, vec![1.0, 0.0, 0.5]);

        // Degenerate range maps to 1.0
        assert_eq!(normalize_scores(&[2.0, 2.0], false), vec![1.0, 1.0]);
        assert!(normalize_scores(&[], false).is_empty());
    }
}
