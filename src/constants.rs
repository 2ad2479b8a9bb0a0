//! Named constants for configuration values.
//!
//! Centralizes magic numbers and default values used throughout the
//! codebase, making them easier to find, document, and tune.

/// Constants for the query engine.
pub mod query {
    /// Initial overfetch multiplier for filtered search.
    /// The engine requests `k * OVERFETCH_FACTOR` candidates before filtering.
    pub const OVERFETCH_FACTOR: usize = 4;

    /// Ceiling for the adaptive overfetch multiplier.
    /// Doubling stops once the factor reaches this value.
    pub const OVERFETCH_CEILING: usize = 64;

    /// Default number of candidates fetched for reranking.
    pub const DEFAULT_RERANK_K: usize = 100;

    /// Candidate multiplier for hybrid search.
    /// Hybrid scoring considers `k * HYBRID_CANDIDATE_FACTOR` vector hits.
    pub const HYBRID_CANDIDATE_FACTOR: usize = 2;

    /// Default weight of the vector score in hybrid search.
    pub const DEFAULT_VECTOR_WEIGHT: f32 = 0.7;

    /// Default weight of the text score in hybrid search.
    pub const DEFAULT_TEXT_WEIGHT: f32 = 0.3;
}

/// Constants for k-means clustering.
pub mod kmeans {
    /// Threshold for switching from k-means++ to random initialization.
    /// k-means++ has O(k²n) complexity, which becomes expensive for large k.
    pub const KMEANSPP_THRESHOLD: usize = 64;

    /// Convergence threshold for early stopping.
    /// Training stops when centroid movement falls below this value.
    pub const CONVERGENCE_THRESHOLD: f32 = 0.001;

    /// Default number of iterations for IVF centroid training.
    pub const DEFAULT_MAX_ITERATIONS: usize = 100;
}

/// Constants for metadata records.
pub mod metadata {
    /// Maximum number of fields in a single record.
    pub const MAX_FIELDS: usize = 1000;

    /// Maximum length of a metadata key in bytes.
    pub const MAX_KEY_LEN: usize = 256;

    /// Maximum length of a metadata value in bytes.
    pub const MAX_VALUE_LEN: usize = 10_000;
}

/// Constants for linear scans.
pub mod scan {
    /// Chunk size for parallel brute force search.
    /// Sized to fit multiple vectors in L2 cache.
    pub const BRUTE_FORCE_CHUNK_SIZE: usize = 1000;

    /// Minimum index size before the brute force backend scans in parallel.
    /// Below this, rayon's fork/join overhead dominates.
    pub const PARALLEL_THRESHOLD: usize = 2048;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overfetch_bounds() {
        assert!(query::OVERFETCH_FACTOR >= 1);
        assert!(query::OVERFETCH_CEILING >= query::OVERFETCH_FACTOR);
    }

    #[test]
    fn test_hybrid_weights_sum_to_one() {
        assert!((query::DEFAULT_VECTOR_WEIGHT + query::DEFAULT_TEXT_WEIGHT - 1.0).abs() < 1e-6);
    }
}
