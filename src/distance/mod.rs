//! Distance metrics and score orientation.
//!
//! Every score in the crate flows through [`DistanceMetric`]: backends use
//! [`DistanceMetric::compute`] to score candidates, and the vector store uses
//! the orientation helpers to keep results in "best first" order regardless
//! of whether the metric is a distance (smaller is better) or a similarity
//! (larger is better). Callers never see raw backend orientation.

pub mod scalar;

pub use scalar::{cosine_distance, dot_product, euclidean_distance, euclidean_distance_squared};

use crate::error::{EmberDbError, Result};
use std::cmp::Ordering;

/// Supported distance metrics for similarity search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DistanceMetric {
    /// Euclidean (L2) distance: sqrt(sum((a[i] - b[i])^2)). Smaller is better.
    L2,
    /// Inner product: sum(a[i] * b[i]). Larger is better.
    InnerProduct,
    /// Cosine distance: 1 - cosine_similarity(a, b). Smaller is better.
    Cosine,
}

impl DistanceMetric {
    /// Compute the score between two vectors under this metric.
    ///
    /// # Panics
    /// Panics if the vectors have different dimensions.
    #[inline]
    pub fn compute(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::L2 => euclidean_distance(a, b),
            DistanceMetric::InnerProduct => dot_product(a, b),
            DistanceMetric::Cosine => cosine_distance(a, b),
        }
    }

    /// True when larger scores are better (similarity metrics).
    #[inline]
    pub fn sorts_descending(&self) -> bool {
        matches!(self, DistanceMetric::InnerProduct)
    }

    /// Compare two scores so that `Less` means "a ranks before b".
    #[inline]
    pub fn cmp_best_first(&self, a: f32, b: f32) -> Ordering {
        let ord = a.partial_cmp(&b).unwrap_or(Ordering::Equal);
        if self.sorts_descending() {
            ord.reverse()
        } else {
            ord
        }
    }

    /// Sort results in place into "best first" order.
    pub fn sort_best_first(&self, results: &mut [(crate::types::VectorId, f32)]) {
        results.sort_by(|a, b| self.cmp_best_first(a.1, b.1));
    }

    /// Whether a score falls within `radius` under this metric.
    ///
    /// Distance metrics accept scores at or below the radius; similarity
    /// metrics accept scores at or above it.
    #[inline]
    pub fn within_radius(&self, score: f32, radius: f32) -> bool {
        if self.sorts_descending() {
            score >= radius
        } else {
            score <= radius
        }
    }

    /// Stable integer code used in the persisted config file.
    pub fn code(&self) -> u32 {
        match self {
            DistanceMetric::L2 => 0,
            DistanceMetric::InnerProduct => 1,
            DistanceMetric::Cosine => 2,
        }
    }

    /// Convert from a persisted integer code.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(DistanceMetric::L2),
            1 => Some(DistanceMetric::InnerProduct),
            2 => Some(DistanceMetric::Cosine),
            _ => None,
        }
    }

    /// Canonical string name.
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::L2 => "L2",
            DistanceMetric::InnerProduct => "INNER_PRODUCT",
            DistanceMetric::Cosine => "COSINE",
        }
    }
}

impl std::fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DistanceMetric {
    type Err = EmberDbError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "L2" => Ok(DistanceMetric::L2),
            "INNER_PRODUCT" => Ok(DistanceMetric::InnerProduct),
            "COSINE" => Ok(DistanceMetric::Cosine),
            other => Err(EmberDbError::invalid_parameter(format!(
                "unknown distance metric: {other}"
            ))),
        }
    }
}
