//! Core types shared across the database.
//!
//! `VectorId` is a newtype over `u64` so an id can never be confused with a
//! backend position or a raw count. The remaining types mirror the public
//! query surface: result records and search parameters.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// String-keyed attributes attached to a vector.
///
/// Keys are unique within a record; the map may be empty or absent for an id.
pub type Metadata = HashMap<String, String>;

/// A unique identifier for a vector in the database.
///
/// Ids are allocated monotonically starting at 1 and are stable for the life
/// of a database instance and across save/load. `VectorId::NONE` (0) is
/// reserved and never allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct VectorId(pub u64);

impl VectorId {
    /// The reserved "no vector" id.
    pub const NONE: VectorId = VectorId(0);

    /// Create a new VectorId.
    #[inline]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw u64 value.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Check whether this is the reserved "none" id.
    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for VectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VectorId({})", self.0)
    }
}

impl From<u64> for VectorId {
    #[inline]
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<VectorId> for u64 {
    #[inline]
    fn from(id: VectorId) -> Self {
        id.0
    }
}

/// A single search hit: id, score, and optionally the record's metadata.
///
/// Scores are always in "best first" orientation for the configured metric:
/// L2 and cosine distances ascend, inner-product similarities descend.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    /// The id of the matched vector.
    pub id: VectorId,
    /// The score under the configured metric.
    pub score: f32,
    /// Metadata for the matched vector, when requested.
    pub metadata: Option<Metadata>,
}

impl QueryResult {
    /// Create a result without metadata.
    #[inline]
    pub fn new(id: impl Into<VectorId>, score: f32) -> Self {
        Self {
            id: id.into(),
            score,
            metadata: None,
        }
    }

    /// Create a result carrying metadata.
    pub fn with_metadata(id: impl Into<VectorId>, score: f32, metadata: Metadata) -> Self {
        Self {
            id: id.into(),
            score,
            metadata: Some(metadata),
        }
    }
}

/// Parameters controlling a search operation.
#[derive(Debug, Clone)]
pub struct SearchParams {
    /// Number of nearest neighbors to return.
    pub k: usize,
    /// Number of partitions to probe (IVF-style backends).
    pub nprobe: usize,
    /// Radius for range search; ignored by k-NN search.
    pub radius: Option<f32>,
    /// Whether to attach metadata to results.
    pub include_metadata: bool,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            k: 10,
            nprobe: 1,
            radius: None,
            include_metadata: true,
        }
    }
}

impl SearchParams {
    /// Parameters for a top-`k` search with defaults elsewhere.
    pub fn with_k(k: usize) -> Self {
        Self {
            k,
            ..Self::default()
        }
    }

    /// Set the number of probed partitions.
    pub fn nprobe(mut self, nprobe: usize) -> Self {
        self.nprobe = nprobe;
        self
    }

    /// Set the range-search radius.
    pub fn radius(mut self, radius: f32) -> Self {
        self.radius = Some(radius);
        self
    }

    /// Set whether metadata is attached to results.
    pub fn include_metadata(mut self, include: bool) -> Self {
        self.include_metadata = include;
        self
    }
}
