//! ember-db: an embeddable vector database in Rust.
//!
//! This crate stores fixed-dimension f32 vectors with string-keyed metadata
//! and answers approximate-nearest-neighbor queries with optional metadata
//! filtering. It is built for retrieval stacks where the application
//! computes embeddings elsewhere and needs sub-linear top-k search,
//! attribute filtering, and persistence in one embeddable component.
//!
//! # Features
//!
//! - **Pluggable ANN backends**: a process-wide registry of interchangeable
//!   index implementations behind one contract, with transparent fallback
//!   to exact search
//! - **Training discipline**: writes keep flowing while an IVF-style index
//!   is untrained; the canonical store streams into the backend at build
//!   time
//! - **Metadata filtering**: filtered search with adaptive overfetch,
//!   exact and prefix attribute lookup via an inverted index
//! - **Query toolkit**: batch search, range search, hybrid vector+text
//!   scoring, and custom reranking, each with observable statistics
//! - **Persistence**: separate streams for config, vectors, backend blob,
//!   and metadata; the index blob is a cache that is rebuilt whenever it
//!   disagrees with the canonical vectors
//! - **Thread safety**: concurrent readers and writers behind store-level
//!   locks
//!
//! # Quick Start
//!
//! ```no_run
//! use ember_db::{Database, DatabaseConfig, DistanceMetric, Metadata};
//!
//! # fn main() -> ember_db::Result<()> {
//! let config = DatabaseConfig::new(4).metric(DistanceMetric::L2);
//! let db = Database::new(config)?;
//!
//! let mut metadata = Metadata::new();
//! metadata.insert("label".to_string(), "example".to_string());
//! db.add(vec![1.0, 0.0, 0.0, 0.0], metadata)?;
//!
//! for result in db.search(&[1.0, 0.0, 0.0, 0.0], 10)? {
//!     println!("{} scored {}", result.id, result.score);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Choosing a backend
//!
//! | Backend       | Best for                           | Training | Recall |
//! |---------------|------------------------------------|----------|--------|
//! | `brute_force` | Small datasets, ground truth       | No       | 100%   |
//! | `ivf_flat`    | Larger datasets, tunable recall    | Yes      | Good   |
//!
//! Select a backend with [`DatabaseConfig::anns_algorithm`]; unknown names
//! fall back to `brute_force` and the substitution is visible in
//! [`Database::stats`]. Third-party backends register through
//! [`anns::registry`].
//!
//! # Modules
//!
//! - [`db`]: the [`Database`] facade
//! - [`anns`]: the backend contract, registry, and built-in backends
//! - [`vector_store`]: canonical storage, training gate, id remapping
//! - [`metadata`]: attribute storage and lookup
//! - [`query`]: the query engine and search statistics
//! - [`distance`]: metrics and score orientation
//! - [`persistence`]: on-disk stream primitives

pub mod anns;
pub mod config;
pub mod constants;
pub mod db;
pub mod distance;
pub mod error;
pub mod kmeans;
pub mod metadata;
pub mod persistence;
pub mod query;
pub mod types;
pub mod vector;
pub mod vector_store;

// Re-export commonly used types at crate root
pub use anns::{AlgorithmParams, AnnBackend, BackendFactory, BuildReport};
pub use config::{DatabaseConfig, IndexType};
pub use db::{Database, UpdateOutcome};
pub use distance::DistanceMetric;
pub use error::{EmberDbError, Result};
pub use metadata::MetadataStore;
pub use query::{QueryEngine, SearchStats, SubstringScorer, TextScorer};
pub use types::{Metadata, QueryResult, SearchParams, VectorId};
pub use vector::Vector;
pub use vector_store::VectorStore;
