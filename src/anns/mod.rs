//! Pluggable ANN backends.
//!
//! A backend implements [`AnnBackend`] and is made available through the
//! process-wide [`registry`]. The vector store requests a backend by name
//! at construction time and transparently falls back to the brute-force
//! backend when the name is unknown.
//!
//! # Writing a backend
//!
//! ```ignore
//! use ember_db::anns::{registry, AnnBackend, BackendFactory};
//!
//! struct MyFactory;
//!
//! impl BackendFactory for MyFactory {
//!     fn backend_name(&self) -> &'static str { "my_index" }
//!     // ...
//! }
//!
//! registry().register(Box::new(MyFactory))?;
//! ```

pub mod backend;
pub mod brute_force;
pub mod ivf_flat;
pub mod registry;

pub use backend::{AlgorithmParams, AnnBackend, BuildReport};
pub use brute_force::{BruteForceBackend, BruteForceFactory, BRUTE_FORCE_NAME};
pub use ivf_flat::{IvfFlatBackend, IvfFlatFactory, IVF_FLAT_NAME};
pub use registry::{registry, AnnRegistry, BackendFactory};
