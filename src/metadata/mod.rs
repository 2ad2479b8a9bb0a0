//! Metadata storage and attribute lookup.
//!
//! Vectors carry string-keyed attribute maps. The store maintains the
//! primary id → record mapping together with an inverted index per field,
//! so exact-value and value-prefix lookups run in O(log N + result size)
//! instead of scanning every record.
//!
//! # Example
//!
//! ```ignore
//! use ember_db::metadata::MetadataStore;
//! use ember_db::VectorId;
//!
//! let store = MetadataStore::new();
//! store.set_metadata(
//!     VectorId(1),
//!     [("category".to_string(), "electronics".to_string())].into(),
//! )?;
//!
//! let hits = store.find_by_key_value("category", "electronics");
//! assert_eq!(hits, vec![VectorId(1)]);
//! ```

mod store;

pub use store::MetadataStore;
