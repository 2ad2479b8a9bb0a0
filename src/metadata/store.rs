//! Metadata storage with an incrementally maintained inverted index.

use crate::constants::metadata::{MAX_FIELDS, MAX_KEY_LEN, MAX_VALUE_LEN};
use crate::error::{EmberDbError, Result};
use crate::persistence::{read_str, read_u64, write_str, write_u64};
use crate::types::{Metadata, VectorId};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Upper bound on string lengths accepted from a persisted stream.
const STREAM_STRING_LIMIT: usize = 1 << 20;

struct MetadataInner {
    /// Primary mapping: id -> attribute map.
    records: HashMap<VectorId, Metadata>,
    /// Inverted index: field -> sorted value table -> ids.
    /// The sorted value table serves both exact and prefix lookup.
    inverted: HashMap<String, BTreeMap<String, BTreeSet<VectorId>>>,
}

impl MetadataInner {
    fn index_record(&mut self, id: VectorId, metadata: &Metadata) {
        for (key, value) in metadata {
            self.inverted
                .entry(key.clone())
                .or_default()
                .entry(value.clone())
                .or_default()
                .insert(id);
        }
    }

    fn unindex_record(&mut self, id: VectorId, metadata: &Metadata) {
        for (key, value) in metadata {
            if let Some(values) = self.inverted.get_mut(key) {
                if let Some(ids) = values.get_mut(value) {
                    ids.remove(&id);
                    if ids.is_empty() {
                        values.remove(value);
                    }
                }
                if values.is_empty() {
                    self.inverted.remove(key);
                }
            }
        }
    }
}

/// Store mapping vector ids to string-keyed attribute maps.
///
/// A reader-writer lock allows concurrent readers; writers are exclusive.
/// The inverted index is kept in lockstep with the primary map so exact and
/// prefix lookup never scan every record.
pub struct MetadataStore {
    inner: RwLock<MetadataInner>,
}

impl Default for MetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MetadataInner {
                records: HashMap::new(),
                inverted: HashMap::new(),
            }),
        }
    }

    /// Number of ids with metadata.
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    /// True when no id has metadata.
    pub fn is_empty(&self) -> bool {
        self.inner.read().records.is_empty()
    }

    /// Set the full record for an id, replacing any previous record.
    ///
    /// Idempotent: stale inverted-index entries for the previous record are
    /// removed before the new record is indexed.
    pub fn set_metadata(&self, id: VectorId, metadata: Metadata) -> Result<()> {
        validate_metadata(&metadata)?;
        let mut inner = self.inner.write();

        if let Some(previous) = inner.records.remove(&id) {
            inner.unindex_record(id, &previous);
        }
        inner.index_record(id, &metadata);
        inner.records.insert(id, metadata);
        Ok(())
    }

    /// Get the record for an id, if any.
    pub fn get_metadata(&self, id: VectorId) -> Option<Metadata> {
        self.inner.read().records.get(&id).cloned()
    }

    /// Whether the id has a record.
    pub fn has_metadata(&self, id: VectorId) -> bool {
        self.inner.read().records.contains_key(&id)
    }

    /// Remove the record for an id. Returns true when a record existed.
    pub fn remove_metadata(&self, id: VectorId) -> bool {
        let mut inner = self.inner.write();
        if let Some(previous) = inner.records.remove(&id) {
            inner.unindex_record(id, &previous);
            true
        } else {
            false
        }
    }

    /// Set records for many ids at once.
    pub fn set_batch_metadata(&self, ids: &[VectorId], metadata: Vec<Metadata>) -> Result<()> {
        if ids.len() != metadata.len() {
            return Err(EmberDbError::invalid_parameter(
                "ids and metadata must have the same length",
            ));
        }
        for record in &metadata {
            validate_metadata(record)?;
        }

        let mut inner = self.inner.write();
        for (id, record) in ids.iter().zip(metadata) {
            if let Some(previous) = inner.records.remove(id) {
                inner.unindex_record(*id, &previous);
            }
            inner.index_record(*id, &record);
            inner.records.insert(*id, record);
        }
        Ok(())
    }

    /// Get records for many ids; absent ids yield `None`.
    pub fn get_batch_metadata(&self, ids: &[VectorId]) -> Vec<Option<Metadata>> {
        let inner = self.inner.read();
        ids.iter()
            .map(|id| inner.records.get(id).cloned())
            .collect()
    }

    /// Ids whose record maps `key` exactly to `value`.
    pub fn find_by_key_value(&self, key: &str, value: &str) -> Vec<VectorId> {
        let inner = self.inner.read();
        inner
            .inverted
            .get(key)
            .and_then(|values| values.get(value))
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Ids whose record maps `key` to a value starting with `prefix`.
    pub fn find_by_prefix(&self, key: &str, prefix: &str) -> Vec<VectorId> {
        let inner = self.inner.read();
        let Some(values) = inner.inverted.get(key) else {
            return Vec::new();
        };

        let mut result = Vec::new();
        for (value, ids) in values.range(prefix.to_string()..) {
            if !value.starts_with(prefix) {
                break;
            }
            result.extend(ids.iter().copied());
        }
        result.sort();
        result
    }

    /// Apply a predicate over the supplied ids, returning those that pass.
    ///
    /// Ids without a record are evaluated against an empty map, so a
    /// predicate that rejects nothing passes every id.
    pub fn filter_ids(&self, ids: &[VectorId], predicate: impl Fn(&Metadata) -> bool) -> Vec<VectorId> {
        let inner = self.inner.read();
        let empty = Metadata::new();
        ids.iter()
            .copied()
            .filter(|id| predicate(inner.records.get(id).unwrap_or(&empty)))
            .collect()
    }

    /// All distinct metadata keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let inner = self.inner.read();
        let mut keys: Vec<String> = inner.inverted.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Drop every record.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.records.clear();
        inner.inverted.clear();
    }

    /// Write the self-describing binary stream.
    ///
    /// Layout: `count: u64`; per record `id: u64`, `num_kv: u64`, then
    /// `num_kv` pairs of length-prefixed key and value bytes.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let inner = self.inner.read();

        let file = fs::File::create(path)?;
        let mut out = BufWriter::new(file);

        write_u64(&mut out, inner.records.len() as u64)?;
        for (id, metadata) in &inner.records {
            write_u64(&mut out, id.as_u64())?;
            write_u64(&mut out, metadata.len() as u64)?;
            for (key, value) in metadata {
                write_str(&mut out, key)?;
                write_str(&mut out, value)?;
            }
        }
        out.flush()?;
        Ok(())
    }

    /// Replace the contents from a persisted stream, rebuilding the
    /// inverted index.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = fs::File::open(path)?;
        let mut input = BufReader::new(file);

        let count = read_u64(&mut input)?;
        let mut records: HashMap<VectorId, Metadata> = HashMap::new();

        for _ in 0..count {
            let id = VectorId(read_u64(&mut input)?);
            let num_kv = read_u64(&mut input)?;

            let mut metadata = Metadata::new();
            for _ in 0..num_kv {
                let key = read_str(&mut input, STREAM_STRING_LIMIT)?;
                let value = read_str(&mut input, STREAM_STRING_LIMIT)?;
                metadata.insert(key, value);
            }
            records.insert(id, metadata);
        }

        let mut inner = self.inner.write();
        inner.records.clear();
        inner.inverted.clear();
        for (id, metadata) in records {
            inner.index_record(id, &metadata);
            inner.records.insert(id, metadata);
        }
        Ok(())
    }
}

fn validate_metadata(metadata: &Metadata) -> Result<()> {
    if metadata.len() > MAX_FIELDS {
        return Err(EmberDbError::invalid_parameter(format!(
            "too many metadata fields (max {MAX_FIELDS})"
        )));
    }
    for (key, value) in metadata {
        if key.is_empty() {
            return Err(EmberDbError::invalid_parameter(
                "metadata key cannot be empty",
            ));
        }
        if key.len() > MAX_KEY_LEN {
            return Err(EmberDbError::invalid_parameter(format!(
                "metadata key too long (max {MAX_KEY_LEN} bytes)"
            )));
        }
        if value.len() > MAX_VALUE_LEN {
            return Err(EmberDbError::invalid_parameter(format!(
                "metadata value too long (max {MAX_VALUE_LEN} bytes)"
            )));
        }
    }
    Ok(())
}
