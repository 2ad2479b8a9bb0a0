//! Database configuration.
//!
//! [`DatabaseConfig`] is frozen at construction and persisted as a plain
//! `key=value` text file with integer codes for the enums, so a database can
//! be reopened with the exact parameters it was created with.

use crate::distance::DistanceMetric;
use crate::error::{EmberDbError, Result};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

/// Index family hint forwarded to the backend.
///
/// This is advisory: the concrete backend is chosen by
/// [`DatabaseConfig::anns_algorithm`], and each backend interprets the hint
/// and the tunable build parameters as it sees fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexType {
    /// Brute force (exact search).
    Flat,
    /// Inverted file with flat storage.
    IvfFlat,
    /// Inverted file with product quantization.
    IvfPq,
    /// Hierarchical navigable small world graph.
    Hnsw,
    /// Choose automatically based on data size.
    Auto,
}

impl IndexType {
    /// Stable integer code used in the persisted config file.
    pub fn code(&self) -> u32 {
        match self {
            IndexType::Flat => 0,
            IndexType::IvfFlat => 1,
            IndexType::IvfPq => 2,
            IndexType::Hnsw => 3,
            IndexType::Auto => 4,
        }
    }

    /// Convert from a persisted integer code.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(IndexType::Flat),
            1 => Some(IndexType::IvfFlat),
            2 => Some(IndexType::IvfPq),
            3 => Some(IndexType::Hnsw),
            4 => Some(IndexType::Auto),
            _ => None,
        }
    }

    /// Canonical string name.
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexType::Flat => "FLAT",
            IndexType::IvfFlat => "IVF_FLAT",
            IndexType::IvfPq => "IVF_PQ",
            IndexType::Hnsw => "HNSW",
            IndexType::Auto => "AUTO",
        }
    }
}

impl fmt::Display for IndexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexType {
    type Err = EmberDbError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "FLAT" => Ok(IndexType::Flat),
            "IVF_FLAT" => Ok(IndexType::IvfFlat),
            "IVF_PQ" => Ok(IndexType::IvfPq),
            "HNSW" => Ok(IndexType::Hnsw),
            "AUTO" => Ok(IndexType::Auto),
            other => Err(EmberDbError::invalid_parameter(format!(
                "unknown index type: {other}"
            ))),
        }
    }
}

/// Configuration for a database instance, frozen at construction.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Vector dimensionality. Required, must be greater than zero.
    pub dimension: u32,
    /// Distance semantics for all searches.
    pub metric: DistanceMetric,
    /// Index family hint for the backend.
    pub index_type: IndexType,
    /// Number of clusters for IVF-style backends.
    pub nlist: u32,
    /// Number of subquantizers for PQ-style backends.
    pub m: u32,
    /// Bits per subquantizer for PQ-style backends.
    pub nbits: u32,
    /// Connection count for HNSW-style backends. Persisted under the key `M`.
    pub hnsw_m: u32,
    /// Build-time beam width for HNSW-style backends.
    pub ef_construction: u32,
    /// Backend plugin name. Empty or `"auto"` selects the default
    /// brute-force backend.
    pub anns_algorithm: String,
    /// Opaque key/value pairs forwarded to the backend at build time.
    pub anns_build_params: HashMap<String, String>,
    /// Opaque key/value pairs forwarded to the backend at query time.
    pub anns_query_params: HashMap<String, String>,
}

impl DatabaseConfig {
    /// Create a configuration for the given dimension with default tuning.
    pub fn new(dimension: u32) -> Self {
        Self {
            dimension,
            metric: DistanceMetric::L2,
            index_type: IndexType::Auto,
            nlist: 100,
            m: 8,
            nbits: 8,
            hnsw_m: 16,
            ef_construction: 200,
            anns_algorithm: String::new(),
            anns_build_params: HashMap::new(),
            anns_query_params: HashMap::new(),
        }
    }

    /// Set the distance metric.
    pub fn metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    /// Set the index type hint.
    pub fn index_type(mut self, index_type: IndexType) -> Self {
        self.index_type = index_type;
        self
    }

    /// Set the backend plugin name.
    pub fn anns_algorithm(mut self, name: impl Into<String>) -> Self {
        self.anns_algorithm = name.into();
        self
    }

    /// Set the IVF cluster count.
    pub fn nlist(mut self, nlist: u32) -> Self {
        self.nlist = nlist;
        self
    }

    /// Check structural validity of the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(EmberDbError::invalid_config(
                "vector dimension must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Write the configuration as a `key=value` text file.
    ///
    /// Enum values are written as integer codes; the key set and order are
    /// part of the on-disk format.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = fs::File::create(path)?;
        writeln!(file, "dimension={}", self.dimension)?;
        writeln!(file, "index_type={}", self.index_type.code())?;
        writeln!(file, "metric={}", self.metric.code())?;
        writeln!(file, "nlist={}", self.nlist)?;
        writeln!(file, "m={}", self.m)?;
        writeln!(file, "nbits={}", self.nbits)?;
        writeln!(file, "M={}", self.hnsw_m)?;
        writeln!(file, "efConstruction={}", self.ef_construction)?;
        file.sync_all()?;
        Ok(())
    }

    /// Read a configuration from a `key=value` text file.
    ///
    /// The config file is authoritative: a malformed line or enum code fails
    /// with `InvalidFormat`. Unknown keys are ignored for forward
    /// compatibility.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let mut config = DatabaseConfig::new(0);

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                EmberDbError::invalid_format(format!("malformed config line: {line}"))
            })?;

            let parse_u32 = |value: &str| -> Result<u32> {
                value.parse::<u32>().map_err(|_| {
                    EmberDbError::invalid_format(format!("invalid value for {key}: {value}"))
                })
            };

            match key {
                "dimension" => config.dimension = parse_u32(value)?,
                "index_type" => {
                    config.index_type = IndexType::from_code(parse_u32(value)?).ok_or_else(|| {
                        EmberDbError::invalid_format(format!("unknown index type code: {value}"))
                    })?;
                }
                "metric" => {
                    config.metric =
                        DistanceMetric::from_code(parse_u32(value)?).ok_or_else(|| {
                            EmberDbError::invalid_format(format!("unknown metric code: {value}"))
                        })?;
                }
                "nlist" => config.nlist = parse_u32(value)?,
                "m" => config.m = parse_u32(value)?,
                "nbits" => config.nbits = parse_u32(value)?,
                "M" => config.hnsw_m = parse_u32(value)?,
                "efConstruction" => config.ef_construction = parse_u32(value)?,
                _ => {}
            }
        }

        config.validate()?;
        Ok(config)
    }
}
