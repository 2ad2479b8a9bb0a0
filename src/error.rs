//! Error types for ember-db operations.
//!
//! A single error enum covers the whole crate: caller errors (dimension
//! mismatch, bad configuration), state errors (untrained index, unsupported
//! backend operation), backend failures, and I/O failures during
//! persistence.

use std::io;
use thiserror::Error;

/// Result type alias using [`EmberDbError`].
pub type Result<T> = std::result::Result<T, EmberDbError>;

/// Errors that can occur during ember-db operations.
#[derive(Error, Debug)]
pub enum EmberDbError {
    /// Vector dimension does not match the configured dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected vector dimension.
        expected: usize,
        /// Actual vector dimension provided.
        actual: usize,
    },

    /// Database configuration is invalid.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Invalid parameter value provided to an operation.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Vector with the specified ID was not found.
    #[error("vector not found: ID {0}")]
    NotFound(u64),

    /// The index requires training before it can serve queries.
    #[error("index not trained: call build_index() or train_index() first")]
    NotTrained,

    /// Insufficient vectors for the requested operation.
    #[error("insufficient vectors: required {required}, got {actual}")]
    InsufficientVectors {
        /// Minimum number of vectors required.
        required: usize,
        /// Actual number of vectors available.
        actual: usize,
    },

    /// Operation not supported by the active backend.
    #[error("operation not supported: {0}")]
    Unsupported(String),

    /// A backend with the same name is already registered.
    #[error("backend already registered: {0}")]
    AlreadyRegistered(String),

    /// The backend failed while building or searching.
    #[error("backend failure: {0}")]
    Backend(String),

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A persisted file has an invalid or unrecognized format.
    #[error("invalid file format: {0}")]
    InvalidFormat(String),

    /// Checksum verification failed while loading a backend blob.
    #[error("checksum mismatch: file may be corrupted")]
    ChecksumMismatch,

    /// Error during serialization or deserialization.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl EmberDbError {
    /// Creates a new `DimensionMismatch` error.
    pub fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch { expected, actual }
    }

    /// Creates a new `InvalidConfig` error.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Creates a new `InvalidParameter` error.
    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    /// Creates a new `InsufficientVectors` error.
    pub fn insufficient_vectors(required: usize, actual: usize) -> Self {
        Self::InsufficientVectors { required, actual }
    }

    /// Creates a new `Unsupported` error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Creates a new `Backend` error.
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Creates a new `InvalidFormat` error.
    pub fn invalid_format(msg: impl Into<String>) -> Self {
        Self::InvalidFormat(msg.into())
    }

    /// Creates a new `Serialization` error.
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }
}

impl From<bincode::Error> for EmberDbError {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
