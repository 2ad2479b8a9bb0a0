//! Low-level persistence primitives.
//!
//! Two formats live here:
//!
//! - Little-endian stream helpers for the authoritative files (`.vectors`,
//!   `.order`, `.metadata`). Their byte layout is fixed and headerless;
//!   corrupt reads fail loudly.
//! - A checksummed blob envelope for backend-private index state
//!   (`.vectors.anns`). Blobs carry a magic tag, a format version, and a
//!   CRC32 of the body, because a blob is only a cache: any verification
//!   failure means "discard and rebuild from the canonical vectors".

use crate::error::{EmberDbError, Result};
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

/// Magic bytes identifying an ember-db backend blob: "EMBERDB\0"
pub const BLOB_MAGIC: [u8; 8] = *b"EMBERDB\0";

/// Current blob format version.
pub const BLOB_FORMAT_VERSION: u32 = 1;

/// Fixed blob header size in bytes: `[MAGIC 8B][VERSION u32][CHECKSUM u32]`.
/// A length-prefixed backend kind tag follows the fixed header; the checksum
/// covers only the body after the tag.
pub const BLOB_HEADER_SIZE: usize = 16;

/// Upper bound on the blob kind tag length.
const BLOB_KIND_LIMIT: usize = 256;

/// Append a suffix to a path's final component.
///
/// Unlike `Path::with_extension` this never replaces an existing extension,
/// so `db.vectors` + `.anns` yields `db.vectors.anns`.
pub fn path_with_suffix(path: &Path, suffix: &str) -> std::path::PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(suffix);
    std::path::PathBuf::from(os)
}

// ---------------------------------------------------------------------------
// Little-endian stream helpers
// ---------------------------------------------------------------------------

/// Write a `u64` in little-endian order.
pub fn write_u64(out: &mut impl Write, value: u64) -> Result<()> {
    out.write_all(&value.to_le_bytes())?;
    Ok(())
}

/// Read a little-endian `u64`.
pub fn read_u64(input: &mut impl Read) -> Result<u64> {
    let mut buf = [0u8; 8];
    input.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Write an `f32` slice in little-endian order.
pub fn write_f32_slice(out: &mut impl Write, values: &[f32]) -> Result<()> {
    for value in values {
        out.write_all(&value.to_le_bytes())?;
    }
    Ok(())
}

/// Read `count` little-endian `f32` values.
pub fn read_f32_vec(input: &mut impl Read, count: usize) -> Result<Vec<f32>> {
    let mut bytes = vec![0u8; count * 4];
    input.read_exact(&mut bytes)?;
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Write a length-prefixed UTF-8 string (`len: u64` then bytes).
pub fn write_str(out: &mut impl Write, value: &str) -> Result<()> {
    write_u64(out, value.len() as u64)?;
    out.write_all(value.as_bytes())?;
    Ok(())
}

/// Read a length-prefixed UTF-8 string.
///
/// `limit` bounds the declared length so a corrupt stream cannot trigger an
/// enormous allocation.
pub fn read_str(input: &mut impl Read, limit: usize) -> Result<String> {
    let len = read_u64(input)? as usize;
    if len > limit {
        return Err(EmberDbError::invalid_format(format!(
            "string length {len} exceeds limit {limit}"
        )));
    }
    let mut bytes = vec![0u8; len];
    input.read_exact(&mut bytes)?;
    String::from_utf8(bytes)
        .map_err(|_| EmberDbError::invalid_format("string is not valid UTF-8"))
}

// ---------------------------------------------------------------------------
// Backend blob envelope
// ---------------------------------------------------------------------------

/// Write a backend blob: header, kind tag, and checksummed body.
///
/// `kind` names the backend that wrote the blob; reads verify it so one
/// backend can never deserialize another backend's state.
pub fn write_blob(path: impl AsRef<Path>, kind: &str, body: &[u8]) -> Result<()> {
    let checksum = crc32fast::hash(body);

    let mut file = fs::File::create(path)?;
    file.write_all(&BLOB_MAGIC)?;
    file.write_all(&BLOB_FORMAT_VERSION.to_le_bytes())?;
    file.write_all(&checksum.to_le_bytes())?;
    write_str(&mut file, kind)?;
    file.write_all(body)?;
    file.sync_all()?;
    Ok(())
}

/// Read and verify a backend blob, returning the body.
pub fn read_blob(path: impl AsRef<Path>, kind: &str) -> Result<Vec<u8>> {
    let data = fs::read(path)?;
    if data.len() < BLOB_HEADER_SIZE {
        return Err(EmberDbError::invalid_format("blob too small for header"));
    }

    if data[0..8] != BLOB_MAGIC {
        return Err(EmberDbError::invalid_format("invalid blob magic bytes"));
    }

    let version = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
    if version > BLOB_FORMAT_VERSION {
        return Err(EmberDbError::invalid_format(format!(
            "unsupported blob version {version} (max supported: {BLOB_FORMAT_VERSION})"
        )));
    }
    let checksum = u32::from_le_bytes([data[12], data[13], data[14], data[15]]);

    let mut rest = &data[BLOB_HEADER_SIZE..];
    let written_kind = read_str(&mut rest, BLOB_KIND_LIMIT)?;
    if written_kind != kind {
        return Err(EmberDbError::invalid_format(format!(
            "blob kind mismatch: expected {kind}, got {written_kind}"
        )));
    }

    if crc32fast::hash(rest) != checksum {
        return Err(EmberDbError::ChecksumMismatch);
    }

    Ok(rest.to_vec())
}
