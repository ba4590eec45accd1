//! # Snapshot Format
//!
//! Binary serialization of a whole `Catalog`, used by the file backend of
//! the CLI. File I/O lives in the app layer.
//!
//! Format: Header (5 bytes) + postcard-serialized catalog.
//! - 4 bytes: Magic ("LLDS")
//! - 1 byte: Version
//!
//! Size and header are validated before the payload is parsed.

use crate::primitives;
use crate::storage::Catalog;
use crate::types::LldError;

// =============================================================================
// LIMITS
// =============================================================================

/// Largest accepted snapshot, checked before deserialization.
pub const MAX_SNAPSHOT_SIZE: usize = 500 * 1024 * 1024; // 500 MB

/// Header length.
const HEADER_LEN: usize = 5;

// =============================================================================
// FILE HEADER
// =============================================================================

/// The header preceding every snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub magic: [u8; 4],
    pub version: u8,
}

impl SnapshotHeader {
    /// Header of the current format version.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            magic: *primitives::MAGIC_BYTES,
            version: primitives::FORMAT_VERSION,
        }
    }

    pub fn validate(&self) -> Result<(), LldError> {
        if &self.magic != primitives::MAGIC_BYTES {
            return Err(LldError::DeserializationError(
                "invalid magic bytes".to_string(),
            ));
        }
        if self.version != primitives::FORMAT_VERSION {
            return Err(LldError::DeserializationError(format!(
                "unsupported version: {} (expected {})",
                self.version,
                primitives::FORMAT_VERSION
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4] = self.version;
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LldError> {
        let Some(header) = bytes.get(..HEADER_LEN) else {
            return Err(LldError::DeserializationError(
                "header too short".to_string(),
            ));
        };
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&header[0..4]);
        Ok(Self {
            magic,
            version: header[4],
        })
    }
}

impl Default for SnapshotHeader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// SERIALIZATION FUNCTIONS
// =============================================================================

/// Serialize a catalog to bytes (header + payload).
pub fn catalog_to_bytes(catalog: &Catalog) -> Result<Vec<u8>, LldError> {
    let payload =
        postcard::to_stdvec(catalog).map_err(|e| LldError::SerializationError(e.to_string()))?;

    let mut result = Vec::with_capacity(HEADER_LEN + payload.len());
    result.extend_from_slice(&SnapshotHeader::new().to_bytes());
    result.extend_from_slice(&payload);
    Ok(result)
}

/// Deserialize a catalog from bytes.
pub fn catalog_from_bytes(bytes: &[u8]) -> Result<Catalog, LldError> {
    if bytes.len() > MAX_SNAPSHOT_SIZE {
        return Err(LldError::DeserializationError(format!(
            "snapshot of {} bytes exceeds the maximum of {MAX_SNAPSHOT_SIZE} bytes",
            bytes.len()
        )));
    }

    let header = SnapshotHeader::from_bytes(bytes)?;
    header.validate()?;

    postcard::from_bytes(&bytes[HEADER_LEN..])
        .map_err(|e| LldError::DeserializationError(format!("corrupt snapshot payload: {e}")))
}

// =============================================================================
// TESTS
// =============================================================================
