//! # Persistence Format
//!
//! Binary serialization for build graphs. File I/O lives in the storage
//! layer and the app.
//!
//! Format: Header (5 bytes) + postcard-serialized [`SerializableBuildGraph`].
//! - 4 bytes: Magic ("KILN")
//! - 1 byte: Version
//!
//! Sizes and the header are validated before the payload is decoded, so a
//! corrupted or hostile file is rejected without large allocations.

use crate::graph::SerializableBuildGraph;
use crate::primitives::{FORMAT_VERSION, HEADER_SIZE, MAGIC_BYTES, MAX_PERSISTED_GRAPH_SIZE};
use crate::{BuildGraph, KilnError};

// =============================================================================
// FILE HEADER
// =============================================================================

/// The persistence header precedes all graph data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistenceHeader {
    pub magic: [u8; 4],
    pub version: u8,
}

impl PersistenceHeader {
    /// Header for the current format version.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            magic: *MAGIC_BYTES,
            version: FORMAT_VERSION,
        }
    }

    /// Check magic and version.
    pub fn validate(&self) -> Result<(), KilnError> {
        if &self.magic != MAGIC_BYTES {
            return Err(KilnError::DeserializationError(
                "Invalid magic bytes".to_string(),
            ));
        }
        if self.version != FORMAT_VERSION {
            return Err(KilnError::DeserializationError(format!(
                "Unsupported version: {} (expected {})",
                self.version, FORMAT_VERSION
            )));
        }
        Ok(())
    }

    /// Write header to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4] = self.version;
        bytes
    }

    /// Read header from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KilnError> {
        let Some(header) = bytes.get(..HEADER_SIZE) else {
            return Err(KilnError::DeserializationError(
                "Header too short".to_string(),
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

impl Default for PersistenceHeader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// SERIALIZATION FUNCTIONS
// =============================================================================

/// Serialize a graph to bytes (header + payload).
pub fn graph_to_bytes(graph: &BuildGraph) -> Result<Vec<u8>, KilnError> {
    let serializable = SerializableBuildGraph::from(graph);
    let payload = postcard::to_stdvec(&serializable)
        .map_err(|e| KilnError::SerializationError(e.to_string()))?;

    let mut result = Vec::with_capacity(HEADER_SIZE + payload.len());
    result.extend_from_slice(&PersistenceHeader::new().to_bytes());
    result.extend_from_slice(&payload);
    Ok(result)
}

/// Deserialize a graph from bytes and re-link it to its rule registry.
pub fn graph_from_bytes(bytes: &[u8]) -> Result<BuildGraph, KilnError> {
    if bytes.len() > MAX_PERSISTED_GRAPH_SIZE {
        return Err(KilnError::DeserializationError(format!(
            "Data size {} bytes exceeds maximum allowed {} bytes",
            bytes.len(),
            MAX_PERSISTED_GRAPH_SIZE
        )));
    }

    let header = PersistenceHeader::from_bytes(bytes)?;
    header.validate()?;

    let payload = bytes.get(HEADER_SIZE..).unwrap_or_default();
    let serializable: SerializableBuildGraph = postcard::from_bytes(payload).map_err(|e| {
        KilnError::DeserializationError(format!("Failed to decode graph data: {}", e))
    })?;

    BuildGraph::try_from(serializable)
}

// =============================================================================
// TESTS
// =============================================================================
