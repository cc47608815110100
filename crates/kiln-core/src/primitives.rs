//! # Engine Primitives
//!
//! Hardcoded constants of the Kiln engine: the persisted format header and
//! the limits validated before any persisted data is decoded.

/// Magic bytes for the Kiln binary graph format header.
///
/// - File Header = Magic Bytes ("KILN") + Version (u8) before payload.
pub const MAGIC_BYTES: &[u8; 4] = b"KILN";

/// Current serialization format version.
///
/// Increment this when making breaking changes to the serialization format.
pub const FORMAT_VERSION: u8 = 1;

/// Size of the persisted header in bytes.
pub const HEADER_SIZE: usize = 5;

/// Maximum allowed payload size of a persisted build graph (256 MB).
///
/// Checked BEFORE attempting deserialization.
pub const MAX_PERSISTED_GRAPH_SIZE: usize = 256 * 1024 * 1024;

/// Maximum number of output templates a single rule may declare.
pub const MAX_RULE_OUTPUTS: usize = 64;

/// Maximum length of a project name used as a storage key.
pub const MAX_PROJECT_NAME_LENGTH: usize = 256;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_bytes_correct() {
        assert_eq!(MAGIC_BYTES, b"KILN");
    }

    #[test]
    fn header_size_matches_layout() {
        assert_eq!(HEADER_SIZE, MAGIC_BYTES.len() + 1);
    }
}
