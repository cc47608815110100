//! # Formats
//!
//! Byte-level encodings of the build graph.

pub mod persistence;

pub use persistence::{PersistenceHeader, graph_from_bytes, graph_to_bytes};
