//! # Storage
//!
//! Durable homes for persisted build graphs.

pub mod redb_store;

pub use redb_store::RedbStore;
