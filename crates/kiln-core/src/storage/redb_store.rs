//! # redb-backed Graph Storage
//!
//! Persists build graphs in a redb embedded database, one entry per
//! top-level project, each encoded with [`crate::formats::persistence`].
//!
//! Every save is a single ACID write transaction, so an interrupted build
//! leaves the previously stored graph intact.

use crate::formats::{graph_from_bytes, graph_to_bytes};
use crate::primitives::{FORMAT_VERSION, MAX_PROJECT_NAME_LENGTH};
use crate::{BuildGraph, KilnError};
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::path::Path;
use tracing::debug;

/// Table for graphs: project name -> persisted graph bytes
const GRAPHS: TableDefinition<&str, &[u8]> = TableDefinition::new("graphs");

/// Table for metadata: key string -> value u64
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

const FORMAT_VERSION_KEY: &str = "format_version";
const SAVE_COUNT_KEY: &str = "save_count";

fn io_err(e: impl std::fmt::Display) -> KilnError {
    KilnError::IoError(e.to_string())
}

/// A disk-backed store of build graphs keyed by project name.
pub struct RedbStore {
    db: Database,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, KilnError> {
        let db = Database::create(path.as_ref()).map_err(io_err)?;

        let write_txn = db.begin_write().map_err(io_err)?;
        {
            let _ = write_txn.open_table(GRAPHS).map_err(io_err)?;
            let mut metadata = write_txn.open_table(METADATA).map_err(io_err)?;
            let stored = metadata
                .get(FORMAT_VERSION_KEY)
                .map_err(io_err)?
                .map(|v| v.value());
            match stored {
                None => {
                    metadata
                        .insert(FORMAT_VERSION_KEY, u64::from(FORMAT_VERSION))
                        .map_err(io_err)?;
                }
                Some(version) if version != u64::from(FORMAT_VERSION) => {
                    return Err(KilnError::DeserializationError(format!(
                        "store format version {} (expected {})",
                        version, FORMAT_VERSION
                    )));
                }
                Some(_) => {}
            }
        }
        write_txn.commit().map_err(io_err)?;

        Ok(Self { db })
    }

    fn check_name(project: &str) -> Result<(), KilnError> {
        if project.is_empty() || project.len() > MAX_PROJECT_NAME_LENGTH {
            return Err(KilnError::InvalidGraph(format!(
                "project name must be 1..={} bytes",
                MAX_PROJECT_NAME_LENGTH
            )));
        }
        Ok(())
    }

    /// Store `graph` under `project`, replacing any previous graph.
    pub fn save(&self, project: &str, graph: &BuildGraph) -> Result<(), KilnError> {
        Self::check_name(project)?;
        let bytes = graph_to_bytes(graph)?;

        let write_txn = self.db.begin_write().map_err(io_err)?;
        {
            let mut graphs = write_txn.open_table(GRAPHS).map_err(io_err)?;
            graphs.insert(project, bytes.as_slice()).map_err(io_err)?;

            let mut metadata = write_txn.open_table(METADATA).map_err(io_err)?;
            let saves = metadata
                .get(SAVE_COUNT_KEY)
                .map_err(io_err)?
                .map_or(0, |v| v.value());
            metadata
                .insert(SAVE_COUNT_KEY, saves.saturating_add(1))
                .map_err(io_err)?;
        }
        write_txn.commit().map_err(io_err)?;

        debug!(project, bytes = bytes.len(), "Saved build graph");
        Ok(())
    }

    /// Load the graph stored under `project`, if any.
    pub fn load(&self, project: &str) -> Result<Option<BuildGraph>, KilnError> {
        Self::check_name(project)?;
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let graphs = read_txn.open_table(GRAPHS).map_err(io_err)?;
        let Some(entry) = graphs.get(project).map_err(io_err)? else {
            return Ok(None);
        };
        let graph = graph_from_bytes(entry.value())?;
        debug!(project, artifacts = graph.artifact_count(), "Loaded build graph");
        Ok(Some(graph))
    }

    /// Delete the graph stored under `project`. Returns whether one existed.
    pub fn remove(&self, project: &str) -> Result<bool, KilnError> {
        Self::check_name(project)?;
        let write_txn = self.db.begin_write().map_err(io_err)?;
        let existed = {
            let mut graphs = write_txn.open_table(GRAPHS).map_err(io_err)?;
            let removed = graphs.remove(project).map_err(io_err)?;
            removed.is_some()
        };
        write_txn.commit().map_err(io_err)?;
        Ok(existed)
    }

    /// Names of all stored projects, in ascending order.
    pub fn project_names(&self) -> Result<Vec<String>, KilnError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let graphs = read_txn.open_table(GRAPHS).map_err(io_err)?;
        let mut names = Vec::new();
        for entry in graphs.iter().map_err(io_err)? {
            let (key, _) = entry.map_err(io_err)?;
            names.push(key.value().to_string());
        }
        Ok(names)
    }

    /// Number of stored graphs.
    pub fn len(&self) -> Result<usize, KilnError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let graphs = read_txn.open_table(GRAPHS).map_err(io_err)?;
        let count = graphs.len().map_err(io_err)?;
        Ok(usize::try_from(count).unwrap_or(usize::MAX))
    }

    /// Whether the store holds no graphs.
    pub fn is_empty(&self) -> Result<bool, KilnError> {
        Ok(self.len()? == 0)
    }

    /// Number of successful saves over the store's lifetime.
    pub fn save_count(&self) -> Result<u64, KilnError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let metadata = read_txn.open_table(METADATA).map_err(io_err)?;
        Ok(metadata
            .get(SAVE_COUNT_KEY)
            .map_err(io_err)?
            .map_or(0, |v| v.value()))
    }

    /// Compact the database file.
    pub fn compact(&mut self) -> Result<(), KilnError> {
        self.db.compact().map_err(io_err)?;
        Ok(())
    }
}
