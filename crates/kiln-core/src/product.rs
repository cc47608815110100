//! # Products and Projects
//!
//! Resolved products and projects are the immutable, configuration-level
//! view of what is being built. They are shared through `Arc` so that the
//! by-name lookup maps handed to the staleness predicate do not borrow the
//! (mutably applied) build graph.
//!
//! `ProjectBuildData` carries the one piece of shared mutable project state
//! the engine touches: the dirty flag.

use crate::{ProductId, ProjectId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Products keyed by name.
pub type ProductsByName = BTreeMap<String, Arc<ResolvedProduct>>;

/// Projects keyed by name.
pub type ProjectsByName = BTreeMap<String, Arc<ResolvedProject>>;

/// A configured product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedProduct {
    /// Graph identity.
    pub id: ProductId,
    /// Unique product name.
    pub name: String,
    /// Top-level project the product belongs to.
    pub project: ProjectId,
    /// Configuration properties.
    pub properties: BTreeMap<String, String>,
    /// Directly depended-upon products.
    pub dependencies: Vec<ProductId>,
}

impl ResolvedProduct {
    /// Create a product with no properties or dependencies.
    #[must_use]
    pub fn new(id: ProductId, name: impl Into<String>, project: ProjectId) -> Self {
        Self {
            id,
            name: name.into(),
            project,
            properties: BTreeMap::new(),
            dependencies: Vec::new(),
        }
    }

    /// Set a property (builder style).
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Add a dependency (builder style).
    #[must_use]
    pub fn with_dependency(mut self, dependency: ProductId) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// Look up a property value.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// A configured top-level project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedProject {
    /// Graph identity.
    pub id: ProjectId,
    /// Unique project name.
    pub name: String,
    /// Configuration properties.
    pub properties: BTreeMap<String, String>,
}

impl ResolvedProject {
    /// Create a project with no properties.
    #[must_use]
    pub fn new(id: ProjectId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            properties: BTreeMap::new(),
        }
    }

    /// Set a property (builder style).
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Look up a property value.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// Build-time state of a top-level project.
#[derive(Debug, Default)]
pub struct ProjectBuildData {
    dirty: AtomicBool,
}

impl ProjectBuildData {
    /// Create clean build data.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the graph changed. Safe to call from several evaluators.
    pub fn set_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Whether the graph changed since the last `clear_dirty`.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Reset the flag. Only the driver calls this, between passes.
    pub fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::Release);
    }
}

impl Clone for ProjectBuildData {
    fn clone(&self) -> Self {
        Self {
            dirty: AtomicBool::new(self.is_dirty()),
        }
    }
}
