//! # Artifacts
//!
//! An `Artifact` is the graph node for one file, either supplied by the
//! project (a source) or generated by a transformer.
//!
//! Edge direction follows the build: an artifact's *parents* are the nodes
//! it feeds into, its *children* the nodes it was derived from.

use crate::{ArtifactId, FileTag, FileTags, NodeRef, ProductId, TransformerId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// =============================================================================
// NODE CAPABILITY
// =============================================================================

/// Parent/child edges shared by every node kind in the build graph.
pub trait BuildGraphNode {
    /// This node as an edge endpoint.
    fn node_ref(&self) -> NodeRef;

    /// Nodes this node feeds into.
    fn parents(&self) -> &BTreeSet<NodeRef>;

    /// Nodes this node is derived from.
    fn children(&self) -> &BTreeSet<NodeRef>;

    /// Artifact parents only.
    fn parent_artifacts(&self) -> impl Iterator<Item = ArtifactId> + '_ {
        self.parents().iter().filter_map(|n| n.as_artifact())
    }

    /// Artifact children only.
    fn child_artifacts(&self) -> impl Iterator<Item = ArtifactId> + '_ {
        self.children().iter().filter_map(|n| n.as_artifact())
    }
}

// =============================================================================
// ARTIFACT
// =============================================================================

/// A file node in the build graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Graph identity.
    pub id: ArtifactId,
    /// Path within the owning product.
    pub file_path: String,
    /// Owning product.
    pub product: ProductId,
    /// Role classification. Change through `BuildGraph::set_file_tags` so the
    /// tag index stays in sync.
    pub(crate) file_tags: FileTags,
    /// Producing transformer; `Some` iff the artifact is generated.
    pub transformer: Option<TransformerId>,
    /// Whether the artifact stands for a property injected by a dependency
    /// rather than a real input file.
    pub target_of_module: bool,
    pub(crate) parents: BTreeSet<NodeRef>,
    pub(crate) children: BTreeSet<NodeRef>,
}

impl Artifact {
    /// Create a source artifact (no transformer, no edges).
    #[must_use]
    pub fn new(id: ArtifactId, product: ProductId, file_path: impl Into<String>) -> Self {
        Self {
            id,
            file_path: file_path.into(),
            product,
            file_tags: FileTags::new(),
            transformer: None,
            target_of_module: false,
            parents: BTreeSet::new(),
            children: BTreeSet::new(),
        }
    }

    /// Current tags.
    #[must_use]
    pub const fn file_tags(&self) -> &FileTags {
        &self.file_tags
    }

    /// Whether the artifact carries `tag`.
    #[must_use]
    pub fn has_tag(&self, tag: &FileTag) -> bool {
        self.file_tags.contains(tag)
    }

    /// Whether the artifact was produced by a transformer.
    #[must_use]
    pub const fn is_generated(&self) -> bool {
        self.transformer.is_some()
    }

    /// File name component of the path.
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.file_path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&self.file_path)
    }

    /// File name without its last extension.
    #[must_use]
    pub fn base_name(&self) -> &str {
        let name = self.file_name();
        match name.rfind('.') {
            Some(0) | None => name,
            Some(dot) => &name[..dot],
        }
    }
}

impl BuildGraphNode for Artifact {
    fn node_ref(&self) -> NodeRef {
        NodeRef::Artifact(self.id)
    }

    fn parents(&self) -> &BTreeSet<NodeRef> {
        &self.parents
    }

    fn children(&self) -> &BTreeSet<NodeRef> {
        &self.children
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) {}", self.file_path, self.id, self.file_tags)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_and_base_names() {
        let a = Artifact::new(ArtifactId(1), ProductId(1), "src/net/socket.cpp");
        assert_eq!(a.file_name(), "socket.cpp");
        assert_eq!(a.base_name(), "socket");

        let hidden = Artifact::new(ArtifactId(2), ProductId(1), "conf/.env");
        assert_eq!(hidden.base_name(), ".env");

        let plain = Artifact::new(ArtifactId(3), ProductId(1), "Makefile");
        assert_eq!(plain.base_name(), "Makefile");
    }

    #[test]
    fn parent_artifacts_skip_rule_nodes() {
        let mut a = Artifact::new(ArtifactId(1), ProductId(1), "a.c");
        a.parents.insert(NodeRef::Artifact(ArtifactId(2)));
        a.parents.insert(NodeRef::Rule(crate::RuleNodeId(9)));

        let parents: Vec<_> = a.parent_artifacts().collect();
        assert_eq!(parents, vec![ArtifactId(2)]);
        assert!(!a.is_generated());
    }
}
