//! # Core Type Definitions
//!
//! This module contains the shared vocabulary of the Kiln build graph:
//! - Graph identifiers (`ArtifactId`, `TransformerId`, `RuleId`, `RuleNodeId`,
//!   `ProductId`, `ProjectId`)
//! - Heterogeneous edge endpoints (`NodeRef`)
//! - File tags (`FileTag`, `FileTags`)
//! - Declaration locations (`CodeLocation`)
//! - Error types (`KilnError`)
//!
//! ## Identity
//!
//! All identifiers are plain integers allocated by the `BuildGraph`.
//! They survive persistence unchanged, which is what lets rule nodes and
//! transformers be re-linked to their rules and products after a load.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

// =============================================================================
// GRAPH IDENTIFIERS
// =============================================================================

/// Identifier of a file artifact within a build graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ArtifactId(pub u64);

/// Identifier of a transformer (one recorded rule execution).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransformerId(pub u64);

/// Identifier of a rule definition.
///
/// Two rules are the same rule iff their ids are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RuleId(pub u64);

/// Identifier of a rule node (a rule bound to a product).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RuleNodeId(pub u64);

/// Identifier of a resolved product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProductId(pub u64);

/// Identifier of a resolved (top-level) project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProjectId(pub u64);

macro_rules! display_id {
    ($($ty:ident => $prefix:literal),* $(,)?) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, concat!($prefix, "#{}"), self.0)
                }
            }
        )*
    };
}

display_id! {
    ArtifactId => "artifact",
    TransformerId => "transformer",
    RuleId => "rule",
    RuleNodeId => "rule-node",
    ProductId => "product",
    ProjectId => "project",
}

// =============================================================================
// NODE REFERENCES
// =============================================================================

/// One endpoint of a parent/child edge.
///
/// Artifacts and rule nodes share a single edge vocabulary so that
/// traversals can walk the graph without knowing which kind of node
/// they are standing on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeRef {
    /// A file artifact.
    Artifact(ArtifactId),
    /// A rule node.
    Rule(RuleNodeId),
}

impl NodeRef {
    /// The artifact id, if this reference points at an artifact.
    #[must_use]
    pub const fn as_artifact(self) -> Option<ArtifactId> {
        match self {
            Self::Artifact(id) => Some(id),
            Self::Rule(_) => None,
        }
    }

    /// The rule node id, if this reference points at a rule node.
    #[must_use]
    pub const fn as_rule_node(self) -> Option<RuleNodeId> {
        match self {
            Self::Rule(id) => Some(id),
            Self::Artifact(_) => None,
        }
    }
}

// =============================================================================
// FILE TAGS
// =============================================================================

/// A tag classifying the role of an artifact, e.g. `"cpp"` or `"obj"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FileTag(pub String);

impl FileTag {
    /// Create a new file tag.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the tag as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FileTag {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for FileTag {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// An ordered set of file tags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileTags(BTreeSet<FileTag>);

impl FileTags {
    /// Create an empty tag set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tag. Returns `true` if the tag was not present.
    pub fn insert(&mut self, tag: impl Into<FileTag>) -> bool {
        self.0.insert(tag.into())
    }

    /// Remove a tag. Returns `true` if the tag was present.
    pub fn remove(&mut self, tag: &FileTag) -> bool {
        self.0.remove(tag)
    }

    /// Check whether the set carries `tag`.
    #[must_use]
    pub fn contains(&self, tag: &FileTag) -> bool {
        self.0.contains(tag)
    }

    /// Check whether the two sets share at least one tag.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        let (small, large) = if self.0.len() <= other.0.len() {
            (&self.0, &other.0)
        } else {
            (&other.0, &self.0)
        };
        small.iter().any(|tag| large.contains(tag))
    }

    /// Check whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of tags.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate over the tags in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &FileTag> {
        self.0.iter()
    }
}

impl<T: Into<FileTag>> FromIterator<T> for FileTags {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl<'a> IntoIterator for &'a FileTags {
    type Item = &'a FileTag;
    type IntoIter = std::collections::btree_set::Iter<'a, FileTag>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for FileTags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, tag) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "\"{}\"", tag)?;
        }
        f.write_str("]")
    }
}

// =============================================================================
// CODE LOCATION
// =============================================================================

/// Where a rule was declared.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodeLocation {
    /// Declaring file.
    pub file: String,
    /// 1-based line, 0 if unknown.
    pub line: u32,
    /// 1-based column, 0 if unknown.
    pub column: u32,
}

impl CodeLocation {
    /// Create a new location.
    #[must_use]
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for CodeLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.file.is_empty() {
            return f.write_str("<unknown>");
        }
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the Kiln engine.
///
/// - No silent failures
/// - Use `Result<T, KilnError>` for fallible operations
/// - `BrokenInvariant` is fatal for the whole build pass; everything else
///   is reported to the caller to decide
#[derive(Debug, Error)]
pub enum KilnError {
    /// The graph is inconsistent. The build pass must stop.
    #[error("broken graph invariant in {rule} for product '{product}' at {artifact}: {detail}")]
    BrokenInvariant {
        /// Human-readable rule description.
        rule: String,
        /// Name of the owning product.
        product: String,
        /// Offending artifact.
        artifact: ArtifactId,
        /// What was expected.
        detail: String,
    },

    /// The rule node's owning product no longer exists.
    #[error("rule node {node} ({rule}) has no owning product")]
    OrphanedRuleNode {
        /// The inert rule node.
        node: RuleNodeId,
        /// Human-readable rule description.
        rule: String,
    },

    /// The requested artifact was not found in the graph.
    #[error("Artifact not found: {0}")]
    ArtifactNotFound(ArtifactId),

    /// The requested transformer was not found in the graph.
    #[error("Transformer not found: {0}")]
    TransformerNotFound(TransformerId),

    /// The requested product was not found in the graph.
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// The requested rule was not found in the rule registry.
    #[error("Rule not found: {0}")]
    RuleNotFound(RuleId),

    /// The graph could not be assembled or re-linked.
    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    /// A serialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A deserialization error occurred.
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),
}

impl KilnError {
    /// Whether this error must abort the entire build pass.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::BrokenInvariant { .. })
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_tags_intersect() {
        let a: FileTags = ["cpp", "hpp"].into_iter().collect();
        let b: FileTags = ["hpp", "obj"].into_iter().collect();
        let c: FileTags = ["obj"].into_iter().collect();

        assert!(a.intersects(&b));
        assert!(b.intersects(&a));
        assert!(!a.intersects(&c));
        assert!(!a.intersects(&FileTags::new()));
    }

    #[test]
    fn file_tags_display_sorted() {
        let tags: FileTags = ["obj", "cpp"].into_iter().collect();
        assert_eq!(tags.to_string(), r#"["cpp", "obj"]"#);
    }

    #[test]
    fn node_ref_accessors() {
        let a = NodeRef::Artifact(ArtifactId(3));
        let r = NodeRef::Rule(RuleNodeId(4));

        assert_eq!(a.as_artifact(), Some(ArtifactId(3)));
        assert_eq!(a.as_rule_node(), None);
        assert_eq!(r.as_rule_node(), Some(RuleNodeId(4)));
        assert_eq!(r.as_artifact(), None);
    }

    #[test]
    fn only_broken_invariant_is_fatal() {
        let fatal = KilnError::BrokenInvariant {
            rule: "compiler".to_string(),
            product: "app".to_string(),
            artifact: ArtifactId(1),
            detail: "missing input".to_string(),
        };
        assert!(fatal.is_fatal());
        assert!(!KilnError::ArtifactNotFound(ArtifactId(1)).is_fatal());
        assert!(
            !KilnError::OrphanedRuleNode {
                node: RuleNodeId(1),
                rule: "r".to_string()
            }
            .is_fatal()
        );
    }

    #[test]
    fn location_display() {
        assert_eq!(CodeLocation::new("rules.kiln", 4, 2).to_string(), "rules.kiln:4:2");
        assert_eq!(CodeLocation::default().to_string(), "<unknown>");
    }
}
