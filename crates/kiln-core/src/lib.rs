//! # kiln-core
//!
//! The incremental rebuild engine of Kiln.
//!
//! This crate owns the persistent build graph (artifacts, transformers and
//! rule nodes) and decides, build after build, which rules must run again
//! and over which inputs:
//!
//! - [`RuleNode::apply`] diffs a rule's current inputs against the inputs it
//!   last ran on, consults a [`StalenessPredicate`] and asks a
//!   [`RuleApplicator`] to re-run the rule over the minimal input set.
//! - [`BuildPass`] applies every rule node of a graph in dependency order.
//! - [`formats`] and [`storage`] persist the graph between builds.
//!
//! ## Architectural Constraints
//!
//! - Deterministic: every container that is iterated or persisted is
//!   ordered, so a pass over the same graph always does the same thing.
//! - No async and no network dependencies.
//! - The engine never executes commands; it only maintains the graph.

// =============================================================================
// MODULES
// =============================================================================

pub mod applicator;
pub mod artifact;
pub mod artifact_set;
pub mod formats;
pub mod graph;
pub mod pass;
pub mod primitives;
pub mod product;
pub mod rule;
pub mod rule_node;
pub mod staleness;
pub mod storage;
pub mod transformer;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    ArtifactId, CodeLocation, FileTag, FileTags, KilnError, NodeRef, ProductId, ProjectId, RuleId,
    RuleNodeId, TransformerId,
};

// =============================================================================
// RE-EXPORTS: Build Graph
// =============================================================================

pub use artifact::{Artifact, BuildGraphNode};
pub use artifact_set::ArtifactSet;
pub use graph::{BuildGraph, SerializableBuildGraph};
pub use product::{
    ProductsByName, ProjectBuildData, ProjectsByName, ResolvedProduct, ResolvedProject,
};
pub use rule::{OutputTemplate, PropertyRef, PropertyScope, Rule, RuleBuilder};
pub use transformer::{RecordedProperty, Transformer};

// =============================================================================
// RE-EXPORTS: Rule Application
// =============================================================================

pub use applicator::{AppliedRule, GraphApplicator, RuleApplicator};
pub use pass::{BuildPass, PassReport, evaluation_order, link_rule_nodes_by_tags};
pub use rule_node::{ApplicationResult, EvaluationContext, RuleNode};
pub use staleness::{PropertyDrift, StalenessPredicate};

// =============================================================================
// RE-EXPORTS: Persistence
// =============================================================================

pub use formats::{PersistenceHeader, graph_from_bytes, graph_to_bytes};
pub use storage::RedbStore;
