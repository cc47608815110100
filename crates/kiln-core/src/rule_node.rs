//! # Rule Node
//!
//! The graph node for one rule instantiated in one product, and the
//! incremental `apply` step that decides whether the rule has to run again.
//!
//! A rule node remembers the input set it was last applied to. On every
//! build it recomputes the current compatible inputs, diffs them against
//! that snapshot, asks the staleness predicate about every output the rule
//! produced, tears down outputs whose inputs vanished, and re-applies the
//! rule to the minimal candidate set.
//!
//! Outputs of one application can be inputs of the next rule node. The
//! driver (see [`crate::pass`]) feeds `created_nodes` and
//! `invalidated_nodes` forward as changed inputs.

use crate::applicator::RuleApplicator;
use crate::artifact::{Artifact, BuildGraphNode};
use crate::graph::BuildGraph;
use crate::product::{ProductsByName, ProjectsByName};
use crate::staleness::StalenessPredicate;
use crate::{ArtifactId, ArtifactSet, KilnError, NodeRef, ProductId, Rule, RuleId, RuleNodeId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, trace};

// =============================================================================
// APPLICATION CONTEXT AND RESULT
// =============================================================================

/// Read-only collaborators of one [`RuleNode::apply`] call.
#[derive(Clone, Copy)]
pub struct EvaluationContext<'a> {
    /// Decides whether a recorded transformer must run again.
    pub staleness: &'a dyn StalenessPredicate,
    /// Current products, keyed by name.
    pub products_by_name: &'a ProductsByName,
    /// Current projects, keyed by name.
    pub projects_by_name: &'a ProjectsByName,
}

impl fmt::Debug for EvaluationContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluationContext")
            .field("products", &self.products_by_name.len())
            .field("projects", &self.projects_by_name.len())
            .finish_non_exhaustive()
    }
}

/// Outcome of one [`RuleNode::apply`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplicationResult {
    /// `true` when nothing had to be done.
    pub up_to_date: bool,
    /// Artifacts created by the rule application.
    pub created_nodes: ArtifactSet,
    /// Existing artifacts whose content must be regenerated.
    pub invalidated_nodes: ArtifactSet,
}

impl ApplicationResult {
    fn up_to_date() -> Self {
        Self {
            up_to_date: true,
            ..Self::default()
        }
    }
}

// =============================================================================
// RULE NODE
// =============================================================================

/// One rule instantiated in one product.
#[derive(Debug, Clone)]
pub struct RuleNode {
    id: RuleNodeId,
    rule: Arc<Rule>,
    product: ProductId,
    old_input_artifacts: ArtifactSet,
    pub(crate) parents: BTreeSet<NodeRef>,
    pub(crate) children: BTreeSet<NodeRef>,
}

impl RuleNode {
    /// Create a node that has never been applied.
    #[must_use]
    pub fn new(id: RuleNodeId, rule: Arc<Rule>, product: ProductId) -> Self {
        Self {
            id,
            rule,
            product,
            old_input_artifacts: ArtifactSet::new(),
            parents: BTreeSet::new(),
            children: BTreeSet::new(),
        }
    }

    /// Graph identity.
    #[must_use]
    pub const fn id(&self) -> RuleNodeId {
        self.id
    }

    /// The rule this node instantiates.
    #[must_use]
    pub const fn rule(&self) -> &Arc<Rule> {
        &self.rule
    }

    /// The product this node belongs to. May refer to a discarded product.
    #[must_use]
    pub const fn product(&self) -> ProductId {
        self.product
    }

    /// The input set the node was last applied to.
    #[must_use]
    pub const fn old_input_artifacts(&self) -> &ArtifactSet {
        &self.old_input_artifacts
    }

    /// Rule nodes this node must be evaluated after.
    pub fn dependencies(&self) -> impl Iterator<Item = RuleNodeId> + '_ {
        self.children.iter().filter_map(|n| n.as_rule_node())
    }

    /// `RULE <rule> [<product>] located at <location>`.
    #[must_use]
    pub fn describe(&self, graph: &BuildGraph) -> String {
        let product = graph
            .product(self.product)
            .map_or_else(|| self.product.to_string(), |p| p.name.clone());
        format!("RULE {} [{}] located at {}", self.rule, product, self.rule.location())
    }

    fn orphaned(&self) -> KilnError {
        KilnError::OrphanedRuleNode {
            node: self.id,
            rule: self.rule.name().to_string(),
        }
    }

    // -------------------------------------------------------------------------
    // Input collection
    // -------------------------------------------------------------------------

    /// Whether `artifact` was produced by this node's rule.
    fn is_own_output(&self, graph: &BuildGraph, artifact: &Artifact) -> bool {
        artifact
            .transformer
            .and_then(|t| graph.transformer(t))
            .is_some_and(|t| t.is_from_rule(&self.rule))
    }

    /// The artifacts this node's rule currently accepts as inputs.
    ///
    /// Own-product artifacts tagged with an input tag (excluding module
    /// targets and the rule's own outputs), plus, when the rule consumes
    /// from dependencies, module targets of the own product and artifacts of
    /// every direct dependency that still has build data, in both cases
    /// carrying a from-dependency tag and no excluded tag.
    pub fn current_input_artifacts(&self, graph: &BuildGraph) -> Result<ArtifactSet, KilnError> {
        if graph.product(self.product).is_none() {
            return Err(self.orphaned());
        }

        let mut inputs = ArtifactSet::new();
        for tag in self.rule.inputs() {
            for artifact in graph.lookup_artifacts_by_file_tag(self.product, tag) {
                if artifact.target_of_module || self.is_own_output(graph, artifact) {
                    continue;
                }
                inputs += artifact.id;
            }
        }

        let from_dependencies = self.rule.inputs_from_dependencies();
        if from_dependencies.is_empty() {
            return Ok(inputs);
        }
        let excluded = self.rule.excluded_inputs();

        for tag in from_dependencies {
            for artifact in graph.lookup_artifacts_by_file_tag(self.product, tag) {
                if !artifact.target_of_module
                    || self.is_own_output(graph, artifact)
                    || artifact.file_tags().intersects(excluded)
                {
                    continue;
                }
                inputs += artifact.id;
            }
        }

        for &dependency in graph.dependencies(self.product) {
            if !graph.product_has_build_data(dependency) {
                continue;
            }
            inputs.extend(
                graph
                    .artifacts_of_product(dependency)
                    .filter(|a| {
                        a.file_tags().intersects(from_dependencies)
                            && !a.file_tags().intersects(excluded)
                    })
                    .map(|a| a.id),
            );
        }

        Ok(inputs)
    }

    /// Outputs this node's rule produced that are still in the graph, in id order.
    fn output_artifacts<'g>(&self, graph: &'g BuildGraph) -> Vec<&'g Artifact> {
        self.parent_artifacts()
            .filter_map(|id| graph.artifact(id))
            .filter(|a| self.is_own_output(graph, a))
            .collect()
    }

    // -------------------------------------------------------------------------
    // Apply
    // -------------------------------------------------------------------------

    /// Bring this node's outputs up to date with its inputs.
    ///
    /// `changed_inputs` are artifacts whose content changed since the last
    /// build. On a [`KilnError::BrokenInvariant`] nothing has been committed:
    /// the snapshot, the graph and the dirty flag are as before the call.
    pub fn apply(
        &mut self,
        graph: &mut BuildGraph,
        applicator: &mut dyn RuleApplicator,
        ctx: &EvaluationContext<'_>,
        changed_inputs: &ArtifactSet,
    ) -> Result<ApplicationResult, KilnError> {
        let product = graph.product(self.product).cloned().ok_or_else(|| self.orphaned())?;
        let multiplex = self.rule.multiplex();
        let input_less = !self.rule.declares_inputs() || !self.rule.requires_inputs();

        let all_compatible = self.current_input_artifacts(graph)?;
        let added = &all_compatible - &self.old_input_artifacts;
        let removed = &self.old_input_artifacts - &all_compatible;
        let mut up_to_date = changed_inputs.is_empty() && added.is_empty() && removed.is_empty();

        debug!(
            node = %self.id,
            rule = %self.rule,
            product = %product.name,
            compatible = all_compatible.len(),
            added = %added,
            removed = %removed,
            changed = %changed_inputs,
            "Applying rule node"
        );

        let mut inputs = if multiplex {
            all_compatible.clone()
        } else {
            changed_inputs + &added
        };

        // Transformer staleness: only the first output of this rule per
        // input is consulted, and a multiplex rule has one transformer for
        // all inputs, so its first input stands for the whole set.
        for input in all_compatible.sorted() {
            let Some(artifact) = graph.artifact(input) else {
                continue;
            };
            for parent in artifact.parent_artifacts() {
                let Some(transformer) = graph.transformer_of(parent) else {
                    continue;
                };
                if !transformer.is_from_rule(&self.rule) {
                    continue;
                }
                let owner = graph.product(transformer.product).map(|p| p.as_ref());
                if ctx.staleness.needs_rerun(
                    transformer,
                    owner,
                    ctx.products_by_name,
                    ctx.projects_by_name,
                ) {
                    trace!(input = %input, transformer = %transformer.id, "Transformer is stale");
                    up_to_date = false;
                    inputs += input;
                }
                break;
            }
            if multiplex {
                break;
            }
        }

        if up_to_date && input_less && inputs.is_empty() {
            let outputs = self.output_artifacts(graph);
            if outputs.is_empty() {
                up_to_date = false;
            }
            for output in outputs {
                let Some(transformer) = graph.transformer_of(output.id) else {
                    continue;
                };
                let owner = graph.product(transformer.product).map(|p| p.as_ref());
                if ctx.staleness.needs_rerun(
                    transformer,
                    owner,
                    ctx.products_by_name,
                    ctx.projects_by_name,
                ) {
                    up_to_date = false;
                    break;
                }
                if multiplex {
                    break;
                }
            }
        }

        if up_to_date {
            debug!(node = %self.id, rule = %self.rule, "Rule node is up to date");
            return Ok(ApplicationResult::up_to_date());
        }

        if !removed.is_empty() {
            let outputs_to_remove = self.outputs_of_removed_inputs(graph, &removed, &product.name)?;
            debug!(
                node = %self.id,
                outputs = %outputs_to_remove,
                "Removing outputs of vanished inputs"
            );
            applicator.handle_removed_rule_outputs(graph, &inputs, &outputs_to_remove)?;
        }

        let mut result = ApplicationResult::default();
        if !inputs.is_empty() || input_less {
            let applied = applicator.apply_rule(graph, &product, &self.rule, &inputs)?;
            for id in applied.created.iter() {
                self.parents.insert(NodeRef::Artifact(id));
            }
            result.created_nodes = applied.created;
            result.invalidated_nodes = applied.invalidated;
        }

        self.parents.retain(|n| match *n {
            NodeRef::Artifact(id) => graph.artifact_exists(id),
            NodeRef::Rule(_) => true,
        });
        self.old_input_artifacts = inputs;
        graph.set_dirty(product.project);

        debug!(
            node = %self.id,
            created = %result.created_nodes,
            invalidated = %result.invalidated_nodes,
            "Rule node applied"
        );
        Ok(result)
    }

    /// Outputs of this rule that were derived from inputs in `removed`.
    ///
    /// Every such output's transformer must list the removed input. An
    /// artifact that no longer exists has lost its edges, so its outputs are
    /// found through the recorded transformer inputs instead.
    fn outputs_of_removed_inputs(
        &self,
        graph: &BuildGraph,
        removed: &ArtifactSet,
        product_name: &str,
    ) -> Result<ArtifactSet, KilnError> {
        let mut outputs = ArtifactSet::new();
        for removed_id in removed.sorted() {
            let Some(artifact) = graph.artifact(removed_id) else {
                outputs.extend(
                    self.output_artifacts(graph)
                        .into_iter()
                        .filter(|o| {
                            graph
                                .transformer_of(o.id)
                                .is_some_and(|t| t.has_input(removed_id))
                        })
                        .map(|o| o.id),
                );
                continue;
            };
            for parent in artifact.parent_artifacts() {
                let parent_artifact = graph
                    .artifact(parent)
                    .ok_or(KilnError::ArtifactNotFound(parent))?;
                let Some(transformer) = graph.transformer_of(parent) else {
                    return Err(self.broken_invariant(
                        product_name,
                        removed_id,
                        format!("parent {} has no transformer", parent_artifact.file_path),
                    ));
                };
                if !transformer.is_from_rule(&self.rule) {
                    continue;
                }
                if !transformer.has_input(removed_id) {
                    return Err(self.broken_invariant(
                        product_name,
                        removed_id,
                        format!(
                            "{} is not an input of the transformer of {}",
                            artifact.file_path, parent_artifact.file_path
                        ),
                    ));
                }
                outputs += parent;
            }
        }
        Ok(outputs)
    }

    fn broken_invariant(&self, product: &str, artifact: ArtifactId, detail: String) -> KilnError {
        error!(
            rule = %self.rule,
            product,
            artifact = %artifact,
            location = %self.rule.location(),
            "{}",
            detail
        );
        KilnError::BrokenInvariant {
            rule: self.rule.name().to_string(),
            product: product.to_string(),
            artifact,
            detail,
        }
    }

    /// Re-attach a deserialized node to its rule.
    pub(crate) fn relink(sn: SerializableRuleNode, rule: Arc<Rule>) -> Self {
        Self {
            id: sn.id,
            rule,
            product: sn.product,
            old_input_artifacts: sn.old_input_artifacts,
            parents: sn.parents.into_iter().collect(),
            children: sn.children.into_iter().collect(),
        }
    }
}

impl BuildGraphNode for RuleNode {
    fn node_ref(&self) -> NodeRef {
        NodeRef::Rule(self.id)
    }

    fn parents(&self) -> &BTreeSet<NodeRef> {
        &self.parents
    }

    fn children(&self) -> &BTreeSet<NodeRef> {
        &self.children
    }
}

// =============================================================================
// SERIALIZATION SUPPORT
// =============================================================================

/// Serializable rule node; the rule is stored by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializableRuleNode {
    pub id: RuleNodeId,
    pub rule: RuleId,
    pub product: ProductId,
    pub old_input_artifacts: ArtifactSet,
    pub parents: Vec<NodeRef>,
    pub children: Vec<NodeRef>,
}

impl From<&RuleNode> for SerializableRuleNode {
    fn from(node: &RuleNode) -> Self {
        Self {
            id: node.id,
            rule: node.rule.id(),
            product: node.product,
            old_input_artifacts: node.old_input_artifacts.clone(),
            parents: node.parents.iter().copied().collect(),
            children: node.children.iter().copied().collect(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
