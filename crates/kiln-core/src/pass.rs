//! # Build Pass
//!
//! Applies every rule node of a graph once, in dependency order.
//!
//! The pass feeds artifacts created or invalidated by earlier nodes forward
//! as changed inputs of later nodes, skips rule nodes whose product is gone
//! and aborts on a broken graph invariant.

use crate::applicator::RuleApplicator;
use crate::graph::BuildGraph;
use crate::rule_node::EvaluationContext;
use crate::staleness::StalenessPredicate;
use crate::{ArtifactSet, KilnError, RuleNodeId};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

/// What one build pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Nodes that had nothing to do.
    pub up_to_date: Vec<RuleNodeId>,
    /// Nodes that were (re-)applied.
    pub applied: Vec<RuleNodeId>,
    /// Nodes skipped because their product no longer exists.
    pub orphaned: Vec<RuleNodeId>,
    /// Artifacts created during the pass.
    pub created: ArtifactSet,
    /// Artifacts invalidated during the pass.
    pub invalidated: ArtifactSet,
    /// Whether any project's graph changed.
    pub dirty: bool,
}

/// Drives rule-node application over a whole graph.
pub struct BuildPass<'a> {
    applicator: &'a mut dyn RuleApplicator,
    staleness: &'a dyn StalenessPredicate,
}

impl<'a> BuildPass<'a> {
    /// Create a pass over the given collaborators.
    pub fn new(applicator: &'a mut dyn RuleApplicator, staleness: &'a dyn StalenessPredicate) -> Self {
        Self {
            applicator,
            staleness,
        }
    }

    /// Apply every rule node once.
    ///
    /// `changed` lists artifacts whose content changed since the last pass.
    pub fn run(&mut self, graph: &mut BuildGraph, changed: &ArtifactSet) -> Result<PassReport, KilnError> {
        graph.clear_dirty_flags();
        let order = evaluation_order(graph)?;
        let products = graph.products_by_name();
        let projects = graph.projects_by_name();
        let ctx = EvaluationContext {
            staleness: self.staleness,
            products_by_name: &products,
            projects_by_name: &projects,
        };

        let mut changed = changed.clone();
        let mut report = PassReport::default();
        for id in order {
            let applicator = &mut *self.applicator;
            let changed_so_far = &changed;
            let outcome = graph.with_detached_rule_node(id, |node, graph| {
                let compatible = node.current_input_artifacts(graph)?;
                let node_changed = compatible.intersection(changed_so_far);
                node.apply(graph, applicator, &ctx, &node_changed)
            });
            match outcome {
                Ok(result) if result.up_to_date => report.up_to_date.push(id),
                Ok(result) => {
                    changed += &result.created_nodes;
                    changed += &result.invalidated_nodes;
                    report.created += &result.created_nodes;
                    report.invalidated += &result.invalidated_nodes;
                    report.applied.push(id);
                }
                Err(KilnError::OrphanedRuleNode { node, rule }) => {
                    warn!(node = %node, rule = %rule, "Skipping rule node without product");
                    report.orphaned.push(id);
                }
                Err(e) => return Err(e),
            }
        }

        report.dirty = graph.is_dirty();
        info!(
            applied = report.applied.len(),
            up_to_date = report.up_to_date.len(),
            orphaned = report.orphaned.len(),
            created = report.created.len(),
            invalidated = report.invalidated.len(),
            "Build pass finished"
        );
        Ok(report)
    }
}

/// Rule nodes in an order where every node follows its dependencies.
///
/// Ties are broken by node id. A dependency cycle is an error.
pub fn evaluation_order(graph: &BuildGraph) -> Result<Vec<RuleNodeId>, KilnError> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        Visiting,
        Done,
    }

    let mut marks: BTreeMap<RuleNodeId, Mark> = BTreeMap::new();
    let mut order = Vec::with_capacity(graph.rule_node_count());

    for root in graph.rule_nodes().map(|n| n.id()) {
        if marks.contains_key(&root) {
            continue;
        }
        // (node, dependencies still to visit)
        let mut stack: Vec<(RuleNodeId, Vec<RuleNodeId>)> = Vec::new();
        marks.insert(root, Mark::Visiting);
        stack.push((root, dependencies_of(graph, root)));

        while let Some((node, pending)) = stack.last_mut() {
            let node = *node;
            match pending.pop() {
                Some(dep) => match marks.get(&dep) {
                    Some(Mark::Done) => {}
                    Some(Mark::Visiting) => {
                        return Err(KilnError::InvalidGraph(format!(
                            "rule node dependency cycle through {} and {}",
                            node, dep
                        )));
                    }
                    None => {
                        marks.insert(dep, Mark::Visiting);
                        stack.push((dep, dependencies_of(graph, dep)));
                    }
                },
                None => {
                    marks.insert(node, Mark::Done);
                    order.push(node);
                    stack.pop();
                }
            }
        }
    }
    Ok(order)
}

fn dependencies_of(graph: &BuildGraph, id: RuleNodeId) -> Vec<RuleNodeId> {
    // Reversed so that popping visits ascending ids first.
    let mut deps: Vec<RuleNodeId> = graph
        .rule_node(id)
        .map(|n| n.dependencies().collect::<BTreeSet<_>>().into_iter().collect())
        .unwrap_or_default();
    deps.reverse();
    deps
}

/// Add rule-node dependency edges implied by file tags.
///
/// A node depends on every other node of the same product whose rule
/// produces one of its input tags, and on every node of a direct dependency
/// product whose rule produces one of its from-dependency tags. Returns the
/// number of edges added.
pub fn link_rule_nodes_by_tags(graph: &mut BuildGraph) -> Result<usize, KilnError> {
    let nodes: Vec<_> = graph
        .rule_nodes()
        .map(|n| (n.id(), n.product(), std::sync::Arc::clone(n.rule())))
        .collect();

    let mut edges = Vec::new();
    for (consumer, consumer_product, consumer_rule) in &nodes {
        let dependencies = graph.dependencies(*consumer_product);
        for (producer, producer_product, producer_rule) in &nodes {
            if producer == consumer {
                continue;
            }
            let produced = producer_rule.output_file_tags();
            let same_product = producer_product == consumer_product
                && produced.intersects(consumer_rule.inputs());
            let from_dependency = dependencies.contains(producer_product)
                && produced.intersects(consumer_rule.inputs_from_dependencies());
            if same_product || from_dependency {
                edges.push((*consumer, *producer));
            }
        }
    }

    let mut added = 0;
    for (consumer, producer) in edges {
        let known = graph
            .rule_node(consumer)
            .is_some_and(|n| n.dependencies().any(|d| d == producer));
        if !known {
            graph.add_rule_node_dependency(consumer, producer)?;
            added += 1;
        }
    }
    Ok(added)
}
