//! # Rule Applicator
//!
//! The collaborator that actually runs a rule over a set of inputs and the
//! one that tears down outputs whose inputs vanished.
//!
//! [`GraphApplicator`] is the in-graph implementation: it materializes
//! output artifacts from the rule's [`OutputTemplate`]s, wires the edges and
//! records a transformer per invocation. It executes no commands; command
//! execution happens downstream of the graph.

use crate::artifact::BuildGraphNode;
use crate::graph::BuildGraph;
use crate::product::ResolvedProduct;
use crate::rule::{OutputTemplate, PropertyRef, PropertyScope};
use crate::transformer::RecordedProperty;
use crate::{ArtifactId, ArtifactSet, KilnError, Rule, TransformerId};
use std::sync::Arc;
use tracing::{debug, trace};

// =============================================================================
// TRAIT
// =============================================================================

/// Artifacts touched by one [`RuleApplicator::apply_rule`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedRule {
    /// Newly created output artifacts.
    pub created: ArtifactSet,
    /// Existing output artifacts that must be regenerated.
    pub invalidated: ArtifactSet,
}

/// Runs rules against the graph on behalf of a rule node.
pub trait RuleApplicator {
    /// Apply `rule` in `product` to `inputs`.
    ///
    /// Every transformer this creates or updates must record every input it
    /// derived outputs from.
    fn apply_rule(
        &mut self,
        graph: &mut BuildGraph,
        product: &ResolvedProduct,
        rule: &Arc<Rule>,
        inputs: &ArtifactSet,
    ) -> Result<AppliedRule, KilnError>;

    /// Remove `outputs_to_remove` unless they are still derived from
    /// `remaining_inputs`. Returns the artifacts actually removed.
    fn handle_removed_rule_outputs(
        &mut self,
        graph: &mut BuildGraph,
        remaining_inputs: &ArtifactSet,
        outputs_to_remove: &ArtifactSet,
    ) -> Result<ArtifactSet, KilnError>;
}

// =============================================================================
// GRAPH APPLICATOR
// =============================================================================

/// Applies rules by materializing their declared outputs in the graph.
#[derive(Debug, Clone, Default)]
pub struct GraphApplicator {
    invocations: usize,
    removed: usize,
}

impl GraphApplicator {
    /// Create an applicator with zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of transformer invocations performed so far.
    #[must_use]
    pub const fn invocations(&self) -> usize {
        self.invocations
    }

    /// Number of artifacts removed so far.
    #[must_use]
    pub const fn removed(&self) -> usize {
        self.removed
    }

    /// Run one invocation of `rule` over `group`.
    fn invoke(
        &mut self,
        graph: &mut BuildGraph,
        product: &ResolvedProduct,
        rule: &Arc<Rule>,
        group: &[ArtifactId],
        result: &mut AppliedRule,
    ) -> Result<(), KilnError> {
        let primary = match group {
            [single] if !rule.multiplex() => graph.artifact(*single),
            _ => None,
        };
        let (file, base) = primary.map_or((String::new(), String::new()), |a| {
            (a.file_name().to_string(), a.base_name().to_string())
        });

        let mut outputs = Vec::with_capacity(rule.outputs().len());
        let mut transformer: Option<TransformerId> = None;
        for template in rule.outputs() {
            let path = expand_path(template, &product.name, rule.name(), &file, &base);
            match graph.find_artifact_by_path(product.id, &path) {
                Some(existing) => {
                    let owner = graph.transformer_of(existing);
                    match owner {
                        Some(t) if t.is_from_rule(rule) => {
                            transformer.get_or_insert(t.id);
                        }
                        _ => {
                            return Err(KilnError::InvalidGraph(format!(
                                "rule '{}' would overwrite '{}' in product '{}'",
                                rule.name(),
                                path,
                                product.name
                            )));
                        }
                    }
                    graph.set_file_tags(existing, template.file_tags.clone())?;
                    result.invalidated += existing;
                    outputs.push(existing);
                }
                None => {
                    let tid = match transformer {
                        Some(tid) => tid,
                        None => *transformer.insert(graph.create_transformer(rule, product.id)?),
                    };
                    let created =
                        graph.create_generated_artifact(tid, path, template.file_tags.clone())?;
                    result.created += created;
                    outputs.push(created);
                }
            }
        }

        let tid = match transformer.or_else(|| outputless_transformer(graph, product, rule, group)) {
            Some(tid) => tid,
            None => graph.create_transformer(rule, product.id)?,
        };
        let inputs: ArtifactSet = group.iter().copied().collect();
        for &output in &outputs {
            graph.assign_output(tid, output)?;
            graph.disconnect_children(output)?;
            for &input in group {
                graph.connect(output, input)?;
            }
        }
        graph.record_transformer_run(tid, inputs, record_properties(graph, product, rule))?;
        self.invocations = self.invocations.saturating_add(1);

        trace!(
            rule = %rule,
            transformer = %tid,
            inputs = group.len(),
            outputs = outputs.len(),
            "Transformer invoked"
        );
        Ok(())
    }

    /// Remove `id` and, transitively, generated parents left without any
    /// input.
    fn remove_with_exclusive_dependents(
        &mut self,
        graph: &mut BuildGraph,
        id: ArtifactId,
        removed: &mut ArtifactSet,
    ) -> Result<(), KilnError> {
        let Some(artifact) = graph.artifact(id) else {
            return Ok(());
        };
        let parents: Vec<ArtifactId> = artifact.parent_artifacts().collect();
        graph.remove_artifact(id)?;
        removed.insert(id);
        self.removed = self.removed.saturating_add(1);

        for parent in parents {
            let Some(parent_artifact) = graph.artifact(parent) else {
                continue;
            };
            let Some(tid) = parent_artifact.transformer else {
                continue;
            };
            if parent_artifact.child_artifacts().next().is_none() {
                self.remove_with_exclusive_dependents(graph, parent, removed)?;
            } else {
                graph.prune_transformer_input(tid, id);
            }
        }
        Ok(())
    }
}

impl RuleApplicator for GraphApplicator {
    fn apply_rule(
        &mut self,
        graph: &mut BuildGraph,
        product: &ResolvedProduct,
        rule: &Arc<Rule>,
        inputs: &ArtifactSet,
    ) -> Result<AppliedRule, KilnError> {
        let live: Vec<ArtifactId> = inputs
            .sorted()
            .into_iter()
            .filter(|id| graph.artifact(*id).is_some())
            .collect();

        let groups: Vec<Vec<ArtifactId>> = if rule.multiplex() {
            vec![live]
        } else if live.is_empty() {
            if rule.declares_inputs() && rule.requires_inputs() {
                Vec::new()
            } else {
                vec![Vec::new()]
            }
        } else {
            live.into_iter().map(|id| vec![id]).collect()
        };

        let mut result = AppliedRule::default();
        for group in &groups {
            self.invoke(graph, product, rule, group, &mut result)?;
        }

        debug!(
            rule = %rule,
            product = %product.name,
            invocations = groups.len(),
            created = result.created.len(),
            invalidated = result.invalidated.len(),
            "Rule applied"
        );
        Ok(result)
    }

    fn handle_removed_rule_outputs(
        &mut self,
        graph: &mut BuildGraph,
        remaining_inputs: &ArtifactSet,
        outputs_to_remove: &ArtifactSet,
    ) -> Result<ArtifactSet, KilnError> {
        let mut removed = ArtifactSet::new();
        for output in outputs_to_remove.sorted() {
            if removed.contains(output) || graph.artifact(output).is_none() {
                continue;
            }
            let still_derived = graph
                .transformer_of(output)
                .is_some_and(|t| t.inputs.intersects(remaining_inputs));
            if still_derived {
                trace!(artifact = %output, "Output still has inputs, keeping it");
                continue;
            }
            self.remove_with_exclusive_dependents(graph, output, &mut removed)?;
        }
        debug!(removed = %removed, "Removed rule outputs");
        Ok(removed)
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn expand_path(template: &OutputTemplate, product: &str, rule: &str, file: &str, base: &str) -> String {
    template
        .path
        .replace("{product}", product)
        .replace("{rule}", rule)
        .replace("{file}", file)
        .replace("{base}", base)
}

/// An earlier transformer of `rule` in `product` that owns no outputs and
/// covers `group`. Rules without output templates would otherwise gain a
/// fresh transformer on every run.
fn outputless_transformer(
    graph: &BuildGraph,
    product: &ResolvedProduct,
    rule: &Rule,
    group: &[ArtifactId],
) -> Option<TransformerId> {
    graph
        .transformers()
        .find(|t| {
            t.product == product.id
                && t.outputs.is_empty()
                && t.is_from_rule(rule)
                && (rule.multiplex() || group.is_empty() || group.iter().any(|&id| t.has_input(id)))
        })
        .map(|t| t.id)
}

/// Capture the current value of every property `rule` declares it reads.
fn record_properties(graph: &BuildGraph, product: &ResolvedProduct, rule: &Rule) -> Vec<RecordedProperty> {
    rule.used_properties()
        .iter()
        .map(|used| {
            let key = used.key.as_str();
            let (scope, value) = match &used.scope {
                PropertyScope::Product(None) => (
                    PropertyScope::Product(Some(product.name.clone())),
                    product.property(key),
                ),
                PropertyScope::Product(Some(name)) => (
                    PropertyScope::Product(Some(name.clone())),
                    graph.product_by_name(name).and_then(|p| p.property(key)),
                ),
                PropertyScope::Project(None) => match graph.project(product.project) {
                    Some(project) => (
                        PropertyScope::Project(Some(project.name.clone())),
                        project.property(key),
                    ),
                    None => (PropertyScope::Project(None), None),
                },
                PropertyScope::Project(Some(name)) => (
                    PropertyScope::Project(Some(name.clone())),
                    graph.project_by_name(name).and_then(|p| p.property(key)),
                ),
            };
            RecordedProperty {
                property: PropertyRef {
                    scope,
                    key: used.key.clone(),
                },
                value: value.map(str::to_owned),
            }
        })
        .collect()
}

// =============================================================================
// TESTS
// =============================================================================
