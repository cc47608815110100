//! # Rule Node Scenarios
//!
//! End-to-end behavior of `RuleNode::apply` against a real graph.
//!
//! ## Groups
//! - Incremental inputs: idempotence, minimality, multiplex totality
//! - Removed inputs: cleanup ordering, broken invariants
//! - Input-less rules and property drift
//! - Persistence of the input snapshot

use kiln_core::{
    AppliedRule, ApplicationResult, ArtifactId, ArtifactSet, BuildGraph, EvaluationContext,
    FileTags, GraphApplicator, KilnError, ProductId, ProductsByName, ProjectId, ProjectsByName,
    PropertyDrift, PropertyRef, ResolvedProduct, ResolvedProject, Rule, RuleApplicator, RuleId,
    RuleNodeId, StalenessPredicate, Transformer,
};
use std::cell::Cell;
use std::sync::Arc;

// =============================================================================
// FIXTURES
// =============================================================================

fn tags(list: &[&str]) -> FileTags {
    list.iter().copied().collect()
}

fn set(ids: &[ArtifactId]) -> ArtifactSet {
    ids.iter().copied().collect()
}

/// One call made by the rule node into its applicator.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Apply(ArtifactSet),
    RemoveOutputs {
        remaining: ArtifactSet,
        outputs: ArtifactSet,
    },
}

/// Records every call, then delegates to the real applicator.
#[derive(Debug, Default)]
struct Recording {
    inner: GraphApplicator,
    calls: Vec<Call>,
}

impl RuleApplicator for Recording {
    fn apply_rule(
        &mut self,
        graph: &mut BuildGraph,
        product: &ResolvedProduct,
        rule: &Arc<Rule>,
        inputs: &ArtifactSet,
    ) -> Result<AppliedRule, KilnError> {
        self.calls.push(Call::Apply(inputs.clone()));
        self.inner.apply_rule(graph, product, rule, inputs)
    }

    fn handle_removed_rule_outputs(
        &mut self,
        graph: &mut BuildGraph,
        remaining_inputs: &ArtifactSet,
        outputs_to_remove: &ArtifactSet,
    ) -> Result<ArtifactSet, KilnError> {
        self.calls.push(Call::RemoveOutputs {
            remaining: remaining_inputs.clone(),
            outputs: outputs_to_remove.clone(),
        });
        self.inner
            .handle_removed_rule_outputs(graph, remaining_inputs, outputs_to_remove)
    }
}

struct Workspace {
    graph: BuildGraph,
    app: ProductId,
    recorder: Recording,
}

impl Workspace {
    fn new() -> Self {
        let mut graph = BuildGraph::new();
        graph
            .add_project(ResolvedProject::new(ProjectId(1), "proj"))
            .expect("project");
        let app = graph
            .add_product(
                ResolvedProduct::new(ProductId(1), "app", ProjectId(1))
                    .with_property("optimization", "fast"),
            )
            .expect("product")
            .id;
        Self {
            graph,
            app,
            recorder: Recording::default(),
        }
    }

    fn source(&mut self, path: &str, file_tags: &[&str]) -> ArtifactId {
        self.graph
            .add_source_artifact(self.app, path, tags(file_tags))
            .expect("source")
    }

    fn node(&mut self, rule: Arc<Rule>) -> RuleNodeId {
        self.graph.add_rule_node(rule, self.app).expect("rule node")
    }

    fn try_apply(
        &mut self,
        node: RuleNodeId,
        changed: &ArtifactSet,
    ) -> Result<ApplicationResult, KilnError> {
        self.try_apply_with(node, changed, &PropertyDrift)
    }

    fn try_apply_with(
        &mut self,
        node: RuleNodeId,
        changed: &ArtifactSet,
        staleness: &dyn StalenessPredicate,
    ) -> Result<ApplicationResult, KilnError> {
        let products = self.graph.products_by_name();
        let projects = self.graph.projects_by_name();
        let ctx = EvaluationContext {
            staleness,
            products_by_name: &products,
            projects_by_name: &projects,
        };
        let recorder = &mut self.recorder;
        self.graph
            .with_detached_rule_node(node, |n, g| n.apply(g, recorder, &ctx, changed))
    }

    fn apply(&mut self, node: RuleNodeId, changed: &ArtifactSet) -> ApplicationResult {
        self.try_apply(node, changed).expect("apply")
    }

    fn snapshot(&self, node: RuleNodeId) -> ArtifactSet {
        self.graph
            .rule_node(node)
            .expect("node")
            .old_input_artifacts()
            .clone()
    }

    fn output(&self, path: &str) -> ArtifactId {
        self.graph.find_artifact_by_path(self.app, path).expect("output")
    }

    fn take_calls(&mut self) -> Vec<Call> {
        std::mem::take(&mut self.recorder.calls)
    }
}

fn compiler() -> Arc<Rule> {
    Rule::builder(RuleId(1), "compiler")
        .input("compile")
        .output("{base}.o", &["obj"])
        .uses_property(PropertyRef::product("optimization"))
        .build()
        .expect("rule")
}

fn linker() -> Arc<Rule> {
    Rule::builder(RuleId(2), "linker")
        .input("obj")
        .multiplex(true)
        .output("{product}", &["application"])
        .build()
        .expect("rule")
}

fn generator() -> Arc<Rule> {
    Rule::builder(RuleId(3), "version-header")
        .output("version.h", &["hpp"])
        .uses_property(PropertyRef::product("version"))
        .build()
        .expect("rule")
}

fn flagged_linker() -> Arc<Rule> {
    Rule::builder(RuleId(4), "linker")
        .input("obj")
        .multiplex(true)
        .output("{product}", &["application"])
        .uses_property(PropertyRef::product("optimization"))
        .build()
        .expect("rule")
}

/// Property drift that counts how often it was consulted.
#[derive(Default)]
struct CountingDrift {
    calls: Cell<usize>,
}

impl StalenessPredicate for CountingDrift {
    fn needs_rerun(
        &self,
        transformer: &Transformer,
        product: Option<&ResolvedProduct>,
        products_by_name: &ProductsByName,
        projects_by_name: &ProjectsByName,
    ) -> bool {
        self.calls.set(self.calls.get() + 1);
        PropertyDrift.needs_rerun(transformer, product, products_by_name, projects_by_name)
    }
}

// =============================================================================
// INCREMENTAL INPUTS
// =============================================================================

mod incremental_inputs {
    use super::*;

    #[test]
    fn second_apply_is_up_to_date() {
        let mut ws = Workspace::new();
        ws.source("a.c", &["compile"]);
        let node = ws.node(compiler());

        let first = ws.apply(node, &ArtifactSet::new());
        assert!(!first.up_to_date);
        assert_eq!(first.created_nodes.len(), 1);

        let second = ws.apply(node, &ArtifactSet::new());
        assert!(second.up_to_date);
        assert!(second.created_nodes.is_empty());
        assert!(second.invalidated_nodes.is_empty());
    }

    #[test]
    fn new_input_is_applied_alone() {
        let mut ws = Workspace::new();
        let a = ws.source("a.c", &["compile"]);
        let node = ws.node(compiler());
        ws.apply(node, &ArtifactSet::new());
        assert_eq!(ws.snapshot(node), set(&[a]));
        ws.take_calls();

        let b = ws.source("b.c", &["compile"]);
        let result = ws.apply(node, &ArtifactSet::new());

        assert!(!result.up_to_date);
        assert_eq!(ws.take_calls(), vec![Call::Apply(set(&[b]))]);
        assert_eq!(ws.snapshot(node), set(&[b]));
        assert_eq!(result.created_nodes, set(&[ws.output("b.o")]));
    }

    #[test]
    fn snapshot_matching_inputs_is_up_to_date() {
        let mut ws = Workspace::new();
        let a = ws.source("a.c", &["compile"]);
        let node = ws.node(compiler());
        ws.apply(node, &ArtifactSet::new());
        let b = ws.source("b.c", &["compile"]);
        ws.apply(node, &ArtifactSet::new());
        assert_eq!(ws.snapshot(node), set(&[b]));

        ws.graph.remove_artifact(a).expect("delete a.c");
        ws.take_calls();
        let result = ws.apply(node, &ArtifactSet::new());

        assert!(result.up_to_date);
        assert!(ws.take_calls().is_empty());
    }

    #[test]
    fn changed_input_reapplies_only_that_input() {
        let mut ws = Workspace::new();
        let a = ws.source("a.c", &["compile"]);
        ws.source("b.c", &["compile"]);
        let node = ws.node(compiler());
        ws.apply(node, &ArtifactSet::new());
        ws.take_calls();

        let result = ws.apply(node, &set(&[a]));

        assert_eq!(ws.take_calls(), vec![Call::Apply(set(&[a]))]);
        assert_eq!(result.invalidated_nodes, set(&[ws.output("a.o")]));
        assert!(result.created_nodes.is_empty());
    }

    #[test]
    fn multiplex_rule_takes_every_input() {
        let mut ws = Workspace::new();
        let a = ws.source("a.o", &["obj"]);
        let b = ws.source("b.o", &["obj"]);
        let node = ws.node(linker());
        ws.apply(node, &ArtifactSet::new());
        ws.take_calls();

        let c = ws.source("c.o", &["obj"]);
        let result = ws.apply(node, &ArtifactSet::new());

        assert_eq!(ws.take_calls(), vec![Call::Apply(set(&[a, b, c]))]);
        assert_eq!(ws.snapshot(node), set(&[a, b, c]));
        assert_eq!(result.invalidated_nodes, set(&[ws.output("app")]));

        ws.apply(node, &set(&[b]));
        assert_eq!(ws.take_calls(), vec![Call::Apply(set(&[a, b, c]))]);
    }

    #[test]
    fn applying_marks_project_dirty() {
        let mut ws = Workspace::new();
        ws.source("a.c", &["compile"]);
        let node = ws.node(compiler());

        ws.apply(node, &ArtifactSet::new());
        assert!(ws.graph.is_dirty());

        ws.graph.clear_dirty_flags();
        ws.apply(node, &ArtifactSet::new());
        assert!(!ws.graph.is_dirty());
    }
}

// =============================================================================
// REMOVED INPUTS
// =============================================================================

mod removed_inputs {
    use super::*;

    #[test]
    fn outputs_are_queued_before_reapplication() {
        let mut ws = Workspace::new();
        let a = ws.source("a.o", &["obj"]);
        let b = ws.source("b.o", &["obj"]);
        let node = ws.node(linker());
        ws.apply(node, &ArtifactSet::new());
        let exe = ws.output("app");
        ws.take_calls();

        ws.graph.remove_artifact(a).expect("delete a.o");
        let result = ws.apply(node, &ArtifactSet::new());

        assert_eq!(
            ws.take_calls(),
            vec![
                Call::RemoveOutputs {
                    remaining: set(&[b]),
                    outputs: set(&[exe]),
                },
                Call::Apply(set(&[b])),
            ]
        );
        assert_eq!(result.invalidated_nodes, set(&[exe]));
        assert_eq!(ws.graph.transformer_of(exe).expect("transformer").inputs, set(&[b]));
    }

    #[test]
    fn untagged_input_tears_down_its_output() {
        let mut ws = Workspace::new();
        let a = ws.source("a.c", &["compile"]);
        let node = ws.node(compiler());
        ws.apply(node, &ArtifactSet::new());
        let a_o = ws.output("a.o");
        ws.take_calls();

        ws.graph.set_file_tags(a, tags(&["doc"])).expect("untag");
        let result = ws.apply(node, &ArtifactSet::new());

        assert!(!result.up_to_date);
        assert_eq!(
            ws.take_calls(),
            vec![Call::RemoveOutputs {
                remaining: ArtifactSet::new(),
                outputs: set(&[a_o]),
            }]
        );
        assert!(ws.graph.artifact(a_o).is_none());
        assert!(ws.snapshot(node).is_empty());
    }

    #[test]
    fn unrecorded_input_is_a_broken_invariant() {
        let mut ws = Workspace::new();
        let a = ws.source("a.c", &["compile"]);
        let node = ws.node(compiler());
        ws.apply(node, &ArtifactSet::new());
        let a_o = ws.output("a.o");
        let transformer = ws.graph.transformer_of(a_o).expect("transformer").id;

        ws.graph
            .record_transformer_run(transformer, ArtifactSet::new(), Vec::new())
            .expect("corrupt");
        ws.graph.set_file_tags(a, tags(&["doc"])).expect("untag");
        ws.graph.clear_dirty_flags();
        ws.take_calls();

        let err = ws
            .try_apply(node, &ArtifactSet::new())
            .expect_err("broken invariant");

        assert!(matches!(err, KilnError::BrokenInvariant { artifact, .. } if artifact == a));
        assert!(err.is_fatal());
        let message = err.to_string();
        assert!(message.contains("compiler"), "{message}");
        assert!(message.contains("'app'"), "{message}");
        assert!(ws.take_calls().is_empty());
        assert!(ws.graph.artifact(a_o).is_some());
        assert_eq!(ws.snapshot(node), set(&[a]));
        assert!(!ws.graph.is_dirty());
    }
}

// =============================================================================
// INPUT-LESS RULES AND PROPERTY DRIFT
// =============================================================================

mod input_less_and_drift {
    use super::*;

    #[test]
    fn input_less_rule_runs_on_first_evaluation() {
        let mut ws = Workspace::new();
        let node = ws.node(generator());

        let first = ws.apply(node, &ArtifactSet::new());
        assert!(!first.up_to_date);
        assert_eq!(ws.take_calls(), vec![Call::Apply(ArtifactSet::new())]);
        assert_eq!(first.created_nodes, set(&[ws.output("version.h")]));

        let second = ws.apply(node, &ArtifactSet::new());
        assert!(second.up_to_date);
    }

    #[test]
    fn input_less_rule_reruns_on_property_drift() {
        let mut ws = Workspace::new();
        let node = ws.node(generator());
        ws.apply(node, &ArtifactSet::new());

        let updated = ResolvedProduct::new(ProductId(1), "app", ProjectId(1))
            .with_property("optimization", "fast")
            .with_property("version", "2.0");
        ws.graph.update_product(updated).expect("update");

        let result = ws.apply(node, &ArtifactSet::new());
        assert!(!result.up_to_date);
        assert_eq!(result.invalidated_nodes, set(&[ws.output("version.h")]));
    }

    #[test]
    fn deleted_output_of_input_less_rule_is_regenerated() {
        let mut ws = Workspace::new();
        let node = ws.node(generator());
        ws.apply(node, &ArtifactSet::new());
        let header = ws.output("version.h");

        ws.graph.remove_artifact(header).expect("delete");
        let result = ws.apply(node, &ArtifactSet::new());

        assert!(!result.up_to_date);
        assert_eq!(result.created_nodes.len(), 1);
    }

    #[test]
    fn property_drift_reruns_stale_input() {
        let mut ws = Workspace::new();
        let a = ws.source("a.c", &["compile"]);
        let node = ws.node(compiler());
        ws.apply(node, &ArtifactSet::new());
        ws.take_calls();

        let updated = ResolvedProduct::new(ProductId(1), "app", ProjectId(1))
            .with_property("optimization", "small");
        ws.graph.update_product(updated).expect("update");

        let result = ws.apply(node, &ArtifactSet::new());
        assert!(!result.up_to_date);
        assert_eq!(ws.take_calls(), vec![Call::Apply(set(&[a]))]);

        let again = ws.apply(node, &ArtifactSet::new());
        assert!(again.up_to_date);
    }

    #[test]
    fn multiplex_rule_consults_one_representative_input() {
        let mut ws = Workspace::new();
        ws.source("a.o", &["obj"]);
        ws.source("b.o", &["obj"]);
        ws.source("c.o", &["obj"]);
        let node = ws.node(flagged_linker());
        ws.apply(node, &ArtifactSet::new());

        let drift = CountingDrift::default();
        let result = ws
            .try_apply_with(node, &ArtifactSet::new(), &drift)
            .expect("apply");

        assert!(result.up_to_date);
        assert_eq!(drift.calls.get(), 1);
    }

    #[test]
    fn property_drift_reapplies_whole_multiplex_set() {
        let mut ws = Workspace::new();
        let a = ws.source("a.o", &["obj"]);
        let b = ws.source("b.o", &["obj"]);
        let c = ws.source("c.o", &["obj"]);
        let node = ws.node(flagged_linker());
        ws.apply(node, &ArtifactSet::new());
        ws.take_calls();

        let updated = ResolvedProduct::new(ProductId(1), "app", ProjectId(1))
            .with_property("optimization", "small");
        ws.graph.update_product(updated).expect("update");

        let drift = CountingDrift::default();
        let result = ws
            .try_apply_with(node, &ArtifactSet::new(), &drift)
            .expect("apply");

        assert!(!result.up_to_date);
        assert_eq!(drift.calls.get(), 1);
        assert_eq!(ws.take_calls(), vec![Call::Apply(set(&[a, b, c]))]);
        assert_eq!(ws.snapshot(node), set(&[a, b, c]));
        assert_eq!(result.invalidated_nodes, set(&[ws.output("app")]));
    }

    #[test]
    fn rule_without_outputs_reuses_its_transformer() {
        let mut ws = Workspace::new();
        let a = ws.source("a.c", &["compile"]);
        let check = Rule::builder(RuleId(5), "check")
            .input("compile")
            .build()
            .expect("rule");
        let node = ws.node(check);

        for _ in 0..5 {
            ws.apply(node, &set(&[a]));
            assert_eq!(ws.graph.transformer_count(), 1);
        }
        let transformer = ws.graph.transformers().next().expect("transformer");
        assert!(transformer.has_input(a));
    }

    #[test]
    fn input_less_rule_without_outputs_keeps_one_transformer() {
        let mut ws = Workspace::new();
        let stamp = Rule::builder(RuleId(6), "stamp").build().expect("rule");
        let node = ws.node(stamp);

        for _ in 0..3 {
            let result = ws.apply(node, &ArtifactSet::new());
            assert!(!result.up_to_date);
            assert_eq!(ws.graph.transformer_count(), 1);
        }
    }

    #[test]
    fn discarded_product_makes_node_inert() {
        let mut ws = Workspace::new();
        ws.source("a.c", &["compile"]);
        let node = ws.node(compiler());
        ws.apply(node, &ArtifactSet::new());

        ws.graph.remove_product(ws.app).expect("remove product");
        let result = ws.try_apply(node, &ArtifactSet::new());

        assert!(matches!(result, Err(KilnError::OrphanedRuleNode { .. })));
        assert_eq!(ws.take_calls().len(), 1);
    }
}

// =============================================================================
// PERSISTENCE
// =============================================================================

mod persistence {
    use super::*;
    use kiln_core::{RedbStore, graph_from_bytes, graph_to_bytes};
    use tempfile::tempdir;

    #[test]
    fn snapshot_survives_reload() {
        let mut ws = Workspace::new();
        ws.source("a.c", &["compile"]);
        let node = ws.node(compiler());
        ws.apply(node, &ArtifactSet::new());

        let bytes = graph_to_bytes(&ws.graph).expect("serialize");
        ws.graph = graph_from_bytes(&bytes).expect("deserialize");
        ws.take_calls();

        let result = ws.apply(node, &ArtifactSet::new());
        assert!(result.up_to_date);
        assert!(ws.take_calls().is_empty());
    }

    #[test]
    fn redb_roundtrip_keeps_graph() {
        let temp = tempdir().expect("temp dir");
        let store = RedbStore::open(temp.path().join("kiln.redb")).expect("open");

        let mut ws = Workspace::new();
        ws.source("a.c", &["compile"]);
        let node = ws.node(compiler());
        ws.apply(node, &ArtifactSet::new());
        store.save("proj", &ws.graph).expect("save");

        let loaded = store.load("proj").expect("load").expect("graph");
        assert_eq!(
            graph_to_bytes(&loaded).expect("serialize"),
            graph_to_bytes(&ws.graph).expect("serialize")
        );
    }
}
