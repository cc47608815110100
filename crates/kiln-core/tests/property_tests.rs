//! # Property-Based Tests
//!
//! Artifact set algebra and determinism of rule application, checked with
//! proptest.

use kiln_core::{
    ArtifactId, ArtifactSet, BuildGraph, BuildPass, FileTags, GraphApplicator, ProductId,
    ProjectId, PropertyDrift, ResolvedProduct, ResolvedProject, Rule, RuleId, graph_to_bytes,
    link_rule_nodes_by_tags,
};
use proptest::collection::vec;
use proptest::prelude::*;

fn artifact_set(ids: &[u64]) -> ArtifactSet {
    ids.iter().map(|&id| ArtifactId(id)).collect()
}

/// A compile + link graph over `count` sources.
fn build_graph(count: usize) -> BuildGraph {
    let mut graph = BuildGraph::new();
    graph
        .add_project(ResolvedProject::new(ProjectId(1), "proj"))
        .expect("project");
    let app = graph
        .add_product(ResolvedProduct::new(ProductId(1), "app", ProjectId(1)))
        .expect("product")
        .id;
    let cc = Rule::builder(RuleId(1), "cc")
        .input("c")
        .output("{base}.o", &["obj"])
        .build()
        .expect("rule");
    let link = Rule::builder(RuleId(2), "link")
        .input("obj")
        .multiplex(true)
        .output("{product}", &["application"])
        .build()
        .expect("rule");
    graph.add_rule_node(cc, app).expect("cc");
    graph.add_rule_node(link, app).expect("link");
    link_rule_nodes_by_tags(&mut graph).expect("edges");
    for i in 0..count {
        graph
            .add_source_artifact(app, format!("src{i}.c"), FileTags::from_iter(["c"]))
            .expect("source");
    }
    graph
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// The difference of A and B shares nothing with B.
    #[test]
    fn difference_is_disjoint(a in vec(0u64..64, 0..32), b in vec(0u64..64, 0..32)) {
        let (a, b) = (artifact_set(&a), artifact_set(&b));
        let diff = &a - &b;

        prop_assert!(!diff.intersects(&b));
        prop_assert!(diff.intersection(&b).is_empty());
    }

    /// The union of A and B contains every member of A.
    #[test]
    fn union_contains_operands(a in vec(0u64..64, 0..32), b in vec(0u64..64, 0..32)) {
        let (a, b) = (artifact_set(&a), artifact_set(&b));
        let union = &a + &b;

        for id in a.iter().chain(b.iter()) {
            prop_assert!(union.contains(id));
        }
        prop_assert!(union.len() <= a.len() + b.len());
    }

    /// `intersects` agrees with a non-empty intersection.
    #[test]
    fn intersects_iff_intersection_nonempty(a in vec(0u64..64, 0..32), b in vec(0u64..64, 0..32)) {
        let (a, b) = (artifact_set(&a), artifact_set(&b));

        prop_assert_eq!(a.intersects(&b), !a.intersection(&b).is_empty());
        prop_assert_eq!(a.intersects(&b), b.intersects(&a));
    }

    /// Equality ignores insertion order.
    #[test]
    fn equality_is_order_independent(ids in vec(0u64..1000, 0..64)) {
        let forward = artifact_set(&ids);
        let mut reversed_ids = ids.clone();
        reversed_ids.reverse();
        let reversed = artifact_set(&reversed_ids);

        prop_assert_eq!(forward, reversed);
    }

    /// Two identical graphs built and applied the same way persist to the
    /// same bytes.
    #[test]
    fn application_is_deterministic(count in 1usize..12) {
        let mut first = build_graph(count);
        let mut second = build_graph(count);

        for graph in [&mut first, &mut second] {
            let mut applicator = GraphApplicator::new();
            BuildPass::new(&mut applicator, &PropertyDrift)
                .run(graph, &ArtifactSet::new())
                .expect("pass");
        }

        prop_assert_eq!(
            graph_to_bytes(&first).expect("serialize"),
            graph_to_bytes(&second).expect("serialize")
        );
    }

    /// A second pass without changes applies nothing.
    #[test]
    fn second_pass_is_idle(count in 0usize..12) {
        let mut graph = build_graph(count);
        let mut applicator = GraphApplicator::new();

        BuildPass::new(&mut applicator, &PropertyDrift)
            .run(&mut graph, &ArtifactSet::new())
            .expect("first pass");
        let invocations = applicator.invocations();
        let report = BuildPass::new(&mut applicator, &PropertyDrift)
            .run(&mut graph, &ArtifactSet::new())
            .expect("second pass");

        prop_assert!(report.applied.is_empty());
        prop_assert_eq!(applicator.invocations(), invocations);
    }
}
