//! End-to-end tests of the CLI commands against a temporary redb database.

#![allow(clippy::unwrap_used, clippy::panic)]

use kiln::cli::{cmd_build, cmd_export, cmd_remove, cmd_seed, cmd_set, cmd_status, cmd_touch, cmd_untag};
use kiln_core::{BuildGraph, KilnError, RedbStore, graph_from_bytes};
use std::path::PathBuf;

const LISTING: &str = r#"
[project]
name = "demo"

[[products]]
name = "app"
properties = { optimization = "none" }
sources = [
    { path = "main.c", tags = ["c"] },
    { path = "util.c", tags = ["c"] },
]

[[rules]]
name = "compiler"
inputs = ["c"]
outputs = [{ path = "{base}.o", tags = ["obj"] }]
product_properties = ["optimization"]
products = ["app"]

[[rules]]
name = "linker"
inputs = ["obj"]
multiplex = true
outputs = [{ path = "{product}", tags = ["application"] }]
products = ["app"]
"#;

struct Fixture {
    _dir: tempfile::TempDir,
    db: PathBuf,
    listing: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("kiln.redb");
        let listing = dir.path().join("demo.toml");
        std::fs::write(&listing, LISTING).unwrap();
        Self {
            _dir: dir,
            db,
            listing,
        }
    }

    fn seeded() -> Self {
        let fixture = Self::new();
        cmd_seed(&fixture.db, true, &fixture.listing, None, false).unwrap();
        fixture
    }

    fn graph(&self) -> BuildGraph {
        RedbStore::open(&self.db).unwrap().load("demo").unwrap().unwrap()
    }

    fn generated(&self, path: &str) -> bool {
        let graph = self.graph();
        let app = graph.product_by_name("app").unwrap().id;
        graph.find_artifact_by_path(app, path).is_some()
    }
}

fn build(fixture: &Fixture, changed: &[&str]) {
    let changed: Vec<String> = changed.iter().map(|s| (*s).to_string()).collect();
    cmd_build(&fixture.db, true, "demo", &changed).unwrap();
}

#[test]
fn seed_stores_listing() {
    let fixture = Fixture::seeded();
    let graph = fixture.graph();

    assert_eq!(graph.artifact_count(), 2);
    assert_eq!(graph.rule_node_count(), 2);
    cmd_status(&fixture.db, true, Some("demo")).unwrap();
    cmd_status(&fixture.db, false, None).unwrap();
}

#[test]
fn seed_refuses_to_overwrite_without_force() {
    let fixture = Fixture::seeded();

    let again = cmd_seed(&fixture.db, true, &fixture.listing, None, false);
    assert!(matches!(again, Err(KilnError::InvalidGraph(_))));
    cmd_seed(&fixture.db, true, &fixture.listing, None, true).unwrap();
    cmd_seed(&fixture.db, true, &fixture.listing, Some("copy"), false).unwrap();

    let names = RedbStore::open(&fixture.db).unwrap().project_names().unwrap();
    assert_eq!(names, vec!["copy".to_string(), "demo".to_string()]);
}

#[test]
fn build_generates_outputs() {
    let fixture = Fixture::seeded();
    build(&fixture, &[]);

    assert!(fixture.generated("main.o"));
    assert!(fixture.generated("util.o"));
    assert!(fixture.generated("app"));
    let graph = fixture.graph();
    assert_eq!(graph.transformer_count(), 3);
    assert!(graph.rule_nodes().all(|n| !n.old_input_artifacts().is_empty()));
}

#[test]
fn touched_source_is_compiled_on_next_build() {
    let fixture = Fixture::seeded();
    build(&fixture, &[]);

    cmd_touch(&fixture.db, true, "demo", "app:extra.c", "c").unwrap();
    build(&fixture, &[]);

    assert!(fixture.generated("extra.o"));
    assert_eq!(fixture.graph().transformer_count(), 4);
}

#[test]
fn removed_source_drops_its_object() {
    let fixture = Fixture::seeded();
    build(&fixture, &[]);

    cmd_remove(&fixture.db, true, "demo", "app:util.c").unwrap();
    build(&fixture, &[]);

    assert!(!fixture.generated("util.o"));
    assert!(fixture.generated("main.o"));
    assert!(fixture.generated("app"));
}

#[test]
fn untagged_source_is_no_longer_an_input() {
    let fixture = Fixture::seeded();
    build(&fixture, &[]);

    cmd_untag(&fixture.db, true, "demo", "app:main.c", "c").unwrap();
    build(&fixture, &[]);

    assert!(!fixture.generated("main.o"));
    assert!(fixture.generated("util.o"));
}

#[test]
fn removing_generated_file_is_rejected() {
    let fixture = Fixture::seeded();
    build(&fixture, &[]);

    let result = cmd_remove(&fixture.db, true, "demo", "app:main.o");
    assert!(matches!(result, Err(KilnError::InvalidGraph(_))));
}

#[test]
fn unknown_changed_file_is_rejected() {
    let fixture = Fixture::seeded();

    let result = cmd_build(&fixture.db, true, "demo", &["app:nope.c".to_string()]);
    assert!(matches!(result, Err(KilnError::InvalidGraph(_))));
}

#[test]
fn property_change_is_persisted() {
    let fixture = Fixture::seeded();
    build(&fixture, &[]);

    cmd_set(&fixture.db, true, "demo", "app", "optimization=fast").unwrap();
    let graph = fixture.graph();
    assert_eq!(
        graph.product_by_name("app").unwrap().property("optimization"),
        Some("fast")
    );

    build(&fixture, &[]);
    assert!(fixture.generated("main.o"));
    assert!(cmd_set(&fixture.db, true, "demo", "app", "=x").is_err());
}

#[test]
fn export_writes_loadable_graph() {
    let fixture = Fixture::seeded();
    build(&fixture, &[]);
    let output = fixture.db.with_file_name("demo.kiln");

    cmd_export(&fixture.db, "demo", &output).unwrap();

    let bytes = std::fs::read(&output).unwrap();
    let graph = graph_from_bytes(&bytes).unwrap();
    assert_eq!(graph.artifact_count(), fixture.graph().artifact_count());
}

#[test]
fn missing_project_is_an_error() {
    let fixture = Fixture::new();
    let result = cmd_status(&fixture.db, true, Some("ghost"));
    assert!(matches!(result, Err(KilnError::InvalidGraph(_))));
}
