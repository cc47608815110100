//! # CLI Command Implementations
//!
//! Every command opens the redb store, loads one project's graph, edits or
//! applies it, and saves it back.

use crate::listing::{GraphListing, parse_tags};
use kiln_core::{
    Artifact, ArtifactSet, BuildGraph, BuildPass, FileTag, GraphApplicator, KilnError, ProductId,
    PropertyDrift, RedbStore, graph_to_bytes,
};
use std::path::{Path, PathBuf};
use tracing::info;

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum listing size (10 MB).
const MAX_LISTING_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), KilnError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| KilnError::IoError(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(KilnError::IoError(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Resolve an input path to an existing regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, KilnError> {
    let canonical = path.canonicalize().map_err(|e| {
        KilnError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(KilnError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Resolve an output path whose parent directory must exist.
fn validate_output_path(path: &Path) -> Result<PathBuf, KilnError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        KilnError::IoError(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(KilnError::IoError(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| KilnError::IoError("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

// =============================================================================
// SHARED HELPERS
// =============================================================================

fn load_graph(store: &RedbStore, project: &str) -> Result<BuildGraph, KilnError> {
    store.load(project)?.ok_or_else(|| {
        KilnError::InvalidGraph(format!("no graph stored for project '{}'", project))
    })
}

fn print_json(value: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

/// Split a `PRODUCT:PATH` argument.
pub fn parse_file_arg(arg: &str) -> Result<(&str, &str), KilnError> {
    match arg.split_once(':') {
        Some((product, path)) if !product.is_empty() && !path.is_empty() => Ok((product, path)),
        _ => Err(KilnError::InvalidGraph(format!(
            "expected PRODUCT:PATH, got '{}'",
            arg
        ))),
    }
}

fn resolve_product(graph: &BuildGraph, name: &str) -> Result<ProductId, KilnError> {
    graph
        .product_by_name(name)
        .map(|p| p.id)
        .ok_or_else(|| KilnError::InvalidGraph(format!("unknown product '{}'", name)))
}

fn resolve_file<'a>(graph: &'a BuildGraph, arg: &str) -> Result<(ProductId, String, Option<&'a Artifact>), KilnError> {
    let (product, path) = parse_file_arg(arg)?;
    let product = resolve_product(graph, product)?;
    let artifact = graph
        .find_artifact_by_path(product, path)
        .and_then(|id| graph.artifact(id));
    Ok((product, path.to_string(), artifact))
}

// =============================================================================
// SEED COMMAND
// =============================================================================

/// Build a graph from a listing and store it.
pub fn cmd_seed(
    db_path: &Path,
    json_mode: bool,
    file: &Path,
    project: Option<&str>,
    force: bool,
) -> Result<(), KilnError> {
    let validated_path = validate_file_path(file)?;
    validate_file_size(&validated_path, MAX_LISTING_FILE_SIZE)?;
    let text = std::fs::read_to_string(&validated_path)
        .map_err(|e| KilnError::IoError(format!("Read listing: {}", e)))?;

    let listing = GraphListing::from_toml_str(&text)?;
    let name = project.unwrap_or(&listing.project.name).to_string();
    let graph = listing.into_graph(&file.to_string_lossy())?;

    let store = RedbStore::open(db_path)?;
    if !force && store.load(&name)?.is_some() {
        return Err(KilnError::InvalidGraph(format!(
            "project '{}' already exists (use --force to replace it)",
            name
        )));
    }
    store.save(&name, &graph)?;
    info!(project = %name, "seeded graph from {}", file.display());

    if json_mode {
        print_json(&serde_json::json!({
            "project": name,
            "products": graph.products().count(),
            "artifacts": graph.artifact_count(),
            "rule_nodes": graph.rule_node_count(),
        }));
        return Ok(());
    }

    println!("Seeded project '{}'", name);
    println!("  Products:   {}", graph.products().count());
    println!("  Artifacts:  {}", graph.artifact_count());
    println!("  Rule nodes: {}", graph.rule_node_count());
    Ok(())
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show one stored graph, or list stored projects.
pub fn cmd_status(db_path: &Path, json_mode: bool, project: Option<&str>) -> Result<(), KilnError> {
    let store = RedbStore::open(db_path)?;

    let Some(project) = project else {
        let names = store.project_names()?;
        if json_mode {
            print_json(&serde_json::json!({
                "database": db_path.to_string_lossy(),
                "projects": names,
                "save_count": store.save_count()?,
            }));
            return Ok(());
        }
        println!("Kiln Database");
        println!("=============");
        println!("Database: {:?}", db_path);
        println!("Saves:    {}", store.save_count()?);
        println!();
        if names.is_empty() {
            println!("No projects stored");
        }
        for name in names {
            println!("  {}", name);
        }
        return Ok(());
    };

    let graph = load_graph(&store, project)?;

    if json_mode {
        let products: Vec<_> = graph
            .products()
            .map(|p| {
                let artifacts: Vec<_> = graph
                    .artifacts_of_product(p.id)
                    .map(|a| {
                        serde_json::json!({
                            "id": a.id.0,
                            "path": a.file_path,
                            "tags": a.file_tags().iter().map(|t| t.0.clone()).collect::<Vec<_>>(),
                            "generated": a.is_generated(),
                        })
                    })
                    .collect();
                serde_json::json!({
                    "name": p.name,
                    "properties": p.properties,
                    "artifacts": artifacts,
                })
            })
            .collect();
        let rule_nodes: Vec<_> = graph
            .rule_nodes()
            .map(|n| {
                serde_json::json!({
                    "id": n.id().0,
                    "rule": n.rule().name(),
                    "product": n.product().0,
                    "inputs": n.old_input_artifacts().sorted().iter().map(|a| a.0).collect::<Vec<_>>(),
                })
            })
            .collect();
        print_json(&serde_json::json!({
            "project": project,
            "artifact_count": graph.artifact_count(),
            "transformer_count": graph.transformer_count(),
            "rule_node_count": graph.rule_node_count(),
            "dirty": graph.is_dirty(),
            "products": products,
            "rule_nodes": rule_nodes,
        }));
        return Ok(());
    }

    println!("Kiln Graph Status: {}", project);
    println!("==================");
    println!("Artifacts:    {}", graph.artifact_count());
    println!("Transformers: {}", graph.transformer_count());
    println!("Rule nodes:   {}", graph.rule_node_count());
    println!("Dirty:        {}", graph.is_dirty());
    for product in graph.products() {
        println!();
        println!("Product '{}'", product.name);
        for (key, value) in &product.properties {
            println!("  {} = {}", key, value);
        }
        for artifact in graph.artifacts_of_product(product.id) {
            let kind = if artifact.is_generated() { "gen" } else { "src" };
            println!(
                "  [{}] {} {} {}",
                kind,
                artifact.id,
                artifact.file_path,
                artifact.file_tags()
            );
        }
    }
    println!();
    for node in graph.rule_nodes() {
        println!(
            "{} {} ({} inputs)",
            node.id(),
            node.describe(&graph),
            node.old_input_artifacts().len()
        );
    }
    Ok(())
}

// =============================================================================
// BUILD COMMAND
// =============================================================================

/// Run one build pass over a stored graph and save the result.
pub fn cmd_build(
    db_path: &Path,
    json_mode: bool,
    project: &str,
    changed: &[String],
) -> Result<(), KilnError> {
    let store = RedbStore::open(db_path)?;
    let mut graph = load_graph(&store, project)?;

    let mut changed_set = ArtifactSet::new();
    for arg in changed {
        let (_, path, artifact) = resolve_file(&graph, arg)?;
        let artifact = artifact
            .ok_or_else(|| KilnError::InvalidGraph(format!("unknown file '{}'", path)))?;
        changed_set.insert(artifact.id);
    }

    let mut applicator = GraphApplicator::new();
    let report = BuildPass::new(&mut applicator, &PropertyDrift).run(&mut graph, &changed_set)?;
    store.save(project, &graph)?;

    if json_mode {
        print_json(&serde_json::json!({
            "project": project,
            "applied": report.applied.iter().map(|n| n.0).collect::<Vec<_>>(),
            "up_to_date": report.up_to_date.iter().map(|n| n.0).collect::<Vec<_>>(),
            "orphaned": report.orphaned.iter().map(|n| n.0).collect::<Vec<_>>(),
            "created": report.created.sorted().iter().map(|a| a.0).collect::<Vec<_>>(),
            "invalidated": report.invalidated.sorted().iter().map(|a| a.0).collect::<Vec<_>>(),
            "removed": applicator.removed(),
            "invocations": applicator.invocations(),
            "dirty": report.dirty,
        }));
        return Ok(());
    }

    println!("Build pass: {}", project);
    println!("  Applied:     {}", report.applied.len());
    println!("  Up to date:  {}", report.up_to_date.len());
    println!("  Orphaned:    {}", report.orphaned.len());
    println!("  Invocations: {}", applicator.invocations());
    println!("  Created:     {}", report.created.len());
    println!("  Invalidated: {}", report.invalidated.len());
    println!("  Removed:     {}", applicator.removed());
    println!("  Graph changed: {}", report.dirty);
    Ok(())
}

// =============================================================================
// SOURCE EDITING COMMANDS
// =============================================================================

/// Add a source file to a product.
pub fn cmd_touch(
    db_path: &Path,
    json_mode: bool,
    project: &str,
    file: &str,
    tags: &str,
) -> Result<(), KilnError> {
    let store = RedbStore::open(db_path)?;
    let mut graph = load_graph(&store, project)?;

    let (product, path, existing) = resolve_file(&graph, file)?;
    let (id, created) = match existing {
        Some(artifact) => (artifact.id, false),
        None => (
            graph.add_source_artifact(product, path.clone(), parse_tags(tags))?,
            true,
        ),
    };
    if created {
        store.save(project, &graph)?;
    }

    if json_mode {
        print_json(&serde_json::json!({ "artifact": id.0, "path": path, "created": created }));
    } else if created {
        println!("Added {} as {}", path, id);
    } else {
        println!("{} already exists as {}", path, id);
    }
    Ok(())
}

/// Remove a tag from a file.
pub fn cmd_untag(
    db_path: &Path,
    json_mode: bool,
    project: &str,
    file: &str,
    tag: &str,
) -> Result<(), KilnError> {
    let store = RedbStore::open(db_path)?;
    let mut graph = load_graph(&store, project)?;

    let (_, path, artifact) = resolve_file(&graph, file)?;
    let artifact =
        artifact.ok_or_else(|| KilnError::InvalidGraph(format!("unknown file '{}'", path)))?;
    let id = artifact.id;
    let mut tags = artifact.file_tags().clone();
    let removed = tags.remove(&FileTag::new(tag));
    if removed {
        graph.set_file_tags(id, tags)?;
        store.save(project, &graph)?;
    }

    if json_mode {
        print_json(&serde_json::json!({ "artifact": id.0, "tag": tag, "removed": removed }));
    } else if removed {
        println!("Removed tag '{}' from {}", tag, path);
    } else {
        println!("{} has no tag '{}'", path, tag);
    }
    Ok(())
}

/// Delete a source file.
pub fn cmd_remove(db_path: &Path, json_mode: bool, project: &str, file: &str) -> Result<(), KilnError> {
    let store = RedbStore::open(db_path)?;
    let mut graph = load_graph(&store, project)?;

    let (_, path, artifact) = resolve_file(&graph, file)?;
    let artifact =
        artifact.ok_or_else(|| KilnError::InvalidGraph(format!("unknown file '{}'", path)))?;
    if artifact.is_generated() {
        return Err(KilnError::InvalidGraph(format!(
            "'{}' is generated; only source files can be removed",
            path
        )));
    }
    let id = artifact.id;
    graph.remove_artifact(id)?;
    store.save(project, &graph)?;

    if json_mode {
        print_json(&serde_json::json!({ "artifact": id.0, "path": path, "removed": true }));
    } else {
        println!("Removed {} ({})", path, id);
    }
    Ok(())
}

/// Set a product property.
pub fn cmd_set(
    db_path: &Path,
    json_mode: bool,
    project: &str,
    product: &str,
    property: &str,
) -> Result<(), KilnError> {
    let (key, value) = property
        .split_once('=')
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| {
            KilnError::InvalidGraph(format!("expected KEY=VALUE, got '{}'", property))
        })?;

    let store = RedbStore::open(db_path)?;
    let mut graph = load_graph(&store, project)?;
    let id = resolve_product(&graph, product)?;
    let mut resolved = graph
        .product(id)
        .map(|p| (**p).clone())
        .ok_or(KilnError::ProductNotFound(id))?;
    let previous = resolved.properties.insert(key.to_string(), value.to_string());
    graph.update_product(resolved)?;
    store.save(project, &graph)?;

    if json_mode {
        print_json(&serde_json::json!({
            "product": product,
            "key": key,
            "value": value,
            "previous": previous,
        }));
    } else {
        println!("{}.{} = {}", product, key, value);
    }
    Ok(())
}

// =============================================================================
// EXPORT COMMAND
// =============================================================================

/// Write a stored graph in the binary persistence format.
pub fn cmd_export(db_path: &Path, project: &str, output: &Path) -> Result<(), KilnError> {
    let store = RedbStore::open(db_path)?;
    let graph = load_graph(&store, project)?;

    let validated_output = validate_output_path(output)?;
    let bytes = graph_to_bytes(&graph)?;
    std::fs::write(&validated_output, &bytes)
        .map_err(|e| KilnError::IoError(format!("Write file: {}", e)))?;

    info!(project, bytes = bytes.len(), "exported to {}", validated_output.display());
    println!("Exported {} bytes to {:?}", bytes.len(), validated_output);
    Ok(())
}
