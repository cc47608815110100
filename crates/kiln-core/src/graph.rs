//! # Build Graph
//!
//! The persistent dependency graph: projects, products, the rule registry,
//! artifacts, transformers and rule nodes.
//!
//! All containers are `BTreeMap`s so that iteration, and therefore the
//! persisted byte stream, is deterministic. Artifact membership questions
//! asked by the rule node go through the per-product tag index.
//!
//! Rule nodes are evaluated while *detached* from the graph (see
//! [`BuildGraph::with_detached_rule_node`]): the node mutates its own
//! snapshot while the applicator mutates the graph, and the borrow checker
//! enforces that nobody else touches either in the meantime.

use crate::artifact::{Artifact, BuildGraphNode};
use crate::product::{ProductsByName, ProjectBuildData, ProjectsByName, ResolvedProduct, ResolvedProject};
use crate::rule_node::{RuleNode, SerializableRuleNode};
use crate::transformer::{RecordedProperty, Transformer};
use crate::{
    ArtifactId, ArtifactSet, FileTag, FileTags, KilnError, NodeRef, ProductId, ProjectId, Rule,
    RuleId, RuleNodeId, TransformerId,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

// =============================================================================
// PER-PRODUCT / PER-PROJECT ENTRIES
// =============================================================================

/// Artifact storage and indices of one product.
#[derive(Debug, Clone, Default)]
struct ProductBuildData {
    artifacts: BTreeSet<ArtifactId>,
    by_file_tag: BTreeMap<FileTag, BTreeSet<ArtifactId>>,
    by_path: BTreeMap<String, ArtifactId>,
}

#[derive(Debug, Clone)]
struct ProductEntry {
    resolved: Arc<ResolvedProduct>,
    /// `None` once the product's build data has been discarded.
    build_data: Option<ProductBuildData>,
}

#[derive(Debug, Clone)]
struct ProjectEntry {
    resolved: Arc<ResolvedProject>,
    build_data: ProjectBuildData,
}

// =============================================================================
// BUILD GRAPH
// =============================================================================

/// The whole persisted build graph of one or more top-level projects.
#[derive(Debug, Clone, Default)]
pub struct BuildGraph {
    projects: BTreeMap<ProjectId, ProjectEntry>,
    products: BTreeMap<ProductId, ProductEntry>,
    rules: BTreeMap<RuleId, Arc<Rule>>,
    artifacts: BTreeMap<ArtifactId, Artifact>,
    transformers: BTreeMap<TransformerId, Transformer>,
    rule_nodes: BTreeMap<RuleNodeId, RuleNode>,
    next_artifact_id: u64,
    next_transformer_id: u64,
    next_rule_node_id: u64,
}

impl BuildGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // -------------------------------------------------------------------------
    // Projects and products
    // -------------------------------------------------------------------------

    /// Register a top-level project.
    pub fn add_project(&mut self, project: ResolvedProject) -> Result<Arc<ResolvedProject>, KilnError> {
        if self.projects.contains_key(&project.id) || self.project_by_name(&project.name).is_some() {
            return Err(KilnError::InvalidGraph(format!(
                "project '{}' ({}) already exists",
                project.name, project.id
            )));
        }
        let resolved = Arc::new(project);
        self.projects.insert(
            resolved.id,
            ProjectEntry {
                resolved: Arc::clone(&resolved),
                build_data: ProjectBuildData::new(),
            },
        );
        Ok(resolved)
    }

    /// Register a product of an existing project.
    pub fn add_product(&mut self, product: ResolvedProduct) -> Result<Arc<ResolvedProduct>, KilnError> {
        if !self.projects.contains_key(&product.project) {
            return Err(KilnError::InvalidGraph(format!(
                "product '{}' refers to unknown {}",
                product.name, product.project
            )));
        }
        if self.products.contains_key(&product.id) || self.product_by_name(&product.name).is_some() {
            return Err(KilnError::InvalidGraph(format!(
                "product '{}' ({}) already exists",
                product.name, product.id
            )));
        }
        let resolved = Arc::new(product);
        self.products.insert(
            resolved.id,
            ProductEntry {
                resolved: Arc::clone(&resolved),
                build_data: Some(ProductBuildData::default()),
            },
        );
        Ok(resolved)
    }

    /// Replace the configuration of an existing product (same id, same name).
    ///
    /// Used when properties change between builds; the product's artifacts
    /// are kept.
    pub fn update_product(&mut self, product: ResolvedProduct) -> Result<(), KilnError> {
        let entry = self
            .products
            .get_mut(&product.id)
            .ok_or(KilnError::ProductNotFound(product.id))?;
        if entry.resolved.name != product.name || entry.resolved.project != product.project {
            return Err(KilnError::InvalidGraph(format!(
                "cannot rename or move product '{}'",
                entry.resolved.name
            )));
        }
        entry.resolved = Arc::new(product);
        Ok(())
    }

    /// Replace the configuration of an existing project (same id, same name).
    pub fn update_project(&mut self, project: ResolvedProject) -> Result<(), KilnError> {
        let entry = self.projects.get_mut(&project.id).ok_or_else(|| {
            KilnError::InvalidGraph(format!("unknown {}", project.id))
        })?;
        if entry.resolved.name != project.name {
            return Err(KilnError::InvalidGraph(format!(
                "cannot rename project '{}'",
                entry.resolved.name
            )));
        }
        entry.resolved = Arc::new(project);
        Ok(())
    }

    /// Tear down a product and everything it owns except its rule nodes.
    ///
    /// Rule nodes bound to the product stay in the graph but become inert;
    /// the driver reports and discards them.
    pub fn remove_product(&mut self, id: ProductId) -> Result<Arc<ResolvedProduct>, KilnError> {
        let owned: Vec<ArtifactId> = self.artifacts_of_product(id).map(|a| a.id).collect();
        for artifact in owned {
            self.remove_artifact(artifact)?;
        }
        let entry = self.products.remove(&id).ok_or(KilnError::ProductNotFound(id))?;
        self.transformers.retain(|_, t| t.product != id);
        Ok(entry.resolved)
    }

    /// Drop the artifact storage of a product while keeping its configuration.
    ///
    /// Dependents skip products without build data when collecting inputs.
    pub fn discard_product_build_data(&mut self, id: ProductId) -> Result<(), KilnError> {
        let owned: Vec<ArtifactId> = self.artifacts_of_product(id).map(|a| a.id).collect();
        for artifact in owned {
            self.remove_artifact(artifact)?;
        }
        let entry = self.products.get_mut(&id).ok_or(KilnError::ProductNotFound(id))?;
        entry.build_data = None;
        Ok(())
    }

    /// Look up a live product.
    #[must_use]
    pub fn product(&self, id: ProductId) -> Option<&Arc<ResolvedProduct>> {
        self.products.get(&id).map(|e| &e.resolved)
    }

    /// Look up a product by name.
    #[must_use]
    pub fn product_by_name(&self, name: &str) -> Option<&Arc<ResolvedProduct>> {
        self.products
            .values()
            .map(|e| &e.resolved)
            .find(|p| p.name == name)
    }

    /// Look up a project.
    #[must_use]
    pub fn project(&self, id: ProjectId) -> Option<&Arc<ResolvedProject>> {
        self.projects.get(&id).map(|e| &e.resolved)
    }

    /// Look up a project by name.
    #[must_use]
    pub fn project_by_name(&self, name: &str) -> Option<&Arc<ResolvedProject>> {
        self.projects
            .values()
            .map(|e| &e.resolved)
            .find(|p| p.name == name)
    }

    /// All products in id order.
    pub fn products(&self) -> impl Iterator<Item = &Arc<ResolvedProduct>> {
        self.products.values().map(|e| &e.resolved)
    }

    /// All projects in id order.
    pub fn projects(&self) -> impl Iterator<Item = &Arc<ResolvedProject>> {
        self.projects.values().map(|e| &e.resolved)
    }

    /// Snapshot of products keyed by name, for the staleness predicate.
    #[must_use]
    pub fn products_by_name(&self) -> ProductsByName {
        self.products()
            .map(|p| (p.name.clone(), Arc::clone(p)))
            .collect()
    }

    /// Snapshot of projects keyed by name, for the staleness predicate.
    #[must_use]
    pub fn projects_by_name(&self) -> ProjectsByName {
        self.projects()
            .map(|p| (p.name.clone(), Arc::clone(p)))
            .collect()
    }

    /// Directly depended-upon products. Empty for unknown products.
    #[must_use]
    pub fn dependencies(&self, product: ProductId) -> &[ProductId] {
        self.products
            .get(&product)
            .map(|e| e.resolved.dependencies.as_slice())
            .unwrap_or(&[])
    }

    /// Whether the product exists and still has artifact storage.
    #[must_use]
    pub fn product_has_build_data(&self, product: ProductId) -> bool {
        self.products
            .get(&product)
            .is_some_and(|e| e.build_data.is_some())
    }

    // -------------------------------------------------------------------------
    // Dirty flag
    // -------------------------------------------------------------------------

    /// Build data of a top-level project.
    #[must_use]
    pub fn project_build_data(&self, project: ProjectId) -> Option<&ProjectBuildData> {
        self.projects.get(&project).map(|e| &e.build_data)
    }

    /// Mark a project's graph as changed. Returns `false` for unknown projects.
    pub fn set_dirty(&self, project: ProjectId) -> bool {
        match self.projects.get(&project) {
            Some(entry) => {
                entry.build_data.set_dirty();
                true
            }
            None => false,
        }
    }

    /// Whether any project's graph changed.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.projects.values().any(|e| e.build_data.is_dirty())
    }

    /// Reset every project's dirty flag. Called by the driver between passes.
    pub fn clear_dirty_flags(&self) {
        for entry in self.projects.values() {
            entry.build_data.clear_dirty();
        }
    }

    // -------------------------------------------------------------------------
    // Rules and rule nodes
    // -------------------------------------------------------------------------

    /// Add a rule to the registry. Re-registering the same id is a no-op.
    pub fn register_rule(&mut self, rule: Arc<Rule>) -> Arc<Rule> {
        Arc::clone(self.rules.entry(rule.id()).or_insert(rule))
    }

    /// Look up a registered rule.
    #[must_use]
    pub fn rule(&self, id: RuleId) -> Option<&Arc<Rule>> {
        self.rules.get(&id)
    }

    /// All registered rules.
    pub fn rules(&self) -> impl Iterator<Item = &Arc<Rule>> {
        self.rules.values()
    }

    /// Instantiate `rule` for `product`.
    pub fn add_rule_node(&mut self, rule: Arc<Rule>, product: ProductId) -> Result<RuleNodeId, KilnError> {
        if !self.products.contains_key(&product) {
            return Err(KilnError::ProductNotFound(product));
        }
        if self
            .rule_nodes
            .values()
            .any(|n| n.product() == product && n.rule().id() == rule.id())
        {
            return Err(KilnError::InvalidGraph(format!(
                "rule '{}' is already instantiated for {}",
                rule.name(),
                product
            )));
        }
        let rule = self.register_rule(rule);
        let id = RuleNodeId(self.next_rule_node_id);
        self.next_rule_node_id = self.next_rule_node_id.saturating_add(1);
        self.rule_nodes.insert(id, RuleNode::new(id, rule, product));
        Ok(id)
    }

    /// Record that `dependent` must be evaluated after `dependency`.
    pub fn add_rule_node_dependency(
        &mut self,
        dependent: RuleNodeId,
        dependency: RuleNodeId,
    ) -> Result<(), KilnError> {
        if dependent == dependency {
            return Err(KilnError::InvalidGraph(format!(
                "{} cannot depend on itself",
                dependent
            )));
        }
        if !self.rule_nodes.contains_key(&dependency) {
            return Err(KilnError::InvalidGraph(format!("unknown {}", dependency)));
        }
        let node = self
            .rule_nodes
            .get_mut(&dependent)
            .ok_or_else(|| KilnError::InvalidGraph(format!("unknown {}", dependent)))?;
        node.children.insert(NodeRef::Rule(dependency));
        if let Some(dep) = self.rule_nodes.get_mut(&dependency) {
            dep.parents.insert(NodeRef::Rule(dependent));
        }
        Ok(())
    }

    /// Look up a rule node.
    #[must_use]
    pub fn rule_node(&self, id: RuleNodeId) -> Option<&RuleNode> {
        self.rule_nodes.get(&id)
    }

    /// All rule nodes in id order.
    pub fn rule_nodes(&self) -> impl Iterator<Item = &RuleNode> {
        self.rule_nodes.values()
    }

    /// Discard a rule node (e.g. one whose product is gone).
    pub fn remove_rule_node(&mut self, id: RuleNodeId) -> Option<RuleNode> {
        let node = self.rule_nodes.remove(&id)?;
        for other in self.rule_nodes.values_mut() {
            other.parents.remove(&NodeRef::Rule(id));
            other.children.remove(&NodeRef::Rule(id));
        }
        Some(node)
    }

    /// Run `f` with the rule node taken out of the graph, then put it back.
    ///
    /// The node is reinserted whether or not `f` fails.
    pub fn with_detached_rule_node<T>(
        &mut self,
        id: RuleNodeId,
        f: impl FnOnce(&mut RuleNode, &mut BuildGraph) -> Result<T, KilnError>,
    ) -> Result<T, KilnError> {
        let mut node = self
            .rule_nodes
            .remove(&id)
            .ok_or_else(|| KilnError::InvalidGraph(format!("unknown {}", id)))?;
        let result = f(&mut node, self);
        self.rule_nodes.insert(id, node);
        result
    }

    // -------------------------------------------------------------------------
    // Artifacts
    // -------------------------------------------------------------------------

    /// Add a source artifact (a file supplied by the project).
    pub fn add_source_artifact(
        &mut self,
        product: ProductId,
        file_path: impl Into<String>,
        file_tags: FileTags,
    ) -> Result<ArtifactId, KilnError> {
        self.insert_artifact(product, file_path.into(), file_tags, false)
    }

    /// Add an artifact standing for a property injected by a dependency.
    pub fn add_module_target(
        &mut self,
        product: ProductId,
        file_path: impl Into<String>,
        file_tags: FileTags,
    ) -> Result<ArtifactId, KilnError> {
        self.insert_artifact(product, file_path.into(), file_tags, true)
    }

    fn insert_artifact(
        &mut self,
        product: ProductId,
        file_path: String,
        file_tags: FileTags,
        target_of_module: bool,
    ) -> Result<ArtifactId, KilnError> {
        let data = self.build_data_mut(product)?;
        if let Some(existing) = data.by_path.get(&file_path) {
            return Err(KilnError::InvalidGraph(format!(
                "'{}' already exists in {} as {}",
                file_path, product, existing
            )));
        }
        let id = ArtifactId(self.next_artifact_id);
        self.next_artifact_id = self.next_artifact_id.saturating_add(1);

        let mut artifact = Artifact::new(id, product, file_path);
        artifact.target_of_module = target_of_module;
        artifact.file_tags = file_tags;
        self.index_artifact(&artifact)?;
        self.artifacts.insert(id, artifact);
        Ok(id)
    }

    fn build_data_mut(&mut self, product: ProductId) -> Result<&mut ProductBuildData, KilnError> {
        self.products
            .get_mut(&product)
            .ok_or(KilnError::ProductNotFound(product))?
            .build_data
            .as_mut()
            .ok_or_else(|| KilnError::InvalidGraph(format!("{} has no build data", product)))
    }

    fn index_artifact(&mut self, artifact: &Artifact) -> Result<(), KilnError> {
        let data = self.build_data_mut(artifact.product)?;
        data.artifacts.insert(artifact.id);
        data.by_path.insert(artifact.file_path.clone(), artifact.id);
        for tag in artifact.file_tags() {
            data.by_file_tag.entry(tag.clone()).or_default().insert(artifact.id);
        }
        Ok(())
    }

    fn unindex_artifact(&mut self, artifact: &Artifact) {
        let Ok(data) = self.build_data_mut(artifact.product) else {
            return;
        };
        data.artifacts.remove(&artifact.id);
        data.by_path.remove(&artifact.file_path);
        for tag in artifact.file_tags() {
            if let Some(ids) = data.by_file_tag.get_mut(tag) {
                ids.remove(&artifact.id);
                if ids.is_empty() {
                    data.by_file_tag.remove(tag);
                }
            }
        }
    }

    /// Look up an artifact.
    #[must_use]
    pub fn artifact(&self, id: ArtifactId) -> Option<&Artifact> {
        self.artifacts.get(&id)
    }

    /// All artifacts in id order.
    pub fn artifacts(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts.values()
    }

    /// Artifacts of `product` carrying `tag`, in id order.
    pub fn lookup_artifacts_by_file_tag<'a>(
        &'a self,
        product: ProductId,
        tag: &FileTag,
    ) -> impl Iterator<Item = &'a Artifact> + 'a {
        self.products
            .get(&product)
            .and_then(|e| e.build_data.as_ref())
            .and_then(|d| d.by_file_tag.get(tag))
            .into_iter()
            .flat_map(|ids| ids.iter())
            .filter_map(|id| self.artifacts.get(id))
    }

    /// All artifacts of `product`, in id order.
    pub fn artifacts_of_product(&self, product: ProductId) -> impl Iterator<Item = &Artifact> + '_ {
        self.products
            .get(&product)
            .and_then(|e| e.build_data.as_ref())
            .into_iter()
            .flat_map(|d| d.artifacts.iter())
            .filter_map(|id| self.artifacts.get(id))
    }

    /// Find an artifact of `product` by its path.
    #[must_use]
    pub fn find_artifact_by_path(&self, product: ProductId, file_path: &str) -> Option<ArtifactId> {
        self.products
            .get(&product)
            .and_then(|e| e.build_data.as_ref())
            .and_then(|d| d.by_path.get(file_path).copied())
    }

    /// Replace an artifact's tags, keeping the tag index in sync.
    pub fn set_file_tags(&mut self, id: ArtifactId, file_tags: FileTags) -> Result<(), KilnError> {
        let old = self
            .artifacts
            .get(&id)
            .cloned()
            .ok_or(KilnError::ArtifactNotFound(id))?;
        self.unindex_artifact(&old);
        let mut updated = old;
        updated.file_tags = file_tags;
        self.index_artifact(&updated)?;
        self.artifacts.insert(id, updated);
        Ok(())
    }

    /// Remove an artifact and detach all its edges.
    ///
    /// If the artifact was generated it is dropped from its transformer's
    /// outputs, and a transformer left without outputs is dropped too.
    /// Transformers that consumed the artifact keep it in their recorded
    /// inputs: that record is what lets the consuming rule node find the
    /// outputs to tear down.
    pub fn remove_artifact(&mut self, id: ArtifactId) -> Result<Artifact, KilnError> {
        let artifact = self.artifacts.remove(&id).ok_or(KilnError::ArtifactNotFound(id))?;
        self.unindex_artifact(&artifact);

        let me = NodeRef::Artifact(id);
        for edge in artifact.parents.iter().chain(artifact.children.iter()) {
            match *edge {
                NodeRef::Artifact(other) => {
                    if let Some(other) = self.artifacts.get_mut(&other) {
                        other.parents.remove(&me);
                        other.children.remove(&me);
                    }
                }
                NodeRef::Rule(node) => {
                    if let Some(node) = self.rule_nodes.get_mut(&node) {
                        node.parents.remove(&me);
                        node.children.remove(&me);
                    }
                }
            }
        }

        if let Some(tid) = artifact.transformer {
            let orphaned = match self.transformers.get_mut(&tid) {
                Some(t) => {
                    t.outputs.remove(id);
                    t.outputs.is_empty()
                }
                None => false,
            };
            if orphaned {
                self.transformers.remove(&tid);
            }
        }
        Ok(artifact)
    }

    /// Add the edge `parent -> child` (the parent is derived from the child).
    pub fn connect(&mut self, parent: ArtifactId, child: ArtifactId) -> Result<(), KilnError> {
        if !self.artifacts.contains_key(&child) {
            return Err(KilnError::ArtifactNotFound(child));
        }
        self.artifacts
            .get_mut(&parent)
            .ok_or(KilnError::ArtifactNotFound(parent))?
            .children
            .insert(NodeRef::Artifact(child));
        if let Some(child) = self.artifacts.get_mut(&child) {
            child.parents.insert(NodeRef::Artifact(parent));
        }
        Ok(())
    }

    /// Remove every artifact child edge of `parent`.
    pub fn disconnect_children(&mut self, parent: ArtifactId) -> Result<(), KilnError> {
        let children: Vec<ArtifactId> = self
            .artifacts
            .get(&parent)
            .ok_or(KilnError::ArtifactNotFound(parent))?
            .child_artifacts()
            .collect();
        let me = NodeRef::Artifact(parent);
        for child in &children {
            if let Some(child) = self.artifacts.get_mut(child) {
                child.parents.remove(&me);
            }
        }
        if let Some(parent) = self.artifacts.get_mut(&parent) {
            parent.children.retain(|n| n.as_artifact().is_none());
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Transformers
    // -------------------------------------------------------------------------

    /// Look up a transformer.
    #[must_use]
    pub fn transformer(&self, id: TransformerId) -> Option<&Transformer> {
        self.transformers.get(&id)
    }

    /// All transformers in id order.
    pub fn transformers(&self) -> impl Iterator<Item = &Transformer> {
        self.transformers.values()
    }

    /// The transformer that produced `artifact`, if it is generated.
    #[must_use]
    pub fn transformer_of(&self, artifact: ArtifactId) -> Option<&Transformer> {
        self.artifacts
            .get(&artifact)
            .and_then(|a| a.transformer)
            .and_then(|t| self.transformers.get(&t))
    }

    /// Create an empty transformer for `rule` in `product`.
    pub fn create_transformer(
        &mut self,
        rule: &Arc<Rule>,
        product: ProductId,
    ) -> Result<TransformerId, KilnError> {
        if !self.products.contains_key(&product) {
            return Err(KilnError::ProductNotFound(product));
        }
        let rule = self.register_rule(Arc::clone(rule));
        let id = TransformerId(self.next_transformer_id);
        self.next_transformer_id = self.next_transformer_id.saturating_add(1);
        self.transformers.insert(id, Transformer::new(id, rule, product));
        Ok(id)
    }

    /// Create a generated artifact owned by `transformer`.
    pub fn create_generated_artifact(
        &mut self,
        transformer: TransformerId,
        file_path: impl Into<String>,
        file_tags: FileTags,
    ) -> Result<ArtifactId, KilnError> {
        let product = self
            .transformers
            .get(&transformer)
            .ok_or(KilnError::TransformerNotFound(transformer))?
            .product;
        let id = self.insert_artifact(product, file_path.into(), file_tags, false)?;
        self.assign_output(transformer, id)?;
        Ok(id)
    }

    /// Make `transformer` the producer of `artifact`, detaching it from any
    /// previous producer.
    pub fn assign_output(&mut self, transformer: TransformerId, artifact: ArtifactId) -> Result<(), KilnError> {
        if !self.transformers.contains_key(&transformer) {
            return Err(KilnError::TransformerNotFound(transformer));
        }
        let previous = self
            .artifacts
            .get_mut(&artifact)
            .ok_or(KilnError::ArtifactNotFound(artifact))?
            .transformer
            .replace(transformer);
        if let Some(previous) = previous.filter(|p| *p != transformer) {
            let orphaned = match self.transformers.get_mut(&previous) {
                Some(t) => {
                    t.outputs.remove(artifact);
                    t.outputs.is_empty()
                }
                None => false,
            };
            if orphaned {
                self.transformers.remove(&previous);
            }
        }
        if let Some(t) = self.transformers.get_mut(&transformer) {
            t.outputs.insert(artifact);
        }
        Ok(())
    }

    /// Replace the recorded inputs and property values of a transformer.
    pub fn record_transformer_run(
        &mut self,
        transformer: TransformerId,
        inputs: ArtifactSet,
        recorded_properties: Vec<RecordedProperty>,
    ) -> Result<(), KilnError> {
        let t = self
            .transformers
            .get_mut(&transformer)
            .ok_or(KilnError::TransformerNotFound(transformer))?;
        t.inputs = inputs;
        t.recorded_properties = recorded_properties;
        Ok(())
    }

    /// Forget that `transformer` consumed `input`.
    pub fn prune_transformer_input(&mut self, transformer: TransformerId, input: ArtifactId) -> bool {
        self.transformers
            .get_mut(&transformer)
            .is_some_and(|t| t.inputs.remove(input))
    }

    // -------------------------------------------------------------------------
    // Rule node edges (crate-internal)
    // -------------------------------------------------------------------------

    pub(crate) fn artifact_exists(&self, id: ArtifactId) -> bool {
        self.artifacts.contains_key(&id)
    }

    // -------------------------------------------------------------------------
    // Statistics
    // -------------------------------------------------------------------------

    /// Number of artifacts.
    #[must_use]
    pub fn artifact_count(&self) -> usize {
        self.artifacts.len()
    }

    /// Number of transformers.
    #[must_use]
    pub fn transformer_count(&self) -> usize {
        self.transformers.len()
    }

    /// Number of rule nodes.
    #[must_use]
    pub fn rule_node_count(&self) -> usize {
        self.rule_nodes.len()
    }
}

// =============================================================================
// SERIALIZATION SUPPORT
// =============================================================================

/// Serializable artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializableArtifact {
    pub id: ArtifactId,
    pub file_path: String,
    pub product: ProductId,
    pub file_tags: FileTags,
    pub transformer: Option<TransformerId>,
    pub target_of_module: bool,
    pub parents: Vec<NodeRef>,
    pub children: Vec<NodeRef>,
}

/// Serializable transformer; the rule is stored by id and re-linked on load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializableTransformer {
    pub id: TransformerId,
    pub rule: RuleId,
    pub product: ProductId,
    pub inputs: ArtifactSet,
    pub outputs: ArtifactSet,
    pub recorded_properties: Vec<RecordedProperty>,
}

/// Serializable representation of the graph for persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializableBuildGraph {
    pub projects: Vec<ResolvedProject>,
    pub products: Vec<(ResolvedProduct, bool)>,
    pub rules: Vec<Rule>,
    pub artifacts: Vec<SerializableArtifact>,
    pub transformers: Vec<SerializableTransformer>,
    pub rule_nodes: Vec<SerializableRuleNode>,
    pub next_artifact_id: u64,
    pub next_transformer_id: u64,
    pub next_rule_node_id: u64,
}

impl From<&BuildGraph> for SerializableBuildGraph {
    fn from(graph: &BuildGraph) -> Self {
        Self {
            projects: graph.projects().map(|p| ResolvedProject::clone(p)).collect(),
            products: graph
                .products
                .values()
                .map(|e| (ResolvedProduct::clone(&e.resolved), e.build_data.is_some()))
                .collect(),
            rules: graph.rules().map(|r| Rule::clone(r)).collect(),
            artifacts: graph
                .artifacts
                .values()
                .map(|a| SerializableArtifact {
                    id: a.id,
                    file_path: a.file_path.clone(),
                    product: a.product,
                    file_tags: a.file_tags.clone(),
                    transformer: a.transformer,
                    target_of_module: a.target_of_module,
                    parents: a.parents.iter().copied().collect(),
                    children: a.children.iter().copied().collect(),
                })
                .collect(),
            transformers: graph
                .transformers
                .values()
                .map(|t| SerializableTransformer {
                    id: t.id,
                    rule: t.rule.id(),
                    product: t.product,
                    inputs: t.inputs.clone(),
                    outputs: t.outputs.clone(),
                    recorded_properties: t.recorded_properties.clone(),
                })
                .collect(),
            rule_nodes: graph.rule_nodes.values().map(SerializableRuleNode::from).collect(),
            next_artifact_id: graph.next_artifact_id,
            next_transformer_id: graph.next_transformer_id,
            next_rule_node_id: graph.next_rule_node_id,
        }
    }
}

impl TryFrom<SerializableBuildGraph> for BuildGraph {
    type Error = KilnError;

    /// Rebuild the graph, then re-link transformers and rule nodes to the
    /// rule registry by id.
    fn try_from(sg: SerializableBuildGraph) -> Result<Self, KilnError> {
        let mut graph = BuildGraph {
            next_artifact_id: sg.next_artifact_id,
            next_transformer_id: sg.next_transformer_id,
            next_rule_node_id: sg.next_rule_node_id,
            ..BuildGraph::default()
        };

        for project in sg.projects {
            graph.add_project(project)?;
        }
        for (product, has_build_data) in sg.products {
            let id = product.id;
            graph.add_product(product)?;
            if !has_build_data {
                if let Some(entry) = graph.products.get_mut(&id) {
                    entry.build_data = None;
                }
            }
        }
        for rule in sg.rules {
            graph.register_rule(Arc::new(rule));
        }

        for sa in sg.artifacts {
            let artifact = Artifact {
                id: sa.id,
                file_path: sa.file_path,
                product: sa.product,
                file_tags: sa.file_tags,
                transformer: sa.transformer,
                target_of_module: sa.target_of_module,
                parents: sa.parents.into_iter().collect(),
                children: sa.children.into_iter().collect(),
            };
            graph.index_artifact(&artifact)?;
            graph.artifacts.insert(artifact.id, artifact);
        }

        for st in sg.transformers {
            let rule = graph
                .rule(st.rule)
                .cloned()
                .ok_or(KilnError::RuleNotFound(st.rule))?;
            graph.transformers.insert(
                st.id,
                Transformer {
                    id: st.id,
                    rule,
                    product: st.product,
                    inputs: st.inputs,
                    outputs: st.outputs,
                    recorded_properties: st.recorded_properties,
                },
            );
        }

        for sn in sg.rule_nodes {
            let rule = graph
                .rule(sn.rule)
                .cloned()
                .ok_or(KilnError::RuleNotFound(sn.rule))?;
            let node = RuleNode::relink(sn, rule);
            graph.rule_nodes.insert(node.id(), node);
        }

        for artifact in graph.artifacts.values() {
            if let Some(tid) = artifact.transformer {
                if !graph.transformers.contains_key(&tid) {
                    return Err(KilnError::InvalidGraph(format!(
                        "{} refers to missing {}",
                        artifact.id, tid
                    )));
                }
            }
        }

        Ok(graph)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(list: &[&str]) -> FileTags {
        list.iter().copied().collect()
    }

    fn graph_with_product() -> (BuildGraph, ProductId) {
        let mut graph = BuildGraph::new();
        graph
            .add_project(ResolvedProject::new(ProjectId(1), "proj"))
            .expect("project");
        let product = graph
            .add_product(ResolvedProduct::new(ProductId(1), "app", ProjectId(1)))
            .expect("product");
        (graph, product.id)
    }

    #[test]
    fn tag_index_follows_tag_changes() {
        let (mut graph, app) = graph_with_product();
        let a = graph
            .add_source_artifact(app, "a.c", tags(&["c"]))
            .expect("add");

        let c = FileTag::new("c");
        let h = FileTag::new("h");
        assert_eq!(graph.lookup_artifacts_by_file_tag(app, &c).count(), 1);

        graph.set_file_tags(a, tags(&["h"])).expect("retag");
        assert_eq!(graph.lookup_artifacts_by_file_tag(app, &c).count(), 0);
        assert_eq!(
            graph
                .lookup_artifacts_by_file_tag(app, &h)
                .map(|x| x.id)
                .collect::<Vec<_>>(),
            vec![a]
        );
    }

    #[test]
    fn duplicate_path_rejected() {
        let (mut graph, app) = graph_with_product();
        graph.add_source_artifact(app, "a.c", tags(&["c"])).expect("add");
        let result = graph.add_source_artifact(app, "a.c", tags(&["c"]));
        assert!(matches!(result, Err(KilnError::InvalidGraph(_))));
    }

    #[test]
    fn product_requires_known_project() {
        let mut graph = BuildGraph::new();
        let result = graph.add_product(ResolvedProduct::new(ProductId(1), "app", ProjectId(9)));
        assert!(matches!(result, Err(KilnError::InvalidGraph(_))));
    }

    #[test]
    fn remove_artifact_detaches_edges_and_keeps_consumer_records() {
        let (mut graph, app) = graph_with_product();
        let rule = Rule::builder(RuleId(1), "cc").input("c").build().expect("rule");
        let src = graph.add_source_artifact(app, "a.c", tags(&["c"])).expect("add");
        let t = graph.create_transformer(&rule, app).expect("transformer");
        let obj = graph
            .create_generated_artifact(t, "a.o", tags(&["obj"]))
            .expect("generate");
        graph.connect(obj, src).expect("connect");
        graph
            .record_transformer_run(t, ArtifactSet::single(src), Vec::new())
            .expect("record");

        graph.remove_artifact(src).expect("remove");

        let obj_artifact = graph.artifact(obj).expect("obj");
        assert_eq!(obj_artifact.child_artifacts().count(), 0);
        assert!(graph.transformer(t).expect("t").has_input(src));

        graph.remove_artifact(obj).expect("remove");
        assert!(graph.transformer(t).is_none());
    }

    #[test]
    fn assign_output_moves_between_transformers() {
        let (mut graph, app) = graph_with_product();
        let rule = Rule::builder(RuleId(1), "gen").build().expect("rule");
        let t1 = graph.create_transformer(&rule, app).expect("t1");
        let t2 = graph.create_transformer(&rule, app).expect("t2");
        let out = graph
            .create_generated_artifact(t1, "out.txt", tags(&["txt"]))
            .expect("generate");

        graph.assign_output(t2, out).expect("assign");

        assert!(graph.transformer(t1).is_none());
        assert!(graph.transformer(t2).expect("t2").outputs.contains(out));
        assert_eq!(graph.transformer_of(out).map(|t| t.id), Some(t2));
    }

    #[test]
    fn detached_rule_node_is_reinserted_on_error() {
        let (mut graph, app) = graph_with_product();
        let rule = Rule::builder(RuleId(1), "cc").input("c").build().expect("rule");
        let node = graph.add_rule_node(rule, app).expect("node");

        let result: Result<(), KilnError> = graph.with_detached_rule_node(node, |_, g| {
            assert!(g.rule_node(node).is_none());
            Err(KilnError::InvalidGraph("boom".to_string()))
        });

        assert!(result.is_err());
        assert!(graph.rule_node(node).is_some());
    }

    #[test]
    fn rule_instantiated_once_per_product() {
        let (mut graph, app) = graph_with_product();
        let rule = Rule::builder(RuleId(1), "cc").input("c").build().expect("rule");
        graph.add_rule_node(Arc::clone(&rule), app).expect("first");
        assert!(graph.add_rule_node(rule, app).is_err());
    }

    #[test]
    fn discarded_build_data_hides_artifacts() {
        let (mut graph, app) = graph_with_product();
        graph.add_source_artifact(app, "a.c", tags(&["c"])).expect("add");

        graph.discard_product_build_data(app).expect("discard");

        assert!(!graph.product_has_build_data(app));
        assert!(graph.product(app).is_some());
        assert_eq!(graph.artifacts_of_product(app).count(), 0);
        assert_eq!(graph.artifact_count(), 0);
    }

    #[test]
    fn serializable_graph_roundtrip() {
        let (mut graph, app) = graph_with_product();
        let rule = Rule::builder(RuleId(1), "cc")
            .input("c")
            .output("{base}.o", &["obj"])
            .build()
            .expect("rule");
        let src = graph.add_source_artifact(app, "a.c", tags(&["c"])).expect("add");
        let t = graph.create_transformer(&rule, app).expect("transformer");
        let obj = graph
            .create_generated_artifact(t, "a.o", tags(&["obj"]))
            .expect("generate");
        graph.connect(obj, src).expect("connect");
        graph.add_rule_node(rule, app).expect("node");

        let restored =
            BuildGraph::try_from(SerializableBuildGraph::from(&graph)).expect("restore");

        assert_eq!(restored.artifact_count(), 2);
        assert_eq!(restored.transformer_count(), 1);
        assert_eq!(restored.rule_node_count(), 1);
        assert_eq!(restored.find_artifact_by_path(app, "a.o"), Some(obj));
        assert_eq!(
            restored.transformer_of(obj).map(|t| t.rule.id()),
            Some(RuleId(1))
        );
        assert!(restored.artifact(src).expect("src").parents().contains(&NodeRef::Artifact(obj)));
    }

    #[test]
    fn relinking_unknown_rule_fails() {
        let (mut graph, app) = graph_with_product();
        let rule = Rule::builder(RuleId(1), "cc").input("c").build().expect("rule");
        graph.add_rule_node(rule, app).expect("node");

        let mut sg = SerializableBuildGraph::from(&graph);
        sg.rules.clear();

        let result = BuildGraph::try_from(sg);
        assert!(matches!(result, Err(KilnError::RuleNotFound(RuleId(1)))));
    }
}
