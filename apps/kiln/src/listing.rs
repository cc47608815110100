//! # Graph Listings
//!
//! A listing is a literal TOML description of one project: its products,
//! rules and source files. `kiln seed` turns it into a fresh `BuildGraph`.
//!
//! ```toml
//! [project]
//! name = "demo"
//! properties = { profile = "release" }
//!
//! [[products]]
//! name = "app"
//! properties = { optimization = "fast" }
//! dependencies = ["lib"]
//! sources = [{ path = "main.c", tags = ["c"] }]
//!
//! [[rules]]
//! name = "compiler"
//! inputs = ["c"]
//! outputs = [{ path = "{base}.o", tags = ["obj"] }]
//! product_properties = ["optimization"]
//! products = ["app"]
//! ```
//!
//! Ids are assigned in listing order. Rule-node dependencies are derived
//! from file tags.

use kiln_core::{
    BuildGraph, CodeLocation, FileTags, KilnError, ProductId, ProjectId, PropertyRef,
    ResolvedProduct, ResolvedProject, Rule, RuleId, link_rule_nodes_by_tags,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// A whole listing file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GraphListing {
    pub project: ProjectListing,
    #[serde(default)]
    pub products: Vec<ProductListing>,
    #[serde(default)]
    pub rules: Vec<RuleListing>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectListing {
    pub name: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProductListing {
    pub name: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    /// Names of depended-upon products.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub sources: Vec<FileListing>,
    /// Artifacts standing for properties injected by dependencies.
    #[serde(default)]
    pub module_targets: Vec<FileListing>,
}

/// A file path with its tags.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileListing {
    pub path: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleListing {
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub inputs_from_dependencies: Vec<String>,
    #[serde(default)]
    pub excluded_inputs: Vec<String>,
    #[serde(default = "default_true")]
    pub requires_inputs: bool,
    #[serde(default)]
    pub multiplex: bool,
    #[serde(default)]
    pub dynamic: bool,
    #[serde(default)]
    pub outputs: Vec<FileListing>,
    /// Properties read from the product the rule runs for.
    #[serde(default)]
    pub product_properties: Vec<String>,
    /// Properties read from the product's project.
    #[serde(default)]
    pub project_properties: Vec<String>,
    /// Products the rule is instantiated for.
    #[serde(default)]
    pub products: Vec<String>,
    /// Declaring line in the listing, reported in diagnostics.
    #[serde(default)]
    pub line: u32,
}

const fn default_true() -> bool {
    true
}

impl GraphListing {
    /// Parse a listing from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, KilnError> {
        toml::from_str(text)
            .map_err(|e| KilnError::DeserializationError(format!("listing: {}", e)))
    }

    /// Build a fresh graph from the listing.
    ///
    /// `source` names the listing file in rule locations.
    pub fn into_graph(self, source: &str) -> Result<BuildGraph, KilnError> {
        let mut graph = BuildGraph::new();
        let project_id = ProjectId(1);
        graph.add_project(ResolvedProject {
            id: project_id,
            name: self.project.name,
            properties: self.project.properties,
        })?;

        let ids: BTreeMap<&str, ProductId> = self
            .products
            .iter()
            .zip(1u64..)
            .map(|(p, n)| (p.name.as_str(), ProductId(n)))
            .collect();
        let resolve = |name: &str| {
            ids.get(name).copied().ok_or_else(|| {
                KilnError::InvalidGraph(format!("listing refers to unknown product '{}'", name))
            })
        };

        for product in &self.products {
            let dependencies = product
                .dependencies
                .iter()
                .map(|d| resolve(d.as_str()))
                .collect::<Result<Vec<_>, _>>()?;
            graph.add_product(ResolvedProduct {
                id: resolve(product.name.as_str())?,
                name: product.name.clone(),
                project: project_id,
                properties: product.properties.clone(),
                dependencies,
            })?;
        }

        for product in &self.products {
            let id = resolve(product.name.as_str())?;
            for file in &product.sources {
                graph.add_source_artifact(id, file.path.clone(), tags(&file.tags))?;
            }
            for file in &product.module_targets {
                graph.add_module_target(id, file.path.clone(), tags(&file.tags))?;
            }
        }

        for (listing, n) in self.rules.iter().zip(1u64..) {
            let rule = listing.to_rule(RuleId(n), source)?;
            for product in &listing.products {
                graph.add_rule_node(Arc::clone(&rule), resolve(product.as_str())?)?;
            }
        }

        let edges = link_rule_nodes_by_tags(&mut graph)?;
        debug!(
            artifacts = graph.artifact_count(),
            rule_nodes = graph.rule_node_count(),
            edges,
            "listing loaded"
        );
        Ok(graph)
    }
}

impl RuleListing {
    fn to_rule(&self, id: RuleId, source: &str) -> Result<Arc<Rule>, KilnError> {
        let mut builder = Rule::builder(id, self.name.clone())
            .requires_inputs(self.requires_inputs)
            .multiplex(self.multiplex)
            .dynamic(self.dynamic)
            .location(CodeLocation::new(source, self.line, 0));
        for tag in &self.inputs {
            builder = builder.input(tag.as_str());
        }
        for tag in &self.inputs_from_dependencies {
            builder = builder.input_from_dependencies(tag.as_str());
        }
        for tag in &self.excluded_inputs {
            builder = builder.excluded_input(tag.as_str());
        }
        for output in &self.outputs {
            let tags: Vec<&str> = output.tags.iter().map(String::as_str).collect();
            builder = builder.output(output.path.clone(), &tags);
        }
        for key in &self.product_properties {
            builder = builder.uses_property(PropertyRef::product(key.clone()));
        }
        for key in &self.project_properties {
            builder = builder.uses_property(PropertyRef::project(key.clone()));
        }
        builder.build()
    }
}

/// Parse comma separated tags, as given on the command line.
pub fn parse_tags(list: &str) -> FileTags {
    list.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn tags(list: &[String]) -> FileTags {
    list.iter().cloned().collect()
}
