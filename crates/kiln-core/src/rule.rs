//! # Rule Definitions
//!
//! A `Rule` is the immutable description of a build step: which file tags it
//! consumes, whether it consumes all of them in one invocation (multiplex),
//! what it produces and which configuration properties its prepare script
//! reads.
//!
//! Rules are shared by reference (`Arc<Rule>`) between every rule node and
//! transformer created from them. Nothing mutates a rule after
//! [`RuleBuilder::build`].

use crate::primitives::MAX_RULE_OUTPUTS;
use crate::{CodeLocation, FileTag, FileTags, KilnError, RuleId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

// =============================================================================
// OUTPUT TEMPLATES
// =============================================================================

/// An output artifact a rule produces per invocation.
///
/// `path` may contain the placeholders `{product}`, `{rule}`, `{file}`
/// (input file name) and `{base}` (input file name without extension).
/// Per-input placeholders expand to empty strings for multiplex and
/// input-less invocations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputTemplate {
    /// Path pattern within the product.
    pub path: String,
    /// Tags given to the produced artifact.
    pub file_tags: FileTags,
}

impl OutputTemplate {
    /// Create an output template.
    #[must_use]
    pub fn new(path: impl Into<String>, file_tags: FileTags) -> Self {
        Self {
            path: path.into(),
            file_tags,
        }
    }
}

// =============================================================================
// PROPERTY REFERENCES
// =============================================================================

/// Where a property read by a prepare script lives.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PropertyScope {
    /// A product property. `None` means the rule's own product.
    Product(Option<String>),
    /// A project property. `None` means the own product's project.
    Project(Option<String>),
}

/// A configuration property a rule's prepare script depends on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PropertyRef {
    /// Owner of the property.
    pub scope: PropertyScope,
    /// Property key.
    pub key: String,
}

impl PropertyRef {
    /// A property of the rule's own product.
    #[must_use]
    pub fn product(key: impl Into<String>) -> Self {
        Self {
            scope: PropertyScope::Product(None),
            key: key.into(),
        }
    }

    /// A property of another, named product.
    #[must_use]
    pub fn of_product(product: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            scope: PropertyScope::Product(Some(product.into())),
            key: key.into(),
        }
    }

    /// A property of the own product's project.
    #[must_use]
    pub fn project(key: impl Into<String>) -> Self {
        Self {
            scope: PropertyScope::Project(None),
            key: key.into(),
        }
    }
}

// =============================================================================
// RULE
// =============================================================================

/// An immutable build rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    id: RuleId,
    name: String,
    inputs: FileTags,
    inputs_from_dependencies: FileTags,
    excluded_inputs: FileTags,
    requires_inputs: bool,
    multiplex: bool,
    dynamic: bool,
    outputs: Vec<OutputTemplate>,
    used_properties: Vec<PropertyRef>,
    location: CodeLocation,
}

impl Rule {
    /// Start building a rule with the given identity.
    #[must_use]
    pub fn builder(id: RuleId, name: impl Into<String>) -> RuleBuilder {
        RuleBuilder::new(id, name)
    }

    /// Identity used for equality against a transformer's rule.
    #[must_use]
    pub const fn id(&self) -> RuleId {
        self.id
    }

    /// Human-readable name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tags consumed from the owning product.
    #[must_use]
    pub const fn inputs(&self) -> &FileTags {
        &self.inputs
    }

    /// Tags consumed from dependencies (and from target-of-module artifacts).
    #[must_use]
    pub const fn inputs_from_dependencies(&self) -> &FileTags {
        &self.inputs_from_dependencies
    }

    /// Tags that disqualify an otherwise compatible dependency input.
    #[must_use]
    pub const fn excluded_inputs(&self) -> &FileTags {
        &self.excluded_inputs
    }

    /// Whether the rule only runs when it has inputs.
    #[must_use]
    pub const fn requires_inputs(&self) -> bool {
        self.requires_inputs
    }

    /// Whether the rule lists any input tags at all.
    #[must_use]
    pub fn declares_inputs(&self) -> bool {
        !self.inputs.is_empty() || !self.inputs_from_dependencies.is_empty()
    }

    /// Whether all inputs are consumed by a single invocation.
    #[must_use]
    pub const fn multiplex(&self) -> bool {
        self.multiplex
    }

    /// Whether the rule's outputs are only known after it ran.
    #[must_use]
    pub const fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    /// Declared outputs.
    #[must_use]
    pub fn outputs(&self) -> &[OutputTemplate] {
        &self.outputs
    }

    /// Union of the tags of all declared outputs.
    #[must_use]
    pub fn output_file_tags(&self) -> FileTags {
        self.outputs
            .iter()
            .flat_map(|o| o.file_tags.iter().cloned())
            .collect()
    }

    /// Properties the prepare script reads.
    #[must_use]
    pub fn used_properties(&self) -> &[PropertyRef] {
        &self.used_properties
    }

    /// Where the rule was declared.
    #[must_use]
    pub const fn location(&self) -> &CodeLocation {
        &self.location
    }
}

impl PartialEq for Rule {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Rule {}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{} -> {}", self.name, self.inputs, self.output_file_tags())
    }
}

// =============================================================================
// BUILDER
// =============================================================================

/// Fluent constructor for [`Rule`].
#[derive(Debug, Clone)]
pub struct RuleBuilder {
    rule: Rule,
}

impl RuleBuilder {
    /// Create a builder. Defaults: no inputs, inputs required, not multiplex.
    #[must_use]
    pub fn new(id: RuleId, name: impl Into<String>) -> Self {
        Self {
            rule: Rule {
                id,
                name: name.into(),
                inputs: FileTags::new(),
                inputs_from_dependencies: FileTags::new(),
                excluded_inputs: FileTags::new(),
                requires_inputs: true,
                multiplex: false,
                dynamic: false,
                outputs: Vec::new(),
                used_properties: Vec::new(),
                location: CodeLocation::default(),
            },
        }
    }

    /// Add an input tag.
    #[must_use]
    pub fn input(mut self, tag: impl Into<FileTag>) -> Self {
        self.rule.inputs.insert(tag);
        self
    }

    /// Add a from-dependency input tag.
    #[must_use]
    pub fn input_from_dependencies(mut self, tag: impl Into<FileTag>) -> Self {
        self.rule.inputs_from_dependencies.insert(tag);
        self
    }

    /// Add an excluded input tag.
    #[must_use]
    pub fn excluded_input(mut self, tag: impl Into<FileTag>) -> Self {
        self.rule.excluded_inputs.insert(tag);
        self
    }

    /// Set whether inputs are required.
    #[must_use]
    pub fn requires_inputs(mut self, requires: bool) -> Self {
        self.rule.requires_inputs = requires;
        self
    }

    /// Set the multiplex flag.
    #[must_use]
    pub fn multiplex(mut self, multiplex: bool) -> Self {
        self.rule.multiplex = multiplex;
        self
    }

    /// Set the dynamic flag.
    #[must_use]
    pub fn dynamic(mut self, dynamic: bool) -> Self {
        self.rule.dynamic = dynamic;
        self
    }

    /// Add an output template.
    #[must_use]
    pub fn output(mut self, path: impl Into<String>, tags: &[&str]) -> Self {
        self.rule
            .outputs
            .push(OutputTemplate::new(path, tags.iter().copied().collect()));
        self
    }

    /// Add a property the prepare script reads.
    #[must_use]
    pub fn uses_property(mut self, property: PropertyRef) -> Self {
        self.rule.used_properties.push(property);
        self
    }

    /// Set the declaration location.
    #[must_use]
    pub fn location(mut self, location: CodeLocation) -> Self {
        self.rule.location = location;
        self
    }

    /// Validate and freeze the rule.
    pub fn build(self) -> Result<Arc<Rule>, KilnError> {
        let rule = self.rule;
        if rule.name.is_empty() {
            return Err(KilnError::InvalidGraph(format!(
                "{} has an empty name",
                rule.id
            )));
        }
        if rule.outputs.len() > MAX_RULE_OUTPUTS {
            return Err(KilnError::InvalidGraph(format!(
                "rule '{}' declares {} outputs (maximum {})",
                rule.name,
                rule.outputs.len(),
                MAX_RULE_OUTPUTS
            )));
        }
        if rule.outputs.iter().any(|o| o.path.is_empty()) {
            return Err(KilnError::InvalidGraph(format!(
                "rule '{}' declares an output with an empty path",
                rule.name
            )));
        }
        Ok(Arc::new(rule))
    }
}

// =============================================================================
// TESTS
// =============================================================================
