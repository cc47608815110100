//! # Transformers
//!
//! A `Transformer` records one past rule execution: which rule ran, which
//! artifacts it consumed and produced, and the configuration values its
//! prepare script saw. Its input set is the authoritative answer to "what
//! was this output built from" on every later build.

use crate::rule::PropertyRef;
use crate::{ArtifactId, ArtifactSet, ProductId, Rule, TransformerId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A property value observed when the transformer last ran.
///
/// The scope is always fully resolved (`Some(name)`), so the record stays
/// meaningful when read back from a different product.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordedProperty {
    /// The property, with a concrete product/project name.
    pub property: PropertyRef,
    /// Observed value; `None` if the property was unset.
    pub value: Option<String>,
}

/// One recorded rule execution.
#[derive(Debug, Clone)]
pub struct Transformer {
    /// Graph identity.
    pub id: TransformerId,
    /// The rule that ran.
    pub rule: Arc<Rule>,
    /// Product the rule ran for.
    pub product: ProductId,
    /// Artifacts the execution consumed.
    pub inputs: ArtifactSet,
    /// Artifacts the execution produced.
    pub outputs: ArtifactSet,
    /// Configuration values the prepare script read.
    pub recorded_properties: Vec<RecordedProperty>,
}

impl Transformer {
    /// Create a transformer with no inputs or outputs yet.
    #[must_use]
    pub fn new(id: TransformerId, rule: Arc<Rule>, product: ProductId) -> Self {
        Self {
            id,
            rule,
            product,
            inputs: ArtifactSet::new(),
            outputs: ArtifactSet::new(),
            recorded_properties: Vec::new(),
        }
    }

    /// Whether this transformer was created by `rule`.
    #[must_use]
    pub fn is_from_rule(&self, rule: &Rule) -> bool {
        *self.rule == *rule
    }

    /// Whether `artifact` is among the recorded inputs.
    #[must_use]
    pub fn has_input(&self, artifact: ArtifactId) -> bool {
        self.inputs.contains(artifact)
    }
}
