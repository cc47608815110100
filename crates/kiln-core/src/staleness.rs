//! # Staleness Predicate
//!
//! Decides whether a recorded transformer must run again even though its
//! inputs did not change, typically because a configuration value its
//! prepare script read is different now.

use crate::product::{ProductsByName, ProjectsByName, ResolvedProduct};
use crate::rule::PropertyScope;
use crate::transformer::Transformer;
use tracing::trace;

/// "Must this transformer run again?"
///
/// `product` is the transformer's owning product, `None` if it is gone.
/// Implementations must be side-effect free with respect to the graph.
pub trait StalenessPredicate {
    fn needs_rerun(
        &self,
        transformer: &Transformer,
        product: Option<&ResolvedProduct>,
        products_by_name: &ProductsByName,
        projects_by_name: &ProjectsByName,
    ) -> bool;
}

impl<F> StalenessPredicate for F
where
    F: Fn(&Transformer, Option<&ResolvedProduct>, &ProductsByName, &ProjectsByName) -> bool,
{
    fn needs_rerun(
        &self,
        transformer: &Transformer,
        product: Option<&ResolvedProduct>,
        products_by_name: &ProductsByName,
        projects_by_name: &ProjectsByName,
    ) -> bool {
        self(transformer, product, products_by_name, projects_by_name)
    }
}

/// Compares the property values a transformer recorded against the current
/// configuration.
///
/// Stale when the owning product is gone, when a recorded product or project
/// no longer exists, or when any recorded value differs.
#[derive(Debug, Clone, Copy, Default)]
pub struct PropertyDrift;

impl StalenessPredicate for PropertyDrift {
    fn needs_rerun(
        &self,
        transformer: &Transformer,
        product: Option<&ResolvedProduct>,
        products_by_name: &ProductsByName,
        projects_by_name: &ProjectsByName,
    ) -> bool {
        let Some(product) = product else {
            return true;
        };

        transformer.recorded_properties.iter().any(|recorded| {
            let key = recorded.property.key.as_str();
            let current = match &recorded.property.scope {
                PropertyScope::Product(Some(name)) => match products_by_name.get(name) {
                    Some(p) => p.property(key),
                    None => return true,
                },
                PropertyScope::Product(None) => product.property(key),
                PropertyScope::Project(Some(name)) => match projects_by_name.get(name) {
                    Some(p) => p.property(key),
                    None => return true,
                },
                PropertyScope::Project(None) => return true,
            };
            let drifted = current != recorded.value.as_deref();
            if drifted {
                trace!(
                    transformer = %transformer.id,
                    key,
                    recorded = ?recorded.value,
                    current = ?current,
                    "Property value changed"
                );
            }
            drifted
        })
    }
}
