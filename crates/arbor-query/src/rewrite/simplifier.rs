//! View simplification pipeline.
//!
//! A fixed four-rule configuration of the rule processor, run once over a
//! command tree's top-level query node:
//!
//! 1. nested-projection collapse
//! 2. case-predicate simplification
//! 3. nested discriminator canonicalization
//! 4. foreign-key related-reference injection
//!
//! The simplifier treats every rule as optional and failure-tolerant: a rule
//! whose preconditions are not met is skipped silently and the original
//! subtree preserved, so `simplify_view` itself never fails -- when nothing
//! applies (or reconstruction goes wrong internally) the input tree comes
//! back unchanged.

use crate::expressions::ExprRef;
use crate::metadata::{Catalog, EntitySet};

use super::case_predicates::SimplifyCasePredicates;
use super::collapse_projections::CollapseNestedProjections;
use super::discriminator::CanonicalizeDiscriminator;
use super::related_references::AddRelatedEntityRefs;
use super::rules::{Rule, RuleProcessor};

/// Pass-local state shared by the simplification rules.
///
/// One context lives for exactly one `simplify_view` invocation; the flags
/// are never shared across concurrent rewrites.
pub struct SimplifyContext<'a> {
    /// The catalog the view is defined against
    pub catalog: &'a dyn Catalog,
    /// The entity set the view materializes
    pub entity_set: &'a EntitySet,
    /// Related-reference injection has run (it runs at most once)
    pub related_refs_evaluated: bool,
    /// A discriminator shape was already rewritten this invocation
    pub discriminator_rewritten: bool,
}

impl<'a> SimplifyContext<'a> {
    pub fn new(catalog: &'a dyn Catalog, entity_set: &'a EntitySet) -> Self {
        Self {
            catalog,
            entity_set,
            related_refs_evaluated: false,
            discriminator_rewritten: false,
        }
    }
}

/// Simplify a generated view query for `entity_set`.
///
/// Never fails: unmatched rules are skipped and the original tree is
/// returned when nothing applies.
pub fn simplify_view(catalog: &dyn Catalog, entity_set: &EntitySet, tree: ExprRef) -> ExprRef {
    let collapse = CollapseNestedProjections;
    let case_predicates = SimplifyCasePredicates;
    let discriminator = CanonicalizeDiscriminator;
    let related_refs = AddRelatedEntityRefs;
    let rules: [&dyn Rule<SimplifyContext>; 4] = [
        &collapse,
        &case_predicates,
        &discriminator,
        &related_refs,
    ];

    let mut ctx = SimplifyContext::new(catalog, entity_set);
    let mut processor = RuleProcessor::new(&rules);
    match processor.process(tree.clone(), &mut ctx) {
        Ok(simplified) => simplified,
        Err(_) => tree,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expressions::{Expression, ExpressionBinding};
    use crate::metadata::MappingCatalog;
    use crate::types::{DataSpace, EntityType, TypeUsage};
    use std::sync::Arc;

    fn orders_catalog() -> MappingCatalog {
        let mut catalog = MappingCatalog::new();
        let order = catalog.add_entity_type(EntityType {
            namespace: "Model".to_string(),
            name: "Order".to_string(),
            space: DataSpace::Model,
            base_type: None,
            key_members: vec!["Id".to_string()],
            properties: vec![
                ("a".to_string(), TypeUsage::int32()),
                ("b".to_string(), TypeUsage::int32()),
            ],
        });
        catalog.add_entity_set(EntitySet::new("Container", "Orders", order));
        catalog
    }

    #[test]
    fn test_unmatched_tree_is_returned_unchanged() {
        let catalog = orders_catalog();
        let entity_set = catalog.entity_set("Container", "Orders").unwrap();
        let binding = ExpressionBinding::new(
            "o",
            Expression::scan(entity_set.clone()),
        )
        .unwrap();
        let tree = Expression::filter(binding, Expression::boolean(true)).unwrap();

        let simplified = simplify_view(&catalog, entity_set, tree.clone());
        assert!(Arc::ptr_eq(&simplified, &tree));
    }

    #[test]
    fn test_nested_projections_collapse_through_the_pipeline() {
        let catalog = orders_catalog();
        let entity_set = catalog.entity_set("Container", "Orders").unwrap();

        let inner_binding =
            ExpressionBinding::new("o", Expression::scan(entity_set.clone())).unwrap();
        let record = Expression::new_row(vec![
            (
                "x".to_string(),
                Expression::property(inner_binding.reference(), "a").unwrap(),
            ),
            (
                "y".to_string(),
                Expression::property(inner_binding.reference(), "b").unwrap(),
            ),
        ])
        .unwrap();
        let inner = Expression::project(inner_binding, record).unwrap();
        let outer_binding = ExpressionBinding::new("r", inner).unwrap();
        let outer = Expression::new_row(vec![
            (
                "p".to_string(),
                Expression::property(outer_binding.reference(), "x").unwrap(),
            ),
            ("q".to_string(), Expression::boolean(true)),
        ])
        .unwrap();
        let tree = Expression::project(outer_binding, outer).unwrap();

        let simplified = simplify_view(&catalog, entity_set, tree);
        let project = simplified.as_project().unwrap();
        assert!(matches!(
            project.input.expression.as_ref(),
            Expression::Scan(_)
        ));
        let ctor = project.projection.as_new_instance().unwrap();
        assert_eq!(ctor.arguments[0].as_property().unwrap().name, "a");
        assert!(ctor.arguments[1].is_boolean_constant(true));
    }
}
