//! Foreign-key related-reference injection.
//!
//! For the capping projection constructing entities (directly or behind a
//! discriminator case), and for every foreign-key-constrained relationship
//! set whose dependent end is the entity set being materialized, attach a
//! related-entity reference to each constructor. The reference is computed
//! from the constructor's own foreign-key argument values, ordered by the
//! principal key's member order, so later navigation needs no separate
//! lookup.
//!
//! The rule evaluates at most once per simplification: the first invocation
//! flips a context flag that permanently disables re-entry, whether or not a
//! rewrite happened.

use crate::error::Result;
use crate::expressions::{
    ExprRef, Expression, ExpressionBinding, NewInstance, RelatedEntityRef,
};
use crate::types::DataType;
use std::sync::Arc;

use super::rules::{Rule, RulePolicy};
use super::simplifier::SimplifyContext;

pub struct AddRelatedEntityRefs;

impl<'a> Rule<SimplifyContext<'a>> for AddRelatedEntityRefs {
    fn name(&self) -> &'static str {
        "add_related_entity_refs"
    }

    fn should_process(&self, expr: &ExprRef, ctx: &SimplifyContext<'a>) -> bool {
        if ctx.related_refs_evaluated {
            return false;
        }
        let Some(project) = expr.as_project() else {
            return false;
        };
        constructs_entities(&project.projection)
    }

    fn try_process(
        &self,
        expr: &ExprRef,
        ctx: &mut SimplifyContext<'a>,
    ) -> Result<Option<ExprRef>> {
        // One evaluation per simplification, rewrite or not
        ctx.related_refs_evaluated = true;

        let Some(project) = expr.as_project() else {
            return Ok(None);
        };
        let Some(projection) = inject_into_projection(&project.projection, ctx)? else {
            return Ok(None);
        };
        let binding = ExpressionBinding::new(
            project.input.variable.clone(),
            project.input.expression.clone(),
        )?;
        Expression::project(binding, projection).map(Some)
    }

    fn policy(&self) -> RulePolicy {
        RulePolicy::Continue
    }
}

/// Whether the projection builds entity instances, directly or behind a case
fn constructs_entities(projection: &ExprRef) -> bool {
    if is_entity_constructor(projection) {
        return true;
    }
    match projection.as_case() {
        Some(case) => {
            case.whens.iter().any(|branch| is_entity_constructor(&branch.then))
                || is_entity_constructor(&case.else_expr)
        }
        None => false,
    }
}

fn is_entity_constructor(expr: &ExprRef) -> bool {
    matches!(
        expr.as_new_instance(),
        Some(ctor) if matches!(ctor.result_type.data_type, DataType::Entity(_))
    )
}

/// Inject references into a bare constructor or into each constructor of a
/// discriminator case. `None` when nothing was added.
fn inject_into_projection(
    projection: &ExprRef,
    ctx: &SimplifyContext<'_>,
) -> Result<Option<ExprRef>> {
    if let Some(injected) = inject_into_constructor(projection, ctx)? {
        return Ok(Some(injected));
    }
    let Some(case) = projection.as_case() else {
        return Ok(None);
    };
    let mut changed = false;
    let mut whens = Vec::with_capacity(case.whens.len());
    for branch in &case.whens {
        match inject_into_constructor(&branch.then, ctx)? {
            Some(then) => {
                changed = true;
                whens.push((branch.when.clone(), then));
            }
            None => whens.push((branch.when.clone(), branch.then.clone())),
        }
    }
    let else_expr = match inject_into_constructor(&case.else_expr, ctx)? {
        Some(else_expr) => {
            changed = true;
            else_expr
        }
        None => case.else_expr.clone(),
    };
    if !changed {
        return Ok(None);
    }
    Expression::case_(whens, else_expr).map(Some)
}

/// Attach one reference per applicable foreign-key relationship set.
/// `None` when the expression is not an entity constructor or no
/// relationship applies.
fn inject_into_constructor(
    expr: &ExprRef,
    ctx: &SimplifyContext<'_>,
) -> Result<Option<ExprRef>> {
    let Some(ctor) = expr.as_new_instance() else {
        return Ok(None);
    };
    let DataType::Entity(entity) = &ctor.result_type.data_type else {
        return Ok(None);
    };

    let mut related_refs = ctor.related_refs.clone();
    let mut added = false;
    for relationship in ctx.catalog.relationship_sets() {
        let Some(constraint) = &relationship.constraint else {
            continue;
        };
        let Some(dependent) = relationship.end(&constraint.dependent_role) else {
            continue;
        };
        if dependent.entity_set != ctx.entity_set.name {
            continue;
        }
        let Some(principal) = relationship.end(&constraint.principal_role) else {
            continue;
        };
        let Some(principal_set) = ctx
            .catalog
            .entity_set(&relationship.container, &principal.entity_set)
        else {
            continue;
        };
        let already_present = related_refs.iter().any(|rel| {
            rel.relationship == relationship.name && rel.target_role == constraint.principal_role
        });
        if already_present {
            continue;
        }

        // Key values in the principal key's member order, read from the
        // constructor's foreign-key arguments
        let principal_type = &principal_set.element_type;
        let mut key_values = Vec::with_capacity(principal_type.key_members.len());
        let mut derivable = true;
        for key_member in &principal_type.key_members {
            let Some(position) = constraint
                .principal_key
                .iter()
                .position(|name| name == key_member)
            else {
                derivable = false;
                break;
            };
            let dependent_property = &constraint.dependent_properties[position];
            let Some(argument_index) = entity.property_index(dependent_property) else {
                derivable = false;
                break;
            };
            key_values.push(ctor.arguments[argument_index].clone());
        }
        if !derivable {
            continue;
        }

        let reference = match Expression::ref_(principal_set.clone(), key_values) {
            Ok(reference) => reference,
            Err(_) => continue,
        };
        related_refs.push(RelatedEntityRef {
            relationship: relationship.name.clone(),
            target_role: constraint.principal_role.clone(),
            reference,
        });
        added = true;
    }

    if !added {
        return Ok(None);
    }
    Ok(Some(Arc::new(Expression::NewInstance(Box::new(
        NewInstance {
            arguments: ctor.arguments.clone(),
            related_refs,
            result_type: ctor.result_type.clone(),
        },
    )))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{
        Catalog, EntitySet, ForeignKeyConstraint, MappingCatalog, Multiplicity, RelationshipEnd,
        RelationshipSet,
    };
    use crate::types::{DataSpace, EntityType, TypeUsage};

    /// Orders with a foreign key into Customers
    fn fk_catalog() -> MappingCatalog {
        let mut catalog = MappingCatalog::new();
        let customer = catalog.add_entity_type(EntityType {
            namespace: "Model".to_string(),
            name: "Customer".to_string(),
            space: DataSpace::Model,
            base_type: None,
            key_members: vec!["Id".to_string()],
            properties: vec![
                ("Id".to_string(), TypeUsage::int32()),
                ("Name".to_string(), TypeUsage::string()),
            ],
        });
        let order = catalog.add_entity_type(EntityType {
            namespace: "Model".to_string(),
            name: "Order".to_string(),
            space: DataSpace::Model,
            base_type: None,
            key_members: vec!["Id".to_string()],
            properties: vec![
                ("Id".to_string(), TypeUsage::int32()),
                ("CustomerId".to_string(), TypeUsage::int32()),
            ],
        });
        catalog.add_entity_set(EntitySet::new("Container", "Customers", customer.clone()));
        catalog.add_entity_set(EntitySet::new("Container", "Orders", order.clone()));
        catalog.add_relationship_set(RelationshipSet {
            container: "Container".to_string(),
            name: "FK_Orders_Customers".to_string(),
            ends: vec![
                RelationshipEnd {
                    role: "Customer".to_string(),
                    entity_set: "Customers".to_string(),
                    element_type: customer,
                    multiplicity: Multiplicity::One,
                },
                RelationshipEnd {
                    role: "Order".to_string(),
                    entity_set: "Orders".to_string(),
                    element_type: order,
                    multiplicity: Multiplicity::Many,
                },
            ],
            constraint: Some(ForeignKeyConstraint {
                principal_role: "Customer".to_string(),
                dependent_role: "Order".to_string(),
                principal_key: vec!["Id".to_string()],
                dependent_properties: vec!["CustomerId".to_string()],
            }),
        });
        catalog
    }

    /// project(scan(Orders), Order(o.Id, o.CustomerId))
    fn capping_projection(catalog: &MappingCatalog) -> ExprRef {
        let orders = catalog.entity_set("Container", "Orders").unwrap().clone();
        let element = orders.element_type.clone();
        let binding = ExpressionBinding::new("o", Expression::scan(orders)).unwrap();
        let ctor = Expression::new_instance(
            TypeUsage::entity(element),
            vec![
                Expression::property(binding.reference(), "Id").unwrap(),
                Expression::property(binding.reference(), "CustomerId").unwrap(),
            ],
        )
        .unwrap();
        Expression::project(binding, ctor).unwrap()
    }

    fn run_rule(catalog: &MappingCatalog, tree: &ExprRef) -> (Option<ExprRef>, bool) {
        let entity_set = catalog.entity_set("Container", "Orders").unwrap();
        let mut ctx = SimplifyContext::new(catalog, entity_set);
        let rule = AddRelatedEntityRefs;
        if !rule.should_process(tree, &ctx) {
            return (None, ctx.related_refs_evaluated);
        }
        let out = rule.try_process(tree, &mut ctx).unwrap();
        (out, ctx.related_refs_evaluated)
    }

    #[test]
    fn test_injects_reference_from_fk_arguments() {
        let catalog = fk_catalog();
        let tree = capping_projection(&catalog);
        let (rewritten, evaluated) = run_rule(&catalog, &tree);
        assert!(evaluated);
        let rewritten = rewritten.expect("should inject");

        let ctor = rewritten
            .as_project()
            .unwrap()
            .projection
            .as_new_instance()
            .unwrap();
        assert_eq!(ctor.related_refs.len(), 1);
        let rel = &ctor.related_refs[0];
        assert_eq!(rel.relationship, "FK_Orders_Customers");
        assert_eq!(rel.target_role, "Customer");

        // The reference's key value is the constructor's CustomerId argument
        let Expression::Ref(reference) = rel.reference.as_ref() else {
            panic!("expected a ref expression")
        };
        assert_eq!(reference.entity_set.name, "Customers");
        assert_eq!(reference.key_values.len(), 1);
        assert_eq!(
            reference.key_values[0].as_property().unwrap().name,
            "CustomerId"
        );
    }

    #[test]
    fn test_no_applicable_relationship_is_a_non_match() {
        let catalog = fk_catalog();
        // Materialize Customers instead: no FK points *from* Customers
        let customers = catalog.entity_set("Container", "Customers").unwrap().clone();
        let element = customers.element_type.clone();
        let binding = ExpressionBinding::new("c", Expression::scan(customers)).unwrap();
        let ctor = Expression::new_instance(
            TypeUsage::entity(element),
            vec![
                Expression::property(binding.reference(), "Id").unwrap(),
                Expression::property(binding.reference(), "Name").unwrap(),
            ],
        )
        .unwrap();
        let tree = Expression::project(binding, ctor).unwrap();

        let entity_set = catalog.entity_set("Container", "Customers").unwrap().clone();
        let mut ctx = SimplifyContext::new(&catalog, &entity_set);
        let rule = AddRelatedEntityRefs;
        assert!(rule.should_process(&tree, &ctx));
        let out = rule.try_process(&tree, &mut ctx).unwrap();
        assert!(out.is_none());
        // The flag is set even though nothing was rewritten
        assert!(ctx.related_refs_evaluated);
    }

    #[test]
    fn test_injection_is_idempotent_per_reference() {
        let catalog = fk_catalog();
        let tree = capping_projection(&catalog);
        let (first, _) = run_rule(&catalog, &tree);
        let first = first.unwrap();

        // Running the injection again over the already-annotated tree adds
        // nothing: the reference for this relationship and role is present
        let (second, _) = run_rule(&catalog, &first);
        assert!(second.is_none());
    }
}
