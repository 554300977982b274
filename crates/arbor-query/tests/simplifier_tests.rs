//! View Simplifier Tests
//!
//! End-to-end checks of the fixed simplification pipeline: nested-projection
//! collapse, case-predicate simplification, discriminator canonicalization,
//! and foreign-key related-reference injection.

use arbor_query::{
    simplify_view, Catalog, DataSpace, EntitySet, EntityType, ExprRef, Expression,
    ExpressionBinding, ForeignKeyConstraint, MappingCatalog, Multiplicity, RelationshipEnd,
    RelationshipSet, TypeUsage,
};
use std::sync::Arc;

/// Store-shaped product rows with a discriminator, three hierarchy subtypes
/// over a common base, and a foreign key into Suppliers.
fn tph_catalog() -> MappingCatalog {
    let mut catalog = MappingCatalog::new();

    let supplier = catalog.add_entity_type(EntityType {
        namespace: "Model".to_string(),
        name: "Supplier".to_string(),
        space: DataSpace::Model,
        base_type: None,
        key_members: vec!["Id".to_string()],
        properties: vec![
            ("Id".to_string(), TypeUsage::int32()),
            ("Name".to_string(), TypeUsage::string()),
        ],
    });
    catalog.add_entity_set(EntitySet::new("Container", "Suppliers", supplier.clone()));

    let source = catalog.add_entity_type(EntityType {
        namespace: "Store".to_string(),
        name: "Product".to_string(),
        space: DataSpace::Model,
        base_type: None,
        key_members: vec!["Id".to_string()],
        properties: vec![
            ("Id".to_string(), TypeUsage::int32()),
            ("Disc".to_string(), TypeUsage::int32()),
            ("SupplierId".to_string(), TypeUsage::int32()),
        ],
    });
    catalog.add_entity_set(EntitySet::new("Container", "Products", source));

    let base = catalog.add_entity_type(EntityType {
        namespace: "Model".to_string(),
        name: "Product".to_string(),
        space: DataSpace::Model,
        base_type: None,
        key_members: vec!["Id".to_string()],
        properties: vec![
            ("Id".to_string(), TypeUsage::int32()),
            ("SupplierId".to_string(), TypeUsage::int32()),
        ],
    });
    for name in ["TypeA", "TypeB", "TypeC"] {
        catalog.add_entity_type(EntityType {
            namespace: "Model".to_string(),
            name: name.to_string(),
            space: DataSpace::Model,
            base_type: Some(base.clone()),
            key_members: vec!["Id".to_string()],
            properties: vec![
                ("Id".to_string(), TypeUsage::int32()),
                ("SupplierId".to_string(), TypeUsage::int32()),
            ],
        });
    }
    let products_view = catalog.add_entity_type(EntityType {
        namespace: "Model".to_string(),
        name: "ProductRow".to_string(),
        space: DataSpace::Model,
        base_type: None,
        key_members: vec!["Id".to_string()],
        properties: vec![
            ("Id".to_string(), TypeUsage::int32()),
            ("SupplierId".to_string(), TypeUsage::int32()),
        ],
    });
    catalog.add_entity_set(EntitySet::new(
        "Container",
        "ProductsView",
        products_view.clone(),
    ));

    catalog.add_relationship_set(RelationshipSet {
        container: "Container".to_string(),
        name: "FK_Products_Suppliers".to_string(),
        ends: vec![
            RelationshipEnd {
                role: "Supplier".to_string(),
                entity_set: "Suppliers".to_string(),
                element_type: supplier,
                multiplicity: Multiplicity::One,
            },
            RelationshipEnd {
                role: "Product".to_string(),
                entity_set: "ProductsView".to_string(),
                element_type: products_view,
                multiplicity: Multiplicity::Many,
            },
        ],
        constraint: Some(ForeignKeyConstraint {
            principal_role: "Supplier".to_string(),
            dependent_role: "Product".to_string(),
            principal_key: vec!["Id".to_string()],
            dependent_properties: vec!["SupplierId".to_string()],
        }),
    });

    catalog
}

fn subtype_ctor(catalog: &MappingCatalog, name: &str, id: ExprRef, supplier_id: ExprRef) -> ExprRef {
    let entity = catalog
        .find_entity_type("Model", name, DataSpace::Model)
        .unwrap()
        .clone();
    Expression::new_instance(TypeUsage::entity(entity), vec![id, supplier_id]).unwrap()
}

/// The five-level nested discriminator shape: Disc=1 -> TypeA, Disc=2 ->
/// TypeB, else TypeC
fn nested_tph_shape(catalog: &MappingCatalog) -> ExprRef {
    let set = catalog.entity_set("Container", "Products").unwrap().clone();

    let s = ExpressionBinding::new("s", Expression::scan(set)).unwrap();
    let disc_pred = Expression::or(
        Expression::eq(
            Expression::property(s.reference(), "Disc").unwrap(),
            Expression::int32(1),
        )
        .unwrap(),
        Expression::eq(
            Expression::property(s.reference(), "Disc").unwrap(),
            Expression::int32(2),
        )
        .unwrap(),
    )
    .unwrap();
    let disc_filter = Expression::filter(s, disc_pred).unwrap();

    let p = ExpressionBinding::new("p", disc_filter).unwrap();
    let flag = |value: i32| {
        Expression::case_(
            vec![(
                Expression::eq(
                    Expression::property(p.reference(), "Disc").unwrap(),
                    Expression::int32(value),
                )
                .unwrap(),
                Expression::boolean(true),
            )],
            Expression::boolean(false),
        )
        .unwrap()
    };
    let record = Expression::new_row(vec![
        ("f1".to_string(), flag(1)),
        ("f2".to_string(), flag(2)),
        (
            "Id".to_string(),
            Expression::property(p.reference(), "Id").unwrap(),
        ),
        (
            "SupplierId".to_string(),
            Expression::property(p.reference(), "SupplierId").unwrap(),
        ),
    ])
    .unwrap();
    let flag_project = Expression::project(p, record).unwrap();

    let f = ExpressionBinding::new("f", flag_project).unwrap();
    let flag_pred = Expression::or(
        Expression::property(f.reference(), "f1").unwrap(),
        Expression::property(f.reference(), "f2").unwrap(),
    )
    .unwrap();
    let flag_filter = Expression::filter(f, flag_pred).unwrap();

    let c = ExpressionBinding::new("c", flag_filter).unwrap();
    let arg = |name: &str| Expression::property(c.reference(), name).unwrap();
    let capping = Expression::case_(
        vec![
            (
                Expression::property(c.reference(), "f1").unwrap(),
                subtype_ctor(catalog, "TypeA", arg("Id"), arg("SupplierId")),
            ),
            (
                Expression::property(c.reference(), "f2").unwrap(),
                subtype_ctor(catalog, "TypeB", arg("Id"), arg("SupplierId")),
            ),
        ],
        subtype_ctor(catalog, "TypeC", arg("Id"), arg("SupplierId")),
    )
    .unwrap();
    Expression::project(c, capping).unwrap()
}

fn flatten_or(expr: &ExprRef) -> Vec<&ExprRef> {
    match expr.as_ref() {
        Expression::Or(binary) => {
            let mut terms = flatten_or(&binary.left);
            terms.extend(flatten_or(&binary.right));
            terms
        }
        _ => vec![expr],
    }
}

mod projection_collapse {
    use super::*;

    #[test]
    fn test_synthetic_collapse_from_the_contract() {
        // project(project(scan, {x: a, y: b}), {p: x, q: y, r: true})
        // collapses to project(scan, {p: a, q: b, r: true})
        let mut catalog = MappingCatalog::new();
        let row_source = catalog.add_entity_type(EntityType {
            namespace: "Model".to_string(),
            name: "Source".to_string(),
            space: DataSpace::Model,
            base_type: None,
            key_members: vec!["a".to_string()],
            properties: vec![
                ("a".to_string(), TypeUsage::int32()),
                ("b".to_string(), TypeUsage::int32()),
            ],
        });
        catalog.add_entity_set(EntitySet::new("Container", "Sources", row_source));
        let entity_set = catalog.entity_set("Container", "Sources").unwrap();

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
            (
                "q".to_string(),
                Expression::property(outer_binding.reference(), "y").unwrap(),
            ),
            ("r".to_string(), Expression::boolean(true)),
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
        assert_eq!(ctor.arguments.len(), 3);
        assert_eq!(ctor.arguments[0].as_property().unwrap().name, "a");
        assert_eq!(ctor.arguments[1].as_property().unwrap().name, "b");
        assert!(ctor.arguments[2].is_boolean_constant(true));
    }
}

mod discriminator_canonicalization {
    use super::*;

    #[test]
    fn test_five_level_shape_becomes_single_level() {
        let catalog = tph_catalog();
        let entity_set = catalog.entity_set("Container", "ProductsView").unwrap();
        let tree = nested_tph_shape(&catalog);

        let simplified = simplify_view(&catalog, entity_set, tree);

        // filter(scan, Disc=1 or Disc=2) directly under the projection
        let project = simplified.as_project().unwrap();
        let filter = project.input.expression.as_filter().unwrap();
        assert!(matches!(
            filter.input.expression.as_ref(),
            Expression::Scan(_)
        ));
        let tests = flatten_or(&filter.predicate);
        assert_eq!(tests.len(), 2);

        // case when Disc=1 then TypeA(..) when Disc=2 then TypeB(..) else TypeC(..)
        let case = project.projection.as_case().unwrap();
        assert_eq!(case.whens.len(), 2);
        for branch in &case.whens {
            let Expression::Comparison(comparison) = branch.when.as_ref() else {
                panic!("expected a discriminator comparison")
            };
            assert_eq!(comparison.left.as_property().unwrap().name, "Disc");
            assert!(branch.then.as_new_instance().is_some());
        }
        assert!(case.else_expr.as_new_instance().is_some());
    }

    #[test]
    fn test_deviation_leaves_the_tree_completely_unchanged() {
        let catalog = tph_catalog();
        // Simplify for the store-side set: no foreign-key relationship has
        // it as a dependent end, so reference injection cannot kick in and
        // the only candidate rewrite is the (failing) canonicalization
        let entity_set = catalog.entity_set("Container", "Products").unwrap();

        // Rebuild the shape with one extra non-flag predicate term in the
        // flag filter
        let tree = nested_tph_shape(&catalog);
        let project = tree.as_project().unwrap();
        let flag_filter = project.input.expression.as_filter().unwrap();
        let extra_term = Expression::eq(
            Expression::property(
                Expression::variable(
                    flag_filter.input.variable.clone(),
                    flag_filter.input.variable_type.clone(),
                ),
                "Id",
            )
            .unwrap(),
            Expression::int32(0),
        )
        .unwrap();
        let tampered_predicate = Expression::or(flag_filter.predicate.clone(), extra_term).unwrap();
        let tampered_filter = Expression::filter(
            ExpressionBinding::new(
                flag_filter.input.variable.clone(),
                flag_filter.input.expression.clone(),
            )
            .unwrap(),
            tampered_predicate,
        )
        .unwrap();
        let tampered = Expression::project(
            ExpressionBinding::new(project.input.variable.clone(), tampered_filter).unwrap(),
            project.projection.clone(),
        )
        .unwrap();

        let simplified = simplify_view(&catalog, entity_set, tampered.clone());
        assert!(Arc::ptr_eq(&simplified, &tampered));
    }
}

mod related_reference_injection {
    use super::*;

    #[test]
    fn test_canonicalized_constructors_gain_supplier_references() {
        let catalog = tph_catalog();
        let entity_set = catalog.entity_set("Container", "ProductsView").unwrap();
        let tree = nested_tph_shape(&catalog);

        let simplified = simplify_view(&catalog, entity_set, tree);

        // After canonicalization, every subtype constructor carries a
        // reference into Suppliers derived from its SupplierId argument
        let project = simplified.as_project().unwrap();
        let case = project.projection.as_case().unwrap();
        let mut constructors: Vec<&ExprRef> =
            case.whens.iter().map(|branch| &branch.then).collect();
        constructors.push(&case.else_expr);
        for constructor in constructors {
            let ctor = constructor.as_new_instance().unwrap();
            assert_eq!(ctor.related_refs.len(), 1, "missing injected reference");
            let rel = &ctor.related_refs[0];
            assert_eq!(rel.relationship, "FK_Products_Suppliers");
            assert_eq!(rel.target_role, "Supplier");
            let Expression::Ref(reference) = rel.reference.as_ref() else {
                panic!("expected a ref expression")
            };
            assert_eq!(reference.entity_set.name, "Suppliers");
        }
    }

    #[test]
    fn test_plain_entity_projection_gains_reference() {
        let catalog = tph_catalog();
        let entity_set = catalog.entity_set("Container", "ProductsView").unwrap();
        let element = entity_set.element_type.clone();

        let products = catalog.entity_set("Container", "Products").unwrap().clone();
        let binding = ExpressionBinding::new("r", Expression::scan(products)).unwrap();
        let ctor = Expression::new_instance(
            TypeUsage::entity(element),
            vec![
                Expression::property(binding.reference(), "Id").unwrap(),
                Expression::property(binding.reference(), "SupplierId").unwrap(),
            ],
        )
        .unwrap();
        let tree = Expression::project(binding, ctor).unwrap();

        let simplified = simplify_view(&catalog, entity_set, tree);
        let ctor = simplified
            .as_project()
            .unwrap()
            .projection
            .as_new_instance()
            .unwrap();
        assert_eq!(ctor.related_refs.len(), 1);
    }
}
