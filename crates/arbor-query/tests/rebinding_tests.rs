//! Rebinding and Validation Tests
//!
//! End-to-end checks for the catalog rebinding contract (identity, shape
//! preservation, structural sharing) and for scope validation.

use arbor_query::{
    rebind, validate, Catalog, DataSpace, EntitySet, EntityType, Error, ExprRef, Expression,
    ExpressionBinding, MappingCatalog, PrimitiveKind, TypeUsage,
};
use std::sync::Arc;

fn build_catalog(total_kind: PrimitiveKind) -> MappingCatalog {
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
            ("Total".to_string(), TypeUsage::primitive(total_kind)),
        ],
    });
    catalog.add_entity_set(EntitySet::new("Container", "Customers", customer));
    catalog
}

/// filter(scan(Customers) as c, c.Id = @id)
fn parameterized_filter(catalog: &MappingCatalog) -> ExprRef {
    let set = catalog.entity_set("Container", "Customers").unwrap().clone();
    let binding = ExpressionBinding::new("c", Expression::scan(set)).unwrap();
    let predicate = Expression::eq(
        Expression::property(binding.reference(), "Id").unwrap(),
        Expression::parameter("id", TypeUsage::int32()),
    )
    .unwrap();
    Expression::filter(binding, predicate).unwrap()
}

mod rebinding {
    use super::*;
    use arbor_query::DfsIter;

    #[test]
    fn test_rebind_is_identity_for_element_identical_catalogs() {
        let source = build_catalog(PrimitiveKind::Int32);
        let target = build_catalog(PrimitiveKind::Int32);
        let tree = parameterized_filter(&source);

        let rebound = rebind(&tree, &target).unwrap();

        // Pointer-identical at every subtree, not just the root
        let originals: Vec<&ExprRef> = DfsIter::new(&tree).collect();
        let rebounds: Vec<&ExprRef> = DfsIter::new(&rebound).collect();
        assert_eq!(originals.len(), rebounds.len());
        for (a, b) in originals.iter().zip(&rebounds) {
            assert!(Arc::ptr_eq(a, b));
        }
    }

    #[test]
    fn test_rebind_preserves_kind_arity_and_variables() {
        let source = build_catalog(PrimitiveKind::Int32);
        let target = build_catalog(PrimitiveKind::Int64);
        let set = source.entity_set("Container", "Customers").unwrap().clone();
        let binding = ExpressionBinding::new("c", Expression::scan(set)).unwrap();
        let projection = Expression::property(binding.reference(), "Total").unwrap();
        let tree = Expression::project(binding, projection).unwrap();

        let rebound = rebind(&tree, &target).unwrap();
        assert!(!Arc::ptr_eq(&rebound, &tree));

        let before: Vec<&'static str> = DfsIter::new(&tree).map(|e| e.kind_name()).collect();
        let after: Vec<&'static str> = DfsIter::new(&rebound).map(|e| e.kind_name()).collect();
        assert_eq!(before, after);

        let project = rebound.as_project().unwrap();
        assert_eq!(project.input.variable, "c");
        assert_eq!(
            project.projection.result_type(),
            &TypeUsage::primitive(PrimitiveKind::Int64)
        );
    }

    #[test]
    fn test_rebind_shares_unchanged_subtrees() {
        let source = build_catalog(PrimitiveKind::Int32);
        let target = build_catalog(PrimitiveKind::Int64);
        let set = source.entity_set("Container", "Customers").unwrap().clone();
        let binding = ExpressionBinding::new("c", Expression::scan(set)).unwrap();
        // The predicate touches only Id (identical in both catalogs); the
        // projection touches Total (which changes kind)
        let predicate = Expression::eq(
            Expression::property(binding.reference(), "Id").unwrap(),
            Expression::int32(1),
        )
        .unwrap();
        let filtered = Expression::filter(binding, predicate).unwrap();
        let outer = ExpressionBinding::new("c", filtered).unwrap();
        let projection = Expression::property(outer.reference(), "Total").unwrap();
        let tree = Expression::project(outer, projection).unwrap();

        let rebound = rebind(&tree, &target).unwrap();
        assert!(!Arc::ptr_eq(&rebound, &tree));

        // The entity type changed (Total: Int32 -> Int64), so the scan and
        // filter rebuild; but the untouched constant is shared by reference
        let original_constant =
            arbor_query::find(&tree, |e| matches!(e, Expression::Constant(_))).unwrap();
        let rebound_constant =
            arbor_query::find(&rebound, |e| matches!(e, Expression::Constant(_))).unwrap();
        assert!(Arc::ptr_eq(original_constant, rebound_constant));
    }

    #[test]
    fn test_rebind_missing_element_is_fatal_and_named() {
        let source = build_catalog(PrimitiveKind::Int32);
        let empty = MappingCatalog::new();
        let tree = parameterized_filter(&source);
        let err = rebind(&tree, &empty).unwrap_err();
        match err {
            Error::MetadataNotFound(name) => {
                assert!(name.contains("Customer"), "got: {}", name);
            }
            other => panic!("expected MetadataNotFound, got {other:?}"),
        }
    }
}

mod validation {
    use super::*;

    #[test]
    fn test_validate_yields_parameter_bindings() {
        let catalog = build_catalog(PrimitiveKind::Int32);
        let tree = parameterized_filter(&catalog);
        let parameters = validate(&tree, &catalog, DataSpace::Model).unwrap();
        assert_eq!(parameters.len(), 1);
        assert_eq!(parameters.get("id"), Some(&TypeUsage::int32()));
    }

    #[test]
    fn test_validate_rejects_exactly_the_out_of_scope_reference() {
        let catalog = build_catalog(PrimitiveKind::Int32);
        let set = catalog.entity_set("Container", "Customers").unwrap().clone();
        let binding = ExpressionBinding::new("c", Expression::scan(set)).unwrap();
        let stray = Expression::variable("nobody", TypeUsage::boolean());
        let tree = Expression::filter(binding, stray).unwrap();

        let err = validate(&tree, &catalog, DataSpace::Model).unwrap_err();
        assert!(matches!(err, Error::ReferenceInvalid(name) if name == "nobody"));
    }

    #[test]
    fn test_validate_rejects_wrong_space() {
        let catalog = build_catalog(PrimitiveKind::Int32);
        let tree = parameterized_filter(&catalog);
        let err = validate(&tree, &catalog, DataSpace::Store).unwrap_err();
        assert!(matches!(err, Error::SpaceViolation { .. }));
    }
}
