//! Metadata catalog: named types, functions, and entity/relationship sets.
//!
//! A [`Catalog`] is a queryable set of immutable descriptors. Expression
//! nodes embed descriptors by value (or via `Arc` to an immutable value),
//! never a back-reference into a mutable catalog, so a tree stays valid even
//! if the catalog it was built against goes away.
//!
//! The catalog is always passed explicitly to the rebinding and validation
//! entry points; there is no ambient/global workspace.

use crate::types::{DataSpace, EntityType, ComplexType, TypeUsage};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// A named set of entities within a container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySet {
    pub container: String,
    pub name: String,
    pub element_type: Arc<EntityType>,
}

impl EntitySet {
    pub fn new(
        container: impl Into<String>,
        name: impl Into<String>,
        element_type: Arc<EntityType>,
    ) -> Self {
        Self {
            container: container.into(),
            name: name.into(),
            element_type,
        }
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.container, self.name)
    }
}

/// How many entities may appear at a relationship end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Multiplicity {
    One,
    ZeroOrOne,
    Many,
}

/// One end of a relationship set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipEnd {
    pub role: String,
    /// Name of the entity set participating at this end
    pub entity_set: String,
    /// Element type of the participating entity set, embedded so that
    /// navigation nodes are self-contained
    pub element_type: Arc<EntityType>,
    pub multiplicity: Multiplicity,
}

/// A referential constraint: the dependent end's properties are a foreign
/// key into the principal end's key, pairwise by position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeyConstraint {
    pub principal_role: String,
    pub dependent_role: String,
    /// Principal key property names, ordered as declared by the constraint
    pub principal_key: Vec<String>,
    /// Dependent foreign-key property names, positionally paired with
    /// `principal_key`
    pub dependent_properties: Vec<String>,
}

/// A named relationship set between two entity sets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipSet {
    pub container: String,
    pub name: String,
    pub ends: Vec<RelationshipEnd>,
    pub constraint: Option<ForeignKeyConstraint>,
}

impl RelationshipSet {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.container, self.name)
    }

    /// Find an end by role name
    pub fn end(&self, role: &str) -> Option<&RelationshipEnd> {
        self.ends.iter().find(|end| end.role == role)
    }
}

/// An immutable function descriptor: resolved by namespace + name +
/// parameter types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSignature {
    pub namespace: String,
    pub name: String,
    pub parameters: Vec<TypeUsage>,
    pub return_type: TypeUsage,
    pub space: DataSpace,
}

impl FunctionSignature {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }
}

/// Abstract trait for metadata catalogs.
///
/// Lookups are by qualified name; a `None` return means the element does not
/// exist in this catalog (the caller decides whether that is fatal).
pub trait Catalog {
    /// Look up an entity set by container and name
    fn entity_set(&self, container: &str, name: &str) -> Option<&EntitySet>;

    /// All relationship sets in this catalog
    fn relationship_sets(&self) -> &[RelationshipSet];

    /// Look up a relationship set by container and name
    fn relationship_set(&self, container: &str, name: &str) -> Option<&RelationshipSet> {
        self.relationship_sets()
            .iter()
            .find(|set| set.container == container && set.name == name)
    }

    /// Look up a function by namespace, name, and exact parameter types
    fn function(
        &self,
        namespace: &str,
        name: &str,
        parameter_types: &[TypeUsage],
    ) -> Option<&FunctionSignature>;

    /// Look up a named entity type by namespace, name, and space
    fn find_entity_type(
        &self,
        namespace: &str,
        name: &str,
        space: DataSpace,
    ) -> Option<&Arc<EntityType>>;

    /// Look up a named complex type by namespace, name, and space
    fn find_complex_type(
        &self,
        namespace: &str,
        name: &str,
        space: DataSpace,
    ) -> Option<&Arc<ComplexType>>;
}

/// A HashMap-backed catalog implementation.
///
/// Descriptors are registered once through the `add_*` builder methods and
/// are immutable afterwards as far as any tree holding them is concerned.
#[derive(Debug, Default, Clone)]
pub struct MappingCatalog {
    entity_sets: HashMap<(String, String), EntitySet>,
    relationship_sets: Vec<RelationshipSet>,
    functions: Vec<FunctionSignature>,
    entity_types: HashMap<(String, String, DataSpace), Arc<EntityType>>,
    complex_types: HashMap<(String, String, DataSpace), Arc<ComplexType>>,
}

impl MappingCatalog {
    /// Create a new empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity type and return the shared descriptor
    pub fn add_entity_type(&mut self, entity: EntityType) -> Arc<EntityType> {
        let key = (entity.namespace.clone(), entity.name.clone(), entity.space);
        let shared = Arc::new(entity);
        self.entity_types.insert(key, shared.clone());
        shared
    }

    /// Register a complex type and return the shared descriptor
    pub fn add_complex_type(&mut self, complex: ComplexType) -> Arc<ComplexType> {
        let key = (complex.namespace.clone(), complex.name.clone(), complex.space);
        let shared = Arc::new(complex);
        self.complex_types.insert(key, shared.clone());
        shared
    }

    /// Register an entity set. The element type should already be registered
    /// so that type lookups resolve during rebinding.
    pub fn add_entity_set(&mut self, set: EntitySet) {
        self.entity_sets
            .insert((set.container.clone(), set.name.clone()), set);
    }

    /// Register a relationship set
    pub fn add_relationship_set(&mut self, set: RelationshipSet) {
        self.relationship_sets.push(set);
    }

    /// Register a function signature
    pub fn add_function(&mut self, function: FunctionSignature) {
        self.functions.push(function);
    }
}

impl Catalog for MappingCatalog {
    fn entity_set(&self, container: &str, name: &str) -> Option<&EntitySet> {
        self.entity_sets
            .get(&(container.to_string(), name.to_string()))
    }

    fn relationship_sets(&self) -> &[RelationshipSet] {
        &self.relationship_sets
    }

    fn function(
        &self,
        namespace: &str,
        name: &str,
        parameter_types: &[TypeUsage],
    ) -> Option<&FunctionSignature> {
        self.functions.iter().find(|function| {
            function.namespace == namespace
                && function.name == name
                && function.parameters == parameter_types
        })
    }

    fn find_entity_type(
        &self,
        namespace: &str,
        name: &str,
        space: DataSpace,
    ) -> Option<&Arc<EntityType>> {
        self.entity_types
            .get(&(namespace.to_string(), name.to_string(), space))
    }

    fn find_complex_type(
        &self,
        namespace: &str,
        name: &str,
        space: DataSpace,
    ) -> Option<&Arc<ComplexType>> {
        self.complex_types
            .get(&(namespace.to_string(), name.to_string(), space))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PrimitiveKind;

    fn sample_catalog() -> MappingCatalog {
        let mut catalog = MappingCatalog::new();
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
        catalog.add_entity_set(EntitySet::new("Container", "Orders", order));
        catalog.add_function(FunctionSignature {
            namespace: "Edm".to_string(),
            name: "Count".to_string(),
            parameters: vec![TypeUsage::int32()],
            return_type: TypeUsage::primitive(PrimitiveKind::Int64),
            space: DataSpace::Model,
        });
        catalog
    }

    #[test]
    fn test_entity_set_lookup() {
        let catalog = sample_catalog();
        assert!(catalog.entity_set("Container", "Orders").is_some());
        assert!(catalog.entity_set("Container", "Customers").is_none());
        assert!(catalog.entity_set("Other", "Orders").is_none());
    }

    #[test]
    fn test_function_lookup_requires_exact_parameter_types() {
        let catalog = sample_catalog();
        assert!(catalog
            .function("Edm", "Count", &[TypeUsage::int32()])
            .is_some());
        assert!(catalog
            .function("Edm", "Count", &[TypeUsage::string()])
            .is_none());
    }

    #[test]
    fn test_type_lookup_is_space_partitioned() {
        let catalog = sample_catalog();
        assert!(catalog
            .find_entity_type("Model", "Order", DataSpace::Model)
            .is_some());
        assert!(catalog
            .find_entity_type("Model", "Order", DataSpace::Store)
            .is_none());
    }
}
