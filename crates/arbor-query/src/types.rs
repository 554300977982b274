//! Type system for command trees.
//!
//! Every expression node carries a [`TypeUsage`] describing its result shape:
//! scalar (primitive), row/record, collection, reference, or entity/complex.
//! Type usages are immutable values computed at node construction; rebinding
//! rebuilds them recursively against a target catalog while retaining facet
//! values unchanged.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
#[cfg(feature = "bindings")]
use ts_rs::TS;

/// A catalog partition. Named types and sets belong to exactly one space;
/// a tree validated for one space may only reference elements of that space
/// (primitive types are space-agnostic).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "bindings", derive(TS))]
#[cfg_attr(feature = "bindings", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum DataSpace {
    /// The conceptual model space
    Model,
    /// The storage space
    Store,
}

impl fmt::Display for DataSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSpace::Model => write!(f, "Model"),
            DataSpace::Store => write!(f, "Store"),
        }
    }
}

/// The closed set of primitive type kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "bindings", derive(TS))]
#[cfg_attr(feature = "bindings", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveKind {
    Boolean,
    Int32,
    Int64,
    Double,
    Decimal,
    String,
    Binary,
    DateTime,
    Guid,
}

impl PrimitiveKind {
    /// Whether values of this kind support arithmetic
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            PrimitiveKind::Int32
                | PrimitiveKind::Int64
                | PrimitiveKind::Double
                | PrimitiveKind::Decimal
        )
    }

    /// Whether values of this kind have a total order usable in comparisons
    pub fn is_ordered(&self) -> bool {
        !matches!(self, PrimitiveKind::Binary | PrimitiveKind::Guid)
    }
}

/// Facet values attached to a type usage. Rebinding copies facets verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Facets {
    /// Whether the value may be null
    pub nullable: bool,
    /// Maximum length for string/binary types
    pub max_length: Option<u32>,
    /// Precision for decimal/datetime types
    pub precision: Option<u8>,
    /// Scale for decimal types
    pub scale: Option<u8>,
}

impl Default for Facets {
    fn default() -> Self {
        Self {
            nullable: true,
            max_length: None,
            precision: None,
            scale: None,
        }
    }
}

/// A structural row (record) type: an ordered list of named fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowType {
    pub fields: Vec<(String, TypeUsage)>,
}

impl RowType {
    pub fn new(fields: Vec<(String, TypeUsage)>) -> Self {
        Self { fields }
    }

    /// Find a field type by name
    pub fn field_type(&self, name: &str) -> Option<&TypeUsage> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, usage)| usage)
    }
}

/// A named entity type: keyed, space-bound, with ordered properties.
///
/// Entity constructors take one argument per property, in property order.
/// The property list is flattened: a derived type re-declares its base
/// properties, and `base_type` records only the subtype relation used for
/// result-type unification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityType {
    pub namespace: String,
    pub name: String,
    pub space: DataSpace,
    /// The direct base type, for single-table-per-hierarchy subtyping
    pub base_type: Option<Arc<EntityType>>,
    /// Names of the key properties, in key order
    pub key_members: Vec<String>,
    /// Ordered property list
    pub properties: Vec<(String, TypeUsage)>,
}

impl EntityType {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }

    pub fn property_type(&self, name: &str) -> Option<&TypeUsage> {
        self.properties
            .iter()
            .find(|(prop, _)| prop == name)
            .map(|(_, usage)| usage)
    }

    /// Position of a property in the ordered property list
    pub fn property_index(&self, name: &str) -> Option<usize> {
        self.properties.iter().position(|(prop, _)| prop == name)
    }

    /// Whether this type equals `other` or derives from it
    pub fn is_same_or_derived_from(&self, other: &EntityType) -> bool {
        let mut current = Some(self);
        while let Some(entity) = current {
            if entity == other {
                return true;
            }
            current = entity.base_type.as_deref();
        }
        false
    }

    /// The closest type that both `self` and `other` derive from (or are)
    pub fn common_base<'a>(&'a self, other: &EntityType) -> Option<&'a EntityType> {
        let mut current = Some(self);
        while let Some(entity) = current {
            if other.is_same_or_derived_from(entity) {
                return Some(entity);
            }
            current = entity.base_type.as_deref();
        }
        None
    }
}

/// A named complex (non-keyed, non-set) structured type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexType {
    pub namespace: String,
    pub name: String,
    pub space: DataSpace,
    pub properties: Vec<(String, TypeUsage)>,
}

impl ComplexType {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }

    pub fn property_type(&self, name: &str) -> Option<&TypeUsage> {
        self.properties
            .iter()
            .find(|(prop, _)| prop == name)
            .map(|(_, usage)| usage)
    }
}

/// The shape of a type usage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Primitive(PrimitiveKind),
    Row(RowType),
    Collection(Box<TypeUsage>),
    /// A reference to an entity, resolvable without loading the entity row
    Ref(Arc<EntityType>),
    Entity(Arc<EntityType>),
    Complex(Arc<ComplexType>),
}

/// A type together with its facets. The result type of every expression node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeUsage {
    pub data_type: DataType,
    pub facets: Facets,
}

impl TypeUsage {
    /// A primitive type usage with default facets
    pub fn primitive(kind: PrimitiveKind) -> Self {
        Self {
            data_type: DataType::Primitive(kind),
            facets: Facets::default(),
        }
    }

    /// The boolean type usage
    pub fn boolean() -> Self {
        Self::primitive(PrimitiveKind::Boolean)
    }

    /// The 32-bit integer type usage
    pub fn int32() -> Self {
        Self::primitive(PrimitiveKind::Int32)
    }

    /// The string type usage
    pub fn string() -> Self {
        Self::primitive(PrimitiveKind::String)
    }

    /// A collection of the given element type
    pub fn collection(element: TypeUsage) -> Self {
        Self {
            data_type: DataType::Collection(Box::new(element)),
            facets: Facets::default(),
        }
    }

    /// A row type usage from an ordered field list
    pub fn row(fields: Vec<(String, TypeUsage)>) -> Self {
        Self {
            data_type: DataType::Row(RowType::new(fields)),
            facets: Facets::default(),
        }
    }

    /// An entity type usage
    pub fn entity(entity: Arc<EntityType>) -> Self {
        Self {
            data_type: DataType::Entity(entity),
            facets: Facets::default(),
        }
    }

    /// A complex type usage
    pub fn complex(complex: Arc<ComplexType>) -> Self {
        Self {
            data_type: DataType::Complex(complex),
            facets: Facets::default(),
        }
    }

    /// A reference type usage for the given entity type
    pub fn reference(entity: Arc<EntityType>) -> Self {
        Self {
            data_type: DataType::Ref(entity),
            facets: Facets::default(),
        }
    }

    /// Replace the facets, keeping the data type
    pub fn with_facets(mut self, facets: Facets) -> Self {
        self.facets = facets;
        self
    }

    /// Check if this is the boolean primitive type
    pub fn is_boolean(&self) -> bool {
        matches!(self.data_type, DataType::Primitive(PrimitiveKind::Boolean))
    }

    /// Check if this is a collection type
    pub fn is_collection(&self) -> bool {
        matches!(self.data_type, DataType::Collection(_))
    }

    /// Get the primitive kind, if this is a primitive type
    pub fn as_primitive(&self) -> Option<PrimitiveKind> {
        match self.data_type {
            DataType::Primitive(kind) => Some(kind),
            _ => None,
        }
    }

    /// Get the element type, if this is a collection type
    pub fn element_type(&self) -> Option<&TypeUsage> {
        match &self.data_type {
            DataType::Collection(element) => Some(element),
            _ => None,
        }
    }

    /// Get the entity type, if this is an entity or reference type
    pub fn as_entity(&self) -> Option<&Arc<EntityType>> {
        match &self.data_type {
            DataType::Entity(entity) | DataType::Ref(entity) => Some(entity),
            _ => None,
        }
    }

    /// Resolve a named member against this type (row field or
    /// entity/complex property)
    pub fn member_type(&self, name: &str) -> Option<&TypeUsage> {
        match &self.data_type {
            DataType::Row(row) => row.field_type(name),
            DataType::Entity(entity) => entity.property_type(name),
            DataType::Complex(complex) => complex.property_type(name),
            _ => None,
        }
    }

    /// A display name for errors and diagnostics
    pub fn describe(&self) -> String {
        match &self.data_type {
            DataType::Primitive(kind) => format!("{:?}", kind),
            DataType::Row(row) => format!("Row({} fields)", row.fields.len()),
            DataType::Collection(element) => format!("Collection({})", element.describe()),
            DataType::Ref(entity) => format!("Ref({})", entity.qualified_name()),
            DataType::Entity(entity) => entity.qualified_name(),
            DataType::Complex(complex) => complex.qualified_name(),
        }
    }

    /// The space of the outermost named type in this usage, if any.
    /// Primitive types have no space; rows and collections recurse.
    pub fn named_space(&self) -> Option<DataSpace> {
        match &self.data_type {
            DataType::Primitive(_) => None,
            DataType::Row(row) => row
                .fields
                .iter()
                .find_map(|(_, usage)| usage.named_space()),
            DataType::Collection(element) => element.named_space(),
            DataType::Ref(entity) | DataType::Entity(entity) => Some(entity.space),
            DataType::Complex(complex) => Some(complex.space),
        }
    }
}

impl fmt::Display for TypeUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.describe())
    }
}

/// A constant scalar value carried by a constant expression node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarValue {
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Double(f64),
    String(String),
}

impl ScalarValue {
    /// The primitive kind of this value
    pub fn kind(&self) -> PrimitiveKind {
        match self {
            ScalarValue::Boolean(_) => PrimitiveKind::Boolean,
            ScalarValue::Int32(_) => PrimitiveKind::Int32,
            ScalarValue::Int64(_) => PrimitiveKind::Int64,
            ScalarValue::Double(_) => PrimitiveKind::Double,
            ScalarValue::String(_) => PrimitiveKind::String,
        }
    }

    /// Convert this value to the target primitive kind using the kind's
    /// native conversion. Returns `None` when the conversion is lossy or
    /// unsupported; used to coerce cast literals in pattern matching.
    pub fn coerce_to(&self, target: PrimitiveKind) -> Option<ScalarValue> {
        if self.kind() == target {
            return Some(self.clone());
        }
        match (self, target) {
            (ScalarValue::Int32(v), PrimitiveKind::Int64) => Some(ScalarValue::Int64(*v as i64)),
            (ScalarValue::Int32(v), PrimitiveKind::Double) => Some(ScalarValue::Double(*v as f64)),
            (ScalarValue::Int64(v), PrimitiveKind::Int32) => {
                i32::try_from(*v).ok().map(ScalarValue::Int32)
            }
            (ScalarValue::Int64(v), PrimitiveKind::Double) => Some(ScalarValue::Double(*v as f64)),
            (ScalarValue::Double(v), PrimitiveKind::Int32) => {
                if v.fract() == 0.0 && *v >= i32::MIN as f64 && *v <= i32::MAX as f64 {
                    Some(ScalarValue::Int32(*v as i32))
                } else {
                    None
                }
            }
            (ScalarValue::String(v), PrimitiveKind::Int32) => {
                v.parse::<i32>().ok().map(ScalarValue::Int32)
            }
            (ScalarValue::String(v), PrimitiveKind::Int64) => {
                v.parse::<i64>().ok().map(ScalarValue::Int64)
            }
            _ => None,
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Boolean(v) => write!(f, "{}", v),
            ScalarValue::Int32(v) => write!(f, "{}", v),
            ScalarValue::Int64(v) => write!(f, "{}", v),
            ScalarValue::Double(v) => write!(f, "{}", v),
            ScalarValue::String(v) => write!(f, "'{}'", v),
        }
    }
}
