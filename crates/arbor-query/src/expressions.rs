//! Command-tree expression AST.
//!
//! This module defines the closed set of node kinds forming the tree grammar
//! of relational query/update commands, plus the validating constructors that
//! build them.
//!
//! # Architecture
//!
//! The central type is [`Expression`], a tagged enum with one variant per
//! node kind. Inner structs carry the fields for each variant; non-trivial
//! payloads are boxed to keep the enum small. Tree edges are [`ExprRef`]
//! (`Arc<Expression>`): nodes are immutable after construction and unchanged
//! subtrees are shared by reference across rewrites, so `Arc::ptr_eq` is a
//! meaningful identity test.
//!
//! # Variant Groups
//!
//! | Group | Examples | Purpose |
//! |---|---|---|
//! | **Leaves** | `Constant`, `Null`, `VariableRef`, `ParameterRef`, `Scan` | Values and references |
//! | **Member access** | `Property`, `Deref`, `EntityRef`, `RefKey` | Instance and reference navigation |
//! | **Operators** | `Not`, `Comparison`, `Arithmetic`, `And`, `Or`, `Like` | Scalar computation |
//! | **Control** | `Case` | Conditional branches |
//! | **Construction** | `NewInstance`, `Ref`, `RelationshipNav` | Records, entities, references |
//! | **Relational** | `Filter`, `Project`, `Join`, `GroupBy`, `Sort`, `Limit` | Set-valued operations |
//!
//! # Invariants
//!
//! Every node carries a result type computed at construction and never
//! mutated afterwards. Constructors validate arity and the kind-specific
//! result-type rules of their children (a filter's result type equals its
//! input's, case branches share one result type, and so on) and fail with
//! [`Error::Structural`](crate::error::Error) when violated.

use crate::error::{Error, Result};
use crate::metadata::{EntitySet, FunctionSignature, Multiplicity, RelationshipSet};
use crate::types::{DataType, ScalarValue, TypeUsage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
#[cfg(feature = "bindings")]
use ts_rs::TS;

/// Shared handle to an immutable expression node.
///
/// Cloning is cheap and rewrites that leave a subtree untouched return the
/// same handle, so callers may rely on `Arc::ptr_eq` to detect change.
pub type ExprRef = Arc<Expression>;

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "bindings", derive(TS))]
#[cfg_attr(feature = "bindings", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOp {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
}

/// Arithmetic operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "bindings", derive(TS))]
#[cfg_attr(feature = "bindings", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// Join flavors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    Inner,
    LeftOuter,
    FullOuter,
}

/// Apply flavors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyKind {
    Cross,
    Outer,
}

/// Quantifier flavors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantifierKind {
    Any,
    All,
}

/// Pairs a variable name with the collection that produces it.
///
/// The binding establishes a named scope entry visible to descendant nodes
/// referencing the variable by name; the variable's established type is the
/// element type of the bound collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionBinding {
    pub variable: String,
    pub expression: ExprRef,
    pub variable_type: TypeUsage,
}

impl ExpressionBinding {
    /// Bind a variable over a collection-typed expression
    pub fn new(variable: impl Into<String>, expression: ExprRef) -> Result<Self> {
        let variable = variable.into();
        let variable_type = expression
            .result_type()
            .element_type()
            .cloned()
            .ok_or_else(|| {
                Error::structural(format!(
                    "binding '{}' requires a collection input, got {}",
                    variable,
                    expression.result_type().describe()
                ))
            })?;
        Ok(Self {
            variable,
            expression,
            variable_type,
        })
    }

    /// A variable-reference node for this binding's variable
    pub fn reference(&self) -> ExprRef {
        Expression::variable(self.variable.clone(), self.variable_type.clone())
    }
}

/// A binding that additionally exposes a group variable for aggregate
/// contexts; the group variable ranges over the collection of rows sharing
/// one key value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupBinding {
    pub variable: String,
    pub group_variable: String,
    pub expression: ExprRef,
    pub variable_type: TypeUsage,
    pub group_variable_type: TypeUsage,
}

impl GroupBinding {
    pub fn new(
        variable: impl Into<String>,
        group_variable: impl Into<String>,
        expression: ExprRef,
    ) -> Result<Self> {
        let variable = variable.into();
        let group_variable = group_variable.into();
        let variable_type = expression
            .result_type()
            .element_type()
            .cloned()
            .ok_or_else(|| {
                Error::structural(format!(
                    "group binding '{}' requires a collection input, got {}",
                    variable,
                    expression.result_type().describe()
                ))
            })?;
        let group_variable_type = TypeUsage::collection(variable_type.clone());
        Ok(Self {
            variable,
            group_variable,
            expression,
            variable_type,
            group_variable_type,
        })
    }
}

// --- Payload structs -------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constant {
    pub value: ScalarValue,
    pub result_type: TypeUsage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NullLiteral {
    pub result_type: TypeUsage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableRef {
    pub name: String,
    pub result_type: TypeUsage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterRef {
    pub name: String,
    pub result_type: TypeUsage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub instance: ExprRef,
    pub name: String,
    pub result_type: TypeUsage,
}

/// Payload shared by the single-operand kinds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unary {
    pub operand: ExprRef,
    pub result_type: TypeUsage,
}

/// Payload for `Cast` and `Treat`: the result type is the target type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Retyping {
    pub operand: ExprRef,
    pub result_type: TypeUsage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub op: ComparisonOp,
    pub left: ExprRef,
    pub right: ExprRef,
    pub result_type: TypeUsage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arithmetic {
    pub op: ArithmeticOp,
    pub left: ExprRef,
    pub right: ExprRef,
    pub result_type: TypeUsage,
}

/// Payload shared by `And`/`Or` and the set operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binary {
    pub left: ExprRef,
    pub right: ExprRef,
    pub result_type: TypeUsage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LikeExpr {
    pub input: ExprRef,
    pub pattern: ExprRef,
    pub escape: Option<ExprRef>,
    pub result_type: TypeUsage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseWhen {
    pub when: ExprRef,
    pub then: ExprRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    pub whens: Vec<CaseWhen>,
    pub else_expr: ExprRef,
    pub result_type: TypeUsage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub function: FunctionSignature,
    pub arguments: Vec<ExprRef>,
    pub result_type: TypeUsage,
}

/// A lambda application: formal parameters, a body, and the argument
/// expressions the body is applied to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lambda {
    pub parameters: Vec<(String, TypeUsage)>,
    pub body: ExprRef,
    pub arguments: Vec<ExprRef>,
    pub result_type: TypeUsage,
}

/// A related-entity reference attached to an entity constructor: the
/// principal entity at `target_role` of `relationship` is reachable from the
/// constructed row's own foreign-key values, without a separate lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedEntityRef {
    pub relationship: String,
    pub target_role: String,
    pub reference: ExprRef,
}

/// Record, entity, or complex-value construction. Arguments are positional,
/// one per member of the result type, in member order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewInstance {
    pub arguments: Vec<ExprRef>,
    pub related_refs: Vec<RelatedEntityRef>,
    pub result_type: TypeUsage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipNav {
    pub relationship: RelationshipSet,
    pub from_role: String,
    pub to_role: String,
    pub source: ExprRef,
    pub result_type: TypeUsage,
}

/// A strongly typed entity reference built from explicit key values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefExpr {
    pub entity_set: EntitySet,
    pub key_values: Vec<ExprRef>,
    pub result_type: TypeUsage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scan {
    pub entity_set: EntitySet,
    pub result_type: TypeUsage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub input: ExpressionBinding,
    pub predicate: ExprRef,
    pub result_type: TypeUsage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub input: ExpressionBinding,
    pub projection: ExprRef,
    pub result_type: TypeUsage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossJoin {
    pub inputs: Vec<ExpressionBinding>,
    pub result_type: TypeUsage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Join {
    pub kind: JoinKind,
    pub left: ExpressionBinding,
    pub right: ExpressionBinding,
    pub condition: ExprRef,
    pub result_type: TypeUsage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Apply {
    pub kind: ApplyKind,
    pub input: ExpressionBinding,
    pub apply: ExpressionBinding,
    pub result_type: TypeUsage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub function: FunctionSignature,
    pub argument: ExprRef,
    pub distinct: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupBy {
    pub input: GroupBinding,
    pub keys: Vec<(String, ExprRef)>,
    pub aggregates: Vec<(String, Aggregate)>,
    pub result_type: TypeUsage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortKey {
    pub expression: ExprRef,
    pub ascending: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sort {
    pub input: ExpressionBinding,
    pub keys: Vec<SortKey>,
    pub result_type: TypeUsage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skip {
    pub input: ExpressionBinding,
    pub keys: Vec<SortKey>,
    pub count: ExprRef,
    pub result_type: TypeUsage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Limit {
    pub input: ExprRef,
    pub count: ExprRef,
    pub result_type: TypeUsage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quantifier {
    pub kind: QuantifierKind,
    pub input: ExpressionBinding,
    pub predicate: ExprRef,
    pub result_type: TypeUsage,
}

// --- The node enum ---------------------------------------------------------

/// An immutable, typed command-tree node.
///
/// Construct nodes through the validating constructors on `impl Expression`;
/// they compute the result type from the children and reject structurally
/// invalid combinations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expression {
    // Leaves
    Constant(Constant),
    Null(NullLiteral),
    VariableRef(VariableRef),
    ParameterRef(ParameterRef),
    Scan(Box<Scan>),

    // Member access
    Property(Box<Property>),
    Deref(Box<Unary>),
    EntityRef(Box<Unary>),
    RefKey(Box<Unary>),

    // Unary operators
    Not(Box<Unary>),
    IsNull(Box<Unary>),
    IsEmpty(Box<Unary>),
    Distinct(Box<Unary>),
    Element(Box<Unary>),
    Treat(Box<Retyping>),
    Cast(Box<Retyping>),

    // Binary operators
    Comparison(Box<Comparison>),
    Arithmetic(Box<Arithmetic>),
    And(Box<Binary>),
    Or(Box<Binary>),
    UnionAll(Box<Binary>),
    Intersect(Box<Binary>),
    Except(Box<Binary>),
    Like(Box<LikeExpr>),

    // Control
    Case(Box<Case>),

    // Invocation
    FunctionCall(Box<FunctionCall>),
    Lambda(Box<Lambda>),

    // Construction
    NewInstance(Box<NewInstance>),
    RelationshipNav(Box<RelationshipNav>),
    Ref(Box<RefExpr>),

    // Relational
    Filter(Box<Filter>),
    Project(Box<Project>),
    CrossJoin(Box<CrossJoin>),
    Join(Box<Join>),
    Apply(Box<Apply>),
    GroupBy(Box<GroupBy>),
    Sort(Box<Sort>),
    Skip(Box<Skip>),
    Limit(Box<Limit>),
    Quantifier(Box<Quantifier>),
}

impl Expression {
    /// The result type of this node, computed at construction
    pub fn result_type(&self) -> &TypeUsage {
        match self {
            Expression::Constant(e) => &e.result_type,
            Expression::Null(e) => &e.result_type,
            Expression::VariableRef(e) => &e.result_type,
            Expression::ParameterRef(e) => &e.result_type,
            Expression::Scan(e) => &e.result_type,
            Expression::Property(e) => &e.result_type,
            Expression::Deref(e) => &e.result_type,
            Expression::EntityRef(e) => &e.result_type,
            Expression::RefKey(e) => &e.result_type,
            Expression::Not(e) => &e.result_type,
            Expression::IsNull(e) => &e.result_type,
            Expression::IsEmpty(e) => &e.result_type,
            Expression::Distinct(e) => &e.result_type,
            Expression::Element(e) => &e.result_type,
            Expression::Treat(e) => &e.result_type,
            Expression::Cast(e) => &e.result_type,
            Expression::Comparison(e) => &e.result_type,
            Expression::Arithmetic(e) => &e.result_type,
            Expression::And(e) => &e.result_type,
            Expression::Or(e) => &e.result_type,
            Expression::UnionAll(e) => &e.result_type,
            Expression::Intersect(e) => &e.result_type,
            Expression::Except(e) => &e.result_type,
            Expression::Like(e) => &e.result_type,
            Expression::Case(e) => &e.result_type,
            Expression::FunctionCall(e) => &e.result_type,
            Expression::Lambda(e) => &e.result_type,
            Expression::NewInstance(e) => &e.result_type,
            Expression::RelationshipNav(e) => &e.result_type,
            Expression::Ref(e) => &e.result_type,
            Expression::Filter(e) => &e.result_type,
            Expression::Project(e) => &e.result_type,
            Expression::CrossJoin(e) => &e.result_type,
            Expression::Join(e) => &e.result_type,
            Expression::Apply(e) => &e.result_type,
            Expression::GroupBy(e) => &e.result_type,
            Expression::Sort(e) => &e.result_type,
            Expression::Skip(e) => &e.result_type,
            Expression::Limit(e) => &e.result_type,
            Expression::Quantifier(e) => &e.result_type,
        }
    }

    /// Static name of this node's kind, used by diagnostics and the dump
    /// driver
    pub fn kind_name(&self) -> &'static str {
        match self {
            Expression::Constant(_) => "Constant",
            Expression::Null(_) => "Null",
            Expression::VariableRef(_) => "VariableRef",
            Expression::ParameterRef(_) => "ParameterRef",
            Expression::Scan(_) => "Scan",
            Expression::Property(_) => "Property",
            Expression::Deref(_) => "Deref",
            Expression::EntityRef(_) => "EntityRef",
            Expression::RefKey(_) => "RefKey",
            Expression::Not(_) => "Not",
            Expression::IsNull(_) => "IsNull",
            Expression::IsEmpty(_) => "IsEmpty",
            Expression::Distinct(_) => "Distinct",
            Expression::Element(_) => "Element",
            Expression::Treat(_) => "Treat",
            Expression::Cast(_) => "Cast",
            Expression::Comparison(_) => "Comparison",
            Expression::Arithmetic(_) => "Arithmetic",
            Expression::And(_) => "And",
            Expression::Or(_) => "Or",
            Expression::UnionAll(_) => "UnionAll",
            Expression::Intersect(_) => "Intersect",
            Expression::Except(_) => "Except",
            Expression::Like(_) => "Like",
            Expression::Case(_) => "Case",
            Expression::FunctionCall(_) => "FunctionCall",
            Expression::Lambda(_) => "Lambda",
            Expression::NewInstance(_) => "NewInstance",
            Expression::RelationshipNav(_) => "RelationshipNav",
            Expression::Ref(_) => "Ref",
            Expression::Filter(_) => "Filter",
            Expression::Project(_) => "Project",
            Expression::CrossJoin(_) => "CrossJoin",
            Expression::Join(_) => "Join",
            Expression::Apply(_) => "Apply",
            Expression::GroupBy(_) => "GroupBy",
            Expression::Sort(_) => "Sort",
            Expression::Skip(_) => "Skip",
            Expression::Limit(_) => "Limit",
            Expression::Quantifier(_) => "Quantifier",
        }
    }

    // --- Leaf constructors -------------------------------------------------

    /// A constant scalar; the result type follows the value's kind
    pub fn constant(value: ScalarValue) -> ExprRef {
        let result_type = TypeUsage::primitive(value.kind());
        Arc::new(Expression::Constant(Constant { value, result_type }))
    }

    /// A boolean constant
    pub fn boolean(value: bool) -> ExprRef {
        Self::constant(ScalarValue::Boolean(value))
    }

    /// A 32-bit integer constant
    pub fn int32(value: i32) -> ExprRef {
        Self::constant(ScalarValue::Int32(value))
    }

    /// A string constant
    pub fn string(value: impl Into<String>) -> ExprRef {
        Self::constant(ScalarValue::String(value.into()))
    }

    /// A typed null
    pub fn null(of: TypeUsage) -> ExprRef {
        Arc::new(Expression::Null(NullLiteral { result_type: of }))
    }

    /// A reference to a variable established by an enclosing binding
    pub fn variable(name: impl Into<String>, result_type: TypeUsage) -> ExprRef {
        Arc::new(Expression::VariableRef(VariableRef {
            name: name.into(),
            result_type,
        }))
    }

    /// A reference to an externally supplied parameter
    pub fn parameter(name: impl Into<String>, result_type: TypeUsage) -> ExprRef {
        Arc::new(Expression::ParameterRef(ParameterRef {
            name: name.into(),
            result_type,
        }))
    }

    /// Scan over the extent of an entity set
    pub fn scan(entity_set: EntitySet) -> ExprRef {
        let result_type =
            TypeUsage::collection(TypeUsage::entity(entity_set.element_type.clone()));
        Arc::new(Expression::Scan(Box::new(Scan {
            entity_set,
            result_type,
        })))
    }

    // --- Member access -----------------------------------------------------

    /// Access a named member of a row, entity, or complex instance
    pub fn property(instance: ExprRef, name: impl Into<String>) -> Result<ExprRef> {
        let name = name.into();
        let result_type = instance
            .result_type()
            .member_type(&name)
            .cloned()
            .ok_or_else(|| {
                Error::structural(format!(
                    "type {} has no member '{}'",
                    instance.result_type().describe(),
                    name
                ))
            })?;
        Ok(Arc::new(Expression::Property(Box::new(Property {
            instance,
            name,
            result_type,
        }))))
    }

    /// Dereference an entity reference, yielding the entity instance
    pub fn deref(operand: ExprRef) -> Result<ExprRef> {
        let entity = match &operand.result_type().data_type {
            DataType::Ref(entity) => entity.clone(),
            other => {
                return Err(Error::structural(format!(
                    "deref requires a reference operand, got {:?}",
                    other
                )))
            }
        };
        let result_type = TypeUsage::entity(entity);
        Ok(Arc::new(Expression::Deref(Box::new(Unary {
            operand,
            result_type,
        }))))
    }

    /// Extract a reference from an entity instance
    pub fn entity_ref(operand: ExprRef) -> Result<ExprRef> {
        let entity = match &operand.result_type().data_type {
            DataType::Entity(entity) => entity.clone(),
            other => {
                return Err(Error::structural(format!(
                    "entity_ref requires an entity operand, got {:?}",
                    other
                )))
            }
        };
        let result_type = TypeUsage::reference(entity);
        Ok(Arc::new(Expression::EntityRef(Box::new(Unary {
            operand,
            result_type,
        }))))
    }

    /// Extract the key row from an entity reference
    pub fn ref_key(operand: ExprRef) -> Result<ExprRef> {
        let entity = match &operand.result_type().data_type {
            DataType::Ref(entity) => entity.clone(),
            other => {
                return Err(Error::structural(format!(
                    "ref_key requires a reference operand, got {:?}",
                    other
                )))
            }
        };
        let mut fields = Vec::with_capacity(entity.key_members.len());
        for member in &entity.key_members {
            let usage = entity.property_type(member).cloned().ok_or_else(|| {
                Error::structural(format!(
                    "key member '{}' is not a property of {}",
                    member,
                    entity.qualified_name()
                ))
            })?;
            fields.push((member.clone(), usage));
        }
        let result_type = TypeUsage::row(fields);
        Ok(Arc::new(Expression::RefKey(Box::new(Unary {
            operand,
            result_type,
        }))))
    }

    // --- Unary operators ---------------------------------------------------

    /// Logical negation
    pub fn not(operand: ExprRef) -> Result<ExprRef> {
        if !operand.result_type().is_boolean() {
            return Err(Error::structural(format!(
                "not requires a boolean operand, got {}",
                operand.result_type().describe()
            )));
        }
        let result_type = TypeUsage::boolean();
        Ok(Arc::new(Expression::Not(Box::new(Unary {
            operand,
            result_type,
        }))))
    }

    /// Null test
    pub fn is_null(operand: ExprRef) -> Result<ExprRef> {
        if operand.result_type().is_collection() {
            return Err(Error::structural(
                "is_null does not accept a collection operand",
            ));
        }
        Ok(Arc::new(Expression::IsNull(Box::new(Unary {
            operand,
            result_type: TypeUsage::boolean(),
        }))))
    }

    /// Emptiness test over a collection
    pub fn is_empty(operand: ExprRef) -> Result<ExprRef> {
        if !operand.result_type().is_collection() {
            return Err(Error::structural(format!(
                "is_empty requires a collection operand, got {}",
                operand.result_type().describe()
            )));
        }
        Ok(Arc::new(Expression::IsEmpty(Box::new(Unary {
            operand,
            result_type: TypeUsage::boolean(),
        }))))
    }

    /// Duplicate elimination over a collection
    pub fn distinct(operand: ExprRef) -> Result<ExprRef> {
        if !operand.result_type().is_collection() {
            return Err(Error::structural(format!(
                "distinct requires a collection operand, got {}",
                operand.result_type().describe()
            )));
        }
        let result_type = operand.result_type().clone();
        Ok(Arc::new(Expression::Distinct(Box::new(Unary {
            operand,
            result_type,
        }))))
    }

    /// Extract the single element of a singleton collection
    pub fn element(operand: ExprRef) -> Result<ExprRef> {
        let result_type = operand
            .result_type()
            .element_type()
            .cloned()
            .ok_or_else(|| {
                Error::structural(format!(
                    "element requires a collection operand, got {}",
                    operand.result_type().describe()
                ))
            })?;
        Ok(Arc::new(Expression::Element(Box::new(Unary {
            operand,
            result_type,
        }))))
    }

    /// Down-cast an entity instance to a derived entity type
    pub fn treat(operand: ExprRef, target: TypeUsage) -> Result<ExprRef> {
        let operand_is_entity = matches!(operand.result_type().data_type, DataType::Entity(_));
        let target_is_entity = matches!(target.data_type, DataType::Entity(_));
        if !operand_is_entity || !target_is_entity {
            return Err(Error::structural(
                "treat requires an entity operand and an entity target type",
            ));
        }
        Ok(Arc::new(Expression::Treat(Box::new(Retyping {
            operand,
            result_type: target,
        }))))
    }

    /// Convert a primitive value to another primitive type
    pub fn cast(operand: ExprRef, target: TypeUsage) -> Result<ExprRef> {
        if operand.result_type().as_primitive().is_none() || target.as_primitive().is_none() {
            return Err(Error::structural(
                "cast requires primitive operand and target types",
            ));
        }
        Ok(Arc::new(Expression::Cast(Box::new(Retyping {
            operand,
            result_type: target,
        }))))
    }

    // --- Binary operators --------------------------------------------------

    /// Comparison between two equal-typed operands
    pub fn comparison(op: ComparisonOp, left: ExprRef, right: ExprRef) -> Result<ExprRef> {
        if left.result_type().data_type != right.result_type().data_type {
            return Err(Error::structural(format!(
                "comparison operands must have equal types: {} vs {}",
                left.result_type().describe(),
                right.result_type().describe()
            )));
        }
        match op {
            ComparisonOp::Eq | ComparisonOp::Neq => {
                let comparable = left.result_type().as_primitive().is_some()
                    || matches!(left.result_type().data_type, DataType::Ref(_));
                if !comparable {
                    return Err(Error::structural(format!(
                        "equality is not defined for {}",
                        left.result_type().describe()
                    )));
                }
            }
            _ => {
                let ordered = left
                    .result_type()
                    .as_primitive()
                    .map(|kind| kind.is_ordered())
                    .unwrap_or(false);
                if !ordered {
                    return Err(Error::structural(format!(
                        "ordering comparison is not defined for {}",
                        left.result_type().describe()
                    )));
                }
            }
        }
        Ok(Arc::new(Expression::Comparison(Box::new(Comparison {
            op,
            left,
            right,
            result_type: TypeUsage::boolean(),
        }))))
    }

    /// Equality comparison
    pub fn eq(left: ExprRef, right: ExprRef) -> Result<ExprRef> {
        Self::comparison(ComparisonOp::Eq, left, right)
    }

    /// Arithmetic between two equal-typed numeric operands
    pub fn arithmetic(op: ArithmeticOp, left: ExprRef, right: ExprRef) -> Result<ExprRef> {
        let kind = left.result_type().as_primitive().filter(|k| k.is_numeric());
        if kind.is_none() || left.result_type().data_type != right.result_type().data_type {
            return Err(Error::structural(format!(
                "arithmetic requires equal numeric operand types: {} vs {}",
                left.result_type().describe(),
                right.result_type().describe()
            )));
        }
        let result_type = left.result_type().clone();
        Ok(Arc::new(Expression::Arithmetic(Box::new(Arithmetic {
            op,
            left,
            right,
            result_type,
        }))))
    }

    /// Logical conjunction
    pub fn and(left: ExprRef, right: ExprRef) -> Result<ExprRef> {
        if !left.result_type().is_boolean() || !right.result_type().is_boolean() {
            return Err(Error::structural("and requires boolean operands"));
        }
        Ok(Arc::new(Expression::And(Box::new(Binary {
            left,
            right,
            result_type: TypeUsage::boolean(),
        }))))
    }

    /// Logical disjunction
    pub fn or(left: ExprRef, right: ExprRef) -> Result<ExprRef> {
        if !left.result_type().is_boolean() || !right.result_type().is_boolean() {
            return Err(Error::structural("or requires boolean operands"));
        }
        Ok(Arc::new(Expression::Or(Box::new(Binary {
            left,
            right,
            result_type: TypeUsage::boolean(),
        }))))
    }

    fn set_operation(
        build: fn(Box<Binary>) -> Expression,
        name: &str,
        left: ExprRef,
        right: ExprRef,
    ) -> Result<ExprRef> {
        if !left.result_type().is_collection()
            || left.result_type().data_type != right.result_type().data_type
        {
            return Err(Error::structural(format!(
                "{} requires equal collection input types: {} vs {}",
                name,
                left.result_type().describe(),
                right.result_type().describe()
            )));
        }
        let result_type = left.result_type().clone();
        Ok(Arc::new(build(Box::new(Binary {
            left,
            right,
            result_type,
        }))))
    }

    /// Bag union of two equal-typed collections
    pub fn union_all(left: ExprRef, right: ExprRef) -> Result<ExprRef> {
        Self::set_operation(Expression::UnionAll, "union_all", left, right)
    }

    /// Set intersection of two equal-typed collections
    pub fn intersect(left: ExprRef, right: ExprRef) -> Result<ExprRef> {
        Self::set_operation(Expression::Intersect, "intersect", left, right)
    }

    /// Set difference of two equal-typed collections
    pub fn except(left: ExprRef, right: ExprRef) -> Result<ExprRef> {
        Self::set_operation(Expression::Except, "except", left, right)
    }

    /// String pattern match
    pub fn like(input: ExprRef, pattern: ExprRef, escape: Option<ExprRef>) -> Result<ExprRef> {
        use crate::types::PrimitiveKind;
        let all_strings = [Some(&input), Some(&pattern), escape.as_ref()]
            .into_iter()
            .flatten()
            .all(|expr| expr.result_type().as_primitive() == Some(PrimitiveKind::String));
        if !all_strings {
            return Err(Error::structural("like requires string operands"));
        }
        Ok(Arc::new(Expression::Like(Box::new(LikeExpr {
            input,
            pattern,
            escape,
            result_type: TypeUsage::boolean(),
        }))))
    }

    // --- Control -----------------------------------------------------------

    /// A searched case expression. Every `when` must be boolean and every
    /// `then` must share one result type with the (required) `else` branch;
    /// entity branches unify to their closest common base type.
    pub fn case_(whens: Vec<(ExprRef, ExprRef)>, else_expr: ExprRef) -> Result<ExprRef> {
        if whens.is_empty() {
            return Err(Error::structural("case requires at least one when branch"));
        }
        let mut result_type = else_expr.result_type().clone();
        for (when, then) in &whens {
            if !when.result_type().is_boolean() {
                return Err(Error::structural(format!(
                    "case when must be boolean, got {}",
                    when.result_type().describe()
                )));
            }
            if then.result_type().data_type == result_type.data_type {
                continue;
            }
            let common = match (&then.result_type().data_type, &result_type.data_type) {
                (DataType::Entity(branch), DataType::Entity(current)) => current
                    .common_base(branch)
                    .map(|base| TypeUsage::entity(Arc::new(base.clone()))),
                _ => None,
            };
            match common {
                Some(unified) => result_type = unified,
                None => {
                    return Err(Error::structural(format!(
                        "case branches must share a result type: {} vs {}",
                        then.result_type().describe(),
                        result_type.describe()
                    )))
                }
            }
        }
        let whens = whens
            .into_iter()
            .map(|(when, then)| CaseWhen { when, then })
            .collect();
        Ok(Arc::new(Expression::Case(Box::new(Case {
            whens,
            else_expr,
            result_type,
        }))))
    }

    // --- Invocation --------------------------------------------------------

    /// Invoke a catalog function with positional arguments
    pub fn call(function: FunctionSignature, arguments: Vec<ExprRef>) -> Result<ExprRef> {
        if arguments.len() != function.parameters.len() {
            return Err(Error::structural(format!(
                "function {} expects {} arguments, got {}",
                function.qualified_name(),
                function.parameters.len(),
                arguments.len()
            )));
        }
        for (argument, parameter) in arguments.iter().zip(&function.parameters) {
            if argument.result_type().data_type != parameter.data_type {
                return Err(Error::structural(format!(
                    "argument type {} does not match parameter type {} of {}",
                    argument.result_type().describe(),
                    parameter.describe(),
                    function.qualified_name()
                )));
            }
        }
        let result_type = function.return_type.clone();
        Ok(Arc::new(Expression::FunctionCall(Box::new(FunctionCall {
            function,
            arguments,
            result_type,
        }))))
    }

    /// Apply a lambda body to argument expressions
    pub fn lambda(
        parameters: Vec<(String, TypeUsage)>,
        body: ExprRef,
        arguments: Vec<ExprRef>,
    ) -> Result<ExprRef> {
        if arguments.len() != parameters.len() {
            return Err(Error::structural(format!(
                "lambda expects {} arguments, got {}",
                parameters.len(),
                arguments.len()
            )));
        }
        for (argument, (name, parameter)) in arguments.iter().zip(&parameters) {
            if argument.result_type().data_type != parameter.data_type {
                return Err(Error::structural(format!(
                    "lambda argument for '{}' has type {}, expected {}",
                    name,
                    argument.result_type().describe(),
                    parameter.describe()
                )));
            }
        }
        let result_type = body.result_type().clone();
        Ok(Arc::new(Expression::Lambda(Box::new(Lambda {
            parameters,
            body,
            arguments,
            result_type,
        }))))
    }

    // --- Construction ------------------------------------------------------

    /// Construct a row, entity, or complex value. Arguments are positional
    /// per member of the result type.
    pub fn new_instance(result_type: TypeUsage, arguments: Vec<ExprRef>) -> Result<ExprRef> {
        let members: Vec<(&String, &TypeUsage)> = match &result_type.data_type {
            DataType::Row(row) => row.fields.iter().map(|(n, t)| (n, t)).collect(),
            DataType::Entity(entity) => entity.properties.iter().map(|(n, t)| (n, t)).collect(),
            DataType::Complex(complex) => {
                complex.properties.iter().map(|(n, t)| (n, t)).collect()
            }
            other => {
                return Err(Error::structural(format!(
                    "new_instance requires a row, entity, or complex result type, got {:?}",
                    other
                )))
            }
        };
        if arguments.len() != members.len() {
            return Err(Error::structural(format!(
                "{} expects {} constructor arguments, got {}",
                result_type.describe(),
                members.len(),
                arguments.len()
            )));
        }
        for (argument, (name, member)) in arguments.iter().zip(&members) {
            if argument.result_type().data_type != member.data_type {
                return Err(Error::structural(format!(
                    "constructor argument for '{}' has type {}, expected {}",
                    name,
                    argument.result_type().describe(),
                    member.describe()
                )));
            }
        }
        Ok(Arc::new(Expression::NewInstance(Box::new(NewInstance {
            arguments,
            related_refs: Vec::new(),
            result_type,
        }))))
    }

    /// Construct a row value from named fields (the row type is derived)
    pub fn new_row(fields: Vec<(String, ExprRef)>) -> Result<ExprRef> {
        let row_type = TypeUsage::row(
            fields
                .iter()
                .map(|(name, expr)| (name.clone(), expr.result_type().clone()))
                .collect(),
        );
        let arguments = fields.into_iter().map(|(_, expr)| expr).collect();
        Self::new_instance(row_type, arguments)
    }

    /// Navigate a relationship from an instance or reference at `from_role`
    /// to the entities at `to_role`
    pub fn relationship_nav(
        relationship: RelationshipSet,
        from_role: impl Into<String>,
        to_role: impl Into<String>,
        source: ExprRef,
    ) -> Result<ExprRef> {
        let from_role = from_role.into();
        let to_role = to_role.into();
        let from = relationship.end(&from_role).ok_or_else(|| {
            Error::structural(format!(
                "relationship {} has no end '{}'",
                relationship.qualified_name(),
                from_role
            ))
        })?;
        let to = relationship.end(&to_role).ok_or_else(|| {
            Error::structural(format!(
                "relationship {} has no end '{}'",
                relationship.qualified_name(),
                to_role
            ))
        })?;
        let source_entity = source.result_type().as_entity().ok_or_else(|| {
            Error::structural("relationship navigation requires an entity or reference source")
        })?;
        if source_entity != &from.element_type {
            return Err(Error::structural(format!(
                "navigation source type {} does not match end '{}' of {}",
                source_entity.qualified_name(),
                from_role,
                relationship.qualified_name()
            )));
        }
        let target = TypeUsage::entity(to.element_type.clone());
        let result_type = match to.multiplicity {
            Multiplicity::Many => TypeUsage::collection(target),
            Multiplicity::One | Multiplicity::ZeroOrOne => target,
        };
        Ok(Arc::new(Expression::RelationshipNav(Box::new(
            RelationshipNav {
                relationship,
                from_role,
                to_role,
                source,
                result_type,
            },
        ))))
    }

    /// Build a strongly typed reference into an entity set from explicit key
    /// values, ordered by the entity type's key members
    pub fn ref_(entity_set: EntitySet, key_values: Vec<ExprRef>) -> Result<ExprRef> {
        let entity = entity_set.element_type.clone();
        if key_values.len() != entity.key_members.len() {
            return Err(Error::structural(format!(
                "{} has {} key members, got {} key values",
                entity.qualified_name(),
                entity.key_members.len(),
                key_values.len()
            )));
        }
        for (value, member) in key_values.iter().zip(&entity.key_members) {
            let member_type = entity.property_type(member).ok_or_else(|| {
                Error::structural(format!(
                    "key member '{}' is not a property of {}",
                    member,
                    entity.qualified_name()
                ))
            })?;
            if value.result_type().data_type != member_type.data_type {
                return Err(Error::structural(format!(
                    "key value for '{}' has type {}, expected {}",
                    member,
                    value.result_type().describe(),
                    member_type.describe()
                )));
            }
        }
        let result_type = TypeUsage::reference(entity);
        Ok(Arc::new(Expression::Ref(Box::new(RefExpr {
            entity_set,
            key_values,
            result_type,
        }))))
    }

    // --- Relational --------------------------------------------------------

    /// Restrict a collection by a boolean predicate; the result type equals
    /// the input's
    pub fn filter(input: ExpressionBinding, predicate: ExprRef) -> Result<ExprRef> {
        if !predicate.result_type().is_boolean() {
            return Err(Error::structural(format!(
                "filter predicate must be boolean, got {}",
                predicate.result_type().describe()
            )));
        }
        let result_type = input.expression.result_type().clone();
        Ok(Arc::new(Expression::Filter(Box::new(Filter {
            input,
            predicate,
            result_type,
        }))))
    }

    /// Project each element of a collection through an expression
    pub fn project(input: ExpressionBinding, projection: ExprRef) -> Result<ExprRef> {
        let result_type = TypeUsage::collection(projection.result_type().clone());
        Ok(Arc::new(Expression::Project(Box::new(Project {
            input,
            projection,
            result_type,
        }))))
    }

    /// Unconditional join of two or more collections
    pub fn cross_join(inputs: Vec<ExpressionBinding>) -> Result<ExprRef> {
        if inputs.len() < 2 {
            return Err(Error::structural("cross_join requires at least two inputs"));
        }
        let result_type = TypeUsage::collection(TypeUsage::row(
            inputs
                .iter()
                .map(|binding| (binding.variable.clone(), binding.variable_type.clone()))
                .collect(),
        ));
        Ok(Arc::new(Expression::CrossJoin(Box::new(CrossJoin {
            inputs,
            result_type,
        }))))
    }

    /// Conditional join of two collections
    pub fn join(
        kind: JoinKind,
        left: ExpressionBinding,
        right: ExpressionBinding,
        condition: ExprRef,
    ) -> Result<ExprRef> {
        if !condition.result_type().is_boolean() {
            return Err(Error::structural(format!(
                "join condition must be boolean, got {}",
                condition.result_type().describe()
            )));
        }
        let result_type = TypeUsage::collection(TypeUsage::row(vec![
            (left.variable.clone(), left.variable_type.clone()),
            (right.variable.clone(), right.variable_type.clone()),
        ]));
        Ok(Arc::new(Expression::Join(Box::new(Join {
            kind,
            left,
            right,
            condition,
            result_type,
        }))))
    }

    /// Evaluate the `apply` collection once per element of `input`
    pub fn apply(kind: ApplyKind, input: ExpressionBinding, apply: ExpressionBinding) -> Result<ExprRef> {
        let result_type = TypeUsage::collection(TypeUsage::row(vec![
            (input.variable.clone(), input.variable_type.clone()),
            (apply.variable.clone(), apply.variable_type.clone()),
        ]));
        Ok(Arc::new(Expression::Apply(Box::new(Apply {
            kind,
            input,
            apply,
            result_type,
        }))))
    }

    /// Group a collection by key expressions and compute aggregates; the
    /// result rows carry the keys followed by the aggregate values
    pub fn group_by(
        input: GroupBinding,
        keys: Vec<(String, ExprRef)>,
        aggregates: Vec<(String, Aggregate)>,
    ) -> Result<ExprRef> {
        if keys.is_empty() && aggregates.is_empty() {
            return Err(Error::structural(
                "group_by requires at least one key or aggregate",
            ));
        }
        for (name, aggregate) in &aggregates {
            if aggregate.function.parameters.len() != 1 {
                return Err(Error::structural(format!(
                    "aggregate '{}' must use a single-argument function",
                    name
                )));
            }
            if aggregate.argument.result_type().data_type
                != aggregate.function.parameters[0].data_type
            {
                return Err(Error::structural(format!(
                    "aggregate '{}' argument type {} does not match {}",
                    name,
                    aggregate.argument.result_type().describe(),
                    aggregate.function.parameters[0].describe()
                )));
            }
        }
        let mut fields: Vec<(String, TypeUsage)> = keys
            .iter()
            .map(|(name, expr)| (name.clone(), expr.result_type().clone()))
            .collect();
        fields.extend(
            aggregates
                .iter()
                .map(|(name, agg)| (name.clone(), agg.function.return_type.clone())),
        );
        let result_type = TypeUsage::collection(TypeUsage::row(fields));
        Ok(Arc::new(Expression::GroupBy(Box::new(GroupBy {
            input,
            keys,
            aggregates,
            result_type,
        }))))
    }

    /// Order a collection by sort keys; the result type equals the input's
    pub fn sort(input: ExpressionBinding, keys: Vec<SortKey>) -> Result<ExprRef> {
        if keys.is_empty() {
            return Err(Error::structural("sort requires at least one key"));
        }
        for key in &keys {
            if key.expression.result_type().as_primitive().is_none() {
                return Err(Error::structural(format!(
                    "sort key must be primitive, got {}",
                    key.expression.result_type().describe()
                )));
            }
        }
        let result_type = input.expression.result_type().clone();
        Ok(Arc::new(Expression::Sort(Box::new(Sort {
            input,
            keys,
            result_type,
        }))))
    }

    /// Skip a count of elements in sort-key order
    pub fn skip(input: ExpressionBinding, keys: Vec<SortKey>, count: ExprRef) -> Result<ExprRef> {
        if keys.is_empty() {
            return Err(Error::structural("skip requires at least one sort key"));
        }
        let count_ok = count
            .result_type()
            .as_primitive()
            .map(|kind| kind.is_numeric())
            .unwrap_or(false);
        if !count_ok {
            return Err(Error::structural("skip count must be numeric"));
        }
        let result_type = input.expression.result_type().clone();
        Ok(Arc::new(Expression::Skip(Box::new(Skip {
            input,
            keys,
            count,
            result_type,
        }))))
    }

    /// Truncate a collection to a count of elements
    pub fn limit(input: ExprRef, count: ExprRef) -> Result<ExprRef> {
        if !input.result_type().is_collection() {
            return Err(Error::structural("limit requires a collection input"));
        }
        let count_ok = count
            .result_type()
            .as_primitive()
            .map(|kind| kind.is_numeric())
            .unwrap_or(false);
        if !count_ok {
            return Err(Error::structural("limit count must be numeric"));
        }
        let result_type = input.result_type().clone();
        Ok(Arc::new(Expression::Limit(Box::new(Limit {
            input,
            count,
            result_type,
        }))))
    }

    /// Existential or universal quantification over a collection
    pub fn quantifier(
        kind: QuantifierKind,
        input: ExpressionBinding,
        predicate: ExprRef,
    ) -> Result<ExprRef> {
        if !predicate.result_type().is_boolean() {
            return Err(Error::structural(format!(
                "quantifier predicate must be boolean, got {}",
                predicate.result_type().describe()
            )));
        }
        Ok(Arc::new(Expression::Quantifier(Box::new(Quantifier {
            kind,
            input,
            predicate,
            result_type: TypeUsage::boolean(),
        }))))
    }

    // --- Predicates and downcasts ------------------------------------------

    /// Check if this is a boolean constant with the given value
    pub fn is_boolean_constant(&self, value: bool) -> bool {
        matches!(
            self,
            Expression::Constant(Constant {
                value: ScalarValue::Boolean(v),
                ..
            }) if *v == value
        )
    }

    /// Try to get as a constant
    pub fn as_constant(&self) -> Option<&Constant> {
        match self {
            Expression::Constant(c) => Some(c),
            _ => None,
        }
    }

    /// Try to get as a variable reference
    pub fn as_variable_ref(&self) -> Option<&VariableRef> {
        match self {
            Expression::VariableRef(v) => Some(v),
            _ => None,
        }
    }

    /// Try to get as a property access
    pub fn as_property(&self) -> Option<&Property> {
        match self {
            Expression::Property(p) => Some(p),
            _ => None,
        }
    }

    /// Try to get as a case expression
    pub fn as_case(&self) -> Option<&Case> {
        match self {
            Expression::Case(c) => Some(c),
            _ => None,
        }
    }

    /// Try to get as a filter
    pub fn as_filter(&self) -> Option<&Filter> {
        match self {
            Expression::Filter(f) => Some(f),
            _ => None,
        }
    }

    /// Try to get as a project
    pub fn as_project(&self) -> Option<&Project> {
        match self {
            Expression::Project(p) => Some(p),
            _ => None,
        }
    }

    /// Try to get as an instance constructor
    pub fn as_new_instance(&self) -> Option<&NewInstance> {
        match self {
            Expression::NewInstance(n) => Some(n),
            _ => None,
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Constant(c) => write!(f, "{}", c.value),
            Expression::VariableRef(v) => write!(f, "Var({})", v.name),
            Expression::ParameterRef(p) => write!(f, "@{}", p.name),
            Expression::Property(p) => write!(f, "{}.{}", p.instance, p.name),
            Expression::Scan(s) => write!(f, "Scan({})", s.entity_set.qualified_name()),
            other => write!(f, "{}", other.kind_name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataSpace, EntityType};

    fn orders_set() -> EntitySet {
        let order = Arc::new(EntityType {
            namespace: "Model".to_string(),
            name: "Order".to_string(),
            space: DataSpace::Model,
            base_type: None,
            key_members: vec!["Id".to_string()],
            properties: vec![
                ("Id".to_string(), TypeUsage::int32()),
                ("Total".to_string(), TypeUsage::int32()),
            ],
        });
        EntitySet::new("Container", "Orders", order)
    }

    #[test]
    fn test_scan_result_type() {
        let scan = Expression::scan(orders_set());
        assert!(scan.result_type().is_collection());
        let element = scan.result_type().element_type().unwrap();
        assert!(matches!(element.data_type, DataType::Entity(_)));
    }

    #[test]
    fn test_filter_requires_boolean_predicate() {
        let scan = Expression::scan(orders_set());
        let binding = ExpressionBinding::new("o", scan).unwrap();
        let err = Expression::filter(binding, Expression::int32(1));
        assert!(err.is_err());
    }

    #[test]
    fn test_filter_result_type_equals_input() {
        let scan = Expression::scan(orders_set());
        let binding = ExpressionBinding::new("o", scan.clone()).unwrap();
        let predicate = Expression::eq(
            Expression::property(binding.reference(), "Id").unwrap(),
            Expression::int32(1),
        )
        .unwrap();
        let filter = Expression::filter(binding, predicate).unwrap();
        assert_eq!(filter.result_type(), scan.result_type());
    }

    #[test]
    fn test_binding_requires_collection() {
        let err = ExpressionBinding::new("x", Expression::int32(1));
        assert!(err.is_err());
    }

    #[test]
    fn test_property_resolution() {
        let scan = Expression::scan(orders_set());
        let binding = ExpressionBinding::new("o", scan).unwrap();
        let prop = Expression::property(binding.reference(), "Total").unwrap();
        assert_eq!(prop.result_type(), &TypeUsage::int32());

        let missing = Expression::property(binding.reference(), "Nope");
        assert!(missing.is_err());
    }

    #[test]
    fn test_case_branch_types_must_agree() {
        let ok = Expression::case_(
            vec![(Expression::boolean(true), Expression::int32(1))],
            Expression::int32(0),
        );
        assert!(ok.is_ok());

        let err = Expression::case_(
            vec![(Expression::boolean(true), Expression::string("a"))],
            Expression::int32(0),
        );
        assert!(err.is_err());

        let err = Expression::case_(
            vec![(Expression::int32(1), Expression::int32(1))],
            Expression::int32(0),
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_comparison_requires_equal_types() {
        let err = Expression::eq(Expression::int32(1), Expression::string("x"));
        assert!(err.is_err());
    }

    #[test]
    fn test_new_row_derives_type() {
        let row = Expression::new_row(vec![
            ("a".to_string(), Expression::int32(1)),
            ("b".to_string(), Expression::boolean(true)),
        ])
        .unwrap();
        assert_eq!(row.result_type().member_type("a"), Some(&TypeUsage::int32()));
        assert_eq!(
            row.result_type().member_type("b"),
            Some(&TypeUsage::boolean())
        );
    }

    #[test]
    fn test_new_instance_arity_checked() {
        let set = orders_set();
        let entity_type = TypeUsage::entity(set.element_type.clone());
        let err = Expression::new_instance(entity_type, vec![Expression::int32(1)]);
        assert!(err.is_err());
    }

    #[test]
    fn test_ref_key_types_checked() {
        let set = orders_set();
        let ok = Expression::ref_(set.clone(), vec![Expression::int32(7)]);
        assert!(ok.is_ok());
        let err = Expression::ref_(set, vec![Expression::string("7")]);
        assert!(err.is_err());
    }

    #[test]
    fn test_quantifier_is_boolean() {
        let scan = Expression::scan(orders_set());
        let binding = ExpressionBinding::new("o", scan).unwrap();
        let predicate = Expression::eq(
            Expression::property(binding.reference(), "Id").unwrap(),
            Expression::int32(1),
        )
        .unwrap();
        let any = Expression::quantifier(QuantifierKind::Any, binding, predicate).unwrap();
        assert!(any.result_type().is_boolean());
    }

    #[test]
    fn test_group_by_result_shape() {
        let scan = Expression::scan(orders_set());
        let binding = GroupBinding::new("o", "g", scan).unwrap();
        let key = Expression::property(
            Expression::variable("o", binding.variable_type.clone()),
            "Total",
        )
        .unwrap();
        let group = Expression::group_by(binding, vec![("Total".to_string(), key)], vec![]).unwrap();
        let element = group.result_type().element_type().unwrap();
        assert_eq!(element.member_type("Total"), Some(&TypeUsage::int32()));
    }

    #[test]
    fn test_serde_roundtrip() {
        let scan = Expression::scan(orders_set());
        let json = serde_json::to_string(&*scan).unwrap();
        let back: Expression = serde_json::from_str(&json).unwrap();
        assert_eq!(&back, &*scan);
    }
}
