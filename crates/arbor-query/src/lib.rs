//! Arbor Query - immutable relational command trees
//!
//! This library provides the expression-tree core of a query/command
//! compilation layer: it represents relational operations as an immutable
//! tree of typed nodes, rebinds those trees against a different metadata
//! catalog, validates structural and scoping invariants, and applies
//! ordered, pattern-matched rewrite rules to simplify trees produced by
//! view generation.
//!
//! # Architecture
//!
//! The library is organized around five pieces:
//! 1. **Node model** ([`expressions`]) - the closed tree grammar with
//!    validating constructors
//! 2. **Rebinding** ([`rebind`]) - a structure-sharing visitor that remaps
//!    every metadata reference onto a target catalog
//! 3. **Validation** ([`validate`]) - the scope-aware specialization of the
//!    rebinding traversal
//! 4. **Rule engine** ([`rewrite::rules`]) - ordered pattern-match rewriting
//!    with Continue/Reset/Stop continuation policies
//! 5. **View simplifier** ([`rewrite::simplifier`]) - the fixed four-rule
//!    pipeline built on the engine
//!
//! Trees are never mutated in place: every rewrite produces a new node when
//! a child changed and returns the original `Arc` handle when nothing did,
//! so unchanged subtrees are shared by reference and `Arc::ptr_eq` is a
//! reliable change detector. A rewrite pass is a pure function from an input
//! tree to an output tree; no ambient state is consulted -- catalogs are
//! always explicit parameters.

pub mod dump;
pub mod error;
pub mod expressions;
pub mod metadata;
pub mod rebind;
pub mod rewrite;
pub mod traversal;
pub mod types;
pub mod validate;

pub use dump::{dump, IndentDumper, TreeDumper};
pub use error::{Error, Result};
pub use expressions::{
    Aggregate, ApplyKind, ArithmeticOp, CaseWhen, ComparisonOp, ExprRef, Expression,
    ExpressionBinding, GroupBinding, JoinKind, QuantifierKind, RelatedEntityRef, SortKey,
};
pub use metadata::{
    Catalog, EntitySet, ForeignKeyConstraint, FunctionSignature, MappingCatalog, Multiplicity,
    RelationshipEnd, RelationshipSet,
};
pub use rewrite::{Rule, RulePolicy, RuleProcessor, SimplifyContext};
pub use traversal::{children, contains, count, find, map_children, DfsIter};
pub use types::{
    ComplexType, DataSpace, DataType, EntityType, Facets, PrimitiveKind, RowType, ScalarValue,
    TypeUsage,
};

use std::collections::BTreeMap;

/// Rebind a tree against a target catalog.
///
/// Produces an equivalent tree whose every metadata reference resolves
/// against `target`, preserving tree shape exactly. Subtrees with no
/// changed reference are returned as the original handles.
///
/// # Errors
/// [`Error::MetadataNotFound`] when an element has no equivalent in the
/// target catalog.
pub fn rebind(tree: &ExprRef, target: &dyn Catalog) -> Result<ExprRef> {
    rebind::rebind(tree, target)
}

/// Validate a tree against a catalog for an expected data space.
///
/// Checks variable scoping, parameter consistency, and metadata-space
/// restrictions. On success, yields the distinct parameter name → type
/// bindings discovered in the tree.
pub fn validate(
    tree: &ExprRef,
    catalog: &dyn Catalog,
    expected_space: DataSpace,
) -> Result<BTreeMap<String, TypeUsage>> {
    validate::validate(tree, catalog, expected_space)
}

/// Simplify a generated view query for `entity_set`.
///
/// Runs the fixed simplification pipeline (nested-projection collapse,
/// case-predicate simplification, discriminator canonicalization,
/// related-reference injection). Never fails; rules that do not match are
/// skipped and the original tree is returned when nothing applies.
pub fn simplify_view(catalog: &dyn Catalog, entity_set: &EntitySet, tree: ExprRef) -> ExprRef {
    rewrite::simplifier::simplify_view(catalog, entity_set, tree)
}
