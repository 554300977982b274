//! Generic catalog rebinding.
//!
//! A [`Rebinder`] takes a tree built against one metadata catalog and
//! produces an equivalent tree whose every metadata reference resolves
//! against a target catalog, preserving tree shape exactly: kinds, arities,
//! and binding variable names are untouched; only metadata references and
//! result types change.
//!
//! Rebinding resolves equivalents by qualified name: entity sets by
//! container + name, functions by namespace + name + parameter types, named
//! types by namespace + name + space. A missing equivalent is fatal and
//! reported with the missing element's qualified name.
//!
//! Unchanged subtrees are returned as the original `ExprRef` (no
//! allocation); a node is rebuilt only when a child or an embedded metadata
//! reference actually changed. Rebinding against an element-identical
//! catalog therefore returns a tree that is pointer-identical at every
//! level.

use crate::error::{Error, Result};
use crate::expressions::{
    Aggregate, ExprRef, Expression, GroupBinding, NewInstance, Property, RelatedEntityRef,
};
use crate::metadata::{Catalog, EntitySet, FunctionSignature, RelationshipSet};
use crate::traversal::map_children;
use crate::types::{ComplexType, DataType, EntityType, RowType, TypeUsage};
use std::sync::Arc;

/// Rebind a tree against a target catalog.
///
/// See the module docs for the lookup and sharing contract.
pub fn rebind(tree: &ExprRef, target: &dyn Catalog) -> Result<ExprRef> {
    Rebinder::new(target).rebind(tree)
}

/// A recursive, structure-sharing tree transformer that remaps every type,
/// function, and relation reference to equivalent elements of a target
/// catalog.
pub struct Rebinder<'a> {
    target: &'a dyn Catalog,
}

impl<'a> Rebinder<'a> {
    pub fn new(target: &'a dyn Catalog) -> Self {
        Self { target }
    }

    /// Rebind one node (and, recursively, its subtree)
    pub fn rebind(&self, expr: &ExprRef) -> Result<ExprRef> {
        match expr.as_ref() {
            // Primitive-typed leaf: nothing to remap
            Expression::Constant(_) => Ok(expr.clone()),

            Expression::Null(n) => {
                let result_type = self.rebind_type(&n.result_type)?;
                if result_type == n.result_type {
                    Ok(expr.clone())
                } else {
                    Ok(Expression::null(result_type))
                }
            }
            Expression::VariableRef(v) => {
                let result_type = self.rebind_type(&v.result_type)?;
                if result_type == v.result_type {
                    Ok(expr.clone())
                } else {
                    Ok(Expression::variable(v.name.clone(), result_type))
                }
            }
            Expression::ParameterRef(p) => {
                let result_type = self.rebind_type(&p.result_type)?;
                if result_type == p.result_type {
                    Ok(expr.clone())
                } else {
                    Ok(Expression::parameter(p.name.clone(), result_type))
                }
            }

            Expression::Scan(s) => {
                let entity_set = self.rebind_entity_set(&s.entity_set)?;
                if entity_set == s.entity_set {
                    Ok(expr.clone())
                } else {
                    Ok(Expression::scan(entity_set))
                }
            }

            // Property access re-resolves the named member against the
            // rebound instance's result type
            Expression::Property(p) => {
                let instance = self.rebind(&p.instance)?;
                let result_type = instance
                    .result_type()
                    .member_type(&p.name)
                    .cloned()
                    .ok_or_else(|| {
                        Error::metadata_not_found(format!(
                            "{}.{}",
                            instance.result_type().describe(),
                            p.name
                        ))
                    })?;
                if Arc::ptr_eq(&instance, &p.instance) && result_type == p.result_type {
                    Ok(expr.clone())
                } else {
                    Ok(Arc::new(Expression::Property(Box::new(Property {
                        instance,
                        name: p.name.clone(),
                        result_type,
                    }))))
                }
            }

            Expression::Treat(r) => {
                let operand = self.rebind(&r.operand)?;
                let target = self.rebind_type(&r.result_type)?;
                if Arc::ptr_eq(&operand, &r.operand) && target == r.result_type {
                    Ok(expr.clone())
                } else {
                    Expression::treat(operand, target)
                }
            }
            Expression::Cast(r) => {
                let operand = self.rebind(&r.operand)?;
                let target = self.rebind_type(&r.result_type)?;
                if Arc::ptr_eq(&operand, &r.operand) && target == r.result_type {
                    Ok(expr.clone())
                } else {
                    Expression::cast(operand, target)
                }
            }

            Expression::FunctionCall(call) => {
                let mut changed = false;
                let mut arguments = Vec::with_capacity(call.arguments.len());
                for argument in &call.arguments {
                    let rebound = self.rebind(argument)?;
                    changed |= !Arc::ptr_eq(&rebound, argument);
                    arguments.push(rebound);
                }
                let function = self.rebind_function(&call.function)?;
                if !changed && function == call.function {
                    Ok(expr.clone())
                } else {
                    Expression::call(function, arguments)
                }
            }

            Expression::Lambda(l) => {
                let mut changed = false;
                let mut parameters = Vec::with_capacity(l.parameters.len());
                for (name, usage) in &l.parameters {
                    let rebound = self.rebind_type(usage)?;
                    changed |= rebound != *usage;
                    parameters.push((name.clone(), rebound));
                }
                let body = self.rebind(&l.body)?;
                changed |= !Arc::ptr_eq(&body, &l.body);
                let mut arguments = Vec::with_capacity(l.arguments.len());
                for argument in &l.arguments {
                    let rebound = self.rebind(argument)?;
                    changed |= !Arc::ptr_eq(&rebound, argument);
                    arguments.push(rebound);
                }
                if changed {
                    Expression::lambda(parameters, body, arguments)
                } else {
                    Ok(expr.clone())
                }
            }

            Expression::NewInstance(n) => {
                let result_type = self.rebind_type(&n.result_type)?;
                let mut changed = result_type != n.result_type;
                let mut arguments = Vec::with_capacity(n.arguments.len());
                for argument in &n.arguments {
                    let rebound = self.rebind(argument)?;
                    changed |= !Arc::ptr_eq(&rebound, argument);
                    arguments.push(rebound);
                }
                let mut related_refs = Vec::with_capacity(n.related_refs.len());
                for rel in &n.related_refs {
                    let reference = self.rebind(&rel.reference)?;
                    changed |= !Arc::ptr_eq(&reference, &rel.reference);
                    related_refs.push(RelatedEntityRef {
                        relationship: rel.relationship.clone(),
                        target_role: rel.target_role.clone(),
                        reference,
                    });
                }
                if changed {
                    Ok(Arc::new(Expression::NewInstance(Box::new(NewInstance {
                        arguments,
                        related_refs,
                        result_type,
                    }))))
                } else {
                    Ok(expr.clone())
                }
            }

            Expression::RelationshipNav(nav) => {
                let relationship = self.rebind_relationship(&nav.relationship)?;
                let source = self.rebind(&nav.source)?;
                if relationship == nav.relationship && Arc::ptr_eq(&source, &nav.source) {
                    Ok(expr.clone())
                } else {
                    Expression::relationship_nav(
                        relationship,
                        nav.from_role.clone(),
                        nav.to_role.clone(),
                        source,
                    )
                }
            }

            Expression::Ref(r) => {
                let entity_set = self.rebind_entity_set(&r.entity_set)?;
                let mut changed = entity_set != r.entity_set;
                let mut key_values = Vec::with_capacity(r.key_values.len());
                for value in &r.key_values {
                    let rebound = self.rebind(value)?;
                    changed |= !Arc::ptr_eq(&rebound, value);
                    key_values.push(rebound);
                }
                if changed {
                    Expression::ref_(entity_set, key_values)
                } else {
                    Ok(expr.clone())
                }
            }

            Expression::GroupBy(g) => {
                let input_expr = self.rebind(&g.input.expression)?;
                let mut changed = !Arc::ptr_eq(&input_expr, &g.input.expression);
                let input = if changed {
                    GroupBinding::new(
                        g.input.variable.clone(),
                        g.input.group_variable.clone(),
                        input_expr,
                    )?
                } else {
                    g.input.clone()
                };
                let mut keys = Vec::with_capacity(g.keys.len());
                for (name, key) in &g.keys {
                    let rebound = self.rebind(key)?;
                    changed |= !Arc::ptr_eq(&rebound, key);
                    keys.push((name.clone(), rebound));
                }
                let mut aggregates = Vec::with_capacity(g.aggregates.len());
                for (name, agg) in &g.aggregates {
                    let function = self.rebind_function(&agg.function)?;
                    let argument = self.rebind(&agg.argument)?;
                    changed |= function != agg.function || !Arc::ptr_eq(&argument, &agg.argument);
                    aggregates.push((
                        name.clone(),
                        Aggregate {
                            function,
                            argument,
                            distinct: agg.distinct,
                        },
                    ));
                }
                if changed {
                    Expression::group_by(input, keys, aggregates)
                } else {
                    Ok(expr.clone())
                }
            }

            // Every remaining kind derives its metadata entirely from its
            // children; rebinding the children and rebuilding through the
            // constructors re-derives the result type
            _ => map_children(expr, &mut |child| self.rebind(child)),
        }
    }

    /// Map a type usage into the target catalog, retaining facet values
    pub(crate) fn rebind_type(&self, usage: &TypeUsage) -> Result<TypeUsage> {
        let data_type = match &usage.data_type {
            DataType::Primitive(kind) => DataType::Primitive(*kind),
            DataType::Row(row) => {
                let mut fields = Vec::with_capacity(row.fields.len());
                for (name, field) in &row.fields {
                    fields.push((name.clone(), self.rebind_type(field)?));
                }
                DataType::Row(RowType::new(fields))
            }
            DataType::Collection(element) => {
                DataType::Collection(Box::new(self.rebind_type(element)?))
            }
            DataType::Ref(entity) => DataType::Ref(self.rebind_entity_type(entity)?),
            DataType::Entity(entity) => DataType::Entity(self.rebind_entity_type(entity)?),
            DataType::Complex(complex) => DataType::Complex(self.rebind_complex_type(complex)?),
        };
        Ok(TypeUsage {
            data_type,
            facets: usage.facets.clone(),
        })
    }

    pub(crate) fn rebind_entity_type(&self, entity: &Arc<EntityType>) -> Result<Arc<EntityType>> {
        self.target
            .find_entity_type(&entity.namespace, &entity.name, entity.space)
            .cloned()
            .ok_or_else(|| Error::metadata_not_found(entity.qualified_name()))
    }

    pub(crate) fn rebind_complex_type(
        &self,
        complex: &Arc<ComplexType>,
    ) -> Result<Arc<ComplexType>> {
        self.target
            .find_complex_type(&complex.namespace, &complex.name, complex.space)
            .cloned()
            .ok_or_else(|| Error::metadata_not_found(complex.qualified_name()))
    }

    pub(crate) fn rebind_entity_set(&self, set: &EntitySet) -> Result<EntitySet> {
        self.target
            .entity_set(&set.container, &set.name)
            .cloned()
            .ok_or_else(|| Error::metadata_not_found(set.qualified_name()))
    }

    pub(crate) fn rebind_function(
        &self,
        function: &FunctionSignature,
    ) -> Result<FunctionSignature> {
        let mut parameters = Vec::with_capacity(function.parameters.len());
        for parameter in &function.parameters {
            parameters.push(self.rebind_type(parameter)?);
        }
        self.target
            .function(&function.namespace, &function.name, &parameters)
            .cloned()
            .ok_or_else(|| Error::metadata_not_found(function.qualified_name()))
    }

    pub(crate) fn rebind_relationship(
        &self,
        relationship: &RelationshipSet,
    ) -> Result<RelationshipSet> {
        self.target
            .relationship_set(&relationship.container, &relationship.name)
            .cloned()
            .ok_or_else(|| Error::metadata_not_found(relationship.qualified_name()))
    }
}
