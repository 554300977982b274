//! Tree traversal utilities for command-tree expressions.
//!
//! This module provides the uniform child-iteration contract used by every
//! visitor in the crate ([`children`]), a pre-order iterator ([`DfsIter`]),
//! and the structure-sharing rebuild primitive ([`map_children`]) that the
//! rewrite engine is built on.
//!
//! # Structural sharing
//!
//! [`map_children`] rebuilds a node from transformed children and returns the
//! *original* `ExprRef` whenever every transformed child is pointer-identical
//! to the child it replaces. Callers may therefore use `Arc::ptr_eq` on the
//! result to detect whether anything below a node changed; several rewrite
//! algorithms rely on this identity test rather than structural equality.

use crate::error::Result;
use crate::expressions::{
    Aggregate, ExprRef, Expression, ExpressionBinding, GroupBinding, NewInstance, RelatedEntityRef,
    SortKey,
};
use std::sync::Arc;

/// Iterate over the direct children of an expression, in a fixed
/// kind-specific order
pub fn children(expr: &Expression) -> Vec<&ExprRef> {
    let mut out = Vec::new();
    match expr {
        Expression::Constant(_)
        | Expression::Null(_)
        | Expression::VariableRef(_)
        | Expression::ParameterRef(_)
        | Expression::Scan(_) => {}

        Expression::Property(p) => out.push(&p.instance),
        Expression::Deref(u)
        | Expression::EntityRef(u)
        | Expression::RefKey(u)
        | Expression::Not(u)
        | Expression::IsNull(u)
        | Expression::IsEmpty(u)
        | Expression::Distinct(u)
        | Expression::Element(u) => out.push(&u.operand),
        Expression::Treat(r) | Expression::Cast(r) => out.push(&r.operand),

        Expression::Comparison(c) => {
            out.push(&c.left);
            out.push(&c.right);
        }
        Expression::Arithmetic(a) => {
            out.push(&a.left);
            out.push(&a.right);
        }
        Expression::And(b)
        | Expression::Or(b)
        | Expression::UnionAll(b)
        | Expression::Intersect(b)
        | Expression::Except(b) => {
            out.push(&b.left);
            out.push(&b.right);
        }
        Expression::Like(l) => {
            out.push(&l.input);
            out.push(&l.pattern);
            if let Some(escape) = &l.escape {
                out.push(escape);
            }
        }

        Expression::Case(c) => {
            for branch in &c.whens {
                out.push(&branch.when);
                out.push(&branch.then);
            }
            out.push(&c.else_expr);
        }

        Expression::FunctionCall(f) => out.extend(f.arguments.iter()),
        Expression::Lambda(l) => {
            out.extend(l.arguments.iter());
            out.push(&l.body);
        }

        Expression::NewInstance(n) => {
            out.extend(n.arguments.iter());
            out.extend(n.related_refs.iter().map(|r| &r.reference));
        }
        Expression::RelationshipNav(n) => out.push(&n.source),
        Expression::Ref(r) => out.extend(r.key_values.iter()),

        Expression::Filter(f) => {
            out.push(&f.input.expression);
            out.push(&f.predicate);
        }
        Expression::Project(p) => {
            out.push(&p.input.expression);
            out.push(&p.projection);
        }
        Expression::CrossJoin(c) => out.extend(c.inputs.iter().map(|b| &b.expression)),
        Expression::Join(j) => {
            out.push(&j.left.expression);
            out.push(&j.right.expression);
            out.push(&j.condition);
        }
        Expression::Apply(a) => {
            out.push(&a.input.expression);
            out.push(&a.apply.expression);
        }
        Expression::GroupBy(g) => {
            out.push(&g.input.expression);
            out.extend(g.keys.iter().map(|(_, expr)| expr));
            out.extend(g.aggregates.iter().map(|(_, agg)| &agg.argument));
        }
        Expression::Sort(s) => {
            out.push(&s.input.expression);
            out.extend(s.keys.iter().map(|key| &key.expression));
        }
        Expression::Skip(s) => {
            out.push(&s.input.expression);
            out.extend(s.keys.iter().map(|key| &key.expression));
            out.push(&s.count);
        }
        Expression::Limit(l) => {
            out.push(&l.input);
            out.push(&l.count);
        }
        Expression::Quantifier(q) => {
            out.push(&q.input.expression);
            out.push(&q.predicate);
        }
    }
    out
}

/// Depth-first (pre-order) iterator over a tree. Visits a node before its
/// children; good for top-down analysis and early termination.
pub struct DfsIter<'a> {
    stack: Vec<&'a ExprRef>,
}

impl<'a> DfsIter<'a> {
    pub fn new(root: &'a ExprRef) -> Self {
        Self { stack: vec![root] }
    }
}

impl<'a> Iterator for DfsIter<'a> {
    type Item = &'a ExprRef;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.stack.pop()?;
        let mut kids = children(next);
        kids.reverse();
        self.stack.extend(kids);
        Some(next)
    }
}

/// Find the first node (pre-order) satisfying a predicate
pub fn find<'a>(root: &'a ExprRef, mut predicate: impl FnMut(&Expression) -> bool) -> Option<&'a ExprRef> {
    DfsIter::new(root).find(|expr| predicate(expr))
}

/// Whether any node in the tree satisfies a predicate
pub fn contains(root: &ExprRef, predicate: impl FnMut(&Expression) -> bool) -> bool {
    find(root, predicate).is_some()
}

/// Count nodes satisfying a predicate
pub fn count(root: &ExprRef, mut predicate: impl FnMut(&Expression) -> bool) -> usize {
    DfsIter::new(root).filter(|expr| predicate(expr)).count()
}

fn map_vec<F>(items: &[ExprRef], f: &mut F) -> Result<(Vec<ExprRef>, bool)>
where
    F: FnMut(&ExprRef) -> Result<ExprRef>,
{
    let mut changed = false;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let mapped = f(item)?;
        changed |= !Arc::ptr_eq(&mapped, item);
        out.push(mapped);
    }
    Ok((out, changed))
}

fn map_binding<F>(binding: &ExpressionBinding, f: &mut F) -> Result<(ExpressionBinding, bool)>
where
    F: FnMut(&ExprRef) -> Result<ExprRef>,
{
    let expression = f(&binding.expression)?;
    if Arc::ptr_eq(&expression, &binding.expression) {
        Ok((binding.clone(), false))
    } else {
        Ok((
            ExpressionBinding::new(binding.variable.clone(), expression)?,
            true,
        ))
    }
}

fn map_group_binding<F>(binding: &GroupBinding, f: &mut F) -> Result<(GroupBinding, bool)>
where
    F: FnMut(&ExprRef) -> Result<ExprRef>,
{
    let expression = f(&binding.expression)?;
    if Arc::ptr_eq(&expression, &binding.expression) {
        Ok((binding.clone(), false))
    } else {
        Ok((
            GroupBinding::new(
                binding.variable.clone(),
                binding.group_variable.clone(),
                expression,
            )?,
            true,
        ))
    }
}

/// Rebuild a node from transformed children.
///
/// Applies `f` to every direct child; when all results are pointer-identical
/// to the originals the input `ExprRef` itself is returned (no allocation).
/// Otherwise a new node of the same kind is constructed through the public
/// constructors, re-deriving the result type from the new children.
pub fn map_children<F>(expr: &ExprRef, f: &mut F) -> Result<ExprRef>
where
    F: FnMut(&ExprRef) -> Result<ExprRef>,
{
    match expr.as_ref() {
        Expression::Constant(_)
        | Expression::Null(_)
        | Expression::VariableRef(_)
        | Expression::ParameterRef(_)
        | Expression::Scan(_) => Ok(expr.clone()),

        Expression::Property(p) => {
            let instance = f(&p.instance)?;
            if Arc::ptr_eq(&instance, &p.instance) {
                Ok(expr.clone())
            } else {
                Expression::property(instance, p.name.clone())
            }
        }
        Expression::Deref(u) => map_unary(expr, &u.operand, f, Expression::deref),
        Expression::EntityRef(u) => map_unary(expr, &u.operand, f, Expression::entity_ref),
        Expression::RefKey(u) => map_unary(expr, &u.operand, f, Expression::ref_key),
        Expression::Not(u) => map_unary(expr, &u.operand, f, Expression::not),
        Expression::IsNull(u) => map_unary(expr, &u.operand, f, Expression::is_null),
        Expression::IsEmpty(u) => map_unary(expr, &u.operand, f, Expression::is_empty),
        Expression::Distinct(u) => map_unary(expr, &u.operand, f, Expression::distinct),
        Expression::Element(u) => map_unary(expr, &u.operand, f, Expression::element),
        Expression::Treat(r) => {
            let operand = f(&r.operand)?;
            if Arc::ptr_eq(&operand, &r.operand) {
                Ok(expr.clone())
            } else {
                Expression::treat(operand, r.result_type.clone())
            }
        }
        Expression::Cast(r) => {
            let operand = f(&r.operand)?;
            if Arc::ptr_eq(&operand, &r.operand) {
                Ok(expr.clone())
            } else {
                Expression::cast(operand, r.result_type.clone())
            }
        }

        Expression::Comparison(c) => {
            let left = f(&c.left)?;
            let right = f(&c.right)?;
            if Arc::ptr_eq(&left, &c.left) && Arc::ptr_eq(&right, &c.right) {
                Ok(expr.clone())
            } else {
                Expression::comparison(c.op, left, right)
            }
        }
        Expression::Arithmetic(a) => {
            let left = f(&a.left)?;
            let right = f(&a.right)?;
            if Arc::ptr_eq(&left, &a.left) && Arc::ptr_eq(&right, &a.right) {
                Ok(expr.clone())
            } else {
                Expression::arithmetic(a.op, left, right)
            }
        }
        Expression::And(b) => map_binary(expr, b, f, Expression::and),
        Expression::Or(b) => map_binary(expr, b, f, Expression::or),
        Expression::UnionAll(b) => map_binary(expr, b, f, Expression::union_all),
        Expression::Intersect(b) => map_binary(expr, b, f, Expression::intersect),
        Expression::Except(b) => map_binary(expr, b, f, Expression::except),
        Expression::Like(l) => {
            let input = f(&l.input)?;
            let pattern = f(&l.pattern)?;
            let escape = match &l.escape {
                Some(escape) => Some(f(escape)?),
                None => None,
            };
            let unchanged = Arc::ptr_eq(&input, &l.input)
                && Arc::ptr_eq(&pattern, &l.pattern)
                && match (&escape, &l.escape) {
                    (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                    (None, None) => true,
                    _ => false,
                };
            if unchanged {
                Ok(expr.clone())
            } else {
                Expression::like(input, pattern, escape)
            }
        }

        Expression::Case(c) => {
            let mut changed = false;
            let mut whens = Vec::with_capacity(c.whens.len());
            for branch in &c.whens {
                let when = f(&branch.when)?;
                let then = f(&branch.then)?;
                changed |= !Arc::ptr_eq(&when, &branch.when) || !Arc::ptr_eq(&then, &branch.then);
                whens.push((when, then));
            }
            let else_expr = f(&c.else_expr)?;
            changed |= !Arc::ptr_eq(&else_expr, &c.else_expr);
            if changed {
                Expression::case_(whens, else_expr)
            } else {
                Ok(expr.clone())
            }
        }

        Expression::FunctionCall(call) => {
            let (arguments, changed) = map_vec(&call.arguments, f)?;
            if changed {
                Expression::call(call.function.clone(), arguments)
            } else {
                Ok(expr.clone())
            }
        }
        Expression::Lambda(l) => {
            let (arguments, args_changed) = map_vec(&l.arguments, f)?;
            let body = f(&l.body)?;
            if args_changed || !Arc::ptr_eq(&body, &l.body) {
                Expression::lambda(l.parameters.clone(), body, arguments)
            } else {
                Ok(expr.clone())
            }
        }

        Expression::NewInstance(n) => {
            let (arguments, args_changed) = map_vec(&n.arguments, f)?;
            let mut refs_changed = false;
            let mut related_refs = Vec::with_capacity(n.related_refs.len());
            for rel in &n.related_refs {
                let reference = f(&rel.reference)?;
                refs_changed |= !Arc::ptr_eq(&reference, &rel.reference);
                related_refs.push(RelatedEntityRef {
                    relationship: rel.relationship.clone(),
                    target_role: rel.target_role.clone(),
                    reference,
                });
            }
            if args_changed || refs_changed {
                Ok(Arc::new(Expression::NewInstance(Box::new(NewInstance {
                    arguments,
                    related_refs,
                    result_type: n.result_type.clone(),
                }))))
            } else {
                Ok(expr.clone())
            }
        }
        Expression::RelationshipNav(n) => {
            let source = f(&n.source)?;
            if Arc::ptr_eq(&source, &n.source) {
                Ok(expr.clone())
            } else {
                Expression::relationship_nav(
                    n.relationship.clone(),
                    n.from_role.clone(),
                    n.to_role.clone(),
                    source,
                )
            }
        }
        Expression::Ref(r) => {
            let (key_values, changed) = map_vec(&r.key_values, f)?;
            if changed {
                Expression::ref_(r.entity_set.clone(), key_values)
            } else {
                Ok(expr.clone())
            }
        }

        Expression::Filter(flt) => {
            let (input, input_changed) = map_binding(&flt.input, f)?;
            let predicate = f(&flt.predicate)?;
            if input_changed || !Arc::ptr_eq(&predicate, &flt.predicate) {
                Expression::filter(input, predicate)
            } else {
                Ok(expr.clone())
            }
        }
        Expression::Project(p) => {
            let (input, input_changed) = map_binding(&p.input, f)?;
            let projection = f(&p.projection)?;
            if input_changed || !Arc::ptr_eq(&projection, &p.projection) {
                Expression::project(input, projection)
            } else {
                Ok(expr.clone())
            }
        }
        Expression::CrossJoin(c) => {
            let mut changed = false;
            let mut inputs = Vec::with_capacity(c.inputs.len());
            for binding in &c.inputs {
                let (mapped, binding_changed) = map_binding(binding, f)?;
                changed |= binding_changed;
                inputs.push(mapped);
            }
            if changed {
                Expression::cross_join(inputs)
            } else {
                Ok(expr.clone())
            }
        }
        Expression::Join(j) => {
            let (left, left_changed) = map_binding(&j.left, f)?;
            let (right, right_changed) = map_binding(&j.right, f)?;
            let condition = f(&j.condition)?;
            if left_changed || right_changed || !Arc::ptr_eq(&condition, &j.condition) {
                Expression::join(j.kind, left, right, condition)
            } else {
                Ok(expr.clone())
            }
        }
        Expression::Apply(a) => {
            let (input, input_changed) = map_binding(&a.input, f)?;
            let (apply, apply_changed) = map_binding(&a.apply, f)?;
            if input_changed || apply_changed {
                Expression::apply(a.kind, input, apply)
            } else {
                Ok(expr.clone())
            }
        }
        Expression::GroupBy(g) => {
            let (input, input_changed) = map_group_binding(&g.input, f)?;
            let mut changed = input_changed;
            let mut keys = Vec::with_capacity(g.keys.len());
            for (name, key) in &g.keys {
                let mapped = f(key)?;
                changed |= !Arc::ptr_eq(&mapped, key);
                keys.push((name.clone(), mapped));
            }
            let mut aggregates = Vec::with_capacity(g.aggregates.len());
            for (name, agg) in &g.aggregates {
                let argument = f(&agg.argument)?;
                changed |= !Arc::ptr_eq(&argument, &agg.argument);
                aggregates.push((
                    name.clone(),
                    Aggregate {
                        function: agg.function.clone(),
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
        Expression::Sort(s) => {
            let (input, input_changed) = map_binding(&s.input, f)?;
            let (keys, keys_changed) = map_sort_keys(&s.keys, f)?;
            if input_changed || keys_changed {
                Expression::sort(input, keys)
            } else {
                Ok(expr.clone())
            }
        }
        Expression::Skip(s) => {
            let (input, input_changed) = map_binding(&s.input, f)?;
            let (keys, keys_changed) = map_sort_keys(&s.keys, f)?;
            let count = f(&s.count)?;
            if input_changed || keys_changed || !Arc::ptr_eq(&count, &s.count) {
                Expression::skip(input, keys, count)
            } else {
                Ok(expr.clone())
            }
        }
        Expression::Limit(l) => {
            let input = f(&l.input)?;
            let count = f(&l.count)?;
            if Arc::ptr_eq(&input, &l.input) && Arc::ptr_eq(&count, &l.count) {
                Ok(expr.clone())
            } else {
                Expression::limit(input, count)
            }
        }
        Expression::Quantifier(q) => {
            let (input, input_changed) = map_binding(&q.input, f)?;
            let predicate = f(&q.predicate)?;
            if input_changed || !Arc::ptr_eq(&predicate, &q.predicate) {
                Expression::quantifier(q.kind, input, predicate)
            } else {
                Ok(expr.clone())
            }
        }
    }
}

fn map_unary<F>(
    expr: &ExprRef,
    operand: &ExprRef,
    f: &mut F,
    build: fn(ExprRef) -> Result<ExprRef>,
) -> Result<ExprRef>
where
    F: FnMut(&ExprRef) -> Result<ExprRef>,
{
    let mapped = f(operand)?;
    if Arc::ptr_eq(&mapped, operand) {
        Ok(expr.clone())
    } else {
        build(mapped)
    }
}

fn map_binary<F>(
    expr: &ExprRef,
    binary: &crate::expressions::Binary,
    f: &mut F,
    build: fn(ExprRef, ExprRef) -> Result<ExprRef>,
) -> Result<ExprRef>
where
    F: FnMut(&ExprRef) -> Result<ExprRef>,
{
    let left = f(&binary.left)?;
    let right = f(&binary.right)?;
    if Arc::ptr_eq(&left, &binary.left) && Arc::ptr_eq(&right, &binary.right) {
        Ok(expr.clone())
    } else {
        build(left, right)
    }
}

fn map_sort_keys<F>(keys: &[SortKey], f: &mut F) -> Result<(Vec<SortKey>, bool)>
where
    F: FnMut(&ExprRef) -> Result<ExprRef>,
{
    let mut changed = false;
    let mut out = Vec::with_capacity(keys.len());
    for key in keys {
        let expression = f(&key.expression)?;
        changed |= !Arc::ptr_eq(&expression, &key.expression);
        out.push(SortKey {
            expression,
            ascending: key.ascending,
        });
    }
    Ok((out, changed))
}
