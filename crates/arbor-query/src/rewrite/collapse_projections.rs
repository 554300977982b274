//! Nested-projection collapse.
//!
//! Matches `project(project(input, record-constructor), outer)` and rewrites
//! it to `project(input, outer')`, where `outer'` is the outer projection
//! with every property access against the outer binding variable replaced by
//! the corresponding constructor argument of the inner projection, matched
//! by property name.
//!
//! The match is abandoned ("doomed") -- leaving the original tree untouched --
//! when any reference to the outer binding variable cannot be substituted: a
//! bare variable reference, a property with no constructor counterpart, or a
//! nested construct that rebinds the same variable name.

use crate::error::Result;
use crate::expressions::{ExprRef, Expression, ExpressionBinding};
use crate::traversal::map_children;
use crate::types::DataType;
use std::collections::HashMap;

use super::rules::{Rule, RulePolicy};
use super::simplifier::SimplifyContext;

pub struct CollapseNestedProjections;

impl<'a> Rule<SimplifyContext<'a>> for CollapseNestedProjections {
    fn name(&self) -> &'static str {
        "collapse_nested_projections"
    }

    fn should_process(&self, expr: &ExprRef, _ctx: &SimplifyContext<'a>) -> bool {
        let Some(outer) = expr.as_project() else {
            return false;
        };
        let Some(inner) = outer.input.expression.as_project() else {
            return false;
        };
        matches!(
            inner.projection.as_new_instance(),
            Some(ctor) if matches!(ctor.result_type.data_type, DataType::Row(_))
        )
    }

    fn try_process(
        &self,
        expr: &ExprRef,
        _ctx: &mut SimplifyContext<'a>,
    ) -> Result<Option<ExprRef>> {
        let Some(outer) = expr.as_project() else {
            return Ok(None);
        };
        let Some(inner) = outer.input.expression.as_project() else {
            return Ok(None);
        };
        let Some(ctor) = inner.projection.as_new_instance() else {
            return Ok(None);
        };
        let DataType::Row(row) = &ctor.result_type.data_type else {
            return Ok(None);
        };

        // Constructor argument for each record property, by name
        let columns: HashMap<&str, &ExprRef> = row
            .fields
            .iter()
            .map(|(name, _)| name.as_str())
            .zip(ctor.arguments.iter())
            .collect();

        let Some(projection) = substitute(&outer.projection, &outer.input.variable, &columns)?
        else {
            // Doomed: an unresolved reference to the outer variable remains
            return Ok(None);
        };

        let binding =
            ExpressionBinding::new(inner.input.variable.clone(), inner.input.expression.clone())?;
        Expression::project(binding, projection).map(Some)
    }

    fn policy(&self) -> RulePolicy {
        RulePolicy::Reset
    }
}

/// Whether this node establishes `variable` for (some of) its children
pub(super) fn binds_variable(expr: &Expression, variable: &str) -> bool {
    match expr {
        Expression::Filter(f) => f.input.variable == variable,
        Expression::Project(p) => p.input.variable == variable,
        Expression::Sort(s) => s.input.variable == variable,
        Expression::Skip(s) => s.input.variable == variable,
        Expression::Quantifier(q) => q.input.variable == variable,
        Expression::Join(j) => j.left.variable == variable || j.right.variable == variable,
        Expression::Apply(a) => a.input.variable == variable || a.apply.variable == variable,
        Expression::CrossJoin(c) => c.inputs.iter().any(|b| b.variable == variable),
        Expression::GroupBy(g) => {
            g.input.variable == variable || g.input.group_variable == variable
        }
        Expression::Lambda(l) => l.parameters.iter().any(|(name, _)| name == variable),
        _ => false,
    }
}

/// Replace `variable.name` property accesses with the constructor column of
/// the same name. `None` signals a doomed substitution.
fn substitute(
    expr: &ExprRef,
    variable: &str,
    columns: &HashMap<&str, &ExprRef>,
) -> Result<Option<ExprRef>> {
    if let Some(property) = expr.as_property() {
        if let Some(var) = property.instance.as_variable_ref() {
            if var.name == variable {
                return Ok(columns.get(property.name.as_str()).map(|arg| (*arg).clone()));
            }
        }
    }
    if let Some(var) = expr.as_variable_ref() {
        if var.name == variable {
            // A use of the whole row variable has no per-column counterpart
            return Ok(None);
        }
    }
    if binds_variable(expr, variable) {
        // A nested construct shadows the name; give up rather than reason
        // about which occurrences belong to which binding
        return Ok(None);
    }

    let mut doomed = false;
    let result = map_children(expr, &mut |child| {
        if doomed {
            return Ok(child.clone());
        }
        match substitute(child, variable, columns)? {
            Some(mapped) => Ok(mapped),
            None => {
                doomed = true;
                Ok(child.clone())
            }
        }
    })?;
    if doomed {
        Ok(None)
    } else {
        Ok(Some(result))
    }
}
