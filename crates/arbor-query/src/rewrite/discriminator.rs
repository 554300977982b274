//! Nested discriminator canonicalization.
//!
//! View generation for single-table hierarchies produces a five-level shape:
//!
//! ```text
//! project            case over boolean flag columns -> entity constructors
//!   filter           disjunction of flag-column references
//!     project        flag columns defined as `case when Disc = v then TRUE
//!                    else FALSE`, plus pass-through columns
//!       filter       disjunction of `Disc = v` tests
//!         <source>
//! ```
//!
//! Downstream consumers expect the equivalent single-level shape: one filter
//! directly on the discriminator column, projected into entity constructors
//! selected by `case when Disc = v then EntityN() ...`.
//!
//! The recognizer is exact. Every step returns `None` on the slightest
//! deviation -- an extra predicate term, a flag without a matching
//! discriminator test, a constructor argument that is not derivable from the
//! pass-through columns -- and a failed step leaves the whole tree untouched.
//! Cast literals are accepted and coerced through the discriminator's
//! primitive kind. Overlapping candidates are not processed: after the
//! outermost instance rewrites, re-entry is disabled for the invocation.

use crate::error::Result;
use crate::expressions::{ComparisonOp, ExprRef, Expression, ExpressionBinding, Project};
use crate::traversal::map_children;
use crate::types::{DataType, ScalarValue};
use std::collections::HashMap;

use super::collapse_projections::binds_variable;
use super::rules::{Rule, RulePolicy};
use super::simplifier::SimplifyContext;

pub struct CanonicalizeDiscriminator;

impl<'a> Rule<SimplifyContext<'a>> for CanonicalizeDiscriminator {
    fn name(&self) -> &'static str {
        "canonicalize_discriminator"
    }

    fn should_process(&self, expr: &ExprRef, ctx: &SimplifyContext<'a>) -> bool {
        if ctx.discriminator_rewritten {
            return false;
        }
        // Project(Filter(Project(Filter(..)))) with a case capping projection
        let Some(outer) = expr.as_project() else {
            return false;
        };
        if outer.projection.as_case().is_none() {
            return false;
        }
        let Some(filter) = outer.input.expression.as_filter() else {
            return false;
        };
        let Some(inner) = filter.input.expression.as_project() else {
            return false;
        };
        inner.input.expression.as_filter().is_some()
    }

    fn try_process(
        &self,
        expr: &ExprRef,
        ctx: &mut SimplifyContext<'a>,
    ) -> Result<Option<ExprRef>> {
        let Some(rewritten) = match_and_rewrite(expr)? else {
            return Ok(None);
        };
        ctx.discriminator_rewritten = true;
        Ok(Some(rewritten))
    }

    fn policy(&self) -> RulePolicy {
        RulePolicy::Reset
    }
}

/// A flag column definition: `case when <var>.<discriminator> = <value> then
/// TRUE else FALSE`
struct FlagDefinition {
    discriminator: String,
    value: ScalarValue,
}

fn match_and_rewrite(expr: &ExprRef) -> Result<Option<ExprRef>> {
    let Some(outer) = expr.as_project() else {
        return Ok(None);
    };
    let Some(flag_filter) = outer.input.expression.as_filter() else {
        return Ok(None);
    };
    let Some(flag_project) = flag_filter.input.expression.as_project() else {
        return Ok(None);
    };
    let Some(disc_filter) = flag_project.input.expression.as_filter() else {
        return Ok(None);
    };

    // Step 1: the flag filter must be a disjunction of distinct boolean flag
    // column references
    let Some(filtered_flags) = flag_references(&flag_filter.predicate, &flag_filter.input.variable)
    else {
        return Ok(None);
    };

    // Step 2: the flag projection must define every flag column as a
    // discriminator equality case, and everything else as a pass-through
    let Some((flags, passthrough)) = classify_columns(flag_project) else {
        return Ok(None);
    };
    let Some(discriminator) = common_discriminator(&flags) else {
        return Ok(None);
    };

    // The filtered flags must be exactly the defined flags
    if filtered_flags.len() != flags.len()
        || !filtered_flags.iter().all(|name| flags.contains_key(name))
    {
        return Ok(None);
    }

    // Step 3: the discriminator filter's equality tests must correspond 1:1
    // with the flag definitions
    let Some(tests) = discriminator_tests(
        &disc_filter.predicate,
        &disc_filter.input.variable,
        &discriminator,
    ) else {
        return Ok(None);
    };
    let defined: Vec<&ScalarValue> = flags.values().map(|flag| &flag.value).collect();
    if !values_match(&defined, &tests) {
        return Ok(None);
    }

    // Step 4: the capping projection must be a case selecting entity
    // constructors on flag references
    let Some(case) = outer.projection.as_case() else {
        return Ok(None);
    };
    let mut selected: Vec<(&FlagDefinition, &ExprRef)> = Vec::with_capacity(case.whens.len());
    let mut seen: Vec<&str> = Vec::with_capacity(case.whens.len());
    for branch in &case.whens {
        let Some(property) = branch.when.as_property() else {
            return Ok(None);
        };
        let Some(var) = property.instance.as_variable_ref() else {
            return Ok(None);
        };
        if var.name != outer.input.variable || seen.contains(&property.name.as_str()) {
            return Ok(None);
        }
        let Some(flag) = flags.get(&property.name) else {
            return Ok(None);
        };
        if !is_entity_constructor(&branch.then) {
            return Ok(None);
        }
        seen.push(&property.name);
        selected.push((flag, &branch.then));
    }
    if seen.len() != flags.len() || !is_entity_constructor(&case.else_expr) {
        return Ok(None);
    }

    // Build the replacement: filter directly on the discriminator, then a
    // case projection keyed on the discriminator
    let source_binding = ExpressionBinding::new(
        disc_filter.input.variable.clone(),
        disc_filter.input.expression.clone(),
    )?;
    let mut predicate: Option<ExprRef> = None;
    for (flag, _) in &selected {
        let test = Expression::eq(
            Expression::property(source_binding.reference(), discriminator.clone())?,
            Expression::constant(flag.value.clone()),
        )?;
        predicate = Some(match predicate {
            Some(prior) => Expression::or(prior, test)?,
            None => test,
        });
    }
    let Some(predicate) = predicate else {
        return Ok(None);
    };
    let filtered = Expression::filter(source_binding, predicate)?;

    let capping_binding =
        ExpressionBinding::new(flag_project.input.variable.clone(), filtered)?;
    let mut whens = Vec::with_capacity(selected.len());
    for (flag, constructor) in &selected {
        let test = Expression::eq(
            Expression::property(capping_binding.reference(), discriminator.clone())?,
            Expression::constant(flag.value.clone()),
        )?;
        let Some(remapped) = remap_constructor(
            constructor,
            &outer.input.variable,
            &passthrough,
            &capping_binding,
        )?
        else {
            return Ok(None);
        };
        whens.push((test, remapped));
    }
    let Some(else_expr) = remap_constructor(
        &case.else_expr,
        &outer.input.variable,
        &passthrough,
        &capping_binding,
    )?
    else {
        return Ok(None);
    };

    let projection = Expression::case_(whens, else_expr)?;
    Expression::project(capping_binding, projection).map(Some)
}

/// Flatten an `Or` chain into its disjuncts
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

/// Every disjunct must be a simple boolean property reference against `var`;
/// returns the distinct column names in predicate order
fn flag_references(predicate: &ExprRef, var: &str) -> Option<Vec<String>> {
    let mut names = Vec::new();
    for term in flatten_or(predicate) {
        let property = term.as_property()?;
        if !property.result_type.is_boolean() {
            return None;
        }
        let instance = property.instance.as_variable_ref()?;
        if instance.name != var || names.contains(&property.name) {
            return None;
        }
        names.push(property.name.clone());
    }
    Some(names)
}

/// Split the flag projection's record columns into flag definitions and
/// pass-through columns (`column -> source property name`)
#[allow(clippy::type_complexity)]
fn classify_columns(
    project: &Project,
) -> Option<(HashMap<String, FlagDefinition>, HashMap<String, String>)> {
    let ctor = project.projection.as_new_instance()?;
    let DataType::Row(row) = &ctor.result_type.data_type else {
        return None;
    };
    let mut flags = HashMap::new();
    let mut passthrough = HashMap::new();
    for ((name, _), argument) in row.fields.iter().zip(&ctor.arguments) {
        if let Some(flag) = flag_definition(argument, &project.input.variable) {
            flags.insert(name.clone(), flag);
        } else if let Some(source) = passthrough_column(argument, &project.input.variable) {
            passthrough.insert(name.clone(), source);
        } else {
            return None;
        }
    }
    if flags.is_empty() {
        return None;
    }
    Some((flags, passthrough))
}

/// `case when <var>.<disc> = <literal> then TRUE else FALSE`
fn flag_definition(argument: &ExprRef, var: &str) -> Option<FlagDefinition> {
    let case = argument.as_case()?;
    if case.whens.len() != 1 {
        return None;
    }
    let branch = &case.whens[0];
    if !branch.then.is_boolean_constant(true) || !case.else_expr.is_boolean_constant(false) {
        return None;
    }
    let Expression::Comparison(comparison) = branch.when.as_ref() else {
        return None;
    };
    if comparison.op != ComparisonOp::Eq {
        return None;
    }
    let property = comparison.left.as_property()?;
    let instance = property.instance.as_variable_ref()?;
    if instance.name != var {
        return None;
    }
    let kind = property.result_type.as_primitive()?;
    let value = literal_value(&comparison.right)?.coerce_to(kind)?;
    Some(FlagDefinition {
        discriminator: property.name.clone(),
        value,
    })
}

/// `<var>.<name>`
fn passthrough_column(argument: &ExprRef, var: &str) -> Option<String> {
    let property = argument.as_property()?;
    let instance = property.instance.as_variable_ref()?;
    if instance.name == var {
        Some(property.name.clone())
    } else {
        None
    }
}

/// A constant, or a cast whose operand is a constant
fn literal_value(expr: &ExprRef) -> Option<ScalarValue> {
    match expr.as_ref() {
        Expression::Constant(constant) => Some(constant.value.clone()),
        Expression::Cast(cast) => match cast.operand.as_ref() {
            Expression::Constant(constant) => Some(constant.value.clone()),
            _ => None,
        },
        _ => None,
    }
}

/// All flag definitions must test one and the same discriminator column
fn common_discriminator(flags: &HashMap<String, FlagDefinition>) -> Option<String> {
    let mut iter = flags.values();
    let first = iter.next()?.discriminator.clone();
    if iter.all(|flag| flag.discriminator == first) {
        Some(first)
    } else {
        None
    }
}

/// Every disjunct must be `<var>.<disc> = <literal>`; returns the coerced
/// test values in predicate order
fn discriminator_tests(
    predicate: &ExprRef,
    var: &str,
    discriminator: &str,
) -> Option<Vec<ScalarValue>> {
    let mut values = Vec::new();
    for term in flatten_or(predicate) {
        let Expression::Comparison(comparison) = term.as_ref() else {
            return None;
        };
        if comparison.op != ComparisonOp::Eq {
            return None;
        }
        let property = comparison.left.as_property()?;
        let instance = property.instance.as_variable_ref()?;
        if instance.name != var || property.name != discriminator {
            return None;
        }
        let kind = property.result_type.as_primitive()?;
        values.push(literal_value(&comparison.right)?.coerce_to(kind)?);
    }
    Some(values)
}

/// Multiset equality of discriminator values
fn values_match(defined: &[&ScalarValue], tested: &[ScalarValue]) -> bool {
    if defined.len() != tested.len() {
        return false;
    }
    let mut remaining: Vec<&ScalarValue> = tested.iter().collect();
    for value in defined {
        match remaining.iter().position(|candidate| candidate == value) {
            Some(index) => {
                remaining.remove(index);
            }
            None => return false,
        }
    }
    true
}

fn is_entity_constructor(expr: &ExprRef) -> bool {
    matches!(
        expr.as_new_instance(),
        Some(ctor) if matches!(ctor.result_type.data_type, DataType::Entity(_))
    )
}

/// Rewrite a constructor's arguments to read pass-through columns directly
/// from the new binding. `None` when an argument is not derivable.
fn remap_constructor(
    expr: &ExprRef,
    var: &str,
    passthrough: &HashMap<String, String>,
    binding: &ExpressionBinding,
) -> Result<Option<ExprRef>> {
    if let Some(property) = expr.as_property() {
        if let Some(instance) = property.instance.as_variable_ref() {
            if instance.name == var {
                return match passthrough.get(&property.name) {
                    Some(source) => {
                        Expression::property(binding.reference(), source.clone()).map(Some)
                    }
                    None => Ok(None),
                };
            }
        }
    }
    if let Some(reference) = expr.as_variable_ref() {
        if reference.name == var {
            return Ok(None);
        }
    }
    if binds_variable(expr, var) {
        return Ok(None);
    }

    let mut doomed = false;
    let result = map_children(expr, &mut |child| {
        if doomed {
            return Ok(child.clone());
        }
        match remap_constructor(child, var, passthrough, binding)? {
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
