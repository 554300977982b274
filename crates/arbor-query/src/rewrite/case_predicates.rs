//! Case-predicate simplification.
//!
//! A `when` operand that is itself the trivial boolean case
//! `case when P then TRUE else FALSE` carries no information beyond `P`;
//! this rule replaces the operand with `P` directly. The simplification is
//! per-branch and the case expression is rebuilt only when at least one
//! branch actually simplified.
//!
//! The inner case must have exactly one branch, a literal `TRUE` in its
//! `then`, and a literal `FALSE` in its `else`; anything else is left alone.

use crate::error::Result;
use crate::expressions::{ExprRef, Expression};

use super::rules::{Rule, RulePolicy};
use super::simplifier::SimplifyContext;

pub struct SimplifyCasePredicates;

impl<'a> Rule<SimplifyContext<'a>> for SimplifyCasePredicates {
    fn name(&self) -> &'static str {
        "simplify_case_predicates"
    }

    fn should_process(&self, expr: &ExprRef, _ctx: &SimplifyContext<'a>) -> bool {
        matches!(
            expr.as_case(),
            Some(case) if case.whens.iter().any(|b| trivial_boolean_case(&b.when).is_some())
        )
    }

    fn try_process(
        &self,
        expr: &ExprRef,
        _ctx: &mut SimplifyContext<'a>,
    ) -> Result<Option<ExprRef>> {
        let Some(case) = expr.as_case() else {
            return Ok(None);
        };
        let mut changed = false;
        let mut whens = Vec::with_capacity(case.whens.len());
        for branch in &case.whens {
            match trivial_boolean_case(&branch.when) {
                Some(predicate) => {
                    changed = true;
                    whens.push((predicate.clone(), branch.then.clone()));
                }
                None => whens.push((branch.when.clone(), branch.then.clone())),
            }
        }
        if !changed {
            return Ok(None);
        }
        Expression::case_(whens, case.else_expr.clone()).map(Some)
    }

    fn policy(&self) -> RulePolicy {
        RulePolicy::Continue
    }
}

/// `case when P then TRUE else FALSE` => `P`
fn trivial_boolean_case(expr: &ExprRef) -> Option<&ExprRef> {
    let case = expr.as_case()?;
    if case.whens.len() != 1 {
        return None;
    }
    let branch = &case.whens[0];
    if branch.then.is_boolean_constant(true) && case.else_expr.is_boolean_constant(false) {
        Some(&branch.when)
    } else {
        None
    }
}
