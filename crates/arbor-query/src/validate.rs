//! Scope-aware tree validation.
//!
//! The [`Validator`] specializes the rebinding traversal: it resolves the
//! same metadata references (through a [`Rebinder`] against the validation
//! catalog) and additionally tracks variable scopes, parameter references,
//! and the data space of every referenced element.
//!
//! A scope is opened for every binding construct (filter/project/join/apply
//! inputs, group and lambda parameters) and closed on exit. A variable
//! reference must resolve, innermost scope first, to a binding whose
//! established type is *equal* to the reference's declared type -- not merely
//! compatible. Parameter references are collected into a tree-global map and
//! must agree on one type per name.

use crate::error::{Error, Result};
use crate::expressions::{ExprRef, Expression};
use crate::metadata::Catalog;
use crate::rebind::Rebinder;
use crate::traversal::children;
use crate::types::{DataSpace, TypeUsage};
use std::collections::{BTreeMap, HashMap};

/// Validate a tree against a catalog and an expected data space.
///
/// On success, returns the set of distinct parameter name → type bindings
/// discovered in the tree.
pub fn validate(
    tree: &ExprRef,
    catalog: &dyn Catalog,
    expected_space: DataSpace,
) -> Result<BTreeMap<String, TypeUsage>> {
    let mut validator = Validator::new(catalog, expected_space);
    validator.check(tree)?;
    Ok(validator.parameters)
}

/// Scope-validating rebinder. One instance validates one tree.
pub struct Validator<'a> {
    rebinder: Rebinder<'a>,
    expected_space: DataSpace,
    scopes: Vec<HashMap<String, TypeUsage>>,
    parameters: BTreeMap<String, TypeUsage>,
}

impl<'a> Validator<'a> {
    pub fn new(catalog: &'a dyn Catalog, expected_space: DataSpace) -> Self {
        Self {
            rebinder: Rebinder::new(catalog),
            expected_space,
            scopes: Vec::new(),
            parameters: BTreeMap::new(),
        }
    }

    fn push_scope(&mut self, entries: &[(&str, &TypeUsage)]) {
        let mut scope = HashMap::with_capacity(entries.len());
        for (name, usage) in entries {
            scope.insert((*name).to_string(), (*usage).clone());
        }
        self.scopes.push(scope);
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn resolve(&self, name: &str) -> Option<&TypeUsage> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    fn check_space(&self, usage: &TypeUsage) -> Result<()> {
        match usage.named_space() {
            Some(space) if space != self.expected_space => Err(Error::space_violation(
                usage.describe(),
                self.expected_space.to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Validate one node and its subtree
    pub fn check(&mut self, expr: &ExprRef) -> Result<()> {
        match expr.as_ref() {
            Expression::Constant(_) => Ok(()),

            Expression::Null(n) => self.check_space(&n.result_type),

            Expression::VariableRef(v) => {
                let established = self
                    .resolve(&v.name)
                    .ok_or_else(|| Error::reference_invalid(v.name.clone()))?;
                if established != &v.result_type {
                    return Err(Error::reference_type_mismatch(v.name.clone()));
                }
                Ok(())
            }

            Expression::ParameterRef(p) => {
                self.check_space(&p.result_type)?;
                match self.parameters.get(&p.name) {
                    Some(existing) if existing != &p.result_type => {
                        Err(Error::incompatible_parameters(p.name.clone()))
                    }
                    Some(_) => Ok(()),
                    None => {
                        self.parameters.insert(p.name.clone(), p.result_type.clone());
                        Ok(())
                    }
                }
            }

            Expression::Scan(s) => {
                self.rebinder.rebind_entity_set(&s.entity_set)?;
                if s.entity_set.element_type.space != self.expected_space {
                    return Err(Error::space_violation(
                        s.entity_set.qualified_name(),
                        self.expected_space.to_string(),
                    ));
                }
                Ok(())
            }

            Expression::FunctionCall(call) => {
                self.rebinder.rebind_function(&call.function)?;
                if call.function.space != self.expected_space {
                    return Err(Error::space_violation(
                        call.function.qualified_name(),
                        self.expected_space.to_string(),
                    ));
                }
                for argument in &call.arguments {
                    self.check(argument)?;
                }
                Ok(())
            }

            Expression::Treat(r) | Expression::Cast(r) => {
                self.check_space(&r.result_type)?;
                self.check(&r.operand)
            }

            Expression::NewInstance(n) => {
                self.check_space(&n.result_type)?;
                for argument in &n.arguments {
                    self.check(argument)?;
                }
                for rel in &n.related_refs {
                    self.check(&rel.reference)?;
                }
                Ok(())
            }

            Expression::Ref(r) => {
                self.rebinder.rebind_entity_set(&r.entity_set)?;
                if r.entity_set.element_type.space != self.expected_space {
                    return Err(Error::space_violation(
                        r.entity_set.qualified_name(),
                        self.expected_space.to_string(),
                    ));
                }
                for value in &r.key_values {
                    self.check(value)?;
                }
                Ok(())
            }

            Expression::RelationshipNav(nav) => {
                self.rebinder.rebind_relationship(&nav.relationship)?;
                self.check_space(&nav.result_type)?;
                self.check(&nav.source)
            }

            Expression::Filter(f) => {
                self.check(&f.input.expression)?;
                self.push_scope(&[(&f.input.variable, &f.input.variable_type)]);
                let result = self.check(&f.predicate);
                self.pop_scope();
                result
            }
            Expression::Project(p) => {
                self.check(&p.input.expression)?;
                self.push_scope(&[(&p.input.variable, &p.input.variable_type)]);
                let result = self.check(&p.projection);
                self.pop_scope();
                result
            }
            Expression::CrossJoin(c) => {
                for binding in &c.inputs {
                    self.check(&binding.expression)?;
                }
                Ok(())
            }
            Expression::Join(j) => {
                self.check(&j.left.expression)?;
                self.check(&j.right.expression)?;
                self.push_scope(&[
                    (&j.left.variable, &j.left.variable_type),
                    (&j.right.variable, &j.right.variable_type),
                ]);
                let result = self.check(&j.condition);
                self.pop_scope();
                result
            }
            Expression::Apply(a) => {
                self.check(&a.input.expression)?;
                self.push_scope(&[(&a.input.variable, &a.input.variable_type)]);
                let result = self.check(&a.apply.expression);
                self.pop_scope();
                result
            }
            Expression::GroupBy(g) => {
                self.check(&g.input.expression)?;
                self.push_scope(&[(&g.input.variable, &g.input.variable_type)]);
                let mut result = Ok(());
                for (_, key) in &g.keys {
                    result = self.check(key);
                    if result.is_err() {
                        break;
                    }
                }
                self.pop_scope();
                result?;
                self.push_scope(&[(&g.input.group_variable, &g.input.group_variable_type)]);
                let mut result = Ok(());
                for (_, agg) in &g.aggregates {
                    result = self.check(&agg.argument);
                    if result.is_err() {
                        break;
                    }
                }
                self.pop_scope();
                result
            }
            Expression::Sort(s) => {
                self.check(&s.input.expression)?;
                self.push_scope(&[(&s.input.variable, &s.input.variable_type)]);
                let mut result = Ok(());
                for key in &s.keys {
                    result = self.check(&key.expression);
                    if result.is_err() {
                        break;
                    }
                }
                self.pop_scope();
                result
            }
            Expression::Skip(s) => {
                self.check(&s.input.expression)?;
                self.push_scope(&[(&s.input.variable, &s.input.variable_type)]);
                let mut result = Ok(());
                for key in &s.keys {
                    result = self.check(&key.expression);
                    if result.is_err() {
                        break;
                    }
                }
                self.pop_scope();
                result?;
                // The count is evaluated outside the element scope
                self.check(&s.count)
            }
            Expression::Quantifier(q) => {
                self.check(&q.input.expression)?;
                self.push_scope(&[(&q.input.variable, &q.input.variable_type)]);
                let result = self.check(&q.predicate);
                self.pop_scope();
                result
            }
            Expression::Lambda(l) => {
                for argument in &l.arguments {
                    self.check(argument)?;
                }
                let entries: Vec<(&str, &TypeUsage)> = l
                    .parameters
                    .iter()
                    .map(|(name, usage)| (name.as_str(), usage))
                    .collect();
                self.push_scope(&entries);
                let result = self.check(&l.body);
                self.pop_scope();
                result
            }

            // Remaining kinds carry no scopes or metadata of their own
            _ => {
                for child in children(expr) {
                    self.check(child)?;
                }
                Ok(())
            }
        }
    }
}
