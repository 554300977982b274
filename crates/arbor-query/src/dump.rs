//! Diagnostic tree dumping.
//!
//! The core does not serialize trees to any text or wire format itself;
//! instead it drives a pull-based visitor contract ([`TreeDumper`]) in a
//! well-nested fashion mirroring tree structure. External formatters (XML,
//! indented text, ...) implement the contract; [`IndentDumper`] is the
//! reference implementation used by tests and examples.

use crate::expressions::{ExprRef, Expression};
use crate::traversal::children;
use std::fmt::Write;

/// Pull-based dump contract. `begin`/`end` calls are strictly well-nested;
/// `visit` is called exactly once per node, between its `begin` and the
/// traversal of its children.
pub trait TreeDumper {
    /// A node of the given kind is entered; `attrs` carries the node's
    /// non-structural details (names, operators, metadata references)
    fn begin(&mut self, name: &str, attrs: &[(&'static str, String)]);

    /// The node itself, for dumpers that want type or identity information
    fn visit(&mut self, node: &ExprRef);

    /// The node opened by the matching `begin` is left
    fn end(&mut self, name: &str);
}

/// Drive a dumper over a tree, mirroring its structure
pub fn dump(tree: &ExprRef, dumper: &mut dyn TreeDumper) {
    let name = tree.kind_name();
    dumper.begin(name, &attributes(tree));
    dumper.visit(tree);
    for child in children(tree) {
        dump(child, dumper);
    }
    dumper.end(name);
}

/// Non-structural attributes of a node, used by `dump`
fn attributes(expr: &ExprRef) -> Vec<(&'static str, String)> {
    match expr.as_ref() {
        Expression::Constant(c) => vec![("value", c.value.to_string())],
        Expression::VariableRef(v) => vec![("name", v.name.clone())],
        Expression::ParameterRef(p) => vec![("name", p.name.clone())],
        Expression::Property(p) => vec![("member", p.name.clone())],
        Expression::Scan(s) => vec![("extent", s.entity_set.qualified_name())],
        Expression::Comparison(c) => vec![("op", format!("{:?}", c.op))],
        Expression::Arithmetic(a) => vec![("op", format!("{:?}", a.op))],
        Expression::FunctionCall(f) => vec![("function", f.function.qualified_name())],
        Expression::NewInstance(n) => vec![("type", n.result_type.describe())],
        Expression::Ref(r) => vec![("entity_set", r.entity_set.qualified_name())],
        Expression::RelationshipNav(n) => vec![
            ("relationship", n.relationship.qualified_name()),
            ("from", n.from_role.clone()),
            ("to", n.to_role.clone()),
        ],
        Expression::Filter(f) => vec![("var", f.input.variable.clone())],
        Expression::Project(p) => vec![("var", p.input.variable.clone())],
        Expression::Join(j) => vec![
            ("kind", format!("{:?}", j.kind)),
            ("left_var", j.left.variable.clone()),
            ("right_var", j.right.variable.clone()),
        ],
        Expression::Apply(a) => vec![
            ("kind", format!("{:?}", a.kind)),
            ("input_var", a.input.variable.clone()),
            ("apply_var", a.apply.variable.clone()),
        ],
        Expression::GroupBy(g) => vec![
            ("var", g.input.variable.clone()),
            ("group_var", g.input.group_variable.clone()),
        ],
        Expression::Sort(s) => vec![("var", s.input.variable.clone())],
        Expression::Skip(s) => vec![("var", s.input.variable.clone())],
        Expression::Quantifier(q) => vec![
            ("kind", format!("{:?}", q.kind)),
            ("var", q.input.variable.clone()),
        ],
        Expression::Treat(r) | Expression::Cast(r) => {
            vec![("target", r.result_type.describe())]
        }
        _ => Vec::new(),
    }
}

/// Indented-text dumper: one line per node, two spaces per depth level
#[derive(Debug, Default)]
pub struct IndentDumper {
    output: String,
    depth: usize,
}

impl IndentDumper {
    pub fn new() -> Self {
        Self::default()
    }

    /// The accumulated text
    pub fn into_output(self) -> String {
        self.output
    }
}

impl TreeDumper for IndentDumper {
    fn begin(&mut self, name: &str, attrs: &[(&'static str, String)]) {
        for _ in 0..self.depth {
            self.output.push_str("  ");
        }
        self.output.push_str(name);
        for (key, value) in attrs {
            let _ = write!(self.output, " {}={}", key, value);
        }
        self.output.push('\n');
        self.depth += 1;
    }

    fn visit(&mut self, _node: &ExprRef) {}

    fn end(&mut self, _name: &str) {
        self.depth -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expressions::ExpressionBinding;
    use crate::metadata::EntitySet;
    use crate::types::{DataSpace, EntityType, TypeUsage};
    use std::sync::Arc;

    fn sample_tree() -> ExprRef {
        let order = Arc::new(EntityType {
            namespace: "Model".to_string(),
            name: "Order".to_string(),
            space: DataSpace::Model,
            base_type: None,
            key_members: vec!["Id".to_string()],
            properties: vec![("Id".to_string(), TypeUsage::int32())],
        });
        let binding = ExpressionBinding::new(
            "o",
            Expression::scan(EntitySet::new("Container", "Orders", order)),
        )
        .unwrap();
        let predicate = Expression::eq(
            Expression::property(binding.reference(), "Id").unwrap(),
            Expression::int32(1),
        )
        .unwrap();
        Expression::filter(binding, predicate).unwrap()
    }

    /// Records begin/end events to check nesting
    #[derive(Default)]
    struct NestingChecker {
        open: Vec<String>,
        events: usize,
        max_depth: usize,
    }

    impl TreeDumper for NestingChecker {
        fn begin(&mut self, name: &str, _attrs: &[(&'static str, String)]) {
            self.open.push(name.to_string());
            self.max_depth = self.max_depth.max(self.open.len());
            self.events += 1;
        }

        fn visit(&mut self, _node: &ExprRef) {}

        fn end(&mut self, name: &str) {
            let opened = self.open.pop().expect("end without begin");
            assert_eq!(opened, name, "mismatched begin/end");
        }
    }

    #[test]
    fn test_dump_is_well_nested() {
        let tree = sample_tree();
        let mut checker = NestingChecker::default();
        dump(&tree, &mut checker);
        assert!(checker.open.is_empty());
        assert_eq!(checker.events, 6);
        assert!(checker.max_depth >= 3);
    }

    #[test]
    fn test_indent_dumper_output() {
        let tree = sample_tree();
        let mut dumper = IndentDumper::new();
        dump(&tree, &mut dumper);
        let text = dumper.into_output();
        assert!(text.starts_with("Filter var=o\n"));
        assert!(text.contains("  Scan extent=Container.Orders"));
        assert!(text.contains("    Property member=Id"));
    }
}
