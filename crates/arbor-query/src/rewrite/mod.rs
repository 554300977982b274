//! Rule-based tree rewriting.
//!
//! The engine ([`rules`]) applies an ordered rule list over a tree with
//! pre- and post-passes per node and three continuation policies; the view
//! simplifier ([`simplifier`]) is its fixed four-rule production
//! configuration.

/// Case-predicate simplification
pub mod case_predicates;
/// Nested-projection collapse
pub mod collapse_projections;
/// Nested discriminator canonicalization
pub mod discriminator;
/// Foreign-key related-reference injection
pub mod related_references;
/// Rule trait, continuation policies, and the processor
pub mod rules;
/// The fixed view-simplification pipeline
pub mod simplifier;

pub use case_predicates::SimplifyCasePredicates;
pub use collapse_projections::CollapseNestedProjections;
pub use discriminator::CanonicalizeDiscriminator;
pub use related_references::AddRelatedEntityRefs;
pub use rules::{Rule, RulePolicy, RuleProcessor};
pub use simplifier::{simplify_view, SimplifyContext};
