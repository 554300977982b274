//! Rule-driven pattern-match rewriting.
//!
//! A [`Rule`] is a predicate over a node plus a transform returning either a
//! replacement node or "no match", together with a declared continuation
//! policy. The [`RuleProcessor`] applies an ordered rule list to a node and
//! its whole subtree:
//!
//! - rules run against a node *before* descending into its children
//!   (pre-pass), then the children are transformed recursively, then rules
//!   run again against the reconstructed node (post-pass) -- giving rules a
//!   chance to match patterns only visible after subtree simplification;
//! - within a pass, rules are scanned in order and the first matching rule's
//!   transform runs. [`RulePolicy::Continue`] keeps the new node and keeps
//!   scanning the remaining rules; [`RulePolicy::Reset`] abandons the scan
//!   and starts a brand-new pass from rule 0 against the new node;
//!   [`RulePolicy::Stop`] finalizes the new node and aborts all further rule
//!   application anywhere in the tree, including ancestors and unvisited
//!   subtrees.
//!
//! Rules are pure functions of the node they are given. Pass-local mutable
//! state (e.g. a run-once flag) lives in the caller-supplied context value
//! threaded through every invocation, so rule objects themselves stay
//! shareable across rewrites.
//!
//! Recursion depth is bounded by tree depth; the trees this engine is run
//! over are machine-generated and shallow.

use crate::error::{Error, Result};
use crate::expressions::ExprRef;
use crate::traversal::map_children;

/// What the engine does after a rule's transform produced a new node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RulePolicy {
    /// Keep the new node and keep scanning the remaining rules in this pass
    Continue,
    /// Restart the scan from rule 0 against the new node
    Reset,
    /// Return the new node as final for the whole traversal
    Stop,
}

/// A rewrite rule: predicate, transform, and continuation policy.
///
/// `try_process` returning `Ok(None)` is the normal "no match" outcome and
/// leaves the node unchanged; errors are reserved for genuinely broken
/// reconstruction and abort the rewrite.
pub trait Rule<C> {
    /// Short name for diagnostics
    fn name(&self) -> &'static str;

    /// Cheap pre-filter; `try_process` runs only when this returns true
    fn should_process(&self, expr: &ExprRef, ctx: &C) -> bool;

    /// Attempt the rewrite. `None` means no match.
    fn try_process(&self, expr: &ExprRef, ctx: &mut C) -> Result<Option<ExprRef>>;

    /// The continuation policy applied after a successful transform
    fn policy(&self) -> RulePolicy;
}

/// Per-pass scan state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassState {
    Applying,
    Reset,
    Stopped,
}

/// Safety bound on Reset loops at a single node. A well-formed rule set
/// converges orders of magnitude below this.
const MAX_RESETS: usize = 100;

/// Applies an ordered rule list over a tree. One processor instance drives
/// one rewrite invocation.
pub struct RuleProcessor<'a, C> {
    rules: &'a [&'a dyn Rule<C>],
    stopped: bool,
}

impl<'a, C> RuleProcessor<'a, C> {
    pub fn new(rules: &'a [&'a dyn Rule<C>]) -> Self {
        Self {
            rules,
            stopped: false,
        }
    }

    /// Whether a Stop-policy rule fired during the last `process` call
    pub fn stopped(&self) -> bool {
        self.stopped
    }

    /// Rewrite a node and its subtree
    pub fn process(&mut self, expr: ExprRef, ctx: &mut C) -> Result<ExprRef> {
        let current = self.apply_rules(expr, ctx)?;
        if self.stopped {
            return Ok(current);
        }
        let current = map_children(&current, &mut |child| {
            if self.stopped {
                Ok(child.clone())
            } else {
                self.process(child.clone(), ctx)
            }
        })?;
        if self.stopped {
            return Ok(current);
        }
        self.apply_rules(current, ctx)
    }

    /// Run scan passes against a single node until a pass completes without
    /// a Reset, or a Stop fires
    fn apply_rules(&mut self, mut current: ExprRef, ctx: &mut C) -> Result<ExprRef> {
        let mut resets = 0;
        loop {
            let mut state = PassState::Applying;
            for rule in self.rules {
                if !rule.should_process(&current, ctx) {
                    continue;
                }
                let Some(next) = rule.try_process(&current, ctx)? else {
                    // No match: fall through to the next rule
                    continue;
                };
                current = next;
                match rule.policy() {
                    RulePolicy::Continue => {}
                    RulePolicy::Reset => {
                        state = PassState::Reset;
                        break;
                    }
                    RulePolicy::Stop => {
                        state = PassState::Stopped;
                        break;
                    }
                }
            }
            match state {
                PassState::Applying => return Ok(current),
                PassState::Stopped => {
                    self.stopped = true;
                    return Ok(current);
                }
                PassState::Reset => {
                    resets += 1;
                    if resets > MAX_RESETS {
                        return Err(Error::internal(
                            "rule processor exceeded the reset bound; a Reset rule keeps matching its own output",
                        ));
                    }
                }
            }
        }
    }
}
