pub mod decision;
pub mod execution;
pub mod session;

use crate::config::rule::{CompiledRule, RuleId};
use std::sync::Arc;
use std::time::Duration;

pub use decision::{RuleMatch, TimeoutState, decide};
pub use execution::execute_rule;
pub use session::SessionState;

/// Ordered, immutable set of compiled rules. Cloning shares the rules.
///
/// Definition order is priority order: when two rules match the same line the
/// earlier one wins.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Arc<Vec<CompiledRule>>,
}

impl RuleSet {
    pub fn new(rules: Vec<CompiledRule>) -> Self {
        Self {
            rules: Arc::new(rules),
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompiledRule> {
        self.rules.iter()
    }

    pub fn get(&self, id: RuleId) -> Option<&CompiledRule> {
        self.rules.get(id.0)
    }

    /// Rules fired by output silence rather than by a line.
    pub fn timeout_rules(&self) -> impl Iterator<Item = (&CompiledRule, Duration)> {
        self.rules
            .iter()
            .filter_map(|rule| rule.diff_timeout().map(|d| (rule, d)))
    }

    pub fn has_timeout_rules(&self) -> bool {
        self.timeout_rules().next().is_some()
    }
}

impl<'a> IntoIterator for &'a RuleSet {
    type Item = &'a CompiledRule;
    type IntoIter = std::slice::Iter<'a, CompiledRule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}
