use crate::config::rule::{CompiledRule, Pattern, RuleId};
use crate::ruler::RuleSet;
use crate::ruler::session::SessionState;
use std::collections::HashSet;
use tokio::time::Instant;

/// A rule selected for execution, with what it matched.
#[derive(Debug, Clone)]
pub struct RuleMatch<'r> {
    pub rule: &'r CompiledRule,
    /// The logical line that triggered the rule (empty for silence rules)
    pub line: String,
    /// Matched portion of the line
    pub matched: String,
    /// Regex capture groups 1..N; unmatched optional groups are empty
    pub captures: Vec<String>,
}

impl<'r> RuleMatch<'r> {
    fn silence(rule: &'r CompiledRule) -> Self {
        Self {
            rule,
            line: String::new(),
            matched: String::new(),
            captures: Vec::new(),
        }
    }
}

/// Matches a logical line against the rule set in definition order.
///
/// Timeout rules and spent `once` rules are skipped. Evaluation stops at the
/// first exclusive match, so the result holds at most one exclusive rule,
/// preceded by any non-exclusive rules that matched before it. A selected
/// `once` rule is marked as fired before it is returned.
pub fn decide<'r>(line: &str, rules: &'r RuleSet, state: &mut SessionState) -> Vec<RuleMatch<'r>> {
    let mut matches = Vec::new();

    for rule in rules {
        let Some(pattern) = rule.pattern() else {
            continue;
        };
        if rule.once && state.has_fired(rule.id) {
            continue;
        }

        let Some((matched, captures)) = match_pattern(pattern, line) else {
            continue;
        };

        tracing::debug!(
            "✅ Rule {} matched {:?} in {:?}",
            rule.id,
            pattern.as_str(),
            line
        );

        if rule.once {
            state.mark_fired(rule.id);
        }
        matches.push(RuleMatch {
            rule,
            line: line.to_string(),
            matched,
            captures,
        });

        if rule.exclusive {
            break;
        }
    }

    matches
}

fn match_pattern(pattern: &Pattern, line: &str) -> Option<(String, Vec<String>)> {
    match pattern {
        Pattern::Literal(needle) => line
            .contains(needle.as_str())
            .then(|| (needle.clone(), Vec::new())),
        Pattern::Regex(regex) => {
            let caps = regex.captures(line)?;
            let matched = caps.get(0).map(|m| m.as_str().to_string())?;
            let groups = caps
                .iter()
                .skip(1) // Skip the full match (index 0)
                .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
                .collect();
            Some((matched, groups))
        }
    }
}

/// Tracks output silence for `diff_timeout` rules.
///
/// Each silence rule fires at most once per quiet period; new output re-arms
/// all of them.
#[derive(Debug)]
pub struct TimeoutState {
    last_activity: Instant,
    fired_this_period: HashSet<RuleId>,
}

impl TimeoutState {
    pub fn new() -> Self {
        Self {
            last_activity: Instant::now(),
            fired_this_period: HashSet::new(),
        }
    }

    pub fn reset_activity(&mut self) {
        self.last_activity = Instant::now();
        self.fired_this_period.clear();
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    fn is_armed(&self, rule: &CompiledRule, state: &SessionState) -> bool {
        !self.fired_this_period.contains(&rule.id) && !(rule.once && state.has_fired(rule.id))
    }

    /// Earliest instant at which an armed silence rule becomes due.
    pub fn next_deadline(&self, rules: &RuleSet, state: &SessionState) -> Option<Instant> {
        rules
            .timeout_rules()
            .filter(|(rule, _)| self.is_armed(rule, state))
            .filter_map(|(_, timeout)| self.last_activity.checked_add(timeout))
            .min()
    }

    /// Silence rules that are due at `now`, in definition order.
    pub fn due_rules<'r>(
        &mut self,
        rules: &'r RuleSet,
        state: &mut SessionState,
        now: Instant,
    ) -> Vec<RuleMatch<'r>> {
        let elapsed = now.saturating_duration_since(self.last_activity);
        let mut due = Vec::new();

        for (rule, timeout) in rules.timeout_rules() {
            if elapsed < timeout || !self.is_armed(rule, state) {
                continue;
            }
            tracing::info!("⏰ Silence rule {} due after {:?}", rule.id, timeout);
            self.fired_this_period.insert(rule.id);
            if rule.once {
                state.mark_fired(rule.id);
            }
            due.push(RuleMatch::silence(rule));
        }

        due
    }
}

impl Default for TimeoutState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::rule::Rule;
    use std::time::Duration;

    fn rule(yaml: &str) -> Rule {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn rule_set(rules: &[&str]) -> RuleSet {
        RuleSet::new(
            rules
                .iter()
                .enumerate()
                .map(|(i, yaml)| rule(yaml).compile(RuleId(i)).unwrap())
                .collect(),
        )
    }

    fn ids(matches: &[RuleMatch<'_>]) -> Vec<usize> {
        matches.iter().map(|m| m.rule.id.0).collect()
    }

    #[test]
    fn test_no_match_returns_nothing() {
        let rules = rule_set(&["{pattern: login, actions: [enter]}"]);
        let mut state = SessionState::new(10);
        assert!(decide("nothing to see", &rules, &mut state).is_empty());
    }

    #[test]
    fn test_earlier_rule_wins() {
        let rules = rule_set(&[
            "{pattern: 'Sign in', actions: [enter]}",
            "{pattern: 'in', actions: [down]}",
        ]);
        let mut state = SessionState::new(10);
        let matches = decide("Sign in to continue", &rules, &mut state);
        assert_eq!(ids(&matches), vec![0]);
    }

    #[test]
    fn test_literal_match_is_case_sensitive() {
        let rules = rule_set(&["{pattern: Login, actions: [enter]}"]);
        let mut state = SessionState::new(10);
        assert!(decide("please login", &rules, &mut state).is_empty());
        assert_eq!(decide("Login:", &rules, &mut state).len(), 1);
    }

    #[test]
    fn test_once_rule_fires_once() {
        let rules = rule_set(&["{pattern: 'machine?', once: true, actions: ['string:kali', enter]}"]);
        let mut state = SessionState::new(10);
        assert_eq!(decide("name this machine?", &rules, &mut state).len(), 1);
        assert!(state.has_fired(RuleId(0)));
        assert!(decide("name this machine?", &rules, &mut state).is_empty());
    }

    #[test]
    fn test_spent_once_rule_lets_later_rule_match() {
        let rules = rule_set(&[
            "{pattern: prompt, once: true, actions: [enter]}",
            "{pattern: prompt, actions: [down]}",
        ]);
        let mut state = SessionState::new(10);
        assert_eq!(ids(&decide("prompt", &rules, &mut state)), vec![0]);
        assert_eq!(ids(&decide("prompt", &rules, &mut state)), vec![1]);
    }

    #[test]
    fn test_non_exclusive_rule_continues_evaluation() {
        let rules = rule_set(&[
            "{pattern: code, exclusive: false, upload: true}",
            "{pattern: code, actions: [enter]}",
            "{pattern: code, actions: [down]}",
        ]);
        let mut state = SessionState::new(10);
        assert_eq!(ids(&decide("use code ABCD", &rules, &mut state)), vec![0, 1]);
    }

    #[test]
    fn test_regex_captures_groups() {
        let rules = rule_set(&[r#"{pattern: 'code ([A-Z0-9]{4})-([A-Z0-9]{4})', regex: true, upload: true}"#]);
        let mut state = SessionState::new(10);
        let matches = decide("enter the code AB12-CD34 to authenticate", &rules, &mut state);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].matched, "code AB12-CD34");
        assert_eq!(matches[0].captures, vec!["AB12", "CD34"]);
    }

    #[test]
    fn test_timeout_rules_ignored_for_lines() {
        let rules = rule_set(&["{diff_timeout: 1s, actions: [enter]}"]);
        let mut state = SessionState::new(10);
        assert!(decide("anything", &rules, &mut state).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_rule_due_once_per_quiet_period() {
        let rules = rule_set(&[
            "{pattern: x, actions: [enter]}",
            "{diff_timeout: 2s, actions: [enter]}",
            "{diff_timeout: 5s, once: true, actions: [ctrl-c]}",
        ]);
        let mut state = SessionState::new(10);
        let mut timeouts = TimeoutState::new();
        let start = timeouts.last_activity();

        assert_eq!(
            timeouts.next_deadline(&rules, &state),
            Some(start + Duration::from_secs(2))
        );
        assert!(timeouts
            .due_rules(&rules, &mut state, start + Duration::from_secs(1))
            .is_empty());

        let due = timeouts.due_rules(&rules, &mut state, start + Duration::from_secs(2));
        assert_eq!(ids(&due), vec![1]);
        assert_eq!(
            timeouts.next_deadline(&rules, &state),
            Some(start + Duration::from_secs(5))
        );

        let due = timeouts.due_rules(&rules, &mut state, start + Duration::from_secs(6));
        assert_eq!(ids(&due), vec![2]);
        assert_eq!(timeouts.next_deadline(&rules, &state), None);

        // New output re-arms the repeating rule but not the spent once rule
        tokio::time::advance(Duration::from_secs(10)).await;
        timeouts.reset_activity();
        let now = timeouts.last_activity();
        assert_eq!(
            timeouts.next_deadline(&rules, &state),
            Some(now + Duration::from_secs(2))
        );
        let due = timeouts.due_rules(&rules, &mut state, now + Duration::from_secs(60));
        assert_eq!(ids(&due), vec![1]);
    }
}
