use crate::config::rule::RuleId;
use std::collections::{BTreeMap, HashSet, VecDeque};

/// Per-session mutable state, owned by the engine's control task.
#[derive(Debug)]
pub struct SessionState {
    fired_once: HashSet<RuleId>,
    fire_counts: BTreeMap<RuleId, usize>,
    history: VecDeque<String>,
    /// Lines kept before the latest one
    history_lines: usize,
    alive: bool,
    lines_seen: usize,
}

impl SessionState {
    pub fn new(history_lines: usize) -> Self {
        Self {
            fired_once: HashSet::new(),
            fire_counts: BTreeMap::new(),
            history: VecDeque::with_capacity(history_lines.saturating_add(1).min(1024)),
            history_lines,
            alive: true,
            lines_seen: 0,
        }
    }

    pub fn has_fired(&self, id: RuleId) -> bool {
        self.fired_once.contains(&id)
    }

    /// Record a `once` rule as spent. Returns false if it already was.
    pub fn mark_fired(&mut self, id: RuleId) -> bool {
        self.fired_once.insert(id)
    }

    pub fn record_fire(&mut self, id: RuleId) {
        *self.fire_counts.entry(id).or_insert(0) += 1;
    }

    pub fn fire_count(&self, id: RuleId) -> usize {
        self.fire_counts.get(&id).copied().unwrap_or(0)
    }

    pub fn fire_counts(&self) -> &BTreeMap<RuleId, usize> {
        &self.fire_counts
    }

    pub fn total_fires(&self) -> usize {
        self.fire_counts.values().sum()
    }

    /// Append a line to the history ring, evicting the oldest when full.
    ///
    /// The ring holds the latest line plus `history_lines` before it.
    pub fn push_line(&mut self, line: &str) {
        self.lines_seen += 1;
        if self.history.len() > self.history_lines {
            self.history.pop_front();
        }
        self.history.push_back(line.to_string());
    }

    /// The latest line plus up to `window` lines before it, oldest first.
    pub fn context(&self, window: usize) -> Vec<&str> {
        let take = (window + 1).min(self.history.len());
        self.history
            .iter()
            .skip(self.history.len() - take)
            .map(String::as_str)
            .collect()
    }

    /// Upload payload for a match on `line`: up to `window` lines before it,
    /// then the line itself, whether or not history retained it.
    ///
    /// An empty `line` (silence rules) yields the tail of the history.
    pub fn context_for<'a>(&'a self, line: &'a str, window: usize) -> Vec<&'a str> {
        if line.is_empty() {
            return self.context(window);
        }
        let mut before: Vec<&str> = self.history.iter().map(String::as_str).collect();
        if before.last() == Some(&line) {
            before.pop();
        }
        let mut lines = before.split_off(before.len().saturating_sub(window));
        lines.push(line);
        lines
    }

    pub fn lines_seen(&self) -> usize {
        self.lines_seen
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn set_alive(&mut self, alive: bool) {
        self.alive = alive;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_bounded() {
        let mut state = SessionState::new(3);
        for line in ["a", "b", "c", "d", "e"] {
            state.push_line(line);
        }
        assert_eq!(state.context(10), vec!["b", "c", "d", "e"]);
        assert_eq!(state.context(3), vec!["b", "c", "d", "e"]);
        assert_eq!(state.context(1), vec!["d", "e"]);
        assert_eq!(state.context(0), vec!["e"]);
        assert_eq!(state.lines_seen(), 5);
    }

    #[test]
    fn test_once_bookkeeping() {
        let mut state = SessionState::new(10);
        assert!(!state.has_fired(RuleId(2)));
        assert!(state.mark_fired(RuleId(2)));
        assert!(!state.mark_fired(RuleId(2)));
        assert!(state.has_fired(RuleId(2)));
    }

    #[test]
    fn test_fire_counts() {
        let mut state = SessionState::new(10);
        state.record_fire(RuleId(0));
        state.record_fire(RuleId(0));
        state.record_fire(RuleId(4));
        assert_eq!(state.fire_count(RuleId(0)), 2);
        assert_eq!(state.fire_count(RuleId(1)), 0);
        assert_eq!(state.total_fires(), 3);
    }

    #[test]
    fn test_zero_history_keeps_latest_line() {
        let mut state = SessionState::new(0);
        state.push_line("x");
        state.push_line("y");
        assert_eq!(state.context(5), vec!["y"]);
        assert_eq!(state.lines_seen(), 2);
    }

    #[test]
    fn test_context_for_always_includes_matched_line() {
        let mut state = SessionState::new(2);
        for line in ["a", "b", "c"] {
            state.push_line(line);
        }
        assert_eq!(state.context_for("c", 2), vec!["a", "b", "c"]);
        assert_eq!(state.context_for("c", 1), vec!["b", "c"]);
        assert_eq!(state.context_for("c", 0), vec!["c"]);
        // A line missing from history is still appended
        assert_eq!(state.context_for("z", 1), vec!["c", "z"]);
        assert_eq!(state.context_for("", 1), vec!["b", "c"]);

        let empty = SessionState::new(0);
        assert_eq!(empty.context_for("use code ABCD-1234", 3), vec!["use code ABCD-1234"]);
    }
}
