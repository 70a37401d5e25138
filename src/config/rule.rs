use crate::config::helper::parse_duration;
use crate::config::types::{Action, parse_action};
use anyhow::{Context, Result, anyhow};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// YAML structure for loading rules
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Rule {
    #[serde(default, alias = "match", alias = "when")]
    pub pattern: Option<String>,
    #[serde(default)]
    pub diff_timeout: Option<String>,
    #[serde(default)]
    pub regex: bool,
    #[serde(default)]
    pub once: bool,
    #[serde(default)]
    pub upload: bool,
    #[serde(default = "default_exclusive")]
    pub exclusive: bool,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default, alias = "action")]
    pub actions: Vec<String>,
}

fn default_exclusive() -> bool {
    true
}

/// Position of a rule in its rule set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RuleId(pub usize);

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0 + 1)
    }
}

#[derive(Debug, Clone)]
pub enum Pattern {
    /// Case-sensitive substring containment
    Literal(String),
    Regex(Regex),
}

impl Pattern {
    pub fn as_str(&self) -> &str {
        match self {
            Pattern::Literal(s) => s,
            Pattern::Regex(regex) => regex.as_str(),
        }
    }
}

// What makes a compiled rule fire
#[derive(Debug, Clone)]
pub enum RuleTrigger {
    Pattern(Pattern),
    DiffTimeout(Duration),
}

// Compiled structure for runtime use
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub id: RuleId,
    pub label: String,
    pub trigger: RuleTrigger,
    pub once: bool,
    pub upload: bool,
    pub exclusive: bool,
    pub actions: Vec<Action>,
}

impl CompiledRule {
    pub fn pattern(&self) -> Option<&Pattern> {
        match &self.trigger {
            RuleTrigger::Pattern(pattern) => Some(pattern),
            RuleTrigger::DiffTimeout(_) => None,
        }
    }

    pub fn diff_timeout(&self) -> Option<Duration> {
        match self.trigger {
            RuleTrigger::DiffTimeout(d) => Some(d),
            RuleTrigger::Pattern(_) => None,
        }
    }
}

impl Rule {
    /// Shown in error messages before the rule has compiled.
    pub fn describe(&self) -> String {
        match (&self.label, &self.pattern, &self.diff_timeout) {
            (Some(label), _, _) => label.clone(),
            (None, Some(pattern), _) => format!("{pattern:?}"),
            (None, None, Some(timeout)) => format!("diff_timeout {timeout}"),
            (None, None, None) => "<empty rule>".to_string(),
        }
    }

    pub fn compile(&self, id: RuleId) -> Result<CompiledRule> {
        let trigger = match (&self.pattern, &self.diff_timeout) {
            (Some(pattern), None) => {
                if pattern.is_empty() {
                    return Err(anyhow!("Rule pattern must not be empty"));
                }
                let pattern = if self.regex {
                    let regex = Regex::new(pattern)
                        .with_context(|| format!("Invalid regex pattern: {}", pattern))?;
                    Pattern::Regex(regex)
                } else {
                    Pattern::Literal(pattern.clone())
                };
                RuleTrigger::Pattern(pattern)
            }
            (None, Some(timeout_str)) => {
                let duration = parse_duration(timeout_str)?;
                if duration.is_zero() {
                    return Err(anyhow!("diff_timeout must be greater than zero"));
                }
                RuleTrigger::DiffTimeout(duration)
            }
            (Some(_), Some(_)) => {
                return Err(anyhow!(
                    "Rule cannot have both 'pattern' and 'diff_timeout' fields"
                ));
            }
            (None, None) => {
                return Err(anyhow!(
                    "Rule must have either 'pattern' or 'diff_timeout' field"
                ));
            }
        };

        if self.actions.is_empty() && !self.upload {
            return Err(anyhow!("Rule must have actions or 'upload: true'"));
        }

        let actions = self
            .actions
            .iter()
            .map(|token| parse_action(token))
            .collect::<Result<Vec<_>>>()?;

        let label = match (&self.label, &trigger) {
            (Some(label), _) => label.clone(),
            (None, RuleTrigger::Pattern(pattern)) => pattern.as_str().to_string(),
            (None, RuleTrigger::DiffTimeout(d)) => format!("diff_timeout:{}ms", d.as_millis()),
        };

        Ok(CompiledRule {
            id,
            label,
            trigger,
            once: self.once,
            upload: self.upload,
            exclusive: self.exclusive,
            actions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::Key;

    fn pattern_rule(pattern: &str, actions: &[&str]) -> Rule {
        Rule {
            pattern: Some(pattern.to_string()),
            diff_timeout: None,
            regex: false,
            once: false,
            upload: false,
            exclusive: true,
            label: None,
            actions: actions.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_rule_compilation_literal_pattern() {
        let compiled = pattern_rule("login", &["down", "enter"])
            .compile(RuleId(0))
            .unwrap();
        assert_eq!(compiled.label, "login");
        assert!(matches!(
            compiled.pattern(),
            Some(Pattern::Literal(s)) if s == "login"
        ));
        assert_eq!(
            compiled.actions,
            vec![Action::SendKey(Key::Down), Action::SendKey(Key::Enter)]
        );
    }

    #[test]
    fn test_rule_compilation_regex_pattern() {
        let mut rule = pattern_rule(r"code (\w+-\w+)", &["string:${1}"]);
        rule.regex = true;
        let compiled = rule.compile(RuleId(3)).unwrap();
        match compiled.pattern() {
            Some(Pattern::Regex(regex)) => assert_eq!(regex.as_str(), r"code (\w+-\w+)"),
            other => panic!("Expected regex pattern, got {:?}", other),
        }
        assert_eq!(compiled.id, RuleId(3));
    }

    #[test]
    fn test_literal_pattern_is_not_a_regex() {
        // "machine?" must stay a literal question mark
        let compiled = pattern_rule("machine?", &["enter"]).compile(RuleId(0)).unwrap();
        assert_eq!(compiled.pattern().unwrap().as_str(), "machine?");
        assert!(matches!(compiled.pattern(), Some(Pattern::Literal(_))));
    }

    #[test]
    fn test_invalid_regex_is_rejected() {
        let mut rule = pattern_rule("[invalid", &["enter"]);
        rule.regex = true;
        let err = rule.compile(RuleId(0)).unwrap_err();
        assert!(err.to_string().contains("Invalid regex pattern"));
    }

    #[test]
    fn test_rule_compilation_diff_timeout() {
        let rule = Rule {
            pattern: None,
            diff_timeout: Some("5m".to_string()),
            ..pattern_rule("unused", &["enter"])
        };
        let compiled = rule.compile(RuleId(1)).unwrap();
        assert_eq!(compiled.diff_timeout(), Some(Duration::from_secs(300)));
        assert_eq!(compiled.label, "diff_timeout:300000ms");
    }

    #[test]
    fn test_rule_compilation_both_fields_error() {
        let rule = Rule {
            diff_timeout: Some("5m".to_string()),
            ..pattern_rule("test", &["enter"])
        };
        assert!(rule.compile(RuleId(0)).is_err());
    }

    #[test]
    fn test_rule_compilation_no_fields_error() {
        let rule = Rule {
            pattern: None,
            ..pattern_rule("test", &["enter"])
        };
        assert!(rule.compile(RuleId(0)).is_err());
    }

    #[test]
    fn test_rule_without_actions_or_upload_is_rejected() {
        assert!(pattern_rule("idle", &[]).compile(RuleId(0)).is_err());

        let upload_only = Rule {
            upload: true,
            ..pattern_rule("code", &[])
        };
        assert!(upload_only.compile(RuleId(0)).is_ok());
    }

    #[test]
    fn test_explicit_label_wins() {
        let rule = Rule {
            label: Some("device-code".to_string()),
            ..pattern_rule("use code", &["enter"])
        };
        assert_eq!(rule.compile(RuleId(0)).unwrap().label, "device-code");
        assert_eq!(rule.describe(), "device-code");
    }
}
