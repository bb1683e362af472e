use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// What a matched rule does to the invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RuleAction {
    Allow,
    Block,
    Confirm,
}

/// One ordered guardrail rule.
///
/// `pattern` is a case-insensitive substring matched against the tool name
/// plus the rendered arguments; an empty pattern matches any invocation of
/// the scoped tool. `scope`, when set, restricts the rule to that exact tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailRule {
    #[serde(default)]
    pub pattern: String,
    pub action: RuleAction,
    #[serde(default)]
    pub scope: Option<String>,
}

impl GuardrailRule {
    pub fn matches(&self, tool_name: &str, rendered_args: &str) -> bool {
        if let Some(scope) = &self.scope {
            if scope != tool_name {
                return false;
            }
        }
        if self.pattern.is_empty() {
            return true;
        }
        let needle = self.pattern.to_ascii_lowercase();
        let haystack = format!(
            "{} {}",
            tool_name.to_ascii_lowercase(),
            rendered_args.to_ascii_lowercase()
        );
        haystack.contains(&needle)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct InjectionSection {
    #[serde(default)]
    patterns: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RuleFile {
    #[serde(default, rename = "rule")]
    rules: Vec<GuardrailRule>,
    #[serde(default)]
    injection: InjectionSection,
}

/// The loaded rule set: ordered rules plus injection-heuristic extensions.
/// Immutable for the duration of a run.
#[derive(Debug, Clone)]
pub struct GuardrailPolicy {
    pub rules: Vec<GuardrailRule>,
    pub injection_patterns: Vec<String>,
}

impl GuardrailPolicy {
    /// Built-in rule set used when no rule file is configured. Block rules
    /// come before confirm rules so the stricter outcome wins when patterns
    /// overlap.
    pub fn builtin() -> Self {
        let block = |pattern: &str| GuardrailRule {
            pattern: pattern.to_string(),
            action: RuleAction::Block,
            scope: None,
        };
        let confirm_tool = |tool: &str| GuardrailRule {
            pattern: String::new(),
            action: RuleAction::Confirm,
            scope: Some(tool.to_string()),
        };

        Self {
            rules: vec![
                block("rm -rf /"),
                block("rm -rf /*"),
                block("mkfs"),
                block(":(){ :|:&};:"),
                block("dd if=/dev/zero of=/dev/sd"),
                block("> /dev/sda"),
                confirm_tool("execute_command"),
                confirm_tool("terminate_process"),
                confirm_tool("isolate_system"),
            ],
            injection_patterns: Vec::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read rule file {}", path.display()))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("invalid rule file {}", path.display()))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let file: RuleFile = toml::from_str(contents).context("failed to parse rule file")?;
        let policy = Self {
            rules: file.rules,
            injection_patterns: file.injection.patterns,
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<()> {
        for (index, rule) in self.rules.iter().enumerate() {
            if rule.pattern.is_empty() && rule.scope.is_none() {
                bail!(
                    "rule {index} has neither pattern nor scope and would match every invocation"
                );
            }
            if let Some(scope) = &rule.scope {
                if scope.trim().is_empty() {
                    bail!("rule {index} has an empty scope");
                }
            }
        }
        Ok(())
    }

    /// First matching rule in configured order, with its index.
    pub fn first_match(&self, tool_name: &str, rendered_args: &str) -> Option<(usize, &GuardrailRule)> {
        self.rules
            .iter()
            .enumerate()
            .find(|(_, rule)| rule.matches(tool_name, rendered_args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substring_match_is_case_insensitive() {
        let rule = GuardrailRule {
            pattern: "rm -rf /".into(),
            action: RuleAction::Block,
            scope: None,
        };
        assert!(rule.matches("execute_command", r#"{"command":"RM -RF / --no-preserve-root"}"#));
        assert!(!rule.matches("execute_command", r#"{"command":"ls -la"}"#));
    }

    #[test]
    fn scope_restricts_rule_to_one_tool() {
        let rule = GuardrailRule {
            pattern: String::new(),
            action: RuleAction::Confirm,
            scope: Some("terminate_process".into()),
        };
        assert!(rule.matches("terminate_process", r#"{"pid":42}"#));
        assert!(!rule.matches("rotate_credentials", r#"{"pid":42}"#));
    }

    #[test]
    fn builtin_blocks_come_before_confirms() {
        let policy = GuardrailPolicy::builtin();
        policy.validate().unwrap();
        let first_confirm = policy
            .rules
            .iter()
            .position(|r| r.action == RuleAction::Confirm)
            .unwrap();
        assert!(
            policy.rules[..first_confirm]
                .iter()
                .all(|r| r.action == RuleAction::Block)
        );
    }

    #[test]
    fn first_match_wins_over_later_rules() {
        let policy = GuardrailPolicy {
            rules: vec![
                GuardrailRule {
                    pattern: "rm -rf".into(),
                    action: RuleAction::Block,
                    scope: None,
                },
                GuardrailRule {
                    pattern: String::new(),
                    action: RuleAction::Allow,
                    scope: Some("execute_command".into()),
                },
            ],
            injection_patterns: Vec::new(),
        };
        let (index, rule) = policy
            .first_match("execute_command", r#"{"command":"rm -rf /tmp/x"}"#)
            .unwrap();
        assert_eq!(index, 0);
        assert_eq!(rule.action, RuleAction::Block);
    }

    #[test]
    fn parse_rule_file_with_injection_section() {
        let contents = r#"
            [[rule]]
            pattern = "shutdown -h"
            action = "block"

            [[rule]]
            action = "confirm"
            scope = "execute_command"

            [injection]
            patterns = ["open the pod bay doors"]
        "#;
        let policy = GuardrailPolicy::from_toml_str(contents).unwrap();
        assert_eq!(policy.rules.len(), 2);
        assert_eq!(policy.rules[0].action, RuleAction::Block);
        assert_eq!(policy.rules[1].scope.as_deref(), Some("execute_command"));
        assert_eq!(policy.injection_patterns.len(), 1);
    }

    #[test]
    fn wildcard_rule_without_scope_is_rejected() {
        let contents = r#"
            [[rule]]
            action = "block"
        "#;
        let err = GuardrailPolicy::from_toml_str(contents).unwrap_err();
        assert!(err.to_string().contains("match every invocation"));
    }

    #[test]
    fn unknown_action_fails_to_parse() {
        let contents = r#"
            [[rule]]
            pattern = "x"
            action = "quarantine"
        "#;
        assert!(GuardrailPolicy::from_toml_str(contents).is_err());
    }
}
