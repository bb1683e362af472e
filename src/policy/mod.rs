pub mod injection;
pub mod rules;

pub use injection::{InjectionSignals, detect_injection, summarize_tainted};
pub use rules::{GuardrailPolicy, GuardrailRule, RuleAction};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::PolicyConfig;
use crate::tools::{RiskLevel, ToolInvocationRequest};

/// Final verdict for one invocation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PolicyOutcome {
    Allow,
    Confirm,
    Block,
}

/// Evaluation result carried forward to the gate, the audit trail, and the
/// final report. `matched` names the rule or builtin default that decided.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub invocation_id: Uuid,
    pub outcome: PolicyOutcome,
    pub matched: String,
    pub reason: String,
}

impl PolicyDecision {
    pub fn is_blocking(&self) -> bool {
        self.outcome == PolicyOutcome::Block
    }

    pub fn requires_confirmation(&self) -> bool {
        self.outcome == PolicyOutcome::Confirm
    }
}

/// Ordered-rule guardrail engine. Every tool invocation passes through
/// `evaluate` before execution; there is no bypass path.
pub struct GuardrailEngine {
    policy: GuardrailPolicy,
}

impl GuardrailEngine {
    pub fn new(policy: GuardrailPolicy) -> Self {
        Self { policy }
    }

    /// Build from config: an explicit rules file when configured, the
    /// builtin rule set otherwise.
    pub fn from_config(config: &PolicyConfig) -> anyhow::Result<Self> {
        let policy = match &config.rules_path {
            Some(path) => GuardrailPolicy::load(path)?,
            None => GuardrailPolicy::builtin(),
        };
        Ok(Self::new(policy))
    }

    pub fn rule_count(&self) -> usize {
        self.policy.rules.len()
    }

    /// Evaluate a request against the ordered rule list. First match wins;
    /// with no match, high-risk tools fall back to CONFIRM and everything
    /// else to ALLOW. Injection evidence raises ALLOW to CONFIRM and never
    /// lowers a stricter verdict.
    pub fn evaluate(&self, request: &ToolInvocationRequest) -> PolicyDecision {
        let rendered = render_args(&request.args);

        let (mut outcome, mut matched, mut reason) =
            match self.policy.first_match(&request.tool_name, &rendered) {
                Some((index, rule)) => {
                    let outcome = match rule.action {
                        RuleAction::Allow => PolicyOutcome::Allow,
                        RuleAction::Confirm => PolicyOutcome::Confirm,
                        RuleAction::Block => PolicyOutcome::Block,
                    };
                    (
                        outcome,
                        format!("rule:{index}"),
                        format!("matched pattern {:?}", rule.pattern),
                    )
                }
                None if request.risk == RiskLevel::High => (
                    PolicyOutcome::Confirm,
                    "builtin:high-risk-default".to_string(),
                    format!("{} is classified high-risk", request.tool_name),
                ),
                None => (
                    PolicyOutcome::Allow,
                    "default".to_string(),
                    "no rule matched".to_string(),
                ),
            };

        if outcome == PolicyOutcome::Allow {
            let signals = detect_injection(&rendered, &self.policy.injection_patterns);
            if request.tainted {
                outcome = PolicyOutcome::Confirm;
                matched = "builtin:tainted-input".to_string();
                reason = format!("{} consumed tainted external content", request.requested_by);
            } else if signals.any() {
                outcome = PolicyOutcome::Confirm;
                matched = "builtin:injection-heuristic".to_string();
                reason = format!("injection signals: {}", signals.describe());
            }
        }

        tracing::debug!(
            invocation = %request.invocation_id,
            tool = %request.tool_name,
            outcome = %outcome,
            matched = %matched,
            "guardrail verdict"
        );

        PolicyDecision {
            invocation_id: request.invocation_id,
            outcome,
            matched,
            reason,
        }
    }

    /// Scan free text fetched from an external source. Returns the tripped
    /// signals plus a digest-only summary safe to place in audit payloads.
    pub fn scan_free_text(
        &self,
        source: &str,
        text: &str,
    ) -> Option<(InjectionSignals, serde_json::Value)> {
        let signals = detect_injection(text, &self.policy.injection_patterns);
        signals.any().then(|| (signals, summarize_tainted(source, text)))
    }
}

fn render_args(args: &serde_json::Value) -> String {
    serde_json::to_string(args).unwrap_or_default()
}
