use serde_json::{Value, json};
use sha2::{Digest, Sha256};

/// Signal categories raised by the textual-injection heuristic.
///
/// Any raised signal escalates the enclosing invocation to at least CONFIRM;
/// the heuristic never downgrades a BLOCK.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InjectionSignals {
    pub instruction_override: bool,
    pub privilege_escalation: bool,
    pub secret_exfiltration: bool,
    pub tool_jailbreak: bool,
    pub custom_pattern: bool,
}

impl InjectionSignals {
    pub fn any(&self) -> bool {
        self.instruction_override
            || self.privilege_escalation
            || self.secret_exfiltration
            || self.tool_jailbreak
            || self.custom_pattern
    }

    /// Comma-joined names of the raised signals, for audit reasons.
    pub fn describe(&self) -> String {
        let mut names = Vec::new();
        if self.instruction_override {
            names.push("instruction_override");
        }
        if self.privilege_escalation {
            names.push("privilege_escalation");
        }
        if self.secret_exfiltration {
            names.push("secret_exfiltration");
        }
        if self.tool_jailbreak {
            names.push("tool_jailbreak");
        }
        if self.custom_pattern {
            names.push("custom_pattern");
        }
        names.join(", ")
    }
}

pub fn detect_injection(text: &str, extra_patterns: &[String]) -> InjectionSignals {
    let normalized = text.to_ascii_lowercase();
    let contains_any = |patterns: &[&str]| patterns.iter().any(|p| normalized.contains(p));

    InjectionSignals {
        instruction_override: contains_any(&[
            "ignore previous instructions",
            "ignore all previous instructions",
            "disregard previous instructions",
            "forget previous instructions",
            "developer message",
            "system prompt",
        ]),
        privilege_escalation: contains_any(&[
            "bypass safety",
            "disable guard",
            "override safety",
            "act as system",
            "you are now root",
        ]),
        secret_exfiltration: contains_any(&[
            "reveal secrets",
            "exfiltrate your",
            "print api key",
            "show environment variables",
            "dump tokens",
        ]),
        tool_jailbreak: contains_any(&[
            "execute shell",
            "run this command",
            "call the shell tool",
            "bypass tool policy",
        ]),
        custom_pattern: extra_patterns
            .iter()
            .any(|p| !p.is_empty() && normalized.contains(&p.to_ascii_lowercase())),
    }
}

/// Audit-safe summary of tainted free text: digest and bounded preview
/// instead of the raw content.
pub fn summarize_tainted(source: &str, text: &str) -> Value {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hex::encode(hasher.finalize());

    let preview: String = text.chars().take(80).collect();
    json!({
        "source": source,
        "digest_sha256": digest,
        "content_chars": text.chars().count(),
        "preview": preview,
    })
}
