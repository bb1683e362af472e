pub mod cli;

pub use cli::CliApprovalBroker;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::redact::redact_in_place;
use crate::config::ApprovalMode;
use crate::tools::RiskLevel;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub invocation_id: Uuid,
    pub tool_name: String,
    pub args_summary: String,
    pub risk: RiskLevel,
    pub requested_by: String,
    /// Guardrail reason that forced the confirmation.
    pub reason: String,
}

/// A decision covers exactly one invocation; there is no grant variant and
/// no cache, so a second identical request always asks again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    Denied { reason: String },
}

impl ApprovalDecision {
    pub fn denied(reason: impl Into<String>) -> Self {
        Self::Denied {
            reason: reason.into(),
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved)
    }
}

pub trait ApprovalBroker: Send + Sync {
    fn request_approval<'a>(
        &'a self,
        request: &'a ApprovalRequest,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ApprovalDecision>> + Send + 'a>>;
}

pub struct AutoAllowBroker;

impl ApprovalBroker for AutoAllowBroker {
    fn request_approval<'a>(
        &'a self,
        request: &'a ApprovalRequest,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ApprovalDecision>> + Send + 'a>> {
        Box::pin(async move {
            tracing::warn!(
                tool = %request.tool_name,
                "auto-approving confirmation (approval mode: allow)"
            );
            Ok(ApprovalDecision::Approved)
        })
    }
}

pub struct AutoDenyBroker {
    pub reason: String,
}

impl ApprovalBroker for AutoDenyBroker {
    fn request_approval<'a>(
        &'a self,
        _request: &'a ApprovalRequest,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ApprovalDecision>> + Send + 'a>> {
        Box::pin(async move {
            Ok(ApprovalDecision::Denied {
                reason: self.reason.clone(),
            })
        })
    }
}

/// Build the broker configured for this run.
pub fn broker_for_mode(mode: ApprovalMode, timeout: Duration) -> Arc<dyn ApprovalBroker> {
    match mode {
        ApprovalMode::Cli => Arc::new(CliApprovalBroker::new(timeout)),
        ApprovalMode::Allow => Arc::new(AutoAllowBroker),
        ApprovalMode::Deny => Arc::new(AutoDenyBroker {
            reason: "non-interactive run denies by default".to_string(),
        }),
    }
}

/// One-line argument summary for prompts and audit payloads, with sensitive
/// keys redacted before rendering.
#[must_use]
pub fn summarize_args(tool_name: &str, args: &serde_json::Value) -> String {
    let mut scrubbed = args.clone();
    redact_in_place(&mut scrubbed);

    match tool_name {
        "execute_command" => scrubbed
            .get("command")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("(unknown)")
            .to_string(),
        "terminate_process" => {
            let pid = scrubbed.get("pid").map_or("?".to_string(), |v| v.to_string());
            format!("terminate pid {pid}")
        }
        "isolate_system" => {
            let target = scrubbed
                .get("target")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("?");
            format!("isolate {target}")
        }
        _ => serde_json::to_string(&scrubbed).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(tool: &str) -> ApprovalRequest {
        ApprovalRequest {
            invocation_id: Uuid::new_v4(),
            tool_name: tool.to_string(),
            args_summary: "x".to_string(),
            risk: RiskLevel::High,
            requested_by: "adjudicator".to_string(),
            reason: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn auto_allow_broker_approves() {
        let broker = AutoAllowBroker;
        let decision = broker.request_approval(&request("isolate_system")).await.unwrap();
        assert!(decision.is_approved());
    }

    #[tokio::test]
    async fn auto_deny_broker_denies_with_reason() {
        let broker = AutoDenyBroker {
            reason: "non-interactive context".to_string(),
        };
        let decision = broker.request_approval(&request("isolate_system")).await.unwrap();
        assert_eq!(decision, ApprovalDecision::denied("non-interactive context"));
    }

    #[test]
    fn broker_factory_honors_mode() {
        let timeout = Duration::from_secs(5);
        // Construction only; the CLI variant would block on stdin.
        let _ = broker_for_mode(ApprovalMode::Cli, timeout);
        let _ = broker_for_mode(ApprovalMode::Allow, timeout);
        let _ = broker_for_mode(ApprovalMode::Deny, timeout);
    }

    #[test]
    fn summarize_args_execute_command() {
        let summary = summarize_args("execute_command", &json!({ "command": "ps aux" }));
        assert_eq!(summary, "ps aux");
    }

    #[test]
    fn summarize_args_terminate_process() {
        let summary = summarize_args("terminate_process", &json!({ "pid": 4242 }));
        assert_eq!(summary, "terminate pid 4242");
    }

    #[test]
    fn summarize_args_redacts_sensitive_keys() {
        let summary = summarize_args(
            "rotate_credentials",
            &json!({ "account": "deploy", "api_key": "sk-live-1234" }),
        );
        assert!(summary.contains("***REDACTED***"));
        assert!(!summary.contains("sk-live-1234"));
    }
}
