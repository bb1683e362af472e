//! Remediation action catalog.
//!
//! These are the side-effecting tools the adjudicator may plan. Every one of
//! them goes through the guarded dispatch path; the catalog's static risk
//! levels feed the policy engine's high-risk default. Execution is simulated
//! unless live mode is configured, and even live mode only records intent —
//! wiring real EDR/firewall backends is a deployment concern.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Value, json};

use crate::tools::{ExecutionContext, RiskLevel, Tool, ToolOutput, ToolRegistry};

/// Static description of one remediation action.
#[derive(Debug, Clone, Copy)]
pub struct ActionSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub risk: RiskLevel,
    pub reversible: bool,
}

/// The catalog, ordered roughly by how often the adjudicator reaches for
/// each action.
pub const CATALOG: [ActionSpec; 6] = [
    ActionSpec {
        name: "terminate_process",
        description: "kill a malicious process by pid",
        risk: RiskLevel::High,
        reversible: false,
    },
    ActionSpec {
        name: "block_network_traffic",
        description: "drop traffic to or from an address",
        risk: RiskLevel::Medium,
        reversible: true,
    },
    ActionSpec {
        name: "isolate_system",
        description: "quarantine a host from the network",
        risk: RiskLevel::High,
        reversible: true,
    },
    ActionSpec {
        name: "disable_credentials",
        description: "disable a compromised account",
        risk: RiskLevel::Medium,
        reversible: true,
    },
    ActionSpec {
        name: "rotate_credentials",
        description: "rotate secrets for an affected account",
        risk: RiskLevel::Medium,
        reversible: false,
    },
    ActionSpec {
        name: "rollback_changes",
        description: "restore files or config from the last good snapshot",
        risk: RiskLevel::High,
        reversible: false,
    },
];

pub fn spec_of(name: &str) -> Option<&'static ActionSpec> {
    CATALOG.iter().find(|spec| spec.name == name)
}

pub fn register(registry: &mut ToolRegistry) {
    for spec in &CATALOG {
        registry.register(Arc::new(RemediationTool { spec }));
    }
    registry.register(Arc::new(ExecuteCommand));
}

/// One catalog entry as an executable tool. Simulation marks the action as
/// applied and echoes the arguments; nothing on the host is touched.
pub struct RemediationTool {
    spec: &'static ActionSpec,
}

impl Tool for RemediationTool {
    fn name(&self) -> &str {
        self.spec.name
    }

    fn description(&self) -> &str {
        self.spec.description
    }

    fn risk_level(&self) -> RiskLevel {
        self.spec.risk
    }

    fn execute<'a>(
        &'a self,
        args: Value,
        ctx: &'a ExecutionContext,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ToolOutput>> + Send + 'a>> {
        Box::pin(async move {
            let mut output = ToolOutput::ok(json!({
                "action": self.spec.name,
                "applied": true,
                "simulated": ctx.simulate,
                "reversible": self.spec.reversible,
                "args": args,
                "at": Utc::now().to_rfc3339(),
            }));
            if !ctx.simulate {
                // Live mode records intent only; there is no agent backend.
                output = output.with_warning(format!(
                    "{} recorded but not enforced: no remediation backend configured",
                    self.spec.name
                ));
            }
            Ok(output)
        })
    }
}

/// Generic command escape hatch. Always high-risk; the builtin guardrails
/// confirm every use and block the destructive patterns outright.
pub struct ExecuteCommand;

impl Tool for ExecuteCommand {
    fn name(&self) -> &str {
        "execute_command"
    }

    fn description(&self) -> &str {
        "runs an arbitrary shell command"
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::High
    }

    fn execute<'a>(
        &'a self,
        args: Value,
        ctx: &'a ExecutionContext,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ToolOutput>> + Send + 'a>> {
        Box::pin(async move {
            let Some(command) = args.get("command").and_then(Value::as_str) else {
                return Ok(ToolOutput::failed("execute_command requires a 'command' string"));
            };

            if ctx.simulate {
                return Ok(ToolOutput::ok(json!({
                    "command": command,
                    "simulated": true,
                    "exit_code": 0,
                })));
            }

            let output = tokio::process::Command::new("sh")
                .arg("-c")
                .arg(command)
                .output()
                .await?;
            let stdout: String = String::from_utf8_lossy(&output.stdout)
                .chars()
                .take(8192)
                .collect();
            let stderr: String = String::from_utf8_lossy(&output.stderr)
                .chars()
                .take(2048)
                .collect();
            let code = output.status.code().unwrap_or(-1);
            if output.status.success() {
                Ok(ToolOutput::ok(json!({
                    "command": command,
                    "exit_code": code,
                    "stdout": stdout,
                })))
            } else {
                Ok(ToolOutput::failed(format!(
                    "command exited with {code}: {stderr}"
                )))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_names_are_unique_and_known() {
        let mut names: Vec<&str> = CATALOG.iter().map(|s| s.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), CATALOG.len());
        assert!(spec_of("isolate_system").is_some());
        assert!(spec_of("format_disk").is_none());
    }

    #[test]
    fn high_risk_actions_are_marked() {
        assert_eq!(spec_of("terminate_process").unwrap().risk, RiskLevel::High);
        assert_eq!(spec_of("isolate_system").unwrap().risk, RiskLevel::High);
        assert_eq!(
            spec_of("block_network_traffic").unwrap().risk,
            RiskLevel::Medium
        );
        assert!(spec_of("isolate_system").unwrap().reversible);
        assert!(!spec_of("rotate_credentials").unwrap().reversible);
    }

    #[test]
    fn registration_includes_escape_hatch() {
        let mut registry = ToolRegistry::new();
        register(&mut registry);
        assert_eq!(registry.len(), CATALOG.len() + 1);
        assert_eq!(registry.risk_of("execute_command"), Some(RiskLevel::High));
    }

    #[tokio::test]
    async fn simulated_action_applies_without_side_effect() {
        let ctx = ExecutionContext::simulated("adjudicator", None);
        let tool = RemediationTool {
            spec: spec_of("isolate_system").unwrap(),
        };
        let output = tool
            .execute(json!({"target": "worker-07"}), &ctx)
            .await
            .unwrap();
        assert!(output.success);
        assert_eq!(output.data["applied"], true);
        assert_eq!(output.data["simulated"], true);
        assert_eq!(output.data["args"]["target"], "worker-07");
    }

    #[tokio::test]
    async fn execute_command_simulated_echoes() {
        let ctx = ExecutionContext::simulated("adjudicator", None);
        let output = ExecuteCommand
            .execute(json!({"command": "ps aux"}), &ctx)
            .await
            .unwrap();
        assert!(output.success);
        assert_eq!(output.data["exit_code"], 0);
        assert_eq!(output.data["simulated"], true);
    }

    #[tokio::test]
    async fn execute_command_rejects_missing_argument() {
        let ctx = ExecutionContext::simulated("adjudicator", None);
        let output = ExecuteCommand.execute(json!({}), &ctx).await.unwrap();
        assert!(!output.success);
        assert!(output.error.unwrap().contains("'command'"));
    }
}
