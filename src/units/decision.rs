//! Decision/Action stage: the adjudicator.
//!
//! Reads everything the prior stages produced, classifies the attack,
//! derives severity and confidence, plans remediation from the catalog, and
//! issues each action through the guarded tool boundary. The verdict is
//! produced exactly once per run, whatever happens to the individual
//! actions.

use std::future::Future;
use std::pin::Pin;

use serde_json::{Value, json};

use super::{Unit, UnitContext, UnitOutput, Verdict};
use crate::severity::{AttackType, Severity};
use crate::tools::ToolInvocationRequest;
use crate::tools::broker::InvocationDisposition;

/// Actions are only auto-issued at or above this severity; below it the
/// verdict records the plan as monitor-only.
pub const AUTO_REMEDIATION_THRESHOLD: Severity = Severity::High;

/// Remediation playbook per attack type, worst-first.
fn actions_for(attack: AttackType) -> &'static [&'static str] {
    match attack {
        AttackType::Ransomware => &["isolate_system", "disable_credentials", "rollback_changes"],
        AttackType::DataExfiltration => &["block_network_traffic", "disable_credentials"],
        AttackType::ContainerEscape => &["isolate_system", "terminate_process"],
        AttackType::CredentialTheft => &["rotate_credentials", "disable_credentials"],
        AttackType::Cryptomining => &["terminate_process", "block_network_traffic"],
        AttackType::PrivilegeEscalation | AttackType::UnauthorizedAccess => {
            &["disable_credentials", "terminate_process"]
        }
        AttackType::LateralMovement => &["isolate_system", "block_network_traffic"],
        AttackType::SuspiciousProcess => &["terminate_process"],
        AttackType::ConfigurationChange => &["rollback_changes"],
    }
}

pub struct Adjudicator;

struct Evidence {
    texts: Vec<String>,
    max_finding_severity: Option<Severity>,
    finding_count: usize,
    anomaly_score: f64,
    affected: Vec<String>,
    suspicious_pid: Option<u64>,
    missing_tools: Vec<String>,
    tainted: bool,
}

impl Adjudicator {
    fn gather(ctx: &UnitContext) -> Evidence {
        let mut texts = Vec::new();
        let mut max_severity: Option<Severity> = None;
        let mut finding_count = 0;
        let mut suspicious_pid = None;

        if let Some(findings) = ctx
            .snapshot
            .read("analysis.vuln_auditor", "findings")
            .and_then(Value::as_array)
        {
            finding_count = findings.len();
            for finding in findings {
                for field in ["kind", "title"] {
                    if let Some(text) = finding[field].as_str() {
                        texts.push(text.to_string());
                    }
                }
                if let Some(severity) =
                    finding["severity"].as_str().and_then(Severity::parse)
                {
                    max_severity = Some(max_severity.map_or(severity, |m| m.max(severity)));
                }
                if suspicious_pid.is_none() && finding["kind"] == json!("suspicious_process") {
                    suspicious_pid = finding["pid"].as_u64();
                }
            }
        }

        if let Some(anomalies) = ctx
            .snapshot
            .read("analysis.anomaly_inspector", "anomalies")
            .and_then(Value::as_array)
        {
            for anomaly in anomalies {
                if let Some(kind) = anomaly["kind"].as_str() {
                    texts.push(kind.to_string());
                }
            }
        }

        let anomaly_score = ctx
            .snapshot
            .read("analysis.anomaly_inspector", "score")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);

        let affected = ctx
            .snapshot
            .read("analysis.vuln_auditor", "affected_systems")
            .and_then(Value::as_array)
            .map(|systems| {
                systems
                    .iter()
                    .filter_map(Value::as_str)
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let missing_tools = ctx
            .snapshot
            .read("analysis.vuln_auditor", "missing_tools")
            .and_then(Value::as_array)
            .map(|tools| {
                tools
                    .iter()
                    .filter_map(Value::as_str)
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let tainted = ctx
            .snapshot
            .read("analysis.vuln_auditor", "tainted")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Evidence {
            texts,
            max_finding_severity: max_severity,
            finding_count,
            anomaly_score,
            affected,
            suspicious_pid,
            missing_tools,
            tainted,
        }
    }

    /// Deterministic confidence in `[0.1, 0.99]`: up from evidence volume
    /// and anomaly score, down when scanners were missing.
    fn confidence(evidence: &Evidence) -> f64 {
        let mut confidence = 0.35
            + 0.1 * (evidence.finding_count.min(4) as f64)
            + 0.25 * evidence.anomaly_score;
        if !evidence.missing_tools.is_empty() {
            confidence -= 0.1;
        }
        confidence.clamp(0.1, 0.99)
    }

    fn args_for(action: &str, evidence: &Evidence) -> Value {
        let target = evidence
            .affected
            .first()
            .map_or("localhost", String::as_str);
        match action {
            "terminate_process" => json!({
                "pid": evidence.suspicious_pid.unwrap_or(0),
                "target": target,
            }),
            "rotate_credentials" | "disable_credentials" => json!({
                "account": "affected-accounts",
                "target": target,
            }),
            "rollback_changes" => json!({
                "target": target,
                "snapshot": "last-known-good",
            }),
            // isolate_system, block_network_traffic
            _ => json!({ "target": target }),
        }
    }
}

impl Unit for Adjudicator {
    fn id(&self) -> &'static str {
        "adjudicator"
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a mut UnitContext,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<UnitOutput>> + Send + 'a>> {
        Box::pin(async move {
            let evidence = Self::gather(ctx);
            let mut output = UnitOutput::default();

            let attack_type =
                AttackType::classify(evidence.texts.iter().map(String::as_str));
            let severity = evidence
                .max_finding_severity
                .map_or(attack_type.default_severity(), |s| {
                    s.max(attack_type.default_severity())
                });
            let confidence = Self::confidence(&evidence);

            let plan: Vec<ToolInvocationRequest> = if severity >= AUTO_REMEDIATION_THRESHOLD {
                actions_for(attack_type)
                    .iter()
                    .map(|action| {
                        let mut request = ToolInvocationRequest::new(
                            *action,
                            Self::args_for(action, &evidence),
                            ctx.unit.clone(),
                            ctx.broker
                                .registry()
                                .risk_of(action)
                                .unwrap_or(crate::tools::RiskLevel::High),
                        );
                        if evidence.tainted {
                            request = request.tainted();
                        }
                        request
                    })
                    .collect()
            } else {
                tracing::info!(
                    severity = %severity,
                    threshold = %AUTO_REMEDIATION_THRESHOLD,
                    "below auto-remediation threshold; monitor only"
                );
                Vec::new()
            };

            let summary = format!(
                "{attack_type} verdict at {severity} severity ({} findings, anomaly score {:.2}); {} remediation(s) planned",
                evidence.finding_count,
                evidence.anomaly_score,
                plan.len(),
            );

            let verdict = Verdict {
                severity,
                confidence,
                attack_type,
                summary,
                action_plan: plan.clone(),
            };

            // Dispatch the plan in order. A blocked or denied action is a
            // permanent failure for that action only; the verdict stands.
            let mut enforcement = Vec::new();
            for request in plan {
                let tool = request.tool_name.clone();
                let outcome = ctx
                    .broker
                    .dispatch(&ctx.stage, request, &ctx.exec)
                    .await?;
                if !outcome.executed() {
                    output.warnings.push(format!(
                        "{tool}: {} ({})",
                        outcome.disposition, outcome.detail
                    ));
                }
                if outcome.disposition == InvocationDisposition::Executed {
                    if let Some(tool_output) = &outcome.output {
                        output.absorb(tool_output);
                    }
                }
                enforcement.push(outcome.summary());
            }

            ctx.state.write("verdict", serde_json::to_value(&verdict)?);
            ctx.state.write("enforcement", json!(enforcement));

            tracing::info!(
                unit = %ctx.unit,
                attack = %verdict.attack_type,
                severity = %verdict.severity,
                confidence = verdict.confidence,
                actions = enforcement.len(),
                "verdict issued"
            );

            output.payload = json!({
                "attack_type": verdict.attack_type,
                "severity": verdict.severity,
                "confidence": verdict.confidence,
                "actions_planned": verdict.action_plan.len(),
            });
            Ok(output)
        })
    }
}
