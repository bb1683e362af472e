//! Analysis stage: anomaly scoring and vulnerability auditing.

use std::future::Future;
use std::pin::Pin;

use serde_json::{Value, json};

use super::{Unit, UnitContext, UnitOutput};
use crate::severity::{AttackType, Severity};

// ─── Anomaly model ───────────────────────────────────────────────────────────

/// Deterministic anomaly score in `[0, 1]`, monotone in finding severity.
/// The worst severity dominates; the average and the metric breach count
/// refine it.
pub fn anomaly_score(severities: &[Severity], breach_count: usize) -> f64 {
    let max_weight = severities
        .iter()
        .map(|s| f64::from(s.weight()))
        .fold(0.0, f64::max)
        / 100.0;
    let avg_weight = if severities.is_empty() {
        0.0
    } else {
        severities.iter().map(|s| f64::from(s.weight())).sum::<f64>()
            / (severities.len() as f64)
            / 100.0
    };
    #[allow(clippy::cast_precision_loss)]
    let breach_term = breach_count.min(5) as f64 * 0.06;
    (0.55 * max_weight + 0.25 * avg_weight + breach_term).min(1.0)
}

fn exposure_severity(service: &str) -> Severity {
    match service {
        "telnet" | "rdp" | "redis" | "mongodb" | "elasticsearch" => Severity::High,
        _ => Severity::Medium,
    }
}

/// Scores the Perception stage's signals and metrics. No tools are invoked;
/// this branch works purely on the prior-stage snapshot.
pub struct AnomalyInspector;

impl Unit for AnomalyInspector {
    fn id(&self) -> &'static str {
        "anomaly_inspector"
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a mut UnitContext,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<UnitOutput>> + Send + 'a>> {
        Box::pin(async move {
            let mut output = UnitOutput::default();
            let mut anomalies = Vec::new();
            let mut severities = Vec::new();

            let exposures = ctx
                .snapshot
                .read("perception.asset_recon", "sensitive_exposures")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for exposure in &exposures {
                let service = exposure["service"].as_str().unwrap_or("unknown");
                let severity = exposure_severity(service);
                severities.push(severity);
                anomalies.push(json!({
                    "kind": "exposed_service",
                    "severity": severity,
                    "score": f64::from(severity.weight()) / 100.0,
                    "target": exposure["target"],
                    "service": service,
                    "port": exposure["port"],
                }));
            }

            let breaches = ctx
                .snapshot
                .read("perception.runtime_health", "breaches")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for breach in &breaches {
                anomalies.push(json!({
                    "kind": "metric_breach",
                    "severity": Severity::Medium,
                    "score": 0.5,
                    "metric": breach["metric"],
                    "value": breach["value"],
                }));
            }

            if ctx.snapshot.namespace("perception.asset_recon").is_none() {
                output
                    .warnings
                    .push("asset recon output missing; scoring on partial data".to_string());
            }
            if ctx.snapshot.namespace("perception.runtime_health").is_none() {
                output
                    .warnings
                    .push("runtime health output missing; scoring on partial data".to_string());
            }

            let score = anomaly_score(&severities, breaches.len());

            ctx.state.write("anomalies", json!(anomalies));
            ctx.state.write("score", json!(score));
            ctx.state.write("breach_count", json!(breaches.len()));

            tracing::info!(
                unit = %ctx.unit,
                anomalies = anomalies.len(),
                score,
                "anomaly inspection complete"
            );

            output.payload = json!({
                "anomaly_count": anomalies.len(),
                "score": score,
            });
            Ok(output)
        })
    }
}

// ─── Vulnerability auditor ───────────────────────────────────────────────────

/// Runs the trivy/osquery/falco probes over the recon targets and
/// aggregates their findings. Missing probes degrade the branch; free-text
/// alert content is scanned for injection before it reaches the adjudicator.
pub struct VulnAuditor;

impl Unit for VulnAuditor {
    fn id(&self) -> &'static str {
        "vuln_auditor"
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a mut UnitContext,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<UnitOutput>> + Send + 'a>> {
        Box::pin(async move {
            let targets = ctx
                .snapshot
                .read("perception.asset_recon", "targets")
                .cloned()
                .unwrap_or(json!(["localhost"]));

            let mut output = UnitOutput::default();
            let mut findings: Vec<Value> = Vec::new();
            let mut affected: Vec<String> = Vec::new();
            let mut tainted = false;
            let mut taint_evidence = Vec::new();

            // trivy: known vulnerabilities per target.
            let trivy = ctx
                .invoke("trivy_scan", json!({ "targets": targets }), false)
                .await?;
            if let Some(tool_output) = &trivy.output {
                output.absorb(tool_output);
                if let Some(vulns) = tool_output.data.get("vulnerabilities").and_then(Value::as_array)
                {
                    for vuln in vulns {
                        findings.push(json!({
                            "source": "trivy",
                            "kind": "vulnerability",
                            "severity": vuln["severity"],
                            "title": vuln["title"],
                            "target": vuln["target"],
                        }));
                    }
                }
            }

            // osquery: suspicious processes.
            let osquery = ctx.invoke("osquery_probe", json!({}), false).await?;
            if let Some(tool_output) = &osquery.output {
                output.absorb(tool_output);
                if let Some(processes) =
                    tool_output.data.get("processes").and_then(Value::as_array)
                {
                    for process in processes.iter().filter(|p| p["suspicious"] == json!(true)) {
                        findings.push(json!({
                            "source": "osquery",
                            "kind": "suspicious_process",
                            "severity": Severity::Medium,
                            "title": process["cmdline"],
                            "pid": process["pid"],
                            "description": process["description"],
                        }));
                    }
                }
            }

            // falco: runtime alerts, classified for severity.
            let falco = ctx.invoke("falco_probe", json!({}), false).await?;
            if let Some(tool_output) = &falco.output {
                output.absorb(tool_output);
                if let Some(alerts) = tool_output.data.get("alerts").and_then(Value::as_array) {
                    for alert in alerts {
                        let rule = alert["rule"].as_str().unwrap_or("");
                        let description = alert["description"].as_str().unwrap_or("");
                        let severity = AttackType::classify([rule, description].into_iter())
                            .default_severity();
                        findings.push(json!({
                            "source": "falco",
                            "kind": rule,
                            "severity": severity,
                            "title": description,
                            "affected_systems": alert["affected_systems"],
                            "indicators": alert["indicators"],
                        }));
                        if let Some(systems) = alert["affected_systems"].as_array() {
                            for system in systems.iter().filter_map(Value::as_str) {
                                if !affected.contains(&system.to_string()) {
                                    affected.push(system.to_string());
                                }
                            }
                        }
                    }
                }
            }

            // External alert text flows into the decision stage; scan it
            // before it gets there.
            for finding in &findings {
                if let Some(title) = finding["title"].as_str() {
                    if let Some((signals, summary)) =
                        ctx.broker.scan_free_text(&ctx.unit, title)
                    {
                        tainted = true;
                        taint_evidence.push(json!({
                            "signals": signals.describe(),
                            "summary": summary,
                        }));
                    }
                }
            }

            ctx.state.write("findings", json!(findings));
            ctx.state.write("affected_systems", json!(affected));
            ctx.state
                .write("missing_tools", json!(output.missing_tools));
            ctx.state.write("tainted", json!(tainted));
            ctx.state.write("taint_evidence", json!(taint_evidence));

            tracing::info!(
                unit = %ctx.unit,
                findings = findings.len(),
                missing = output.missing_tools.len(),
                tainted,
                "vulnerability audit complete"
            );

            output.payload = json!({
                "finding_count": findings.len(),
                "affected_systems": affected,
                "tainted": tainted,
            });
            Ok(output)
        })
    }
}
