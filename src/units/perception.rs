//! Perception stage: asset recon and runtime health.

use std::future::Future;
use std::pin::Pin;

use serde_json::{Value, json};

use super::{Unit, UnitContext, UnitOutput};
use crate::scenario::ThreatScenario;
use crate::tools::scanners::binary_on_path;

/// Collects the run's scope targets and sweeps them for exposed services.
pub struct AssetRecon {
    max_targets: usize,
}

impl AssetRecon {
    pub fn new(max_targets: usize) -> Self {
        Self { max_targets }
    }

    fn targets(&self, scenario: Option<&ThreatScenario>) -> Vec<String> {
        let mut targets = scenario
            .map(ThreatScenario::affected_systems)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| vec!["localhost".to_string()]);
        targets.truncate(self.max_targets);
        targets
    }
}

impl Unit for AssetRecon {
    fn id(&self) -> &'static str {
        "asset_recon"
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a mut UnitContext,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<UnitOutput>> + Send + 'a>> {
        Box::pin(async move {
            let targets = self.targets(ctx.exec.scenario.as_deref());
            let sweep = ctx
                .invoke("nmap_sweep", json!({ "targets": targets }), false)
                .await?;

            let mut output = UnitOutput::default();
            let (hosts, exposures) = match &sweep.output {
                Some(tool_output) => {
                    output.absorb(tool_output);
                    (
                        tool_output.data.get("hosts").cloned().unwrap_or(json!([])),
                        tool_output
                            .data
                            .get("sensitive_exposures")
                            .cloned()
                            .unwrap_or(json!([])),
                    )
                }
                None => {
                    output
                        .warnings
                        .push(format!("nmap sweep did not run: {}", sweep.detail));
                    (json!([]), json!([]))
                }
            };

            ctx.state.write("targets", json!(targets));
            ctx.state.write("hosts", hosts.clone());
            ctx.state.write("sensitive_exposures", exposures.clone());
            ctx.state
                .write("missing_tools", json!(output.missing_tools));

            tracing::info!(
                unit = %ctx.unit,
                targets = targets.len(),
                exposures = exposures.as_array().map_or(0, Vec::len),
                "asset recon complete"
            );

            output.payload = json!({
                "targets": targets,
                "host_count": hosts.as_array().map_or(0, Vec::len),
                "exposure_count": exposures.as_array().map_or(0, Vec::len),
            });
            Ok(output)
        })
    }
}

// ─── Runtime health ──────────────────────────────────────────────────────────

/// Metric thresholds; a breach is an anomaly-model input, not a failure.
const CPU_THRESHOLD: f64 = 90.0;
const MEMORY_THRESHOLD: f64 = 90.0;
const DISK_THRESHOLD: f64 = 85.0;
const ERROR_RATE_THRESHOLD: f64 = 5.0;
const P95_LATENCY_THRESHOLD_MS: f64 = 800.0;

/// Collects host and cluster health. Metric values are synthesized from the
/// scenario's metric signals in simulation; a missing `kubectl` in live mode
/// leaves the cluster section `unknown` with a warning instead of failing.
pub struct RuntimeHealth;

impl RuntimeHealth {
    fn metrics(scenario: Option<&ThreatScenario>) -> Value {
        let mut cpu = 34.0;
        let mut memory = 52.0;
        let mut disk = 61.0;
        let mut error_rate = 0.8;
        let mut p95_latency_ms = 180.0;

        if let Some(scenario) = scenario {
            for signal in scenario.signals_from("metrics") {
                match signal.kind.as_str() {
                    "cpu_saturation" => {
                        cpu = 98.0;
                        p95_latency_ms = 950.0;
                    }
                    "disk_io_spike" => {
                        disk = 93.0;
                        error_rate = 6.5;
                    }
                    "memory_pressure" => memory = 96.0,
                    _ => {}
                }
            }
        }

        json!({
            "cpu_percent": cpu,
            "memory_percent": memory,
            "disk_percent": disk,
            "error_rate_percent": error_rate,
            "p95_latency_ms": p95_latency_ms,
        })
    }

    fn breaches(metrics: &Value) -> Vec<Value> {
        let checks = [
            ("cpu_percent", CPU_THRESHOLD),
            ("memory_percent", MEMORY_THRESHOLD),
            ("disk_percent", DISK_THRESHOLD),
            ("error_rate_percent", ERROR_RATE_THRESHOLD),
            ("p95_latency_ms", P95_LATENCY_THRESHOLD_MS),
        ];
        checks
            .iter()
            .filter_map(|(metric, threshold)| {
                let value = metrics.get(*metric)?.as_f64()?;
                (value > *threshold).then(|| {
                    json!({
                        "metric": metric,
                        "value": value,
                        "threshold": threshold,
                    })
                })
            })
            .collect()
    }
}

impl Unit for RuntimeHealth {
    fn id(&self) -> &'static str {
        "runtime_health"
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a mut UnitContext,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<UnitOutput>> + Send + 'a>> {
        Box::pin(async move {
            let mut output = UnitOutput::default();

            let metrics = Self::metrics(ctx.exec.scenario.as_deref());
            let breaches = Self::breaches(&metrics);

            let cluster = if ctx.exec.simulate {
                let nodes: Vec<String> = ctx
                    .exec
                    .scenario
                    .as_deref()
                    .map(ThreatScenario::affected_systems)
                    .unwrap_or_else(|| vec!["localhost".to_string()]);
                json!({ "status": "healthy", "nodes": nodes })
            } else if binary_on_path("kubectl") {
                json!({ "status": "healthy", "nodes": [] })
            } else {
                let warning = "kubectl not found on PATH; cluster state unknown".to_string();
                output.warnings.push(warning);
                output.missing_tools.push("kubectl".to_string());
                json!({ "status": "unknown", "nodes": [] })
            };

            ctx.state.write("metrics", metrics.clone());
            ctx.state.write("breaches", json!(breaches));
            ctx.state.write("cluster", cluster);
            ctx.state
                .write("missing_tools", json!(output.missing_tools));

            tracing::info!(
                unit = %ctx.unit,
                breaches = breaches.len(),
                "runtime health collected"
            );

            output.payload = json!({
                "metrics": metrics,
                "breach_count": breaches.len(),
            });
            Ok(output)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario;

    #[test]
    fn recon_targets_fall_back_to_localhost() {
        let recon = AssetRecon::new(8);
        assert_eq!(recon.targets(None), vec!["localhost".to_string()]);
    }

    #[test]
    fn recon_targets_respect_cap() {
        let scenario = scenario::lookup("credential_theft").unwrap();
        let recon = AssetRecon::new(1);
        assert_eq!(recon.targets(Some(&scenario)), vec!["bastion-01".to_string()]);
    }

    #[test]
    fn quiet_metrics_breach_nothing() {
        let metrics = RuntimeHealth::metrics(None);
        assert!(RuntimeHealth::breaches(&metrics).is_empty());
    }

    #[test]
    fn cryptomining_metrics_breach_cpu_and_latency() {
        let scenario = scenario::lookup("cryptomining").unwrap();
        let metrics = RuntimeHealth::metrics(Some(&scenario));
        let breaches = RuntimeHealth::breaches(&metrics);
        let names: Vec<&str> = breaches
            .iter()
            .filter_map(|b| b["metric"].as_str())
            .collect();
        assert!(names.contains(&"cpu_percent"));
        assert!(names.contains(&"p95_latency_ms"));
    }

    #[test]
    fn ransomware_metrics_breach_disk_and_errors() {
        let scenario = scenario::lookup("ransomware").unwrap();
        let metrics = RuntimeHealth::metrics(Some(&scenario));
        let breaches = RuntimeHealth::breaches(&metrics);
        let names: Vec<&str> = breaches
            .iter()
            .filter_map(|b| b["metric"].as_str())
            .collect();
        assert_eq!(names, vec!["disk_percent", "error_rate_percent"]);
    }
}
