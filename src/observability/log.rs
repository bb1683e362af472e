use super::traits::{Observer, ObserverEvent, ObserverMetric};
use tracing::info;

/// Log-based observer — uses tracing, zero external deps
pub struct LogObserver;

impl LogObserver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LogObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl Observer for LogObserver {
    fn record_event(&self, event: &ObserverEvent) {
        match event {
            ObserverEvent::RunStart {
                scenario,
                provider,
                model,
            } => {
                info!(scenario = %scenario, provider = %provider, model = %model, "run.start");
            }
            ObserverEvent::StageCompleted {
                stage,
                status,
                duration,
            } => {
                let ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
                info!(stage = %stage, status = %status, duration_ms = ms, "stage.completed");
            }
            ObserverEvent::UnitCompleted {
                stage,
                unit,
                status,
                duration,
            } => {
                let ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
                info!(stage = %stage, unit = %unit, status = %status, duration_ms = ms, "unit.completed");
            }
            ObserverEvent::InvocationResolved { tool, outcome } => {
                info!(tool = %tool, outcome = %outcome, "invocation.resolved");
            }
            ObserverEvent::ConfirmationResolved { tool, approved } => {
                info!(tool = %tool, approved = approved, "confirmation.resolved");
            }
            ObserverEvent::RunCompleted { status, duration } => {
                let ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
                info!(status = %status, duration_ms = ms, "run.completed");
            }
            ObserverEvent::Error { component, message } => {
                info!(component = %component, error = %message, "error");
            }
        }
    }

    fn record_metric(&self, metric: &ObserverMetric) {
        match metric {
            ObserverMetric::AuditRecordsWritten(n) => {
                info!(records = n, "metric.audit_records_written");
            }
            ObserverMetric::AuditQueueDepth(d) => {
                info!(depth = d, "metric.audit_queue_depth");
            }
            ObserverMetric::FindingsCount(n) => {
                info!(findings = n, "metric.findings_count");
            }
            ObserverMetric::WatchCycle(n) => {
                info!(cycle = n, "metric.watch_cycle");
            }
        }
    }

    fn name(&self) -> &str {
        "log"
    }
}
