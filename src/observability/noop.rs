use super::traits::{Observer, ObserverEvent, ObserverMetric};

/// Zero-overhead observer — all methods compile to nothing
pub struct NoopObserver;

impl Observer for NoopObserver {
    #[inline(always)]
    fn record_event(&self, _event: &ObserverEvent) {}

    #[inline(always)]
    fn record_metric(&self, _metric: &ObserverMetric) {}

    fn name(&self) -> &str {
        "noop"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn noop_name() {
        assert_eq!(NoopObserver.name(), "noop");
    }

    #[test]
    fn noop_record_event_does_not_panic() {
        let obs = NoopObserver;
        obs.record_event(&ObserverEvent::RunStart {
            scenario: "none".into(),
            provider: "simulation".into(),
            model: "heuristic-v1".into(),
        });
        obs.record_event(&ObserverEvent::StageCompleted {
            stage: "perception".into(),
            status: "completed".into(),
            duration: Duration::from_millis(100),
        });
        obs.record_event(&ObserverEvent::RunCompleted {
            status: "completed".into(),
            duration: Duration::ZERO,
        });
        obs.record_event(&ObserverEvent::Error {
            component: "test".into(),
            message: "boom".into(),
        });
    }

    #[test]
    fn noop_record_metric_does_not_panic() {
        let obs = NoopObserver;
        obs.record_metric(&ObserverMetric::AuditRecordsWritten(1000));
        obs.record_metric(&ObserverMetric::AuditQueueDepth(0));
        obs.record_metric(&ObserverMetric::FindingsCount(5));
        obs.record_metric(&ObserverMetric::WatchCycle(1));
    }

    #[test]
    fn noop_flush_does_not_panic() {
        NoopObserver.flush();
    }
}
