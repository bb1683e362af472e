use std::time::Duration;

/// Events the observer can record
#[derive(Debug, Clone)]
pub enum ObserverEvent {
    RunStart {
        scenario: String,
        provider: String,
        model: String,
    },
    StageCompleted {
        stage: String,
        status: String,
        duration: Duration,
    },
    UnitCompleted {
        stage: String,
        unit: String,
        status: String,
        duration: Duration,
    },
    InvocationResolved {
        tool: String,
        outcome: String,
    },
    ConfirmationResolved {
        tool: String,
        approved: bool,
    },
    RunCompleted {
        status: String,
        duration: Duration,
    },
    Error {
        component: String,
        message: String,
    },
}

/// Numeric metrics
#[derive(Debug, Clone)]
pub enum ObserverMetric {
    AuditRecordsWritten(u64),
    AuditQueueDepth(u64),
    FindingsCount(u64),
    WatchCycle(u64),
}

/// Core observability trait — implement for any backend
pub trait Observer: Send + Sync {
    /// Record a discrete event
    fn record_event(&self, event: &ObserverEvent);

    /// Record a numeric metric
    fn record_metric(&self, metric: &ObserverMetric);

    /// Flush any buffered data (no-op for most backends)
    fn flush(&self) {}

    /// Human-readable name of this observer
    fn name(&self) -> &str;
}
