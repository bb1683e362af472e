//! Top-level run driver.
//!
//! Owns the session for exactly one run: wires the audit writer, guardrail
//! engine, confirmation gate, and tool registry; invokes the stage executor
//! across the fixed macro-stages; extracts the verdict; archives the session
//! when configured; and shuts the trail down cleanly. `PipelineFatal` is the
//! only error that reaches the caller, and it carries the partial report.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use super::report::{RunReport, RunStatus};
use super::{ExecutionOutput, PipelineDefinition, StageExecutor, StageOutcome};
use crate::approval::{ApprovalBroker, broker_for_mode};
use crate::audit::{
    AuditEvent, AuditSink, AuditWriter, EventKind, FileAuditSink,
};
use crate::config::{PraetorConfig, SessionBackend};
use crate::error::{PipelineError, PraetorError};
use crate::observability::{Observer, ObserverEvent, ObserverMetric, create_observer};
use crate::policy::GuardrailEngine;
use crate::scenario::ThreatScenario;
use crate::session::Session;
use crate::session::archive::SessionArchive;
use crate::tools::broker::ToolBroker;
use crate::tools::{ToolRegistry, remediation, scanners};
use crate::units::{BranchStatus, Verdict};

pub struct PipelineController {
    config: PraetorConfig,
    scenario: Option<Arc<ThreatScenario>>,
    cancel: CancellationToken,
    sink_override: Option<Box<dyn AuditSink>>,
    approver_override: Option<Arc<dyn ApprovalBroker>>,
}

impl PipelineController {
    pub fn new(config: PraetorConfig, scenario: Option<ThreatScenario>) -> Self {
        Self {
            config,
            scenario: scenario.map(Arc::new),
            cancel: CancellationToken::new(),
            sink_override: None,
            approver_override: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Replace the file sink, for tests and dry runs.
    pub fn with_audit_sink(mut self, sink: Box<dyn AuditSink>) -> Self {
        self.sink_override = Some(sink);
        self
    }

    /// Replace the configured approver, for tests.
    pub fn with_approver(mut self, approver: Arc<dyn ApprovalBroker>) -> Self {
        self.approver_override = Some(approver);
        self
    }

    pub async fn run(mut self) -> crate::error::Result<RunReport> {
        let started_at = Utc::now().to_rfc3339();
        let scenario_name = self.scenario.as_ref().map(|s| s.name.clone());

        let engine = GuardrailEngine::from_config(&self.config.policy)
            .map_err(PraetorError::Other)?;
        tracing::info!(rules = engine.rule_count(), "guardrail policy loaded");

        let audit_path = self.config.audit_log_path();
        let (sink, audit_artifact): (Box<dyn AuditSink>, Option<String>) =
            match self.sink_override.take() {
                Some(sink) => (sink, None),
                None => {
                    let sink =
                        FileAuditSink::open(&audit_path, self.config.audit.sync_each_record)
                            .map_err(PraetorError::Audit)?;
                    (Box::new(sink), Some(audit_path.display().to_string()))
                }
            };
        let writer = AuditWriter::spawn(sink, self.config.audit.queue_capacity);
        let audit = writer.handle();

        let observer: Arc<dyn Observer> = Arc::from(create_observer(&self.config.metrics));
        observer.record_event(&ObserverEvent::RunStart {
            scenario: scenario_name.clone().unwrap_or_else(|| "live".to_string()),
            provider: self.config.provider.backend.clone(),
            model: self.config.provider.model.clone(),
        });

        let mut registry = ToolRegistry::new();
        scanners::register(&mut registry);
        remediation::register(&mut registry);

        let approver = self.approver_override.take().unwrap_or_else(|| {
            broker_for_mode(self.config.approval.mode, self.config.approval_timeout())
        });

        let broker = Arc::new(ToolBroker::new(
            registry,
            engine,
            approver,
            self.config.approval_timeout(),
            self.config.exec_timeout(),
            audit.clone(),
            Arc::clone(&observer),
        ));

        let mut session = Session::new();
        if let Some(location) = &audit_artifact {
            session.add_artifact("audit_trail", location);
        }

        audit
            .append(AuditEvent::new(
                EventKind::RunStart,
                json!({
                    "run_id": session.id,
                    "scenario": scenario_name,
                    "provider": self.config.provider.backend,
                    "model": self.config.provider.model,
                }),
            ))
            .await
            .map_err(PraetorError::Audit)?;

        let executor = StageExecutor {
            audit: audit.clone(),
            broker,
            observer: Arc::clone(&observer),
            cancel: self.cancel.clone(),
            scenario: self.scenario.clone(),
            scanner: self.config.scanner.clone(),
        };
        let definition = PipelineDefinition::standard(self.config.scanner.max_targets);
        let run_started = std::time::Instant::now();

        match executor.run(&definition, &mut session).await {
            Ok(output) => {
                let report = self
                    .finish(writer, audit, &observer, session, output, started_at)
                    .await?;
                observer.record_event(&ObserverEvent::RunCompleted {
                    status: report.status.to_string(),
                    duration: run_started.elapsed(),
                });
                observer.record_metric(&ObserverMetric::AuditRecordsWritten(
                    report.audit_records,
                ));
                observer.flush();
                Ok(report)
            }
            Err(fatal) => {
                observer.record_event(&ObserverEvent::Error {
                    component: "pipeline".to_string(),
                    message: fatal.reason.clone(),
                });
                // Best effort: flush what the trail already accepted.
                let _ = audit
                    .append(AuditEvent::new(
                        EventKind::RunEnd,
                        json!({"status": RunStatus::Fatal, "reason": fatal.reason.clone()}),
                    ))
                    .await;
                let audit_records = writer.shutdown().await.unwrap_or(0);

                let partial = self.assemble(
                    &session,
                    fatal.stages,
                    RunStatus::Fatal,
                    started_at,
                    audit_records,
                    Some(fatal.reason.clone()),
                );
                Err(PipelineError::Fatal {
                    reason: fatal.reason,
                    partial: Box::new(partial),
                }
                .into())
            }
        }
    }

    async fn finish(
        &self,
        writer: AuditWriter,
        audit: crate::audit::AuditHandle,
        observer: &Arc<dyn Observer>,
        mut session: Session,
        output: ExecutionOutput,
        started_at: String,
    ) -> crate::error::Result<RunReport> {
        let status = if output.cancelled {
            RunStatus::Cancelled
        } else if output
            .stages
            .iter()
            .all(|s| s.status == BranchStatus::Completed)
        {
            RunStatus::Completed
        } else {
            RunStatus::Degraded
        };

        let end_kind = if output.cancelled {
            EventKind::RunCancelled
        } else {
            EventKind::RunEnd
        };
        audit
            .append(AuditEvent::new(end_kind, json!({"status": status})))
            .await
            .map_err(PraetorError::Audit)?;

        // The trail must be durable before the run is declared over.
        let audit_records = writer.shutdown().await.map_err(PraetorError::Audit)?;

        let report = self.assemble(
            &session,
            output.stages,
            status,
            started_at,
            audit_records,
            None,
        );

        if self.config.session.backend == SessionBackend::Sqlite {
            let db_path = self.config.session_db_path();
            match SessionArchive::open(&db_path).await {
                Ok(archive) => {
                    session.add_artifact("session_archive", db_path.display().to_string());
                    if let Err(e) = archive.store(&session, &status.to_string()).await {
                        tracing::warn!(error = %e, "session archive write failed");
                        observer.record_event(&ObserverEvent::Error {
                            component: "session_archive".to_string(),
                            message: e.to_string(),
                        });
                    }
                    archive.close().await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "session archive unavailable");
                }
            }
        }

        Ok(report)
    }

    fn assemble(
        &self,
        session: &Session,
        stages: Vec<StageOutcome>,
        status: RunStatus,
        started_at: String,
        audit_records: u64,
        fatal_reason: Option<String>,
    ) -> RunReport {
        let verdict: Option<Verdict> = session
            .read("decision.adjudicator", "verdict")
            .and_then(|value| serde_json::from_value(value.clone()).ok());
        let enforcement: Vec<Value> = session
            .read("decision.adjudicator", "enforcement")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        RunReport {
            run_id: session.id,
            scenario: self.scenario.as_ref().map(|s| s.name.clone()),
            provider: self.config.provider.backend.clone(),
            model: self.config.provider.model.clone(),
            started_at,
            finished_at: Utc::now().to_rfc3339(),
            status,
            stages,
            verdict,
            enforcement,
            audit_records,
            fatal_reason,
        }
    }
}
