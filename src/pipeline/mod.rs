//! Fixed three-macro-stage pipeline and its executor.
//!
//! Macro-stages run strictly in order; the branches inside one macro-stage
//! run as concurrent tokio tasks joined at a barrier. A failed branch never
//! aborts its siblings; it degrades the stage. Only a critical stage whose
//! branches all fail, or an audit-trail failure, aborts the run.

pub mod controller;
pub mod report;

pub use controller::PipelineController;
pub use report::{RunReport, RunStatus};

use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::audit::{AuditEvent, AuditHandle, EventKind};
use crate::config::ScannerConfig;
use crate::observability::{Observer, ObserverEvent};
use crate::scenario::ThreatScenario;
use crate::session::{NamespaceWriter, Session};
use crate::tools::ExecutionContext;
use crate::tools::broker::ToolBroker;
use crate::units::{
    Adjudicator, AnomalyInspector, AssetRecon, BranchStatus, RuntimeHealth, StageResult, Unit,
    UnitContext, VulnAuditor,
};

pub struct BranchDef {
    pub unit: Arc<dyn Unit>,
}

pub struct MacroStage {
    pub id: &'static str,
    /// A critical stage whose branches all fail aborts the run.
    pub critical: bool,
    pub branches: Vec<BranchDef>,
}

pub struct PipelineDefinition {
    pub stages: Vec<MacroStage>,
}

impl PipelineDefinition {
    /// The fixed topology: Perception → Analysis → Decision/Action.
    pub fn standard(max_targets: usize) -> Self {
        Self {
            stages: vec![
                MacroStage {
                    id: "perception",
                    critical: false,
                    branches: vec![
                        BranchDef {
                            unit: Arc::new(AssetRecon::new(max_targets)),
                        },
                        BranchDef {
                            unit: Arc::new(RuntimeHealth),
                        },
                    ],
                },
                MacroStage {
                    id: "analysis",
                    critical: false,
                    branches: vec![
                        BranchDef {
                            unit: Arc::new(AnomalyInspector),
                        },
                        BranchDef {
                            unit: Arc::new(VulnAuditor),
                        },
                    ],
                },
                MacroStage {
                    id: "decision",
                    critical: true,
                    branches: vec![BranchDef {
                        unit: Arc::new(Adjudicator),
                    }],
                },
            ],
        }
    }
}

/// One macro-stage's aggregate, kept for the final report.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StageOutcome {
    pub stage: String,
    pub status: BranchStatus,
    pub results: Vec<StageResult>,
    pub duration_ms: u64,
}

pub struct ExecutionOutput {
    pub stages: Vec<StageOutcome>,
    pub cancelled: bool,
}

/// Terminal executor failure; carries whatever completed before the abort.
pub struct ExecutorFatal {
    pub reason: String,
    pub stages: Vec<StageOutcome>,
}

pub struct StageExecutor {
    pub audit: AuditHandle,
    pub broker: Arc<ToolBroker>,
    pub observer: Arc<dyn Observer>,
    pub cancel: CancellationToken,
    pub scenario: Option<Arc<ThreatScenario>>,
    pub scanner: ScannerConfig,
}

impl StageExecutor {
    pub async fn run(
        &self,
        definition: &PipelineDefinition,
        session: &mut Session,
    ) -> Result<ExecutionOutput, ExecutorFatal> {
        let mut stages = Vec::new();
        let mut cancelled = false;

        for stage in &definition.stages {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let outcome = self.run_stage(stage, session).await.map_err(|reason| {
                ExecutorFatal {
                    reason,
                    stages: stages.clone(),
                }
            })?;

            let stage_failed_entirely = outcome
                .results
                .iter()
                .all(|r| r.status == BranchStatus::Failed);
            if stage.critical && stage_failed_entirely && !outcome.results.is_empty() {
                let reason = format!("critical stage '{}' failed entirely", stage.id);
                stages.push(outcome);
                return Err(ExecutorFatal { reason, stages });
            }

            if self.cancel.is_cancelled() {
                stages.push(outcome);
                cancelled = true;
                break;
            }
            stages.push(outcome);
        }

        Ok(ExecutionOutput { stages, cancelled })
    }

    /// Run one macro-stage: every branch PENDING→RUNNING, all dispatched
    /// concurrently, barrier-joined, namespaces merged, trail checkpointed.
    /// Returns `Err(reason)` only for audit-trail failures.
    async fn run_stage(
        &self,
        stage: &MacroStage,
        session: &mut Session,
    ) -> Result<StageOutcome, String> {
        let started = Instant::now();
        self.append(
            AuditEvent::new(EventKind::StageStart, json!({"status": "running"}))
                .stage(stage.id),
        )
        .await?;

        let snapshot = session.snapshot();
        let mut handles = Vec::with_capacity(stage.branches.len());

        for branch in &stage.branches {
            let unit = Arc::clone(&branch.unit);
            let unit_id = unit.id();
            self.append(
                AuditEvent::new(
                    EventKind::UnitStart,
                    json!({"from": "pending", "status": "running"}),
                )
                .stage(stage.id)
                .unit(unit_id),
            )
            .await?;

            let mut ctx = UnitContext {
                stage: stage.id.to_string(),
                unit: unit_id.to_string(),
                snapshot: snapshot.clone(),
                state: NamespaceWriter::new(format!("{}.{unit_id}", stage.id)),
                broker: Arc::clone(&self.broker),
                exec: ExecutionContext {
                    unit: unit_id.to_string(),
                    simulate: self.scanner.simulate,
                    simulate_delay_ms: self.scanner.simulate_delay_ms,
                    scenario: self.scenario.clone(),
                    cancel: self.cancel.child_token(),
                },
            };
            let stage_id = stage.id;
            let cancel = self.cancel.clone();

            handles.push(tokio::spawn(async move {
                let branch_started = Instant::now();
                // Cancellation checkpoint: a cancelled run stops the branch
                // at its next await rather than mid-write.
                let executed = tokio::select! {
                    () = cancel.cancelled() => {
                        Err(anyhow::anyhow!("run cancelled at branch checkpoint"))
                    }
                    result = unit.execute(&mut ctx) => result,
                };

                let result = match executed {
                    Ok(output) => StageResult::terminal(
                        stage_id,
                        unit_id,
                        output.status(),
                        output.payload,
                        output.warnings,
                        output.missing_tools,
                    ),
                    Err(e) => {
                        tracing::warn!(
                            stage = %stage_id,
                            unit = %unit_id,
                            error = %e,
                            "branch failed"
                        );
                        StageResult::terminal(
                            stage_id,
                            unit_id,
                            BranchStatus::Failed,
                            json!({"error": e.to_string()}),
                            vec![e.to_string()],
                            Vec::new(),
                        )
                    }
                };
                (result, ctx.state, branch_started.elapsed())
            }));
        }

        // Barrier: every branch reaches a terminal status before we merge
        // or move on.
        let joined = join_all(handles).await;
        let mut results = Vec::with_capacity(joined.len());
        for join_result in joined {
            let (result, writer, elapsed) = match join_result {
                Ok(parts) => parts,
                Err(e) => return Err(format!("branch task panicked: {e}")),
            };

            session.merge(writer);
            self.append(
                AuditEvent::new(
                    EventKind::UnitEnd,
                    json!({
                        "from": "running",
                        "status": result.status,
                        "warnings": result.warnings,
                        "missing_tools": result.missing_tools,
                    }),
                )
                .stage(stage.id)
                .unit(&result.unit),
            )
            .await?;
            self.observer.record_event(&ObserverEvent::UnitCompleted {
                stage: stage.id.to_string(),
                unit: result.unit.clone(),
                status: result.status.to_string(),
                duration: elapsed,
            });
            results.push(result);
        }

        let status = stage_status(&results);
        self.append(
            AuditEvent::new(EventKind::StageEnd, json!({"status": status}))
                .stage(stage.id),
        )
        .await?;

        // Every record accepted during this stage must be durable before
        // the next stage starts; a latched sink failure surfaces here.
        self.audit
            .checkpoint()
            .await
            .map_err(|e| format!("audit trail failure: {e}"))?;

        let duration = started.elapsed();
        self.observer.record_event(&ObserverEvent::StageCompleted {
            stage: stage.id.to_string(),
            status: status.to_string(),
            duration,
        });
        tracing::info!(stage = %stage.id, status = %status, "macro-stage complete");

        Ok(StageOutcome {
            stage: stage.id.to_string(),
            status,
            results,
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        })
    }

    async fn append(&self, event: AuditEvent) -> Result<(), String> {
        self.audit
            .append(event)
            .await
            .map_err(|e| format!("audit trail failure: {e}"))
    }
}

/// Aggregate stage status: COMPLETED only when every branch completed
/// cleanly; any degradation or failure (including all branches failing)
/// yields DEGRADED. Critical-stage total failure is handled by the caller.
fn stage_status(results: &[StageResult]) -> BranchStatus {
    if results
        .iter()
        .all(|r| r.status == BranchStatus::Completed)
    {
        BranchStatus::Completed
    } else {
        BranchStatus::Degraded
    }
}
