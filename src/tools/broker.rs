//! The guarded invocation path.
//!
//! Every side-effecting action flows through [`ToolBroker::dispatch`]:
//! guardrail evaluation first, then (when required) the confirmation gate,
//! then a wall-clock-bounded execution. Each request yields exactly one
//! `invocation-resolved` audit record, whatever its fate.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use crate::approval::{ApprovalBroker, ApprovalDecision, ApprovalRequest, summarize_args};
use crate::audit::{AuditEvent, AuditHandle, EventKind};
use crate::observability::{Observer, ObserverEvent};
use crate::policy::{GuardrailEngine, PolicyDecision, PolicyOutcome};
use crate::tools::{ExecutionContext, ToolInvocationRequest, ToolOutput, ToolRegistry};

/// Terminal fate of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum InvocationDisposition {
    Executed,
    Blocked,
    Denied,
    Failed,
    Skipped,
}

/// What the requesting unit gets back. `output` is present only when the
/// tool actually ran.
#[derive(Debug, Clone)]
pub struct InvocationOutcome {
    pub request: ToolInvocationRequest,
    pub decision: PolicyDecision,
    pub disposition: InvocationDisposition,
    pub detail: String,
    pub output: Option<ToolOutput>,
}

impl InvocationOutcome {
    pub fn executed(&self) -> bool {
        self.disposition == InvocationDisposition::Executed
    }

    /// Compact form recorded into session state and the final report.
    pub fn summary(&self) -> Value {
        json!({
            "invocation_id": self.request.invocation_id,
            "tool": self.request.tool_name,
            "disposition": self.disposition,
            "detail": self.detail,
        })
    }
}

pub struct ToolBroker {
    registry: ToolRegistry,
    engine: GuardrailEngine,
    approver: Arc<dyn ApprovalBroker>,
    approval_timeout: Duration,
    exec_timeout: Duration,
    audit: AuditHandle,
    observer: Arc<dyn Observer>,
}

impl ToolBroker {
    pub fn new(
        registry: ToolRegistry,
        engine: GuardrailEngine,
        approver: Arc<dyn ApprovalBroker>,
        approval_timeout: Duration,
        exec_timeout: Duration,
        audit: AuditHandle,
        observer: Arc<dyn Observer>,
    ) -> Self {
        Self {
            registry,
            engine,
            approver,
            approval_timeout,
            exec_timeout,
            audit,
            observer,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Injection scan over free text an analytical unit ingested; see
    /// [`GuardrailEngine::scan_free_text`].
    pub fn scan_free_text(
        &self,
        source: &str,
        text: &str,
    ) -> Option<(crate::policy::InjectionSignals, Value)> {
        self.engine.scan_free_text(source, text)
    }

    /// Run one request through policy, gate, and execution. Never returns an
    /// error for policy or tool outcomes; only a dead audit writer fails.
    pub async fn dispatch(
        &self,
        stage: &str,
        request: ToolInvocationRequest,
        ctx: &ExecutionContext,
    ) -> anyhow::Result<InvocationOutcome> {
        self.audit
            .append(
                AuditEvent::new(
                    EventKind::ToolCall,
                    json!({
                        "invocation_id": request.invocation_id,
                        "tool": request.tool_name,
                        "args": request.args,
                        "risk": request.risk,
                        "tainted": request.tainted,
                    }),
                )
                .stage(stage)
                .unit(&request.requested_by),
            )
            .await?;

        if ctx.cancel.is_cancelled() {
            let decision = PolicyDecision {
                invocation_id: request.invocation_id,
                outcome: PolicyOutcome::Block,
                matched: "builtin:cancelled".to_string(),
                reason: "run cancelled before evaluation".to_string(),
            };
            return self
                .resolve(
                    stage,
                    request,
                    decision,
                    InvocationDisposition::Skipped,
                    "run cancelled".to_string(),
                    None,
                )
                .await;
        }

        let decision = self.engine.evaluate(&request);

        match decision.outcome {
            PolicyOutcome::Block => {
                let detail = format!("blocked by guardrail: {}", decision.reason);
                self.resolve(stage, request, decision, InvocationDisposition::Blocked, detail, None)
                    .await
            }
            PolicyOutcome::Confirm => {
                let approval = self.confirm(stage, &request, &decision, ctx).await?;
                match approval {
                    ApprovalDecision::Approved => {
                        self.execute(stage, request, decision, ctx).await
                    }
                    ApprovalDecision::Denied { reason } => {
                        let detail = format!("confirmation denied: {reason}");
                        self.resolve(
                            stage,
                            request,
                            decision,
                            InvocationDisposition::Denied,
                            detail,
                            None,
                        )
                        .await
                    }
                }
            }
            PolicyOutcome::Allow => self.execute(stage, request, decision, ctx).await,
        }
    }

    /// Suspend on the confirmation gate. Bound by the configured timeout
    /// (timeout-as-deny) and resolved as denied on run cancellation, so a
    /// waiting branch never wedges the run.
    async fn confirm(
        &self,
        stage: &str,
        request: &ToolInvocationRequest,
        decision: &PolicyDecision,
        ctx: &ExecutionContext,
    ) -> anyhow::Result<ApprovalDecision> {
        self.audit
            .append(
                AuditEvent::new(
                    EventKind::ConfirmationRequested,
                    json!({
                        "invocation_id": request.invocation_id,
                        "tool": request.tool_name,
                        "reason": decision.reason,
                    }),
                )
                .stage(stage)
                .unit(&request.requested_by),
            )
            .await?;

        let approval_request = ApprovalRequest {
            invocation_id: request.invocation_id,
            tool_name: request.tool_name.clone(),
            args_summary: summarize_args(&request.tool_name, &request.args),
            risk: request.risk,
            requested_by: request.requested_by.clone(),
            reason: decision.reason.clone(),
        };

        let approval = tokio::select! {
            () = ctx.cancel.cancelled() => ApprovalDecision::denied("run cancelled"),
            resolved = tokio::time::timeout(
                self.approval_timeout,
                self.approver.request_approval(&approval_request),
            ) => match resolved {
                Ok(Ok(decision)) => decision,
                Ok(Err(e)) => ApprovalDecision::denied(format!("approver error: {e}")),
                Err(_) => ApprovalDecision::denied("approval timed out"),
            },
        };

        let approved = approval.is_approved();
        self.audit
            .append(
                AuditEvent::new(
                    EventKind::ConfirmationResolved,
                    json!({
                        "invocation_id": request.invocation_id,
                        "tool": request.tool_name,
                        "approved": approved,
                        "detail": match &approval {
                            ApprovalDecision::Approved => Value::Null,
                            ApprovalDecision::Denied { reason } => json!(reason),
                        },
                    }),
                )
                .stage(stage)
                .unit(&request.requested_by),
            )
            .await?;
        self.observer.record_event(&ObserverEvent::ConfirmationResolved {
            tool: request.tool_name.clone(),
            approved,
        });

        Ok(approval)
    }

    async fn execute(
        &self,
        stage: &str,
        request: ToolInvocationRequest,
        decision: PolicyDecision,
        ctx: &ExecutionContext,
    ) -> anyhow::Result<InvocationOutcome> {
        let Some(tool) = self.registry.get(&request.tool_name) else {
            // Absent tool is a degraded result, never a fault.
            let output = ToolOutput::missing(
                &request.tool_name,
                format!("{} is not registered on this host", request.tool_name),
            );
            self.audit
                .append(
                    AuditEvent::new(
                        EventKind::ToolResult,
                        json!({
                            "invocation_id": request.invocation_id,
                            "tool": request.tool_name,
                            "missing_tools": output.missing_tools,
                            "warnings": output.warnings,
                        }),
                    )
                    .stage(stage)
                    .unit(&request.requested_by),
                )
                .await?;
            return self
                .resolve(
                    stage,
                    request,
                    decision,
                    InvocationDisposition::Skipped,
                    "tool not registered; degraded result".to_string(),
                    Some(output),
                )
                .await;
        };

        let executed = tokio::time::timeout(
            self.exec_timeout,
            tool.execute(request.args.clone(), ctx),
        )
        .await;

        let (disposition, detail, output) = match executed {
            Ok(Ok(output)) if output.success => {
                self.audit
                    .append(
                        AuditEvent::new(
                            EventKind::ToolResult,
                            json!({
                                "invocation_id": request.invocation_id,
                                "tool": request.tool_name,
                                "data": output.data,
                                "warnings": output.warnings,
                                "missing_tools": output.missing_tools,
                            }),
                        )
                        .stage(stage)
                        .unit(&request.requested_by),
                    )
                    .await?;
                let detail = if output.is_degraded() {
                    format!("executed with missing tools: {}", output.missing_tools.join(", "))
                } else {
                    "executed".to_string()
                };
                (InvocationDisposition::Executed, detail, Some(output))
            }
            Ok(Ok(output)) => {
                let message = output
                    .error
                    .clone()
                    .unwrap_or_else(|| "tool reported failure".to_string());
                self.audit_tool_error(stage, &request, &message).await?;
                (InvocationDisposition::Failed, message, Some(output))
            }
            Ok(Err(e)) => {
                let message = e.to_string();
                self.audit_tool_error(stage, &request, &message).await?;
                (InvocationDisposition::Failed, message, None)
            }
            Err(_) => {
                let message = format!(
                    "execution exceeded {}s wall-clock bound",
                    self.exec_timeout.as_secs()
                );
                self.audit_tool_error(stage, &request, &message).await?;
                (InvocationDisposition::Failed, message, None)
            }
        };

        self.resolve(stage, request, decision, disposition, detail, output)
            .await
    }

    async fn audit_tool_error(
        &self,
        stage: &str,
        request: &ToolInvocationRequest,
        message: &str,
    ) -> anyhow::Result<()> {
        self.audit
            .append(
                AuditEvent::new(
                    EventKind::ToolError,
                    json!({
                        "invocation_id": request.invocation_id,
                        "tool": request.tool_name,
                        "error": message,
                    }),
                )
                .stage(stage)
                .unit(&request.requested_by),
            )
            .await?;
        Ok(())
    }

    /// Append the single `invocation-resolved` record and assemble the
    /// outcome handed back to the unit.
    async fn resolve(
        &self,
        stage: &str,
        request: ToolInvocationRequest,
        decision: PolicyDecision,
        disposition: InvocationDisposition,
        detail: String,
        output: Option<ToolOutput>,
    ) -> anyhow::Result<InvocationOutcome> {
        self.audit
            .append(
                AuditEvent::new(
                    EventKind::InvocationResolved,
                    json!({
                        "invocation_id": request.invocation_id,
                        "tool": request.tool_name,
                        "outcome": disposition,
                        "policy_outcome": decision.outcome,
                        "matched": decision.matched,
                        "detail": detail,
                    }),
                )
                .stage(stage)
                .unit(&request.requested_by),
            )
            .await?;
        self.observer.record_event(&ObserverEvent::InvocationResolved {
            tool: request.tool_name.clone(),
            outcome: disposition.to_string(),
        });

        tracing::info!(
            stage = %stage,
            unit = %request.requested_by,
            tool = %request.tool_name,
            disposition = %disposition,
            "invocation resolved"
        );

        Ok(InvocationOutcome {
            request,
            decision,
            disposition,
            detail,
            output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::AutoDenyBroker;
    use crate::audit::{AuditRecord, AuditWriter, MemoryAuditSink};
    use crate::observability::NoopObserver;
    use crate::policy::GuardrailPolicy;
    use crate::tools::{RiskLevel, Tool};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingTool {
        executions: Arc<AtomicU32>,
        risk: RiskLevel,
        name: &'static str,
    }

    impl Tool for CountingTool {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "counts executions"
        }

        fn risk_level(&self) -> RiskLevel {
            self.risk
        }

        fn execute<'a>(
            &'a self,
            _args: Value,
            _ctx: &'a ExecutionContext,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<ToolOutput>> + Send + 'a>> {
            self.executions.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { Ok(ToolOutput::ok(json!({"ran": true}))) })
        }
    }

    /// Approver that never answers; exercises the timeout-as-deny path.
    struct SilentBroker;

    impl ApprovalBroker for SilentBroker {
        fn request_approval<'a>(
            &'a self,
            _request: &'a ApprovalRequest,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<ApprovalDecision>> + Send + 'a>> {
            Box::pin(std::future::pending())
        }
    }

    struct ApprovingBroker {
        asked: Arc<AtomicU32>,
    }

    impl ApprovalBroker for ApprovingBroker {
        fn request_approval<'a>(
            &'a self,
            _request: &'a ApprovalRequest,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<ApprovalDecision>> + Send + 'a>> {
            self.asked.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { Ok(ApprovalDecision::Approved) })
        }
    }

    struct Harness {
        broker: ToolBroker,
        records: Arc<Mutex<Vec<AuditRecord>>>,
        writer: Option<AuditWriter>,
        executions: Arc<AtomicU32>,
    }

    fn harness(approver: Arc<dyn ApprovalBroker>, tool_risk: RiskLevel) -> Harness {
        let sink = MemoryAuditSink::new();
        let records = sink.records();
        let writer = AuditWriter::spawn(Box::new(sink), 32);

        let executions = Arc::new(AtomicU32::new(0));
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(CountingTool {
            executions: Arc::clone(&executions),
            risk: tool_risk,
            name: "tracer",
        }));

        let broker = ToolBroker::new(
            registry,
            GuardrailEngine::new(GuardrailPolicy::builtin()),
            approver,
            Duration::from_millis(50),
            Duration::from_secs(5),
            writer.handle(),
            Arc::new(NoopObserver),
        );
        Harness {
            broker,
            records,
            writer: Some(writer),
            executions,
        }
    }

    fn kinds(records: &[AuditRecord]) -> Vec<EventKind> {
        records.iter().map(|r| r.kind).collect()
    }

    #[tokio::test]
    async fn blocked_invocation_never_executes() {
        let mut h = harness(Arc::new(AutoDenyBroker { reason: "no".into() }), RiskLevel::Low);
        let ctx = ExecutionContext::simulated("adjudicator", None);
        let request = ToolInvocationRequest::new(
            "tracer",
            json!({"command": "rm -rf / now"}),
            "adjudicator",
            RiskLevel::Low,
        );

        let outcome = h.broker.dispatch("decision", request, &ctx).await.unwrap();
        assert_eq!(outcome.disposition, InvocationDisposition::Blocked);
        assert_eq!(h.executions.load(Ordering::SeqCst), 0);

        h.writer.take().unwrap().shutdown().await.unwrap();
        let records = h.records.lock().unwrap();
        assert_eq!(
            kinds(&records),
            vec![EventKind::ToolCall, EventKind::InvocationResolved]
        );
        assert_eq!(records[1].payload["outcome"], "blocked");
    }

    #[tokio::test]
    async fn allow_path_executes_and_resolves_once() {
        let mut h = harness(Arc::new(AutoDenyBroker { reason: "no".into() }), RiskLevel::Low);
        let ctx = ExecutionContext::simulated("asset_recon", None);
        let request =
            ToolInvocationRequest::new("tracer", json!({"window": "5m"}), "asset_recon", RiskLevel::Low);

        let outcome = h.broker.dispatch("perception", request, &ctx).await.unwrap();
        assert!(outcome.executed());
        assert_eq!(h.executions.load(Ordering::SeqCst), 1);

        h.writer.take().unwrap().shutdown().await.unwrap();
        let records = h.records.lock().unwrap();
        assert_eq!(
            kinds(&records),
            vec![
                EventKind::ToolCall,
                EventKind::ToolResult,
                EventKind::InvocationResolved
            ]
        );
    }

    #[tokio::test]
    async fn confirm_timeout_is_denied_with_no_side_effect() {
        let mut h = harness(Arc::new(SilentBroker), RiskLevel::High);
        let ctx = ExecutionContext::simulated("adjudicator", None);
        let request = ToolInvocationRequest::new("tracer", json!({}), "adjudicator", RiskLevel::High);

        let outcome = h.broker.dispatch("decision", request, &ctx).await.unwrap();
        assert_eq!(outcome.disposition, InvocationDisposition::Denied);
        assert!(outcome.detail.contains("approval timed out"));
        assert_eq!(h.executions.load(Ordering::SeqCst), 0);

        h.writer.take().unwrap().shutdown().await.unwrap();
        let records = h.records.lock().unwrap();
        assert_eq!(
            kinds(&records),
            vec![
                EventKind::ToolCall,
                EventKind::ConfirmationRequested,
                EventKind::ConfirmationResolved,
                EventKind::InvocationResolved
            ]
        );
        assert_eq!(records[2].payload["approved"], false);
        assert_eq!(records[3].payload["outcome"], "denied");
    }

    #[tokio::test]
    async fn approval_is_requested_per_invocation_never_cached() {
        let asked = Arc::new(AtomicU32::new(0));
        let mut h = harness(
            Arc::new(ApprovingBroker {
                asked: Arc::clone(&asked),
            }),
            RiskLevel::High,
        );
        let ctx = ExecutionContext::simulated("adjudicator", None);

        for _ in 0..2 {
            let request =
                ToolInvocationRequest::new("tracer", json!({}), "adjudicator", RiskLevel::High);
            let outcome = h.broker.dispatch("decision", request, &ctx).await.unwrap();
            assert!(outcome.executed());
        }

        assert_eq!(asked.load(Ordering::SeqCst), 2, "approval was cached");
        assert_eq!(h.executions.load(Ordering::SeqCst), 2);
        h.writer.take().unwrap().shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn unregistered_tool_yields_degraded_outcome() {
        let mut h = harness(Arc::new(AutoDenyBroker { reason: "no".into() }), RiskLevel::Low);
        let ctx = ExecutionContext::simulated("vuln_auditor", None);
        let request =
            ToolInvocationRequest::new("ghost_scanner", json!({}), "vuln_auditor", RiskLevel::Low);

        let outcome = h.broker.dispatch("analysis", request, &ctx).await.unwrap();
        assert_eq!(outcome.disposition, InvocationDisposition::Skipped);
        assert!(!outcome.executed());
        let output = outcome.output.unwrap();
        assert!(output.is_degraded());
        assert_eq!(output.missing_tools, vec!["ghost_scanner".to_string()]);

        h.writer.take().unwrap().shutdown().await.unwrap();
        let records = h.records.lock().unwrap();
        let resolved = records
            .iter()
            .find(|r| r.kind == EventKind::InvocationResolved)
            .unwrap();
        assert_eq!(resolved.payload["outcome"], "skipped");
    }

    #[tokio::test]
    async fn cancelled_run_skips_without_execution() {
        let mut h = harness(Arc::new(SilentBroker), RiskLevel::High);
        let ctx = ExecutionContext::simulated("adjudicator", None);
        ctx.cancel.cancel();
        let request = ToolInvocationRequest::new("tracer", json!({}), "adjudicator", RiskLevel::High);

        let outcome = h.broker.dispatch("decision", request, &ctx).await.unwrap();
        assert_eq!(outcome.disposition, InvocationDisposition::Skipped);
        assert_eq!(h.executions.load(Ordering::SeqCst), 0);
        h.writer.take().unwrap().shutdown().await.unwrap();
    }
}
