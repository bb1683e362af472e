//! Pipeline units.
//!
//! A unit is one concurrently executing branch of a macro-stage. The
//! executor is agnostic to what a unit does beyond its id: every unit
//! implements [`Unit::execute`] against a [`UnitContext`] carrying its
//! private namespace writer, a snapshot of prior-stage state, and the
//! guarded tool broker.

pub mod analysis;
pub mod decision;
pub mod perception;

pub use analysis::{AnomalyInspector, VulnAuditor};
pub use decision::Adjudicator;
pub use perception::{AssetRecon, RuntimeHealth};

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::{NamespaceWriter, SessionSnapshot};
use crate::severity::{AttackType, Severity};
use crate::tools::broker::{InvocationOutcome, ToolBroker};
use crate::tools::{ExecutionContext, RiskLevel, ToolInvocationRequest, ToolOutput};

/// Branch lifecycle. PENDING → RUNNING → one of the three terminals; no
/// re-entry, no retries at this layer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BranchStatus {
    Pending,
    Running,
    Completed,
    Degraded,
    Failed,
}

impl BranchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Degraded | Self::Failed)
    }
}

/// One unit's outcome for one stage, immutable once terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: String,
    pub unit: String,
    pub status: BranchStatus,
    pub payload: Value,
    pub warnings: Vec<String>,
    pub missing_tools: Vec<String>,
    pub timestamp: String,
}

impl StageResult {
    pub fn terminal(
        stage: &str,
        unit: &str,
        status: BranchStatus,
        payload: Value,
        warnings: Vec<String>,
        missing_tools: Vec<String>,
    ) -> Self {
        debug_assert!(status.is_terminal());
        Self {
            stage: stage.to_string(),
            unit: unit.to_string(),
            status,
            payload,
            warnings,
            missing_tools,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// What a unit hands back. A populated `missing_tools` makes the branch
/// DEGRADED; returning `Err` makes it FAILED.
#[derive(Debug, Clone, Default)]
pub struct UnitOutput {
    pub payload: Value,
    pub warnings: Vec<String>,
    pub missing_tools: Vec<String>,
}

impl UnitOutput {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            warnings: Vec::new(),
            missing_tools: Vec::new(),
        }
    }

    /// Fold a tool output's degradation markers into this unit's.
    pub fn absorb(&mut self, output: &ToolOutput) {
        self.warnings.extend(output.warnings.iter().cloned());
        for tool in &output.missing_tools {
            if !self.missing_tools.contains(tool) {
                self.missing_tools.push(tool.clone());
            }
        }
        self.missing_tools.sort_unstable();
    }

    pub fn status(&self) -> BranchStatus {
        if self.missing_tools.is_empty() {
            BranchStatus::Completed
        } else {
            BranchStatus::Degraded
        }
    }
}

/// Everything a branch needs for one macro-stage.
pub struct UnitContext {
    pub stage: String,
    pub unit: String,
    pub snapshot: SessionSnapshot,
    pub state: NamespaceWriter,
    pub broker: Arc<ToolBroker>,
    pub exec: ExecutionContext,
}

impl UnitContext {
    /// Issue one guarded tool invocation. The request's risk comes from the
    /// registry's static classification, and the taint flag is threaded
    /// through when the unit ingested suspect free text.
    pub async fn invoke(
        &self,
        tool: &str,
        args: Value,
        tainted: bool,
    ) -> anyhow::Result<InvocationOutcome> {
        let risk = self
            .broker
            .registry()
            .risk_of(tool)
            .unwrap_or(RiskLevel::Low);
        let mut request = ToolInvocationRequest::new(tool, args, self.unit.clone(), risk);
        if tainted {
            request = request.tainted();
        }
        self.broker.dispatch(&self.stage, request, &self.exec).await
    }
}

pub trait Unit: Send + Sync {
    fn id(&self) -> &'static str;

    fn execute<'a>(
        &'a self,
        ctx: &'a mut UnitContext,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<UnitOutput>> + Send + 'a>>;
}

/// The decision stage's product: exactly one per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub severity: Severity,
    pub confidence: f64,
    pub attack_type: AttackType,
    pub summary: String,
    pub action_plan: Vec<ToolInvocationRequest>,
}
