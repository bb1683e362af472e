pub mod broker;
pub mod remediation;
pub mod scanners;

pub use broker::{InvocationDisposition, InvocationOutcome, ToolBroker};

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::scenario::ThreatScenario;

/// Static risk classification of a tool. High-risk tools default to CONFIRM
/// when no guardrail rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Result of a tool execution. A populated `missing_tools` marks the result
/// as degraded rather than failed; `error` is set only for real faults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub data: Value,
    pub error: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub missing_tools: Vec<String>,
}

impl ToolOutput {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
            warnings: Vec::new(),
            missing_tools: Vec::new(),
        }
    }

    pub fn missing(tool: &str, warning: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Value::Null,
            error: None,
            warnings: vec![warning.into()],
            missing_tools: vec![tool.to_string()],
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Value::Null,
            error: Some(message.into()),
            warnings: Vec::new(),
            missing_tools: Vec::new(),
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn is_degraded(&self) -> bool {
        !self.missing_tools.is_empty()
    }
}

/// One action request crossing the guarded boundary. Created by a unit,
/// consumed by the policy engine; resolved exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocationRequest {
    pub invocation_id: Uuid,
    pub tool_name: String,
    pub args: Value,
    pub requested_by: String,
    pub risk: RiskLevel,
    /// Set when the issuing unit's free-text inputs tripped the injection
    /// heuristic; forces at least CONFIRM downstream.
    pub tainted: bool,
}

impl ToolInvocationRequest {
    pub fn new(
        tool_name: impl Into<String>,
        args: Value,
        requested_by: impl Into<String>,
        risk: RiskLevel,
    ) -> Self {
        Self {
            invocation_id: Uuid::new_v4(),
            tool_name: tool_name.into(),
            args,
            requested_by: requested_by.into(),
            risk,
            tainted: false,
        }
    }

    pub fn tainted(mut self) -> Self {
        self.tainted = true;
        self
    }
}

/// Ambient state handed to every tool execution.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub unit: String,
    pub simulate: bool,
    pub simulate_delay_ms: u64,
    pub scenario: Option<Arc<ThreatScenario>>,
    pub cancel: CancellationToken,
}

impl ExecutionContext {
    pub fn simulated(unit: impl Into<String>, scenario: Option<Arc<ThreatScenario>>) -> Self {
        Self {
            unit: unit.into(),
            simulate: true,
            simulate_delay_ms: 0,
            scenario,
            cancel: CancellationToken::new(),
        }
    }
}

/// Core tool trait — implement for any capability
pub trait Tool: Send + Sync {
    /// Tool name (used in invocation requests)
    fn name(&self) -> &str;

    /// Human-readable description
    fn description(&self) -> &str;

    /// Static risk classification
    fn risk_level(&self) -> RiskLevel {
        RiskLevel::Low
    }

    /// Execute the tool with given arguments
    fn execute<'a>(
        &'a self,
        args: Value,
        ctx: &'a ExecutionContext,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ToolOutput>> + Send + 'a>>;
}

/// Name-keyed tool collection shared by the broker and the units.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn risk_of(&self, name: &str) -> Option<RiskLevel> {
        self.tools.get(name).map(|t| t.risk_level())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
