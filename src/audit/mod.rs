//! Append-only audit trail.
//!
//! Every lifecycle transition and tool invocation in a run is submitted here
//! and lands in the trail in submission order with a gapless sequence number.
//! The trail is the authoritative record of what ran; consumers treat it as
//! append-only JSONL.

pub mod redact;
pub mod writer;

pub use writer::{AuditHandle, AuditSink, AuditWriter, FileAuditSink, MemoryAuditSink};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event kinds, serialized kebab-case into the `kind` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum EventKind {
    RunStart,
    RunEnd,
    RunCancelled,
    StageStart,
    StageEnd,
    UnitStart,
    UnitEnd,
    ToolCall,
    ToolResult,
    ToolError,
    ConfirmationRequested,
    ConfirmationResolved,
    InvocationResolved,
}

/// One line of the trail. `seq` and `timestamp` are stamped by the writer's
/// consumer task so they agree with the trail's total order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub seq: u64,
    pub kind: EventKind,
    pub stage: Option<String>,
    pub unit: Option<String>,
    pub payload: Value,
    pub timestamp: String,
}

/// What producers submit: a record minus `seq`/`timestamp`.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub kind: EventKind,
    pub stage: Option<String>,
    pub unit: Option<String>,
    pub payload: Value,
}

impl AuditEvent {
    pub fn new(kind: EventKind, payload: Value) -> Self {
        Self {
            kind,
            stage: None,
            unit: None,
            payload,
        }
    }

    pub fn stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_kind_serializes_kebab_case() {
        let kind = serde_json::to_string(&EventKind::InvocationResolved).unwrap();
        assert_eq!(kind, "\"invocation-resolved\"");
        assert_eq!(EventKind::StageStart.to_string(), "stage-start");
        assert_eq!(EventKind::RunCancelled.to_string(), "run-cancelled");
    }

    #[test]
    fn record_serializes_all_six_fields() {
        let record = AuditRecord {
            seq: 3,
            kind: EventKind::ToolCall,
            stage: Some("decision".into()),
            unit: Some("adjudicator".into()),
            payload: json!({"tool": "isolate_system"}),
            timestamp: "2026-08-22T10:00:00+00:00".into(),
        };
        let line = serde_json::to_string(&record).unwrap();
        let parsed: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["seq"], 3);
        assert_eq!(parsed["kind"], "tool-call");
        assert_eq!(parsed["stage"], "decision");
        assert_eq!(parsed["unit"], "adjudicator");
        assert_eq!(parsed["payload"]["tool"], "isolate_system");
        assert!(parsed["timestamp"].is_string());
    }

    #[test]
    fn run_level_events_carry_null_stage_and_unit() {
        let record = AuditRecord {
            seq: 1,
            kind: EventKind::RunStart,
            stage: None,
            unit: None,
            payload: json!({}),
            timestamp: "2026-08-22T10:00:00+00:00".into(),
        };
        let parsed: Value = serde_json::from_str(&serde_json::to_string(&record).unwrap()).unwrap();
        assert!(parsed["stage"].is_null());
        assert!(parsed["unit"].is_null());
    }

    #[test]
    fn event_builder_sets_context() {
        let event = AuditEvent::new(EventKind::UnitStart, json!({"status": "running"}))
            .stage("perception")
            .unit("asset_recon");
        assert_eq!(event.stage.as_deref(), Some("perception"));
        assert_eq!(event.unit.as_deref(), Some("asset_recon"));
    }
}
