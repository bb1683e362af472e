//! Run-scoped session state.
//!
//! One [`Session`] is created per run and owned by the controller. During a
//! macro-stage every branch holds a private [`NamespaceWriter`] plus a
//! read-only [`SessionSnapshot`] of all prior-stage state; the executor
//! merges the writers back at the barrier, which is the only point where a
//! stage's outputs become cross-readable. Write access is partitioned by
//! construction, so no locks are needed.

pub mod archive;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

type NamespaceMap = HashMap<String, HashMap<String, Value>>;

/// Reference to a produced artifact (a report file, an audit trail).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub name: String,
    pub location: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    state: NamespaceMap,
    artifacts: Vec<ArtifactRef>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            state: HashMap::new(),
            artifacts: Vec::new(),
        }
    }

    pub fn read(&self, namespace: &str, key: &str) -> Option<&Value> {
        self.state.get(namespace).and_then(|ns| ns.get(key))
    }

    pub fn namespace(&self, namespace: &str) -> Option<&HashMap<String, Value>> {
        self.state.get(namespace)
    }

    pub fn namespaces(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.state.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Barrier merge: fold one branch's private namespace into the session.
    /// Namespaces are branch-unique, so this never clobbers another branch.
    pub fn merge(&mut self, writer: NamespaceWriter) {
        let (namespace, entries) = writer.into_parts();
        self.state.entry(namespace).or_default().extend(entries);
    }

    /// Consistent read-only view of everything merged so far. Taken once per
    /// barrier and shared by every branch of the next macro-stage.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: Arc::new(self.state.clone()),
        }
    }

    pub fn add_artifact(&mut self, name: impl Into<String>, location: impl Into<String>) {
        self.artifacts.push(ArtifactRef {
            name: name.into(),
            location: location.into(),
            created_at: Utc::now(),
        });
    }

    pub fn artifacts(&self) -> &[ArtifactRef] {
        &self.artifacts
    }

    pub(crate) fn state_json(&self) -> Value {
        serde_json::to_value(&self.state).unwrap_or(Value::Null)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Private write handle for one branch during one macro-stage. Owning the
/// map (rather than sharing the session) is what makes cross-namespace
/// writes unrepresentable mid-stage.
#[derive(Debug)]
pub struct NamespaceWriter {
    namespace: String,
    entries: HashMap<String, Value>,
}

impl NamespaceWriter {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            entries: HashMap::new(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn write(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    /// Read-your-writes within the owning branch.
    pub fn read(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    fn into_parts(self) -> (String, HashMap<String, Value>) {
        (self.namespace, self.entries)
    }
}

/// Immutable view of prior-stage state, cheap to clone across branch tasks.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    state: Arc<NamespaceMap>,
}

impl SessionSnapshot {
    pub fn empty() -> Self {
        Self {
            state: Arc::new(HashMap::new()),
        }
    }

    pub fn read(&self, namespace: &str, key: &str) -> Option<&Value> {
        self.state.get(namespace).and_then(|ns| ns.get(key))
    }

    pub fn namespace(&self, namespace: &str) -> Option<&HashMap<String, Value>> {
        self.state.get(namespace)
    }

    pub fn namespaces(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.state.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_makes_branch_writes_readable() {
        let mut session = Session::new();
        let mut writer = NamespaceWriter::new("perception.asset_recon");
        writer.write("targets", json!(["file-01"]));
        writer.write("open_ports", json!([22, 445]));

        session.merge(writer);

        assert_eq!(
            session.read("perception.asset_recon", "targets"),
            Some(&json!(["file-01"]))
        );
        assert!(session.read("perception.asset_recon", "absent").is_none());
        assert!(session.read("absent", "targets").is_none());
    }

    #[test]
    fn distinct_namespaces_never_collide() {
        let mut session = Session::new();
        let mut a = NamespaceWriter::new("analysis.anomaly_inspector");
        let mut b = NamespaceWriter::new("analysis.vuln_auditor");
        a.write("score", json!(0.8));
        b.write("score", json!(0.3));

        session.merge(a);
        session.merge(b);

        assert_eq!(session.read("analysis.anomaly_inspector", "score"), Some(&json!(0.8)));
        assert_eq!(session.read("analysis.vuln_auditor", "score"), Some(&json!(0.3)));
        assert_eq!(
            session.namespaces(),
            vec!["analysis.anomaly_inspector", "analysis.vuln_auditor"]
        );
    }

    #[test]
    fn snapshot_is_isolated_from_later_merges() {
        let mut session = Session::new();
        let mut first = NamespaceWriter::new("perception.runtime_health");
        first.write("cpu_percent", json!(42));
        session.merge(first);

        let snapshot = session.snapshot();

        let mut later = NamespaceWriter::new("analysis.anomaly_inspector");
        later.write("score", json!(0.9));
        session.merge(later);

        // The snapshot reflects the barrier it was taken at, not later state.
        assert_eq!(
            snapshot.read("perception.runtime_health", "cpu_percent"),
            Some(&json!(42))
        );
        assert!(snapshot.namespace("analysis.anomaly_inspector").is_none());
        assert!(session.namespace("analysis.anomaly_inspector").is_some());
    }

    #[test]
    fn writer_reads_its_own_writes() {
        let mut writer = NamespaceWriter::new("decision.adjudicator");
        assert!(writer.read("verdict").is_none());
        writer.write("verdict", json!({"severity": "high"}));
        assert_eq!(writer.read("verdict").unwrap()["severity"], "high");
        assert_eq!(writer.namespace(), "decision.adjudicator");
    }

    #[test]
    fn artifacts_accumulate() {
        let mut session = Session::new();
        session.add_artifact("audit_trail", "/tmp/audit.jsonl");
        session.add_artifact("report", "/tmp/report.txt");
        assert_eq!(session.artifacts().len(), 2);
        assert_eq!(session.artifacts()[0].name, "audit_trail");
    }
}
