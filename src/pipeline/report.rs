//! Final run report: structured data plus a tera-rendered plain-text view.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tera::{Context, Tera};
use uuid::Uuid;

use super::StageOutcome;
use crate::units::Verdict;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Degraded,
    Cancelled,
    Fatal,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub scenario: Option<String>,
    pub provider: String,
    pub model: String,
    pub started_at: String,
    pub finished_at: String,
    pub status: RunStatus,
    pub stages: Vec<StageOutcome>,
    pub verdict: Option<Verdict>,
    pub enforcement: Vec<Value>,
    pub audit_records: u64,
    pub fatal_reason: Option<String>,
}

const REPORT_TEMPLATE: &str = r"PRAETOR RUN REPORT
==================
Run       : {{ run_id }}
Scenario  : {% if scenario %}{{ scenario }}{% else %}live{% endif %}
Binding   : {{ provider }}/{{ model }}
Started   : {{ started_at }}
Finished  : {{ finished_at }}
Status    : {{ status | upper }}
Audit     : {{ audit_records }} record(s)
{% if fatal_reason %}
FATAL: {{ fatal_reason }}
{% endif %}
Stages
------
{% for stage in stages %}[{{ stage.status | upper }}] {{ stage.stage }} ({{ stage.duration_ms }} ms)
{% for result in stage.results %}  - {{ result.unit }}: {{ result.status }}{% if result.missing_tools | length > 0 %} (missing: {{ result.missing_tools | join(sep=', ') }}){% endif %}
{% for warning in result.warnings %}      warning: {{ warning }}
{% endfor %}{% endfor %}{% endfor %}
Verdict
-------
{% if verdict %}Attack     : {{ verdict.attack_type }}
Severity   : {{ verdict.severity | upper }}
Confidence : {{ verdict.confidence | round(precision=2) }}
Summary    : {{ verdict.summary }}
{% if enforcement | length > 0 %}
Actions
{% for action in enforcement %}  - {{ action.tool }}: {{ action.disposition }} ({{ action.detail }})
{% endfor %}{% else %}
No remediation actions were issued.
{% endif %}{% else %}No verdict was produced.
{% endif %}";

impl RunReport {
    pub fn render(&self) -> anyhow::Result<String> {
        let context = Context::from_serialize(self)?;
        let rendered = Tera::one_off(REPORT_TEMPLATE, &context, false)?;
        Ok(rendered)
    }
}
