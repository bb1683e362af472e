use thiserror::Error;

use crate::pipeline::report::RunReport;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for `Praetor`.
///
/// Each subsystem defines its own error variant. Library callers can match on
/// these to decide recovery strategy; internal code continues to use
/// `anyhow::Result` for ad-hoc context chains.
#[derive(Debug, Error)]
pub enum PraetorError {
    // ── Config ───────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Audit trail ─────────────────────────────────────────────────────
    #[error("audit: {0}")]
    Audit(#[from] AuditError),

    // ── Session ─────────────────────────────────────────────────────────
    #[error("session: {0}")]
    Session(#[from] SessionError),

    // ── Tools / Policy ──────────────────────────────────────────────────
    #[error("tool: {0}")]
    Tool(#[from] ToolError),

    // ── Pipeline ────────────────────────────────────────────────────────
    #[error("pipeline: {0}")]
    Pipeline(#[from] PipelineError),

    // ── Scenario catalog ────────────────────────────────────────────────
    #[error("scenario: {0}")]
    Scenario(#[from] ScenarioError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Audit errors ────────────────────────────────────────────────────────────

/// Audit failures are never recoverable mid-run; the controller converts
/// them into [`PipelineError::Fatal`] after flushing whatever was accepted.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit writer closed")]
    WriterClosed,

    #[error("audit record serialization failed: {0}")]
    Serialize(String),

    #[error("audit sink write failed: {0}")]
    Sink(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Session errors ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("namespace not found: {0}")]
    NamespaceNotFound(String),

    #[error("archive: {0}")]
    Archive(String),
}

// ─── Tool errors ────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool {name} not found")]
    NotFound { name: String },

    #[error("tool {tool} unavailable on this host")]
    Unavailable { tool: String },

    #[error("tool {name} execution failed: {message}")]
    Execution { name: String, message: String },

    #[error("tool {name} blocked by guardrail policy: {reason}")]
    PolicyBlocked { name: String, reason: String },

    #[error("tool {name} confirmation denied: {reason}")]
    ConfirmationDenied {
        name: String,
        reason: String,
        timed_out: bool,
    },
}

// ─── Pipeline errors ────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("stage {stage} unit {unit} failed: {message}")]
    StageFailure {
        stage: String,
        unit: String,
        message: String,
    },

    /// The only error that propagates out of the controller. Carries the
    /// partial report assembled from whatever completed before the abort.
    #[error("fatal: {reason}")]
    Fatal {
        reason: String,
        partial: Box<RunReport>,
    },
}

// ─── Scenario errors ────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("unknown scenario '{name}' (available: {available})")]
    Unknown { name: String, available: String },
}

pub type Result<T> = std::result::Result<T, PraetorError>;
