use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use directories::UserDirs;
use serde::{Deserialize, Serialize};

/// Top-level configuration, loaded once at startup and immutable afterward.
///
/// Resolution order: explicit `--config` path, else `~/.praetor/config.toml`,
/// else built-in defaults. Environment overrides are applied after file
/// parsing, then the whole tree is validated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PraetorConfig {
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub audit: AuditConfig,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub approval: ApprovalConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub scanner: ScannerConfig,

    #[serde(default)]
    pub watch: WatchConfig,
}

// ─── Sections ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// JSONL trail destination. Relative paths resolve under `data_dir`.
    #[serde(default)]
    pub log_path: Option<PathBuf>,

    /// Bounded submission queue; producers wait when full.
    #[serde(default = "default_audit_queue_capacity")]
    pub queue_capacity: usize,

    /// Fsync after every record. Disable only for throwaway runs.
    #[serde(default = "default_true")]
    pub sync_each_record: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Guardrail rule file; built-in defaults apply when absent.
    #[serde(default)]
    pub rules_path: Option<PathBuf>,

    /// Wall-clock bound on any single tool execution.
    #[serde(default = "default_max_exec_timeout_secs")]
    pub max_exec_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ApprovalMode {
    /// Interactive prompt on the controlling terminal.
    Cli,
    /// Approve everything (simulation runs, tests).
    Allow,
    /// Deny everything.
    Deny,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    #[serde(default = "default_approval_mode")]
    pub mode: ApprovalMode,

    #[serde(default = "default_approval_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SessionBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// `memory` keeps the session in-process only; `sqlite` archives the
    /// finished session for later inspection.
    #[serde(default = "default_session_backend")]
    pub backend: SessionBackend,

    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Model/provider binding recorded into run metadata.
    #[serde(default = "default_provider_backend")]
    pub backend: String,

    #[serde(default = "default_provider_model")]
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Observer backend: `log` or `noop`; unknown values fall back to noop.
    #[serde(default = "default_metrics_backend")]
    pub backend: String,

    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Simulated scanner outputs instead of invoking host binaries.
    #[serde(default = "default_true")]
    pub simulate: bool,

    /// Artificial latency applied to simulated probes.
    #[serde(default)]
    pub simulate_delay_ms: u64,

    #[serde(default = "default_scanner_max_targets")]
    pub max_targets: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    #[serde(default = "default_watch_interval_secs")]
    pub interval_secs: u64,

    /// Stop after this many cycles; `None` runs until interrupted.
    #[serde(default)]
    pub max_cycles: Option<u32>,

    #[serde(default = "default_watch_retention_days")]
    pub retention_days: u32,

    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

// ─── Defaults ────────────────────────────────────────────────────────────────

fn default_data_dir() -> PathBuf {
    praetor_home().join("data")
}

fn default_audit_queue_capacity() -> usize {
    256
}

fn default_true() -> bool {
    true
}

fn default_max_exec_timeout_secs() -> u64 {
    60
}

fn default_approval_mode() -> ApprovalMode {
    ApprovalMode::Cli
}

fn default_approval_timeout_secs() -> u64 {
    30
}

fn default_session_backend() -> SessionBackend {
    SessionBackend::Memory
}

fn default_provider_backend() -> String {
    "simulation".to_string()
}

fn default_provider_model() -> String {
    "heuristic-v1".to_string()
}

fn default_metrics_backend() -> String {
    "log".to_string()
}

fn default_scanner_max_targets() -> usize {
    8
}

fn default_watch_interval_secs() -> u64 {
    300
}

fn default_watch_retention_days() -> u32 {
    30
}

fn praetor_home() -> PathBuf {
    let home = UserDirs::new().map_or_else(|| PathBuf::from("."), |u| u.home_dir().to_path_buf());
    home.join(".praetor")
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            log_path: None,
            queue_capacity: default_audit_queue_capacity(),
            sync_each_record: true,
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            rules_path: None,
            max_exec_timeout_secs: default_max_exec_timeout_secs(),
        }
    }
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            mode: default_approval_mode(),
            timeout_secs: default_approval_timeout_secs(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend: default_session_backend(),
            db_path: None,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            backend: default_provider_backend(),
            model: default_provider_model(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            backend: default_metrics_backend(),
            endpoint: None,
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            simulate: true,
            simulate_delay_ms: 0,
            max_targets: default_scanner_max_targets(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_watch_interval_secs(),
            max_cycles: None,
            retention_days: default_watch_retention_days(),
            db_path: None,
        }
    }
}

impl Default for PraetorConfig {
    fn default() -> Self {
        Self {
            config_path: praetor_home().join("config.toml"),
            data_dir: default_data_dir(),
            audit: AuditConfig::default(),
            policy: PolicyConfig::default(),
            approval: ApprovalConfig::default(),
            session: SessionConfig::default(),
            provider: ProviderConfig::default(),
            metrics: MetricsConfig::default(),
            scanner: ScannerConfig::default(),
            watch: WatchConfig::default(),
        }
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

impl PraetorConfig {
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let config_path = match explicit_path {
            Some(p) => expand_path(p),
            None => praetor_home().join("config.toml"),
        };

        let mut config = if config_path.exists() {
            let contents = fs::read_to_string(&config_path)
                .with_context(|| format!("failed to read config file {}", config_path.display()))?;
            let mut parsed: Self = toml::from_str(&contents)
                .with_context(|| format!("failed to parse config file {}", config_path.display()))?;
            parsed.config_path.clone_from(&config_path);
            parsed
        } else if explicit_path.is_some() {
            bail!("config file not found: {}", config_path.display());
        } else {
            Self {
                config_path,
                ..Self::default()
            }
        };

        config.apply_env_overrides();
        config.expand_paths();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) {
        // Audit log: PRAETOR_AUDIT_LOG or AUDIT_LOG_PATH
        if let Ok(path) =
            std::env::var("PRAETOR_AUDIT_LOG").or_else(|_| std::env::var("AUDIT_LOG_PATH"))
        {
            if !path.is_empty() {
                self.audit.log_path = Some(PathBuf::from(path));
            }
        }

        // Guardrail rules: PRAETOR_RULES
        if let Ok(path) = std::env::var("PRAETOR_RULES") {
            if !path.is_empty() {
                self.policy.rules_path = Some(PathBuf::from(path));
            }
        }

        // Session backend: PRAETOR_SESSION_BACKEND (memory|sqlite)
        if let Ok(backend) = std::env::var("PRAETOR_SESSION_BACKEND") {
            match backend.to_ascii_lowercase().as_str() {
                "memory" => self.session.backend = SessionBackend::Memory,
                "sqlite" => self.session.backend = SessionBackend::Sqlite,
                _ => {}
            }
        }

        if let Ok(path) = std::env::var("PRAETOR_SESSION_DB") {
            if !path.is_empty() {
                self.session.db_path = Some(PathBuf::from(path));
            }
        }

        // Model/provider binding: PRAETOR_PROVIDER, PRAETOR_MODEL
        if let Ok(backend) = std::env::var("PRAETOR_PROVIDER") {
            if !backend.is_empty() {
                self.provider.backend = backend;
            }
        }
        if let Ok(model) = std::env::var("PRAETOR_MODEL") {
            if !model.is_empty() {
                self.provider.model = model;
            }
        }

        // Metrics: PRAETOR_METRICS_BACKEND, PRAETOR_METRICS_ENDPOINT
        if let Ok(backend) = std::env::var("PRAETOR_METRICS_BACKEND") {
            if !backend.is_empty() {
                self.metrics.backend = backend;
            }
        }
        if let Ok(endpoint) = std::env::var("PRAETOR_METRICS_ENDPOINT") {
            if !endpoint.is_empty() {
                self.metrics.endpoint = Some(endpoint);
            }
        }

        // Approval timeout: PRAETOR_CONFIRM_TIMEOUT_SECS
        if let Ok(secs_str) = std::env::var("PRAETOR_CONFIRM_TIMEOUT_SECS") {
            if let Ok(secs) = secs_str.parse::<u64>() {
                self.approval.timeout_secs = secs;
            }
        }

        // Scanner simulation: PRAETOR_SIMULATE
        if let Ok(flag) = std::env::var("PRAETOR_SIMULATE") {
            match flag.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => self.scanner.simulate = true,
                "0" | "false" | "no" => self.scanner.simulate = false,
                _ => {}
            }
        }

        // Watch mode: PRAETOR_WATCH_*
        if let Ok(secs_str) = std::env::var("PRAETOR_WATCH_INTERVAL_SECS") {
            if let Ok(secs) = secs_str.parse::<u64>() {
                self.watch.interval_secs = secs;
            }
        }
        if let Ok(cycles_str) = std::env::var("PRAETOR_WATCH_MAX_CYCLES") {
            if let Ok(cycles) = cycles_str.parse::<u32>() {
                self.watch.max_cycles = Some(cycles);
            }
        }
        if let Ok(days_str) = std::env::var("PRAETOR_WATCH_RETENTION_DAYS") {
            if let Ok(days) = days_str.parse::<u32>() {
                self.watch.retention_days = days;
            }
        }
        if let Ok(path) = std::env::var("PRAETOR_WATCH_DB") {
            if !path.is_empty() {
                self.watch.db_path = Some(PathBuf::from(path));
            }
        }
    }

    fn expand_paths(&mut self) {
        self.data_dir = expand_path(&self.data_dir);
        if let Some(p) = &self.audit.log_path {
            self.audit.log_path = Some(expand_path(p));
        }
        if let Some(p) = &self.policy.rules_path {
            self.policy.rules_path = Some(expand_path(p));
        }
        if let Some(p) = &self.session.db_path {
            self.session.db_path = Some(expand_path(p));
        }
        if let Some(p) = &self.watch.db_path {
            self.watch.db_path = Some(expand_path(p));
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.audit.queue_capacity == 0 {
            bail!("audit.queue_capacity must be greater than zero");
        }
        if self.policy.max_exec_timeout_secs == 0 {
            bail!("policy.max_exec_timeout_secs must be greater than zero");
        }
        if self.approval.timeout_secs == 0 {
            bail!("approval.timeout_secs must be greater than zero");
        }
        if self.watch.interval_secs == 0 {
            bail!("watch.interval_secs must be greater than zero");
        }
        if self.watch.retention_days == 0 {
            bail!("watch.retention_days must be greater than zero");
        }
        if self.scanner.max_targets == 0 {
            bail!("scanner.max_targets must be greater than zero");
        }
        Ok(())
    }

    // ── Resolved paths ───────────────────────────────────────────────────

    pub fn audit_log_path(&self) -> PathBuf {
        match &self.audit.log_path {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => self.data_dir.join(p),
            None => self.data_dir.join("audit").join("audit.jsonl"),
        }
    }

    pub fn session_db_path(&self) -> PathBuf {
        match &self.session.db_path {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => self.data_dir.join(p),
            None => self.data_dir.join("sessions.db"),
        }
    }

    pub fn watch_db_path(&self) -> PathBuf {
        match &self.watch.db_path {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => self.data_dir.join(p),
            None => self.data_dir.join("watch_history.db"),
        }
    }

    pub fn approval_timeout(&self) -> Duration {
        Duration::from_secs(self.approval.timeout_secs)
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.policy.max_exec_timeout_secs)
    }
}

fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(raw.as_ref()).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_guard() -> std::sync::MutexGuard<'static, ()> {
        ENV_LOCK
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    #[test]
    fn defaults_validate() {
        let config = PraetorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.audit.queue_capacity, 256);
        assert_eq!(config.approval.timeout_secs, 30);
        assert_eq!(config.policy.max_exec_timeout_secs, 60);
        assert_eq!(config.watch.interval_secs, 300);
        assert!(config.scanner.simulate);
    }

    #[test]
    fn parse_partial_toml_fills_defaults() {
        let toml_str = r#"
            [approval]
            mode = "deny"
            timeout_secs = 5

            [session]
            backend = "sqlite"
        "#;
        let config: PraetorConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.approval.mode, ApprovalMode::Deny);
        assert_eq!(config.approval.timeout_secs, 5);
        assert_eq!(config.session.backend, SessionBackend::Sqlite);
        // Untouched sections keep their defaults.
        assert_eq!(config.audit.queue_capacity, 256);
        assert_eq!(config.metrics.backend, "log");
    }

    #[test]
    fn zero_queue_capacity_fails_validation() {
        let mut config = PraetorConfig::default();
        config.audit.queue_capacity = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("queue_capacity"));
    }

    #[test]
    fn env_overrides_apply() {
        let _guard = env_guard();
        unsafe {
            std::env::set_var("PRAETOR_AUDIT_LOG", "/tmp/praetor-audit.jsonl");
            std::env::set_var("PRAETOR_SESSION_BACKEND", "sqlite");
            std::env::set_var("PRAETOR_CONFIRM_TIMEOUT_SECS", "7");
            std::env::set_var("PRAETOR_SIMULATE", "false");
        }

        let mut config = PraetorConfig::default();
        config.apply_env_overrides();

        unsafe {
            std::env::remove_var("PRAETOR_AUDIT_LOG");
            std::env::remove_var("PRAETOR_SESSION_BACKEND");
            std::env::remove_var("PRAETOR_CONFIRM_TIMEOUT_SECS");
            std::env::remove_var("PRAETOR_SIMULATE");
        }

        assert_eq!(
            config.audit.log_path,
            Some(PathBuf::from("/tmp/praetor-audit.jsonl"))
        );
        assert_eq!(config.session.backend, SessionBackend::Sqlite);
        assert_eq!(config.approval.timeout_secs, 7);
        assert!(!config.scanner.simulate);
    }

    #[test]
    fn audit_log_path_compat_env_honored() {
        let _guard = env_guard();
        unsafe {
            std::env::set_var("AUDIT_LOG_PATH", "/tmp/compat-audit.jsonl");
        }
        let mut config = PraetorConfig::default();
        config.apply_env_overrides();
        unsafe {
            std::env::remove_var("AUDIT_LOG_PATH");
        }
        assert_eq!(
            config.audit.log_path,
            Some(PathBuf::from("/tmp/compat-audit.jsonl"))
        );
    }

    #[test]
    fn relative_audit_path_resolves_under_data_dir() {
        let mut config = PraetorConfig::default();
        config.data_dir = PathBuf::from("/var/lib/praetor");
        config.audit.log_path = Some(PathBuf::from("trail/audit.jsonl"));
        assert_eq!(
            config.audit_log_path(),
            PathBuf::from("/var/lib/praetor/trail/audit.jsonl")
        );
    }
}
