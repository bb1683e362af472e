//! Watch mode: repeated pipeline runs on a fixed interval.
//!
//! Each cycle drives one full pipeline run, stores a compact snapshot row in
//! SQLite, logs how the posture moved against the previous cycle, and prunes
//! rows older than the retention window. A fatal run is recorded and watching
//! continues; only cancellation or `max_cycles` stops the loop.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use tokio_util::sync::CancellationToken;

use crate::config::PraetorConfig;
use crate::error::{PipelineError, PraetorError};
use crate::observability::{Observer, ObserverMetric, create_observer};
use crate::pipeline::controller::PipelineController;
use crate::pipeline::report::RunReport;
use crate::scenario::ThreatScenario;

const SCHEMA_META_TABLE: &str = "
CREATE TABLE IF NOT EXISTS watch_schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
)";

const SNAPSHOTS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS watch_snapshots (
    cycle      INTEGER NOT NULL,
    run_id     TEXT NOT NULL,
    scenario   TEXT,
    severity   TEXT,
    findings   INTEGER NOT NULL,
    status     TEXT NOT NULL,
    created_at TEXT NOT NULL
)";

const SCHEMA_VERSION_KEY: &str = "watch_schema_version";
const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleSnapshot {
    pub cycle: u64,
    pub run_id: String,
    pub scenario: Option<String>,
    pub severity: Option<String>,
    pub findings: u64,
    pub status: String,
    pub created_at: String,
}

/// SQLite-backed snapshot history shared across watch invocations.
pub struct WatchStore {
    pool: SqlitePool,
}

impl WatchStore {
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create watch history dir {}", parent.display()))?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options)
            .await
            .with_context(|| format!("open watch history {}", path.display()))?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .context("open in-memory watch history")?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(SCHEMA_META_TABLE)
            .execute(&self.pool)
            .await
            .context("create watch_schema_meta table")?;

        let stored: Option<(String,)> =
            sqlx::query_as("SELECT value FROM watch_schema_meta WHERE key = $1")
                .bind(SCHEMA_VERSION_KEY)
                .fetch_optional(&self.pool)
                .await
                .context("load watch schema version")?;

        if let Some((value,)) = stored {
            let parsed = value
                .parse::<u32>()
                .with_context(|| format!("invalid watch schema version value: {value}"))?;
            anyhow::ensure!(
                parsed == SCHEMA_VERSION,
                "incompatible watch schema version: stored={parsed}, expected={SCHEMA_VERSION}. \
remove the watch database and rerun."
            );
        } else {
            sqlx::query("INSERT INTO watch_schema_meta (key, value) VALUES ($1, $2)")
                .bind(SCHEMA_VERSION_KEY)
                .bind(SCHEMA_VERSION.to_string())
                .execute(&self.pool)
                .await
                .context("store watch schema version")?;
        }

        sqlx::query(SNAPSHOTS_TABLE)
            .execute(&self.pool)
            .await
            .context("create watch_snapshots table")?;
        Ok(())
    }

    pub async fn record(&self, snapshot: &CycleSnapshot) -> Result<()> {
        sqlx::query(
            "INSERT INTO watch_snapshots \
             (cycle, run_id, scenario, severity, findings, status, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(i64::try_from(snapshot.cycle).unwrap_or(i64::MAX))
        .bind(&snapshot.run_id)
        .bind(&snapshot.scenario)
        .bind(&snapshot.severity)
        .bind(i64::try_from(snapshot.findings).unwrap_or(i64::MAX))
        .bind(&snapshot.status)
        .bind(&snapshot.created_at)
        .execute(&self.pool)
        .await
        .context("record watch snapshot")?;
        Ok(())
    }

    /// Delete snapshots older than the retention window. RFC 3339 UTC
    /// timestamps compare correctly as text.
    pub async fn prune(&self, retention_days: u32) -> Result<u64> {
        let cutoff = (Utc::now() - chrono::Duration::days(i64::from(retention_days)))
            .to_rfc3339();
        let result = sqlx::query("DELETE FROM watch_snapshots WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .context("prune watch snapshots")?;
        Ok(result.rows_affected())
    }

    pub async fn snapshots(&self) -> Result<Vec<CycleSnapshot>> {
        let rows = sqlx::query(
            "SELECT cycle, run_id, scenario, severity, findings, status, created_at \
             FROM watch_snapshots ORDER BY cycle ASC",
        )
        .fetch_all(&self.pool)
        .await
        .context("load watch snapshots")?;

        Ok(rows
            .into_iter()
            .map(|row| CycleSnapshot {
                cycle: u64::try_from(row.get::<i64, _>("cycle")).unwrap_or(0),
                run_id: row.get("run_id"),
                scenario: row.get("scenario"),
                severity: row.get("severity"),
                findings: u64::try_from(row.get::<i64, _>("findings")).unwrap_or(0),
                status: row.get("status"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

pub struct WatchScheduler {
    config: PraetorConfig,
    scenario: Option<ThreatScenario>,
    cancel: CancellationToken,
}

impl WatchScheduler {
    pub fn new(config: PraetorConfig, scenario: Option<ThreatScenario>) -> Self {
        Self {
            config,
            scenario,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run cycles until cancelled or `max_cycles` is reached. Returns the
    /// number of completed cycles.
    pub async fn run(self) -> crate::error::Result<u64> {
        let db_path = self.config.watch_db_path();
        let store = WatchStore::open(&db_path)
            .await
            .map_err(PraetorError::Other)?;
        let observer: Arc<dyn Observer> = Arc::from(create_observer(&self.config.metrics));

        let interval_secs = self.config.watch.interval_secs.max(1);
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut cycle: u64 = 0;
        let mut previous: Option<CycleSnapshot> = None;

        tracing::info!(
            interval_secs,
            max_cycles = ?self.config.watch.max_cycles,
            db = %db_path.display(),
            "watch mode started"
        );

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tracing::info!(cycles = cycle, "watch mode cancelled");
                    break;
                }
                _ = ticker.tick() => {}
            }

            cycle += 1;
            let snapshot = self.run_cycle(cycle).await;
            observer.record_metric(&ObserverMetric::WatchCycle(cycle));
            observer.record_metric(&ObserverMetric::FindingsCount(snapshot.findings));

            if let Some(prev) = &previous {
                log_delta(prev, &snapshot);
            }
            if let Err(e) = store.record(&snapshot).await {
                tracing::warn!(error = %e, "watch snapshot write failed");
            }
            match store.prune(self.config.watch.retention_days).await {
                Ok(0) => {}
                Ok(pruned) => tracing::debug!(pruned, "expired watch snapshots removed"),
                Err(e) => tracing::warn!(error = %e, "watch snapshot prune failed"),
            }
            previous = Some(snapshot);

            if self.cancel.is_cancelled() {
                tracing::info!(cycles = cycle, "watch mode cancelled");
                break;
            }
            if let Some(max) = self.config.watch.max_cycles {
                if cycle >= u64::from(max) {
                    tracing::info!(cycles = cycle, "watch cycle budget reached");
                    break;
                }
            }
        }

        store.close().await;
        Ok(cycle)
    }

    async fn run_cycle(&self, cycle: u64) -> CycleSnapshot {
        tracing::info!(cycle, "watch cycle starting");
        let controller =
            PipelineController::new(self.config.clone(), self.scenario.clone())
                .with_cancel(self.cancel.child_token());

        match controller.run().await {
            Ok(report) => snapshot_from_report(cycle, &report),
            Err(PraetorError::Pipeline(PipelineError::Fatal { reason, partial })) => {
                tracing::error!(cycle, %reason, "watch cycle ended fatally");
                let mut snapshot = snapshot_from_report(cycle, &partial);
                snapshot.status = "fatal".to_string();
                snapshot
            }
            Err(e) => {
                tracing::error!(cycle, error = %e, "watch cycle failed before running");
                CycleSnapshot {
                    cycle,
                    run_id: String::new(),
                    scenario: self.scenario.as_ref().map(|s| s.name.clone()),
                    severity: None,
                    findings: 0,
                    status: "error".to_string(),
                    created_at: Utc::now().to_rfc3339(),
                }
            }
        }
    }
}

fn snapshot_from_report(cycle: u64, report: &RunReport) -> CycleSnapshot {
    CycleSnapshot {
        cycle,
        run_id: report.run_id.to_string(),
        scenario: report.scenario.clone(),
        severity: report.verdict.as_ref().map(|v| v.severity.to_string()),
        findings: finding_count(report),
        status: report.status.to_string(),
        created_at: Utc::now().to_rfc3339(),
    }
}

fn finding_count(report: &RunReport) -> u64 {
    report
        .stages
        .iter()
        .filter(|stage| stage.stage == "analysis")
        .flat_map(|stage| &stage.results)
        .filter(|result| result.unit == "vuln_auditor")
        .filter_map(|result| result.payload.get("finding_count"))
        .filter_map(serde_json::Value::as_u64)
        .sum()
}

fn log_delta(prev: &CycleSnapshot, current: &CycleSnapshot) {
    if prev.severity == current.severity && prev.findings == current.findings {
        tracing::info!(
            cycle = current.cycle,
            severity = ?current.severity,
            findings = current.findings,
            "posture unchanged since previous cycle"
        );
        return;
    }
    tracing::warn!(
        cycle = current.cycle,
        previous_severity = ?prev.severity,
        severity = ?current.severity,
        previous_findings = prev.findings,
        findings = current.findings,
        "posture changed since previous cycle"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(cycle: u64, findings: u64) -> CycleSnapshot {
        CycleSnapshot {
            cycle,
            run_id: format!("run-{cycle}"),
            scenario: Some("ransomware".to_string()),
            severity: Some("critical".to_string()),
            findings,
            status: "completed".to_string(),
            created_at: Utc::now().to_rfc3339(),
        }
    }

    #[tokio::test]
    async fn snapshots_round_trip_in_cycle_order() {
        let store = WatchStore::open_in_memory().await.unwrap();
        store.record(&snapshot(2, 4)).await.unwrap();
        store.record(&snapshot(1, 3)).await.unwrap();

        let rows = store.snapshots().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].cycle, 1);
        assert_eq!(rows[1].cycle, 2);
        assert_eq!(rows[1].findings, 4);
        store.close().await;
    }

    #[tokio::test]
    async fn prune_removes_only_expired_rows() {
        let store = WatchStore::open_in_memory().await.unwrap();
        let mut old = snapshot(1, 1);
        old.created_at = (Utc::now() - chrono::Duration::days(45)).to_rfc3339();
        store.record(&old).await.unwrap();
        store.record(&snapshot(2, 2)).await.unwrap();

        let pruned = store.prune(30).await.unwrap();
        assert_eq!(pruned, 1);
        let rows = store.snapshots().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].cycle, 2);
        store.close().await;
    }

    #[tokio::test]
    async fn schema_version_survives_reopen_of_same_pool() {
        let store = WatchStore::open_in_memory().await.unwrap();
        store.ensure_schema().await.unwrap();
        let rows = sqlx::query("SELECT value FROM watch_schema_meta")
            .fetch_all(&store.pool)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        store.close().await;
    }
}
