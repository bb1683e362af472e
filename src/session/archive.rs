//! Optional SQLite archive of a finished session.
//!
//! Written once at run end when `session.backend = "sqlite"`; never read on
//! the run path. The schema carries a version row so an incompatible old
//! database fails loudly instead of being silently reinterpreted.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};

use super::Session;

const SCHEMA_META_TABLE: &str = "
CREATE TABLE IF NOT EXISTS archive_schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
)";

const SESSIONS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS archived_sessions (
    id          TEXT PRIMARY KEY,
    created_at  TEXT NOT NULL,
    archived_at TEXT NOT NULL,
    status      TEXT NOT NULL,
    state       TEXT NOT NULL,
    artifacts   TEXT NOT NULL
)";

const SCHEMA_VERSION_KEY: &str = "archive_schema_version";
const SCHEMA_VERSION: u32 = 1;

pub struct SessionArchive {
    pool: SqlitePool,
}

impl SessionArchive {
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create archive dir {}", parent.display()))?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options)
            .await
            .with_context(|| format!("open session archive {}", path.display()))?;
        let archive = Self { pool };
        archive.ensure_schema().await?;
        Ok(archive)
    }

    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .context("open in-memory session archive")?;
        let archive = Self { pool };
        archive.ensure_schema().await?;
        Ok(archive)
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(SCHEMA_META_TABLE)
            .execute(&self.pool)
            .await
            .context("create archive_schema_meta table")?;

        let stored: Option<(String,)> =
            sqlx::query_as("SELECT value FROM archive_schema_meta WHERE key = $1")
                .bind(SCHEMA_VERSION_KEY)
                .fetch_optional(&self.pool)
                .await
                .context("load archive schema version")?;

        if let Some((value,)) = stored {
            let parsed = value
                .parse::<u32>()
                .with_context(|| format!("invalid archive schema version value: {value}"))?;
            anyhow::ensure!(
                parsed == SCHEMA_VERSION,
                "incompatible archive schema version: stored={parsed}, expected={SCHEMA_VERSION}. \
remove the archive database and rerun."
            );
        } else {
            sqlx::query("INSERT INTO archive_schema_meta (key, value) VALUES ($1, $2)")
                .bind(SCHEMA_VERSION_KEY)
                .bind(SCHEMA_VERSION.to_string())
                .execute(&self.pool)
                .await
                .context("store archive schema version")?;
        }

        sqlx::query(SESSIONS_TABLE)
            .execute(&self.pool)
            .await
            .context("create archived_sessions table")?;
        Ok(())
    }

    /// Persist the finished session with its final run status.
    pub async fn store(&self, session: &Session, status: &str) -> Result<()> {
        let state = serde_json::to_string(&session.state_json())
            .context("serialize session state")?;
        let artifacts = serde_json::to_string(session.artifacts())
            .context("serialize session artifacts")?;

        sqlx::query(
            "INSERT OR REPLACE INTO archived_sessions \
             (id, created_at, archived_at, status, state, artifacts) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(session.id.to_string())
        .bind(session.created_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .bind(status)
        .bind(state)
        .bind(artifacts)
        .execute(&self.pool)
        .await
        .context("archive session")?;
        Ok(())
    }

    pub async fn count(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM archived_sessions")
            .fetch_one(&self.pool)
            .await
            .context("count archived sessions")?;
        let n: i64 = row.get("n");
        Ok(u64::try_from(n).unwrap_or(0))
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
