//! Run control
//!
//! Every extraction attempt is one row in the `ingest_runs` control table:
//! created STARTED before the first request, finalized exactly once to
//! SUCCEEDED or FAILED, never deleted. The watermark is not stored anywhere —
//! it is the maximum `last_indexed_date` over SUCCEEDED rows for the
//! (source, endpoint) pair, so the run log and the watermark cannot disagree,
//! and a crashed (forever-STARTED) run can never poison the mark.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fecsync_common::{Result, SyncError};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::debug;

/// Run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    #[serde(rename = "STARTED")]
    Started,
    #[serde(rename = "SUCCEEDED")]
    Succeeded,
    #[serde(rename = "FAILED")]
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &str {
        match self {
            RunStatus::Started => "STARTED",
            RunStatus::Succeeded => "SUCCEEDED",
            RunStatus::Failed => "FAILED",
        }
    }

    /// Terminal states admit no further transition
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Started)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "STARTED" => Ok(RunStatus::Started),
            "SUCCEEDED" => Ok(RunStatus::Succeeded),
            "FAILED" => Ok(RunStatus::Failed),
            _ => Err(SyncError::control(format!("invalid run status: {s}"))),
        }
    }
}

impl TryFrom<String> for RunStatus {
    type Error = SyncError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

/// One audit row from the control table
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RunRecord {
    pub run_id: i64,
    pub source: String,
    pub endpoint: String,
    #[sqlx(try_from = "String")]
    pub status: RunStatus,
    pub last_indexed_date: Option<DateTime<Utc>>,
    pub rows_loaded: i64,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Run lifecycle and watermark resolution, as a seam so the orchestrator can
/// be exercised without a warehouse
#[async_trait]
pub trait RunControl: Send + Sync {
    /// Insert a STARTED run record and return its identifier
    async fn begin(&self, source: &str, endpoint: &str) -> Result<i64>;

    /// Move exactly that record to a terminal state. Finishing a run that is
    /// not STARTED (unknown, or already terminal) is a control error.
    async fn finish(
        &self,
        run_id: i64,
        status: RunStatus,
        last_indexed_date: Option<DateTime<Utc>>,
        rows_loaded: i64,
        notes: Option<&str>,
    ) -> Result<()>;

    /// Current watermark for the pair: max `last_indexed_date` over SUCCEEDED
    /// runs, or None when no successful run exists (first-run case)
    async fn get_watermark(
        &self,
        source: &str,
        endpoint: &str,
    ) -> Result<Option<DateTime<Utc>>>;
}

/// Control table implementation over PostgreSQL
#[derive(Clone)]
pub struct PgRunControl {
    pool: PgPool,
}

impl PgRunControl {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the control table and its lookup index if absent
    pub async fn ensure_control_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ingest_runs (
                run_id            BIGSERIAL PRIMARY KEY,
                source            TEXT NOT NULL,
                endpoint          TEXT NOT NULL,
                status            TEXT NOT NULL,
                last_indexed_date TIMESTAMPTZ,
                rows_loaded       BIGINT NOT NULL DEFAULT 0,
                notes             TEXT,
                created_at        TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::control(format!("failed to create ingest_runs: {e}")))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_ingest_runs_pair_status
            ON ingest_runs (source, endpoint, status)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::control(format!("failed to index ingest_runs: {e}")))?;

        Ok(())
    }

    /// Recent run records, newest first, optionally filtered to one source
    pub async fn recent_runs(&self, source: Option<&str>, limit: i64) -> Result<Vec<RunRecord>> {
        let runs = match source {
            Some(source) => {
                sqlx::query_as::<_, RunRecord>(
                    r#"
                    SELECT run_id, source, endpoint, status, last_indexed_date,
                           rows_loaded, notes, created_at
                    FROM ingest_runs
                    WHERE source = $1
                    ORDER BY run_id DESC
                    LIMIT $2
                    "#,
                )
                .bind(source)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            },
            None => {
                sqlx::query_as::<_, RunRecord>(
                    r#"
                    SELECT run_id, source, endpoint, status, last_indexed_date,
                           rows_loaded, notes, created_at
                    FROM ingest_runs
                    ORDER BY run_id DESC
                    LIMIT $1
                    "#,
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            },
        };

        runs.map_err(|e| SyncError::control(format!("failed to list runs: {e}")))
    }
}

#[async_trait]
impl RunControl for PgRunControl {
    async fn begin(&self, source: &str, endpoint: &str) -> Result<i64> {
        let run_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO ingest_runs (source, endpoint, status)
            VALUES ($1, $2, $3)
            RETURNING run_id
            "#,
        )
        .bind(source)
        .bind(endpoint)
        .bind(RunStatus::Started.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| SyncError::control(format!("failed to begin run: {e}")))?;

        debug!(run_id, source, endpoint, "run record created");
        Ok(run_id)
    }

    async fn finish(
        &self,
        run_id: i64,
        status: RunStatus,
        last_indexed_date: Option<DateTime<Utc>>,
        rows_loaded: i64,
        notes: Option<&str>,
    ) -> Result<()> {
        if !status.is_terminal() {
            return Err(SyncError::control(format!(
                "run {run_id} cannot be finished with non-terminal status {status}"
            )));
        }

        let result = sqlx::query(
            r#"
            UPDATE ingest_runs
            SET status = $2, last_indexed_date = $3, rows_loaded = $4, notes = $5
            WHERE run_id = $1 AND status = 'STARTED'
            "#,
        )
        .bind(run_id)
        .bind(status.as_str())
        .bind(last_indexed_date)
        .bind(rows_loaded)
        .bind(notes)
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::control(format!("failed to finish run {run_id}: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(SyncError::control(format!(
                "run {run_id} is not in STARTED state (unknown or already finalized)"
            )));
        }

        debug!(run_id, %status, rows_loaded, "run record finalized");
        Ok(())
    }

    async fn get_watermark(
        &self,
        source: &str,
        endpoint: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let watermark: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            SELECT MAX(last_indexed_date)
            FROM ingest_runs
            WHERE source = $1 AND endpoint = $2 AND status = 'SUCCEEDED'
            "#,
        )
        .bind(source)
        .bind(endpoint)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| SyncError::control(format!("failed to resolve watermark: {e}")))?;

        Ok(watermark)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_display() {
        assert_eq!(RunStatus::Started.to_string(), "STARTED");
        assert_eq!(RunStatus::Succeeded.to_string(), "SUCCEEDED");
        assert_eq!(RunStatus::Failed.to_string(), "FAILED");
    }

    #[test]
    fn test_run_status_from_str() {
        assert_eq!("STARTED".parse::<RunStatus>().unwrap(), RunStatus::Started);
        assert_eq!("succeeded".parse::<RunStatus>().unwrap(), RunStatus::Succeeded);
        assert_eq!("Failed".parse::<RunStatus>().unwrap(), RunStatus::Failed);
        assert!("RUNNING".parse::<RunStatus>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!RunStatus::Started.is_terminal());
        assert!(RunStatus::Succeeded.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
    }
}
