//! SQLite-backed run history

use crate::core::RunStatus;
use crate::persistence::{HistoryBackend, RunSummary};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// SQLite run store
pub struct SqliteRunStore {
    pool: SqlitePool,
}

impl SqliteRunStore {
    /// Open (or create) a store at the given path
    pub async fn new(db_path: &str) -> Result<Self> {
        let pool = SqlitePool::connect(&format!("sqlite:{}?mode=rwc", db_path))
            .await
            .context("Failed to connect to history database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Open the store at the platform-default data path
    pub async fn with_default_path() -> Result<Self> {
        let data_dir = dirs::data_local_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        let db_dir = data_dir.join("conveyor");
        std::fs::create_dir_all(&db_dir)?;

        let db_path = db_dir.join("history.db");
        Self::new(&db_path.to_string_lossy()).await
    }

    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                workflow TEXT NOT NULL,
                "trigger" TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                total_jobs INTEGER NOT NULL DEFAULT 0,
                succeeded_jobs INTEGER NOT NULL DEFAULT 0,
                failed_jobs INTEGER NOT NULL DEFAULT 0,
                skipped_jobs INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_workflow ON runs(workflow);
            CREATE INDEX IF NOT EXISTS idx_started_at ON runs(started_at);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn summary_from_row(row: &SqliteRow) -> Result<RunSummary> {
        Ok(RunSummary {
            run_id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            workflow: row.get("workflow"),
            trigger: row.get("trigger"),
            status: match row.get::<String, _>("status").as_str() {
                "Running" => RunStatus::Running,
                "Succeeded" => RunStatus::Succeeded,
                "Failed" => RunStatus::Failed,
                "Cancelled" => RunStatus::Cancelled,
                _ => RunStatus::Pending,
            },
            started_at: Self::from_naive(row.get("started_at")),
            finished_at: row
                .get::<Option<NaiveDateTime>, _>("finished_at")
                .map(Self::from_naive),
            total_jobs: row.get::<i64, _>("total_jobs") as usize,
            succeeded_jobs: row.get::<i64, _>("succeeded_jobs") as usize,
            failed_jobs: row.get::<i64, _>("failed_jobs") as usize,
            skipped_jobs: row.get::<i64, _>("skipped_jobs") as usize,
        })
    }
}

const SELECT_COLUMNS: &str = r#"id, workflow, "trigger", status, started_at, finished_at,
    total_jobs, succeeded_jobs, failed_jobs, skipped_jobs"#;

#[async_trait::async_trait]
impl HistoryBackend for SqliteRunStore {
    async fn save_run(&self, summary: &RunSummary) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO runs
            (id, workflow, "trigger", status, started_at, finished_at,
             total_jobs, succeeded_jobs, failed_jobs, skipped_jobs)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(summary.run_id.to_string())
        .bind(&summary.workflow)
        .bind(&summary.trigger)
        .bind(format!("{:?}", summary.status))
        .bind(Self::to_naive(summary.started_at))
        .bind(summary.finished_at.map(Self::to_naive))
        .bind(summary.total_jobs as i64)
        .bind(summary.succeeded_jobs as i64)
        .bind(summary.failed_jobs as i64)
        .bind(summary.skipped_jobs as i64)
        .execute(&self.pool)
        .await
        .context("Failed to save run")?;

        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM runs WHERE id = ?1"
        ))
        .bind(run_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load run")?;

        row.as_ref().map(Self::summary_from_row).transpose()
    }

    async fn list_runs(&self, workflow: &str) -> Result<Vec<RunSummary>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM runs WHERE workflow = ?1 ORDER BY started_at DESC"
        ))
        .bind(workflow)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list runs")?;

        rows.iter().map(Self::summary_from_row).collect()
    }

    async fn latest_run(&self, workflow: &str) -> Result<Option<RunSummary>> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM runs WHERE workflow = ?1 ORDER BY started_at DESC LIMIT 1"
        ))
        .bind(workflow)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get latest run")?;

        row.as_ref().map(Self::summary_from_row).transpose()
    }

    async fn list_workflows(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT workflow FROM runs ORDER BY workflow ASC")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list workflows")?;

        Ok(rows.iter().map(|row| row.get("workflow")).collect())
    }
}
