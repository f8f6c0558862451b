use anyhow::{anyhow, Context, Result};
use chrono::Local;
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};

use crate::models::RunRecord;

pub const OUTCOME_DONE: &str = "done";
pub const OUTCOME_FAILED: &str = "failed";
pub const OUTCOME_INTERRUPTED: &str = "interrupted";

/// Ledger timestamps are local wall-clock time in this format.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn now_timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// What a finished run leaves in the ledger.
#[derive(Debug, Clone, Default)]
pub struct NewRun<'a> {
    pub sheet_row: Option<usize>,
    pub company: Option<&'a str>,
    pub job_title: Option<&'a str>,
    pub outcome: &'a str,
    pub stage: &'a str,
    pub message: Option<&'a str>,
    pub artifact: Option<&'a Path>,
    pub started_at: &'a str,
}

/// Local SQLite ledger of pipeline runs.
pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    pub fn open(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open ledger at {}", path.display()))?;
        Ok(Self { conn, path })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn default_path() -> Result<PathBuf> {
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "tailor") {
            Ok(proj_dirs.data_dir().join("tailor.db"))
        } else {
            Ok(PathBuf::from("tailor.db"))
        }
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sheet_row INTEGER,
                company TEXT,
                job_title TEXT,
                outcome TEXT NOT NULL CHECK (outcome IN ('done', 'failed', 'interrupted')),
                stage TEXT NOT NULL,
                message TEXT,
                artifact TEXT,
                started_at TEXT NOT NULL,
                finished_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_runs_row ON runs(sheet_row);
            "#,
        )?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let tables: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='runs'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(anyhow!("Ledger not initialized. Run 'tailor init' first."));
        }
        Ok(())
    }

    pub fn record_run(&self, run: &NewRun) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO runs (sheet_row, company, job_title, outcome, stage, message, artifact,
                                   started_at, finished_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    run.sheet_row.map(|r| r as i64),
                    run.company,
                    run.job_title,
                    run.outcome,
                    run.stage,
                    run.message,
                    run.artifact.map(|p| p.display().to_string()),
                    run.started_at,
                    now_timestamp(),
                ],
            )
            .context("Failed to record run")?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Most recent runs first.
    pub fn list_runs(&self, limit: usize) -> Result<Vec<RunRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, sheet_row, company, job_title, outcome, stage, message, artifact,
                    started_at, finished_at
             FROM runs ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], Self::row_to_run)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list runs")
    }

    /// Latest successful run for a sheet row, if any.
    pub fn last_done_for_row(&self, sheet_row: usize) -> Result<Option<RunRecord>> {
        let result = self.conn.query_row(
            "SELECT id, sheet_row, company, job_title, outcome, stage, message, artifact,
                    started_at, finished_at
             FROM runs WHERE sheet_row = ?1 AND outcome = 'done'
             ORDER BY id DESC LIMIT 1",
            [sheet_row as i64],
            Self::row_to_run,
        );
        match result {
            Ok(run) => Ok(Some(run)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn row_to_run(row: &rusqlite::Row) -> rusqlite::Result<RunRecord> {
        Ok(RunRecord {
            id: row.get(0)?,
            sheet_row: row.get(1)?,
            company: row.get(2)?,
            job_title: row.get(3)?,
            outcome: row.get(4)?,
            stage: row.get(5)?,
            message: row.get(6)?,
            artifact: row.get(7)?,
            started_at: row.get(8)?,
            finished_at: row.get(9)?,
        })
    }
}
