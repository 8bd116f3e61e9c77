//! SQLite-backed persistence for workflow runs and their step journal.
//! Survives restarts: a sleeping run is nothing more than a row with `resume_at`.

use chrono::{DateTime, TimeZone, Utc};
use pmsync_core::error::{Result, SyncError};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Sleeping,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Sleeping => "sleeping",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "running" => Some(RunStatus::Running),
            "sleeping" => Some(RunStatus::Sleeping),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

/// One durable execution of a workflow for one triggering event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: String,
    pub function_id: String,
    pub event_name: String,
    /// Identifying context saved at trigger time; the only input a replay gets.
    pub event_data: serde_json::Value,
    pub status: RunStatus,
    pub resume_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// SQLite store for runs and steps.
pub struct SchedulerDb {
    conn: Mutex<Connection>,
}

fn db_err(context: &str, e: rusqlite::Error) -> SyncError {
    SyncError::Scheduler(format!("{context}: {e}"))
}

/// A stored value that does not decode; surfaces as a scheduler error.
fn corrupt(column: usize, detail: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, detail.into())
}

fn parse_rfc3339(column: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| corrupt(column, format!("bad timestamp '{raw}': {e}")))
}

fn from_millis(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

const RUN_SELECT: &str = "SELECT id, function_id, event_name, event_data, status, resume_at, last_error, created_at, updated_at FROM workflow_runs";

fn row_to_run(row: &rusqlite::Row) -> rusqlite::Result<WorkflowRun> {
    let event_data: String = row.get(3)?;
    let status: String = row.get(4)?;
    let created_at: String = row.get(7)?;
    let updated_at: String = row.get(8)?;
    Ok(WorkflowRun {
        id: row.get(0)?,
        function_id: row.get(1)?,
        event_name: row.get(2)?,
        event_data: serde_json::from_str(&event_data)
            .map_err(|e| corrupt(3, format!("bad event data: {e}")))?,
        status: RunStatus::parse(&status)
            .ok_or_else(|| corrupt(4, format!("unknown run status '{status}'")))?,
        resume_at: from_millis(row.get(5)?),
        last_error: row.get(6)?,
        created_at: parse_rfc3339(7, &created_at)?,
        updated_at: parse_rfc3339(8, &updated_at)?,
    })
}

impl SchedulerDb {
    /// Open or create the scheduler database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| db_err("DB open", e))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| db_err("DB open", e))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| SyncError::Scheduler(format!("Lock: {e}")))
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS workflow_runs (
                id TEXT PRIMARY KEY,
                function_id TEXT NOT NULL,
                event_name TEXT NOT NULL,
                event_data TEXT NOT NULL,        -- JSON payload of the triggering event
                status TEXT NOT NULL DEFAULT 'running',
                resume_at INTEGER,               -- unix millis, set while sleeping
                last_error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Journal of completed steps; a row here means the step never runs again
            CREATE TABLE IF NOT EXISTS workflow_steps (
                run_id TEXT NOT NULL,
                step_name TEXT NOT NULL,
                output TEXT NOT NULL,            -- JSON
                completed_at TEXT NOT NULL,
                PRIMARY KEY (run_id, step_name),
                FOREIGN KEY (run_id) REFERENCES workflow_runs(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_runs_wakeup ON workflow_runs(status, resume_at);
         ",
        )
        .map_err(|e| db_err("Migration", e))?;
        Ok(())
    }

    // ─── Runs ──────────────────────────────────────

    /// Insert a new run in `running` state.
    pub fn create_run(
        &self,
        function_id: &str,
        event_name: &str,
        event_data: &serde_json::Value,
    ) -> Result<WorkflowRun> {
        let now = Utc::now();
        let run = WorkflowRun {
            id: format!("run-{}", uuid::Uuid::new_v4().simple()),
            function_id: function_id.to_string(),
            event_name: event_name.to_string(),
            event_data: event_data.clone(),
            status: RunStatus::Running,
            resume_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO workflow_runs (id, function_id, event_name, event_data, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                run.id,
                run.function_id,
                run.event_name,
                run.event_data.to_string(),
                run.status.as_str(),
                now.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )
        .map_err(|e| db_err("Create run", e))?;
        Ok(run)
    }

    pub fn get_run(&self, id: &str) -> Result<Option<WorkflowRun>> {
        let conn = self.lock()?;
        conn.query_row(&format!("{RUN_SELECT} WHERE id = ?1"), [id], row_to_run)
            .optional()
            .map_err(|e| db_err("Get run", e))
    }

    /// Most recent runs first.
    pub fn list_runs(&self, limit: usize) -> Result<Vec<WorkflowRun>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!("{RUN_SELECT} ORDER BY created_at DESC, id LIMIT ?1"))
            .map_err(|e| db_err("List runs", e))?;
        let rows = stmt
            .query_map([limit as i64], row_to_run)
            .map_err(|e| db_err("List runs", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("List runs", e))
    }

    fn set_status(
        &self,
        id: &str,
        status: RunStatus,
        resume_at: Option<DateTime<Utc>>,
        last_error: Option<&str>,
    ) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE workflow_runs SET status = ?1, resume_at = ?2, last_error = ?3, updated_at = ?4
             WHERE id = ?5",
            params![
                status.as_str(),
                resume_at.map(|t| t.timestamp_millis()),
                last_error,
                Utc::now().to_rfc3339(),
                id,
            ],
        )
        .map_err(|e| db_err("Update run", e))?;
        Ok(())
    }

    /// Park a run until `resume_at`.
    pub fn mark_sleeping(&self, id: &str, resume_at: DateTime<Utc>) -> Result<()> {
        self.set_status(id, RunStatus::Sleeping, Some(resume_at), None)
    }

    pub fn mark_completed(&self, id: &str) -> Result<()> {
        self.set_status(id, RunStatus::Completed, None, None)
    }

    pub fn mark_failed(&self, id: &str, error: &str) -> Result<()> {
        self.set_status(id, RunStatus::Failed, None, Some(error))
    }

    /// Move every sleeping run whose `resume_at <= now` to `running` and return them.
    ///
    /// The state change is conditional on the row still being `sleeping`, so a
    /// run is handed to exactly one caller even when ticks overlap.
    pub fn claim_due(&self, now: DateTime<Utc>) -> Result<Vec<WorkflowRun>> {
        let conn = self.lock()?;
        let ids: Vec<String> = {
            let mut stmt = conn
                .prepare(
                    "SELECT id FROM workflow_runs
                     WHERE status = 'sleeping' AND resume_at <= ?1
                     ORDER BY resume_at",
                )
                .map_err(|e| db_err("Find due runs", e))?;
            let rows = stmt
                .query_map([now.timestamp_millis()], |row| row.get::<_, String>(0))
                .map_err(|e| db_err("Find due runs", e))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| db_err("Find due runs", e))?
        };

        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            let affected = conn
                .execute(
                    "UPDATE workflow_runs SET status = 'running', updated_at = ?1
                     WHERE id = ?2 AND status = 'sleeping'",
                    params![Utc::now().to_rfc3339(), id],
                )
                .map_err(|e| db_err("Claim run", e))?;
            if affected == 1
                && let Some(run) = conn
                    .query_row(&format!("{RUN_SELECT} WHERE id = ?1"), [&id], row_to_run)
                    .optional()
                    .map_err(|e| db_err("Load claimed run", e))?
            {
                claimed.push(run);
            }
        }
        Ok(claimed)
    }

    /// Runs left `running` by a process that died mid-execution are parked
    /// again with `resume_at = now` so the next tick replays them.
    pub fn requeue_interrupted(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE workflow_runs SET status = 'sleeping', resume_at = ?1, updated_at = ?2
             WHERE status = 'running'",
            params![now.timestamp_millis(), Utc::now().to_rfc3339()],
        )
        .map_err(|e| db_err("Requeue interrupted runs", e))
    }

    // ─── Steps ──────────────────────────────────────

    /// Journaled output of a completed step, if any.
    pub fn load_step(&self, run_id: &str, step_name: &str) -> Result<Option<serde_json::Value>> {
        let conn = self.lock()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT output FROM workflow_steps WHERE run_id = ?1 AND step_name = ?2",
                [run_id, step_name],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| db_err("Load step", e))?;
        raw.map(|s| {
            serde_json::from_str(&s)
                .map_err(|e| SyncError::Scheduler(format!("Corrupt step output for '{step_name}': {e}")))
        })
        .transpose()
    }

    pub fn save_step(&self, run_id: &str, step_name: &str, output: &serde_json::Value) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO workflow_steps (run_id, step_name, output, completed_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![run_id, step_name, output.to_string(), Utc::now().to_rfc3339()],
        )
        .map_err(|e| db_err("Save step", e))?;
        Ok(())
    }

    /// Names of completed steps in completion order.
    pub fn completed_steps(&self, run_id: &str) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT step_name FROM workflow_steps WHERE run_id = ?1 ORDER BY completed_at, rowid")
            .map_err(|e| db_err("List steps", e))?;
        let rows = stmt
            .query_map([run_id], |row| row.get::<_, String>(0))
            .map_err(|e| db_err("List steps", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("List steps", e))
    }
}
