//! SQLite-backed persistence for Tasks and Runs.
//!
//! The engine consumes three contracts from this layer: load-by-filter,
//! an atomic conditional update (the claim), and a transactional
//! multi-row save (run finalize + task update). Everything else is
//! ordinary CRUD for the CLI surface.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

use taskweave_core::error::{Result, TaskweaveError};
use taskweave_core::types::{
    AsyncStatus, Run, RunStatus, Task, TaskState, TriggerKind, TriggerSource, WorkKind,
};

/// Shared SELECT column list for task queries — single source of truth.
const TASK_SELECT: &str = "SELECT id, owner_id, group_id, name, description, kind, \
     input_source, report_rule, trigger_type, trigger_value, timezone, next_due_at, \
     async_status, status, last_run_at, result_summary, config_json, created_at, updated_at \
     FROM tasks";

const RUN_SELECT: &str = "SELECT id, task_id, owner_id, group_id, trigger_source, status, \
     started_at, finished_at, summary, final_answer, confidence, trace FROM runs";

/// Map a database row to a Task.
fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<Task> {
    let kind: String = row.get(5)?;
    let trigger_type: String = row.get(8)?;
    let async_status: String = row.get(12)?;
    let status: String = row.get(13)?;
    Ok(Task {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        group_id: row.get(2)?,
        name: row.get(3)?,
        description: row.get(4)?,
        kind: WorkKind::from_str_lossy(&kind),
        input_source: row.get(6)?,
        report_rule: row.get(7)?,
        trigger_type: TriggerKind::from_str_lossy(&trigger_type),
        trigger_value: row.get(9)?,
        timezone: row.get(10)?,
        next_due_at: parse_ts_opt(row.get::<_, Option<String>>(11)?),
        async_status: AsyncStatus::from_str_lossy(&async_status),
        status: TaskState::from_str_lossy(&status),
        last_run_at: parse_ts_opt(row.get::<_, Option<String>>(14)?),
        result_summary: row.get(15)?,
        config_json: row.get(16)?,
        created_at: parse_ts(&row.get::<_, String>(17)?),
        updated_at: parse_ts(&row.get::<_, String>(18)?),
    })
}

/// Map a database row to a Run.
fn row_to_run(row: &rusqlite::Row) -> rusqlite::Result<Run> {
    let source: String = row.get(4)?;
    let status: String = row.get(5)?;
    let trace: String = row.get(11)?;
    Ok(Run {
        id: row.get(0)?,
        task_id: row.get(1)?,
        owner_id: row.get(2)?,
        group_id: row.get(3)?,
        trigger_source: TriggerSource::from_str_lossy(&source),
        status: RunStatus::from_str_lossy(&status),
        started_at: parse_ts(&row.get::<_, String>(6)?),
        finished_at: parse_ts_opt(row.get::<_, Option<String>>(7)?),
        summary: row.get(8)?,
        final_answer: row.get(9)?,
        confidence: row.get(10)?,
        trace: serde_json::from_str(&trace).unwrap_or(serde_json::Value::Null),
    })
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_ts_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|d| d.with_timezone(&Utc))
}

/// Task/Run persistence store.
pub struct TaskStore {
    conn: Mutex<Connection>,
}

impl TaskStore {
    /// Open or create the store database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| TaskweaveError::Store(format!("DB open: {e}")))?;

        // WAL allows concurrent readers while the engine writes.
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| TaskweaveError::Store(format!("DB pragma: {e}")))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Open an in-memory store (tests).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| TaskweaveError::Store(format!("DB open: {e}")))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Run schema migrations.
    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                group_id TEXT,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                kind TEXT NOT NULL DEFAULT 'general',
                input_source TEXT,
                report_rule TEXT,
                trigger_type TEXT NOT NULL DEFAULT 'manual',
                trigger_value TEXT NOT NULL DEFAULT '',
                timezone TEXT NOT NULL DEFAULT 'UTC',
                next_due_at TEXT,
                async_status TEXT NOT NULL DEFAULT 'idle',
                status TEXT NOT NULL DEFAULT 'todo',
                last_run_at TEXT,
                result_summary TEXT,
                config_json TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_due
                ON tasks(trigger_type, async_status, next_due_at);

            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                group_id TEXT,
                trigger_source TEXT NOT NULL DEFAULT 'manual',
                status TEXT NOT NULL DEFAULT 'running',
                started_at TEXT NOT NULL,
                finished_at TEXT,
                summary TEXT NOT NULL DEFAULT '',
                final_answer TEXT NOT NULL DEFAULT '',
                confidence REAL NOT NULL DEFAULT 0,
                trace TEXT NOT NULL DEFAULT 'null'
            );
            CREATE INDEX IF NOT EXISTS idx_runs_task
                ON runs(task_id, status, finished_at);
            ",
        )
        .map_err(|e| TaskweaveError::Store(format!("Migration: {e}")))?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| TaskweaveError::Store(format!("Lock: {e}")))
    }

    // ─── Tasks ────────────────────────────────────────────────

    /// Insert or replace a task row.
    pub fn save_task(&self, task: &Task) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO tasks
             (id, owner_id, group_id, name, description, kind, input_source, report_rule,
              trigger_type, trigger_value, timezone, next_due_at, async_status, status,
              last_run_at, result_summary, config_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
            params![
                task.id,
                task.owner_id,
                task.group_id,
                task.name,
                task.description,
                task.kind.as_str(),
                task.input_source,
                task.report_rule,
                task.trigger_type.as_str(),
                task.trigger_value,
                task.timezone,
                task.next_due_at.map(|t| t.to_rfc3339()),
                task.async_status.as_str(),
                task.status.as_str(),
                task.last_run_at.map(|t| t.to_rfc3339()),
                task.result_summary,
                task.config_json,
                task.created_at.to_rfc3339(),
                task.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| TaskweaveError::Store(format!("Save task: {e}")))?;
        Ok(())
    }

    /// Load one task by id.
    pub fn get_task(&self, id: &str) -> Result<Option<Task>> {
        let conn = self.lock()?;
        let sql = format!("{TASK_SELECT} WHERE id = ?1");
        match conn.query_row(&sql, [id], row_to_task) {
            Ok(task) => Ok(Some(task)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(TaskweaveError::Store(format!("Get task: {e}"))),
        }
    }

    /// Load one task by id, scoped to its owner.
    pub fn get_task_for_owner(&self, id: &str, owner_id: &str) -> Result<Option<Task>> {
        let conn = self.lock()?;
        let sql = format!("{TASK_SELECT} WHERE id = ?1 AND owner_id = ?2");
        match conn.query_row(&sql, [id, owner_id], row_to_task) {
            Ok(task) => Ok(Some(task)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(TaskweaveError::Store(format!("Get task: {e}"))),
        }
    }

    /// List tasks for an owner, newest first.
    pub fn list_tasks(&self, owner_id: &str) -> Result<Vec<Task>> {
        let conn = self.lock()?;
        let sql = format!("{TASK_SELECT} WHERE owner_id = ?1 ORDER BY created_at DESC");
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| TaskweaveError::Store(format!("List tasks: {e}")))?;
        let rows = stmt
            .query_map([owner_id], row_to_task)
            .map_err(|e| TaskweaveError::Store(format!("List tasks: {e}")))?;
        Ok(rows.filter_map(|t| t.ok()).collect())
    }

    /// The exclusive-claim conditional update: flip `async_status` to
    /// `running` iff the task belongs to the owner and is not already
    /// running. Returns whether this caller won the transition. A lost
    /// race is `Ok(false)`, never an error.
    pub fn claim_task(&self, id: &str, owner_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let rows = conn
            .execute(
                "UPDATE tasks SET async_status = 'running', updated_at = ?1
                 WHERE id = ?2 AND owner_id = ?3 AND async_status != 'running'",
                params![Utc::now().to_rfc3339(), id, owner_id],
            )
            .map_err(|e| TaskweaveError::Store(format!("Claim: {e}")))?;
        Ok(rows == 1)
    }

    /// Scan for due tasks: non-manual trigger, due at or before `now`,
    /// and in a claimable status. FIFO by due time, capped.
    pub fn due_tasks(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Task>> {
        let conn = self.lock()?;
        let sql = format!(
            "{TASK_SELECT} WHERE trigger_type != 'manual'
               AND next_due_at IS NOT NULL AND next_due_at <= ?1
               AND async_status IN ('scheduled', 'idle')
             ORDER BY next_due_at ASC LIMIT ?2"
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| TaskweaveError::Store(format!("Due scan: {e}")))?;
        let rows = stmt
            .query_map(params![now.to_rfc3339(), limit as i64], row_to_task)
            .map_err(|e| TaskweaveError::Store(format!("Due scan: {e}")))?;
        Ok(rows.filter_map(|t| t.ok()).collect())
    }

    // ─── Runs ─────────────────────────────────────────────────

    /// Insert a freshly opened run row.
    pub fn insert_run(&self, run: &Run) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO runs
             (id, task_id, owner_id, group_id, trigger_source, status, started_at,
              finished_at, summary, final_answer, confidence, trace)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                run.id,
                run.task_id,
                run.owner_id,
                run.group_id,
                run.trigger_source.as_str(),
                run.status.as_str(),
                run.started_at.to_rfc3339(),
                run.finished_at.map(|t| t.to_rfc3339()),
                run.summary,
                run.final_answer,
                run.confidence,
                run.trace.to_string(),
            ],
        )
        .map_err(|e| TaskweaveError::Store(format!("Insert run: {e}")))?;
        Ok(())
    }

    /// List recent runs for a task, newest first.
    pub fn list_runs(&self, task_id: &str, limit: usize) -> Result<Vec<Run>> {
        let conn = self.lock()?;
        let sql = format!("{RUN_SELECT} WHERE task_id = ?1 ORDER BY started_at DESC LIMIT ?2");
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| TaskweaveError::Store(format!("List runs: {e}")))?;
        let rows = stmt
            .query_map(params![task_id, limit as i64], row_to_run)
            .map_err(|e| TaskweaveError::Store(format!("List runs: {e}")))?;
        Ok(rows.filter_map(|t| t.ok()).collect())
    }

    /// Count failed runs for a task finished at or after `since`.
    /// Drives the failure-cycle budget.
    pub fn count_failed_runs_since(&self, task_id: &str, since: DateTime<Utc>) -> Result<i64> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT COUNT(*) FROM runs
             WHERE task_id = ?1 AND status = 'failed'
               AND finished_at IS NOT NULL AND finished_at >= ?2",
            params![task_id, since.to_rfc3339()],
            |row| row.get(0),
        )
        .map_err(|e| TaskweaveError::Store(format!("Count failed runs: {e}")))
    }

    /// Finalize a run and update its owning task as one atomic unit.
    /// Either both rows land or neither does.
    pub fn finalize(&self, run: &Run, task: &Task) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| TaskweaveError::Store(format!("Finalize begin: {e}")))?;

        tx.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2, summary = ?3,
                 final_answer = ?4, confidence = ?5, trace = ?6
             WHERE id = ?7",
            params![
                run.status.as_str(),
                run.finished_at.map(|t| t.to_rfc3339()),
                run.summary,
                run.final_answer,
                run.confidence,
                run.trace.to_string(),
                run.id,
            ],
        )
        .map_err(|e| TaskweaveError::Store(format!("Finalize run: {e}")))?;

        tx.execute(
            "UPDATE tasks SET next_due_at = ?1, async_status = ?2, status = ?3,
                 last_run_at = ?4, result_summary = ?5, updated_at = ?6
             WHERE id = ?7",
            params![
                task.next_due_at.map(|t| t.to_rfc3339()),
                task.async_status.as_str(),
                task.status.as_str(),
                task.last_run_at.map(|t| t.to_rfc3339()),
                task.result_summary,
                task.updated_at.to_rfc3339(),
                task.id,
            ],
        )
        .map_err(|e| TaskweaveError::Store(format!("Finalize task: {e}")))?;

        tx.commit()
            .map_err(|e| TaskweaveError::Store(format!("Finalize commit: {e}")))
    }
}
