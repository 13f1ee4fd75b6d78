//! Durable record of executions and their steps.
//!
//! # Architecture
//!
//! ```text
//! ExecutionStore (trait)      - put / get / list snapshots
//!     └── SqliteExecutionStore   - workflow_executions + workflow_steps tables
//!     └── MemoryExecutionStore   - in-process, keeps every snapshot written
//! ```

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::{Mutex, RwLock};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use crate::snapshot::{
    ExecutionFilter, ExecutionId, ExecutionRecord, ExecutionSnapshot, StepId, StepRecord,
    StepStatus, WorkflowStatus,
};
use crate::state::StateBag;
use crate::{PipelineError, Result};

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Replace the stored snapshot of `snapshot.id()` atomically.
    async fn put(&self, snapshot: &ExecutionSnapshot) -> Result<()>;

    async fn get(&self, id: ExecutionId) -> Result<Option<ExecutionSnapshot>>;

    /// Snapshots matching `filter`, newest first.
    async fn list(&self, filter: &ExecutionFilter) -> Result<Vec<ExecutionSnapshot>>;

    /// Executions still `Pending` or `Running`.
    async fn list_unfinished(&self) -> Result<Vec<ExecutionSnapshot>>;
}

fn newest_first(a: &ExecutionSnapshot, b: &ExecutionSnapshot) -> std::cmp::Ordering {
    b.execution
        .created_at
        .cmp(&a.execution.created_at)
        .then_with(|| b.execution.id.as_uuid().cmp(a.execution.id.as_uuid()))
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory store
// ─────────────────────────────────────────────────────────────────────────────

/// Keeps every snapshot written, so tests can inspect the full transition
/// history of an execution.
#[derive(Debug, Default)]
pub struct MemoryExecutionStore {
    snapshots: RwLock<HashMap<ExecutionId, Vec<ExecutionSnapshot>>>,
}

impl MemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every snapshot written for `id`, oldest first.
    pub fn history(&self, id: ExecutionId) -> Vec<ExecutionSnapshot> {
        self.snapshots.read().get(&id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ExecutionStore for MemoryExecutionStore {
    async fn put(&self, snapshot: &ExecutionSnapshot) -> Result<()> {
        self.snapshots
            .write()
            .entry(snapshot.id())
            .or_default()
            .push(snapshot.clone());
        Ok(())
    }

    async fn get(&self, id: ExecutionId) -> Result<Option<ExecutionSnapshot>> {
        Ok(self
            .snapshots
            .read()
            .get(&id)
            .and_then(|history| history.last().cloned()))
    }

    async fn list(&self, filter: &ExecutionFilter) -> Result<Vec<ExecutionSnapshot>> {
        let mut latest: Vec<ExecutionSnapshot> = self
            .snapshots
            .read()
            .values()
            .filter_map(|history| history.last())
            .filter(|s| filter.status.is_none_or(|status| s.status() == status))
            .cloned()
            .collect();
        latest.sort_by(newest_first);
        Ok(latest
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit)
            .collect())
    }

    async fn list_unfinished(&self) -> Result<Vec<ExecutionSnapshot>> {
        let mut unfinished: Vec<ExecutionSnapshot> = self
            .snapshots
            .read()
            .values()
            .filter_map(|history| history.last())
            .filter(|s| !s.is_terminal())
            .cloned()
            .collect();
        unfinished.sort_by(newest_first);
        Ok(unfinished)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SQLite store
// ─────────────────────────────────────────────────────────────────────────────

/// Current schema version, stored in `PRAGMA user_version`.
const SCHEMA_VERSION: i32 = 1;

const EXECUTION_COLUMNS: &str = "id, workflow_name, status, input, output, current_step_index, created_at, started_at, ended_at, error";

/// Executions in one table, steps keyed by `(execution_id, step_index)` in another.
///
/// Thread-safe via internal `Mutex<Connection>`.
pub struct SqliteExecutionStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteExecutionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteExecutionStore").finish_non_exhaustive()
    }
}

impl SqliteExecutionStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize()?;
        info!("Execution store opened at {:?}", path);
        Ok(store)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock();
        let current_version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if current_version >= SCHEMA_VERSION {
            debug!("Execution schema up to date (version {})", current_version);
            return Ok(());
        }

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_executions (
                id TEXT PRIMARY KEY,
                workflow_name TEXT NOT NULL,
                status TEXT NOT NULL,
                input TEXT NOT NULL DEFAULT '{}',
                output TEXT,
                current_step_index INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                started_at TEXT,
                ended_at TEXT,
                error TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_executions_status ON workflow_executions(status);
            CREATE INDEX IF NOT EXISTS idx_executions_created ON workflow_executions(created_at);

            CREATE TABLE IF NOT EXISTS workflow_steps (
                execution_id TEXT NOT NULL REFERENCES workflow_executions(id) ON DELETE CASCADE,
                step_index INTEGER NOT NULL,
                id TEXT NOT NULL,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                started_at TEXT,
                ended_at TEXT,
                result TEXT,
                error TEXT,
                PRIMARY KEY (execution_id, step_index)
            );
            "#,
        )?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        info!(
            "Execution schema migrated from version {} to {}",
            current_version, SCHEMA_VERSION
        );
        Ok(())
    }

    fn put_sync(&self, snapshot: &ExecutionSnapshot) -> Result<()> {
        let record = &snapshot.execution;
        let input = serde_json::to_string(&record.input)?;
        let output = record.output.as_ref().map(serde_json::to_string).transpose()?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO workflow_executions
             (id, workflow_name, status, input, output, current_step_index, created_at, started_at, ended_at, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.id.to_string(),
                record.workflow_name,
                record.status.as_str(),
                input,
                output,
                record.current_step_index as i64,
                format_ts(&record.created_at),
                record.started_at.as_ref().map(format_ts),
                record.ended_at.as_ref().map(format_ts),
                record.error,
            ],
        )?;
        for step in &snapshot.steps {
            let result = step.result.as_ref().map(serde_json::to_string).transpose()?;
            tx.execute(
                "INSERT OR REPLACE INTO workflow_steps
                 (execution_id, step_index, id, name, status, attempts, started_at, ended_at, result, error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    record.id.to_string(),
                    step.index as i64,
                    step.id.to_string(),
                    step.name,
                    step.status.as_str(),
                    step.attempts,
                    step.started_at.as_ref().map(format_ts),
                    step.ended_at.as_ref().map(format_ts),
                    result,
                    step.error,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn load_steps(conn: &Connection, execution_id: &str) -> Result<Vec<StepRecord>> {
        let mut stmt = conn.prepare(
            "SELECT step_index, id, name, status, attempts, started_at, ended_at, result, error
             FROM workflow_steps WHERE execution_id = ?1 ORDER BY step_index",
        )?;
        let rows = stmt.query_map(params![execution_id], |row| {
            Ok(RawStep {
                index: row.get(0)?,
                id: row.get(1)?,
                name: row.get(2)?,
                status: row.get(3)?,
                attempts: row.get(4)?,
                started_at: row.get(5)?,
                ended_at: row.get(6)?,
                result: row.get(7)?,
                error: row.get(8)?,
            })
        })?;
        rows.map(|r| r.map_err(PipelineError::from).and_then(RawStep::into_record))
            .collect()
    }

    fn query_snapshots(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<ExecutionSnapshot>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let raws = stmt
            .query_map(params, row_to_raw_execution)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        raws.into_iter()
            .map(|raw| {
                let steps = Self::load_steps(&conn, &raw.id)?;
                Ok(ExecutionSnapshot {
                    execution: raw.into_record()?,
                    steps,
                })
            })
            .collect()
    }
}

#[async_trait]
impl ExecutionStore for SqliteExecutionStore {
    async fn put(&self, snapshot: &ExecutionSnapshot) -> Result<()> {
        self.put_sync(snapshot)
    }

    async fn get(&self, id: ExecutionId) -> Result<Option<ExecutionSnapshot>> {
        let conn = self.conn.lock();
        let raw = conn
            .query_row(
                &format!("SELECT {EXECUTION_COLUMNS} FROM workflow_executions WHERE id = ?1"),
                params![id.to_string()],
                row_to_raw_execution,
            )
            .optional()?;

        match raw {
            Some(raw) => {
                let steps = Self::load_steps(&conn, &raw.id)?;
                Ok(Some(ExecutionSnapshot {
                    execution: raw.into_record()?,
                    steps,
                }))
            }
            None => Ok(None),
        }
    }

    async fn list(&self, filter: &ExecutionFilter) -> Result<Vec<ExecutionSnapshot>> {
        let limit = i64::try_from(filter.limit).unwrap_or(i64::MAX);
        let offset = i64::try_from(filter.offset).unwrap_or(i64::MAX);
        match filter.status {
            Some(status) => self.query_snapshots(
                &format!(
                    "SELECT {EXECUTION_COLUMNS} FROM workflow_executions WHERE status = ?1
                     ORDER BY created_at DESC, id DESC LIMIT ?2 OFFSET ?3"
                ),
                &[&status.as_str(), &limit, &offset],
            ),
            None => self.query_snapshots(
                &format!(
                    "SELECT {EXECUTION_COLUMNS} FROM workflow_executions
                     ORDER BY created_at DESC, id DESC LIMIT ?1 OFFSET ?2"
                ),
                &[&limit, &offset],
            ),
        }
    }

    async fn list_unfinished(&self) -> Result<Vec<ExecutionSnapshot>> {
        self.query_snapshots(
            &format!(
                "SELECT {EXECUTION_COLUMNS} FROM workflow_executions
                 WHERE status IN ('PENDING', 'RUNNING') ORDER BY created_at DESC, id DESC"
            ),
            &[],
        )
    }
}

// ── Row mapping ─────────────────────────────────────────────────────

struct RawExecution {
    id: String,
    workflow_name: String,
    status: String,
    input: String,
    output: Option<String>,
    current_step_index: i64,
    created_at: String,
    started_at: Option<String>,
    ended_at: Option<String>,
    error: Option<String>,
}

fn row_to_raw_execution(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawExecution> {
    Ok(RawExecution {
        id: row.get(0)?,
        workflow_name: row.get(1)?,
        status: row.get(2)?,
        input: row.get(3)?,
        output: row.get(4)?,
        current_step_index: row.get(5)?,
        created_at: row.get(6)?,
        started_at: row.get(7)?,
        ended_at: row.get(8)?,
        error: row.get(9)?,
    })
}

impl RawExecution {
    fn into_record(self) -> Result<ExecutionRecord> {
        let output: Option<StateBag> = self
            .output
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        Ok(ExecutionRecord {
            id: self
                .id
                .parse()
                .map_err(|e| PipelineError::Store(format!("bad execution id {}: {e}", self.id)))?,
            workflow_name: self.workflow_name,
            status: self.status.parse::<WorkflowStatus>().map_err(PipelineError::Store)?,
            input: serde_json::from_str(&self.input)?,
            output,
            current_step_index: usize::try_from(self.current_step_index).unwrap_or(0),
            created_at: parse_ts(&self.created_at)?,
            started_at: self.started_at.as_deref().map(parse_ts).transpose()?,
            ended_at: self.ended_at.as_deref().map(parse_ts).transpose()?,
            error: self.error,
        })
    }
}

struct RawStep {
    index: i64,
    id: String,
    name: String,
    status: String,
    attempts: u32,
    started_at: Option<String>,
    ended_at: Option<String>,
    result: Option<String>,
    error: Option<String>,
}

impl RawStep {
    fn into_record(self) -> Result<StepRecord> {
        Ok(StepRecord {
            id: self
                .id
                .parse::<StepId>()
                .map_err(|e| PipelineError::Store(format!("bad step id {}: {e}", self.id)))?,
            index: usize::try_from(self.index).unwrap_or(0),
            name: self.name,
            status: self.status.parse::<StepStatus>().map_err(PipelineError::Store)?,
            attempts: self.attempts,
            started_at: self.started_at.as_deref().map(parse_ts).transpose()?,
            ended_at: self.ended_at.as_deref().map(parse_ts).transpose()?,
            result: self.result.as_deref().map(serde_json::from_str).transpose()?,
            error: self.error,
        })
    }
}

/// Fixed-width RFC 3339 so text ordering matches time ordering.
fn format_ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PipelineError::Store(format!("bad timestamp {s}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn snapshot(status: WorkflowStatus, created_offset_secs: i64) -> ExecutionSnapshot {
        let mut input = StateBag::new();
        input.insert("timeThreshold".into(), json!(24));
        ExecutionSnapshot {
            execution: ExecutionRecord {
                id: ExecutionId::new(),
                workflow_name: "wf".into(),
                status,
                input,
                output: None,
                current_step_index: 0,
                created_at: Utc::now() + Duration::seconds(created_offset_secs),
                started_at: None,
                ended_at: None,
                error: None,
            },
            steps: vec![StepRecord {
                id: StepId::new(),
                index: 0,
                name: "first".into(),
                status: StepStatus::Pending,
                attempts: 0,
                started_at: None,
                ended_at: None,
                result: None,
                error: None,
            }],
        }
    }

    async fn exercise(store: &dyn ExecutionStore) {
        let old = snapshot(WorkflowStatus::Succeeded, -10);
        let mid = snapshot(WorkflowStatus::Running, -5);
        let new = snapshot(WorkflowStatus::Pending, 0);
        for s in [&old, &mid, &new] {
            store.put(s).await.unwrap();
        }

        let all = store.list(&ExecutionFilter::default()).await.unwrap();
        let ids: Vec<_> = all.iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec![new.id(), mid.id(), old.id()]);

        let paged = store
            .list(&ExecutionFilter::default().with_limit(1).with_offset(1))
            .await
            .unwrap();
        assert_eq!(paged.len(), 1);
        assert_eq!(paged[0].id(), mid.id());

        let succeeded = store
            .list(&ExecutionFilter::default().with_status(WorkflowStatus::Succeeded))
            .await
            .unwrap();
        assert_eq!(succeeded.len(), 1);
        assert_eq!(succeeded[0].id(), old.id());

        let unfinished = store.list_unfinished().await.unwrap();
        assert_eq!(unfinished.len(), 2);

        // Overwrite with a terminal snapshot.
        let mut done = mid.clone();
        done.execution.status = WorkflowStatus::Succeeded;
        done.execution.output = Some(done.execution.input.clone());
        done.steps[0].status = StepStatus::Succeeded;
        done.steps[0].attempts = 1;
        done.steps[0].result = Some(json!({"k": "v"}));
        store.put(&done).await.unwrap();

        let loaded = store.get(mid.id()).await.unwrap().unwrap();
        assert_eq!(loaded.status(), WorkflowStatus::Succeeded);
        assert_eq!(loaded.steps[0].result, Some(json!({"k": "v"})));
        assert_eq!(loaded.output_value("timeThreshold"), Some(&json!(24)));
        assert_eq!(store.list_unfinished().await.unwrap().len(), 1);

        assert!(store.get(ExecutionId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryExecutionStore::new();
        exercise(&store).await;
    }

    #[tokio::test]
    async fn test_sqlite_store() {
        let store = SqliteExecutionStore::open_in_memory().unwrap();
        exercise(&store).await;
    }

    #[tokio::test]
    async fn test_sqlite_store_round_trips_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("trawler.db");
        let mut snap = snapshot(WorkflowStatus::Failed, 0);
        snap.execution.started_at = Some(snap.execution.created_at);
        snap.execution.ended_at = Some(snap.execution.created_at + Duration::milliseconds(1500));
        snap.execution.error = Some("Step 'x' failed".into());

        {
            let store = SqliteExecutionStore::open(&path).unwrap();
            store.put(&snap).await.unwrap();
        }
        let store = SqliteExecutionStore::open(&path).unwrap();
        let loaded = store.get(snap.id()).await.unwrap().unwrap();
        assert_eq!(
            loaded.execution.ended_at.unwrap() - loaded.execution.started_at.unwrap(),
            Duration::milliseconds(1500)
        );
        assert_eq!(loaded.execution.error.as_deref(), Some("Step 'x' failed"));
        assert_eq!(loaded.steps.len(), 1);
    }
}
