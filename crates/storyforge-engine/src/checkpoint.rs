use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use storyforge_core::error::{Result, StoryforgeError};
use storyforge_core::types::RunId;

use crate::graph::StoryState;

/// Lifecycle of a stored checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointStatus {
    /// Waiting for external input.
    Suspended,
    /// Claimed by an in-flight resume.
    Resuming,
}

impl CheckpointStatus {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Suspended => "suspended",
            Self::Resuming => "resuming",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "suspended" => Ok(Self::Suspended),
            "resuming" => Ok(Self::Resuming),
            other => Err(StoryforgeError::Checkpoint(format!(
                "unknown checkpoint status '{}'",
                other
            ))),
        }
    }
}

/// Snapshot of a suspended run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: RunId,
    /// Name of the workflow graph the run belongs to.
    pub workflow: String,
    /// Node the run is suspended in.
    pub pending_node: String,
    pub state: StoryState,
    /// What the pending node handed to the outside world.
    pub payload: Value,
    /// Nodes executed so far, in order.
    pub visited: Vec<String>,
    pub status: CheckpointStatus,
    pub created_at: DateTime<Utc>,
}

/// Durable storage for suspended runs.
///
/// `claim` is the only way to move a checkpoint out of `Suspended`, and it
/// succeeds for at most one caller.
pub trait CheckpointStore: Send + Sync + 'static {
    /// Insert or replace the checkpoint for its run id.
    fn save(&self, checkpoint: &Checkpoint) -> Result<()>;

    fn load(&self, run_id: &RunId) -> Result<Option<Checkpoint>>;

    /// Atomically move a `Suspended` checkpoint to `Resuming` and return it.
    /// `None` when the run is unknown or already claimed.
    fn claim(&self, run_id: &RunId) -> Result<Option<Checkpoint>>;

    /// Put a claimed checkpoint back to `Suspended`. Returns whether anything changed.
    fn release(&self, run_id: &RunId) -> Result<bool>;

    /// Returns whether a checkpoint existed.
    fn delete(&self, run_id: &RunId) -> Result<bool>;

    /// All stored checkpoints, oldest first.
    fn list(&self) -> Result<Vec<Checkpoint>>;
}

/// Persistent checkpoint store backed by SQLite.
pub struct SqliteCheckpointStore {
    conn: Mutex<Connection>,
}

fn db_err(context: &str) -> impl Fn(rusqlite::Error) -> StoryforgeError + '_ {
    move |e| StoryforgeError::Checkpoint(format!("{}: {}", context, e))
}

const SELECT_COLUMNS: &str = "SELECT run_id, workflow, pending_node, state_json, payload_json, visited_json, status, created_at
     FROM checkpoints";

impl SqliteCheckpointStore {
    /// Open or create the checkpoint database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db_err("Failed to open checkpoint store"))?;
        Self::init(conn)
    }

    /// A private in-memory database, mostly for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err("Failed to open checkpoint store"))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;

             CREATE TABLE IF NOT EXISTS checkpoints (
                 run_id TEXT PRIMARY KEY,
                 workflow TEXT NOT NULL,
                 pending_node TEXT NOT NULL,
                 state_json TEXT NOT NULL,
                 payload_json TEXT NOT NULL,
                 visited_json TEXT NOT NULL,
                 status TEXT NOT NULL,
                 created_at TEXT NOT NULL
             );

             CREATE INDEX IF NOT EXISTS idx_cp_workflow
                 ON checkpoints(workflow, created_at);",
        )
        .map_err(db_err("Failed to initialize checkpoint schema"))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoryforgeError::Checkpoint(e.to_string()))
    }
}

/// Raw row, decoded outside the rusqlite closure so JSON errors keep their type.
struct StoredRow {
    run_id: String,
    workflow: String,
    pending_node: String,
    state_json: String,
    payload_json: String,
    visited_json: String,
    status: String,
    created_at: String,
}

impl StoredRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            run_id: row.get(0)?,
            workflow: row.get(1)?,
            pending_node: row.get(2)?,
            state_json: row.get(3)?,
            payload_json: row.get(4)?,
            visited_json: row.get(5)?,
            status: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn decode(self) -> Result<Checkpoint> {
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StoryforgeError::Checkpoint(format!("bad timestamp: {}", e)))?;
        Ok(Checkpoint {
            run_id: RunId(self.run_id),
            workflow: self.workflow,
            pending_node: self.pending_node,
            state: serde_json::from_str(&self.state_json)?,
            payload: serde_json::from_str(&self.payload_json)?,
            visited: serde_json::from_str(&self.visited_json)?,
            status: CheckpointStatus::parse(&self.status)?,
            created_at,
        })
    }
}

fn load_row(conn: &Connection, run_id: &RunId) -> Result<Option<Checkpoint>> {
    let row = conn
        .query_row(
            &format!("{} WHERE run_id = ?1", SELECT_COLUMNS),
            params![run_id.as_str()],
            StoredRow::from_row,
        )
        .optional()
        .map_err(db_err("Failed to load checkpoint"))?;
    row.map(StoredRow::decode).transpose()
}

impl CheckpointStore for SqliteCheckpointStore {
    fn save(&self, cp: &Checkpoint) -> Result<()> {
        let state_json = serde_json::to_string(&cp.state)?;
        let payload_json = serde_json::to_string(&cp.payload)?;
        let visited_json = serde_json::to_string(&cp.visited)?;

        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO checkpoints
                 (run_id, workflow, pending_node, state_json, payload_json, visited_json, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                cp.run_id.as_str(),
                cp.workflow,
                cp.pending_node,
                state_json,
                payload_json,
                visited_json,
                cp.status.as_str(),
                cp.created_at.to_rfc3339(),
            ],
        )
        .map_err(db_err("Failed to save checkpoint"))?;
        Ok(())
    }

    fn load(&self, run_id: &RunId) -> Result<Option<Checkpoint>> {
        let conn = self.lock()?;
        load_row(&conn, run_id)
    }

    fn claim(&self, run_id: &RunId) -> Result<Option<Checkpoint>> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE checkpoints SET status = 'resuming' WHERE run_id = ?1 AND status = 'suspended'",
                params![run_id.as_str()],
            )
            .map_err(db_err("Failed to claim checkpoint"))?;
        if changed == 0 {
            return Ok(None);
        }
        load_row(&conn, run_id)
    }

    fn release(&self, run_id: &RunId) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE checkpoints SET status = 'suspended' WHERE run_id = ?1 AND status = 'resuming'",
                params![run_id.as_str()],
            )
            .map_err(db_err("Failed to release checkpoint"))?;
        Ok(changed > 0)
    }

    fn delete(&self, run_id: &RunId) -> Result<bool> {
        let conn = self.lock()?;
        let deleted = conn
            .execute(
                "DELETE FROM checkpoints WHERE run_id = ?1",
                params![run_id.as_str()],
            )
            .map_err(db_err("Failed to delete checkpoint"))?;
        Ok(deleted > 0)
    }

    fn list(&self) -> Result<Vec<Checkpoint>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!("{} ORDER BY created_at ASC", SELECT_COLUMNS))
            .map_err(db_err("Failed to prepare query"))?;
        let rows = stmt
            .query_map([], StoredRow::from_row)
            .map_err(db_err("Failed to list checkpoints"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Failed to read checkpoint row"))?;
        rows.into_iter().map(StoredRow::decode).collect()
    }
}

/// Process-local checkpoint store. Runs do not survive a restart.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    entries: Mutex<HashMap<RunId, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<RunId, Checkpoint>>> {
        self.entries
            .lock()
            .map_err(|e| StoryforgeError::Checkpoint(e.to_string()))
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.lock()?
            .insert(checkpoint.run_id.clone(), checkpoint.clone());
        Ok(())
    }

    fn load(&self, run_id: &RunId) -> Result<Option<Checkpoint>> {
        Ok(self.lock()?.get(run_id).cloned())
    }

    fn claim(&self, run_id: &RunId) -> Result<Option<Checkpoint>> {
        let mut entries = self.lock()?;
        match entries.get_mut(run_id) {
            Some(cp) if cp.status == CheckpointStatus::Suspended => {
                cp.status = CheckpointStatus::Resuming;
                Ok(Some(cp.clone()))
            }
            _ => Ok(None),
        }
    }

    fn release(&self, run_id: &RunId) -> Result<bool> {
        let mut entries = self.lock()?;
        match entries.get_mut(run_id) {
            Some(cp) if cp.status == CheckpointStatus::Resuming => {
                cp.status = CheckpointStatus::Suspended;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn delete(&self, run_id: &RunId) -> Result<bool> {
        Ok(self.lock()?.remove(run_id).is_some())
    }

    fn list(&self) -> Result<Vec<Checkpoint>> {
        let mut all: Vec<Checkpoint> = self.lock()?.values().cloned().collect();
        all.sort_by_key(|cp| cp.created_at);
        Ok(all)
    }
}
