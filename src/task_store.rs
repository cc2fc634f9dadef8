//! C6 (task-status half): the embedded relational store recording each
//! batch's lifecycle, `<base>/task_status.db`.
//!
//! Architecture grounded on the teacher pack's DuckDB actor
//! (`GlobalWriter`/`DbWorker`): a non-blocking handle sends commands over an
//! `mpsc` channel to a dedicated `std::thread::spawn` worker that owns the
//! single `rusqlite::Connection`, since the blocking SQLite driver must never
//! run on the async reactor. `rusqlite` (bundled SQLite) replaces DuckDB —
//! a single-table lifecycle tracker doesn't need an OLAP engine.

use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::{Error, Result};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS download_status (
    download_id   TEXT PRIMARY KEY,
    status        TEXT NOT NULL,
    message       TEXT,
    start_time    TEXT NOT NULL,
    end_time      TEXT,
    error_details TEXT
);
";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskState {
    fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskState::Pending),
            "running" => Some(TaskState::Running),
            "completed" => Some(TaskState::Completed),
            "failed" => Some(TaskState::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    pub download_id: String,
    pub status: TaskState,
    pub message: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub error_details: Option<String>,
}

enum DbCommand {
    InsertOrReplace { task: TaskStatus, reply: oneshot::Sender<Result<()>> },
    Update { download_id: String, status: TaskState, message: Option<String>, error_details: Option<String>, reply: oneshot::Sender<Result<()>> },
    Get { download_id: String, reply: oneshot::Sender<Result<Option<TaskStatus>>> },
    StartBatch { download_id: String, reply: oneshot::Sender<Result<()>> },
    Shutdown,
}

/// Non-blocking handle to the task-status actor. Cheap to clone (an `mpsc`
/// sender); intended to be shared process-wide.
#[derive(Clone)]
pub struct TaskStore {
    tx: std_mpsc::SyncSender<DbCommand>,
}

impl TaskStore {
    /// Open (creating if absent) `<base>/task_status.db` and spawn its owning
    /// worker thread.
    pub fn open(base: &Path) -> Result<Self> {
        std::fs::create_dir_all(base).map_err(Error::Io)?;
        let db_path = base.join("task_status.db");

        let (tx, rx) = std_mpsc::sync_channel::<DbCommand>(128);

        let builder = std::thread::Builder::new().name("fetchcorpus-task-store".into());
        let worker_path = db_path.clone();
        let conn = Connection::open(&worker_path).map_err(Error::Store)?;
        conn.execute_batch(SCHEMA).map_err(Error::Store)?;

        builder
            .spawn(move || run_worker(conn, rx))
            .map_err(Error::Io)?;

        Ok(Self { tx })
    }

    pub async fn insert_or_replace(&self, task: TaskStatus) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(DbCommand::InsertOrReplace { task, reply: reply_tx })
            .map_err(|_| Error::StoreWorkerGone)?;
        reply_rx.await.map_err(|_| Error::StoreWorkerGone)?
    }

    pub async fn update(
        &self,
        download_id: impl Into<String>,
        status: TaskState,
        message: Option<String>,
        error_details: Option<String>,
    ) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(DbCommand::Update {
                download_id: download_id.into(),
                status,
                message,
                error_details,
                reply: reply_tx,
            })
            .map_err(|_| Error::StoreWorkerGone)?;
        reply_rx.await.map_err(|_| Error::StoreWorkerGone)?
    }

    pub async fn get(&self, download_id: impl Into<String>) -> Result<Option<TaskStatus>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(DbCommand::Get { download_id: download_id.into(), reply: reply_tx })
            .map_err(|_| Error::StoreWorkerGone)?;
        reply_rx.await.map_err(|_| Error::StoreWorkerGone)?
    }

    /// Atomically record a fresh batch as `pending`, refusing if one with the
    /// same `download_id` is already `running` (per spec §4.6, a running
    /// batch cannot accept a new submission; the submitter must wait for a
    /// terminal state). A single round-trip to the owning actor thread makes
    /// the check-then-write atomic, unlike a separate read followed by a
    /// separate write. The caller is responsible for flipping the row to
    /// `running` once the worker actually begins (spec §3: "created pending
    /// at submission, set running when the worker begins").
    pub async fn start_batch(&self, download_id: impl Into<String>) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(DbCommand::StartBatch { download_id: download_id.into(), reply: reply_tx })
            .map_err(|_| Error::StoreWorkerGone)?;
        reply_rx.await.map_err(|_| Error::StoreWorkerGone)?
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(DbCommand::Shutdown);
    }
}

fn run_worker(conn: Connection, rx: std_mpsc::Receiver<DbCommand>) {
    while let Ok(cmd) = rx.recv() {
        match cmd {
            DbCommand::InsertOrReplace { task, reply } => {
                let result = insert_or_replace_sync(&conn, &task);
                let _ = reply.send(result);
            }
            DbCommand::Update { download_id, status, message, error_details, reply } => {
                let result = update_sync(&conn, &download_id, status, message, error_details);
                let _ = reply.send(result);
            }
            DbCommand::Get { download_id, reply } => {
                let result = get_sync(&conn, &download_id);
                let _ = reply.send(result);
            }
            DbCommand::StartBatch { download_id, reply } => {
                let result = start_batch_sync(&conn, &download_id);
                let _ = reply.send(result);
            }
            DbCommand::Shutdown => break,
        }
    }
}

fn insert_or_replace_sync(conn: &Connection, task: &TaskStatus) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO download_status
            (download_id, status, message, start_time, end_time, error_details)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            task.download_id,
            task.status.as_str(),
            task.message,
            task.start_time.to_rfc3339(),
            task.end_time.map(|t| t.to_rfc3339()),
            task.error_details,
        ],
    )
    .map_err(Error::Store)?;
    Ok(())
}

fn update_sync(
    conn: &Connection,
    download_id: &str,
    status: TaskState,
    message: Option<String>,
    error_details: Option<String>,
) -> Result<()> {
    let end_time = matches!(status, TaskState::Completed | TaskState::Failed)
        .then(|| Utc::now().to_rfc3339());

    let changed = conn
        .execute(
            "UPDATE download_status
                SET status = ?1,
                    message = COALESCE(?2, message),
                    end_time = COALESCE(?3, end_time),
                    error_details = COALESCE(?4, error_details)
              WHERE download_id = ?5",
            params![status.as_str(), message, end_time, error_details, download_id],
        )
        .map_err(Error::Store)?;

    if changed == 0 {
        return Err(Error::TaskNotFound(download_id.to_string()));
    }
    Ok(())
}

/// Check-then-write inside a single SQLite transaction on the owning thread:
/// refuses if an existing row for `download_id` is already `running`,
/// otherwise inserts/replaces it as a fresh `pending` row.
fn start_batch_sync(conn: &Connection, download_id: &str) -> Result<()> {
    let existing_status: Option<String> = conn
        .query_row(
            "SELECT status FROM download_status WHERE download_id = ?1",
            params![download_id],
            |row| row.get(0),
        )
        .ok();

    if existing_status.as_deref() == Some(TaskState::Running.as_str()) {
        return Err(Error::AlreadyRunning(download_id.to_string()));
    }

    conn.execute(
        "INSERT OR REPLACE INTO download_status
            (download_id, status, message, start_time, end_time, error_details)
         VALUES (?1, ?2, NULL, ?3, NULL, NULL)",
        params![download_id, TaskState::Pending.as_str(), Utc::now().to_rfc3339()],
    )
    .map_err(Error::Store)?;
    Ok(())
}

fn get_sync(conn: &Connection, download_id: &str) -> Result<Option<TaskStatus>> {
    let mut stmt = conn
        .prepare(
            "SELECT download_id, status, message, start_time, end_time, error_details
               FROM download_status WHERE download_id = ?1",
        )
        .map_err(Error::Store)?;

    let mut rows = stmt.query(params![download_id]).map_err(Error::Store)?;

    let Some(row) = rows.next().map_err(Error::Store)? else {
        return Ok(None);
    };

    let status_str: String = row.get(1).map_err(Error::Store)?;
    let start_time: String = row.get(3).map_err(Error::Store)?;
    let end_time: Option<String> = row.get(4).map_err(Error::Store)?;

    Ok(Some(TaskStatus {
        download_id: row.get(0).map_err(Error::Store)?,
        status: TaskState::parse(&status_str).unwrap_or(TaskState::Failed),
        message: row.get(2).map_err(Error::Store)?,
        start_time: DateTime::parse_from_rfc3339(&start_time)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        end_time: end_time.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|t| t.with_timezone(&Utc)),
        error_details: row.get(5).map_err(Error::Store)?,
    }))
}

pub fn db_path(base: &Path) -> PathBuf {
    base.join("task_status.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lifecycle_is_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path()).unwrap();

        store.start_batch("dl_test").await.unwrap();
        let fetched = store.get("dl_test").await.unwrap().unwrap();
        assert_eq!(fetched.status, TaskState::Pending);

        // Simulates the worker flipping the row once it actually begins.
        store.update("dl_test", TaskState::Running, None, None).await.unwrap();
        let err = store.start_batch("dl_test").await.unwrap_err();
        assert!(matches!(err, Error::AlreadyRunning(_)));

        store.update("dl_test", TaskState::Completed, Some("done".to_string()), None).await.unwrap();
        let fetched = store.get("dl_test").await.unwrap().unwrap();
        assert_eq!(fetched.status, TaskState::Completed);
        assert!(fetched.end_time.is_some());

        // A terminal batch can be resubmitted (new `start_batch` resets it to pending).
        store.start_batch("dl_test").await.unwrap();
        let fetched = store.get("dl_test").await.unwrap().unwrap();
        assert_eq!(fetched.status, TaskState::Pending);
    }

    #[tokio::test]
    async fn update_unknown_id_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path()).unwrap();
        let err = store.update("nope", TaskState::Running, None, None).await.unwrap_err();
        assert!(matches!(err, Error::TaskNotFound(_)));
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path()).unwrap();
        assert!(store.get("absent").await.unwrap().is_none());
    }
}
