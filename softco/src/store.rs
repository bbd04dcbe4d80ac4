//! SQLite record of runs: the idea, every published message, and the final
//! file set with content hashes.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::materialize::{ProjectFiles, ProjectSink};
use crate::message::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    BudgetExceeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::BudgetExceeded => "budget_exceeded",
            RunStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> RunStatus {
        match s {
            "running" => RunStatus::Running,
            "completed" => RunStatus::Completed,
            "budget_exceeded" => RunStatus::BudgetExceeded,
            _ => RunStatus::Failed,
        }
    }
}

/// A row of the `runs` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: i64,
    pub project: String,
    pub idea: String,
    pub status: RunStatus,
    pub cost: f64,
    pub created_at: String,
    pub finished_at: Option<String>,
}

/// A row of the `messages` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub seq: i64,
    pub role: String,
    pub cause_by: String,
    pub content: String,
}

pub struct ProjectStore {
    db: Mutex<Connection>,
}

impl ProjectStore {
    /// Open or create the run database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open run database {}", path.display()))?;
        let store = Self {
            db: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::open(Path::new(":memory:"))
    }

    fn migrate(&self) -> Result<()> {
        let db = self.db.lock();
        db.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project TEXT NOT NULL,
                idea TEXT NOT NULL,
                status TEXT NOT NULL,
                cost REAL NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                finished_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_runs_project ON runs(project);

            CREATE TABLE IF NOT EXISTS messages (
                run_id INTEGER NOT NULL REFERENCES runs(id),
                seq INTEGER NOT NULL,
                role TEXT NOT NULL,
                cause_by TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (run_id, seq)
            );

            CREATE TABLE IF NOT EXISTS files (
                run_id INTEGER NOT NULL REFERENCES runs(id),
                path TEXT NOT NULL,
                content TEXT NOT NULL,
                sha256 TEXT NOT NULL,
                PRIMARY KEY (run_id, path)
            );
            ",
        )
        .context("Failed to create run tables")?;
        Ok(())
    }

    pub fn start_run(&self, project: &str, idea: &str) -> Result<i64> {
        let db = self.db.lock();
        db.execute(
            "INSERT INTO runs (project, idea, status, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![project, idea, RunStatus::Running.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(db.last_insert_rowid())
    }

    /// Store history in publish order. Re-recording replaces earlier rows.
    pub fn record_messages(&self, run_id: i64, messages: &[Message]) -> Result<()> {
        let mut db = self.db.lock();
        let tx = db.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO messages (run_id, seq, role, cause_by, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (seq, msg) in messages.iter().enumerate() {
                stmt.execute(params![
                    run_id,
                    seq as i64,
                    msg.role(),
                    msg.cause_by(),
                    msg.content(),
                    msg.timestamp().to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn save_files(&self, run_id: i64, files: &ProjectFiles) -> Result<()> {
        let mut db = self.db.lock();
        let tx = db.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO files (run_id, path, content, sha256) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (path, content) in files.iter() {
                stmt.execute(params![run_id, path, content, sha256_hex(content)])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn finish_run(&self, run_id: i64, status: RunStatus, cost: f64) -> Result<()> {
        let db = self.db.lock();
        let updated = db.execute(
            "UPDATE runs SET status = ?1, cost = ?2, finished_at = ?3 WHERE id = ?4",
            params![status.as_str(), cost, Utc::now().to_rfc3339(), run_id],
        )?;
        if updated == 0 {
            anyhow::bail!("No run with id {run_id}");
        }
        Ok(())
    }

    pub fn files_for_run(&self, run_id: i64) -> Result<ProjectFiles> {
        let db = self.db.lock();
        let mut stmt = db.prepare("SELECT path, content FROM files WHERE run_id = ?1 ORDER BY path")?;
        let files = stmt
            .query_map(params![run_id], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<ProjectFiles, _>>()?;
        Ok(files)
    }

    /// Hash recorded for a stored file.
    pub fn file_hash(&self, run_id: i64, path: &str) -> Result<Option<String>> {
        let db = self.db.lock();
        let hash = db
            .query_row(
                "SELECT sha256 FROM files WHERE run_id = ?1 AND path = ?2",
                params![run_id, path],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hash)
    }

    pub fn messages_for_run(&self, run_id: i64) -> Result<Vec<StoredMessage>> {
        let db = self.db.lock();
        let mut stmt = db.prepare(
            "SELECT seq, role, cause_by, content FROM messages WHERE run_id = ?1 ORDER BY seq",
        )?;
        let messages = stmt
            .query_map(params![run_id], |row| {
                Ok(StoredMessage {
                    seq: row.get(0)?,
                    role: row.get(1)?,
                    cause_by: row.get(2)?,
                    content: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    pub fn latest_run(&self, project: &str) -> Result<Option<RunRecord>> {
        let db = self.db.lock();
        let record = db
            .query_row(
                "SELECT id, project, idea, status, cost, created_at, finished_at
                 FROM runs WHERE project = ?1 ORDER BY id DESC LIMIT 1",
                params![project],
                |row| {
                    Ok(RunRecord {
                        id: row.get(0)?,
                        project: row.get(1)?,
                        idea: row.get(2)?,
                        status: RunStatus::parse(&row.get::<_, String>(3)?),
                        cost: row.get(4)?,
                        created_at: row.get(5)?,
                        finished_at: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }
}

/// Files land in the project's most recent run, which is started if none
/// exists yet.
#[async_trait]
impl ProjectSink for ProjectStore {
    async fn persist(&self, project: &str, files: &ProjectFiles) -> Result<()> {
        let run_id = match self.latest_run(project)? {
            Some(run) => run.id,
            None => self.start_run(project, "")?,
        };
        self.save_files(run_id, files)
    }
}

fn sha256_hex(content: &str) -> String {
    format!("{:x}", Sha256::digest(content.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> ProjectStore {
        ProjectStore::in_memory().unwrap()
    }

    #[test]
    fn run_lifecycle_round_trips() {
        let store = test_store();
        let run = store.start_run("calc", "Create a calculator").unwrap();

        let latest = store.latest_run("calc").unwrap().unwrap();
        assert_eq!(latest.id, run);
        assert_eq!(latest.status, RunStatus::Running);
        assert_eq!(latest.finished_at, None);

        store.finish_run(run, RunStatus::Completed, 0.42).unwrap();
        let latest = store.latest_run("calc").unwrap().unwrap();
        assert_eq!(latest.status, RunStatus::Completed);
        assert_eq!(latest.cost, 0.42);
        assert!(latest.finished_at.is_some());

        assert!(store.latest_run("other").unwrap().is_none());
        assert!(store.finish_run(run + 100, RunStatus::Failed, 0.0).is_err());
    }

    #[test]
    fn messages_keep_publish_order() {
        let store = test_store();
        let run = store.start_run("calc", "idea").unwrap();
        let history = vec![
            Message::user_requirement("idea"),
            Message::new("# PRD", "Alice", "WritePRD"),
        ];
        store.record_messages(run, &history).unwrap();
        store.record_messages(run, &history).unwrap();

        let stored = store.messages_for_run(run).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].cause_by, "UserRequirement");
        assert_eq!(stored[1].role, "Alice");
    }

    #[test]
    fn files_are_stored_with_hashes() {
        let store = test_store();
        let run = store.start_run("calc", "idea").unwrap();
        let files: ProjectFiles = [("src/app.py".to_string(), "print(1)\n".to_string())]
            .into_iter()
            .collect();
        store.save_files(run, &files).unwrap();

        assert_eq!(store.files_for_run(run).unwrap(), files);
        assert_eq!(
            store.file_hash(run, "src/app.py").unwrap().as_deref(),
            Some(sha256_hex("print(1)\n").as_str())
        );
        assert_eq!(sha256_hex("").len(), 64);
        assert!(store.file_hash(run, "missing").unwrap().is_none());
    }

    #[tokio::test]
    async fn sink_uses_latest_run() {
        let store = test_store();
        let files: ProjectFiles = [("a".to_string(), "x".to_string())].into_iter().collect();

        store.persist("fresh", &files).await.unwrap();
        let run = store.latest_run("fresh").unwrap().unwrap();
        assert_eq!(store.files_for_run(run.id).unwrap(), files);
    }
}
