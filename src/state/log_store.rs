//! Log Store
//!
//! Durable storage for the replicated command log and the commit index,
//! backed by SQLite.

use std::path::PathBuf;

use rusqlite::{Connection, OptionalExtension, params};
use tokio::sync::Mutex;

use crate::replication::command::Command;
use crate::replication::protocol::LogEntry;
use crate::error::{Error, Result};

/// Persistent, 1-indexed command log
pub struct LogStore {
    /// Database connection
    conn: Mutex<Connection>,
}

impl LogStore {
    /// Create or open the log database in `data_dir`
    pub fn open(data_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)?;
        let conn = Connection::open(data_dir.join("log.db"))?;
        Self::init(conn)
    }

    /// Create a log that lives only as long as this value
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS log_entries (
                log_index INTEGER PRIMARY KEY,
                kind TEXT NOT NULL,
                command TEXT NOT NULL,
                appended_at TEXT DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS node_state (
                key TEXT PRIMARY KEY,
                value_int INTEGER,
                updated_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Index of the last stored entry (0 when empty)
    pub async fn last_index(&self) -> Result<u64> {
        let conn = self.conn.lock().await;
        let last: i64 = conn.query_row(
            "SELECT COALESCE(MAX(log_index), 0) FROM log_entries",
            [],
            |row| row.get(0),
        )?;
        Ok(last as u64)
    }

    /// Store `command` at `index`. Entries are immutable once stored.
    pub async fn append(&self, index: u64, command: &Command) -> Result<()> {
        let encoded = serde_json::to_string(command)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO log_entries (log_index, kind, command) VALUES (?1, ?2, ?3)",
            params![index as i64, command.name(), encoded],
        )?;
        Ok(())
    }

    /// Read the entry at `index`
    pub async fn entry(&self, index: u64) -> Result<Option<Command>> {
        let conn = self.conn.lock().await;
        let encoded: Option<String> = conn
            .query_row(
                "SELECT command FROM log_entries WHERE log_index = ?1",
                params![index as i64],
                |row| row.get(0),
            )
            .optional()?;

        encoded.map(|text| decode(index, &text)).transpose()
    }

    /// Read up to `max` entries starting at `from`
    pub async fn entries(&self, from: u64, max: usize) -> Result<Vec<LogEntry>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT log_index, command FROM log_entries WHERE log_index >= ?1 ORDER BY log_index LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![from as i64, max as i64], |row| {
            Ok((row.get::<_, i64>(0)? as u64, row.get::<_, String>(1)?))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (index, text) = row?;
            entries.push(LogEntry {
                index,
                command: decode(index, &text)?,
            });
        }

        Ok(entries)
    }

    /// Get the persisted commit index
    pub async fn commit_index(&self) -> Result<u64> {
        let conn = self.conn.lock().await;
        let result: std::result::Result<i64, _> = conn.query_row(
            "SELECT value_int FROM node_state WHERE key = 'commit_index'",
            [],
            |row| row.get(0),
        );

        match result {
            Ok(index) => Ok(index as u64),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
            Err(e) => Err(Error::State(format!("Failed to get commit index: {}", e))),
        }
    }

    /// Persist the commit index
    pub async fn set_commit_index(&self, index: u64) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO node_state (key, value_int) VALUES ('commit_index', ?1)
            ON CONFLICT(key) DO UPDATE SET value_int = ?1, updated_at = CURRENT_TIMESTAMP
            "#,
            params![index as i64],
        )?;
        Ok(())
    }
}

fn decode(index: u64, text: &str) -> Result<Command> {
    serde_json::from_str(text).map_err(|e| Error::LogCorrupted {
        index,
        reason: e.to_string(),
    })
}
