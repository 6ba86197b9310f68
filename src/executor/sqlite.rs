//! SQLite Executor
//!
//! Executes replicated SQL against a local SQLite database and renders
//! rows the way the sqlite3 shell does in list mode.

use std::path::Path;

use rusqlite::types::ValueRef;
use rusqlite::{Batch, Connection};
use tokio::sync::Mutex;

use super::{Database, Output, QueryError};
use crate::state::NodeRole;
use crate::error::Result;

/// Connection plus the replica's position in the applied history
struct Replica {
    conn: Connection,
    sequence_number: u64,
}

/// SQLite-backed database replica
pub struct SqliteExecutor {
    replica: Mutex<Replica>,
}

impl SqliteExecutor {
    /// Create a fresh database at `path`.
    ///
    /// Any existing file is removed first: replica state is rebuilt from the
    /// replicated log, never from whatever a previous run left on disk.
    pub fn new(path: &Path) -> Result<Self> {
        for suffix in ["", "-journal", "-wal", "-shm"] {
            let file = path.with_file_name(format!(
                "{}{}",
                path.file_name().and_then(|n| n.to_str()).unwrap_or("storage.sql"),
                suffix
            ));
            if file.exists() {
                std::fs::remove_file(&file)?;
            }
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        Ok(Self::with_connection(Connection::open(path)?))
    }

    /// Create an in-memory replica
    pub fn in_memory() -> Result<Self> {
        Ok(Self::with_connection(Connection::open_in_memory()?))
    }

    fn with_connection(conn: Connection) -> Self {
        Self {
            replica: Mutex::new(Replica {
                conn,
                sequence_number: 0,
            }),
        }
    }
}

#[async_trait::async_trait]
impl Database for SqliteExecutor {
    async fn execute(
        &self,
        key: &str,
        role: NodeRole,
        query: &str,
    ) -> std::result::Result<Output, QueryError> {
        let mut replica = self.replica.lock().await;

        // Failed executions consume a sequence number too
        replica.sequence_number += 1;
        let sequence_number = replica.sequence_number;

        tracing::debug!("[{}] Executing {} (seq {}): {:?}", role, key, sequence_number, query);

        let mut stdout = String::new();
        match run_statements(&replica.conn, query, &mut stdout) {
            Ok(()) => Ok(Output {
                stdout,
                stderr: String::new(),
                sequence_number,
            }),
            Err(e) => {
                let message = e.to_string();
                tracing::debug!("[{}] Query {} failed: {}", role, key, message);
                Err(QueryError {
                    output: Output {
                        stdout,
                        stderr: format!("Error: {}\n", message),
                        sequence_number,
                    },
                    message,
                })
            }
        }
    }
}

/// Run every statement in `sql`, stopping at the first failure
fn run_statements(conn: &Connection, sql: &str, stdout: &mut String) -> rusqlite::Result<()> {
    let mut batch = Batch::new(conn, sql);
    while let Some(mut stmt) = batch.next()? {
        let columns = stmt.column_count();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let mut fields = Vec::with_capacity(columns);
            for i in 0..columns {
                fields.push(render(row.get_ref(i)?));
            }
            stdout.push_str(&fields.join("|"));
            stdout.push('\n');
        }
    }
    Ok(())
}

fn render(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => format!("{:?}", f),
        ValueRef::Text(t) | ValueRef::Blob(t) => String::from_utf8_lossy(t).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const WORKLOAD: &[&str] = &[
        "CREATE TABLE ctf3 (name STRING PRIMARY KEY, friendCount INT, requestCount INT, favoriteWord CHAR(15))",
        "INSERT INTO ctf3 (name, friendCount, requestCount, favoriteWord) VALUES (\"siddarth\", 0, 0, \"\")",
        "UPDATE ctf3 SET friendCount=friendCount+3, requestCount=requestCount+1, favoriteWord=\"jxnuvcqnpkdjqwn\" WHERE name=\"siddarth\"; SELECT * FROM ctf3;",
        "INSERT INTO missing VALUES (1)",
        "SELECT 1.5, NULL, 'x'",
    ];

    #[tokio::test]
    async fn test_execute_renders_rows() {
        let db = SqliteExecutor::in_memory().unwrap();
        db.execute("k1", NodeRole::Leader, "CREATE TABLE t (a INT, b TEXT)").await.unwrap();
        db.execute("k2", NodeRole::Leader, "INSERT INTO t VALUES (1, 'one'), (2, NULL)")
            .await
            .unwrap();

        let out = db
            .execute("k3", NodeRole::Leader, "SELECT a, b FROM t ORDER BY a")
            .await
            .unwrap();
        assert_eq!(out.stdout, "1|one\n2|\n");
        assert_eq!(out.stderr, "");
        assert_eq!(out.sequence_number, 3);
    }

    #[tokio::test]
    async fn test_error_consumes_sequence_number() {
        let db = SqliteExecutor::in_memory().unwrap();
        let err = db
            .execute("bad", NodeRole::Follower, "INSERT INTO nowhere VALUES (1)")
            .await
            .unwrap_err();
        assert!(err.message.contains("no such table"));
        assert!(err.output.stderr.starts_with("Error: "));
        assert_eq!(err.output.sequence_number, 1);

        let out = db.execute("ok", NodeRole::Follower, "SELECT 1").await.unwrap();
        assert_eq!(out.sequence_number, 2);
        assert_eq!(out.stdout, "1\n");
    }

    #[tokio::test]
    async fn test_failure_keeps_earlier_statement_output() {
        let db = SqliteExecutor::in_memory().unwrap();
        let err = db
            .execute("k", NodeRole::Leader, "SELECT 7; SELECT * FROM missing; SELECT 8;")
            .await
            .unwrap_err();
        assert_eq!(err.output.stdout, "7\n");
    }

    #[tokio::test]
    async fn test_replicas_produce_identical_output() {
        let dir = tempdir().unwrap();
        let a = SqliteExecutor::new(&dir.path().join("a/storage.sql")).unwrap();
        let b = SqliteExecutor::new(&dir.path().join("b/storage.sql")).unwrap();

        let mut outputs_a = Vec::new();
        let mut outputs_b = Vec::new();
        for (i, query) in WORKLOAD.iter().enumerate() {
            let key = format!("k{}", i);
            // Role differs between replicas and must not matter
            outputs_a.push(a.execute(&key, NodeRole::Leader, query).await);
            outputs_b.push(b.execute(&key, NodeRole::Follower, query).await);
        }

        assert_eq!(outputs_a, outputs_b);
        assert_eq!(
            outputs_a[2].as_ref().unwrap().stdout,
            "siddarth|3|1|jxnuvcqnpkdjqwn\n"
        );
        assert!(outputs_a[3].is_err());
        assert_eq!(outputs_a[4].as_ref().unwrap().stdout, "1.5||x\n");
    }

    #[tokio::test]
    async fn test_new_discards_previous_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("storage.sql");
        {
            let db = SqliteExecutor::new(&path).unwrap();
            db.execute("k", NodeRole::Leader, "CREATE TABLE t (x INT)").await.unwrap();
        }

        let db = SqliteExecutor::new(&path).unwrap();
        // Same DDL succeeds again because the old file is gone
        db.execute("k", NodeRole::Leader, "CREATE TABLE t (x INT)").await.unwrap();
    }
}
