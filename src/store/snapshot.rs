//! Snapshot Store
//!
//! Relational materialization of the ledger. Every row in here was put
//! there by replaying a block payload, so the whole file can be thrown
//! away and rebuilt from the chain at any time.

use std::path::{Path, PathBuf};
use rusqlite::{params_from_iter, Connection};
use serde::Serialize;

use super::render_value;
use crate::chain::Block;
use crate::codec::{decode_transaction, Param, Transaction};
use crate::error::{Error, Result};
use crate::replay::ReplayTarget;

/// Column names and text-rendered rows of a query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// SQLite-backed relational snapshot
pub struct SnapshotStore {
    /// Database connection, `None` once closed
    conn: Option<Connection>,
    /// Database file, `None` for in-memory snapshots
    path: Option<PathBuf>,
}

impl SnapshotStore {
    /// Discard any snapshot at `path` and open an empty one in its place
    pub fn open_fresh(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        for stale in [path.to_path_buf(), sidecar(path, "-journal"), sidecar(path, "-wal")] {
            match std::fs::remove_file(&stale) {
                Ok(()) => tracing::debug!("Removed stale snapshot file {:?}", stale),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        let conn = Connection::open(path)?;
        // Derived data: durability comes from the chain log
        conn.pragma_update(None, "synchronous", "OFF")?;

        Ok(Self {
            conn: Some(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open an empty in-memory snapshot
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Some(Connection::open_in_memory()?),
            path: None,
        })
    }

    fn conn(&self) -> Result<&Connection> {
        self.conn.as_ref().ok_or(Error::StoreClosed)
    }

    /// Execute a state-mutating statement, returning the last inserted row id
    pub fn execute(&self, statement: &str, params: &[Param]) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(statement, params_from_iter(params.iter()))?;
        Ok(conn.last_insert_rowid())
    }

    /// Run a read-only query
    pub fn query(&self, statement: &str, params: &[Param]) -> Result<QueryResult> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(statement)?;
        if !stmt.readonly() {
            return Err(Error::Storage(rusqlite::Error::InvalidQuery));
        }

        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();

        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut text = Vec::with_capacity(width);
            for i in 0..width {
                text.push(render_value(row.get_ref(i)?));
            }
            out.push(text);
        }

        Ok(QueryResult { columns, rows: out })
    }

    /// Execute a decoded transaction
    pub fn apply(&self, tx: &Transaction) -> Result<i64> {
        self.execute(&tx.statement, &tx.params)
    }

    /// Decode a block payload and apply it
    pub fn replay(&self, block: &Block) -> Result<()> {
        let tx = decode_transaction(&block.data)?;
        self.apply(&tx)?;
        Ok(())
    }

    /// Close the connection; later calls fail with [`Error::StoreClosed`]
    pub fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| Error::Storage(e))?;
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl ReplayTarget for SnapshotStore {
    fn name(&self) -> &str {
        "snapshot"
    }

    fn accept_block(&mut self, block: &Block) -> Result<()> {
        self.replay(block)
    }
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}
