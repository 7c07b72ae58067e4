//! Chain Store
//!
//! Durable ledger log: one `ChainState` row per block, keyed by id.
//! The `hash` column holds the block's link to its predecessor, which
//! is everything needed to rebuild the block verbatim.

use std::path::{Path, PathBuf};
use rusqlite::{params, Connection, OpenFlags};

use crate::chain::Block;
use crate::error::{Error, Result};

/// SQLite-backed durable ledger
pub struct ChainStore {
    /// Database connection, `None` once closed
    conn: Option<Connection>,
    /// Database file
    path: PathBuf,
}

impl ChainStore {
    /// Open or create the chain database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS ChainState (id integer, hash blob, data text)",
        )?;

        Ok(Self {
            conn: Some(conn),
            path: path.to_path_buf(),
        })
    }

    /// Open an existing chain database without creating or changing it
    pub fn open_read_only(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no chain database at {}", path.display()),
            )));
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        Ok(Self {
            conn: Some(conn),
            path: path.to_path_buf(),
        })
    }

    fn conn(&self) -> Result<&Connection> {
        self.conn.as_ref().ok_or(Error::StoreClosed)
    }

    /// Read every persisted block in id order
    pub fn load_blocks(&self) -> Result<Vec<Block>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, hash, data FROM ChainState ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut blocks = Vec::new();
        for row in rows {
            let (id, prev_hash, data) = row?;
            let id = u64::try_from(id)
                .map_err(|_| Error::ChainCorrupted(format!("negative block id {}", id)))?;
            blocks.push(Block::new(id, prev_hash, data));
        }

        Ok(blocks)
    }

    /// Highest block id stored, `None` when the log is empty
    pub fn max_id(&self) -> Result<Option<u64>> {
        let conn = self.conn()?;
        let max: Option<i64> = conn.query_row("SELECT MAX(id) FROM ChainState", [], |row| row.get(0))?;

        max.map(|id| {
            u64::try_from(id).map_err(|_| Error::ChainCorrupted(format!("negative block id {}", id)))
        })
        .transpose()
    }

    /// Number of stored rows
    pub fn count(&self) -> Result<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM ChainState", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Persist `blocks` in a single transaction
    pub fn insert_blocks(&mut self, blocks: &[Block]) -> Result<usize> {
        if blocks.is_empty() {
            return Ok(0);
        }

        let conn = self.conn.as_mut().ok_or(Error::StoreClosed)?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("INSERT INTO ChainState (id, hash, data) VALUES (?1, ?2, ?3)")?;
            for block in blocks {
                stmt.execute(params![block.id as i64, block.prev_hash, block.data])?;
            }
        }
        tx.commit()?;

        Ok(blocks.len())
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

    pub fn path(&self) -> &Path {
        &self.path
    }
}
