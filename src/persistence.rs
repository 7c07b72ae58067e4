//! Persistence Provider
//!
//! Owns the in-memory ledger, the durable chain log and the relational
//! snapshot of one node. On load the snapshot is discarded and rebuilt
//! by replaying every block, so it always reflects exactly the chain.
//!
//! New blocks live only in memory until [`PersistenceProvider::update_chain_state`]
//! writes them out. A crash in between loses those blocks together with
//! their snapshot rows (the snapshot is rebuilt from the log on restart),
//! so the two stores never disagree after a restart.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::chain::{Block, Ledger};
use crate::codec::{encode_transaction, Param};
use crate::config::StorageConfig;
use crate::error::{Error, Result};
use crate::replay::replay_error;
use crate::store::{ChainStore, QueryResult, SnapshotStore};

/// Handle shared by the local transaction path, the sync client and the
/// propagation responder. Holding the lock covers "append + replay" as a
/// single unit.
pub type SharedProvider = Arc<Mutex<PersistenceProvider>>;

/// Locations of the two stores of one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePaths {
    /// Directory both databases live in
    pub base_dir: PathBuf,
    /// Chain log file name
    pub chain_db_name: String,
    /// Snapshot file name
    pub state_db_name: String,
}

impl StoragePaths {
    /// Default file names under `base_dir`
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let defaults = StorageConfig::default();
        Self {
            base_dir: base_dir.into(),
            chain_db_name: defaults.chain_db_name,
            state_db_name: defaults.state_db_name,
        }
    }

    /// Paths from configuration
    pub fn from_config(base_dir: &Path, storage: &StorageConfig) -> Self {
        Self {
            base_dir: base_dir.to_path_buf(),
            chain_db_name: storage.chain_db_name.clone(),
            state_db_name: storage.state_db_name.clone(),
        }
    }

    pub fn chain_db_path(&self) -> PathBuf {
        self.base_dir.join(&self.chain_db_name)
    }

    pub fn state_db_path(&self) -> PathBuf {
        self.base_dir.join(&self.state_db_name)
    }
}

/// Ledger and snapshot owner for a single process
pub struct PersistenceProvider {
    paths: StoragePaths,
    chain: Ledger,
    chain_store: ChainStore,
    snapshot: SnapshotStore,
}

/// Read the chain log into a ledger, checking the id sequence and every
/// hash link
pub(crate) fn load_chain(chain_store: &ChainStore) -> Result<Ledger> {
    let mut chain = Ledger::new();
    for block in chain_store.load_blocks()? {
        if block.id != chain.height() {
            return Err(Error::ChainCorrupted(format!(
                "block at position {} has id {}",
                chain.height(),
                block.id
            )));
        }
        chain.insert_block(block);
    }

    if let Some(index) = chain.first_invalid() {
        tracing::error!(
            "Chain log {:?} fails validation at block {}",
            chain_store.path(),
            index
        );
        return Err(Error::ChainCorrupted(format!("block {} does not link", index)));
    }
    Ok(chain)
}

impl PersistenceProvider {
    /// Open both stores, load and validate the chain, then rebuild the
    /// snapshot from it.
    ///
    /// Fails with [`Error::ChainCorrupted`] if the persisted chain does not
    /// link; the node must not serve or sync in that case.
    pub fn load(paths: StoragePaths) -> Result<Self> {
        let chain_store = ChainStore::open(&paths.chain_db_path())?;
        let chain = load_chain(&chain_store)?;
        tracing::info!("Loaded chain of {} blocks from {:?}", chain.height(), paths.chain_db_path());

        let snapshot = SnapshotStore::open_fresh(&paths.state_db_path())?;
        for block in chain.iter() {
            snapshot
                .replay(block)
                .map_err(|e| replay_error(block.id, "snapshot", e))?;
        }
        tracing::info!("Rebuilt snapshot {:?}", paths.state_db_path());

        Ok(Self {
            paths,
            chain,
            chain_store,
            snapshot,
        })
    }

    /// Wrap into the shared handle
    pub fn into_shared(self) -> SharedProvider {
        Arc::new(Mutex::new(self))
    }

    pub fn chain(&self) -> &Ledger {
        &self.chain
    }

    pub fn height(&self) -> u64 {
        self.chain.height()
    }

    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }

    pub fn snapshot(&self) -> &SnapshotStore {
        &self.snapshot
    }

    /// Commit a mutation to the snapshot and append it to the ledger.
    ///
    /// The block is only appended once the relational write succeeded.
    /// Returns the last inserted row id.
    pub fn execute_transaction(&mut self, statement: &str, params: &[Param]) -> Result<i64> {
        let data = encode_transaction(statement, params)?;
        let inserted = self.snapshot.execute(statement, params)?;
        let block = self.chain.add_block(data);
        tracing::debug!("Appended block {}", block.id);
        Ok(inserted)
    }

    /// Read-only query against the snapshot
    pub fn execute_query(&self, statement: &str, params: &[Param]) -> Result<QueryResult> {
        self.snapshot.query(statement, params)
    }

    /// Accept a block produced elsewhere: it must sit at the current
    /// height and the candidate chain must validate. The block is replayed
    /// into the snapshot before the chain is extended, so a replay failure
    /// leaves the ledger untouched.
    pub fn accept_block(&mut self, block: &Block) -> Result<()> {
        let height = self.chain.height();
        if block.id != height {
            return Err(Error::UnexpectedBlockId {
                expected: height,
                got: block.id,
            });
        }

        let mut candidate = self.chain.clone();
        candidate.insert_block(block.clone());
        if !candidate.is_valid() {
            return Err(Error::ChainLinkage { id: block.id });
        }

        self.snapshot
            .replay(block)
            .map_err(|e| replay_error(block.id, "snapshot", e))?;
        self.chain = candidate;
        Ok(())
    }

    /// Persist every block beyond the highest stored id. Returns the
    /// number of blocks written; zero when already up to date.
    pub fn update_chain_state(&mut self) -> Result<usize> {
        let stored = match self.chain_store.max_id()? {
            Some(max) => max + 1,
            None => 0,
        };
        let pending = self.chain.blocks_from(stored);
        if pending.is_empty() {
            return Ok(0);
        }

        let written = self.chain_store.insert_blocks(pending)?;
        tracing::debug!("Persisted {} blocks (up to id {})", written, self.chain.height() - 1);
        Ok(written)
    }

    /// Flush pending blocks and close both stores
    pub fn close(&mut self) -> Result<()> {
        if !self.chain_store.is_open() {
            return Ok(());
        }

        let written = self.update_chain_state()?;
        self.chain_store.close()?;
        self.snapshot.close()?;
        tracing::info!("Closed stores ({} blocks flushed)", written);
        Ok(())
    }
}
