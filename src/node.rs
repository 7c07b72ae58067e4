//! Node Roles
//!
//! Wiring for the two kinds of process: the authoritative server, which
//! owns the only writable ledger and serves signed blocks, and the
//! follower, which pulls those blocks on a fixed interval.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::chain::Ledger;
use crate::codec::Param;
use crate::config::AdminChainConfig;
use crate::crypto::{BlockSigner, BlockVerifier};
use crate::error::Result;
use crate::network::NetworkServer;
use crate::persistence::{load_chain, PersistenceProvider, SharedProvider, StoragePaths};
use crate::replay::replay_error;
use crate::store::{ChainStore, SnapshotStore};
use crate::propagation::BlockPropagationResponder;
use crate::sync::{BlockSyncClient, RpcBlockProvider, SyncTask};

/// Load the provider configured for this node
pub fn load_provider(config: &AdminChainConfig) -> Result<SharedProvider> {
    let paths = StoragePaths::from_config(config.data_dir(), &config.storage);
    Ok(PersistenceProvider::load(paths)?.into_shared())
}

/// Write each genesis statement as a block when the chain is empty.
/// Returns how many blocks were written.
pub fn apply_genesis(provider: &mut PersistenceProvider, statements: &[String]) -> Result<usize> {
    if provider.height() > 0 || statements.is_empty() {
        return Ok(0);
    }

    for statement in statements {
        provider.execute_transaction(statement, &[])?;
    }
    provider.update_chain_state()?;
    tracing::info!("Wrote {} genesis blocks", statements.len());
    Ok(statements.len())
}

/// Execute one transaction against the node's chain while no node process
/// is running. Returns the statement's rowid and the new chain height.
pub fn execute_offline(
    config: &AdminChainConfig,
    statement: &str,
    params: &[Param],
) -> Result<(i64, u64)> {
    if config.sync.is_some() {
        return Err(crate::Error::Config("followers are read-only; execute on the server".into()));
    }
    let paths = StoragePaths::from_config(config.data_dir(), &config.storage);
    let mut provider = PersistenceProvider::load(paths)?;
    let outcome = provider
        .execute_transaction(statement, params)
        .map(|rowid| (rowid, provider.height()));
    provider.close()?;
    outcome
}

/// Read and validate the configured chain log. Opens the log read-only
/// and leaves the node's snapshot file alone, so it is safe next to a
/// running node. A missing log is an error.
pub fn inspect_chain(config: &AdminChainConfig) -> Result<Ledger> {
    let paths = StoragePaths::from_config(config.data_dir(), &config.storage);
    let mut chain_store = ChainStore::open_read_only(&paths.chain_db_path())?;
    let chain = load_chain(&chain_store)?;
    chain_store.close()?;
    Ok(chain)
}

/// Replay `chain` into a private in-memory snapshot
pub fn inspect_snapshot(chain: &Ledger) -> Result<SnapshotStore> {
    let snapshot = SnapshotStore::open_in_memory()?;
    for block in chain {
        snapshot
            .replay(block)
            .map_err(|e| replay_error(block.id, "snapshot", e))?;
    }
    Ok(snapshot)
}

/// Flush new blocks to the chain log every `interval` until `shutdown`
/// flips to true
pub fn spawn_persist_task(
    provider: SharedProvider,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }

            match provider.lock().await.update_chain_state() {
                Ok(0) => {}
                Ok(written) => tracing::debug!("Flushed {} blocks to the chain log", written),
                Err(e) => tracing::warn!("Failed to flush chain log: {}", e),
            }
        }
    })
}

/// Run the authoritative server until `shutdown` resolves
pub async fn run_server<F>(config: &AdminChainConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let server_config = config.server()?;
    let signer = BlockSigner::load(&server_config.signing_key)?;
    let provider = load_provider(config)?;
    apply_genesis(&mut *provider.lock().await, &server_config.genesis)?;
    tracing::info!(
        "Node {} serving chain of height {}",
        config.node.id,
        provider.lock().await.height()
    );

    let responder = Arc::new(BlockPropagationResponder::new(provider.clone(), signer));
    let server = Arc::new(NetworkServer::new(server_config.bind_address.clone(), responder));
    let serving = Arc::clone(&server);
    let mut server_handle = tokio::spawn(async move { serving.start().await });

    let (persist_tx, persist_rx) = watch::channel(false);
    let persist_handle = spawn_persist_task(provider.clone(), config.persist_interval(), persist_rx);

    tokio::pin!(shutdown);
    let outcome = tokio::select! {
        _ = &mut shutdown => None,
        result = &mut server_handle => Some(result),
    };
    let server_result = match outcome {
        Some(result) => result,
        None => {
            tracing::info!("Received shutdown signal");
            server.stop();
            server_handle.await
        }
    };

    let _ = persist_tx.send(true);
    let _ = persist_handle.await;
    provider.lock().await.close()?;
    tracing::info!("Node {} shutdown complete", config.node.id);

    match server_result {
        Ok(result) => result,
        Err(e) => Err(crate::Error::Internal(format!("server task panicked: {}", e))),
    }
}

/// Run a follower until `shutdown` resolves or sync hits a fatal error
pub async fn run_follower<F>(config: &AdminChainConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let sync_config = config.sync()?;
    let verifier = BlockVerifier::load(&sync_config.server_public_key)?;
    let provider = load_provider(config)?;
    tracing::info!(
        "Node {} following {} from height {}",
        config.node.id,
        sync_config.server_address,
        provider.lock().await.height()
    );

    let remote = Arc::new(RpcBlockProvider::connect(
        sync_config.server_address.clone(),
        sync_config.connect_timeout(),
        sync_config.request_timeout(),
    ));
    let client = BlockSyncClient::new(provider.clone(), verifier);
    let mut task = SyncTask::spawn(client, remote, sync_config.interval());

    let (persist_tx, persist_rx) = watch::channel(false);
    let persist_handle = spawn_persist_task(provider.clone(), config.persist_interval(), persist_rx);

    tokio::pin!(shutdown);
    let outcome = tokio::select! {
        _ = &mut shutdown => None,
        result = task.wait() => Some(result),
    };
    let sync_result = match outcome {
        Some(result) => result,
        None => {
            tracing::info!("Received shutdown signal");
            task.stop().await
        }
    };

    let _ = persist_tx.send(true);
    let _ = persist_handle.await;
    provider.lock().await.close()?;
    tracing::info!("Node {} shutdown complete", config.node.id);

    sync_result
}
