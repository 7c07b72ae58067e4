//! Periodic Sync Task
//!
//! Runs sync cycles on a fixed delay until told to stop. A cycle that is
//! already running when the stop signal arrives finishes first.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{BlockProvider, BlockSyncClient};
use crate::error::{Error, Result};

/// Handle to a running background sync loop
pub struct SyncTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<Result<()>>,
}

impl SyncTask {
    /// Spawn the loop. It ends on [`SyncTask::stop`] or on the first
    /// fatal error; recoverable errors are logged and retried next cycle.
    pub fn spawn(
        mut client: BlockSyncClient,
        remote: Arc<dyn BlockProvider>,
        interval: Duration,
    ) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            tracing::info!("Block sync started, interval {:?}", interval);

            loop {
                if *shutdown_rx.borrow() {
                    break;
                }

                match client.sync_once(remote.as_ref()).await {
                    Ok(0) => tracing::trace!("Chain up to date"),
                    Ok(applied) => {
                        let height = client.provider().lock().await.height();
                        tracing::info!("Synced {} blocks, height now {}", applied, height);
                    }
                    Err(e) if e.is_fatal() => {
                        tracing::error!("Block sync stopped: {}", e);
                        return Err(e);
                    }
                    Err(e) => tracing::warn!("Sync cycle failed, retrying: {}", e),
                }

                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }

            tracing::info!("Block sync stopped");
            Ok(())
        });

        Self { shutdown, handle }
    }

    /// Check whether the loop has ended on its own
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the loop to end on its own. Cancel-safe; once it has
    /// returned, do not call [`SyncTask::stop`] or [`SyncTask::join`].
    pub async fn wait(&mut self) -> Result<()> {
        flatten((&mut self.handle).await)
    }

    /// Signal the loop to stop and wait for the current cycle to finish
    pub async fn stop(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        self.join().await
    }

    /// Wait for the loop to end without signalling it
    pub async fn join(self) -> Result<()> {
        flatten(self.handle.await)
    }
}

fn flatten(joined: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    match joined {
        Ok(result) => result,
        Err(e) => Err(Error::Internal(format!("sync task panicked: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::BlockSigner;
    use crate::persistence::{PersistenceProvider, StoragePaths};
    use crate::propagation::BlockPropagationResponder;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_task_follows_server_and_stops() {
        let dir = tempdir().unwrap();
        let server = PersistenceProvider::load(StoragePaths::new(dir.path().join("server")))
            .unwrap()
            .into_shared();
        let signer = BlockSigner::generate();
        let responder = Arc::new(BlockPropagationResponder::new(server.clone(), signer.clone()));

        let follower = PersistenceProvider::load(StoragePaths::new(dir.path().join("follower")))
            .unwrap()
            .into_shared();
        let client = BlockSyncClient::new(follower.clone(), signer.verifier());
        let task = SyncTask::spawn(client, responder, Duration::from_millis(20));

        server
            .lock()
            .await
            .execute_transaction("create table T (x int)", &[])
            .unwrap();

        let mut synced = false;
        for _ in 0..100 {
            if follower.lock().await.height() == 1 {
                synced = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(synced);

        task.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_task_ends_on_fatal_error() {
        let dir = tempdir().unwrap();
        let signer = BlockSigner::generate();

        // Signed block whose payload cannot be replayed on an empty snapshot
        let mut ledger = crate::chain::Ledger::new();
        ledger.add_block("insert into Missing (x) values (1)");

        struct Fixed(crate::chain::SignedBlock);

        #[async_trait::async_trait]
        impl BlockProvider for Fixed {
            async fn height(&self) -> Result<u64> {
                Ok(1)
            }

            async fn get_block(&self, _index: u64) -> Result<crate::chain::SignedBlock> {
                Ok(self.0.clone())
            }
        }

        let bad = signer.sign(ledger.get(0).unwrap().clone());
        let follower = PersistenceProvider::load(StoragePaths::new(dir.path().join("follower")))
            .unwrap()
            .into_shared();
        let client = BlockSyncClient::new(follower.clone(), signer.verifier());
        let task = SyncTask::spawn(client, Arc::new(Fixed(bad)), Duration::from_millis(10));

        let err = task.join().await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(follower.lock().await.height(), 0);
    }
}
