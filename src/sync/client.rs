//! Block Sync Client
//!
//! Brings the local chain up to the height of a remote provider, one
//! block at a time. Every block must carry a valid server signature,
//! sit exactly at the local height and link to the local tip before it
//! is accepted; the first failure aborts the cycle and leaves the local
//! chain at the last accepted block.

use crate::crypto::BlockVerifier;
use crate::error::{Error, Result};
use crate::persistence::SharedProvider;
use crate::replay::{replay_error, ReplayTarget, ReplayTargets};

use super::BlockProvider;

/// Follower-side sync state
pub struct BlockSyncClient {
    /// Local ledger and snapshot
    provider: SharedProvider,
    /// Trusted server key
    verifier: BlockVerifier,
    /// Extra targets replayed after the snapshot, in registration order
    targets: ReplayTargets,
}

impl BlockSyncClient {
    pub fn new(provider: SharedProvider, verifier: BlockVerifier) -> Self {
        Self {
            provider,
            verifier,
            targets: ReplayTargets::new(),
        }
    }

    /// Register a replay target that mirrors ledger state. The target is
    /// first caught up on every block already in the local chain; after
    /// that it sees each new block once the snapshot has applied it.
    pub async fn register_target(&mut self, mut target: Box<dyn ReplayTarget>) -> Result<()> {
        let provider = self.provider.lock().await;
        for block in provider.chain() {
            target
                .accept_block(block)
                .map_err(|e| replay_error(block.id, target.name(), e))?;
        }
        tracing::debug!("Caught up {} on {} blocks", target.name(), provider.height());

        self.targets.register(target);
        Ok(())
    }

    pub fn provider(&self) -> &SharedProvider {
        &self.provider
    }

    /// Run one sync cycle against `remote`, returning the number of
    /// blocks accepted
    pub async fn sync_once(&mut self, remote: &dyn BlockProvider) -> Result<usize> {
        let mut local = self.provider.lock().await.height();
        let remote_height = remote.height().await?;

        if local > remote_height {
            return Err(Error::RemoteBehind {
                local,
                remote: remote_height,
            });
        }

        let mut applied = 0;
        while local != remote_height {
            let signed = remote.get_block(local).await?;
            self.verifier.verify(&signed)?;

            let block = signed.block;
            if block.id != local {
                return Err(Error::UnexpectedBlockId {
                    expected: local,
                    got: block.id,
                });
            }

            {
                let mut provider = self.provider.lock().await;
                provider.accept_block(&block)?;
                self.targets.accept_block(&block)?;
            }
            tracing::debug!("Accepted block {}", block.id);

            local += 1;
            applied += 1;
        }

        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use crate::chain::{Block, SignedBlock};
    use crate::crypto::BlockSigner;
    use crate::persistence::{PersistenceProvider, StoragePaths};
    use crate::propagation::BlockPropagationResponder;
    use tempfile::{tempdir, TempDir};

    struct Counter(Arc<Mutex<Vec<u64>>>);

    impl ReplayTarget for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        fn accept_block(&mut self, block: &Block) -> Result<()> {
            self.0.lock().unwrap().push(block.id);
            Ok(())
        }
    }

    /// Remote that serves whatever blocks it was given, without checks
    struct Scripted {
        height: u64,
        blocks: Vec<SignedBlock>,
    }

    #[async_trait::async_trait]
    impl BlockProvider for Scripted {
        async fn height(&self) -> Result<u64> {
            Ok(self.height)
        }

        async fn get_block(&self, index: u64) -> Result<SignedBlock> {
            self.blocks
                .iter()
                .find(|b| b.block.id == index)
                .or_else(|| self.blocks.first())
                .cloned()
                .ok_or(Error::InvalidIndex { index, height: self.height })
        }
    }

    struct Fixture {
        _dir: TempDir,
        server: BlockPropagationResponder,
        server_provider: SharedProvider,
        follower: BlockSyncClient,
        replayed: Arc<Mutex<Vec<u64>>>,
        signer: BlockSigner,
    }

    async fn fixture(statements: &[&str]) -> Fixture {
        let dir = tempdir().unwrap();
        let mut server = PersistenceProvider::load(StoragePaths::new(dir.path().join("server"))).unwrap();
        for statement in statements {
            server.execute_transaction(statement, &[]).unwrap();
        }
        let server_provider = server.into_shared();
        let signer = BlockSigner::generate();
        let responder = BlockPropagationResponder::new(server_provider.clone(), signer.clone());

        let follower_provider = PersistenceProvider::load(StoragePaths::new(dir.path().join("follower")))
            .unwrap()
            .into_shared();
        let mut follower = BlockSyncClient::new(follower_provider, signer.verifier());
        let replayed = Arc::new(Mutex::new(Vec::new()));
        follower.register_target(Box::new(Counter(replayed.clone()))).await.unwrap();

        Fixture {
            _dir: dir,
            server: responder,
            server_provider,
            follower,
            replayed,
            signer,
        }
    }

    #[tokio::test]
    async fn test_genesis_sync() {
        let mut f = fixture(&["create table T (x int)"]).await;

        assert_eq!(f.follower.sync_once(&f.server).await.unwrap(), 1);

        let provider = f.follower.provider().lock().await;
        assert_eq!(provider.height(), 1);
        assert!(provider.execute_query("select x from T", &[]).is_ok());
        assert_eq!(*f.replayed.lock().unwrap(), vec![0]);
    }

    #[tokio::test]
    async fn test_sync_reproduces_server_state() {
        let mut f = fixture(&[
            "create table Accounts (address text, level int)",
            "insert into Accounts (address, level) values ('a1', 1)",
            "insert into Accounts (address, level) values ('b2', 0)",
        ]).await;
        f.server_provider
            .lock()
            .await
            .execute_transaction(
                "update Accounts set level = ? where address = ?",
                &[1i64.into(), "b2".into()],
            )
            .unwrap();

        assert_eq!(f.follower.sync_once(&f.server).await.unwrap(), 4);

        let query = "select address, level from Accounts order by address";
        let server = f.server_provider.lock().await;
        let follower = f.follower.provider().lock().await;
        assert_eq!(follower.chain(), server.chain());
        assert_eq!(
            follower.execute_query(query, &[]).unwrap(),
            server.execute_query(query, &[]).unwrap()
        );
    }

    #[tokio::test]
    async fn test_sync_at_equal_height_is_a_no_op() {
        let mut f = fixture(&["create table T (x int)"]).await;
        f.follower.sync_once(&f.server).await.unwrap();
        f.replayed.lock().unwrap().clear();

        assert_eq!(f.follower.sync_once(&f.server).await.unwrap(), 0);
        assert!(f.replayed.lock().unwrap().is_empty());
        assert_eq!(f.follower.provider().lock().await.height(), 1);
    }

    #[tokio::test]
    async fn test_incremental_sync() {
        let mut f = fixture(&["create table T (x int)"]).await;
        f.follower.sync_once(&f.server).await.unwrap();

        f.server_provider
            .lock()
            .await
            .execute_transaction("insert into T (x) values (?)", &[9i64.into()])
            .unwrap();
        assert_eq!(f.follower.sync_once(&f.server).await.unwrap(), 1);

        let rows = f.follower.provider().lock().await.execute_query("select x from T", &[]).unwrap().rows;
        assert_eq!(rows, vec![vec!["9".to_string()]]);
        assert_eq!(*f.replayed.lock().unwrap(), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_bad_signature_aborts_cycle() {
        let mut f = fixture(&["create table T (x int)"]).await;
        let mut signed = f.server.get_block(0).await.unwrap();
        signed.signature = BlockSigner::generate().sign_block(&signed.block);
        let remote = Scripted { height: 1, blocks: vec![signed] };

        let err = f.follower.sync_once(&remote).await.unwrap_err();
        assert!(matches!(err, Error::SignatureInvalid(0)));
        assert!(err.is_retryable());
        assert_eq!(f.follower.provider().lock().await.height(), 0);
        assert!(f.replayed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_out_of_order_block_is_rejected() {
        let mut f = fixture(&[
            "create table T (x int)",
            "insert into T (x) values (1)",
            "insert into T (x) values (2)",
        ]).await;
        f.follower.sync_once(&f.server).await.unwrap();
        assert_eq!(f.follower.provider().lock().await.height(), 3);

        // Correctly signed, but claims id 5 while the follower is at 3
        let mut ledger = f.follower.provider().lock().await.chain().clone();
        ledger.add_block("insert into T (x) values (3)");
        let mut skipped = ledger.last().unwrap().clone();
        skipped.id = 5;
        let remote = Scripted { height: 6, blocks: vec![f.signer.sign(skipped)] };

        let err = f.follower.sync_once(&remote).await.unwrap_err();
        assert!(matches!(err, Error::UnexpectedBlockId { expected: 3, got: 5 }));
        assert_eq!(f.follower.provider().lock().await.height(), 3);
        assert_eq!(f.replayed.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_unlinked_block_is_rejected() {
        let mut f = fixture(&["create table T (x int)"]).await;
        f.follower.sync_once(&f.server).await.unwrap();

        // Signed and at the right height, but linked to a different chain
        let forged = Block::new(1, vec![7; 32], "drop table T");
        let remote = Scripted { height: 2, blocks: vec![f.signer.sign(forged)] };

        let err = f.follower.sync_once(&remote).await.unwrap_err();
        assert!(matches!(err, Error::ChainLinkage { id: 1 }));
        let provider = f.follower.provider().lock().await;
        assert_eq!(provider.height(), 1);
        assert!(provider.chain().is_valid());
        assert!(provider.execute_query("select x from T", &[]).is_ok());
    }

    #[tokio::test]
    async fn test_local_ahead_of_remote() {
        let mut f = fixture(&[]).await;
        f.follower
            .provider()
            .lock()
            .await
            .execute_transaction("create table Local (x int)", &[])
            .unwrap();

        let err = f.follower.sync_once(&f.server).await.unwrap_err();
        assert!(matches!(err, Error::RemoteBehind { local: 1, remote: 0 }));
    }

    #[tokio::test]
    async fn test_unreplayable_block_is_fatal() {
        let mut f = fixture(&[]).await;
        // The server would never produce this, but a signed one must still not be half-applied
        let mut ledger = crate::chain::Ledger::new();
        let bad = ledger.add_block("insert into Missing (x) values (1)").clone();
        let remote = Scripted { height: 1, blocks: vec![f.signer.sign(bad)] };

        let err = f.follower.sync_once(&remote).await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(f.follower.provider().lock().await.height(), 0);
        assert!(f.replayed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_target_registered_after_restart_is_caught_up() {
        let f = fixture(&["create table T (x int)"]).await;
        let Fixture { _dir: dir, server, server_provider, mut follower, signer, .. } = f;
        follower.sync_once(&server).await.unwrap();
        follower.provider().lock().await.close().unwrap();
        drop(follower);

        server_provider
            .lock()
            .await
            .execute_transaction("insert into T (x) values (?)", &[2i64.into()])
            .unwrap();

        let reloaded = PersistenceProvider::load(StoragePaths::new(dir.path().join("follower")))
            .unwrap()
            .into_shared();
        let mut follower = BlockSyncClient::new(reloaded, signer.verifier());
        let replayed = Arc::new(Mutex::new(Vec::new()));
        follower.register_target(Box::new(Counter(replayed.clone()))).await.unwrap();
        assert_eq!(*replayed.lock().unwrap(), vec![0]);

        assert_eq!(follower.sync_once(&server).await.unwrap(), 1);
        assert_eq!(follower.provider().lock().await.height(), 2);
        assert_eq!(*replayed.lock().unwrap(), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_target_that_cannot_catch_up_is_not_registered() {
        struct Failing;

        impl ReplayTarget for Failing {
            fn name(&self) -> &str {
                "failing"
            }

            fn accept_block(&mut self, _block: &Block) -> Result<()> {
                Err(Error::Decode("unsupported".into()))
            }
        }

        let mut f = fixture(&["create table T (x int)"]).await;
        f.follower.sync_once(&f.server).await.unwrap();

        let err = f.follower.register_target(Box::new(Failing)).await.unwrap_err();
        assert!(matches!(err, Error::Replay { id: 0, .. }));
        assert!(err.is_fatal());
    }
}
