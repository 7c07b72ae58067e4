//! Block Propagation Responder
//!
//! Server-side answers to followers: the current chain height, and any
//! block by index signed with the server key. Never mutates the chain.

use crate::chain::SignedBlock;
use crate::crypto::BlockSigner;
use crate::error::{Error, Result};
use crate::persistence::SharedProvider;

/// Serves signed blocks from the local chain
pub struct BlockPropagationResponder {
    provider: SharedProvider,
    signer: BlockSigner,
}

impl BlockPropagationResponder {
    pub fn new(provider: SharedProvider, signer: BlockSigner) -> Self {
        Self { provider, signer }
    }

    /// Current chain height
    pub async fn get_height(&self) -> u64 {
        self.provider.lock().await.height()
    }

    /// Block at `index`, signed over its hash
    pub async fn get_block(&self, index: u64) -> Result<SignedBlock> {
        // Copy under the lock, sign outside it
        let block = {
            let provider = self.provider.lock().await;
            let height = provider.height();
            provider
                .chain()
                .get(index)
                .cloned()
                .ok_or(Error::InvalidIndex { index, height })?
        };

        tracing::trace!("Serving block {}", index);
        Ok(self.signer.sign(block))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{PersistenceProvider, StoragePaths};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_height_and_signed_block() {
        let dir = tempdir().unwrap();
        let mut provider = PersistenceProvider::load(StoragePaths::new(dir.path())).unwrap();
        provider.execute_transaction("create table T (x int)", &[]).unwrap();
        let provider = provider.into_shared();

        let signer = BlockSigner::generate();
        let responder = BlockPropagationResponder::new(provider.clone(), signer.clone());

        assert_eq!(responder.get_height().await, 1);
        let signed = responder.get_block(0).await.unwrap();
        assert_eq!(signed.block.data, "create table T (x int)");
        signer.verifier().verify(&signed).unwrap();

        // Serving is read-only
        assert_eq!(provider.lock().await.height(), 1);
    }

    #[tokio::test]
    async fn test_invalid_index() {
        let dir = tempdir().unwrap();
        let provider = PersistenceProvider::load(StoragePaths::new(dir.path()))
            .unwrap()
            .into_shared();
        let responder = BlockPropagationResponder::new(provider, BlockSigner::generate());

        let err = responder.get_block(0).await.unwrap_err();
        assert!(matches!(err, Error::InvalidIndex { index: 0, height: 0 }));
    }

    #[tokio::test]
    async fn test_serves_blocks_appended_later() {
        let dir = tempdir().unwrap();
        let provider = PersistenceProvider::load(StoragePaths::new(dir.path()))
            .unwrap()
            .into_shared();
        let responder = BlockPropagationResponder::new(provider.clone(), BlockSigner::generate());

        assert!(responder.get_block(1).await.is_err());
        {
            let mut guard = provider.lock().await;
            guard.execute_transaction("create table T (x int)", &[]).unwrap();
            guard.execute_transaction("insert into T (x) values (?)", &[5i64.into()]).unwrap();
        }
        assert_eq!(responder.get_block(1).await.unwrap().block.id, 1);
    }
}
