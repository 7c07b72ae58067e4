//! Block Providers
//!
//! Where a follower pulls blocks from: a remote server over RPC, or an
//! in-process propagation responder.

use std::time::Duration;

use crate::chain::SignedBlock;
use crate::error::{Error, Result};
use crate::network::{ErrorCode, Message, NetworkClient};
use crate::propagation::BlockPropagationResponder;

/// Source of signed blocks
#[async_trait::async_trait]
pub trait BlockProvider: Send + Sync {
    /// Height of the remote chain
    async fn height(&self) -> Result<u64>;

    /// Signed block at `index`
    async fn get_block(&self, index: u64) -> Result<SignedBlock>;
}

#[async_trait::async_trait]
impl BlockProvider for BlockPropagationResponder {
    async fn height(&self) -> Result<u64> {
        Ok(self.get_height().await)
    }

    async fn get_block(&self, index: u64) -> Result<SignedBlock> {
        BlockPropagationResponder::get_block(self, index).await
    }
}

/// Fetches blocks from a remote server over the network
pub struct RpcBlockProvider {
    client: NetworkClient,
}

impl RpcBlockProvider {
    pub fn new(client: NetworkClient) -> Self {
        Self { client }
    }

    /// Provider for `address` with the given timeouts
    pub fn connect(address: String, connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self::new(NetworkClient::new(address, connect_timeout, request_timeout))
    }

    pub fn address(&self) -> &str {
        self.client.address()
    }
}

#[async_trait::async_trait]
impl BlockProvider for RpcBlockProvider {
    async fn height(&self) -> Result<u64> {
        match self.client.request(Message::HeightRequest).await? {
            Message::HeightResponse { height } => Ok(height),
            other => Err(unexpected(other)),
        }
    }

    async fn get_block(&self, index: u64) -> Result<SignedBlock> {
        match self.client.request(Message::BlockRequest { index }).await? {
            Message::BlockResponse { block } => Ok(block),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(response: Message) -> Error {
    match response {
        Message::Error { code: ErrorCode::InvalidIndex, message } => Error::Remote(message),
        Message::Error { code, message } => Error::Remote(format!("{:?}: {}", code, message)),
        other => Error::Network(format!("unexpected response {}", other.type_name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    use crate::crypto::BlockSigner;
    use crate::network::NetworkServer;
    use crate::persistence::{PersistenceProvider, StoragePaths};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_rpc_provider_against_server() {
        let dir = tempdir().unwrap();
        let mut provider = PersistenceProvider::load(StoragePaths::new(dir.path())).unwrap();
        provider.execute_transaction("create table T (x int)", &[]).unwrap();
        provider.execute_transaction("insert into T (x) values (?)", &[1i64.into()]).unwrap();

        let signer = BlockSigner::generate();
        let responder = Arc::new(BlockPropagationResponder::new(provider.into_shared(), signer.clone()));
        let server = Arc::new(NetworkServer::new(String::new(), responder));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let serving = Arc::clone(&server);
        let handle = tokio::spawn(async move { serving.serve(listener).await });

        let remote = RpcBlockProvider::connect(address, Duration::from_secs(1), Duration::from_secs(2));
        assert_eq!(remote.height().await.unwrap(), 2);

        let block = remote.get_block(1).await.unwrap();
        assert_eq!(block.block.id, 1);
        signer.verifier().verify(&block).unwrap();

        let err = remote.get_block(2).await.unwrap_err();
        assert!(matches!(err, Error::Remote(_)));

        server.stop();
        handle.await.unwrap().unwrap();
    }
}
