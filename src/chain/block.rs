//! Block Types
//!
//! A block is one ledger entry: a sequence id, the hash of the block
//! before it, and the serialized transaction payload.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// SHA-256 digest of a block
pub type BlockHash = [u8; 32];

/// `prev_hash` of the block at index 0
pub const GENESIS_PREV_HASH: [u8; 1] = [0];

/// Domain tag mixed into every block hash. Bump the version when the
/// encoding below changes; nodes on different versions cannot verify
/// each other's signatures.
const HASH_DOMAIN: &[u8] = b"adminchain/block/v1";

/// A single ledger block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Position in the chain, starting at 0
    pub id: u64,
    /// Hash of the preceding block, or [`GENESIS_PREV_HASH`] for block 0
    pub prev_hash: Vec<u8>,
    /// Codec payload (statement plus encoded parameters)
    pub data: String,
}

impl Block {
    /// Create a block from its parts
    pub fn new(id: u64, prev_hash: Vec<u8>, data: impl Into<String>) -> Self {
        Self {
            id,
            prev_hash,
            data: data.into(),
        }
    }

    /// Canonical byte encoding the hash is computed over.
    ///
    /// Layout: domain tag, `id` as u64 LE, then `prev_hash` and `data`
    /// each prefixed with their length as u32 LE.
    pub fn hash_material(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(
            HASH_DOMAIN.len() + 8 + 4 + self.prev_hash.len() + 4 + self.data.len(),
        );
        buf.extend_from_slice(HASH_DOMAIN);
        buf.extend_from_slice(&self.id.to_le_bytes());
        buf.extend_from_slice(&(self.prev_hash.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.prev_hash);
        buf.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        buf.extend_from_slice(self.data.as_bytes());
        buf
    }

    /// Compute the hash of the block
    pub fn hash(&self) -> BlockHash {
        let mut hasher = Sha256::new();
        hasher.update(self.hash_material());
        hasher.finalize().into()
    }

    /// Check whether this block carries the genesis sentinel
    pub fn has_genesis_link(&self) -> bool {
        self.prev_hash.as_slice() == GENESIS_PREV_HASH
    }
}

/// A block together with the server's signature over its hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedBlock {
    pub block: Block,
    pub signature: Vec<u8>,
}
