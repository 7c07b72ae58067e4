//! AdminChain Error Types

use thiserror::Error;

/// Result type alias for AdminChain operations
pub type Result<T> = std::result::Result<T, Error>;

/// AdminChain error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Storage errors
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Store is closed")]
    StoreClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Ledger errors
    #[error("The chain state database is corrupted: {0}")]
    ChainCorrupted(String),

    #[error("Invalid index {index}: chain height is {height}")]
    InvalidIndex { index: u64, height: u64 },

    #[error("Block {id} does not link to the local chain")]
    ChainLinkage { id: u64 },

    // Codec errors
    #[error("Failed to encode transaction: {0}")]
    Encode(String),

    #[error("Failed to decode block payload: {0}")]
    Decode(String),

    #[error("Replay of block {id} into {target} failed: {reason}")]
    Replay {
        id: u64,
        target: String,
        reason: String,
    },

    // Sync errors
    #[error("Block signature verification failed for block {0}")]
    SignatureInvalid(u64),

    #[error("Invalid block id, expected {expected} got {got}")]
    UnexpectedBlockId { expected: u64, got: u64 },

    #[error("Remote chain is behind: local height {local}, remote height {remote}")]
    RemoteBehind { local: u64, remote: u64 },

    #[error("Key error: {0}")]
    Key(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Connection failed to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Connection timeout to {0}")]
    ConnectionTimeout(String),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Wire serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if a sync cycle failing with this error should simply be retried
    /// on the next scheduled cycle
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::SignatureInvalid(_)
                | Error::UnexpectedBlockId { .. }
                | Error::ChainLinkage { .. }
                | Error::InvalidIndex { .. }
                | Error::RemoteBehind { .. }
                | Error::Network(_)
                | Error::ConnectionFailed { .. }
                | Error::ConnectionTimeout(_)
                | Error::Remote(_)
                | Error::Serialization(_)
        )
    }

    /// Check if this error means the local ledger and snapshot can no longer
    /// be trusted and the node must stop
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ChainCorrupted(_) | Error::Replay { .. } | Error::Decode(_)
        )
    }
}
