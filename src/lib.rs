//! AdminChain - Permissioned Hash-Chained Ledger
//!
//! A single authoritative server appends SQL transactions to a hash-chained
//! ledger and applies them to a relational snapshot. Read-only followers
//! pull signed blocks from the server, verify them, and replay them to
//! reproduce the same snapshot.
//!
//! # Architecture
//!
//! Every mutation is encoded into a block payload and appended to the
//! ledger; the snapshot is only ever a derived view that can be rebuilt by
//! replaying the ledger from block 0. The ledger is flushed to a relational
//! chain log on a fixed interval and fully validated on every load.
//!
//! # Features
//!
//! - SHA-256 hash chain with full validation on load
//! - Typed transaction codec with exact replay of every parameter
//! - Ed25519-signed block propagation over a framed TCP protocol
//! - Periodic pull-based sync with pluggable replay targets

pub mod chain;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod network;
pub mod node;
pub mod persistence;
pub mod propagation;
pub mod replay;
pub mod store;
pub mod sync;

pub use config::AdminChainConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::chain::{Block, Ledger, SignedBlock};
    pub use crate::codec::Param;
    pub use crate::config::AdminChainConfig;
    pub use crate::crypto::{BlockSigner, BlockVerifier};
    pub use crate::error::{Error, Result};
    pub use crate::persistence::{PersistenceProvider, SharedProvider, StoragePaths};
    pub use crate::propagation::BlockPropagationResponder;
    pub use crate::replay::ReplayTarget;
    pub use crate::sync::{BlockProvider, BlockSyncClient};
}
