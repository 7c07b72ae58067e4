//! Sync Module
//!
//! Follower-side block synchronization: a passive client that runs one
//! cycle on demand, the sources it can pull blocks from, and the
//! background task that drives it on a fixed interval.

mod client;
mod provider;
mod task;

pub use client::BlockSyncClient;
pub use provider::{BlockProvider, RpcBlockProvider};
pub use task::SyncTask;
