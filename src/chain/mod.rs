//! Chain Module
//!
//! The hash-chained, append-only block sequence and its validity rule.

pub mod block;
mod ledger;

pub use block::{Block, BlockHash, SignedBlock, GENESIS_PREV_HASH};
pub use ledger::Ledger;
