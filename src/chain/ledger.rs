//! Ledger
//!
//! Ordered, index-addressed, append-only sequence of blocks. Linkage is
//! only enforced by [`Ledger::is_valid`]; callers that bulk insert blocks
//! must re-run it before trusting the chain.

use super::block::{Block, GENESIS_PREV_HASH};

/// The in-memory hash chain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    blocks: Vec<Block>,
}

impl Ledger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new block carrying `data`, linked to the current tip
    pub fn add_block(&mut self, data: impl Into<String>) -> &Block {
        let prev_hash = match self.blocks.last() {
            Some(last) => last.hash().to_vec(),
            None => GENESIS_PREV_HASH.to_vec(),
        };
        let block = Block::new(self.height(), prev_hash, data);
        self.blocks.push(block);
        &self.blocks[self.blocks.len() - 1]
    }

    /// Append a pre-built block verbatim, without checking its linkage
    pub fn insert_block(&mut self, block: Block) {
        self.blocks.push(block);
    }

    /// Check the whole chain: the sentinel link at index 0, and for every
    /// later block, that `prev_hash` equals the hash of its predecessor
    pub fn is_valid(&self) -> bool {
        self.first_invalid().is_none()
    }

    /// Index of the first block that breaks the chain, if any
    pub fn first_invalid(&self) -> Option<u64> {
        let first = self.blocks.first()?;
        if !first.has_genesis_link() {
            return Some(0);
        }

        self.blocks
            .windows(2)
            .position(|pair| pair[1].prev_hash.as_slice() != pair[0].hash().as_slice())
            .map(|i| i as u64 + 1)
    }

    /// Number of blocks in the chain
    pub fn height(&self) -> u64 {
        self.blocks.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Block at `index`
    pub fn get(&self, index: u64) -> Option<&Block> {
        usize::try_from(index).ok().and_then(|i| self.blocks.get(i))
    }

    /// The most recent block
    pub fn last(&self) -> Option<&Block> {
        self.blocks.last()
    }

    /// Blocks after the first `count`
    pub fn blocks_from(&self, count: u64) -> &[Block] {
        let start = usize::try_from(count).unwrap_or(usize::MAX).min(self.blocks.len());
        &self.blocks[start..]
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Block> {
        self.blocks.iter()
    }
}

impl<'a> IntoIterator for &'a Ledger {
    type Item = &'a Block;
    type IntoIter = std::slice::Iter<'a, Block>;

    fn into_iter(self) -> Self::IntoIter {
        self.blocks.iter()
    }
}
