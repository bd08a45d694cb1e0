//! Lookup capabilities consumed by the calculator
//!
//! Storage backends and the script interpreter live outside this crate; they
//! plug in through these traits. A missing item is reported as
//! `ConsensusError::MissingData` so the caller can retry once it arrives.

use crate::config::ChainParams;
use crate::error::{ConsensusError, DataKind, Result};
use crate::pow::calculate_work;
use crate::types::*;
use crate::uint256::UInt256;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

pub trait HeaderLookup: Send + Sync {
    fn header(&self, hash: &UInt256) -> Result<BlockHeader>;
}

pub trait ChainLinkLookup: Send + Sync {
    fn chained_block(&self, hash: &UInt256) -> Result<ChainedBlock>;
}

pub trait BlockLookup: Send + Sync {
    fn block(&self, hash: &UInt256) -> Result<Block>;
}

pub trait TransactionLookup: Send + Sync {
    fn transaction(&self, hash: &UInt256) -> Result<Transaction>;
}

/// Everything the chain calculator reads from outside
pub trait ChainStore: HeaderLookup + ChainLinkLookup + BlockLookup + TransactionLookup {}

impl<T> ChainStore for T where T: HeaderLookup + ChainLinkLookup + BlockLookup + TransactionLookup {}

/// Opaque script check; must be side-effect free
pub trait ScriptVerifier: Send + Sync {
    fn verify(
        &self,
        script_pubkey: &[u8],
        tx: &Transaction,
        input_index: usize,
        script_sig: &[u8],
    ) -> bool;
}

/// Verifier that accepts every script, for tests and trusted replays
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAllScripts;

impl ScriptVerifier for AcceptAllScripts {
    fn verify(&self, _: &[u8], _: &Transaction, _: usize, _: &[u8]) -> bool {
        true
    }
}

#[derive(Default)]
struct StoreInner {
    headers: HashMap<UInt256, BlockHeader>,
    chain_links: HashMap<UInt256, ChainedBlock>,
    blocks: HashMap<UInt256, Block>,
    transactions: HashMap<UInt256, Transaction>,
}

/// In-memory implementation of every lookup
///
/// Headers and bodies can arrive separately: `add_header` creates the chain
/// link, `add_block` also makes the body and its transactions available.
pub struct MemoryBlockStore {
    inner: RwLock<StoreInner>,
}

impl MemoryBlockStore {
    pub fn new(params: &ChainParams) -> Result<Self> {
        let store = Self {
            inner: RwLock::new(StoreInner::default()),
        };
        let genesis = &params.genesis_block;
        let link = ChainedBlock::genesis(genesis.hash(), calculate_work(&genesis.header)?);
        {
            let mut inner = store.write();
            inner.headers.insert(link.block_hash, genesis.header.clone());
            inner.chain_links.insert(link.block_hash, link);
        }
        store.insert_body(genesis.clone());
        Ok(store)
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Link a header onto its known parent; idempotent
    pub fn add_header(&self, header: BlockHeader) -> Result<ChainedBlock> {
        let hash = header.hash();
        let mut inner = self.write();
        if let Some(existing) = inner.chain_links.get(&hash) {
            return Ok(existing.clone());
        }
        let parent = inner
            .chain_links
            .get(&header.previous_block)
            .cloned()
            .ok_or_else(|| ConsensusError::missing(DataKind::ChainLink, header.previous_block))?;
        let link = ChainedBlock::from_parent(&parent, hash, &calculate_work(&header)?);
        inner.headers.insert(hash, header);
        inner.chain_links.insert(hash, link.clone());
        Ok(link)
    }

    /// Add a full block, linking its header first
    pub fn add_block(&self, block: Block) -> Result<ChainedBlock> {
        let link = self.add_header(block.header.clone())?;
        self.insert_body(block);
        Ok(link)
    }

    fn insert_body(&self, block: Block) {
        let mut inner = self.write();
        for tx in &block.transactions {
            inner.transactions.insert(tx.hash(), tx.clone());
        }
        inner.blocks.insert(block.hash(), block);
    }

    /// Forget a block body while keeping its header and chain link
    pub fn remove_block_body(&self, hash: &UInt256) -> Option<Block> {
        self.write().blocks.remove(hash)
    }

    pub fn contains_block(&self, hash: &UInt256) -> bool {
        self.read().blocks.contains_key(hash)
    }

    pub fn block_count(&self) -> usize {
        self.read().blocks.len()
    }
}

impl HeaderLookup for MemoryBlockStore {
    fn header(&self, hash: &UInt256) -> Result<BlockHeader> {
        self.read()
            .headers
            .get(hash)
            .cloned()
            .ok_or_else(|| ConsensusError::missing(DataKind::Header, *hash))
    }
}

impl ChainLinkLookup for MemoryBlockStore {
    fn chained_block(&self, hash: &UInt256) -> Result<ChainedBlock> {
        self.read()
            .chain_links
            .get(hash)
            .cloned()
            .ok_or_else(|| ConsensusError::missing(DataKind::ChainLink, *hash))
    }
}

impl BlockLookup for MemoryBlockStore {
    fn block(&self, hash: &UInt256) -> Result<Block> {
        self.read()
            .blocks
            .get(hash)
            .cloned()
            .ok_or_else(|| ConsensusError::missing(DataKind::Block, *hash))
    }
}

impl TransactionLookup for MemoryBlockStore {
    fn transaction(&self, hash: &UInt256) -> Result<Transaction> {
        self.read()
            .transactions
            .get(hash)
            .cloned()
            .ok_or_else(|| ConsensusError::missing(DataKind::Transaction, *hash))
    }
}
