//! Immutable chain-state snapshot
//!
//! A `Blockchain` is the ordered list of chain links from genesis to tip, the
//! UTXO set after the tip, and undo journals for the most recent blocks.
//! Published snapshots are never mutated: `with_block` / `without_tip` return
//! new values, and the chain calculator advances a single private working copy
//! per calculation.
//!
//! Every collection is persistent (`im`), so cloning a snapshot shares its
//! structure with the original. A clone is O(1) and each update after it costs
//! O(log n) regardless of the UTXO set's size.

use crate::config::DuplicateException;
use crate::error::{ConsensusError, DataKind, Result};
use crate::types::*;
use crate::uint256::UInt256;
use crate::utxo;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// UTXO entries a block took out of the set, as they were just before
///
/// Forward application removes an entry once its last output is spent and
/// replaces an entry when a duplicate transaction is tolerated. Neither can be
/// derived from the block itself, so rollback reads them back from here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockUndo {
    /// Fully spent entries, captured before the spend that emptied them
    pub removed: HashMap<UInt256, UnspentTx>,
    /// Entries overwritten by a tolerated duplicate transaction
    pub replaced: HashMap<UInt256, UnspentTx>,
}

impl BlockUndo {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.replaced.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blockchain {
    block_list: im::Vector<ChainedBlock>,
    utxo: UtxoMap,
    /// Journals for heights `undo_floor()..=height()`, oldest first
    undo: im::Vector<BlockUndo>,
    heights: im::HashMap<UInt256, u64>,
}

impl Blockchain {
    /// Snapshot holding only the genesis link and an empty UTXO set
    pub fn genesis(genesis: ChainedBlock) -> Result<Self> {
        if genesis.height != 0 || genesis.previous_block_hash != UInt256::ZERO {
            return Err(ConsensusError::InvariantViolation(format!(
                "genesis link {} has height {} and parent {}",
                genesis.block_hash, genesis.height, genesis.previous_block_hash
            )));
        }
        let mut heights = im::HashMap::new();
        heights.insert(genesis.block_hash, 0);
        Ok(Self {
            block_list: im::Vector::unit(genesis),
            utxo: UtxoMap::new(),
            undo: im::Vector::unit(BlockUndo::default()),
            heights,
        })
    }

    /// Rebuild a snapshot from stored parts, checking contiguity and linkage
    ///
    /// `undo` holds the journals of the last `undo.len()` blocks, oldest
    /// first. At least the tip's journal is required.
    pub fn from_parts(block_list: Vec<ChainedBlock>, utxo: UtxoMap, undo: Vec<BlockUndo>) -> Result<Self> {
        let mut blocks = block_list.into_iter();
        let genesis = blocks
            .next()
            .ok_or_else(|| ConsensusError::InvariantViolation("empty block list".into()))?;
        let mut chain = Self::genesis(genesis)?;
        let block_count = chain.block_list.len() + blocks.len();
        if undo.is_empty() || undo.len() > block_count {
            return Err(ConsensusError::InvariantViolation(format!(
                "{} undo records for {block_count} blocks",
                undo.len()
            )));
        }
        for link in blocks {
            chain.push(link, BlockUndo::default())?;
        }
        chain.undo = undo.into_iter().collect();
        chain.utxo = utxo;
        Ok(chain)
    }

    pub fn tip(&self) -> &ChainedBlock {
        // Non-empty by construction
        &self.block_list[self.block_list.len() - 1]
    }

    pub fn tip_hash(&self) -> UInt256 {
        self.tip().block_hash
    }

    pub fn height(&self) -> u64 {
        self.tip().height
    }

    pub fn total_work(&self) -> &BigUint {
        &self.tip().total_work
    }

    pub fn genesis_link(&self) -> &ChainedBlock {
        &self.block_list[0]
    }

    pub fn block_list(&self) -> &im::Vector<ChainedBlock> {
        &self.block_list
    }

    pub fn block_at(&self, height: u64) -> Option<&ChainedBlock> {
        usize::try_from(height).ok().and_then(|h| self.block_list.get(h))
    }

    pub fn height_of(&self, block_hash: &UInt256) -> Option<u64> {
        self.heights.get(block_hash).copied()
    }

    pub fn contains_block(&self, block_hash: &UInt256) -> bool {
        self.heights.contains_key(block_hash)
    }

    pub fn utxo(&self) -> &UtxoMap {
        &self.utxo
    }

    /// Lowest height that can still be rolled back
    ///
    /// Equals `height() + 1` once every journal has been dropped.
    pub fn undo_floor(&self) -> u64 {
        self.height() + 1 - self.undo.len() as u64
    }

    pub fn undo_at(&self, height: u64) -> Option<&BlockUndo> {
        let floor = self.undo_floor();
        if height < floor || height > self.height() {
            return None;
        }
        usize::try_from(height - floor).ok().and_then(|i| self.undo.get(i))
    }

    /// Number of unspent outputs across all entries
    pub fn unspent_output_count(&self) -> u64 {
        self.utxo
            .values()
            .map(|entry| entry.unspent_outputs.unspent_count() as u64)
            .sum()
    }

    /// New snapshot with `block` applied on top of the tip
    ///
    /// Only the UTXO delta is computed here; rule validation belongs to the
    /// rules engine. Duplicate transactions are tolerated only where
    /// `exceptions` lists them.
    pub fn with_block(&self, block: &Block, link: ChainedBlock, exceptions: &[DuplicateException]) -> Result<Self> {
        let mut next = self.clone();
        next.check_extends(&link)?;
        let delta = utxo::apply_block(block, link.height, &mut next.utxo, exceptions)?;
        next.push(link, delta.undo)?;
        Ok(next)
    }

    /// New snapshot with the tip rolled back; `block` must be the tip's body
    pub fn without_tip(&self, block: &Block) -> Result<Self> {
        let mut next = self.clone();
        next.rollback_tip(block)?;
        Ok(next)
    }

    fn check_extends(&self, link: &ChainedBlock) -> Result<()> {
        let tip = self.tip();
        if link.previous_block_hash != tip.block_hash || link.height != tip.height + 1 {
            return Err(ConsensusError::InvariantViolation(format!(
                "block {} at height {} does not extend tip {} at height {}",
                link.block_hash, link.height, tip.block_hash, tip.height
            )));
        }
        Ok(())
    }

    pub(crate) fn utxo_mut(&mut self) -> &mut UtxoMap {
        &mut self.utxo
    }

    /// Append a link whose UTXO delta has already been applied
    pub(crate) fn push(&mut self, link: ChainedBlock, undo: BlockUndo) -> Result<()> {
        self.check_extends(&link)?;
        self.heights.insert(link.block_hash, link.height);
        self.block_list.push_back(link);
        self.undo.push_back(undo);
        Ok(())
    }

    /// Keep journals for at most the `window` most recent blocks (never fewer than one)
    pub(crate) fn prune_undo(&mut self, window: u64) {
        let window = usize::try_from(window.max(1)).unwrap_or(usize::MAX);
        while self.undo.len() > window {
            self.undo.pop_front();
        }
    }

    /// Undo the tip's UTXO delta and drop it from the list
    pub(crate) fn rollback_tip(&mut self, block: &Block) -> Result<ChainedBlock> {
        if self.block_list.len() == 1 {
            return Err(ConsensusError::InvariantViolation("cannot roll back the genesis block".into()));
        }
        let tip = self.tip().clone();
        if block.hash() != tip.block_hash {
            return Err(ConsensusError::InvariantViolation(format!(
                "rollback body {} does not match tip {}",
                block.hash(),
                tip.block_hash
            )));
        }
        let Some(undo) = self.undo.back() else {
            return Err(ConsensusError::missing(DataKind::Undo, tip.block_hash));
        };
        utxo::rollback_block(block, tip.height, &mut self.utxo, undo)?;
        self.undo.pop_back();
        self.block_list.pop_back();
        self.heights.remove(&tip.block_hash);
        Ok(tip)
    }
}
