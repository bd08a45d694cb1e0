//! Chain calculator: reorganization from an accepted snapshot to a candidate tip
//!
//! For a candidate chain link the calculator:
//! 1. seeds a genesis snapshot when there is none (or the candidate is genesis)
//! 2. walks the taller side back until both sides have the same height
//! 3. walks both sides back in lockstep to the common ancestor
//! 4. rolls the working copy back to the ancestor, provided its undo journals
//!    still reach that far
//! 5. replays the candidate side, applying each block's UTXO delta before
//!    validating it
//!
//! Validation failures, missing data and cancellation stop the calculation
//! but still return the furthest snapshot reached together with the failure.
//! Invariant violations are returned as errors.

use crate::blockchain::Blockchain;
use crate::cancel::CancelToken;
use crate::config::EngineConfig;
use crate::error::{ConsensusError, DataKind, Result};
use crate::lookup::ChainStore;
use crate::prefetch::BlockPrefetcher;
use crate::rules::ChainRules;
use crate::types::*;
use crate::uint256::UInt256;
use crate::utxo;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Instant;

/// Result of one calculation
#[derive(Debug, Clone)]
pub struct ChainCalculation {
    /// Furthest consistent snapshot reached
    pub blockchain: Arc<Blockchain>,
    /// Why the calculation stopped short of the candidate, if it did
    pub failure: Option<ConsensusError>,
    pub rolled_back: u64,
    pub applied: u64,
    pub tx_count: u64,
    pub input_count: u64,
}

impl ChainCalculation {
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }
}

#[derive(Debug, Default)]
struct Progress {
    rolled_back: u64,
    applied: u64,
    tx_count: u64,
    input_count: u64,
}

pub struct ChainCalculator<'a> {
    rules: &'a ChainRules,
    store: &'a dyn ChainStore,
    prefetch_depth: usize,
    undo_window: u64,
}

impl<'a> ChainCalculator<'a> {
    pub fn new(rules: &'a ChainRules, store: &'a dyn ChainStore) -> Self {
        Self {
            rules,
            store,
            prefetch_depth: EngineConfig::default().prefetch_depth(),
            undo_window: EngineConfig::default().undo_window,
        }
    }

    pub fn with_config(rules: &'a ChainRules, store: &'a dyn ChainStore, config: &EngineConfig) -> Self {
        Self {
            rules,
            store,
            prefetch_depth: config.prefetch_depth(),
            undo_window: config.undo_window,
        }
    }

    /// Compute the chain state at `candidate`, starting from `current`
    ///
    /// Deterministic for a given snapshot, candidate and store contents.
    /// Re-running once missing data has arrived continues where a previous
    /// run stopped. Without a snapshot there is nothing to fall back on, so
    /// failures while seeding genesis are returned as errors.
    pub fn calculate(
        &self,
        current: Option<&Blockchain>,
        candidate: &ChainedBlock,
        cancel: &CancelToken,
    ) -> Result<ChainCalculation> {
        let started = Instant::now();
        let mut chain = match current {
            Some(chain) if candidate.height > 0 => chain.clone(),
            _ => self.bootstrap(candidate, cancel)?,
        };
        let from = chain.tip().clone();

        let mut progress = Progress::default();
        let result = self.reorganize(&mut chain, candidate, cancel, &mut progress);

        let failure = match result {
            Ok(()) => None,
            Err(e @ (ConsensusError::Validation { .. } | ConsensusError::MissingData { .. } | ConsensusError::Cancelled)) => {
                warn!(
                    "chain calculation towards {} stopped at height {} ({}): {e}",
                    candidate.block_hash,
                    chain.height(),
                    chain.tip_hash()
                );
                Some(e)
            }
            Err(e) => {
                error!("chain calculation towards {} aborted: {e}", candidate.block_hash);
                return Err(e);
            }
        };

        let elapsed = started.elapsed();
        if progress.rolled_back > 0 || progress.applied > 0 {
            info!(
                "chain {} ({}) -> {} ({}): rolled back {}, applied {}, {} txs, {} inputs in {:.3}s ({:.0} tx/s)",
                from.block_hash,
                from.height,
                chain.tip_hash(),
                chain.height(),
                progress.rolled_back,
                progress.applied,
                progress.tx_count,
                progress.input_count,
                elapsed.as_secs_f64(),
                progress.tx_count as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
            );
        }

        Ok(ChainCalculation {
            blockchain: Arc::new(chain),
            failure,
            rolled_back: progress.rolled_back,
            applied: progress.applied,
            tx_count: progress.tx_count,
            input_count: progress.input_count,
        })
    }

    /// Genesis-only snapshot for the candidate's ancestry
    fn bootstrap(&self, candidate: &ChainedBlock, cancel: &CancelToken) -> Result<Blockchain> {
        let mut link = candidate.clone();
        while link.height > 0 {
            cancel.check()?;
            link = self.parent_of(&link)?;
        }
        let genesis_hash = self.rules.genesis_hash();
        if link.block_hash != genesis_hash {
            return Err(ConsensusError::validation(
                link.block_hash,
                0,
                format!("genesis does not match the network genesis {genesis_hash}"),
            ));
        }
        info!("seeded chain state at genesis {genesis_hash}");
        Blockchain::genesis(link)
    }

    fn parent_of(&self, link: &ChainedBlock) -> Result<ChainedBlock> {
        let parent = self.store.chained_block(&link.previous_block_hash)?;
        if parent.height + 1 != link.height {
            return Err(ConsensusError::InvariantViolation(format!(
                "chain link {} at height {} has parent {} at height {}",
                link.block_hash, link.height, parent.block_hash, parent.height
            )));
        }
        Ok(parent)
    }

    fn reorganize(
        &self,
        chain: &mut Blockchain,
        candidate: &ChainedBlock,
        cancel: &CancelToken,
        progress: &mut Progress,
    ) -> Result<()> {
        let (ancestor, path) = self.find_common_ancestor(chain, candidate, cancel)?;
        if ancestor < chain.height() || !path.is_empty() {
            debug!(
                "common ancestor at height {ancestor}: {} to roll back, {} to apply",
                chain.height() - ancestor,
                path.len()
            );
        }
        if ancestor + 1 < chain.undo_floor() {
            // Journals below the floor were dropped; the chain stays put
            let oldest_dropped = chain.undo_floor() - 1;
            let key = chain.block_at(oldest_dropped).map_or(chain.tip_hash(), |link| link.block_hash);
            warn!(
                "reorganization to {} needs undo data down to height {}, journals reach {}",
                candidate.block_hash,
                ancestor + 1,
                chain.undo_floor()
            );
            return Err(ConsensusError::missing(DataKind::Undo, key));
        }
        self.roll_back_to(chain, ancestor, cancel, progress)?;
        self.replay(chain, &path, cancel, progress)
    }

    /// Height of the last block shared with `candidate`'s ancestry, and the
    /// candidate-side links above it in ascending order
    fn find_common_ancestor(
        &self,
        chain: &Blockchain,
        candidate: &ChainedBlock,
        cancel: &CancelToken,
    ) -> Result<(u64, Vec<ChainedBlock>)> {
        let mut side = candidate.clone();
        let mut path = Vec::new();

        while side.height > chain.height() {
            cancel.check()?;
            let parent = self.parent_of(&side)?;
            path.push(std::mem::replace(&mut side, parent));
        }

        // The current side needs no lookups: its links are the block list
        let mut height = side.height;
        loop {
            cancel.check()?;
            let current = chain.block_at(height).ok_or_else(|| {
                ConsensusError::InvariantViolation(format!("block list has no entry at height {height}"))
            })?;
            if current.block_hash == side.block_hash {
                break;
            }
            if height == 0 {
                return Err(ConsensusError::validation(
                    candidate.block_hash,
                    candidate.height,
                    "no common ancestor with the current chain",
                ));
            }
            let parent = self.parent_of(&side)?;
            path.push(std::mem::replace(&mut side, parent));
            height -= 1;
        }

        path.reverse();
        Ok((height, path))
    }

    fn roll_back_to(
        &self,
        chain: &mut Blockchain,
        ancestor: u64,
        cancel: &CancelToken,
        progress: &mut Progress,
    ) -> Result<()> {
        while chain.height() > ancestor {
            cancel.check()?;
            let block = self.store.block(&chain.tip_hash())?;
            chain.rollback_tip(&block)?;
            progress.rolled_back += 1;
        }
        Ok(())
    }

    fn replay(
        &self,
        chain: &mut Blockchain,
        path: &[ChainedBlock],
        cancel: &CancelToken,
        progress: &mut Progress,
    ) -> Result<()> {
        if path.is_empty() {
            return Ok(());
        }
        let hashes: Vec<UInt256> = path.iter().map(|link| link.block_hash).collect();
        let prefetcher = BlockPrefetcher::new(self.store, self.prefetch_depth, cancel.clone());
        prefetcher.run(&hashes, |blocks| {
            for link in path {
                cancel.check()?;
                let block = match blocks.next() {
                    Some(block) => block?,
                    None => {
                        cancel.check()?;
                        return Err(ConsensusError::InvariantViolation(format!(
                            "prefetch ended before block {}",
                            link.block_hash
                        )));
                    }
                };
                self.apply_block(chain, link, &block, progress)?;
            }
            Ok(())
        })
    }

    /// UTXO delta first, then the rules; a rejected block leaves `chain` as it was
    fn apply_block(
        &self,
        chain: &mut Blockchain,
        link: &ChainedBlock,
        block: &Block,
        progress: &mut Progress,
    ) -> Result<()> {
        if block.hash() != link.block_hash {
            return Err(ConsensusError::InvariantViolation(format!(
                "store returned block {} for {}",
                block.hash(),
                link.block_hash
            )));
        }
        let work = self
            .rules
            .calculate_work(&block.header)
            .map_err(|e| ConsensusError::validation(link.block_hash, link.height, e.to_string()))?;
        if chain.total_work() + work != link.total_work {
            return Err(ConsensusError::InvariantViolation(format!(
                "total work of chain link {} does not match its parent plus its header",
                link.block_hash
            )));
        }

        let exceptions = &self.rules.params().duplicate_exceptions;
        let delta = utxo::apply_block(block, link.height, chain.utxo_mut(), exceptions)?;
        if let Err(e) = self.rules.validate_block(block, chain, self.store, self.store) {
            utxo::rollback_block(block, link.height, chain.utxo_mut(), &delta.undo)?;
            return Err(e);
        }
        chain.push(link.clone(), delta.undo)?;
        chain.prune_undo(self.undo_window);

        progress.applied += 1;
        progress.tx_count += delta.tx_count;
        progress.input_count += delta.input_count;
        Ok(())
    }
}
