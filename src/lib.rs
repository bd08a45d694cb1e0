//! # Chainstate
//!
//! Bitcoin chain-state engine: selects the best chain by cumulative proof of
//! work, maintains the UTXO set incrementally across reorganizations, and
//! enforces the consensus rules a block must meet to extend a chain.
//!
//! ## Architecture
//!
//! Leaves first:
//! - `uint256`, `types`, `hashing`: value types and consensus serialization
//! - `blockchain`: immutable snapshot of links, UTXO set and recent undo journals
//! - `pow`, `economic`, `rules`: targets, work, subsidy and block validation
//! - `utxo`: forward application and rollback of one block
//! - `chain_calculator`, `prefetch`: reorganization and block lookahead
//!
//! Storage, networking and the script interpreter are collaborators reached
//! through the traits in `lookup`.
//!
//! ## Usage
//!
//! ```rust
//! use chainstate::mining::{create_new_block, mine_block, MiningResult};
//! use chainstate::{AcceptAllScripts, CancelToken, ChainStateConfig, ChainStateEngine, MemoryBlockStore, Network};
//! use std::sync::Arc;
//!
//! let config = ChainStateConfig::new(Network::Regtest);
//! let store = Arc::new(MemoryBlockStore::new(&config.chain_params()).unwrap());
//! let engine = ChainStateEngine::new(&config, store.clone(), Arc::new(AcceptAllScripts)).unwrap();
//! assert_eq!(engine.height(), 0);
//!
//! let block = create_new_block(engine.rules(), &engine.current(), store.as_ref(), vec![], 0, &[0x51], 1296688700).unwrap();
//! let (block, result) = mine_block(block, 1_000_000).unwrap();
//! assert_eq!(result, MiningResult::Success);
//!
//! let link = store.add_block(block).unwrap();
//! let outcome = engine.process_candidate(&link.block_hash, &CancelToken::new()).unwrap();
//! assert!(outcome.is_complete());
//! assert_eq!(engine.height(), 1);
//! assert_eq!(engine.current().utxo().len(), 1);
//! ```

pub mod uint256;
pub mod types;
pub mod hashing;
pub mod constants;
pub mod config;
pub mod blockchain;
pub mod pow;
pub mod economic;
pub mod rules;
pub mod utxo;
pub mod lookup;
pub mod cancel;
pub mod prefetch;
pub mod chain_calculator;
pub mod mining;
pub mod error;

// Re-export commonly used types
pub use blockchain::{BlockUndo, Blockchain};
pub use cancel::CancelToken;
pub use chain_calculator::{ChainCalculation, ChainCalculator};
pub use config::{ChainParams, ChainStateConfig, EngineConfig, Network};
pub use constants::*;
pub use error::{ConsensusError, DataKind, Result};
pub use lookup::{
    AcceptAllScripts, BlockLookup, ChainLinkLookup, ChainStore, HeaderLookup, MemoryBlockStore, ScriptVerifier,
    TransactionLookup,
};
pub use rules::{compare_tips, select_winning_blockchain, ChainRules};
pub use types::*;
pub use uint256::UInt256;

use log::{debug, info, warn};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

/// Owner of the accepted chain
///
/// Readers take the current snapshot as an `Arc` and never observe a
/// half-updated chain: a calculation works on its own copy and the result is
/// swapped in under the write lock.
///
/// Blocks that failed validation are remembered, and candidates descending
/// from one are rejected without being replayed.
pub struct ChainStateEngine {
    rules: ChainRules,
    config: EngineConfig,
    store: Arc<dyn ChainStore>,
    chain: RwLock<Arc<Blockchain>>,
    invalid: RwLock<HashSet<UInt256>>,
}

impl ChainStateEngine {
    /// Create an engine seeded at the network's genesis block
    ///
    /// The store must already know the genesis chain link.
    pub fn new(
        config: &ChainStateConfig,
        store: Arc<dyn ChainStore>,
        script_verifier: Arc<dyn ScriptVerifier>,
    ) -> Result<Self> {
        config.engine.validate()?;
        let rules = ChainRules::new(config.chain_params(), script_verifier)?
            .with_parallel_validation(config.engine.parallel_validation);
        let genesis = store.chained_block(&rules.genesis_hash())?;

        let seeded = ChainCalculator::with_config(&rules, store.as_ref(), &config.engine).calculate(
            None,
            &genesis,
            &CancelToken::new(),
        )?;
        if let Some(failure) = seeded.failure {
            return Err(failure);
        }

        Ok(Self {
            rules,
            config: config.engine.clone(),
            store,
            chain: RwLock::new(seeded.blockchain),
            invalid: RwLock::new(HashSet::new()),
        })
    }

    pub fn rules(&self) -> &ChainRules {
        &self.rules
    }

    /// Snapshot of the accepted chain
    pub fn current(&self) -> Arc<Blockchain> {
        Arc::clone(&self.chain.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn height(&self) -> u64 {
        self.current().height()
    }

    /// Whether `block_hash` is known to have failed validation
    pub fn is_invalid(&self, block_hash: &UInt256) -> bool {
        self.invalid
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(block_hash)
    }

    /// First known-invalid block among `candidate` and its ancestors off `current`
    ///
    /// Every link walked past is marked invalid as well when one is found. A
    /// link the store cannot supply ends the walk; the calculation reports it.
    fn invalid_ancestor(&self, current: &Blockchain, candidate: &ChainedBlock) -> Option<UInt256> {
        let invalid = self.invalid.read().unwrap_or_else(PoisonError::into_inner);
        if invalid.is_empty() {
            return None;
        }
        let mut walked = Vec::new();
        let mut link = candidate.clone();
        let found = loop {
            if current.contains_block(&link.block_hash) {
                break None;
            }
            if invalid.contains(&link.block_hash) {
                break Some(link.block_hash);
            }
            walked.push(link.block_hash);
            if link.height == 0 {
                break None;
            }
            match self.store.chained_block(&link.previous_block_hash) {
                Ok(parent) => link = parent,
                Err(_) => break None,
            }
        };
        drop(invalid);

        if found.is_some() {
            self.invalid
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .extend(walked);
        }
        found
    }

    fn mark_invalid(&self, failure: Option<&ConsensusError>) {
        if let Some(ConsensusError::Validation { block_hash, height, .. }) = failure {
            debug!("marking block {block_hash} at height {height} invalid");
            self.invalid
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(*block_hash);
        }
    }

    /// Move towards the chain ending at `candidate_hash`
    ///
    /// Candidates that do not beat the accepted tip (see `compare_tips`) are
    /// ignored. Candidates at or above a block that failed validation are
    /// rejected with a `Validation` failure and no work done. Otherwise the calculated snapshot replaces the accepted chain
    /// if it beats the chain accepted at swap time, which holds for complete
    /// calculations and for partial ones that still got further.
    pub fn process_candidate(&self, candidate_hash: &UInt256, cancel: &CancelToken) -> Result<ChainCalculation> {
        let candidate = self.store.chained_block(candidate_hash)?;
        let current = self.current();
        if compare_tips(&candidate, current.tip()) != Ordering::Greater {
            debug!(
                "candidate {} at height {} does not beat tip {}",
                candidate.block_hash,
                candidate.height,
                current.tip_hash()
            );
            return Ok(ChainCalculation {
                blockchain: current,
                failure: None,
                rolled_back: 0,
                applied: 0,
                tx_count: 0,
                input_count: 0,
            });
        }

        if let Some(bad) = self.invalid_ancestor(&current, &candidate) {
            warn!("candidate {} descends from invalid block {bad}", candidate.block_hash);
            return Ok(ChainCalculation {
                blockchain: current,
                failure: Some(ConsensusError::validation(
                    candidate.block_hash,
                    candidate.height,
                    format!("descends from invalid block {bad}"),
                )),
                rolled_back: 0,
                applied: 0,
                tx_count: 0,
                input_count: 0,
            });
        }

        let calculator = ChainCalculator::with_config(&self.rules, self.store.as_ref(), &self.config);
        let outcome = calculator.calculate(Some(&current), &candidate, cancel)?;
        self.mark_invalid(outcome.failure.as_ref());

        let mut accepted = self.chain.write().unwrap_or_else(PoisonError::into_inner);
        if compare_tips(outcome.blockchain.tip(), accepted.tip()) == Ordering::Greater {
            info!(
                "accepted tip {} at height {}",
                outcome.blockchain.tip_hash(),
                outcome.blockchain.height()
            );
            *accepted = Arc::clone(&outcome.blockchain);
        }
        Ok(outcome)
    }

    /// Block subsidy on this network
    ///
    /// # Examples
    ///
    /// ```
    /// use chainstate::{AcceptAllScripts, ChainStateConfig, ChainStateEngine, MemoryBlockStore, Network};
    /// use std::sync::Arc;
    ///
    /// let config = ChainStateConfig::new(Network::Mainnet);
    /// let store = Arc::new(MemoryBlockStore::new(&config.chain_params()).unwrap());
    /// let engine = ChainStateEngine::new(&config, store, Arc::new(AcceptAllScripts)).unwrap();
    ///
    /// assert_eq!(engine.get_block_subsidy(0), 5000000000); // 50 BTC
    /// assert_eq!(engine.get_block_subsidy(210000), 2500000000); // 25 BTC
    /// ```
    pub fn get_block_subsidy(&self, height: u64) -> u64 {
        economic::get_block_subsidy(height, self.rules.params().halving_interval)
    }
}
