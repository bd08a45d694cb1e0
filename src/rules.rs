//! Rules engine
//!
//! One validation algorithm parameterized by `ChainParams`. Covers:
//! - required next target and retargeting
//! - full block validation against the chain it extends
//! - winning-chain selection

use crate::blockchain::Blockchain;
use crate::config::ChainParams;
use crate::economic::{get_block_subsidy, transaction_fee};
use crate::error::{ConsensusError, Result};
use crate::hashing::merkle_root;
use crate::lookup::{HeaderLookup, ScriptVerifier, TransactionLookup};
use crate::pow;
use crate::types::*;
use crate::uint256::UInt256;
use log::debug;
use num_bigint::BigUint;
use rayon::prelude::*;
use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

pub struct ChainRules {
    params: ChainParams,
    max_target: UInt256,
    genesis_target: UInt256,
    script_verifier: Arc<dyn ScriptVerifier>,
    parallel_validation: bool,
}

impl ChainRules {
    pub fn new(params: ChainParams, script_verifier: Arc<dyn ScriptVerifier>) -> Result<Self> {
        params.validate()?;
        let max_target = params.max_target()?;
        let genesis_target = pow::bits_to_target(params.genesis_block.header.bits)?;
        Ok(Self {
            params,
            max_target,
            genesis_target,
            script_verifier,
            parallel_validation: true,
        })
    }

    pub fn with_parallel_validation(mut self, enabled: bool) -> Self {
        self.parallel_validation = enabled;
        self
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn max_target(&self) -> &UInt256 {
        &self.max_target
    }

    pub fn genesis_hash(&self) -> UInt256 {
        self.params.genesis_hash()
    }

    /// Decode `bits`, rejecting targets above the network maximum
    pub fn bits_to_target(&self, bits: u32) -> Result<UInt256> {
        let target = pow::bits_to_target(bits)?;
        if target > self.max_target {
            return Err(ConsensusError::TargetOutOfRange(format!(
                "bits {bits:#010x} exceed the maximum target {:#010x}",
                self.params.max_target_bits
            )));
        }
        Ok(target)
    }

    pub fn calculate_work(&self, header: &BlockHeader) -> Result<BigUint> {
        pow::calculate_work(header)
    }

    /// Target the block after `chain`'s tip must meet
    ///
    /// - next height below the retarget interval: genesis target
    /// - off an interval boundary (or retargeting disabled): tip's target
    /// - on a boundary: tip's target scaled by the time the last interval took
    pub fn get_required_next_target<H>(&self, chain: &Blockchain, headers: &H) -> Result<UInt256>
    where
        H: HeaderLookup + ?Sized,
    {
        let interval = self.params.retarget_interval;
        let next_height = chain.height() + 1;
        if next_height < interval {
            return Ok(self.genesis_target);
        }

        let tip = chain.tip();
        let tip_header = headers.header(&tip.block_hash)?;
        let tip_target = self.bits_to_target(tip_header.bits)?;
        if self.params.no_retargeting || next_height % interval != 0 {
            return Ok(tip_target);
        }

        let first_height = next_height - interval;
        let first = chain.block_at(first_height).ok_or_else(|| {
            ConsensusError::InvariantViolation(format!("block list has no entry at height {first_height}"))
        })?;
        let first_header = headers.header(&first.block_hash)?;
        let actual_timespan = (tip_header.time as i64 - first_header.time as i64).max(0) as u64;
        let target = pow::retarget(&tip_target, actual_timespan, self.params.target_timespan, &self.max_target)?;
        debug!(
            "retarget at height {next_height}: {:#010x} -> {:#010x} over {actual_timespan}s",
            tip_header.bits,
            pow::target_to_bits(&target)
        );
        Ok(target)
    }

    /// Check `block` as the child of `chain_before`'s tip and return its fees
    ///
    /// Expects the UTXO delta to have succeeded already; this covers proof of
    /// work, structure, value conservation, scripts and the coinbase reward.
    pub fn validate_block<H, T>(
        &self,
        block: &Block,
        chain_before: &Blockchain,
        headers: &H,
        transactions: &T,
    ) -> Result<u64>
    where
        H: HeaderLookup + ?Sized,
        T: TransactionLookup + ?Sized,
    {
        let block_hash = block.hash();
        let height = chain_before.height() + 1;
        let fail = |reason: String| ConsensusError::validation(block_hash, height, reason);

        // 1. Header
        let header = &block.header;
        if header.previous_block != chain_before.tip_hash() {
            return Err(fail(format!(
                "parent {} is not the chain tip {}",
                header.previous_block,
                chain_before.tip_hash()
            )));
        }
        let block_target = self
            .bits_to_target(header.bits)
            .map_err(|e| fail(format!("invalid bits: {e}")))?;
        let required = self.get_required_next_target(chain_before, headers)?;
        if block_target > required {
            return Err(fail(format!(
                "target {:#010x} is easier than required {:#010x}",
                header.bits,
                pow::target_to_bits(&required)
            )));
        }
        if !pow::check_proof_of_work(&block_hash, &block_target) || !pow::check_proof_of_work(&block_hash, &required) {
            return Err(fail("hash does not meet target".into()));
        }

        // 2. Structure
        let Some(coinbase) = block.transactions.first() else {
            return Err(fail("block has no transactions".into()));
        };
        if coinbase.inputs.len() != 1 {
            return Err(fail(format!("coinbase has {} inputs", coinbase.inputs.len())));
        }
        let tx_hashes: Vec<UInt256> = block.transactions.iter().map(Transaction::hash).collect();
        if merkle_root(&tx_hashes) != Some(header.merkle_root) {
            return Err(fail("merkle root does not match transactions".into()));
        }

        // 3. Non-coinbase transactions, fees folded in block order
        let mut positions = HashMap::with_capacity(tx_hashes.len());
        for (index, hash) in tx_hashes.iter().enumerate() {
            positions.entry(*hash).or_insert(index);
        }
        let context = BlockContext {
            block,
            positions: &positions,
            transactions,
            block_hash,
            height,
        };
        let check = |index: usize| self.check_transaction(&context, index);
        let results: Vec<Result<u64>> = if self.parallel_validation && block.transactions.len() > 2 {
            (1..block.transactions.len()).into_par_iter().map(check).collect()
        } else {
            (1..block.transactions.len()).map(check).collect()
        };
        let fees = results.into_iter().try_fold(0u64, |total, fee| {
            total
                .checked_add(fee?)
                .ok_or_else(|| fail("total fees overflow".into()))
        })?;

        // 4. Coinbase reward
        let subsidy = get_block_subsidy(height, self.params.halving_interval);
        let claimed = coinbase
            .output_value()
            .ok_or_else(|| fail("coinbase output value overflows".into()))?;
        let allowed = subsidy.saturating_add(fees);
        if claimed > allowed {
            return Err(fail(format!(
                "coinbase claims {claimed} but subsidy plus fees is {allowed}"
            )));
        }

        debug!(
            "validated block {block_hash} at height {height}: {} txs, {fees} fees",
            block.transactions.len()
        );
        Ok(fees)
    }

    fn check_transaction<T>(&self, context: &BlockContext<'_, T>, index: usize) -> Result<u64>
    where
        T: TransactionLookup + ?Sized,
    {
        let tx = &context.block.transactions[index];
        let fail = |reason: String| {
            ConsensusError::validation(context.block_hash, context.height, format!("transaction {index}: {reason}"))
        };

        let mut input_values = Vec::with_capacity(tx.inputs.len());
        for (input_index, input) in tx.inputs.iter().enumerate() {
            let key = &input.previous_output;
            let previous = context.previous_transaction(index, &key.tx_hash)?;
            let Some(output) = previous.outputs.get(key.output_index as usize) else {
                return Err(fail(format!("input {input_index} references missing output {}:{}", key.tx_hash, key.output_index)));
            };
            if !self
                .script_verifier
                .verify(&output.script_pubkey, tx, input_index, &input.script_sig)
            {
                return Err(fail(format!("script verification failed for input {input_index}")));
            }
            input_values.push(output.value);
        }

        transaction_fee(&input_values, tx).ok_or_else(|| fail("outputs exceed inputs".into()))
    }
}

/// Read-only view shared by the per-transaction checks of one block
struct BlockContext<'a, T: ?Sized> {
    block: &'a Block,
    positions: &'a HashMap<UInt256, usize>,
    transactions: &'a T,
    block_hash: UInt256,
    height: u64,
}

impl<T: TransactionLookup + ?Sized> BlockContext<'_, T> {
    /// Earlier transactions of the same block win over the lookup
    fn previous_transaction(&self, spender: usize, tx_hash: &UInt256) -> Result<Cow<'_, Transaction>> {
        match self.positions.get(tx_hash) {
            Some(&position) if position < spender => Ok(Cow::Borrowed(&self.block.transactions[position])),
            _ => self.transactions.transaction(tx_hash).map(Cow::Owned),
        }
    }
}

/// Order on chain tips: more total work is greater, equal work goes to the
/// lower block hash
pub fn compare_tips(a: &ChainedBlock, b: &ChainedBlock) -> Ordering {
    a.total_work
        .cmp(&b.total_work)
        .then_with(|| b.block_hash.cmp(&a.block_hash))
}

/// Candidate with the most total work; equal work goes to the lowest tip hash
pub fn select_winning_blockchain(candidates: &[Blockchain]) -> Option<&Blockchain> {
    candidates.iter().max_by(|a, b| compare_tips(a.tip(), b.tip()))
}
