//! Block assembly and nonce search
//!
//! Development and test utility: builds blocks that satisfy the rules engine
//! on low-difficulty networks such as regtest. Not a production miner.

use crate::blockchain::Blockchain;
use crate::economic::get_block_subsidy;
use crate::error::{ConsensusError, Result};
use crate::hashing::block_merkle_root;
use crate::lookup::HeaderLookup;
use crate::pow::{bits_to_target, check_proof_of_work, target_to_bits};
use crate::rules::ChainRules;
use crate::types::*;
use crate::uint256::UInt256;

/// Result of mining attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MiningResult {
    Success,
    Failure,
}

/// CreateNewBlock: 𝒞 × 𝒯𝒳* → ℬ
///
/// For chain c and transactions txs:
/// 1. Coinbase pays subsidy(height) + fees to `coinbase_script_pubkey`
/// 2. Transactions follow the coinbase in the given order
/// 3. Header links to c's tip and carries the required next target
///
/// The nonce is left at zero; see `mine_block`.
pub fn create_new_block<H: HeaderLookup + ?Sized>(
    rules: &ChainRules,
    chain: &Blockchain,
    headers: &H,
    transactions: Vec<Transaction>,
    fees: u64,
    coinbase_script_pubkey: &[u8],
    time: u32,
) -> Result<Block> {
    let height = chain.height() + 1;
    let subsidy = get_block_subsidy(height, rules.params().halving_interval);
    let coinbase = create_coinbase_transaction(height, subsidy.saturating_add(fees), coinbase_script_pubkey);

    let mut all = Vec::with_capacity(transactions.len() + 1);
    all.push(coinbase);
    all.extend(transactions);

    let bits = target_to_bits(&rules.get_required_next_target(chain, headers)?);
    assemble_block(chain.tip_hash(), time, bits, all)
}

/// Header plus transactions with the merkle root filled in
pub fn assemble_block(
    previous_block: UInt256,
    time: u32,
    bits: u32,
    transactions: Vec<Transaction>,
) -> Result<Block> {
    let merkle_root = block_merkle_root(&transactions)
        .ok_or_else(|| ConsensusError::InvariantViolation("cannot assemble a block without transactions".into()))?;
    Ok(Block {
        header: BlockHeader {
            version: 1,
            previous_block,
            merkle_root,
            time,
            bits,
            nonce: 0,
        },
        transactions,
    })
}

/// Coinbase paying `value`; the script sig pushes the height so coinbases at
/// different heights never share a hash
pub fn create_coinbase_transaction(height: u64, value: u64, script_pubkey: &[u8]) -> Transaction {
    let height_bytes = height.to_le_bytes();
    let len = height_bytes.iter().rposition(|&b| b != 0).map_or(1, |i| i + 1);
    let mut script_sig = Vec::with_capacity(len + 1);
    script_sig.push(len as u8);
    script_sig.extend_from_slice(&height_bytes[..len]);

    Transaction {
        version: 1,
        inputs: vec![TransactionInput {
            previous_output: TxOutputKey::null(),
            script_sig,
            sequence: 0xffffffff,
        }],
        outputs: vec![TransactionOutput {
            value,
            script_pubkey: script_pubkey.to_vec(),
        }],
        lock_time: 0,
    }
}

/// MineBlock: ℬ × ℕ → ℬ × {success, failure}
///
/// Tries nonces from the header's current nonce upwards until the block hash
/// is within the header's target or `max_attempts` runs out.
pub fn mine_block(mut block: Block, max_attempts: u64) -> Result<(Block, MiningResult)> {
    let target = bits_to_target(block.header.bits)?;

    for _ in 0..max_attempts {
        if check_proof_of_work(&block.hash(), &target) {
            return Ok((block, MiningResult::Success));
        }
        block.header.nonce = block.header.nonce.wrapping_add(1);
    }

    Ok((block, MiningResult::Failure))
}
