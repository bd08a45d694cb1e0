//! UTXO delta calculator
//!
//! Forward application and rollback of one block against a UTXO map. Neither
//! function consults anything beyond the block, the map and (for rollback)
//! the block's undo journal.
//!
//! Forward application at height h:
//! 1. h > 0: the coinbase becomes a new entry with every output unspent
//! 2. every other transaction spends its inputs, then adds its own entry
//! 3. an entry whose last output is spent leaves the map
//!
//! Updates are made in place. `apply_block` is transactional: on error the
//! map is restored to its state before the call.

use crate::blockchain::BlockUndo;
use crate::config::{is_duplicate_exception, DuplicateException};
use crate::error::{ConsensusError, Result};
use crate::types::*;
use crate::uint256::UInt256;
use log::debug;

/// Outcome of a forward application
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockDelta {
    pub undo: BlockUndo,
    pub tx_count: u64,
    pub input_count: u64,
}

/// Single change made during forward application, kept to revert a failed block
enum Change {
    Created { tx_hash: UInt256, replaced: Option<UnspentTx> },
    Spent { tx_hash: UInt256, output_index: u32, removed: Option<UnspentTx> },
}

struct ForwardApply<'a> {
    utxo: &'a mut UtxoMap,
    exceptions: &'a [DuplicateException],
    block_hash: UInt256,
    height: u64,
    changes: Vec<Change>,
}

impl ForwardApply<'_> {
    fn fail(&self, reason: String) -> ConsensusError {
        ConsensusError::validation(self.block_hash, self.height, reason)
    }

    fn add_outputs(&mut self, tx_index: u32, tx_hash: UInt256, output_count: u32) -> Result<()> {
        if output_count == 0 {
            return Ok(());
        }
        let entry = UnspentTx::new(self.block_hash, tx_index, tx_hash, output_count);
        let replaced = self.utxo.insert(tx_hash, entry);
        let tolerated = replaced.is_none() || is_duplicate_exception(self.exceptions, self.height, &tx_hash);
        self.changes.push(Change::Created { tx_hash, replaced });
        if !tolerated {
            return Err(self.fail(format!("duplicate transaction {tx_hash}")));
        }
        Ok(())
    }

    fn spend(&mut self, tx_index: usize, key: &TxOutputKey) -> Result<()> {
        let Some(entry) = self.utxo.get_mut(&key.tx_hash) else {
            return Err(self.fail(format!(
                "transaction {tx_index} spends {}:{} which is not in the UTXO set",
                key.tx_hash, key.output_index
            )));
        };
        if key.output_index >= entry.output_count() {
            let count = entry.output_count();
            return Err(self.fail(format!(
                "transaction {tx_index} spends output {} of {} which has {count} outputs",
                key.output_index, key.tx_hash
            )));
        }
        if !entry.is_unspent(key.output_index) {
            return Err(self.fail(format!(
                "transaction {tx_index} double-spends {}:{}",
                key.tx_hash, key.output_index
            )));
        }

        let removed = if entry.unspent_outputs.unspent_count() == 1 {
            self.utxo.remove(&key.tx_hash)
        } else {
            entry.unspent_outputs.set(key.output_index, false);
            None
        };
        self.changes.push(Change::Spent {
            tx_hash: key.tx_hash,
            output_index: key.output_index,
            removed,
        });
        Ok(())
    }

    fn run(&mut self, block: &Block) -> Result<(u64, u64)> {
        let mut input_count = 0u64;
        for (tx_index, tx) in block.transactions.iter().enumerate() {
            let index = u32::try_from(tx_index)
                .map_err(|_| self.fail("too many transactions".into()))?;
            let output_count = u32::try_from(tx.outputs.len())
                .map_err(|_| self.fail(format!("transaction {tx_index} has too many outputs")))?;
            if tx_index == 0 {
                if self.height > 0 {
                    self.add_outputs(index, tx.hash(), output_count)?;
                }
                continue;
            }
            for input in &tx.inputs {
                self.spend(tx_index, &input.previous_output)?;
                input_count += 1;
            }
            self.add_outputs(index, tx.hash(), output_count)?;
        }
        Ok((block.transactions.len() as u64, input_count))
    }

    fn revert(self) {
        for change in self.changes.into_iter().rev() {
            match change {
                Change::Created { tx_hash, replaced } => {
                    self.utxo.remove(&tx_hash);
                    if let Some(previous) = replaced {
                        self.utxo.insert(tx_hash, previous);
                    }
                }
                Change::Spent { tx_hash, output_index, removed } => match removed {
                    Some(entry) => {
                        self.utxo.insert(tx_hash, entry);
                    }
                    None => {
                        if let Some(entry) = self.utxo.get_mut(&tx_hash) {
                            entry.unspent_outputs.set(output_index, true);
                        }
                    }
                },
            }
        }
    }

    fn into_undo(self) -> BlockUndo {
        let mut undo = BlockUndo::default();
        for change in self.changes {
            match change {
                Change::Created { tx_hash, replaced: Some(previous) } => {
                    undo.replaced.insert(tx_hash, previous);
                }
                Change::Spent { tx_hash, removed: Some(entry), .. } => {
                    undo.removed.insert(tx_hash, entry);
                }
                _ => {}
            }
        }
        undo
    }
}

/// Apply `block` at `height` to `utxo`
///
/// Fails with `ConsensusError::Validation` on a missing previous entry, an
/// out-of-range output index, a spent output or a duplicate transaction not
/// listed in `exceptions`.
pub fn apply_block(
    block: &Block,
    height: u64,
    utxo: &mut UtxoMap,
    exceptions: &[DuplicateException],
) -> Result<BlockDelta> {
    let block_hash = block.hash();
    let mut forward = ForwardApply {
        utxo,
        exceptions,
        block_hash,
        height,
        changes: Vec::new(),
    };
    match forward.run(block) {
        Ok((tx_count, input_count)) => {
            debug!("applied block {block_hash} at height {height}: {tx_count} txs, {input_count} inputs");
            Ok(BlockDelta {
                undo: forward.into_undo(),
                tx_count,
                input_count,
            })
        }
        Err(e) => {
            forward.revert();
            Err(e)
        }
    }
}

/// Undo `block`, the block most recently applied to `utxo` at `height`
///
/// Transactions are walked in reverse: each one's entry is removed (restoring
/// whatever it replaced) and then its inputs are unspent in reverse order.
/// Entries the block emptied come back from `undo`. Anything inconsistent is
/// an invariant violation, not a validation failure.
pub fn rollback_block(block: &Block, height: u64, utxo: &mut UtxoMap, undo: &BlockUndo) -> Result<()> {
    let block_hash = block.hash();
    for (tx_index, tx) in block.transactions.iter().enumerate().rev() {
        let is_genesis_coinbase = tx_index == 0 && height == 0;
        if !tx.outputs.is_empty() && !is_genesis_coinbase {
            let tx_hash = tx.hash();
            match utxo.remove(&tx_hash) {
                Some(entry) if entry.defining_block_hash == block_hash => {}
                _ => {
                    return Err(ConsensusError::InvariantViolation(format!(
                        "rollback of block {block_hash}: entry for {tx_hash} is not the one it created"
                    )))
                }
            }
            if let Some(previous) = undo.replaced.get(&tx_hash) {
                utxo.insert(tx_hash, previous.clone());
            }
        }

        if tx_index == 0 {
            continue;
        }
        for input in tx.inputs.iter().rev() {
            let key = &input.previous_output;
            match utxo.get_mut(&key.tx_hash) {
                Some(entry) => {
                    if entry.is_unspent(key.output_index) || key.output_index >= entry.output_count() {
                        return Err(ConsensusError::InvariantViolation(format!(
                            "rollback of block {block_hash}: output {}:{} is not spent",
                            key.tx_hash, key.output_index
                        )));
                    }
                    entry.unspent_outputs.set(key.output_index, true);
                }
                None => {
                    let entry = undo.removed.get(&key.tx_hash).ok_or_else(|| {
                        ConsensusError::InvariantViolation(format!(
                            "rollback of block {block_hash}: no undo data to restore {}",
                            key.tx_hash
                        ))
                    })?;
                    utxo.insert(key.tx_hash, entry.clone());
                }
            }
        }
    }
    debug!("rolled back block {block_hash} at height {height}");
    Ok(())
}
