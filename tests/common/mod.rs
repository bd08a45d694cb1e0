//! Shared fixtures: regtest stores and mined chains

#![allow(dead_code)]

use chainstate::economic::get_block_subsidy;
use chainstate::mining::{assemble_block, create_coinbase_transaction, mine_block, MiningResult};
use chainstate::*;
use std::sync::Arc;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Regtest parameters, an in-memory store seeded with genesis, and rules
pub struct TestChain {
    pub params: ChainParams,
    pub store: Arc<MemoryBlockStore>,
    pub rules: ChainRules,
}

impl TestChain {
    pub fn regtest() -> Self {
        init_logging();
        let params = ChainParams::regtest();
        let store = Arc::new(MemoryBlockStore::new(&params).unwrap());
        let rules = ChainRules::new(params.clone(), Arc::new(AcceptAllScripts)).unwrap();
        Self { params, store, rules }
    }

    pub fn calculator(&self) -> ChainCalculator<'_> {
        ChainCalculator::new(&self.rules, self.store.as_ref())
    }

    pub fn genesis_link(&self) -> ChainedBlock {
        self.store.chained_block(&self.params.genesis_hash()).unwrap()
    }

    pub fn genesis_chain(&self) -> Blockchain {
        Blockchain::genesis(self.genesis_link()).unwrap()
    }

    /// Mine a valid child of `parent` and add it to the store
    ///
    /// The coinbase claims subsidy plus `fees` and pays to a script that
    /// includes `tag`, so sibling forks never share a coinbase.
    pub fn mine_child(&self, parent: &ChainedBlock, transactions: Vec<Transaction>, fees: u64, tag: u8) -> (Block, ChainedBlock) {
        let block = self.build_child(parent, transactions, fees, tag);
        let link = self.store.add_block(block.clone()).unwrap();
        (block, link)
    }

    /// Mine a child without adding it to the store
    pub fn build_child(&self, parent: &ChainedBlock, transactions: Vec<Transaction>, fees: u64, tag: u8) -> Block {
        let height = parent.height + 1;
        let subsidy = get_block_subsidy(height, self.params.halving_interval);
        let coinbase = create_coinbase_transaction(height, subsidy + fees, &[0x51, tag]);
        let mut all = vec![coinbase];
        all.extend(transactions);

        let time = self.params.genesis_block.header.time + height as u32 * 600 + tag as u32;
        let block = assemble_block(parent.block_hash, time, self.params.max_target_bits, all).unwrap();
        let (block, result) = mine_block(block, 1_000_000).unwrap();
        assert_eq!(result, MiningResult::Success);
        block
    }

    /// Extend `parent` by `count` blocks; each block spends output 0 of the
    /// previous block's coinbase when that coinbase is above genesis
    pub fn mine_chain(&self, parent: &ChainedBlock, parent_block: &Block, count: usize, tag: u8) -> Vec<(Block, ChainedBlock)> {
        let mut blocks = Vec::with_capacity(count);
        let mut link = parent.clone();
        let mut previous = parent_block.clone();
        for _ in 0..count {
            let (transactions, fees) = if link.height > 0 {
                (vec![spend_output(&previous.transactions[0], 0, 1_000, tag)], 1_000)
            } else {
                (vec![], 0)
            };
            let (block, child) = self.mine_child(&link, transactions, fees, tag);
            blocks.push((block.clone(), child.clone()));
            previous = block;
            link = child;
        }
        blocks
    }
}

/// Transaction spending `output_index` of `funding`, paying `fee`
pub fn spend_output(funding: &Transaction, output_index: u32, fee: u64, tag: u8) -> Transaction {
    let value = funding.outputs[output_index as usize].value;
    Transaction {
        version: 1,
        inputs: vec![TransactionInput {
            previous_output: TxOutputKey::new(funding.hash(), output_index),
            script_sig: vec![tag],
            sequence: 0xffffffff,
        }],
        outputs: vec![TransactionOutput {
            value: value - fee,
            script_pubkey: vec![0x51, tag],
        }],
        lock_time: 0,
    }
}
