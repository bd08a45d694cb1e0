//! Block validation against a regtest chain

mod common;

use chainstate::mining::{assemble_block, mine_block, MiningResult};
use chainstate::pow::{bits_to_target, check_proof_of_work};
use chainstate::*;
use common::{spend_output, TestChain};
use std::sync::Arc;

/// Snapshot at height 1 plus its block
fn chain_at_one(tc: &TestChain) -> (Arc<Blockchain>, Block) {
    let (block, link) = tc.mine_child(&tc.genesis_link(), vec![], 0, 1);
    let chain = tc
        .calculator()
        .calculate(None, &link, &CancelToken::new())
        .unwrap()
        .blockchain;
    (chain, block)
}

fn validate(tc: &TestChain, block: &Block, chain: &Blockchain) -> Result<u64> {
    tc.rules
        .validate_block(block, chain, tc.store.as_ref(), tc.store.as_ref())
}

fn reason(err: ConsensusError) -> String {
    match err {
        ConsensusError::Validation { reason, .. } => reason,
        other => panic!("expected validation failure, got {other:?}"),
    }
}

/// Reassemble with new transactions and re-mine at the same bits
fn remine(block: &Block, transactions: Vec<Transaction>) -> Block {
    let header = &block.header;
    let block = assemble_block(header.previous_block, header.time, header.bits, transactions).unwrap();
    let (block, result) = mine_block(block, 1_000_000).unwrap();
    assert_eq!(result, MiningResult::Success);
    block
}

#[test]
fn test_valid_block_returns_fees() {
    let tc = TestChain::regtest();
    let (chain, b1) = chain_at_one(&tc);
    let spends = vec![spend_output(&b1.transactions[0], 0, 2_500, 1)];
    let block = tc.build_child(chain.tip(), spends, 2_500, 2);
    assert_eq!(validate(&tc, &block, &chain).unwrap(), 2_500);
}

#[test]
fn test_fees_from_parallel_checks() {
    let tc = TestChain::regtest();
    let (chain, b1) = chain_at_one(&tc);
    // Chain of spends inside one block, each paying 100
    let mut spends = vec![spend_output(&b1.transactions[0], 0, 100, 1)];
    for tag in 2..6 {
        let next = spend_output(spends.last().unwrap(), 0, 100, tag);
        spends.push(next);
    }
    let block = tc.build_child(chain.tip(), spends, 500, 9);
    assert_eq!(validate(&tc, &block, &chain).unwrap(), 500);
}

#[test]
fn test_wrong_parent_rejected() {
    let tc = TestChain::regtest();
    let (chain, _) = chain_at_one(&tc);
    let sibling = tc.build_child(&tc.genesis_link(), vec![], 0, 7);
    assert!(reason(validate(&tc, &sibling, &chain).unwrap_err()).contains("is not the chain tip"));
}

#[test]
fn test_bits_above_maximum_rejected() {
    let tc = TestChain::regtest();
    let (chain, _) = chain_at_one(&tc);
    let mut block = tc.build_child(chain.tip(), vec![], 0, 2);
    block.header.bits = 0x2100ffff;
    assert!(reason(validate(&tc, &block, &chain).unwrap_err()).contains("invalid bits"));
}

#[test]
fn test_harder_target_accepted() {
    let tc = TestChain::regtest();
    let (chain, _) = chain_at_one(&tc);
    let mut block = tc.build_child(chain.tip(), vec![], 0, 2);
    block.header.bits = 0x1f7fffff;
    let (block, result) = mine_block(block, 1_000_000).unwrap();
    assert_eq!(result, MiningResult::Success);
    assert!(validate(&tc, &block, &chain).is_ok());
}

#[test]
fn test_hash_above_target_rejected() {
    let tc = TestChain::regtest();
    let (chain, _) = chain_at_one(&tc);
    let mut block = tc.build_child(chain.tip(), vec![], 0, 2);
    let target = bits_to_target(block.header.bits).unwrap();
    while check_proof_of_work(&block.hash(), &target) {
        block.header.nonce += 1;
    }
    assert_eq!(
        reason(validate(&tc, &block, &chain).unwrap_err()),
        "hash does not meet target"
    );
}

#[test]
fn test_merkle_mismatch_rejected() {
    let tc = TestChain::regtest();
    let (chain, b1) = chain_at_one(&tc);
    let block = tc.build_child(chain.tip(), vec![spend_output(&b1.transactions[0], 0, 0, 1)], 0, 2);

    // Swap in a different spend without touching the header
    let mut tampered = block.clone();
    tampered.transactions[1] = spend_output(&b1.transactions[0], 0, 0, 3);
    let (tampered, _) = mine_block(tampered, 1_000_000).unwrap();
    assert!(reason(validate(&tc, &tampered, &chain).unwrap_err()).contains("merkle root"));
}

#[test]
fn test_coinbase_with_two_inputs_rejected() {
    let tc = TestChain::regtest();
    let (chain, _) = chain_at_one(&tc);
    let block = tc.build_child(chain.tip(), vec![], 0, 2);
    let mut coinbase = block.transactions[0].clone();
    coinbase.inputs.push(coinbase.inputs[0].clone());
    let block = remine(&block, vec![coinbase]);
    assert_eq!(
        reason(validate(&tc, &block, &chain).unwrap_err()),
        "coinbase has 2 inputs"
    );
}

#[test]
fn test_outputs_exceeding_inputs_rejected() {
    let tc = TestChain::regtest();
    let (chain, b1) = chain_at_one(&tc);
    let mut inflated = spend_output(&b1.transactions[0], 0, 0, 1);
    inflated.outputs[0].value += 1;
    let block = tc.build_child(chain.tip(), vec![inflated], 0, 2);
    assert!(reason(validate(&tc, &block, &chain).unwrap_err()).contains("outputs exceed inputs"));
}

#[test]
fn test_overpaying_coinbase_rejected() {
    let tc = TestChain::regtest();
    let (chain, b1) = chain_at_one(&tc);
    let block = tc.build_child(chain.tip(), vec![spend_output(&b1.transactions[0], 0, 1_000, 1)], 1_001, 2);
    assert!(reason(validate(&tc, &block, &chain).unwrap_err()).contains("coinbase claims"));
}

#[test]
fn test_unknown_previous_transaction_is_missing_data() {
    let tc = TestChain::regtest();
    let (chain, b1) = chain_at_one(&tc);
    let mut orphan = spend_output(&b1.transactions[0], 0, 0, 1);
    let unknown = UInt256::from_u64(7);
    orphan.inputs[0].previous_output = TxOutputKey::new(unknown, 0);
    let block = tc.build_child(chain.tip(), vec![orphan], 0, 2);

    let err = validate(&tc, &block, &chain).unwrap_err();
    assert_eq!(err, ConsensusError::missing(DataKind::Transaction, unknown));
    assert!(err.is_recoverable());
}

#[test]
fn test_output_index_out_of_range_rejected() {
    let tc = TestChain::regtest();
    let (chain, b1) = chain_at_one(&tc);
    let mut spend = spend_output(&b1.transactions[0], 0, 0, 1);
    spend.inputs[0].previous_output.output_index = 4;
    let block = tc.build_child(chain.tip(), vec![spend], 0, 2);
    assert!(reason(validate(&tc, &block, &chain).unwrap_err()).contains("references missing output"));
}
