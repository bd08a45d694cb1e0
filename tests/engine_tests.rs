//! Best-chain selection through the engine

mod common;

use chainstate::*;
use common::TestChain;
use std::sync::Arc;

fn engine(tc: &TestChain) -> ChainStateEngine {
    let config = ChainStateConfig::new(Network::Regtest);
    ChainStateEngine::new(&config, tc.store.clone(), Arc::new(AcceptAllScripts)).unwrap()
}

fn process(engine: &ChainStateEngine, link: &ChainedBlock) -> ChainCalculation {
    engine
        .process_candidate(&link.block_hash, &CancelToken::new())
        .unwrap()
}

#[test]
fn test_engine_starts_at_genesis() {
    let tc = TestChain::regtest();
    let engine = engine(&tc);
    assert_eq!(engine.height(), 0);
    assert_eq!(engine.current().tip_hash(), tc.params.genesis_hash());
    assert!(engine.current().utxo().is_empty());
}

#[test]
fn test_engine_follows_most_work() {
    let tc = TestChain::regtest();
    let engine = engine(&tc);
    let genesis_block = tc.params.genesis_block.clone();

    let a = tc.mine_chain(&tc.genesis_link(), &genesis_block, 3, 0xa);
    assert!(process(&engine, &a[2].1).is_complete());
    assert_eq!(engine.current().tip(), &a[2].1);

    // Shorter fork is ignored
    let b = tc.mine_chain(&tc.genesis_link(), &genesis_block, 2, 0xb);
    let ignored = process(&engine, &b[1].1);
    assert_eq!(ignored.applied, 0);
    assert_eq!(engine.current().tip(), &a[2].1);

    // Until it overtakes
    let more = tc.mine_chain(&b[1].1, &b[1].0, 3, 0xb);
    let outcome = process(&engine, &more[2].1);
    assert!(outcome.is_complete());
    assert_eq!(outcome.rolled_back, 3);
    assert_eq!(outcome.applied, 5);
    assert_eq!(engine.height(), 5);
    assert_eq!(engine.current().tip(), &more[2].1);
}

#[test]
fn test_equal_work_prefers_lower_hash() {
    let tc = TestChain::regtest();
    let engine = engine(&tc);
    let genesis = tc.genesis_link();
    let (_, first) = tc.mine_child(&genesis, vec![], 0, 1);
    let (_, second) = tc.mine_child(&genesis, vec![], 0, 2);
    assert_eq!(first.total_work, second.total_work);

    process(&engine, &first);
    process(&engine, &second);
    let expected = first.block_hash.min(second.block_hash);
    assert_eq!(engine.current().tip_hash(), expected);

    // Processing in either order converges on the same tip
    let other = self::engine(&tc);
    process(&other, &second);
    process(&other, &first);
    assert_eq!(other.current().tip_hash(), expected);
}

#[test]
fn test_readers_keep_their_snapshot() {
    let tc = TestChain::regtest();
    let engine = engine(&tc);
    let before = engine.current();

    let a = tc.mine_chain(&tc.genesis_link(), &tc.params.genesis_block, 4, 0xa);
    process(&engine, &a[3].1);

    assert_eq!(before.height(), 0);
    assert!(before.utxo().is_empty());
    assert_eq!(engine.height(), 4);
}

#[test]
fn test_partial_progress_adopted_only_when_better() {
    let tc = TestChain::regtest();
    let engine = engine(&tc);
    let genesis_block = tc.params.genesis_block.clone();

    let a = tc.mine_chain(&tc.genesis_link(), &genesis_block, 3, 0xa);
    process(&engine, &a[2].1);

    // Fork from A1 to height 6, body at height 5 not yet available
    let b = tc.mine_chain(&a[0].1, &a[0].0, 5, 0xb);
    tc.store.remove_block_body(&b[3].1.block_hash).unwrap();
    let outcome = process(&engine, &b[4].1);
    assert!(matches!(
        outcome.failure,
        Some(ConsensusError::MissingData { kind: DataKind::Block, .. })
    ));
    // Height 4 on B beats height 3 on A
    assert_eq!(engine.current().tip(), &b[2].1);

    // A partial result that falls short of the accepted tip is not adopted
    let c = tc.mine_chain(&tc.genesis_link(), &genesis_block, 7, 0xc);
    tc.store.remove_block_body(&c[1].1.block_hash).unwrap();
    let outcome = process(&engine, &c[6].1);
    assert!(!outcome.is_complete());
    assert_eq!(outcome.blockchain.height(), 1);
    assert_eq!(engine.current().tip(), &b[2].1);

    tc.store.add_block(c[1].0.clone()).unwrap();
    assert!(process(&engine, &c[6].1).is_complete());
    assert_eq!(engine.current().tip(), &c[6].1);
}

#[test]
fn test_concurrent_readers_see_consistent_snapshots() {
    let tc = TestChain::regtest();
    let engine = engine(&tc);
    let a = tc.mine_chain(&tc.genesis_link(), &tc.params.genesis_block, 6, 0xa);

    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..50 {
                    let snapshot = engine.current();
                    assert_eq!(snapshot.block_list().len() as u64, snapshot.height() + 1);
                    assert!(snapshot.undo_at(snapshot.height()).is_some());
                    assert!(snapshot.undo_at(snapshot.height() + 1).is_none());
                }
            });
        }
        for (_, link) in &a {
            process(&engine, link);
        }
    });
    assert_eq!(engine.height(), 6);
}

#[test]
fn test_descendants_of_invalid_block_rejected() {
    let tc = TestChain::regtest();
    let engine = engine(&tc);
    let a = tc.mine_chain(&tc.genesis_link(), &tc.params.genesis_block, 3, 0xa);
    process(&engine, &a[2].1);

    // Coinbase claims one satoshi more than the subsidy
    let (_, bad) = tc.mine_child(&a[2].1, vec![], 1, 0xb);
    let outcome = process(&engine, &bad);
    assert!(matches!(
        outcome.failure,
        Some(ConsensusError::Validation { block_hash, .. }) if block_hash == bad.block_hash
    ));
    assert!(engine.is_invalid(&bad.block_hash));
    assert_eq!(engine.current().tip(), &a[2].1);

    // Its descendants are turned away without replaying anything
    let (_, child) = tc.mine_child(&bad, vec![], 0, 0xc);
    let outcome = process(&engine, &child);
    match outcome.failure {
        Some(ConsensusError::Validation { block_hash, reason, .. }) => {
            assert_eq!(block_hash, child.block_hash);
            assert_eq!(reason, format!("descends from invalid block {}", bad.block_hash));
        }
        other => panic!("expected validation failure, got {other:?}"),
    }
    assert_eq!(outcome.applied, 0);
    assert_eq!(outcome.rolled_back, 0);
    assert!(engine.is_invalid(&child.block_hash));
    assert_eq!(engine.current().tip(), &a[2].1);

    // A valid sibling is still accepted
    let (_, good) = tc.mine_child(&a[2].1, vec![], 0, 0xd);
    assert!(process(&engine, &good).is_complete());
    assert_eq!(engine.current().tip(), &good);
    assert!(!engine.is_invalid(&good.block_hash));
}
