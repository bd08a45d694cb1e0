//! Bounded block prefetch for chain replay
//!
//! A scoped producer thread looks up the blocks of a replay path ahead of the
//! consumer and hands them over through a bounded channel. The channel
//! capacity is the lookahead depth; a full channel blocks the producer. Blocks
//! arrive strictly in path order. A failed lookup is delivered in place of its
//! block and ends the stream.

use crate::cancel::CancelToken;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::lookup::BlockLookup;
use crate::types::Block;
use crate::uint256::UInt256;
use crossbeam_channel::{bounded, Receiver};
use log::debug;

pub struct BlockPrefetcher<'a, S: BlockLookup + ?Sized> {
    store: &'a S,
    depth: usize,
    cancel: CancelToken,
}

impl<'a, S: BlockLookup + ?Sized> BlockPrefetcher<'a, S> {
    pub fn new(store: &'a S, depth: usize, cancel: CancelToken) -> Self {
        Self {
            store,
            depth: depth.max(1),
            cancel,
        }
    }

    pub fn from_config(store: &'a S, config: &EngineConfig, cancel: CancelToken) -> Self {
        Self::new(store, config.prefetch_depth(), cancel)
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Run `consume` over the blocks of `path` while they are fetched ahead
    ///
    /// The producer stops when the path is exhausted, a lookup fails, the
    /// token is cancelled, or `consume` returns.
    pub fn run<R>(&self, path: &[UInt256], consume: impl FnOnce(&mut PrefetchedBlocks) -> R) -> R {
        let (sender, receiver) = bounded(self.depth);
        let store = self.store;
        let cancel = &self.cancel;

        std::thread::scope(|scope| {
            scope.spawn(move || {
                for hash in path {
                    if cancel.is_cancelled() {
                        debug!("prefetch cancelled before block {hash}");
                        break;
                    }
                    let item = store.block(hash);
                    let failed = item.is_err();
                    // Receiver gone: the consumer has finished
                    if sender.send(item).is_err() || failed {
                        break;
                    }
                }
            });

            let mut blocks = PrefetchedBlocks { receiver };
            let result = consume(&mut blocks);
            // Unblocks a producer waiting on a full channel
            drop(blocks);
            result
        })
    }
}

/// Consumer side of a prefetch run, yielding blocks in path order
pub struct PrefetchedBlocks {
    receiver: Receiver<Result<Block>>,
}

impl Iterator for PrefetchedBlocks {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        self.receiver.recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConsensusError, DataKind};
    use crate::types::BlockHeader;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingStore {
        blocks: HashMap<UInt256, Block>,
        fetched: AtomicUsize,
    }

    impl BlockLookup for CountingStore {
        fn block(&self, hash: &UInt256) -> Result<Block> {
            self.fetched.fetch_add(1, Ordering::SeqCst);
            self.blocks
                .get(hash)
                .cloned()
                .ok_or_else(|| ConsensusError::missing(DataKind::Block, *hash))
        }
    }

    fn store(count: u32) -> (CountingStore, Vec<UInt256>) {
        let mut blocks = HashMap::new();
        let mut path = Vec::new();
        for nonce in 0..count {
            let block = Block {
                header: BlockHeader {
                    version: 1,
                    previous_block: UInt256::ZERO,
                    merkle_root: UInt256::ZERO,
                    time: 0,
                    bits: 0x207fffff,
                    nonce,
                },
                transactions: vec![],
            };
            path.push(block.hash());
            blocks.insert(block.hash(), block);
        }
        let store = CountingStore {
            blocks,
            fetched: AtomicUsize::new(0),
        };
        (store, path)
    }

    #[test]
    fn test_blocks_arrive_in_path_order() {
        let (store, path) = store(20);
        let prefetcher = BlockPrefetcher::new(&store, 3, CancelToken::new());
        let hashes: Vec<UInt256> = prefetcher.run(&path, |blocks| blocks.map(|b| b.unwrap().hash()).collect());
        assert_eq!(hashes, path);
    }

    #[test]
    fn test_missing_block_ends_stream_in_order() {
        let (store, mut path) = store(5);
        let missing = UInt256::from_u64(77);
        path.insert(3, missing);
        let prefetcher = BlockPrefetcher::new(&store, 8, CancelToken::new());
        let items: Vec<Result<Block>> = prefetcher.run(&path, |blocks| blocks.collect());
        assert_eq!(items.len(), 4);
        assert!(items[..3].iter().all(|item| item.is_ok()));
        assert_eq!(items[3], Err(ConsensusError::missing(DataKind::Block, missing)));
    }

    #[test]
    fn test_full_channel_applies_backpressure() {
        let (store, path) = store(50);
        let prefetcher = BlockPrefetcher::new(&store, 2, CancelToken::new());
        let taken = prefetcher.run(&path, |blocks| {
            std::thread::sleep(Duration::from_millis(50));
            // Two buffered plus one blocked in send
            assert!(store.fetched.load(Ordering::SeqCst) <= 3);
            blocks.take(5).count()
        });
        assert_eq!(taken, 5);
        assert!(store.fetched.load(Ordering::SeqCst) < path.len());
    }

    #[test]
    fn test_cancelled_prefetch_yields_nothing() {
        let (store, path) = store(10);
        let cancel = CancelToken::new();
        cancel.cancel();
        let prefetcher = BlockPrefetcher::new(&store, 4, cancel);
        assert_eq!(prefetcher.run(&path, |blocks| blocks.count()), 0);
        assert_eq!(store.fetched.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_depth_is_at_least_one() {
        let (store, _) = store(0);
        assert_eq!(BlockPrefetcher::new(&store, 0, CancelToken::new()).depth(), 1);
        let config = EngineConfig {
            prefetch_memory_budget: 4_000,
            average_block_size: 1_000,
            ..EngineConfig::default()
        };
        assert_eq!(BlockPrefetcher::from_config(&store, &config, CancelToken::new()).depth(), 4);
    }
}
