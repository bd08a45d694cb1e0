//! Core chain-state types

use crate::hashing;
use crate::uint256::UInt256;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

/// Byte string type
pub type ByteString = Vec<u8>;

/// Identifies one transaction output; ordered by (tx_hash, output_index)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxOutputKey {
    pub tx_hash: UInt256,
    pub output_index: u32,
}

impl TxOutputKey {
    pub fn new(tx_hash: UInt256, output_index: u32) -> Self {
        Self { tx_hash, output_index }
    }

    /// Previous-output reference carried by coinbase inputs
    pub fn null() -> Self {
        Self {
            tx_hash: UInt256::ZERO,
            output_index: u32::MAX,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInput {
    pub previous_output: TxOutputKey,
    #[serde(with = "hex_bytes")]
    pub script_sig: ByteString,
    pub sequence: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutput {
    /// Value in satoshis
    pub value: u64,
    #[serde(with = "hex_bytes")]
    pub script_pubkey: ByteString,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub lock_time: u32,
}

impl Transaction {
    /// Double-SHA256 of the consensus serialization
    pub fn hash(&self) -> UInt256 {
        hashing::transaction_hash(self)
    }

    pub fn output_value(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, output| acc.checked_add(output.value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    pub previous_block: UInt256,
    pub merkle_root: UInt256,
    /// Unix seconds
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    pub fn hash(&self) -> UInt256 {
        hashing::block_header_hash(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn hash(&self) -> UInt256 {
        self.header.hash()
    }

    /// Rough in-memory footprint, used to bound prefetch buffers
    pub fn approximate_size(&self) -> usize {
        80 + self
            .transactions
            .iter()
            .map(|tx| {
                10 + tx
                    .inputs
                    .iter()
                    .map(|i| 41 + i.script_sig.len())
                    .sum::<usize>()
                    + tx
                        .outputs
                        .iter()
                        .map(|o| 9 + o.script_pubkey.len())
                        .sum::<usize>()
            })
            .sum::<usize>()
    }
}

/// A header that links to a known ancestor, with its cumulative work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainedBlock {
    pub block_hash: UInt256,
    pub previous_block_hash: UInt256,
    pub height: u64,
    pub total_work: BigUint,
}

impl ChainedBlock {
    pub fn genesis(block_hash: UInt256, work: BigUint) -> Self {
        Self {
            block_hash,
            previous_block_hash: UInt256::ZERO,
            height: 0,
            total_work: work,
        }
    }

    /// Link `block_hash` (with its own `work`) onto `parent`
    pub fn from_parent(parent: &ChainedBlock, block_hash: UInt256, work: &BigUint) -> Self {
        Self {
            block_hash,
            previous_block_hash: parent.block_hash,
            height: parent.height + 1,
            total_work: &parent.total_work + work,
        }
    }
}

/// Packed unspent-output bitmap, one bit per output
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputStates {
    len: u32,
    words: Vec<u64>,
}

impl OutputStates {
    pub fn all_unspent(len: u32) -> Self {
        let word_count = (len as usize).div_ceil(64);
        let mut words = vec![u64::MAX; word_count];
        let tail = len % 64;
        if tail != 0 {
            if let Some(last) = words.last_mut() {
                *last = (1u64 << tail) - 1;
            }
        }
        Self { len, words }
    }

    pub fn all_spent(len: u32) -> Self {
        Self {
            len,
            words: vec![0; (len as usize).div_ceil(64)],
        }
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, index: u32) -> bool {
        index < self.len && (self.words[(index / 64) as usize] >> (index % 64)) & 1 == 1
    }

    pub fn set(&mut self, index: u32, unspent: bool) {
        if index >= self.len {
            return;
        }
        let mask = 1u64 << (index % 64);
        let word = &mut self.words[(index / 64) as usize];
        if unspent {
            *word |= mask;
        } else {
            *word &= !mask;
        }
    }

    pub fn unspent_count(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    pub fn all_clear(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }
}

/// UTXO-set entry: which outputs of one transaction remain unspent
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnspentTx {
    pub defining_block_hash: UInt256,
    pub tx_index: u32,
    pub tx_hash: UInt256,
    pub unspent_outputs: OutputStates,
}

impl UnspentTx {
    pub fn new(defining_block_hash: UInt256, tx_index: u32, tx_hash: UInt256, output_count: u32) -> Self {
        Self {
            defining_block_hash,
            tx_index,
            tx_hash,
            unspent_outputs: OutputStates::all_unspent(output_count),
        }
    }

    pub fn output_count(&self) -> u32 {
        self.unspent_outputs.len()
    }

    pub fn is_unspent(&self, index: u32) -> bool {
        self.unspent_outputs.get(index)
    }

    pub fn is_fully_spent(&self) -> bool {
        self.unspent_outputs.all_clear()
    }
}

/// UTXO set: transaction hash → unspent entry
///
/// Persistent map: clones share structure, so snapshots copy in O(1) and
/// each update costs O(log n).
pub type UtxoMap = im::HashMap<UInt256, UnspentTx>;

/// Serde helper: byte strings as hex
pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
