//! Consensus serialization and hashing
//!
//! Only the byte layouts that feed into block and transaction hashes live here;
//! peer wire framing is handled elsewhere.

use crate::types::*;
use crate::uint256::UInt256;
use sha2::{Digest, Sha256};

/// SHA256(SHA256(data)) as raw digest bytes
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&second);
    hash
}

/// Double-SHA256 interpreted as a little-endian 256-bit number
pub fn hash256(data: &[u8]) -> UInt256 {
    UInt256::from_le_bytes(double_sha256(data))
}

/// Serialize block header to its fixed 80-byte layout
pub fn serialize_header(header: &BlockHeader) -> [u8; 80] {
    let mut bytes = [0u8; 80];
    bytes[0..4].copy_from_slice(&header.version.to_le_bytes());
    bytes[4..36].copy_from_slice(&header.previous_block.to_le_bytes());
    bytes[36..68].copy_from_slice(&header.merkle_root.to_le_bytes());
    bytes[68..72].copy_from_slice(&header.time.to_le_bytes());
    bytes[72..76].copy_from_slice(&header.bits.to_le_bytes());
    bytes[76..80].copy_from_slice(&header.nonce.to_le_bytes());
    bytes
}

pub fn block_header_hash(header: &BlockHeader) -> UInt256 {
    hash256(&serialize_header(header))
}

/// Serialize a transaction in the legacy (non-witness) format
pub fn serialize_transaction(tx: &Transaction) -> Vec<u8> {
    let mut data = Vec::with_capacity(
        10 + tx.inputs.len() * 41 + tx.outputs.len() * 9,
    );

    data.extend_from_slice(&tx.version.to_le_bytes());

    data.extend_from_slice(&encode_varint(tx.inputs.len() as u64));
    for input in &tx.inputs {
        data.extend_from_slice(&input.previous_output.tx_hash.to_le_bytes());
        data.extend_from_slice(&input.previous_output.output_index.to_le_bytes());
        data.extend_from_slice(&encode_varint(input.script_sig.len() as u64));
        data.extend_from_slice(&input.script_sig);
        data.extend_from_slice(&input.sequence.to_le_bytes());
    }

    data.extend_from_slice(&encode_varint(tx.outputs.len() as u64));
    for output in &tx.outputs {
        data.extend_from_slice(&output.value.to_le_bytes());
        data.extend_from_slice(&encode_varint(output.script_pubkey.len() as u64));
        data.extend_from_slice(&output.script_pubkey);
    }

    data.extend_from_slice(&tx.lock_time.to_le_bytes());
    data
}

pub fn transaction_hash(tx: &Transaction) -> UInt256 {
    hash256(&serialize_transaction(tx))
}

/// Encode a number as a Bitcoin varint
pub fn encode_varint(value: u64) -> Vec<u8> {
    if value < 0xfd {
        vec![value as u8]
    } else if value <= 0xffff {
        let mut result = vec![0xfd];
        result.extend_from_slice(&(value as u16).to_le_bytes());
        result
    } else if value <= 0xffff_ffff {
        let mut result = vec![0xfe];
        result.extend_from_slice(&(value as u32).to_le_bytes());
        result
    } else {
        let mut result = vec![0xff];
        result.extend_from_slice(&value.to_le_bytes());
        result
    }
}

/// Merkle root over transaction hashes; odd levels duplicate their last hash.
/// Returns `None` for an empty list.
pub fn merkle_root(tx_hashes: &[UInt256]) -> Option<UInt256> {
    if tx_hashes.is_empty() {
        return None;
    }

    let mut level: Vec<UInt256> = tx_hashes.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                let left = pair[0];
                let right = pair.get(1).copied().unwrap_or(left);
                let mut combined = [0u8; 64];
                combined[..32].copy_from_slice(&left.to_le_bytes());
                combined[32..].copy_from_slice(&right.to_le_bytes());
                hash256(&combined)
            })
            .collect();
    }
    level.first().copied()
}

pub fn block_merkle_root(transactions: &[Transaction]) -> Option<UInt256> {
    let hashes: Vec<UInt256> = transactions.iter().map(Transaction::hash).collect();
    merkle_root(&hashes)
}
