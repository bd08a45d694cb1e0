//! Error types for chain-state calculation

use crate::uint256::UInt256;
use std::fmt;
use thiserror::Error;

/// Which external collaborator failed to supply data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    Block,
    Header,
    ChainLink,
    Transaction,
    /// Undo journal of an applied block
    Undo,
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataKind::Block => "block",
            DataKind::Header => "header",
            DataKind::ChainLink => "chain link",
            DataKind::Transaction => "transaction",
            DataKind::Undo => "undo",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    /// Consensus rule violation; fatal to the block and never retried with the same data
    #[error("Block {block_hash} at height {height} failed validation: {reason}")]
    Validation {
        block_hash: UInt256,
        height: u64,
        reason: String,
    },

    /// Required input not yet available; the calculation can be re-run once it arrives
    #[error("Missing {kind} data: {key}")]
    MissingData { kind: DataKind, key: UInt256 },

    #[error("Target out of range: {0}")]
    TargetOutOfRange(String),

    #[error("Calculation cancelled")]
    Cancelled,

    /// Internal defect; never folded into a partial result
    #[error("Chain invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ConsensusError {
    pub fn validation(block_hash: UInt256, height: u64, reason: impl Into<String>) -> Self {
        ConsensusError::Validation {
            block_hash,
            height,
            reason: reason.into(),
        }
    }

    pub fn missing(kind: DataKind, key: UInt256) -> Self {
        ConsensusError::MissingData { kind, key }
    }

    /// Whether re-running with more data could succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ConsensusError::MissingData { .. } | ConsensusError::Cancelled
        )
    }
}

pub type Result<T> = std::result::Result<T, ConsensusError>;
