//! Proof of work: compact targets, difficulty, work and retarget arithmetic

use crate::constants::*;
use crate::error::{ConsensusError, Result};
use crate::types::BlockHeader;
use crate::uint256::UInt256;
use num_bigint::BigUint;

/// Expand compact representation to a full 256-bit target
///
/// The format is `0x1d00ffff` where:
/// - `0x1d` is the size in bytes (29)
/// - `0x00ffff` is the mantissa; bit `0x00800000` is a sign bit
///
/// target = mantissa * 256^(size - 3). Negative and overflowing encodings are
/// rejected; a zero mantissa decodes to zero.
pub fn bits_to_target(bits: u32) -> Result<UInt256> {
    let size = bits >> 24;
    let mantissa = bits & COMPACT_MANTISSA_MASK;

    if mantissa != 0 && bits & COMPACT_SIGN_BIT != 0 {
        return Err(ConsensusError::TargetOutOfRange(format!(
            "negative compact target {bits:#010x}"
        )));
    }

    let overflow = mantissa != 0
        && (size > 34 || (mantissa > 0xff && size > 33) || (mantissa > 0xffff && size > 32));
    if overflow {
        return Err(ConsensusError::TargetOutOfRange(format!(
            "compact target {bits:#010x} overflows 256 bits"
        )));
    }

    if size <= 3 {
        Ok(UInt256::from_u64((mantissa >> (8 * (3 - size))) as u64))
    } else {
        Ok(UInt256::from_u64(mantissa as u64) << (8 * (size - 3)))
    }
}

/// Compress a target to its compact representation (Bitcoin Core's GetCompact)
///
/// Keeps the three most significant bytes; lower bits are truncated, so
/// `bits_to_target(target_to_bits(t)) <= t`.
pub fn target_to_bits(target: &UInt256) -> u32 {
    if target.is_zero() {
        return 0;
    }

    let mut size = target.bits().div_ceil(8);
    let mut compact = if size <= 3 {
        target.low_u64() << (8 * (3 - size))
    } else {
        (*target >> (8 * (size - 3))).low_u64()
    };

    // Mantissa must not look negative: shift into the next size instead
    if compact & COMPACT_SIGN_BIT as u64 != 0 {
        compact >>= 8;
        size += 1;
    }

    (compact as u32 & COMPACT_MANTISSA_MASK) | (size << 24)
}

/// Difficulty relative to `max_target` (difficulty 1 at the maximum target)
pub fn target_to_difficulty(target: &UInt256, max_target: &UInt256) -> Result<f64> {
    if target.is_zero() {
        return Err(ConsensusError::TargetOutOfRange("zero target has no difficulty".into()));
    }
    Ok(max_target.to_f64() / target.to_f64())
}

pub fn difficulty_to_target(difficulty: f64, max_target: &UInt256) -> Result<UInt256> {
    if !difficulty.is_finite() || difficulty <= 0.0 {
        return Err(ConsensusError::TargetOutOfRange(format!(
            "difficulty must be positive and finite, got {difficulty}"
        )));
    }
    UInt256::from_f64(max_target.to_f64() / difficulty).ok_or_else(|| {
        ConsensusError::TargetOutOfRange(format!("difficulty {difficulty} exceeds 256-bit target range"))
    })
}

/// Work represented by a target: 2^256 / target
pub fn target_work(target: &UInt256) -> Result<BigUint> {
    if target.is_zero() {
        return Err(ConsensusError::TargetOutOfRange("zero target has unbounded work".into()));
    }
    let numerator = BigUint::from(1u8) << 256usize;
    Ok(numerator / target.to_biguint())
}

/// Work contributed by one header, accumulated into `ChainedBlock::total_work`
pub fn calculate_work(header: &BlockHeader) -> Result<BigUint> {
    target_work(&bits_to_target(header.bits)?)
}

/// A block hash satisfies its target when it is not above it
pub fn check_proof_of_work(block_hash: &UInt256, target: &UInt256) -> bool {
    block_hash <= target
}

/// Scale `old_target` by `actual_timespan / target_timespan`
///
/// The actual timespan is clamped to `[target_timespan/4, target_timespan*4]`
/// and the result capped at `max_target`. Integer arithmetic only.
pub fn retarget(
    old_target: &UInt256,
    actual_timespan: u64,
    target_timespan: u64,
    max_target: &UInt256,
) -> Result<UInt256> {
    let clamped = actual_timespan.clamp(target_timespan / 4, target_timespan.saturating_mul(4));

    // old = q*T + r  =>  old*A/T = q*A + r*A/T, which avoids a 256-bit overflow
    let (quotient, remainder) = old_target
        .div_rem_u64(target_timespan)
        .ok_or_else(|| ConsensusError::Config("target timespan must be non-zero".into()))?;
    let low = ((remainder as u128 * clamped as u128) / target_timespan as u128) as u64;
    let scaled = quotient
        .checked_mul_u64(clamped)
        .and_then(|high| high.checked_add(&UInt256::from_u64(low)));

    Ok(match scaled {
        Some(target) if target <= *max_target => target,
        _ => *max_target,
    })
}
