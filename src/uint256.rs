//! 256-bit unsigned integer used for hashes, targets and proof-of-work math
//!
//! Values are stored as four little-endian 64-bit words. Block and transaction
//! hashes are interpreted as little-endian numbers (the Bitcoin convention), so
//! `UInt256::from_le_bytes(sha256d(data))` yields the value compared against
//! targets. The textual form is the byte-reversed (big-endian) hex string used
//! by block explorers.

use crate::error::{ConsensusError, Result};
use num_bigint::BigUint;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Not, Shl, Shr};
use std::str::FromStr;

/// 256-bit unsigned integer: 4 * 64 = 256 bits, least significant word first
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct UInt256([u64; 4]);

impl UInt256 {
    pub const ZERO: UInt256 = UInt256([0; 4]);
    pub const ONE: UInt256 = UInt256([1, 0, 0, 0]);
    pub const MAX: UInt256 = UInt256([u64::MAX; 4]);

    pub const fn from_u64(value: u64) -> Self {
        UInt256([value, 0, 0, 0])
    }

    pub const fn from_words(words: [u64; 4]) -> Self {
        UInt256(words)
    }

    pub fn from_le_bytes(bytes: [u8; 32]) -> Self {
        let mut words = [0u64; 4];
        for (i, word) in words.iter_mut().enumerate() {
            let mut chunk = [0u8; 8];
            chunk.copy_from_slice(&bytes[i * 8..(i + 1) * 8]);
            *word = u64::from_le_bytes(chunk);
        }
        UInt256(words)
    }

    pub fn to_le_bytes(&self) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        for (i, word) in self.0.iter().enumerate() {
            bytes[i * 8..(i + 1) * 8].copy_from_slice(&word.to_le_bytes());
        }
        bytes
    }

    pub fn from_be_bytes(mut bytes: [u8; 32]) -> Self {
        bytes.reverse();
        Self::from_le_bytes(bytes)
    }

    pub fn to_be_bytes(&self) -> [u8; 32] {
        let mut bytes = self.to_le_bytes();
        bytes.reverse();
        bytes
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&w| w == 0)
    }

    /// Least significant 64 bits (Bitcoin Core's GetLow64)
    pub fn low_u64(&self) -> u64 {
        self.0[0]
    }

    /// Number of significant bits; zero for zero
    pub fn bits(&self) -> u32 {
        for (i, &word) in self.0.iter().enumerate().rev() {
            if word != 0 {
                return (i as u32) * 64 + (64 - word.leading_zeros());
            }
        }
        0
    }

    /// Floor of log2, `None` for zero
    pub fn log2(&self) -> Option<u32> {
        self.bits().checked_sub(1)
    }

    pub fn bit(&self, index: u32) -> bool {
        if index >= 256 {
            return false;
        }
        (self.0[(index / 64) as usize] >> (index % 64)) & 1 == 1
    }

    fn set_bit(&mut self, index: u32) {
        self.0[(index / 64) as usize] |= 1u64 << (index % 64);
    }

    pub fn checked_add(&self, rhs: &UInt256) -> Option<UInt256> {
        let mut result = UInt256::ZERO;
        let mut carry = 0u128;
        for i in 0..4 {
            let sum = self.0[i] as u128 + rhs.0[i] as u128 + carry;
            result.0[i] = sum as u64;
            carry = sum >> 64;
        }
        (carry == 0).then_some(result)
    }

    /// Subtraction modulo 2^256, plus a borrow flag
    pub fn overflowing_sub(&self, rhs: &UInt256) -> (UInt256, bool) {
        let mut result = UInt256::ZERO;
        let mut borrow = false;
        for i in 0..4 {
            let (d1, b1) = self.0[i].overflowing_sub(rhs.0[i]);
            let (d2, b2) = d1.overflowing_sub(borrow as u64);
            result.0[i] = d2;
            borrow = b1 || b2;
        }
        (result, borrow)
    }

    pub fn checked_sub(&self, rhs: &UInt256) -> Option<UInt256> {
        match self.overflowing_sub(rhs) {
            (result, false) => Some(result),
            (_, true) => None,
        }
    }

    pub fn checked_mul_u64(&self, rhs: u64) -> Option<UInt256> {
        let mut result = UInt256::ZERO;
        let mut carry = 0u128;
        for i in 0..4 {
            let product = (self.0[i] as u128) * (rhs as u128) + carry;
            result.0[i] = product as u64;
            carry = product >> 64;
        }
        (carry == 0).then_some(result)
    }

    pub fn checked_mul(&self, rhs: &UInt256) -> Option<UInt256> {
        let mut wide = [0u64; 8];
        for i in 0..4 {
            let mut carry = 0u128;
            for j in 0..4 {
                let cur = wide[i + j] as u128 + (self.0[i] as u128) * (rhs.0[j] as u128) + carry;
                wide[i + j] = cur as u64;
                carry = cur >> 64;
            }
            wide[i + 4] = carry as u64;
        }
        if wide[4..].iter().any(|&w| w != 0) {
            return None;
        }
        Some(UInt256([wide[0], wide[1], wide[2], wide[3]]))
    }

    /// Quotient and remainder of division by a u64, `None` on division by zero
    pub fn div_rem_u64(&self, rhs: u64) -> Option<(UInt256, u64)> {
        if rhs == 0 {
            return None;
        }
        let mut result = UInt256::ZERO;
        let mut remainder = 0u128;
        for i in (0..4).rev() {
            let dividend = (remainder << 64) | self.0[i] as u128;
            result.0[i] = (dividend / rhs as u128) as u64;
            remainder = dividend % rhs as u128;
        }
        Some((result, remainder as u64))
    }

    /// Binary long division, `None` on division by zero
    pub fn div_rem(&self, divisor: &UInt256) -> Option<(UInt256, UInt256)> {
        if divisor.is_zero() {
            return None;
        }
        if self < divisor {
            return Some((UInt256::ZERO, *self));
        }

        let mut quotient = UInt256::ZERO;
        let mut remainder = UInt256::ZERO;
        for i in (0..self.bits()).rev() {
            // remainder < divisor, so one carried-out bit is enough to detect overflow
            let carry = remainder.bit(255);
            remainder = remainder << 1;
            if self.bit(i) {
                remainder.0[0] |= 1;
            }
            if carry || remainder >= *divisor {
                remainder = remainder.overflowing_sub(divisor).0;
                quotient.set_bit(i);
            }
        }
        Some((quotient, remainder))
    }

    pub fn checked_div(&self, divisor: &UInt256) -> Option<UInt256> {
        self.div_rem(divisor).map(|(q, _)| q)
    }

    /// Nearest-below f64 approximation
    pub fn to_f64(&self) -> f64 {
        self.0
            .iter()
            .rev()
            .fold(0.0f64, |acc, &word| acc * 18_446_744_073_709_551_616.0 + word as f64)
    }

    /// Exact conversion of the integral part of a finite, non-negative f64.
    /// Values below one map to zero; values of 2^256 or more are rejected.
    pub fn from_f64(value: f64) -> Option<UInt256> {
        if !value.is_finite() || value < 0.0 {
            return None;
        }
        if value < 1.0 {
            return Some(UInt256::ZERO);
        }
        let raw = value.to_bits();
        let exponent = ((raw >> 52) & 0x7ff) as i32 - 1075;
        let mantissa = (raw & 0x000f_ffff_ffff_ffff) | 0x0010_0000_0000_0000;
        if exponent >= 0 {
            if exponent + 53 > 256 {
                return None;
            }
            Some(UInt256::from_u64(mantissa) << exponent as u32)
        } else {
            Some(UInt256::from_u64(mantissa >> (-exponent) as u32))
        }
    }

    pub fn to_biguint(&self) -> BigUint {
        BigUint::from_bytes_le(&self.to_le_bytes())
    }

    pub fn from_biguint(value: &BigUint) -> Option<UInt256> {
        let bytes = value.to_bytes_le();
        if bytes.len() > 32 {
            return None;
        }
        let mut buf = [0u8; 32];
        buf[..bytes.len()].copy_from_slice(&bytes);
        Some(UInt256::from_le_bytes(buf))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_be_bytes())
    }

    /// Parse big-endian hex, with or without `0x`, shorter strings are zero-padded
    pub fn from_hex(s: &str) -> Result<UInt256> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        if digits.is_empty() || digits.len() > 64 {
            return Err(ConsensusError::Serialization(format!(
                "invalid 256-bit hex length {}",
                digits.len()
            )));
        }
        let padded = format!("{digits:0>64}");
        let decoded = hex::decode(&padded)
            .map_err(|e| ConsensusError::Serialization(format!("invalid 256-bit hex: {e}")))?;
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&decoded);
        Ok(UInt256::from_be_bytes(bytes))
    }
}

impl From<u64> for UInt256 {
    fn from(value: u64) -> Self {
        UInt256::from_u64(value)
    }
}

impl Shl<u32> for UInt256 {
    type Output = UInt256;

    fn shl(self, shift: u32) -> UInt256 {
        if shift >= 256 {
            return UInt256::ZERO;
        }
        let mut result = UInt256::ZERO;
        let word_shift = (shift / 64) as usize;
        let bit_shift = shift % 64;
        for i in 0..4 {
            if i + word_shift < 4 {
                result.0[i + word_shift] |= self.0[i] << bit_shift;
                if bit_shift > 0 && i + word_shift + 1 < 4 {
                    result.0[i + word_shift + 1] |= self.0[i] >> (64 - bit_shift);
                }
            }
        }
        result
    }
}

impl Shr<u32> for UInt256 {
    type Output = UInt256;

    fn shr(self, shift: u32) -> UInt256 {
        if shift >= 256 {
            return UInt256::ZERO;
        }
        let mut result = UInt256::ZERO;
        let word_shift = (shift / 64) as usize;
        let bit_shift = shift % 64;
        for i in word_shift..4 {
            result.0[i - word_shift] |= self.0[i] >> bit_shift;
            if bit_shift > 0 && i > word_shift {
                result.0[i - word_shift - 1] |= self.0[i] << (64 - bit_shift);
            }
        }
        result
    }
}

impl Not for UInt256 {
    type Output = UInt256;

    fn not(self) -> UInt256 {
        UInt256([!self.0[0], !self.0[1], !self.0[2], !self.0[3]])
    }
}

impl PartialOrd for UInt256 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for UInt256 {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.0.iter().rev().zip(other.0.iter().rev()) {
            match a.cmp(b) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        Ordering::Equal
    }
}

impl fmt::Display for UInt256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for UInt256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UInt256({})", self.to_hex())
    }
}

impl fmt::LowerHex for UInt256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for UInt256 {
    type Err = ConsensusError;

    fn from_str(s: &str) -> Result<Self> {
        UInt256::from_hex(s)
    }
}

impl Serialize for UInt256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for UInt256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        UInt256::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
