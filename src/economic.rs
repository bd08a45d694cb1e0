//! Block subsidy schedule and fee arithmetic

use crate::constants::*;
use crate::types::*;

/// GetBlockSubsidy: ℕ → ℕ
///
/// Subsidy halves every `halving_interval` blocks and is zero from the
/// `MAX_HALVINGS`th halving on.
///
/// Formula: subsidy = 50 * C * 2^(-⌊h/H⌋)
pub fn get_block_subsidy(height: u64, halving_interval: u64) -> u64 {
    let halvings = height / halving_interval.max(1);
    if halvings >= MAX_HALVINGS {
        return 0;
    }
    INITIAL_SUBSIDY >> halvings
}

/// Sum of all subsidies from genesis through `height`
pub fn total_supply(height: u64, halving_interval: u64) -> u128 {
    let interval = halving_interval.max(1);
    let mut total = 0u128;
    let mut start = 0u64;
    while start <= height {
        let subsidy = get_block_subsidy(start, interval);
        if subsidy == 0 {
            break;
        }
        let end = (start + interval - 1).min(height);
        total += subsidy as u128 * (end - start + 1) as u128;
        start += interval;
    }
    total
}

/// Fee paid by a transaction: inputs minus outputs, `None` if outputs exceed
/// inputs or the sums overflow
pub fn transaction_fee(input_values: &[u64], tx: &Transaction) -> Option<u64> {
    let total_in = input_values
        .iter()
        .try_fold(0u64, |acc, &value| acc.checked_add(value))?;
    let total_out = tx.output_value()?;
    total_in.checked_sub(total_out)
}

/// Largest value the coinbase may claim
pub fn max_coinbase_value(height: u64, halving_interval: u64, fees: u64) -> Option<u64> {
    get_block_subsidy(height, halving_interval).checked_add(fees)
}
