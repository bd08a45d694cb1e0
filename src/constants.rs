//! Bitcoin consensus constants

/// Satoshis per BTC
pub const SATOSHIS_PER_BTC: u64 = 100_000_000;

/// Initial block subsidy: 50 BTC
pub const INITIAL_SUBSIDY: u64 = 50 * SATOSHIS_PER_BTC;

/// Halving interval: 210,000 blocks
pub const HALVING_INTERVAL: u64 = 210_000;

/// Subsidy is zero from this many halvings on
pub const MAX_HALVINGS: u64 = 32;

/// Difficulty adjustment interval: 2016 blocks
pub const DIFFICULTY_ADJUSTMENT_INTERVAL: u64 = 2016;

/// Target time per block: 10 minutes
pub const TARGET_TIME_PER_BLOCK: u64 = 600;

/// Target timespan of one retarget period: 14 days
pub const TARGET_TIMESPAN: u64 = 14 * 24 * 60 * 60;

/// Maximum target (minimum difficulty) on mainnet and testnet
pub const MAX_TARGET_BITS: u32 = 0x1d00ffff;

/// Maximum target on regtest
pub const REGTEST_MAX_TARGET_BITS: u32 = 0x207fffff;

/// Largest mantissa of the compact target encoding; 0x00800000 is the sign bit
pub const COMPACT_MANTISSA_MASK: u32 = 0x007fffff;

pub const COMPACT_SIGN_BIT: u32 = 0x00800000;

/// Mainnet transactions mined twice before BIP30 (height, tx hash); the default
/// `ChainParams::duplicate_exceptions`
pub const DUPLICATE_COINBASE_EXCEPTIONS: [(u64, &str); 2] = [
    (
        91842,
        "d5d27987d2a3dfc724e359870c6644b40e497bdc0589a033220fe15429d88599",
    ),
    (
        91880,
        "e3bf3d07d4b0375638d5f1db5255fe07ba2c4cb067cd81b84ee974b6585fb468",
    ),
];

/// Default prefetch memory budget: 256 MiB
pub const DEFAULT_PREFETCH_MEMORY_BUDGET: usize = 256 * 1024 * 1024;

/// Default average block size used to size the prefetch window: 1 MB
pub const DEFAULT_AVERAGE_BLOCK_SIZE: usize = 1_000_000;

/// Default number of recent blocks that keep undo journals (two days of blocks)
pub const DEFAULT_UNDO_WINDOW: u64 = 288;
