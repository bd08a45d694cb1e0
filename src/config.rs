//! Configuration for chain-state calculation
//!
//! `ChainParams` carries everything that differs between networks (genesis
//! block, retarget schedule, maximum target); one validation algorithm is
//! parameterized by it. `EngineConfig` holds operational knobs that never
//! affect consensus results. Both can be loaded from JSON.

use crate::constants::*;
use crate::error::{ConsensusError, Result};
use crate::pow::bits_to_target;
use crate::types::*;
use crate::uint256::UInt256;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Known networks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet3,
    Regtest,
}

/// Consensus parameters of one network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainParams {
    pub network: Network,

    pub genesis_block: Block,

    /// Blocks per difficulty retarget period (Bitcoin: 2016)
    #[serde(default = "default_retarget_interval")]
    pub retarget_interval: u64,

    /// Expected duration of one retarget period in seconds (Bitcoin: 14 days)
    #[serde(default = "default_target_timespan")]
    pub target_timespan: u64,

    /// Compact encoding of the largest allowed target
    #[serde(default = "default_max_target_bits")]
    pub max_target_bits: u32,

    /// Blocks between subsidy halvings (Bitcoin: 210,000)
    #[serde(default = "default_halving_interval")]
    pub halving_interval: u64,

    /// Keep the tip's target forever (regtest)
    #[serde(default)]
    pub no_retargeting: bool,

    /// Transactions allowed to overwrite an existing UTXO entry
    #[serde(default = "mainnet_duplicate_exceptions")]
    pub duplicate_exceptions: Vec<DuplicateException>,
}

/// A transaction mined twice before BIP30; at `height` the second copy
/// replaces the first instead of failing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateException {
    pub height: u64,
    pub tx_hash: UInt256,
}

/// Whether `tx_hash` may replace an existing entry at `height`
pub fn is_duplicate_exception(exceptions: &[DuplicateException], height: u64, tx_hash: &UInt256) -> bool {
    exceptions
        .iter()
        .any(|exception| exception.height == height && exception.tx_hash == *tx_hash)
}

fn default_retarget_interval() -> u64 {
    DIFFICULTY_ADJUSTMENT_INTERVAL
}

fn default_target_timespan() -> u64 {
    TARGET_TIMESPAN
}

fn default_max_target_bits() -> u32 {
    MAX_TARGET_BITS
}

fn default_halving_interval() -> u64 {
    HALVING_INTERVAL
}

fn mainnet_duplicate_exceptions() -> Vec<DuplicateException> {
    DUPLICATE_COINBASE_EXCEPTIONS
        .iter()
        .filter_map(|(height, hex)| {
            let tx_hash = UInt256::from_hex(hex).ok()?;
            Some(DuplicateException { height: *height, tx_hash })
        })
        .collect()
}

const GENESIS_PUBKEY: [u8; 65] = [
    0x04, 0x67, 0x8a, 0xfd, 0xb0, 0xfe, 0x55, 0x48, 0x27, 0x19, 0x67,
    0xf1, 0xa6, 0x71, 0x30, 0xb7, 0x10, 0x5c, 0xd6, 0xa8, 0x28, 0xe0,
    0x39, 0x09, 0xa6, 0x79, 0x62, 0xe0, 0xea, 0x1f, 0x61, 0xde, 0xb6,
    0x49, 0xf6, 0xbc, 0x3f, 0x4c, 0xef, 0x38, 0xc4, 0xf3, 0x55, 0x04,
    0xe5, 0x1e, 0xc1, 0x12, 0xde, 0x5c, 0x38, 0x4d, 0xf7, 0xba, 0x0b,
    0x8d, 0x57, 0x8a, 0x4c, 0x70, 0x2b, 0x6b, 0xf1, 0x1d, 0x5f,
];

const GENESIS_HEADLINE: &[u8] = b"The Times 03/Jan/2009 Chancellor on brink of second bailout for banks";

/// The coinbase shared by the mainnet, testnet3 and regtest genesis blocks
fn genesis_coinbase() -> Transaction {
    let mut script_sig = vec![0x04, 0xff, 0xff, 0x00, 0x1d, 0x01, 0x04, GENESIS_HEADLINE.len() as u8];
    script_sig.extend_from_slice(GENESIS_HEADLINE);

    let mut script_pubkey = Vec::with_capacity(67);
    script_pubkey.push(GENESIS_PUBKEY.len() as u8);
    script_pubkey.extend_from_slice(&GENESIS_PUBKEY);
    script_pubkey.push(0xac); // OP_CHECKSIG

    Transaction {
        version: 1,
        inputs: vec![TransactionInput {
            previous_output: TxOutputKey::null(),
            script_sig,
            sequence: 0xffff_ffff,
        }],
        outputs: vec![TransactionOutput {
            value: INITIAL_SUBSIDY,
            script_pubkey,
        }],
        lock_time: 0,
    }
}

fn genesis_block(time: u32, bits: u32, nonce: u32) -> Block {
    let coinbase = genesis_coinbase();
    Block {
        header: BlockHeader {
            version: 1,
            previous_block: UInt256::ZERO,
            // Single-transaction merkle root is the transaction hash itself
            merkle_root: coinbase.hash(),
            time,
            bits,
            nonce,
        },
        transactions: vec![coinbase],
    }
}

impl ChainParams {
    pub fn mainnet() -> Self {
        Self {
            network: Network::Mainnet,
            genesis_block: genesis_block(1231006505, MAX_TARGET_BITS, 2083236893),
            retarget_interval: DIFFICULTY_ADJUSTMENT_INTERVAL,
            target_timespan: TARGET_TIMESPAN,
            max_target_bits: MAX_TARGET_BITS,
            halving_interval: HALVING_INTERVAL,
            no_retargeting: false,
            duplicate_exceptions: mainnet_duplicate_exceptions(),
        }
    }

    pub fn testnet3() -> Self {
        Self {
            network: Network::Testnet3,
            genesis_block: genesis_block(1296688602, MAX_TARGET_BITS, 414098458),
            ..Self::mainnet()
        }
    }

    pub fn regtest() -> Self {
        Self {
            network: Network::Regtest,
            genesis_block: genesis_block(1296688602, REGTEST_MAX_TARGET_BITS, 2),
            max_target_bits: REGTEST_MAX_TARGET_BITS,
            halving_interval: 150,
            no_retargeting: true,
            ..Self::mainnet()
        }
    }

    pub fn for_network(network: Network) -> Self {
        match network {
            Network::Mainnet => Self::mainnet(),
            Network::Testnet3 => Self::testnet3(),
            Network::Regtest => Self::regtest(),
        }
    }

    pub fn genesis_hash(&self) -> UInt256 {
        self.genesis_block.hash()
    }

    pub fn max_target(&self) -> Result<UInt256> {
        bits_to_target(self.max_target_bits)
    }

    /// Reject parameter sets the rules engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.retarget_interval < 2 {
            return Err(ConsensusError::Config(format!(
                "retarget_interval must be at least 2, got {}",
                self.retarget_interval
            )));
        }
        if self.target_timespan < 4 {
            return Err(ConsensusError::Config(format!(
                "target_timespan must be at least 4 seconds, got {}",
                self.target_timespan
            )));
        }
        if self.halving_interval == 0 {
            return Err(ConsensusError::Config("halving_interval must be non-zero".into()));
        }
        let max_target = self
            .max_target()
            .map_err(|e| ConsensusError::Config(format!("invalid max_target_bits: {e}")))?;
        if max_target.is_zero() {
            return Err(ConsensusError::Config("max target must be non-zero".into()));
        }
        if self.genesis_block.transactions.is_empty() {
            return Err(ConsensusError::Config("genesis block has no transactions".into()));
        }
        if self.genesis_block.header.previous_block != UInt256::ZERO {
            return Err(ConsensusError::Config("genesis block must not have a parent".into()));
        }
        Ok(())
    }
}

/// Operational settings; never change validation results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Validate non-coinbase transactions of a block on the rayon pool
    #[serde(default = "default_true")]
    pub parallel_validation: bool,

    /// Bytes of block data the replay prefetcher may hold
    #[serde(default = "default_prefetch_memory_budget")]
    pub prefetch_memory_budget: usize,

    /// Expected block size used to turn the budget into a lookahead depth
    #[serde(default = "default_average_block_size")]
    pub average_block_size: usize,

    /// Most recent blocks whose undo journals a snapshot keeps; bounds the
    /// depth of a reorganization
    #[serde(default = "default_undo_window")]
    pub undo_window: u64,
}

fn default_true() -> bool {
    true
}

fn default_prefetch_memory_budget() -> usize {
    DEFAULT_PREFETCH_MEMORY_BUDGET
}

fn default_average_block_size() -> usize {
    DEFAULT_AVERAGE_BLOCK_SIZE
}

fn default_undo_window() -> u64 {
    DEFAULT_UNDO_WINDOW
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallel_validation: true,
            prefetch_memory_budget: DEFAULT_PREFETCH_MEMORY_BUDGET,
            average_block_size: DEFAULT_AVERAGE_BLOCK_SIZE,
            undo_window: DEFAULT_UNDO_WINDOW,
        }
    }
}

impl EngineConfig {
    /// Number of blocks the prefetcher may run ahead; at least one
    pub fn prefetch_depth(&self) -> usize {
        (self.prefetch_memory_budget / self.average_block_size.max(1)).max(1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.undo_window == 0 {
            return Err(ConsensusError::Config("undo_window must be at least 1".into()));
        }
        Ok(())
    }
}

/// Top-level configuration file
///
/// ```json
/// { "network": "regtest", "engine": { "prefetch_memory_budget": 1048576 } }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainStateConfig {
    pub network: Network,

    /// Full parameter override, e.g. for private test networks
    #[serde(default)]
    pub chain_params: Option<ChainParams>,

    #[serde(default)]
    pub engine: EngineConfig,
}

impl ChainStateConfig {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            chain_params: None,
            engine: EngineConfig::default(),
        }
    }

    pub fn chain_params(&self) -> ChainParams {
        self.chain_params
            .clone()
            .unwrap_or_else(|| ChainParams::for_network(self.network))
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ConsensusError::Config(format!("invalid configuration: {e}")))?;
        config.chain_params().validate()?;
        config.engine.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_json_str(&contents)
            .with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| ConsensusError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_genesis_hashes() {
        assert_eq!(
            ChainParams::testnet3().genesis_hash().to_hex(),
            "000000000933ea01ad0ee984209779baaec3ced90fa3f408719526f8d77f4943"
        );
        assert_eq!(
            ChainParams::regtest().genesis_hash().to_hex(),
            "0f9188f13cb7b2c71f2a335e3a4fc328bf5beb436012afca590b1a11466e2206"
        );
    }

    #[test]
    fn test_builtin_params_validate() {
        for network in [Network::Mainnet, Network::Testnet3, Network::Regtest] {
            assert!(ChainParams::for_network(network).validate().is_ok());
        }
    }

    #[test]
    fn test_invalid_params_rejected() {
        let mut params = ChainParams::regtest();
        params.retarget_interval = 1;
        assert!(matches!(params.validate(), Err(ConsensusError::Config(_))));

        let mut params = ChainParams::regtest();
        params.max_target_bits = 0x2200ffff;
        assert!(matches!(params.validate(), Err(ConsensusError::Config(_))));
    }

    #[test]
    fn test_prefetch_depth() {
        let config = EngineConfig {
            prefetch_memory_budget: 10_000_000,
            average_block_size: 1_000_000,
            ..EngineConfig::default()
        };
        assert_eq!(config.prefetch_depth(), 10);

        let tiny = EngineConfig {
            prefetch_memory_budget: 10,
            ..config.clone()
        };
        assert_eq!(tiny.prefetch_depth(), 1);

        let zero_avg = EngineConfig {
            average_block_size: 0,
            ..config
        };
        assert_eq!(zero_avg.prefetch_depth(), 10_000_000);
    }

    #[test]
    fn test_config_from_json_with_defaults() {
        let config = ChainStateConfig::from_json_str(r#"{ "network": "regtest" }"#).unwrap();
        assert_eq!(config.network, Network::Regtest);
        assert_eq!(config.engine, EngineConfig::default());
        assert_eq!(config.chain_params(), ChainParams::regtest());
    }

    #[test]
    fn test_config_json_round_trip() {
        let mut config = ChainStateConfig::new(Network::Mainnet);
        config.engine.parallel_validation = false;
        config.chain_params = Some(ChainParams::testnet3());
        let json = config.to_json().unwrap();
        let back = ChainStateConfig::from_json_str(&json).unwrap();
        assert_eq!(back, config);
        assert_eq!(back.chain_params().network, Network::Testnet3);
    }

    #[test]
    fn test_mainnet_duplicate_exceptions() {
        let params = ChainParams::mainnet();
        assert_eq!(params.duplicate_exceptions.len(), 2);
        let first = params.duplicate_exceptions[0];
        assert_eq!(first.height, 91842);
        assert_eq!(
            first.tx_hash.to_hex(),
            "d5d27987d2a3dfc724e359870c6644b40e497bdc0589a033220fe15429d88599"
        );
        assert!(is_duplicate_exception(&params.duplicate_exceptions, 91842, &first.tx_hash));
        assert!(!is_duplicate_exception(&params.duplicate_exceptions, 91843, &first.tx_hash));
        assert!(!is_duplicate_exception(&params.duplicate_exceptions, 91842, &UInt256::ONE));

        // Omitted from JSON: mainnet list
        let mut json = serde_json::to_value(ChainParams::regtest()).unwrap();
        json.as_object_mut().unwrap().remove("duplicate_exceptions");
        let back: ChainParams = serde_json::from_value(json).unwrap();
        assert_eq!(back.duplicate_exceptions, params.duplicate_exceptions);
    }

    #[test]
    fn test_undo_window_must_be_positive() {
        let result = ChainStateConfig::from_json_str(r#"{ "network": "regtest", "engine": { "undo_window": 0 } }"#);
        assert!(matches!(result, Err(ConsensusError::Config(_))));
        let config = ChainStateConfig::from_json_str(r#"{ "network": "regtest", "engine": { "undo_window": 6 } }"#).unwrap();
        assert_eq!(config.engine.undo_window, 6);
    }

    #[test]
    fn test_config_rejects_unknown_network() {
        let result = ChainStateConfig::from_json_str(r#"{ "network": "signet" }"#);
        assert!(matches!(result, Err(ConsensusError::Config(_))));
    }

    #[test]
    fn test_config_from_missing_file() {
        let result = ChainStateConfig::from_json_file("/nonexistent/chainstate.json");
        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains("reading config file"));
    }
}
