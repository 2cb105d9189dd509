//! Consensus parameter definitions.

use std::fmt;
use std::str::FromStr;

use crate::money::{Amount, COIN, DEFAULT_MIN_TX_FEE};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    pub fn as_str(self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Regtest => "regtest",
        }
    }

    pub fn is_testnet(self) -> bool {
        !matches!(self, Network::Mainnet)
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Ok(Network::Mainnet),
            "testnet" | "test" => Ok(Network::Testnet),
            "regtest" => Ok(Network::Regtest),
            other => Err(format!("unknown network '{other}'")),
        }
    }
}

/// Base-subsidy schedule shared by all consensus modes.
#[derive(Clone, Debug)]
pub struct SubsidyParams {
    pub initial: Amount,
    /// Blocks per decay step.
    pub bucket: u64,
    /// Each step keeps this percentage of the previous subsidy.
    pub decay_percent: u64,
    /// PoS blocks earn the base subsidy divided by this.
    pub pos_divisor: u64,
    /// One-time PoW scaling applied from the PoS activation height on.
    pub pow_adjust_numerator: u64,
    pub pow_adjust_denominator: u64,
}

#[derive(Clone, Debug)]
pub struct PosParams {
    pub enabled_height: u64,
    /// Deposit that must be locked by the staking address.
    pub min_lock_value: Amount,
    /// Minimum lock period of that deposit.
    pub min_lock_height: u64,
    pub min_stake_value: Amount,
    pub min_stake_confirmations: u64,
    pub genesis_reward: Amount,
    pub target_spacing: u32,
    pub stake_limit_bits: u32,
}

#[derive(Clone, Debug)]
pub struct WitnessParams {
    pub enable_height: u64,
    pub witness_number: u32,
    pub epoch_cycle_height: u64,
    pub vote_maturity: u64,
    /// Seconds a DPoS block must trail the previous PoW block.
    pub min_block_gap_secs: u32,
    /// Blocks past the epoch start a registrant's deposit must stay locked.
    pub register_lock_height: u64,
    /// Smallest locked stake that makes a registrant electable.
    pub lock_threshold: Amount,
}

#[derive(Clone, Debug)]
pub struct LockRewardParams {
    /// Deposit lock periods accepted by consensus.
    pub lock_heights: [u64; 5],
    /// Reward rate for each period, in basis points of the locked value.
    pub rates_bp: [u64; 5],
}

#[derive(Clone, Debug)]
pub struct ConsensusParams {
    pub network: Network,
    pub pow_limit_bits: u32,
    pub pow_target_spacing: u32,
    pub coinbase_maturity: u64,
    pub min_tx_fee: Amount,
    pub nova_height: u64,
    pub nova_testnet_height: u64,
    pub subsidy: SubsidyParams,
    pub pos: PosParams,
    pub witness: WitnessParams,
    pub lock_rewards: LockRewardParams,
}

impl ConsensusParams {
    pub fn is_testnet(&self) -> bool {
        self.network.is_testnet()
    }

    pub fn is_begin_of_epoch(&self, height: u64) -> bool {
        height >= self.witness.enable_height
            && self.witness.epoch_cycle_height > 0
            && (height - self.witness.enable_height) % self.witness.epoch_cycle_height == 0
    }
}

pub fn consensus_params(network: Network) -> ConsensusParams {
    match network {
        Network::Mainnet => mainnet_consensus_params(),
        Network::Testnet => testnet_consensus_params(),
        Network::Regtest => regtest_consensus_params(),
    }
}

fn lock_rewards() -> LockRewardParams {
    LockRewardParams {
        lock_heights: [25_200, 108_000, 331_200, 655_200, 1_314_000],
        rates_bp: [48, 408, 1_497, 3_150, 6_492],
    }
}

fn mainnet_consensus_params() -> ConsensusParams {
    ConsensusParams {
        network: Network::Mainnet,
        pow_limit_bits: 0x1f00_ffff,
        pow_target_spacing: 15,
        coinbase_maturity: 1_000,
        min_tx_fee: DEFAULT_MIN_TX_FEE,
        nova_height: 1_270_000,
        nova_testnet_height: u64::MAX,
        subsidy: SubsidyParams {
            initial: 3 * COIN,
            bucket: 500_000,
            decay_percent: 95,
            pos_divisor: 10,
            pow_adjust_numerator: 5,
            pow_adjust_denominator: 6,
        },
        pos: PosParams {
            enabled_height: 1_924_000,
            min_lock_value: 500 * COIN,
            min_lock_height: 10_000,
            min_stake_value: COIN,
            min_stake_confirmations: 500,
            genesis_reward: 100_000 * COIN,
            target_spacing: 15,
            stake_limit_bits: 0x1f00_ffff,
        },
        witness: WitnessParams {
            enable_height: 2_000_000,
            witness_number: 23,
            epoch_cycle_height: 20_000,
            vote_maturity: 24,
            min_block_gap_secs: 1,
            register_lock_height: 10_000,
            lock_threshold: 1_000 * COIN,
        },
        lock_rewards: lock_rewards(),
    }
}

fn testnet_consensus_params() -> ConsensusParams {
    let mut params = mainnet_consensus_params();
    params.network = Network::Testnet;
    params.coinbase_maturity = 100;
    params.nova_height = 2_000;
    params.nova_testnet_height = 2_000;
    params.subsidy.bucket = 50_000;
    params.pos.enabled_height = 990_000;
    params.pos.min_lock_height = 1_000;
    params.pos.min_stake_confirmations = 100;
    params.witness.enable_height = 1_000_000;
    params.witness.epoch_cycle_height = 1_000;
    params.witness.register_lock_height = 500;
    params.witness.lock_threshold = 10 * COIN;
    params
}

fn regtest_consensus_params() -> ConsensusParams {
    ConsensusParams {
        network: Network::Regtest,
        pow_limit_bits: 0x207f_ffff,
        pow_target_spacing: 1,
        coinbase_maturity: 10,
        min_tx_fee: DEFAULT_MIN_TX_FEE,
        nova_height: 0,
        nova_testnet_height: 0,
        subsidy: SubsidyParams {
            initial: 3 * COIN,
            bucket: 150,
            decay_percent: 95,
            pos_divisor: 10,
            pow_adjust_numerator: 5,
            pow_adjust_denominator: 6,
        },
        pos: PosParams {
            enabled_height: 100,
            min_lock_value: 500 * COIN,
            min_lock_height: 100,
            min_stake_value: COIN,
            min_stake_confirmations: 10,
            genesis_reward: 1_000 * COIN,
            target_spacing: 1,
            stake_limit_bits: 0x207f_ffff,
        },
        witness: WitnessParams {
            enable_height: 200,
            witness_number: 3,
            epoch_cycle_height: 50,
            vote_maturity: 2,
            min_block_gap_secs: 1,
            register_lock_height: 50,
            lock_threshold: COIN,
        },
        lock_rewards: LockRewardParams {
            lock_heights: [100, 200, 400, 800, 1_600],
            rates_bp: [48, 408, 1_497, 3_150, 6_492],
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_parse_roundtrips_names() {
        for network in [Network::Mainnet, Network::Testnet, Network::Regtest] {
            assert_eq!(network.as_str().parse::<Network>(), Ok(network));
        }
        assert!("signet".parse::<Network>().is_err());
    }

    #[test]
    fn epoch_boundaries() {
        let params = consensus_params(Network::Regtest);
        assert!(!params.is_begin_of_epoch(199));
        assert!(params.is_begin_of_epoch(200));
        assert!(!params.is_begin_of_epoch(201));
        assert!(params.is_begin_of_epoch(250));
    }
}
