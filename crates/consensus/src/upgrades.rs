//! Height-gated consensus features and block consensus modes.

use crate::constants::{
    BLOCK_VERSION_DPOS, BLOCK_VERSION_POS, BLOCK_VERSION_POW, TX_VERSION_CHECK_NOVA_FEATURE,
    TX_VERSION_CHECK_NOVA_TESTNET, TX_VERSION_FIRST, TX_VERSION_MAX,
};
use crate::params::{ConsensusParams, Network};

pub type Hash256 = [u8; 32];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Feature {
    /// Asset certificates, identifiable tokens and identity records.
    Nova,
    /// Testnet-only extension of the Nova transaction version.
    NovaTestnet,
    ProofOfStake,
    DelegatedProofOfStake,
}

pub fn feature_active(feature: Feature, height: u64, params: &ConsensusParams) -> bool {
    match feature {
        Feature::Nova => height >= params.nova_height,
        Feature::NovaTestnet => {
            params.network != Network::Mainnet && height >= params.nova_testnet_height
        }
        Feature::ProofOfStake => height >= params.pos.enabled_height,
        Feature::DelegatedProofOfStake => height >= params.witness.enable_height,
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VersionGate {
    Supported,
    /// The version exists but its feature is not active at this height.
    NotActivated,
    Unknown,
}

pub fn tx_version_supported(version: u32, height: u64, params: &ConsensusParams) -> VersionGate {
    if !(TX_VERSION_FIRST..TX_VERSION_MAX).contains(&version) {
        return VersionGate::Unknown;
    }
    let active = match version {
        TX_VERSION_CHECK_NOVA_FEATURE => feature_active(Feature::Nova, height, params),
        TX_VERSION_CHECK_NOVA_TESTNET => feature_active(Feature::NovaTestnet, height, params),
        _ => true,
    };
    if active {
        VersionGate::Supported
    } else {
        VersionGate::NotActivated
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ConsensusMode {
    Pow,
    Pos,
    Dpos,
}

impl ConsensusMode {
    pub fn from_block_version(version: u32) -> Option<Self> {
        match version {
            BLOCK_VERSION_POW => Some(ConsensusMode::Pow),
            BLOCK_VERSION_POS => Some(ConsensusMode::Pos),
            BLOCK_VERSION_DPOS => Some(ConsensusMode::Dpos),
            _ => None,
        }
    }

    pub fn block_version(self) -> u32 {
        match self {
            ConsensusMode::Pow => BLOCK_VERSION_POW,
            ConsensusMode::Pos => BLOCK_VERSION_POS,
            ConsensusMode::Dpos => BLOCK_VERSION_DPOS,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConsensusMode::Pow => "pow",
            ConsensusMode::Pos => "pos",
            ConsensusMode::Dpos => "dpos",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pow" => Some(ConsensusMode::Pow),
            "pos" => Some(ConsensusMode::Pos),
            "dpos" => Some(ConsensusMode::Dpos),
            _ => None,
        }
    }

    /// Whether a block of this mode may appear at `height`. DPoS additionally
    /// needs a witness schedule covering the height, which callers check.
    pub fn allowed_at(self, height: u64, params: &ConsensusParams) -> bool {
        match self {
            ConsensusMode::Pow => true,
            ConsensusMode::Pos => feature_active(Feature::ProofOfStake, height, params),
            ConsensusMode::Dpos => feature_active(Feature::DelegatedProofOfStake, height, params),
        }
    }
}
