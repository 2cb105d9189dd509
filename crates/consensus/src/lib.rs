//! Consensus constants, network parameters, subsidy schedules and feature activation.

pub mod constants;
pub mod money;
pub mod params;
pub mod rewards;
pub mod upgrades;

pub use params::{
    consensus_params, ConsensusParams, LockRewardParams, Network, PosParams, SubsidyParams,
    WitnessParams,
};
pub use rewards::{
    base_subsidy, block_subsidy, lock_height_index, lock_reward, mst_subsidy, MstSchedule,
};
pub use upgrades::{
    feature_active, tx_version_supported, ConsensusMode, Feature, Hash256, VersionGate,
};
