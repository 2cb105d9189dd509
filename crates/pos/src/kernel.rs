//! Stake kernel hashing.
//!
//! A staker proves eligibility by hashing the previous block hash, the staked outpoint
//! and the candidate timestamp. The result must fall under the compact target scaled
//! by the staked value in whole coins, so larger stakes find blocks proportionally
//! more often.

use mvsd_consensus::money::{Amount, COIN};
use mvsd_consensus::{ConsensusParams, Hash256};
use mvsd_pow::difficulty::{compact_to_u256, hash_meets_target, CompactError};
use mvsd_primitives::encoding::{Encodable, Encoder};
use mvsd_primitives::hash::sha256d;
use mvsd_primitives::outpoint::OutPoint;
use primitive_types::U256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StakeError {
    ValueTooLow,
    Immature,
    InvalidTarget,
    TargetAboveLimit,
    KernelAboveTarget,
}

impl std::fmt::Display for StakeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StakeError::ValueTooLow => write!(f, "stake value below minimum"),
            StakeError::Immature => write!(f, "stake output lacks confirmations"),
            StakeError::InvalidTarget => write!(f, "invalid stake target"),
            StakeError::TargetAboveLimit => write!(f, "stake target above limit"),
            StakeError::KernelAboveTarget => write!(f, "stake kernel does not meet target"),
        }
    }
}

impl std::error::Error for StakeError {}

impl From<CompactError> for StakeError {
    fn from(_: CompactError) -> Self {
        StakeError::InvalidTarget
    }
}

/// The output a coinstake spends, as seen by the validator.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StakeInput {
    pub outpoint: OutPoint,
    pub value: Amount,
    /// Height of the block that confirmed the output.
    pub height: u64,
}

pub fn stake_kernel_hash(prev_hash: &Hash256, outpoint: &OutPoint, timestamp: u32) -> Hash256 {
    let mut encoder = Encoder::with_capacity(72);
    encoder.write_hash(prev_hash);
    outpoint.consensus_encode(&mut encoder);
    encoder.write_u32_le(timestamp);
    sha256d(&encoder.into_inner())
}

/// `kernel <= target * max(1, value / COIN)`, saturating on overflow.
pub fn check_stake_kernel(kernel: &Hash256, bits: u32, value: Amount) -> Result<(), StakeError> {
    let target = compact_to_u256(bits)?;
    if target.is_zero() {
        return Err(StakeError::InvalidTarget);
    }
    let weight = U256::from((value / COIN).max(1));
    let (weighted, overflow) = target.overflowing_mul(weight);
    let weighted = if overflow { U256::MAX } else { weighted };
    if hash_meets_target(kernel, &weighted) {
        Ok(())
    } else {
        Err(StakeError::KernelAboveTarget)
    }
}

/// Full eligibility check for a stake block at `height`.
pub fn verify_stake(
    prev_hash: &Hash256,
    height: u64,
    timestamp: u32,
    bits: u32,
    stake: &StakeInput,
    params: &ConsensusParams,
) -> Result<(), StakeError> {
    if stake.value < params.pos.min_stake_value {
        return Err(StakeError::ValueTooLow);
    }
    if height < stake.height.saturating_add(params.pos.min_stake_confirmations) {
        return Err(StakeError::Immature);
    }
    let limit = compact_to_u256(params.pos.stake_limit_bits)?;
    if compact_to_u256(bits)? > limit {
        return Err(StakeError::TargetAboveLimit);
    }
    let kernel = stake_kernel_hash(prev_hash, &stake.outpoint, timestamp);
    check_stake_kernel(&kernel, bits, stake.value).inspect_err(|_| {
        mvsd_log::log_debug!(
            "stake kernel miss at height {height} for {}",
            stake.outpoint
        );
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_hash_depends_on_every_input() {
        let outpoint = OutPoint::new([0x11; 32], 1);
        let prev = [0x22; 32];
        let base = stake_kernel_hash(&prev, &outpoint, 100);
        assert_eq!(base, stake_kernel_hash(&prev, &outpoint, 100));
        assert_ne!(base, stake_kernel_hash(&prev, &outpoint, 101));
        assert_ne!(base, stake_kernel_hash(&[0x33; 32], &outpoint, 100));
        assert_ne!(
            base,
            stake_kernel_hash(&prev, &OutPoint::new([0x11; 32], 2), 100)
        );
    }

    #[test]
    fn weight_scales_target() {
        // Target 0xffff; a kernel of 0x01_0000 is just above it.
        let bits = 0x0300_ffff;
        let mut kernel = [0u8; 32];
        kernel[2] = 0x01;
        assert_eq!(
            check_stake_kernel(&kernel, bits, COIN),
            Err(StakeError::KernelAboveTarget)
        );
        check_stake_kernel(&kernel, bits, 2 * COIN).expect("doubled weight");
    }
}
