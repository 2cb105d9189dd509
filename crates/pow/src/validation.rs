use mvsd_consensus::{ConsensusMode, ConsensusParams};
use mvsd_primitives::block::BlockHeader;

use crate::difficulty::{compact_to_u256, hash_meets_target, CompactError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowError {
    NotProofOfWork,
    InvalidBits(&'static str),
    HashAboveTarget,
    Compact(CompactError),
}

impl std::fmt::Display for PowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PowError::NotProofOfWork => write!(f, "header is not a proof-of-work header"),
            PowError::InvalidBits(message) => write!(f, "{message}"),
            PowError::HashAboveTarget => write!(f, "pow hash does not meet target"),
            PowError::Compact(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for PowError {}

impl From<CompactError> for PowError {
    fn from(err: CompactError) -> Self {
        PowError::Compact(err)
    }
}

/// Checks that a PoW header's own hash meets the target its bits declare.
pub fn validate_pow_header(header: &BlockHeader, params: &ConsensusParams) -> Result<(), PowError> {
    if header.mode() != Some(ConsensusMode::Pow) {
        return Err(PowError::NotProofOfWork);
    }

    let target = compact_to_u256(header.bits)?;
    if target.is_zero() {
        return Err(PowError::InvalidBits("pow target is zero"));
    }
    let limit = compact_to_u256(params.pow_limit_bits)?;
    if target > limit {
        return Err(PowError::InvalidBits("pow target above limit"));
    }

    if !hash_meets_target(&header.hash(), &target) {
        return Err(PowError::HashAboveTarget);
    }
    Ok(())
}

/// Grinds the nonce until the header meets its own target or `max_tries` runs out.
pub fn solve_header(header: &mut BlockHeader, max_tries: u64) -> Result<bool, PowError> {
    let target = compact_to_u256(header.bits)?;
    for _ in 0..max_tries {
        if hash_meets_target(&header.hash(), &target) {
            return Ok(true);
        }
        header.nonce = header.nonce.wrapping_add(1);
    }
    Ok(false)
}
