//! Difficulty and compact target utilities.

use std::cmp::Ordering;

use mvsd_consensus::Hash256;
use primitive_types::U256;

/// Blocks over which a spacing deviation is smoothed out.
pub const RETARGET_SMOOTHING: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactError {
    Negative,
    Overflow,
}

impl std::fmt::Display for CompactError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompactError::Negative => write!(f, "compact target has negative sign bit"),
            CompactError::Overflow => write!(f, "compact target overflows 256-bit range"),
        }
    }
}

impl std::error::Error for CompactError {}

/// The slice of a header retargeting needs.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HeaderInfo {
    pub height: u64,
    pub time: u32,
    pub bits: u32,
}

pub fn compact_to_u256(bits: u32) -> Result<U256, CompactError> {
    if bits & 0x0080_0000 != 0 && bits & 0x007f_ffff != 0 {
        return Err(CompactError::Negative);
    }
    let exponent = bits >> 24;
    let mantissa = bits & 0x007f_ffff;
    if mantissa == 0 {
        return Ok(U256::zero());
    }
    if exponent <= 3 {
        return Ok(U256::from(mantissa >> (8 * (3 - exponent))));
    }
    let too_wide = exponent > 34
        || (mantissa > 0xff && exponent > 33)
        || (mantissa > 0xffff && exponent > 32);
    if too_wide {
        return Err(CompactError::Overflow);
    }
    Ok(U256::from(mantissa) << (8 * (exponent - 3)))
}

pub fn u256_to_compact(value: U256) -> u32 {
    if value.is_zero() {
        return 0;
    }
    let mut exponent = value.bits().div_ceil(8) as u32;
    let mut mantissa = if exponent <= 3 {
        value.low_u32() << (8 * (3 - exponent))
    } else {
        (value >> (8 * (exponent - 3))).low_u32()
    };
    // Keep the sign bit clear by widening the exponent.
    if mantissa & 0x0080_0000 != 0 {
        mantissa >>= 8;
        exponent += 1;
    }
    (exponent << 24) | (mantissa & 0x007f_ffff)
}

pub fn compact_to_target(bits: u32) -> Result<Hash256, CompactError> {
    Ok(compact_to_u256(bits)?.to_little_endian())
}

pub fn target_to_compact(target: &Hash256) -> u32 {
    u256_to_compact(U256::from_little_endian(target))
}

/// Hashes compare as little-endian 256-bit numbers.
pub fn hash_meets_target(hash: &Hash256, target: &U256) -> bool {
    U256::from_little_endian(hash) <= *target
}

pub fn cmp_hash(a: &Hash256, b: &Hash256) -> Ordering {
    U256::from_little_endian(a).cmp(&U256::from_little_endian(b))
}

/// Expected number of hashes needed to meet `bits`.
pub fn block_proof(bits: u32) -> Result<U256, CompactError> {
    let target = compact_to_u256(bits)?;
    if target.is_zero() {
        return Ok(U256::zero());
    }
    Ok((!target / (target + U256::one())) + U256::one())
}

/// Compact target for the block after `last`.
///
/// `before_last` is the previous block of the same consensus mode, so PoW and PoS
/// difficulties retarget independently. The measured spacing is clamped to
/// `[1, 10 * target_spacing]` and blended so one slow or fast block moves the
/// target by at most a small step; the result never exceeds `limit_bits`.
pub fn next_work_required(
    last: Option<&HeaderInfo>,
    before_last: Option<&HeaderInfo>,
    target_spacing: u32,
    limit_bits: u32,
) -> Result<u32, CompactError> {
    let limit = compact_to_u256(limit_bits)?;
    let (Some(last), Some(before_last)) = (last, before_last) else {
        return Ok(limit_bits);
    };
    if target_spacing == 0 {
        return Ok(last.bits);
    }

    let spacing = target_spacing as u64;
    let actual = (last.time as u64)
        .saturating_sub(before_last.time as u64)
        .clamp(1, spacing * 10);

    let previous = compact_to_u256(last.bits)?;
    let numerator = U256::from((RETARGET_SMOOTHING - 1) * spacing + 2 * actual);
    let denominator = U256::from((RETARGET_SMOOTHING + 1) * spacing);
    let (scaled, overflow) = previous.overflowing_mul(numerator);
    let next = if overflow {
        limit
    } else {
        (scaled / denominator).min(limit)
    };
    if next.is_zero() {
        return Ok(u256_to_compact(U256::one()));
    }
    Ok(u256_to_compact(next))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(height: u64, time: u32, bits: u32) -> HeaderInfo {
        HeaderInfo { height, time, bits }
    }

    #[test]
    fn missing_history_uses_limit() {
        let bits = next_work_required(None, None, 15, 0x207f_ffff).expect("bits");
        assert_eq!(bits, 0x207f_ffff);
        let last = info(1, 100, 0x1e00_ffff);
        let bits = next_work_required(Some(&last), None, 15, 0x207f_ffff).expect("bits");
        assert_eq!(bits, 0x207f_ffff);
    }

    #[test]
    fn on_schedule_keeps_target() {
        let before = info(9, 1_000, 0x1d00_ffff);
        let last = info(10, 1_015, 0x1d00_ffff);
        let bits = next_work_required(Some(&last), Some(&before), 15, 0x1f00_ffff).expect("bits");
        assert_eq!(bits, 0x1d00_ffff);
    }

    #[test]
    fn fast_blocks_lower_target_and_slow_blocks_raise_it() {
        let before = info(9, 1_000, 0x1d00_ffff);
        let fast = info(10, 1_001, 0x1d00_ffff);
        let slow = info(10, 1_000 + 600, 0x1d00_ffff);
        let base = compact_to_u256(0x1d00_ffff).expect("base");

        let harder = next_work_required(Some(&fast), Some(&before), 15, 0x1f00_ffff).expect("fast");
        let easier = next_work_required(Some(&slow), Some(&before), 15, 0x1f00_ffff).expect("slow");
        assert!(compact_to_u256(harder).expect("harder") < base);
        assert!(compact_to_u256(easier).expect("easier") > base);
    }

    #[test]
    fn target_is_capped_at_limit() {
        let before = info(9, 1_000, 0x207f_ffff);
        let last = info(10, 100_000, 0x207f_ffff);
        let bits = next_work_required(Some(&last), Some(&before), 15, 0x207f_ffff).expect("bits");
        assert_eq!(bits, 0x207f_ffff);
    }
}
