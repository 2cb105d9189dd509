//! Block, mining-asset and deposit reward schedules.

use crate::money::Amount;
use crate::params::ConsensusParams;
use crate::upgrades::ConsensusMode;

/// Decays `initial` geometrically: one step of `keep_percent` per `interval` blocks.
///
/// Below 100 percent every step strictly shrinks a positive value, so the loop
/// reaches zero within a few thousand steps however large `elapsed` is.
fn geometric_decay(initial: Amount, keep_percent: u64, interval: u64, elapsed: u64) -> Amount {
    if interval == 0 || keep_percent >= 100 {
        return initial;
    }
    let mut value = initial;
    for _ in 0..elapsed / interval {
        if value == 0 {
            break;
        }
        value = ((value as u128 * keep_percent as u128) / 100) as Amount;
    }
    value
}

pub fn base_subsidy(height: u64, params: &ConsensusParams) -> Amount {
    let subsidy = &params.subsidy;
    geometric_decay(subsidy.initial, subsidy.decay_percent, subsidy.bucket, height)
}

pub fn block_subsidy(
    height: u64,
    mode: ConsensusMode,
    witness_count: u32,
    params: &ConsensusParams,
) -> Amount {
    let base = base_subsidy(height, params);
    let subsidy = &params.subsidy;
    match mode {
        ConsensusMode::Pow => {
            if height >= params.pos.enabled_height && subsidy.pow_adjust_denominator > 0 {
                ((base as u128 * subsidy.pow_adjust_numerator as u128)
                    / subsidy.pow_adjust_denominator as u128) as Amount
            } else {
                base
            }
        }
        ConsensusMode::Pos => base / subsidy.pos_divisor.max(1),
        ConsensusMode::Dpos => base / u64::from(witness_count.max(1)),
    }
}

/// Per-block subsidy of a mining asset, carried in its mining certificate content.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MstSchedule {
    pub initial: Amount,
    pub interval: u64,
    pub base_percent: u64,
}

impl MstSchedule {
    /// Parses `initial:N,interval:N,base:N` (keys in any order, all required).
    pub fn parse(content: &str) -> Option<Self> {
        let mut initial = None;
        let mut interval = None;
        let mut base = None;
        for part in content.split(',') {
            let (key, value) = part.split_once(':')?;
            let value: u64 = value.trim().parse().ok()?;
            match key.trim() {
                "initial" => initial = Some(value),
                "interval" => interval = Some(value),
                "base" => base = Some(value),
                _ => return None,
            }
        }
        let schedule = Self {
            initial: initial?,
            interval: interval?,
            base_percent: base?,
        };
        if schedule.interval == 0 || schedule.base_percent == 0 || schedule.base_percent > 100 {
            return None;
        }
        Some(schedule)
    }

    pub fn to_content(&self) -> String {
        format!(
            "initial:{},interval:{},base:{}",
            self.initial, self.interval, self.base_percent
        )
    }
}

pub fn mst_subsidy(
    schedule: &MstSchedule,
    registered_height: u64,
    height: u64,
    mode: ConsensusMode,
    witness_count: u32,
    params: &ConsensusParams,
) -> Amount {
    let elapsed = height.saturating_sub(registered_height);
    let value = geometric_decay(
        schedule.initial,
        schedule.base_percent,
        schedule.interval,
        elapsed,
    );
    match mode {
        ConsensusMode::Pow => value,
        ConsensusMode::Pos => value / params.subsidy.pos_divisor.max(1),
        ConsensusMode::Dpos => value / u64::from(witness_count.max(1)),
    }
}

pub fn lock_height_index(lock_height: u64, params: &ConsensusParams) -> Option<usize> {
    params
        .lock_rewards
        .lock_heights
        .iter()
        .position(|candidate| *candidate == lock_height)
}

/// Interest paid for locking `value` for one of the consensus lock periods.
pub fn lock_reward(lock_height: u64, value: Amount, params: &ConsensusParams) -> Option<Amount> {
    let index = lock_height_index(lock_height, params)?;
    let rate = params.lock_rewards.rates_bp[index] as u128;
    Some(((value as u128 * rate) / 10_000) as Amount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::COIN;
    use crate::params::{consensus_params, Network};

    #[test]
    fn pow_subsidy_decays_per_bucket() {
        let params = consensus_params(Network::Mainnet);
        assert_eq!(block_subsidy(0, ConsensusMode::Pow, 0, &params), 3 * COIN);
        assert_eq!(block_subsidy(499_999, ConsensusMode::Pow, 0, &params), 300_000_000);
        assert_eq!(block_subsidy(1_499_999, ConsensusMode::Pow, 0, &params), 270_750_000);
        assert_eq!(block_subsidy(1_900_000, ConsensusMode::Pow, 0, &params), 257_212_500);
    }

    #[test]
    fn pow_subsidy_adjusts_once_at_pos_activation() {
        let params = consensus_params(Network::Testnet);
        assert_eq!(block_subsidy(989_999, ConsensusMode::Pow, 0, &params), 113_206_075);
        assert_eq!(block_subsidy(990_000, ConsensusMode::Pow, 0, &params), 94_338_395);
        assert_eq!(block_subsidy(1_000_000, ConsensusMode::Pow, 0, &params), 89_621_475);
        assert_eq!(block_subsidy(1_100_000, ConsensusMode::Pow, 0, &params), 80_883_380);
    }

    #[test]
    fn stake_modes_divide_base() {
        let params = consensus_params(Network::Mainnet);
        assert_eq!(block_subsidy(1_924_000, ConsensusMode::Pos, 0, &params), 25_721_250);
        let base = base_subsidy(2_000_000, &params);
        assert_eq!(block_subsidy(2_000_000, ConsensusMode::Dpos, 23, &params), base / 23);
        assert_eq!(block_subsidy(2_000_000, ConsensusMode::Dpos, 0, &params), base);
    }

    #[test]
    fn mst_schedule_parses_and_decays() {
        let schedule = MstSchedule::parse("initial:1000,interval:10,base:50").expect("schedule");
        assert_eq!(schedule.to_content(), "initial:1000,interval:10,base:50");
        let params = consensus_params(Network::Regtest);
        assert_eq!(mst_subsidy(&schedule, 100, 105, ConsensusMode::Pow, 0, &params), 1000);
        assert_eq!(mst_subsidy(&schedule, 100, 110, ConsensusMode::Pow, 0, &params), 500);
        assert_eq!(mst_subsidy(&schedule, 100, 125, ConsensusMode::Pow, 0, &params), 250);
        assert_eq!(mst_subsidy(&schedule, 100, 125, ConsensusMode::Pos, 0, &params), 25);
        assert!(MstSchedule::parse("initial:1000,interval:0,base:50").is_none());
        assert!(MstSchedule::parse("initial:1000,base:50").is_none());
        assert!(MstSchedule::parse("initial:1000,interval:5,base:50,extra:1").is_none());
    }

    #[test]
    fn lock_rewards_only_for_known_periods() {
        let params = consensus_params(Network::Mainnet);
        assert_eq!(lock_reward(25_200, 10_000 * COIN, &params), Some(48 * COIN));
        assert_eq!(lock_height_index(1_314_000, &params), Some(4));
        assert_eq!(lock_reward(25_201, COIN, &params), None);
    }

    #[test]
    fn decay_ends_early_for_long_horizons() {
        assert_eq!(geometric_decay(1_000, 100, 1, u64::MAX), 1_000);
        assert_eq!(geometric_decay(3 * COIN, 99, 1, u64::MAX), 0);
        assert_eq!(geometric_decay(3 * COIN, 0, 1, u64::MAX), 0);
        let schedule = MstSchedule::parse("initial:1000,interval:1,base:100").expect("schedule");
        let params = consensus_params(Network::Regtest);
        assert_eq!(
            mst_subsidy(&schedule, 0, u64::MAX, ConsensusMode::Pow, 0, &params),
            1_000
        );
    }
}
