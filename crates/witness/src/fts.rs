//! Follow-the-satoshi witness election.

use mvsd_consensus::money::Amount;
use mvsd_consensus::Hash256;
use mvsd_primitives::hash::sha256d;
use secp256k1::PublicKey;

/// Candidates beyond this many (by stake) are not eligible.
pub const MAX_CANDIDATE_COUNT: usize = 1000;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StakeHolder {
    pub public_key: Vec<u8>,
    pub stake: Amount,
}

/// Picks `count` distinct holders, each draw weighted by stake.
///
/// Draws come from a sha256d chain over `seed`, so every node elects the same list.
/// With `count` or fewer holders all of them are returned in their given order.
pub fn select_by_fts(holders: &[StakeHolder], seed: &Hash256, count: usize) -> Vec<StakeHolder> {
    let mut pool: Vec<StakeHolder> = holders
        .iter()
        .filter(|holder| holder.stake > 0)
        .cloned()
        .collect();
    if pool.len() <= count {
        return pool;
    }
    pool.sort_by(|a, b| {
        b.stake
            .cmp(&a.stake)
            .then_with(|| a.public_key.cmp(&b.public_key))
    });
    pool.truncate(MAX_CANDIDATE_COUNT);

    let mut state = *seed;
    let mut selected = Vec::with_capacity(count);
    while selected.len() < count && !pool.is_empty() {
        state = sha256d(&state);
        let total: u128 = pool.iter().map(|holder| holder.stake as u128).sum();
        let mut word = [0u8; 16];
        word.copy_from_slice(&state[..16]);
        let mut draw = u128::from_le_bytes(word) % total;
        let mut index = 0;
        for (position, holder) in pool.iter().enumerate() {
            if draw < holder.stake as u128 {
                index = position;
                break;
            }
            draw -= holder.stake as u128;
        }
        selected.push(pool.remove(index));
    }
    selected
}

/// Public keys of the witnesses drawn for an epoch. Holders whose key does not
/// parse never stand.
pub fn elect_witnesses(holders: &[StakeHolder], seed: &Hash256, count: usize) -> Vec<Vec<u8>> {
    let eligible: Vec<StakeHolder> = holders
        .iter()
        .filter(|holder| PublicKey::from_slice(&holder.public_key).is_ok())
        .cloned()
        .collect();
    select_by_fts(&eligible, seed, count)
        .into_iter()
        .map(|holder| holder.public_key)
        .collect()
}
