//! Monetary units and money range rules.

pub type Amount = u64;

pub const COIN: Amount = 100_000_000;

/// Total coin that will ever exist; no output or sum may exceed it.
pub const MAX_MONEY: Amount = 100_000_000 * COIN;

pub const DEFAULT_MIN_TX_FEE: Amount = 10_000;
pub const MIN_FEE_TO_ISSUE_ASSET: Amount = 10 * COIN;
pub const MIN_FEE_TO_REGISTER_DID: Amount = COIN;

/// Fee rate below which a transaction counts as free during block assembly.
pub const MIN_TX_FEE_PER_KB: Amount = 1_000;

/// Coin-age priority floor (one coin, 144 blocks old, in a 250 byte transaction).
pub const FREE_PRIORITY_THRESHOLD: f64 = (COIN as f64) * 144.0 / 250.0;

pub fn money_range(value: Amount) -> bool {
    value <= MAX_MONEY
}

/// Adds two amounts, failing on overflow or when the sum leaves the money range.
pub fn checked_money_add(a: Amount, b: Amount) -> Option<Amount> {
    a.checked_add(b).filter(|sum| money_range(*sum))
}
