//! Witness elections read from the ledger.
//!
//! A candidate registers by paying the address held by the `witness_registry`
//! identity. The first input of the registering transaction reveals the
//! candidate's public key; its stake is the lock-height deposits the same
//! transaction pays back to that key. Only deposits still locked
//! `register_lock_height` blocks past the epoch start, and unspent before it, count.
//!
//! Everything is evaluated as of the block before the epoch start, so the list
//! for an epoch can be recomputed at any later tip.

use std::collections::{BTreeMap, HashSet};

use mvsd_consensus::money::Amount;
use mvsd_consensus::{ConsensusParams, Hash256};
use mvsd_primitives::address::{p2pkh_script, split_lock_prefix, PaymentAddress};
use mvsd_primitives::hash::hash160;
use mvsd_primitives::outpoint::OutPoint;
use mvsd_primitives::transaction::Transaction;
use mvsd_script::interpreter::pushed_items;
use mvsd_script::lock_height_from_script;
use mvsd_storage::KeyValueStore;
use mvsd_witness::{elect_witnesses, EpochWitnessSchedule, StakeHolder, WitnessError};

use crate::ledger::{LedgerError, LedgerStore};

pub const WITNESS_REGISTRY_DID: &str = "witness_registry";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElectionError {
    Store(LedgerError),
    Witness(WitnessError),
}

impl std::fmt::Display for ElectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ElectionError::Store(err) => write!(f, "{err}"),
            ElectionError::Witness(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ElectionError {}

impl From<LedgerError> for ElectionError {
    fn from(err: LedgerError) -> Self {
        ElectionError::Store(err)
    }
}

impl From<WitnessError> for ElectionError {
    fn from(err: WitnessError) -> Self {
        ElectionError::Witness(err)
    }
}

/// Registered candidates and their qualifying stake for the epoch at `epoch_start`,
/// ordered by public key.
pub fn registered_stakeholders<S: KeyValueStore>(
    ledger: &LedgerStore<S>,
    params: &ConsensusParams,
    epoch_start: u64,
) -> Result<Vec<StakeHolder>, LedgerError> {
    let Some(registry) = ledger.did(WITNESS_REGISTRY_DID)? else {
        return Ok(Vec::new());
    };
    if registry.height >= epoch_start {
        return Ok(Vec::new());
    }
    let Ok(address) = PaymentAddress::parse(&registry.did.address, params.network) else {
        mvsd_log::log_warn!(
            "witness registry address {} does not parse",
            registry.did.address
        );
        return Ok(Vec::new());
    };

    let unlock_floor = epoch_start.saturating_add(params.witness.register_lock_height);
    let mut stakes: BTreeMap<Vec<u8>, Amount> = BTreeMap::new();
    let mut seen = HashSet::new();
    for outpoint in ledger.outputs_for_script(&address.script_pubkey())? {
        if !seen.insert(outpoint.hash) {
            continue;
        }
        let Some(confirmed) = ledger.get_transaction(&outpoint.hash)? else {
            continue;
        };
        if confirmed.height >= epoch_start || confirmed.tx.is_coinbase() {
            continue;
        }
        let Some(public_key) = registrant_key(&confirmed.tx) else {
            continue;
        };
        let owner = p2pkh_script(&hash160(&public_key));
        let mut stake: Amount = 0;
        for (index, output) in confirmed.tx.outputs.iter().enumerate() {
            let Some(lock_height) = lock_height_from_script(&output.script_pubkey) else {
                continue;
            };
            let pays_registrant = split_lock_prefix(&output.script_pubkey)
                .is_some_and(|(_, rest)| rest == owner.as_slice());
            if !pays_registrant || confirmed.height.saturating_add(lock_height) < unlock_floor {
                continue;
            }
            let deposit = OutPoint::new(outpoint.hash, index as u32);
            let spent_before = ledger
                .get_spender(&deposit)?
                .is_some_and(|spender| spender.height < epoch_start);
            if !spent_before {
                stake = stake.saturating_add(output.value);
            }
        }
        if stake > 0 {
            let total = stakes.entry(public_key).or_default();
            *total = total.saturating_add(stake);
        }
    }

    Ok(stakes
        .into_iter()
        .filter(|(_, stake)| *stake >= params.witness.lock_threshold)
        .map(|(public_key, stake)| StakeHolder { public_key, stake })
        .collect())
}

/// The last push of the first input's `script_sig`.
fn registrant_key(tx: &Transaction) -> Option<Vec<u8>> {
    let input = tx.inputs.first()?;
    let key = pushed_items(&input.script_sig)?.pop()?;
    matches!(key.len(), 33 | 65).then_some(key)
}

/// Election seed: the hash of the block before the epoch start.
fn election_seed<S: KeyValueStore>(
    ledger: &LedgerStore<S>,
    epoch_start: u64,
) -> Result<Option<Hash256>, LedgerError> {
    match epoch_start.checked_sub(1) {
        Some(previous) => ledger.block_hash(previous),
        None => Ok(None),
    }
}

/// The ordered witness list for the epoch beginning at `epoch_start`.
pub fn elect_for_epoch<S: KeyValueStore>(
    ledger: &LedgerStore<S>,
    params: &ConsensusParams,
    epoch_start: u64,
) -> Result<Vec<Vec<u8>>, LedgerError> {
    let Some(seed) = election_seed(ledger, epoch_start)? else {
        return Ok(Vec::new());
    };
    let holders = registered_stakeholders(ledger, params, epoch_start)?;
    Ok(elect_witnesses(
        &holders,
        &seed,
        params.witness.witness_number as usize,
    ))
}

/// Installs the list for the epoch that contains the current tip, or clears the
/// schedule when the tip is below the first epoch. Returns the epoch start installed.
pub fn sync_witness_schedule<S: KeyValueStore>(
    ledger: &LedgerStore<S>,
    params: &ConsensusParams,
    schedule: &EpochWitnessSchedule,
) -> Result<Option<u64>, ElectionError> {
    let epoch_start = ledger
        .top_height()?
        .and_then(|top| schedule.epoch_start(top));
    let Some(epoch_start) = epoch_start else {
        schedule.reset();
        return Ok(None);
    };
    let elected = elect_for_epoch(ledger, params, epoch_start)?;
    schedule.set_witnesses(epoch_start, elected)?;
    Ok(Some(epoch_start))
}
