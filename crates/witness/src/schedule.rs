//! Witness schedule service.

use std::sync::RwLock;

use mvsd_consensus::{ConsensusParams, Hash256};
use secp256k1::PublicKey;

use crate::fts::{elect_witnesses, StakeHolder};

/// Read-only view of who may sign DPoS blocks.
pub trait WitnessSchedule: Send + Sync {
    /// Witnesses active for `height`; zero when DPoS is not active there.
    fn witness_count(&self, height: u64) -> u32;

    /// Public key of the witness whose slot covers `height`.
    fn scheduled_witness(&self, height: u64) -> Option<Vec<u8>>;

    fn is_witness(&self, public_key: &[u8]) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WitnessError {
    InvalidPublicKey(usize),
    DuplicateWitness(usize),
    TooManyWitnesses { got: usize, max: u32 },
    NotEpochStart(u64),
}

impl std::fmt::Display for WitnessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WitnessError::InvalidPublicKey(index) => {
                write!(f, "witness {index} has an invalid public key")
            }
            WitnessError::DuplicateWitness(index) => write!(f, "witness {index} is listed twice"),
            WitnessError::TooManyWitnesses { got, max } => {
                write!(f, "{got} witnesses exceed the limit of {max}")
            }
            WitnessError::NotEpochStart(height) => {
                write!(f, "height {height} does not begin an epoch")
            }
        }
    }
}

impl std::error::Error for WitnessError {}

#[derive(Debug, Default)]
struct EpochState {
    /// First height the list applies to.
    epoch_start: u64,
    witnesses: Vec<Vec<u8>>,
}

/// Holds the witness list elected for the current epoch.
///
/// Slots rotate through the list in order: the witness for `height` is
/// `list[(height - enable_height) % list.len()]`.
pub struct EpochWitnessSchedule {
    enable_height: u64,
    epoch_cycle_height: u64,
    witness_number: u32,
    state: RwLock<EpochState>,
}

impl EpochWitnessSchedule {
    pub fn new(params: &ConsensusParams) -> Self {
        Self {
            enable_height: params.witness.enable_height,
            epoch_cycle_height: params.witness.epoch_cycle_height,
            witness_number: params.witness.witness_number,
            state: RwLock::new(EpochState::default()),
        }
    }

    pub fn is_enabled(&self, height: u64) -> bool {
        height >= self.enable_height
    }

    pub fn is_begin_of_epoch(&self, height: u64) -> bool {
        self.is_enabled(height)
            && self.epoch_cycle_height > 0
            && (height - self.enable_height) % self.epoch_cycle_height == 0
    }

    pub fn epoch_start(&self, height: u64) -> Option<u64> {
        if !self.is_enabled(height) || self.epoch_cycle_height == 0 {
            return None;
        }
        let offset = (height - self.enable_height) % self.epoch_cycle_height;
        Some(height - offset)
    }

    /// Installs the list for the epoch that begins at `epoch_start`.
    pub fn set_witnesses(
        &self,
        epoch_start: u64,
        witnesses: Vec<Vec<u8>>,
    ) -> Result<(), WitnessError> {
        if witnesses.len() > self.witness_number as usize {
            return Err(WitnessError::TooManyWitnesses {
                got: witnesses.len(),
                max: self.witness_number,
            });
        }
        for (index, key) in witnesses.iter().enumerate() {
            if PublicKey::from_slice(key).is_err() {
                return Err(WitnessError::InvalidPublicKey(index));
            }
            if witnesses[..index].contains(key) {
                return Err(WitnessError::DuplicateWitness(index));
            }
        }
        mvsd_log::log_info!(
            "witness list for epoch at {epoch_start}: {} witnesses",
            witnesses.len()
        );
        let mut state = self.state.write().unwrap_or_else(|err| err.into_inner());
        *state = EpochState {
            epoch_start,
            witnesses,
        };
        Ok(())
    }

    /// Runs the stake-weighted election for the epoch beginning at `height`.
    pub fn elect(
        &self,
        height: u64,
        holders: &[StakeHolder],
        seed: &Hash256,
    ) -> Result<Vec<Vec<u8>>, WitnessError> {
        if !self.is_begin_of_epoch(height) {
            return Err(WitnessError::NotEpochStart(height));
        }
        let elected = elect_witnesses(holders, seed, self.witness_number as usize);
        self.set_witnesses(height, elected.clone())?;
        Ok(elected)
    }

    /// Drops the installed list, as when the chain falls below the first epoch.
    pub fn reset(&self) {
        let mut state = self.state.write().unwrap_or_else(|err| err.into_inner());
        *state = EpochState::default();
    }

    pub fn witnesses(&self) -> Vec<Vec<u8>> {
        self.read_state().witnesses.clone()
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, EpochState> {
        self.state.read().unwrap_or_else(|err| err.into_inner())
    }
}

impl WitnessSchedule for EpochWitnessSchedule {
    fn witness_count(&self, height: u64) -> u32 {
        if !self.is_enabled(height) {
            return 0;
        }
        self.read_state().witnesses.len() as u32
    }

    fn scheduled_witness(&self, height: u64) -> Option<Vec<u8>> {
        if !self.is_enabled(height) {
            return None;
        }
        let state = self.read_state();
        if state.witnesses.is_empty() || height < state.epoch_start {
            return None;
        }
        let slot = (height - self.enable_height) % state.witnesses.len() as u64;
        state.witnesses.get(slot as usize).cloned()
    }

    fn is_witness(&self, public_key: &[u8]) -> bool {
        !public_key.is_empty()
            && self
                .read_state()
                .witnesses
                .iter()
                .any(|witness| witness.as_slice() == public_key)
    }
}
