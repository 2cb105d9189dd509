//! All-or-nothing replacement of the chain above a fork point.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use mvsd_consensus::ConsensusParams;
use mvsd_primitives::attachment::Attachment;
use mvsd_primitives::block::Block;
use mvsd_storage::KeyValueStore;
use mvsd_witness::EpochWitnessSchedule;

use crate::block::{BlockError, BlockValidator};
use crate::election::{sync_witness_schedule, ElectionError};
use crate::ledger::{LedgerError, LedgerStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReorgError {
    Store(LedgerError),
    /// `fork_height` is above the current tip.
    ForkAboveTip { fork_height: u64, top: Option<u64> },
    /// The first replacement block does not build on the block at `fork_height`.
    ForkDisconnected,
    Block(BlockError),
    /// A secondary issue of this symbol already landed earlier in the same replacement.
    CompetingSecondaryIssue(String),
    Election(ElectionError),
}

impl std::fmt::Display for ReorgError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReorgError::Store(err) => write!(f, "{err}"),
            ReorgError::ForkAboveTip { fork_height, top } => match top {
                Some(top) => write!(f, "fork height {fork_height} above tip {top}"),
                None => write!(f, "fork height {fork_height} on an empty chain"),
            },
            ReorgError::ForkDisconnected => {
                write!(f, "replacement does not connect to the fork point")
            }
            ReorgError::Block(err) => write!(f, "{err}"),
            ReorgError::CompetingSecondaryIssue(symbol) => {
                write!(f, "competing secondary issue of {symbol}")
            }
            ReorgError::Election(err) => write!(f, "witness election failed: {err}"),
        }
    }
}

impl std::error::Error for ReorgError {}

impl From<LedgerError> for ReorgError {
    fn from(err: LedgerError) -> Self {
        ReorgError::Store(err)
    }
}

/// Why a replacement was abandoned and whether the original chain came back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackInfo {
    /// Index into the replacement blocks of the block that failed.
    pub failed_index: usize,
    pub reason: ReorgError,
    /// Set when the original blocks could not all be pushed back.
    pub restore_error: Option<LedgerError>,
}

impl std::fmt::Display for RollbackInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "replacement block {} rejected: {}", self.failed_index, self.reason)?;
        if let Some(err) = &self.restore_error {
            write!(f, " (restore failed: {err})")?;
        }
        Ok(())
    }
}

impl std::error::Error for RollbackInfo {}

pub struct ChainReorganizer<S> {
    ledger: Arc<LedgerStore<S>>,
    params: Arc<ConsensusParams>,
    witnesses: Arc<EpochWitnessSchedule>,
    /// Held for the whole of one replacement; the released blocks never leave it.
    lock: Mutex<()>,
}

impl<S: KeyValueStore> ChainReorganizer<S> {
    pub fn new(
        ledger: Arc<LedgerStore<S>>,
        params: Arc<ConsensusParams>,
        witnesses: Arc<EpochWitnessSchedule>,
    ) -> Self {
        Self {
            ledger,
            params,
            witnesses,
            lock: Mutex::new(()),
        }
    }

    /// Replaces every block above `fork_height` with `blocks`.
    ///
    /// Returns the number of blocks applied. On any failure the chain is restored
    /// to exactly its previous blocks.
    pub fn replace_chain(&self, fork_height: u64, blocks: &[Block]) -> Result<usize, RollbackInfo> {
        let _guard = self.lock.lock().unwrap_or_else(|err| err.into_inner());
        let fail_early = |reason: ReorgError| RollbackInfo {
            failed_index: 0,
            reason,
            restore_error: None,
        };

        let top = self.ledger.top_height().map_err(|err| fail_early(err.into()))?;
        if top.map_or(true, |top| top < fork_height) {
            return Err(fail_early(ReorgError::ForkAboveTip { fork_height, top }));
        }
        let fork_hash = self
            .ledger
            .block_hash(fork_height)
            .map_err(|err| fail_early(err.into()))?;
        if let Some(first) = blocks.first() {
            if Some(first.header.prev_hash) != fork_hash {
                return Err(fail_early(ReorgError::ForkDisconnected));
            }
        }

        let released = self
            .release_above(fork_height)
            .map_err(|err| fail_early(err.into()))?;
        if !released.is_empty() {
            mvsd_log::log_warn!(
                "reorganizing: released {} blocks above height {fork_height}, applying {}",
                released.len(),
                blocks.len()
            );
        }

        match self.apply(blocks) {
            Ok(applied) => {
                if let Err(err) = sync_witness_schedule(&self.ledger, &self.params, &self.witnesses)
                {
                    mvsd_log::log_error!("witness schedule out of date after reorg: {err}");
                }
                Ok(applied)
            }
            Err((failed_index, reason)) => {
                mvsd_log::log_warn!(
                    "replacement block {failed_index} rejected ({reason}); restoring {} blocks",
                    released.len()
                );
                let restore_error = self.restore(fork_height, &released).err();
                if let Some(err) = &restore_error {
                    mvsd_log::log_error!("failed to restore chain after rejected reorg: {err}");
                }
                if let Err(err) = sync_witness_schedule(&self.ledger, &self.params, &self.witnesses)
                {
                    mvsd_log::log_error!("witness schedule out of date after restore: {err}");
                }
                Err(RollbackInfo {
                    failed_index,
                    reason,
                    restore_error,
                })
            }
        }
    }

    /// Pops down to `fork_height` and returns the popped blocks lowest first.
    fn release_above(&self, fork_height: u64) -> Result<Vec<Block>, LedgerError> {
        let mut released = Vec::new();
        while self.ledger.top_height()?.is_some_and(|top| top > fork_height) {
            released.push(self.ledger.pop()?);
        }
        released.reverse();
        Ok(released)
    }

    fn apply(&self, blocks: &[Block]) -> Result<usize, (usize, ReorgError)> {
        let validator = BlockValidator::new(&self.ledger, &self.params, self.witnesses.as_ref());
        let mut secondary_issued: HashSet<String> = HashSet::new();
        for (index, block) in blocks.iter().enumerate() {
            validator
                .validate(block)
                .map_err(|err| (index, ReorgError::Block(err)))?;
            for symbol in secondary_issues(block) {
                if !secondary_issued.insert(symbol.to_string()) {
                    return Err((index, ReorgError::CompetingSecondaryIssue(symbol.to_string())));
                }
            }
            self.ledger
                .push(block)
                .map_err(|err| (index, ReorgError::Store(err)))?;
            if self.params.is_begin_of_epoch(block.header.height) {
                sync_witness_schedule(&self.ledger, &self.params, &self.witnesses)
                    .map_err(|err| (index, ReorgError::Election(err)))?;
            }
        }
        if let Some(last) = blocks.last() {
            mvsd_log::log_info!(
                "chain replaced up to height {} with {} blocks",
                last.header.height,
                blocks.len()
            );
        }
        Ok(blocks.len())
    }

    fn restore(&self, fork_height: u64, released: &[Block]) -> Result<(), LedgerError> {
        self.release_above(fork_height)?;
        for block in released {
            self.ledger.push(block)?;
        }
        Ok(())
    }
}

fn secondary_issues(block: &Block) -> impl Iterator<Item = &str> {
    block
        .transactions
        .iter()
        .flat_map(|tx| tx.outputs.iter())
        .filter_map(|output| match &output.attachment {
            Attachment::AssetSecondaryIssue(detail) => Some(detail.symbol.as_str()),
            _ => None,
        })
}
