//! The entry points wallet, RPC and miner layers call into.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use mvsd_chainstate::block::{BlockError, BlockValidator};
use mvsd_chainstate::election::{sync_witness_schedule, ElectionError};
use mvsd_chainstate::ledger::{LedgerError, LedgerStore};
use mvsd_chainstate::reorg::{ChainReorganizer, RollbackInfo};
use mvsd_chainstate::resolver::ValidationScope;
use mvsd_chainstate::validation::{
    TransactionValidator, ValidationContext, ValidationError, ValidationFlags,
};
use mvsd_consensus::{ConsensusMode, ConsensusParams, Hash256};
use mvsd_primitives::block::Block;
use mvsd_primitives::hash::hash_to_hex;
use mvsd_primitives::transaction::Transaction;
use mvsd_storage::KeyValueStore;
use mvsd_witness::{EpochWitnessSchedule, WitnessSchedule};

use crate::assembler::{AssemblerError, AssemblerPolicy, BlockAssembler, MinerKey};
use crate::mempool::{ConfirmHandler, MempoolEntry, MempoolError, TxPool, ValidatedHandler};

#[derive(Debug)]
pub enum NodeError {
    ServiceStopped,
    Validation(ValidationError),
    Mempool(MempoolError),
    Block(BlockError),
    Reorg(RollbackInfo),
    Assembler(AssemblerError),
    Store(LedgerError),
    Election(ElectionError),
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeError::ServiceStopped => write!(f, "service stopped"),
            NodeError::Validation(err) => write!(f, "{err}"),
            NodeError::Mempool(err) => write!(f, "{err}"),
            NodeError::Block(err) => write!(f, "{err}"),
            NodeError::Reorg(info) => write!(f, "{info}"),
            NodeError::Assembler(err) => write!(f, "{err}"),
            NodeError::Store(err) => write!(f, "{err}"),
            NodeError::Election(err) => write!(f, "witness election failed: {err}"),
        }
    }
}

impl std::error::Error for NodeError {}

impl From<ValidationError> for NodeError {
    fn from(err: ValidationError) -> Self {
        NodeError::Validation(err)
    }
}

impl From<MempoolError> for NodeError {
    fn from(err: MempoolError) -> Self {
        NodeError::Mempool(err)
    }
}

impl From<BlockError> for NodeError {
    fn from(err: BlockError) -> Self {
        NodeError::Block(err)
    }
}

impl From<RollbackInfo> for NodeError {
    fn from(info: RollbackInfo) -> Self {
        NodeError::Reorg(info)
    }
}

impl From<AssemblerError> for NodeError {
    fn from(err: AssemblerError) -> Self {
        NodeError::Assembler(err)
    }
}

impl From<LedgerError> for NodeError {
    fn from(err: LedgerError) -> Self {
        NodeError::Store(err)
    }
}

impl From<ElectionError> for NodeError {
    fn from(err: ElectionError) -> Self {
        NodeError::Election(err)
    }
}

/// How the node assembles blocks and sizes its pool.
#[derive(Clone, Debug)]
pub struct NodeOptions {
    pub mode: ConsensusMode,
    pub policy: AssemblerPolicy,
    pub miner_key: Option<MinerKey>,
    pub mining_asset: Option<String>,
    /// Zero leaves the pool unbounded.
    pub mempool_max_bytes: usize,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            mode: ConsensusMode::Pow,
            policy: AssemblerPolicy::default(),
            miner_key: None,
            mining_asset: None,
            mempool_max_bytes: 300 * 1024 * 1024,
        }
    }
}

pub struct Node<S> {
    ledger: Arc<LedgerStore<S>>,
    pool: Arc<TxPool>,
    params: Arc<ConsensusParams>,
    witnesses: Arc<EpochWitnessSchedule>,
    reorganizer: ChainReorganizer<S>,
    assembler: BlockAssembler<S>,
    stopped: Arc<AtomicBool>,
    /// Serializes block submission against chain replacement.
    chain_lock: Mutex<()>,
}

impl<S: KeyValueStore> Node<S> {
    pub fn new(
        ledger: Arc<LedgerStore<S>>,
        params: Arc<ConsensusParams>,
        witnesses: Arc<EpochWitnessSchedule>,
        options: NodeOptions,
    ) -> Self {
        let stopped = Arc::new(AtomicBool::new(false));
        let pool = Arc::new(TxPool::new(options.mempool_max_bytes));
        let schedule: Arc<dyn WitnessSchedule> = witnesses.clone();
        let mut assembler = BlockAssembler::new(
            ledger.clone(),
            pool.clone(),
            params.clone(),
            schedule,
            options.policy,
        )
        .with_mode(options.mode)
        .with_stop_flag(stopped.clone());
        if let Some(key) = options.miner_key {
            assembler = assembler.with_key(key);
        }
        if let Some(symbol) = options.mining_asset {
            assembler = assembler.with_mining_asset(symbol);
        }
        let reorganizer = ChainReorganizer::new(ledger.clone(), params.clone(), witnesses.clone());
        Self {
            ledger,
            pool,
            params,
            witnesses,
            reorganizer,
            assembler,
            stopped,
            chain_lock: Mutex::new(()),
        }
    }

    pub fn ledger(&self) -> &Arc<LedgerStore<S>> {
        &self.ledger
    }

    pub fn pool(&self) -> &Arc<TxPool> {
        &self.pool
    }

    pub fn params(&self) -> &ConsensusParams {
        &self.params
    }

    pub fn assembler(&self) -> &BlockAssembler<S> {
        &self.assembler
    }

    /// Reinstalls the witness list of the epoch holding the tip, as after a restart.
    pub fn restore_witnesses(&self) -> Result<Option<u64>, NodeError> {
        let epoch = sync_witness_schedule(&self.ledger, &self.params, &self.witnesses)?;
        if let Some(epoch_start) = epoch {
            mvsd_log::log_info!(
                "restored {} witness(es) for the epoch at {epoch_start}",
                self.witnesses.witnesses().len()
            );
        }
        Ok(epoch)
    }

    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            mvsd_log::log_info!("node stopping");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn ensure_running(&self) -> Result<(), NodeError> {
        if self.is_stopped() {
            Err(NodeError::ServiceStopped)
        } else {
            Ok(())
        }
    }

    /// Checks `tx` against the chain and the pool without storing it.
    pub fn validate(&self, tx: &Transaction) -> Result<ValidationContext, NodeError> {
        self.ensure_running()?;
        let validator = TransactionValidator::new(&self.ledger, &self.params);
        Ok(validator.validate(
            tx,
            ValidationScope::Pool(self.pool.as_ref()),
            ValidationFlags::standalone(),
        )?)
    }

    /// Validates `tx` and admits it to the pool.
    pub fn broadcast(&self, tx: Transaction) -> Result<Hash256, NodeError> {
        self.broadcast_with_handlers(tx, None, None)
    }

    pub fn broadcast_with_handlers(
        &self,
        tx: Transaction,
        on_confirmed: Option<ConfirmHandler>,
        on_validated: Option<ValidatedHandler>,
    ) -> Result<Hash256, NodeError> {
        let ctx = self.validate(&tx)?;
        let height = self.ledger.top_height()?.unwrap_or(0);
        let txid = self
            .pool
            .store(MempoolEntry::new(tx, &ctx, height), on_confirmed, on_validated)?;
        mvsd_log::log_info!(
            "accepted {} into the pool (fee {}, {} bytes)",
            hash_to_hex(&txid),
            ctx.fee,
            ctx.size
        );
        Ok(txid)
    }

    pub fn create_candidate_block(&self, pay_address: &str) -> Result<Option<Block>, NodeError> {
        self.ensure_running()?;
        Ok(self.assembler.create_candidate(pay_address)?)
    }

    /// Validates a finished block, appends it and clears what it confirmed from
    /// the pool. Returns the new height.
    pub fn submit_mined_block(&self, block: Block) -> Result<u64, NodeError> {
        self.ensure_running()?;
        let _guard = self.chain_lock.lock().unwrap_or_else(|err| err.into_inner());
        let summary = BlockValidator::new(&self.ledger, &self.params, self.witnesses.as_ref())
            .validate(&block)?;
        let height = self.ledger.push(&block)?;
        if self.params.is_begin_of_epoch(height) {
            sync_witness_schedule(&self.ledger, &self.params, &self.witnesses)?;
        }
        self.pool.remove_confirmed(&block);
        mvsd_log::log_info!(
            "appended {} block {} at height {height} ({} txs, fees {})",
            summary.mode.as_str(),
            hash_to_hex(&block.header.hash()),
            block.transactions.len(),
            summary.fees
        );
        Ok(height)
    }

    /// Replaces the chain above `fork_height` with `blocks`, all or nothing.
    pub fn replace_chain(&self, fork_height: u64, blocks: &[Block]) -> Result<usize, NodeError> {
        self.ensure_running()?;
        let _guard = self.chain_lock.lock().unwrap_or_else(|err| err.into_inner());
        let released = self
            .ledger
            .top_height()?
            .is_some_and(|top| top > fork_height);
        let applied = self.reorganizer.replace_chain(fork_height, blocks)?;
        for block in blocks {
            self.pool.remove_confirmed(block);
        }
        if released {
            let evicted = self.revalidate_pool();
            if !evicted.is_empty() {
                mvsd_log::log_info!(
                    "dropped {} pooled transaction(s) invalidated by the new branch",
                    evicted.len()
                );
            }
        }
        Ok(applied)
    }

    /// Re-checks every pooled transaction against the current tip.
    fn revalidate_pool(&self) -> Vec<Hash256> {
        let validator = TransactionValidator::new(&self.ledger, &self.params);
        self.pool.retain_valid(|tx| {
            validator
                .validate(
                    tx,
                    ValidationScope::Pool(self.pool.as_ref()),
                    ValidationFlags::block_assembly(),
                )
                .is_ok()
        })
    }
}
