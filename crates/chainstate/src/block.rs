//! Block-level validation against the current tip.

use std::time::{SystemTime, UNIX_EPOCH};

use mvsd_consensus::constants::{MAX_BLOCK_SIGOPS, MAX_BLOCK_SIZE};
use mvsd_consensus::money::{checked_money_add, Amount};
use mvsd_consensus::{
    block_subsidy, lock_reward, mst_subsidy, ConsensusMode, ConsensusParams, Hash256, MstSchedule,
};
use mvsd_pos::{verify_header_signature, verify_stake, SignatureError, StakeError, StakeInput};
use mvsd_pow::difficulty::{next_work_required, CompactError};
use mvsd_pow::{validate_pow_header, PowError};
use mvsd_primitives::address::p2pkh_script;
use mvsd_primitives::attachment::{Attachment, CertType};
use mvsd_primitives::block::{merkle_root, Block};
use mvsd_primitives::hash::{hash160, hash_to_hex};
use mvsd_primitives::transaction::Transaction;
use mvsd_script::interpreter::BLOCK_SCRIPT_VERIFY_FLAGS;
use mvsd_script::standard::{p2pkh_with_lock_height, transaction_sigops};
use mvsd_script::{lock_height_from_script, verify_script, ScriptError};
use mvsd_storage::KeyValueStore;
use mvsd_witness::{verify_vote_result, WitnessSchedule};
use rayon::prelude::*;

use crate::election::elect_for_epoch;
use crate::ledger::{LedgerError, LedgerStore};
use crate::resolver::{CandidateView, ValidationScope};
use crate::validation::{TransactionValidator, ValidationError, ValidationFlags};

/// Seconds a header timestamp may run ahead of the local clock.
pub const MAX_FUTURE_BLOCK_TIME: u32 = 2 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    Store(LedgerError),
    HeightMismatch { expected: u64, got: u64 },
    PrevHashMismatch,
    UnknownVersion(u32),
    ModeNotAllowed { mode: ConsensusMode, height: u64 },
    TimeTooOld,
    TimeTooNew,
    BadMerkleRoot,
    MutatedMerkleRoot,
    NoTransactions,
    MissingCoinbase,
    MisplacedCoinbase(usize),
    MissingCoinstake,
    StakeNotFound,
    StakeNotOwned,
    NoQualifyingDeposit,
    Stake(StakeError),
    Signature(SignatureError),
    UnexpectedSignature,
    PreviousNotProofOfWork,
    BlockGapTooShort,
    NotScheduledWitness,
    Pow(PowError),
    Compact(CompactError),
    BadBits { expected: u32, got: u32 },
    CoinbaseValueTooLarge { allowed: Amount, got: Amount },
    MiningSubsidyTooLarge,
    EpochBlockHasTransactions,
    BadVoteResult,
    SizeLimitExceeded,
    SigopLimitExceeded,
    Transaction { index: usize, error: ValidationError },
    Script { index: usize, input: usize, error: ScriptError },
}

impl std::fmt::Display for BlockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockError::Store(err) => write!(f, "{err}"),
            BlockError::HeightMismatch { expected, got } => {
                write!(f, "block height {got} does not extend tip (expected {expected})")
            }
            BlockError::PrevHashMismatch => write!(f, "block does not build on the tip"),
            BlockError::UnknownVersion(version) => write!(f, "unknown block version {version}"),
            BlockError::ModeNotAllowed { mode, height } => {
                write!(f, "{} blocks are not allowed at height {height}", mode.as_str())
            }
            BlockError::TimeTooOld => write!(f, "block time not after median time past"),
            BlockError::TimeTooNew => write!(f, "block time too far in the future"),
            BlockError::BadMerkleRoot => write!(f, "merkle root mismatch"),
            BlockError::MutatedMerkleRoot => write!(f, "duplicate transactions in merkle tree"),
            BlockError::NoTransactions => write!(f, "block has no transactions"),
            BlockError::MissingCoinbase => write!(f, "first transaction is not a coinbase"),
            BlockError::MisplacedCoinbase(index) => {
                write!(f, "coinbase-form transaction at position {index}")
            }
            BlockError::MissingCoinstake => write!(f, "stake block lacks a coinstake"),
            BlockError::StakeNotFound => write!(f, "staked output not found"),
            BlockError::StakeNotOwned => write!(f, "staked output does not belong to the signer"),
            BlockError::NoQualifyingDeposit => write!(f, "signer holds no qualifying deposit"),
            BlockError::Stake(err) => write!(f, "{err}"),
            BlockError::Signature(err) => write!(f, "{err}"),
            BlockError::UnexpectedSignature => write!(f, "proof-of-work block carries a signature"),
            BlockError::PreviousNotProofOfWork => {
                write!(f, "delegated block must follow a proof-of-work block")
            }
            BlockError::BlockGapTooShort => write!(f, "delegated block follows too quickly"),
            BlockError::NotScheduledWitness => write!(f, "signer is not the scheduled witness"),
            BlockError::Pow(err) => write!(f, "{err}"),
            BlockError::Compact(err) => write!(f, "{err}"),
            BlockError::BadBits { expected, got } => {
                write!(f, "bits {got:08x} do not match required {expected:08x}")
            }
            BlockError::CoinbaseValueTooLarge { allowed, got } => {
                write!(f, "coinbase pays {got}, allowed {allowed}")
            }
            BlockError::MiningSubsidyTooLarge => write!(f, "mining asset subsidy too large"),
            BlockError::EpochBlockHasTransactions => {
                write!(f, "epoch block carries regular transactions")
            }
            BlockError::BadVoteResult => write!(f, "epoch block vote result mismatch"),
            BlockError::SizeLimitExceeded => write!(f, "block too large"),
            BlockError::SigopLimitExceeded => write!(f, "block exceeds sigop limit"),
            BlockError::Transaction { index, error } => write!(f, "transaction {index}: {error}"),
            BlockError::Script {
                index,
                input,
                error,
            } => write!(f, "transaction {index} input {input}: {error}"),
        }
    }
}

impl std::error::Error for BlockError {}

impl From<LedgerError> for BlockError {
    fn from(err: LedgerError) -> Self {
        BlockError::Store(err)
    }
}

impl From<PowError> for BlockError {
    fn from(err: PowError) -> Self {
        BlockError::Pow(err)
    }
}

impl From<CompactError> for BlockError {
    fn from(err: CompactError) -> Self {
        BlockError::Compact(err)
    }
}

/// Totals of a block that passed validation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BlockSummary {
    pub height: u64,
    pub mode: ConsensusMode,
    pub fees: Amount,
    pub sigops: u32,
    pub size: usize,
}

/// Compact target the next block of `mode` must carry.
pub fn next_target_bits<S: KeyValueStore>(
    ledger: &LedgerStore<S>,
    mode: ConsensusMode,
    params: &ConsensusParams,
) -> Result<u32, BlockError> {
    let (spacing, limit) = match mode {
        ConsensusMode::Pow => (params.pow_target_spacing, params.pow_limit_bits),
        ConsensusMode::Pos | ConsensusMode::Dpos => {
            (params.pos.target_spacing, params.pos.stake_limit_bits)
        }
    };
    if mode == ConsensusMode::Dpos {
        return Ok(limit);
    }
    let (last, before_last) = ledger.recent_of_mode(mode)?;
    Ok(next_work_required(
        last.as_ref(),
        before_last.as_ref(),
        spacing,
        limit,
    )?)
}

/// Whether the holder of `pubkey_hash` has enough value locked, unspent and still
/// locked at `height`, to be allowed to stake.
pub fn has_qualifying_deposit<S: KeyValueStore>(
    ledger: &LedgerStore<S>,
    pubkey_hash: &[u8; 20],
    height: u64,
    params: &ConsensusParams,
) -> Result<bool, LedgerError> {
    let mut locked: Amount = 0;
    for lock_height in params.lock_rewards.lock_heights {
        if lock_height < params.pos.min_lock_height {
            continue;
        }
        let script = p2pkh_with_lock_height(pubkey_hash, lock_height);
        for deposit in ledger.unspent_outputs_for_script(&script)? {
            if deposit.height.saturating_add(lock_height) > height {
                locked = locked.saturating_add(deposit.output.value);
            }
        }
    }
    Ok(locked >= params.pos.min_lock_value)
}

/// Sum of the deposit rewards a transaction's lock-height outputs earn.
pub fn lock_rewards_of(tx: &Transaction, params: &ConsensusParams) -> Amount {
    tx.outputs
        .iter()
        .filter_map(|output| {
            let lock_height = lock_height_from_script(&output.script_pubkey)?;
            lock_reward(lock_height, output.value, params)
        })
        .fold(0, Amount::saturating_add)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

pub struct BlockValidator<'a, S> {
    ledger: &'a LedgerStore<S>,
    params: &'a ConsensusParams,
    witnesses: &'a dyn WitnessSchedule,
}

impl<'a, S: KeyValueStore> BlockValidator<'a, S> {
    pub fn new(
        ledger: &'a LedgerStore<S>,
        params: &'a ConsensusParams,
        witnesses: &'a dyn WitnessSchedule,
    ) -> Self {
        Self {
            ledger,
            params,
            witnesses,
        }
    }

    /// Checks that `block` may be pushed on the current tip. Nothing is written.
    pub fn validate(&self, block: &Block) -> Result<BlockSummary, BlockError> {
        let header = &block.header;
        let tip = self.ledger.tip()?;
        let height = tip.map_or(0, |tip| tip.height + 1);
        if header.height != height {
            return Err(BlockError::HeightMismatch {
                expected: height,
                got: header.height,
            });
        }
        if header.prev_hash != tip.map_or([0u8; 32], |tip| tip.hash) {
            return Err(BlockError::PrevHashMismatch);
        }
        let mode = header
            .mode()
            .ok_or(BlockError::UnknownVersion(header.version))?;
        if !mode.allowed_at(height, self.params) {
            return Err(BlockError::ModeNotAllowed { mode, height });
        }
        self.check_time(block, height)?;

        if block.transactions.is_empty() {
            return Err(BlockError::NoTransactions);
        }
        let size = block.serialized_size();
        if size > MAX_BLOCK_SIZE as usize {
            return Err(BlockError::SizeLimitExceeded);
        }
        let txids: Vec<Hash256> = block.transactions.par_iter().map(Transaction::txid).collect();
        let (root, mutated) = merkle_root(&txids);
        if mutated {
            return Err(BlockError::MutatedMerkleRoot);
        }
        if root != header.merkle_root {
            return Err(BlockError::BadMerkleRoot);
        }
        let sigops = block
            .transactions
            .iter()
            .map(transaction_sigops)
            .fold(0u32, u32::saturating_add);
        if sigops > MAX_BLOCK_SIGOPS {
            return Err(BlockError::SigopLimitExceeded);
        }

        let layout = self.check_layout(block, mode)?;
        match mode {
            ConsensusMode::Pow => self.check_pow(block)?,
            ConsensusMode::Pos => self.check_pos(block, height)?,
            ConsensusMode::Dpos => self.check_dpos(block, height)?,
        }

        let epoch_start = self.params.is_begin_of_epoch(height);
        if epoch_start {
            if block.transactions.len() != 1 {
                return Err(BlockError::EpochBlockHasTransactions);
            }
            let elected = elect_for_epoch(self.ledger, self.params, height)?;
            if !verify_vote_result(&block.transactions[0], &elected) {
                return Err(BlockError::BadVoteResult);
            }
        }

        let fees = self.check_transactions(block, height, &layout)?;
        self.check_rewards(block, height, mode, fees, &layout)?;
        mvsd_log::log_debug!(
            "block {} at {height} valid: {} txs, fees {fees}",
            hash_to_hex(&header.hash()),
            block.transactions.len()
        );
        Ok(BlockSummary {
            height,
            mode,
            fees,
            sigops,
            size,
        })
    }

    fn check_time(&self, block: &Block, height: u64) -> Result<(), BlockError> {
        let timestamp = block.header.timestamp;
        if let Some(top) = height.checked_sub(1) {
            if let Some(median) = self.ledger.median_time_past(top)? {
                if timestamp <= median {
                    return Err(BlockError::TimeTooOld);
                }
            }
        }
        if u64::from(timestamp) > unix_now() + u64::from(MAX_FUTURE_BLOCK_TIME) {
            return Err(BlockError::TimeTooNew);
        }
        Ok(())
    }

    /// Coinbase first, coinstake second for stake blocks, then coinbase-form reward
    /// transactions, then regular transactions.
    fn check_layout(&self, block: &Block, mode: ConsensusMode) -> Result<Layout, BlockError> {
        let txs = &block.transactions;
        if !txs[0].is_coinbase() {
            return Err(BlockError::MissingCoinbase);
        }
        let mut next = 1;
        let coinstake = if mode == ConsensusMode::Pos {
            match txs.get(1) {
                Some(tx) if tx.is_coinstake() => {
                    next = 2;
                    true
                }
                _ => return Err(BlockError::MissingCoinstake),
            }
        } else {
            false
        };
        let reward_end = next
            + txs[next..]
                .iter()
                .take_while(|tx| tx.is_coinbase())
                .count();
        if let Some(offset) = txs[reward_end..].iter().position(Transaction::is_coinbase) {
            return Err(BlockError::MisplacedCoinbase(reward_end + offset));
        }
        Ok(Layout {
            coinstake,
            reward_end,
        })
    }

    fn check_pow(&self, block: &Block) -> Result<(), BlockError> {
        let header = &block.header;
        if !header.signature.is_empty() || !header.public_key.is_empty() {
            return Err(BlockError::UnexpectedSignature);
        }
        let expected = next_target_bits(self.ledger, ConsensusMode::Pow, self.params)?;
        if header.bits != expected {
            return Err(BlockError::BadBits {
                expected,
                got: header.bits,
            });
        }
        validate_pow_header(header, self.params)?;
        Ok(())
    }

    fn check_pos(&self, block: &Block, height: u64) -> Result<(), BlockError> {
        let header = &block.header;
        verify_header_signature(header).map_err(BlockError::Signature)?;
        let expected = next_target_bits(self.ledger, ConsensusMode::Pos, self.params)?;
        if header.bits != expected {
            return Err(BlockError::BadBits {
                expected,
                got: header.bits,
            });
        }
        let coinstake = &block.transactions[1];
        let outpoint = &coinstake.inputs[0].prevout;
        let staked = self
            .ledger
            .get_transaction(&outpoint.hash)?
            .ok_or(BlockError::StakeNotFound)?;
        let output = staked
            .tx
            .outputs
            .get(outpoint.index as usize)
            .ok_or(BlockError::StakeNotFound)?;
        let signer = hash160(&header.public_key);
        if output.script_pubkey != p2pkh_script(&signer) {
            return Err(BlockError::StakeNotOwned);
        }
        if !has_qualifying_deposit(self.ledger, &signer, height, self.params)? {
            return Err(BlockError::NoQualifyingDeposit);
        }
        verify_stake(
            &header.prev_hash,
            height,
            header.timestamp,
            header.bits,
            &StakeInput {
                outpoint: outpoint.clone(),
                value: output.value,
                height: staked.height,
            },
            self.params,
        )
        .map_err(BlockError::Stake)
    }

    fn check_dpos(&self, block: &Block, height: u64) -> Result<(), BlockError> {
        let header = &block.header;
        let previous = self
            .ledger
            .get_header(height.saturating_sub(1))?
            .ok_or(BlockError::PreviousNotProofOfWork)?;
        if previous.mode() != Some(ConsensusMode::Pow) {
            return Err(BlockError::PreviousNotProofOfWork);
        }
        let gap = self.params.witness.min_block_gap_secs;
        if header.timestamp < previous.timestamp.saturating_add(gap) {
            return Err(BlockError::BlockGapTooShort);
        }
        let scheduled = self.witnesses.scheduled_witness(height);
        if scheduled.as_deref() != Some(header.public_key.as_slice()) {
            return Err(BlockError::NotScheduledWitness);
        }
        let expected = next_target_bits(self.ledger, ConsensusMode::Dpos, self.params)?;
        if header.bits != expected {
            return Err(BlockError::BadBits {
                expected,
                got: header.bits,
            });
        }
        verify_header_signature(header).map_err(BlockError::Signature)
    }

    /// Validates every non-coinbase transaction in order and returns the fee total.
    ///
    /// Structural checks run sequentially against a growing candidate view; the
    /// deferred script checks then run in parallel.
    fn check_transactions(
        &self,
        block: &Block,
        height: u64,
        layout: &Layout,
    ) -> Result<Amount, BlockError> {
        let validator = TransactionValidator::new(self.ledger, self.params);
        let flags = ValidationFlags {
            check_script: false,
            ..ValidationFlags::block_assembly()
        };
        let mut view = CandidateView::new(height);
        let mut fees: Amount = 0;
        let mut script_checks = Vec::new();
        for (index, tx) in block.transactions.iter().enumerate() {
            if tx.is_coinbase() {
                view.apply(tx);
                continue;
            }
            let scope = ValidationScope::Candidate(&view);
            let result = if index == 1 && layout.coinstake {
                validator.validate_coinstake(tx, scope, flags)
            } else {
                validator.validate(tx, scope, flags)
            };
            let ctx = result.map_err(|error| BlockError::Transaction { index, error })?;
            fees = checked_money_add(fees, ctx.fee).ok_or(BlockError::Transaction {
                index,
                error: ValidationError::FeesOutOfRange,
            })?;
            for (input, script_pubkey) in ctx.input_scripts.into_iter().enumerate() {
                script_checks.push(ScriptCheck {
                    tx_index: index,
                    input_index: input,
                    script_pubkey,
                });
            }
            view.apply(tx);
        }

        script_checks
            .par_iter()
            .try_for_each(|check| {
                let tx = &block.transactions[check.tx_index];
                verify_script(
                    &tx.inputs[check.input_index].script_sig,
                    &check.script_pubkey,
                    tx,
                    check.input_index,
                    BLOCK_SCRIPT_VERIFY_FLAGS,
                )
                .map_err(|error| BlockError::Script {
                    index: check.tx_index,
                    input: check.input_index,
                    error,
                })
            })
            .inspect_err(|err| mvsd_log::log_warn!("block script check failed: {err}"))?;
        Ok(fees)
    }

    fn check_rewards(
        &self,
        block: &Block,
        height: u64,
        mode: ConsensusMode,
        fees: Amount,
        layout: &Layout,
    ) -> Result<(), BlockError> {
        let witness_count = self.witnesses.witness_count(height);
        let mut allowed = checked_money_add(
            fees,
            block_subsidy(height, mode, witness_count, self.params),
        )
        .unwrap_or(Amount::MAX);
        for tx in &block.transactions[layout.reward_end..] {
            allowed = allowed.saturating_add(lock_rewards_of(tx, self.params));
        }
        if mode == ConsensusMode::Pos && self.ledger.first_pos_height()?.is_none() {
            allowed = allowed.saturating_add(self.params.pos.genesis_reward);
        }

        let mut paid: Amount = 0;
        let reward_txs = block.transactions[..layout.reward_end]
            .iter()
            .filter(|tx| tx.is_coinbase());
        for tx in reward_txs {
            paid = tx
                .total_output_value()
                .and_then(|value| checked_money_add(paid, value))
                .ok_or(BlockError::CoinbaseValueTooLarge {
                    allowed,
                    got: Amount::MAX,
                })?;
            self.check_mining_subsidy(tx, height, mode, witness_count)?;
        }
        if paid > allowed {
            return Err(BlockError::CoinbaseValueTooLarge { allowed, got: paid });
        }
        Ok(())
    }

    /// Asset outputs in a coinbase are only allowed as a mining-certificate subsidy.
    fn check_mining_subsidy(
        &self,
        coinbase: &Transaction,
        height: u64,
        mode: ConsensusMode,
        witness_count: u32,
    ) -> Result<(), BlockError> {
        for output in &coinbase.outputs {
            let Attachment::AssetTransfer(transfer) = &output.attachment else {
                if output.attachment.asset_symbol().is_some() || output.attachment.cert().is_some()
                {
                    return Err(BlockError::MiningSubsidyTooLarge);
                }
                continue;
            };
            let Some(record) = self.ledger.cert(CertType::Mining, &transfer.symbol)? else {
                return Err(BlockError::MiningSubsidyTooLarge);
            };
            let Some(schedule) = MstSchedule::parse(&record.cert.content) else {
                return Err(BlockError::MiningSubsidyTooLarge);
            };
            let limit = mst_subsidy(
                &schedule,
                record.height,
                height,
                mode,
                witness_count,
                self.params,
            );
            if transfer.quantity > limit {
                return Err(BlockError::MiningSubsidyTooLarge);
            }
        }
        Ok(())
    }
}

struct Layout {
    coinstake: bool,
    /// Index of the first regular transaction.
    reward_end: usize,
}

struct ScriptCheck {
    tx_index: usize,
    input_index: usize,
    script_pubkey: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mvsd_consensus::{consensus_params, Network};
    use mvsd_primitives::outpoint::OutPoint;
    use mvsd_primitives::transaction::{TxIn, TxOut};

    #[test]
    fn lock_rewards_only_count_configured_heights() {
        let params = consensus_params(Network::Regtest);
        let hash = [9u8; 20];
        let tx = Transaction {
            version: 1,
            inputs: vec![TxIn::new(OutPoint::new([1u8; 32], 0))],
            outputs: vec![
                TxOut::coin(1_000_000, p2pkh_with_lock_height(&hash, params.lock_rewards.lock_heights[0])),
                TxOut::coin(1_000_000, p2pkh_with_lock_height(&hash, 7)),
                TxOut::coin(5, p2pkh_script(&hash)),
            ],
            lock_time: 0,
        };
        let expected = lock_reward(params.lock_rewards.lock_heights[0], 1_000_000, &params)
            .expect("configured height");
        assert_eq!(lock_rewards_of(&tx, &params), expected);
    }
}
