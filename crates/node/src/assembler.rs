//! Candidate block construction for the three consensus modes.
//!
//! A candidate is laid out as: coinbase, coinstake (stake blocks), genesis stake
//! bonus (first stake block only), lock-height reward transactions, then the pool
//! transactions that survived selection. Missing preconditions (no stake, not our
//! turn, no key) yield `Ok(None)` so the miner loop simply retries later.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use mvsd_chainstate::block::{has_qualifying_deposit, next_target_bits, BlockError};
use mvsd_chainstate::election::elect_for_epoch;
use mvsd_chainstate::ledger::{LedgerError, LedgerStore};
use mvsd_chainstate::resolver::{CandidateView, ValidationScope};
use mvsd_chainstate::validation::{TransactionValidator, ValidationFlags};
use mvsd_consensus::constants::{
    DEFAULT_BLOCK_MAX_SIZE, DEFAULT_BLOCK_MIN_SIZE, DEFAULT_BLOCK_PRIORITY_SIZE, MAX_BLOCK_SIGOPS,
    MAX_BLOCK_SIZE,
};
use mvsd_consensus::money::{Amount, FREE_PRIORITY_THRESHOLD, MIN_TX_FEE_PER_KB};
use mvsd_consensus::{
    block_subsidy, lock_reward, mst_subsidy, ConsensusMode, ConsensusParams, Hash256, MstSchedule,
};
use mvsd_pos::{sign_header, verify_stake, StakeInput};
use mvsd_primitives::address::{p2pkh_script, AddressError, PaymentAddress};
use mvsd_primitives::attachment::{AssetTransfer, Attachment, CertType};
use mvsd_primitives::block::{merkle_root, Block, BlockHeader};
use mvsd_primitives::hash::{hash160, hash_to_hex};
use mvsd_primitives::outpoint::OutPoint;
use mvsd_primitives::transaction::{Transaction, TxIn, TxOut};
use mvsd_script::sign::{sign_p2pkh_input, SignError};
use mvsd_script::standard::{encode_script_num, push_data, transaction_sigops};
use mvsd_script::lock_height_from_script;
use mvsd_storage::KeyValueStore;
use mvsd_witness::{vote_result_output, WitnessSchedule};
use rand::seq::SliceRandom;
use rand::Rng;
use secp256k1::{PublicKey, Secp256k1, SecretKey};

use crate::mempool::TxPool;

/// Room kept for the coinbase and header.
const COINBASE_RESERVE_SIZE: usize = 1_000;
const COINBASE_RESERVE_SIGOPS: u32 = 100;

/// Script-sig tags keeping coinbase-form transactions of one block distinct.
const TAG_COINBASE: i64 = 0;
const TAG_GENESIS_BONUS: i64 = 1;
const TAG_LOCK_REWARD_BASE: i64 = 2;

const STAKE_RETRY_MIN_MS: u64 = 50;
const STAKE_RETRY_MAX_MS: u64 = 250;

#[derive(Debug)]
pub enum AssemblerError {
    Store(LedgerError),
    Block(BlockError),
    Address(AddressError),
    Sign(SignError),
}

impl std::fmt::Display for AssemblerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssemblerError::Store(err) => write!(f, "{err}"),
            AssemblerError::Block(err) => write!(f, "{err}"),
            AssemblerError::Address(err) => write!(f, "invalid pay address: {err}"),
            AssemblerError::Sign(err) => write!(f, "signing failed: {err}"),
        }
    }
}

impl std::error::Error for AssemblerError {}

impl From<LedgerError> for AssemblerError {
    fn from(err: LedgerError) -> Self {
        AssemblerError::Store(err)
    }
}

impl From<BlockError> for AssemblerError {
    fn from(err: BlockError) -> Self {
        AssemblerError::Block(err)
    }
}

impl From<AddressError> for AssemblerError {
    fn from(err: AddressError) -> Self {
        AssemblerError::Address(err)
    }
}

impl From<SignError> for AssemblerError {
    fn from(err: SignError) -> Self {
        AssemblerError::Sign(err)
    }
}

/// Size budgets for candidate blocks.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AssemblerPolicy {
    pub block_max_size: u32,
    /// Bytes filled by fee rate before selection switches to coin-age priority.
    pub block_priority_size: u32,
    /// Free transactions are only taken while the block is below this size.
    pub block_min_size: u32,
}

impl Default for AssemblerPolicy {
    fn default() -> Self {
        Self {
            block_max_size: DEFAULT_BLOCK_MAX_SIZE,
            block_priority_size: DEFAULT_BLOCK_PRIORITY_SIZE,
            block_min_size: DEFAULT_BLOCK_MIN_SIZE,
        }
        .normalized()
    }
}

impl AssemblerPolicy {
    /// Keeps the maximum within `[1000, MAX_BLOCK_SIZE - 1000]` and the other two
    /// budgets at or below it.
    pub fn normalized(self) -> Self {
        let block_max_size = self.block_max_size.clamp(1_000, MAX_BLOCK_SIZE - 1_000);
        Self {
            block_max_size,
            block_priority_size: self.block_priority_size.min(block_max_size),
            block_min_size: self.block_min_size.min(block_max_size),
        }
    }
}

/// The signing key stake and witness blocks are produced with.
#[derive(Clone)]
pub struct MinerKey {
    secret: SecretKey,
    public_key: Vec<u8>,
    pubkey_hash: [u8; 20],
}

impl MinerKey {
    pub fn new(secret: SecretKey) -> Self {
        let public_key = PublicKey::from_secret_key(&Secp256k1::signing_only(), &secret)
            .serialize()
            .to_vec();
        let pubkey_hash = hash160(&public_key);
        Self {
            secret,
            public_key,
            pubkey_hash,
        }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, secp256k1::Error> {
        SecretKey::from_slice(bytes).map(Self::new)
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    pub fn pubkey_hash(&self) -> &[u8; 20] {
        &self.pubkey_hash
    }

    pub fn script_pubkey(&self) -> Vec<u8> {
        p2pkh_script(&self.pubkey_hash)
    }
}

impl std::fmt::Debug for MinerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MinerKey")
            .field("public_key", &hex::encode(&self.public_key))
            .finish_non_exhaustive()
    }
}

/// A pool transaction whose inputs resolved, ready for selection.
struct Candidate {
    tx: Transaction,
    txid: Hash256,
    size: usize,
    sigops: u32,
    priority: f64,
    fee_per_kb: f64,
}

/// Heap entry; the ordering key flips once from fee rate to coin-age priority.
struct Ranked {
    index: usize,
    priority: f64,
    fee_per_kb: f64,
    by_priority: bool,
}

impl Ranked {
    fn new(index: usize, candidate: &Candidate) -> Self {
        Self {
            index,
            priority: candidate.priority,
            fee_per_kb: candidate.fee_per_kb,
            by_priority: false,
        }
    }
}

impl Eq for Ranked {}

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        let (primary, secondary) = if self.by_priority {
            (
                self.priority.total_cmp(&other.priority),
                self.fee_per_kb.total_cmp(&other.fee_per_kb),
            )
        } else {
            (
                self.fee_per_kb.total_cmp(&other.fee_per_kb),
                self.priority.total_cmp(&other.priority),
            )
        };
        // Earlier pool entries win ties.
        primary
            .then(secondary)
            .then_with(|| other.index.cmp(&self.index))
    }
}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

/// What selection put into the block.
#[derive(Default)]
struct Selection {
    rewards: Vec<Transaction>,
    transactions: Vec<Transaction>,
    fees: Amount,
}

/// A coinstake that satisfies the kernel at `timestamp`.
struct StakeHit {
    coinstake: Transaction,
    timestamp: u32,
}

pub struct BlockAssembler<S> {
    ledger: Arc<LedgerStore<S>>,
    pool: Arc<TxPool>,
    params: Arc<ConsensusParams>,
    witnesses: Arc<dyn WitnessSchedule>,
    policy: AssemblerPolicy,
    mode: ConsensusMode,
    key: Option<MinerKey>,
    mining_asset: Option<String>,
    stop: Arc<AtomicBool>,
}

impl<S: KeyValueStore> BlockAssembler<S> {
    pub fn new(
        ledger: Arc<LedgerStore<S>>,
        pool: Arc<TxPool>,
        params: Arc<ConsensusParams>,
        witnesses: Arc<dyn WitnessSchedule>,
        policy: AssemblerPolicy,
    ) -> Self {
        Self {
            ledger,
            pool,
            params,
            witnesses,
            policy: policy.normalized(),
            mode: ConsensusMode::Pow,
            key: None,
            mining_asset: None,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_mode(mut self, mode: ConsensusMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_key(mut self, key: MinerKey) -> Self {
        self.key = Some(key);
        self
    }

    /// Adds a mining-certificate subsidy output for `symbol` to every coinbase.
    pub fn with_mining_asset(mut self, symbol: impl Into<String>) -> Self {
        self.mining_asset = Some(symbol.into());
        self
    }

    /// Shares the flag that aborts the stake search.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn mode(&self) -> ConsensusMode {
        self.mode
    }

    pub fn policy(&self) -> AssemblerPolicy {
        self.policy
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Builds a block on the current tip paying the coinbase to `pay_address`.
    /// PoW candidates come back with the nonce unsolved; stake and witness
    /// candidates are signed and complete.
    pub fn create_candidate(&self, pay_address: &str) -> Result<Option<Block>, AssemblerError> {
        let pay_script = PaymentAddress::parse(pay_address, self.params.network)?.script_pubkey();
        let tip = self.ledger.tip()?;
        let height = tip.map_or(0, |tip| tip.height + 1);
        let prev_hash = tip.map_or([0u8; 32], |tip| tip.hash);
        if !self.mode.allowed_at(height, &self.params) {
            mvsd_log::log_debug!(
                "{} blocks not allowed at height {height}",
                self.mode.as_str()
            );
            return Ok(None);
        }
        let (prev_header, median) = match height.checked_sub(1) {
            Some(top) => (self.ledger.get_header(top)?, self.ledger.median_time_past(top)?),
            None => (None, None),
        };
        let prev_time = prev_header.as_ref().map_or(0, |header| header.timestamp);
        let after_median = median.map_or(0, |median| median.saturating_add(1));
        let now = unix_now();
        let epoch_start = self.params.is_begin_of_epoch(height);

        let mut header = BlockHeader {
            version: self.mode.block_version(),
            prev_hash,
            height,
            bits: next_target_bits(&self.ledger, self.mode, &self.params)?,
            ..BlockHeader::default()
        };
        let mut view = CandidateView::new(height);
        let mut leading: Vec<Transaction> = Vec::new();

        match self.mode {
            ConsensusMode::Pow => {
                header.timestamp = now.max(prev_time).max(after_median);
            }
            ConsensusMode::Pos => {
                if epoch_start {
                    mvsd_log::log_debug!("height {height} opens an epoch; no stake block");
                    return Ok(None);
                }
                let Some(key) = &self.key else {
                    mvsd_log::log_debug!("stake mining needs a miner key");
                    return Ok(None);
                };
                if !has_qualifying_deposit(&self.ledger, key.pubkey_hash(), height, &self.params)? {
                    mvsd_log::log_debug!("no qualifying deposit for stake block {height}");
                    return Ok(None);
                }
                let floor = after_median.max(prev_time.saturating_add(1));
                let Some(hit) =
                    self.find_stake(key, height, &prev_hash, header.bits, floor, &view)?
                else {
                    return Ok(None);
                };
                header.timestamp = hit.timestamp;
                view.apply(&hit.coinstake);
                leading.push(hit.coinstake);
                if self.ledger.first_pos_height()?.is_none() {
                    let bonus = coinbase_form(
                        height,
                        TAG_GENESIS_BONUS,
                        vec![TxOut::coin(self.params.pos.genesis_reward, pay_script.clone())],
                    );
                    view.apply(&bonus);
                    leading.push(bonus);
                }
            }
            ConsensusMode::Dpos => {
                let Some(key) = &self.key else {
                    mvsd_log::log_debug!("witness mining needs a miner key");
                    return Ok(None);
                };
                let Some(previous) = &prev_header else {
                    return Ok(None);
                };
                if previous.mode() != Some(ConsensusMode::Pow) {
                    mvsd_log::log_debug!("previous block is not proof of work");
                    return Ok(None);
                }
                let gap = self.params.witness.min_block_gap_secs;
                if now < previous.timestamp.saturating_add(gap) {
                    return Ok(None);
                }
                let scheduled = self.witnesses.scheduled_witness(height);
                if scheduled.as_deref() != Some(key.public_key()) {
                    mvsd_log::log_debug!("not the scheduled witness for height {height}");
                    return Ok(None);
                }
                header.timestamp = now.max(prev_time.saturating_add(1)).max(after_median);
            }
        }

        let selection = if epoch_start {
            Selection::default()
        } else {
            let reserved_size = leading.iter().map(Transaction::serialized_size).sum::<usize>();
            let reserved_sigops = leading
                .iter()
                .map(transaction_sigops)
                .fold(0u32, u32::saturating_add);
            self.select_transactions(height, &mut view, reserved_size, reserved_sigops)?
        };

        let witness_count = self.witnesses.witness_count(height);
        let subsidy = block_subsidy(height, self.mode, witness_count, &self.params);
        let mut outputs = vec![TxOut::coin(
            selection.fees.saturating_add(subsidy),
            pay_script.clone(),
        )];
        if let Some(output) = self.mining_subsidy_output(height, witness_count, &pay_script)? {
            outputs.push(output);
        }
        if epoch_start {
            let elected = elect_for_epoch(&self.ledger, &self.params, height)?;
            mvsd_log::log_info!("epoch at {height} elects {} witness(es)", elected.len());
            outputs.push(vote_result_output(&elected));
        }

        let mut transactions = Vec::with_capacity(
            1 + leading.len() + selection.rewards.len() + selection.transactions.len(),
        );
        transactions.push(coinbase_form(height, TAG_COINBASE, outputs));
        transactions.extend(leading);
        transactions.extend(selection.rewards);
        transactions.extend(selection.transactions);
        let txids: Vec<Hash256> = transactions.iter().map(Transaction::txid).collect();
        header.merkle_root = merkle_root(&txids).0;
        if self.mode != ConsensusMode::Pow {
            if let Some(key) = &self.key {
                sign_header(&mut header, &key.secret);
            }
        }

        let block = Block {
            header,
            transactions,
        };
        mvsd_log::log_info!(
            "candidate {} block {} at height {height}: {} txs, {} bytes, fees {}",
            self.mode.as_str(),
            hash_to_hex(&block.header.hash()),
            block.transactions.len(),
            block.serialized_size(),
            selection.fees
        );
        Ok(Some(block))
    }

    /// Orders the pool by fee rate, then by coin age, and validates each pick
    /// against the growing candidate.
    fn select_transactions(
        &self,
        height: u64,
        view: &mut CandidateView,
        reserved_size: usize,
        reserved_sigops: u32,
    ) -> Result<Selection, AssemblerError> {
        let mut entries = self.pool.fetch_all();
        entries.sort_by(|a, b| a.time.cmp(&b.time).then_with(|| a.txid.cmp(&b.txid)));
        let mut seen: HashSet<Hash256> = HashSet::new();
        entries.retain(|entry| seen.insert(entry.txid));
        let pooled: HashMap<Hash256, usize> = entries
            .iter()
            .enumerate()
            .map(|(index, entry)| (entry.txid, index))
            .collect();

        let mut candidates: Vec<Candidate> = Vec::with_capacity(entries.len());
        let mut entry_slot: HashMap<usize, usize> = HashMap::new();
        let mut parents_of: Vec<Vec<usize>> = Vec::with_capacity(entries.len());
        'entries: for (entry_index, entry) in entries.iter().enumerate() {
            if entry.fee < self.params.min_tx_fee {
                continue;
            }
            let mut coin_age: u128 = 0;
            let mut parents: Vec<usize> = Vec::new();
            for input in &entry.tx.inputs {
                let prevout = &input.prevout;
                if let Some(&parent) = pooled.get(&prevout.hash) {
                    if entries[parent]
                        .tx
                        .outputs
                        .get(prevout.index as usize)
                        .is_none()
                    {
                        continue 'entries;
                    }
                    if !parents.contains(&parent) {
                        parents.push(parent);
                    }
                    continue;
                }
                let Some(confirmed) = self.ledger.get_transaction(&prevout.hash)? else {
                    mvsd_log::log_debug!(
                        "dropping {}: parent {} unresolved",
                        hash_to_hex(&entry.txid),
                        hash_to_hex(&prevout.hash)
                    );
                    continue 'entries;
                };
                let Some(output) = confirmed.tx.outputs.get(prevout.index as usize) else {
                    continue 'entries;
                };
                if self.ledger.get_spender(prevout)?.is_some() {
                    mvsd_log::log_debug!(
                        "dropping {}: {prevout} already spent on chain",
                        hash_to_hex(&entry.txid)
                    );
                    continue 'entries;
                }
                let age = height.saturating_sub(confirmed.height);
                coin_age = coin_age.saturating_add(u128::from(output.value) * u128::from(age));
            }
            let size = entry.size.max(1);
            entry_slot.insert(entry_index, candidates.len());
            parents_of.push(parents);
            candidates.push(Candidate {
                sigops: transaction_sigops(&entry.tx),
                tx: entry.tx.clone(),
                txid: entry.txid,
                size,
                priority: coin_age as f64 / size as f64,
                fee_per_kb: entry.fee as f64 * 1000.0 / size as f64,
            });
        }

        // Children wait for every pooled parent to be selected first.
        let mut pending: Vec<usize> = vec![0; candidates.len()];
        let mut waiting: HashMap<usize, Vec<usize>> = HashMap::new();
        let mut heap: BinaryHeap<Ranked> = BinaryHeap::new();
        for (slot, parents) in parents_of.iter().enumerate() {
            for parent in parents {
                match entry_slot.get(parent) {
                    Some(&parent_slot) => {
                        pending[slot] = pending[slot].saturating_add(1);
                        waiting.entry(parent_slot).or_default().push(slot);
                    }
                    // Parent was dropped; the child can never be placed.
                    None => pending[slot] = usize::MAX,
                }
            }
            if pending[slot] == 0 {
                heap.push(Ranked::new(slot, &candidates[slot]));
            }
        }

        let validator = TransactionValidator::new(&self.ledger, &self.params);
        let flags = ValidationFlags::block_assembly();
        let max_size = self.policy.block_max_size as usize;
        let priority_size = self.policy.block_priority_size as usize;
        let min_size = self.policy.block_min_size as usize;
        let mut block_size = COINBASE_RESERVE_SIZE + reserved_size;
        let mut block_sigops = COINBASE_RESERVE_SIGOPS.saturating_add(reserved_sigops);
        let mut by_priority = false;
        let mut ready: VecDeque<usize> = VecDeque::new();
        let mut selection = Selection::default();

        loop {
            let slot = match ready.pop_front() {
                Some(slot) => slot,
                None => match heap.pop() {
                    Some(ranked) => ranked.index,
                    None => break,
                },
            };
            let candidate = &candidates[slot];
            let rewards = self.lock_reward_txs(height, &candidate.tx, selection.rewards.len());
            let reward_sigops = rewards
                .iter()
                .map(transaction_sigops)
                .fold(0u32, u32::saturating_add);
            let reward_size: usize = rewards.iter().map(Transaction::serialized_size).sum();
            let added_size = candidate.size + reward_size;
            if block_size + added_size >= max_size {
                continue;
            }
            let sigops = candidate.sigops.saturating_add(reward_sigops);
            if block_sigops.saturating_add(sigops) >= MAX_BLOCK_SIGOPS {
                continue;
            }
            if !by_priority
                && candidate.fee_per_kb < MIN_TX_FEE_PER_KB as f64
                && block_size + added_size >= min_size
            {
                continue;
            }
            if self.stopped() {
                break;
            }

            let ctx = match validator.validate(&candidate.tx, ValidationScope::Candidate(&*view), flags)
            {
                Ok(ctx) => ctx,
                Err(err) => {
                    mvsd_log::log_debug!(
                        "candidate skips {}: {err}",
                        hash_to_hex(&candidate.txid)
                    );
                    continue;
                }
            };
            view.apply(&candidate.tx);
            for reward in &rewards {
                view.apply(reward);
            }
            block_size += added_size;
            block_sigops = block_sigops.saturating_add(sigops);
            selection.fees = selection.fees.saturating_add(ctx.fee);
            selection.rewards.extend(rewards);
            selection.transactions.push(candidate.tx.clone());

            if !by_priority
                && (block_size >= priority_size || candidate.priority < FREE_PRIORITY_THRESHOLD)
            {
                by_priority = true;
                heap = heap
                    .into_iter()
                    .map(|mut ranked| {
                        ranked.by_priority = true;
                        ranked
                    })
                    .collect();
            }

            if let Some(children) = waiting.remove(&slot) {
                for child in children {
                    pending[child] = pending[child].saturating_sub(1);
                    if pending[child] == 0 {
                        ready.push_back(child);
                    }
                }
            }
        }
        Ok(selection)
    }

    /// Coinbase-form transactions paying the deposit reward of every lock-height
    /// output in `tx` back to the same lock script.
    fn lock_reward_txs(&self, height: u64, tx: &Transaction, already: usize) -> Vec<Transaction> {
        tx.outputs
            .iter()
            .filter_map(|output| {
                let lock_height = lock_height_from_script(&output.script_pubkey)?;
                let reward = lock_reward(lock_height, output.value, &self.params)?;
                (reward > 0).then(|| TxOut::coin(reward, output.script_pubkey.clone()))
            })
            .enumerate()
            .map(|(offset, output)| {
                let tag = TAG_LOCK_REWARD_BASE + (already + offset) as i64;
                coinbase_form(height, tag, vec![output])
            })
            .collect()
    }

    /// The mining-certificate subsidy output, when a configured asset has a cert.
    fn mining_subsidy_output(
        &self,
        height: u64,
        witness_count: u32,
        pay_script: &[u8],
    ) -> Result<Option<TxOut>, AssemblerError> {
        let Some(symbol) = &self.mining_asset else {
            return Ok(None);
        };
        let Some(record) = self.ledger.cert(CertType::Mining, symbol)? else {
            mvsd_log::log_debug!("no mining certificate for {symbol}");
            return Ok(None);
        };
        let Some(schedule) = MstSchedule::parse(&record.cert.content) else {
            mvsd_log::log_warn!("mining certificate for {symbol} has no usable schedule");
            return Ok(None);
        };
        let quantity = mst_subsidy(
            &schedule,
            record.height,
            height,
            self.mode,
            witness_count,
            &self.params,
        );
        if quantity == 0 {
            return Ok(None);
        }
        Ok(Some(TxOut::with_attachment(
            0,
            pay_script.to_vec(),
            Attachment::AssetTransfer(AssetTransfer {
                symbol: symbol.clone(),
                quantity,
            }),
        )))
    }

    /// Walks timestamps over half a stake spacing looking for a kernel hit among
    /// the key's eligible outputs, in random order.
    fn find_stake(
        &self,
        key: &MinerKey,
        height: u64,
        prev_hash: &Hash256,
        bits: u32,
        floor: u32,
        view: &CandidateView,
    ) -> Result<Option<StakeHit>, AssemblerError> {
        let script = key.script_pubkey();
        let pos = &self.params.pos;
        let mut stakes: Vec<_> = self
            .ledger
            .unspent_outputs_for_script(&script)?
            .into_iter()
            .filter(|stake| {
                matches!(stake.output.attachment, Attachment::Coin)
                    && stake.output.value >= pos.min_stake_value
                    && height >= stake.height.saturating_add(pos.min_stake_confirmations)
                    && (!stake.is_coinbase
                        || height >= stake.height.saturating_add(self.params.coinbase_maturity))
                    && !self.pool.is_spent(&stake.outpoint)
            })
            .collect();
        if stakes.is_empty() {
            mvsd_log::log_debug!("no eligible stake outputs for height {height}");
            return Ok(None);
        }
        let mut rng = rand::thread_rng();
        stakes.shuffle(&mut rng);

        // Each attempt stamps the wall clock, so the search runs in real time
        // and gives up after half the target spacing.
        let window = Duration::from_secs(u64::from((pos.target_spacing / 2).max(1)));
        let started = Instant::now();
        let validator = TransactionValidator::new(&self.ledger, &self.params);
        let mut last_tried = None;
        loop {
            if self.stopped() {
                return Ok(None);
            }
            let timestamp = unix_now().max(floor);
            if last_tried != Some(timestamp) {
                last_tried = Some(timestamp);
                for stake in &stakes {
                    let input = StakeInput {
                        outpoint: stake.outpoint.clone(),
                        value: stake.output.value,
                        height: stake.height,
                    };
                    if verify_stake(prev_hash, height, timestamp, bits, &input, &self.params)
                        .is_err()
                    {
                        continue;
                    }
                    let coinstake =
                        build_coinstake(&stake.outpoint, stake.output.value, &script, key)?;
                    match validator.validate_coinstake(
                        &coinstake,
                        ValidationScope::Candidate(view),
                        ValidationFlags::block_assembly(),
                    ) {
                        Ok(_) => {
                            mvsd_log::log_debug!(
                                "stake hit at height {height} with {}",
                                stake.outpoint
                            );
                            return Ok(Some(StakeHit {
                                coinstake,
                                timestamp,
                            }));
                        }
                        Err(err) => {
                            mvsd_log::log_debug!(
                                "coinstake for {} rejected: {err}",
                                stake.outpoint
                            );
                        }
                    }
                }
            }
            let elapsed = started.elapsed();
            if elapsed >= window {
                break;
            }
            std::thread::sleep(stake_retry_delay(&mut rng, window - elapsed));
        }
        mvsd_log::log_debug!("no stake hit for height {height} within {window:?}");
        Ok(None)
    }
}

/// Jittered pause between stake attempts, never past the end of the window.
fn stake_retry_delay<R: Rng>(rng: &mut R, remaining: Duration) -> Duration {
    let jitter = Duration::from_millis(rng.gen_range(STAKE_RETRY_MIN_MS..STAKE_RETRY_MAX_MS));
    jitter.min(remaining)
}

/// Spends `outpoint` back to the staker with the empty marker output first.
fn build_coinstake(
    outpoint: &OutPoint,
    value: Amount,
    script: &[u8],
    key: &MinerKey,
) -> Result<Transaction, SignError> {
    let mut tx = Transaction {
        version: 1,
        inputs: vec![TxIn::new(outpoint.clone())],
        outputs: vec![TxOut::default(), TxOut::coin(value, script.to_vec())],
        lock_time: 0,
    };
    tx.inputs[0].script_sig = sign_p2pkh_input(&tx, 0, script, &key.secret)?;
    Ok(tx)
}

/// A transaction with a single null input; `tag` keeps txids distinct within a block.
fn coinbase_form(height: u64, tag: i64, outputs: Vec<TxOut>) -> Transaction {
    let mut script_sig = Vec::new();
    push_data(&mut script_sig, &encode_script_num(height as i64));
    push_data(&mut script_sig, &encode_script_num(tag));
    Transaction {
        version: 1,
        inputs: vec![TxIn {
            prevout: OutPoint::null(),
            script_sig,
            sequence: u32::MAX,
        }],
        outputs,
        lock_time: 0,
    }
}

fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u32::try_from(elapsed.as_secs()).unwrap_or(u32::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranked(index: usize, priority: f64, fee_per_kb: f64) -> Ranked {
        Ranked {
            index,
            priority,
            fee_per_kb,
            by_priority: false,
        }
    }

    #[test]
    fn heap_orders_by_fee_rate_then_switches_to_priority() {
        let mut heap: BinaryHeap<Ranked> = [
            ranked(0, 9.0, 1_000.0),
            ranked(1, 1.0, 5_000.0),
            ranked(2, 5.0, 3_000.0),
        ]
        .into_iter()
        .collect();
        assert_eq!(heap.peek().map(|r| r.index), Some(1));

        heap = heap
            .into_iter()
            .map(|mut r| {
                r.by_priority = true;
                r
            })
            .collect();
        let order: Vec<usize> = std::iter::from_fn(|| heap.pop().map(|r| r.index)).collect();
        assert_eq!(order, vec![0, 2, 1]);
    }

    #[test]
    fn earlier_entries_win_ties() {
        let mut heap: BinaryHeap<Ranked> =
            [ranked(3, 1.0, 2_000.0), ranked(1, 1.0, 2_000.0)].into_iter().collect();
        assert_eq!(heap.pop().map(|r| r.index), Some(1));
    }

    #[test]
    fn policy_is_clamped() {
        let policy = AssemblerPolicy {
            block_max_size: 10,
            block_priority_size: 50_000,
            block_min_size: 5_000,
        }
        .normalized();
        assert_eq!(policy.block_max_size, 1_000);
        assert_eq!(policy.block_priority_size, 1_000);
        assert_eq!(policy.block_min_size, 1_000);
        assert_eq!(
            AssemblerPolicy {
                block_max_size: u32::MAX,
                ..AssemblerPolicy::default()
            }
            .normalized()
            .block_max_size,
            MAX_BLOCK_SIZE - 1_000
        );
    }

    #[test]
    fn coinbase_forms_of_one_height_differ() {
        let out = vec![TxOut::coin(1, vec![0x51])];
        let coinbase = coinbase_form(7, TAG_COINBASE, out.clone());
        let reward = coinbase_form(7, TAG_LOCK_REWARD_BASE, out);
        assert!(coinbase.is_coinbase());
        assert!(reward.is_coinbase());
        assert_ne!(coinbase.txid(), reward.txid());
    }

    #[test]
    fn stake_retries_are_jittered_and_stay_inside_the_window() {
        use rand::rngs::StdRng;
        use rand::SeedableRng;

        let mut rng = StdRng::seed_from_u64(7);
        let delays: Vec<Duration> = (0..32)
            .map(|_| stake_retry_delay(&mut rng, Duration::from_secs(1)))
            .collect();
        assert!(delays.iter().all(|delay| {
            *delay >= Duration::from_millis(STAKE_RETRY_MIN_MS)
                && *delay < Duration::from_millis(STAKE_RETRY_MAX_MS)
        }));
        assert!(delays.iter().any(|delay| *delay != delays[0]));
        assert_eq!(
            stake_retry_delay(&mut rng, Duration::from_millis(10)),
            Duration::from_millis(10)
        );
    }
}
