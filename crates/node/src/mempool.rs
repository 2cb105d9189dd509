//! Unconfirmed transaction pool.
//!
//! [`Mempool`] holds the entries and their spend/parent links; [`TxPool`] wraps it in
//! a mutex, keeps the confirmation handlers and is what the rest of the node shares.
//! Admission assumes the transaction was already validated against the pool.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use mvsd_chainstate::resolver::MempoolView;
use mvsd_chainstate::validation::ValidationContext;
use mvsd_consensus::money::Amount;
use mvsd_consensus::Hash256;
use mvsd_primitives::block::Block;
use mvsd_primitives::hash::hash_to_hex;
use mvsd_primitives::outpoint::OutPoint;
use mvsd_primitives::transaction::Transaction;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MempoolErrorKind {
    AlreadyInMempool,
    ConflictingInput,
    MempoolFull,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MempoolError {
    pub kind: MempoolErrorKind,
    pub message: String,
}

impl MempoolError {
    pub fn new(kind: MempoolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for MempoolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for MempoolError {}

#[derive(Clone, Debug)]
pub struct MempoolEntry {
    pub txid: Hash256,
    pub tx: Transaction,
    pub size: usize,
    /// Unix seconds at admission.
    pub time: u64,
    /// Chain height at admission.
    pub height: u64,
    pub fee: Amount,
    pub coin_in: Amount,
    pub priority: f64,
    pub spent_outpoints: Vec<OutPoint>,
    /// Pooled transactions this one spends from.
    pub parents: Vec<Hash256>,
}

impl MempoolEntry {
    /// Entry for a transaction the validator accepted at chain height `height`.
    pub fn new(tx: Transaction, ctx: &ValidationContext, height: u64) -> Self {
        let spent_outpoints = tx.inputs.iter().map(|input| input.prevout.clone()).collect();
        Self {
            txid: ctx.txid,
            size: ctx.size,
            time: now_secs(),
            height,
            fee: ctx.fee,
            coin_in: ctx.coin_in,
            priority: ctx.priority(),
            spent_outpoints,
            parents: Vec::new(),
            tx,
        }
    }

    pub fn fee_per_kb(&self) -> f64 {
        if self.size == 0 {
            return 0.0;
        }
        self.fee as f64 * 1000.0 / self.size as f64
    }
}

#[derive(Default)]
pub struct Mempool {
    entries: HashMap<Hash256, MempoolEntry>,
    spent: HashMap<OutPoint, Hash256>,
    children: HashMap<Hash256, Vec<Hash256>>,
    total_bytes: usize,
    max_bytes: usize,
}

#[derive(Clone, Debug, Default)]
pub struct MempoolInsertOutcome {
    pub evicted_txids: Vec<Hash256>,
    pub evicted_bytes: u64,
}

impl Mempool {
    /// `max_bytes == 0` means unbounded.
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            ..Self::default()
        }
    }

    pub fn contains(&self, txid: &Hash256) -> bool {
        self.entries.contains_key(txid)
    }

    pub fn spender(&self, outpoint: &OutPoint) -> Option<Hash256> {
        self.spent.get(outpoint).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn get(&self, txid: &Hash256) -> Option<&MempoolEntry> {
        self.entries.get(txid)
    }

    pub fn entries(&self) -> impl Iterator<Item = &MempoolEntry> {
        self.entries.values()
    }

    pub fn insert(&mut self, entry: MempoolEntry) -> Result<MempoolInsertOutcome, MempoolError> {
        let mut entry = entry;
        let inserted_txid = entry.txid;
        if self.max_bytes > 0 && entry.size > self.max_bytes {
            return Err(MempoolError::new(
                MempoolErrorKind::MempoolFull,
                "transaction too large for mempool",
            ));
        }
        if self.entries.contains_key(&entry.txid) {
            return Err(MempoolError::new(
                MempoolErrorKind::AlreadyInMempool,
                "transaction already in mempool",
            ));
        }
        for outpoint in &entry.spent_outpoints {
            if let Some(conflict) = self.spent.get(outpoint) {
                return Err(MempoolError::new(
                    MempoolErrorKind::ConflictingInput,
                    format!(
                        "input {outpoint} already spent by {}",
                        hash_to_hex(conflict)
                    ),
                ));
            }
        }

        let mut parents: Vec<Hash256> = Vec::new();
        for outpoint in &entry.spent_outpoints {
            if self.entries.contains_key(&outpoint.hash) && !parents.contains(&outpoint.hash) {
                parents.push(outpoint.hash);
            }
        }
        for outpoint in &entry.spent_outpoints {
            self.spent.insert(outpoint.clone(), inserted_txid);
        }
        for parent in &parents {
            let children = self.children.entry(*parent).or_default();
            if !children.contains(&inserted_txid) {
                children.push(inserted_txid);
            }
        }
        entry.parents = parents;
        self.total_bytes = self.total_bytes.saturating_add(entry.size);
        self.entries.insert(inserted_txid, entry);

        let mut outcome = MempoolInsertOutcome::default();
        if self.max_bytes > 0 && self.total_bytes > self.max_bytes {
            outcome = self.evict_to_fit();
        }
        if !self.entries.contains_key(&inserted_txid) {
            return Err(MempoolError::new(MempoolErrorKind::MempoolFull, "mempool full"));
        }
        Ok(outcome)
    }

    /// Removes one entry; its pooled children stay and lose the parent link.
    pub fn remove(&mut self, txid: &Hash256) -> Option<MempoolEntry> {
        let entry = self.entries.remove(txid)?;
        self.total_bytes = self.total_bytes.saturating_sub(entry.size);
        for outpoint in &entry.spent_outpoints {
            if self.spent.get(outpoint) == Some(txid) {
                self.spent.remove(outpoint);
            }
        }
        for parent in &entry.parents {
            let should_remove_parent = match self.children.get_mut(parent) {
                Some(children) => {
                    children.retain(|child| child != txid);
                    children.is_empty()
                }
                None => false,
            };
            if should_remove_parent {
                self.children.remove(parent);
            }
        }
        if let Some(children) = self.children.remove(txid) {
            for child in children {
                if let Some(child_entry) = self.entries.get_mut(&child) {
                    child_entry.parents.retain(|parent| parent != txid);
                }
            }
        }
        Some(entry)
    }

    /// Removes an entry together with everything that spends from it, children first.
    pub fn remove_with_descendants(&mut self, txid: &Hash256) -> Vec<MempoolEntry> {
        let mut visited: HashSet<Hash256> = HashSet::new();
        let mut order: Vec<Hash256> = Vec::new();

        fn visit(
            mempool: &Mempool,
            txid: Hash256,
            visited: &mut HashSet<Hash256>,
            order: &mut Vec<Hash256>,
        ) {
            if !visited.insert(txid) {
                return;
            }
            if let Some(children) = mempool.children.get(&txid) {
                for child in children {
                    visit(mempool, *child, visited, order);
                }
            }
            order.push(txid);
        }

        visit(self, *txid, &mut visited, &mut order);
        order
            .into_iter()
            .filter_map(|txid| self.remove(&txid))
            .collect()
    }

    /// Drops the lowest fee-rate entries (oldest first on ties) until the pool fits.
    fn evict_to_fit(&mut self) -> MempoolInsertOutcome {
        let mut candidates: Vec<(Hash256, Amount, usize, u64)> = self
            .entries
            .values()
            .map(|entry| (entry.txid, entry.fee, entry.size.max(1), entry.time))
            .collect();
        candidates.sort_by(|a, b| {
            let left = u128::from(a.1) * b.2 as u128;
            let right = u128::from(b.1) * a.2 as u128;
            left.cmp(&right)
                .then_with(|| a.3.cmp(&b.3))
                .then_with(|| a.0.cmp(&b.0))
        });

        let mut outcome = MempoolInsertOutcome::default();
        for (txid, ..) in candidates {
            if self.total_bytes <= self.max_bytes {
                break;
            }
            for removed in self.remove_with_descendants(&txid) {
                outcome.evicted_bytes = outcome.evicted_bytes.saturating_add(removed.size as u64);
                outcome.evicted_txids.push(removed.txid);
            }
        }
        if !outcome.evicted_txids.is_empty() {
            mvsd_log::log_debug!(
                "mempool evicted {} transaction(s), {} bytes",
                outcome.evicted_txids.len(),
                outcome.evicted_bytes
            );
        }
        outcome
    }
}

/// Runs once the transaction is confirmed, with the confirming block height.
pub type ConfirmHandler = Box<dyn FnOnce(u64) + Send>;
/// Runs once admission finished, with the admitted txid or the rejection.
pub type ValidatedHandler = Box<dyn FnOnce(&Result<Hash256, MempoolError>) + Send>;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConfirmOutcome {
    pub confirmed: Vec<Hash256>,
    /// Pooled transactions dropped because the block spent their inputs.
    pub evicted: Vec<Hash256>,
}

#[derive(Default)]
struct PoolState {
    pool: Mempool,
    on_confirmed: HashMap<Hash256, ConfirmHandler>,
}

/// The shared, thread-safe pool.
#[derive(Default)]
pub struct TxPool {
    state: Mutex<PoolState>,
}

impl TxPool {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            state: Mutex::new(PoolState {
                pool: Mempool::new(max_bytes),
                on_confirmed: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Admits a validated transaction. `on_validated` sees the admission result and
    /// `on_confirmed` fires when a block confirms the transaction.
    pub fn store(
        &self,
        entry: MempoolEntry,
        on_confirmed: Option<ConfirmHandler>,
        on_validated: Option<ValidatedHandler>,
    ) -> Result<Hash256, MempoolError> {
        let txid = entry.txid;
        let result = {
            let mut state = self.lock();
            match state.pool.insert(entry) {
                Ok(outcome) => {
                    for evicted in &outcome.evicted_txids {
                        state.on_confirmed.remove(evicted);
                    }
                    if let Some(handler) = on_confirmed {
                        state.on_confirmed.insert(txid, handler);
                    }
                    Ok(txid)
                }
                Err(err) => Err(err),
            }
        };
        match &result {
            Ok(_) => mvsd_log::log_debug!("mempool accepted {}", hash_to_hex(&txid)),
            Err(err) => mvsd_log::log_debug!("mempool rejected {}: {err}", hash_to_hex(&txid)),
        }
        if let Some(handler) = on_validated {
            handler(&result);
        }
        result
    }

    /// Snapshot of every pooled entry.
    pub fn fetch_all(&self) -> Vec<MempoolEntry> {
        self.lock().pool.entries().cloned().collect()
    }

    /// Removes a transaction and its pooled descendants.
    pub fn delete(&self, txid: &Hash256) -> Vec<MempoolEntry> {
        let mut state = self.lock();
        let removed = state.pool.remove_with_descendants(txid);
        for entry in &removed {
            state.on_confirmed.remove(&entry.txid);
        }
        removed
    }

    /// Drops the transactions `block` confirms, firing their handlers, and evicts
    /// pooled transactions that conflict with the block.
    pub fn remove_confirmed(&self, block: &Block) -> ConfirmOutcome {
        let height = block.header.height;
        let mut outcome = ConfirmOutcome::default();
        let mut handlers: Vec<ConfirmHandler> = Vec::new();
        {
            let mut state = self.lock();
            for tx in &block.transactions {
                let txid = tx.txid();
                if state.pool.remove(&txid).is_some() {
                    outcome.confirmed.push(txid);
                    if let Some(handler) = state.on_confirmed.remove(&txid) {
                        handlers.push(handler);
                    }
                }
                if tx.is_coinbase() {
                    continue;
                }
                for input in &tx.inputs {
                    let Some(conflict) = state.pool.spender(&input.prevout) else {
                        continue;
                    };
                    for removed in state.pool.remove_with_descendants(&conflict) {
                        state.on_confirmed.remove(&removed.txid);
                        outcome.evicted.push(removed.txid);
                    }
                }
            }
        }
        for handler in handlers {
            handler(height);
        }
        if !outcome.confirmed.is_empty() || !outcome.evicted.is_empty() {
            mvsd_log::log_debug!(
                "block {height} confirmed {} pooled transaction(s), evicted {}",
                outcome.confirmed.len(),
                outcome.evicted.len()
            );
        }
        outcome
    }

    /// Keeps the entries `still_valid` accepts; the rest leave with their pooled
    /// descendants. Returns the evicted txids.
    pub fn retain_valid<F>(&self, mut still_valid: F) -> Vec<Hash256>
    where
        F: FnMut(&Transaction) -> bool,
    {
        // The check may read the pool, so it runs on a snapshot without the lock.
        let stale: Vec<Hash256> = self
            .fetch_all()
            .into_iter()
            .filter(|entry| !still_valid(&entry.tx))
            .map(|entry| entry.txid)
            .collect();
        let mut evicted = Vec::new();
        let mut state = self.lock();
        for txid in stale {
            for removed in state.pool.remove_with_descendants(&txid) {
                state.on_confirmed.remove(&removed.txid);
                evicted.push(removed.txid);
            }
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.lock().pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().pool.is_empty()
    }

    pub fn entry(&self, txid: &Hash256) -> Option<MempoolEntry> {
        self.lock().pool.get(txid).cloned()
    }

    pub fn is_spent(&self, outpoint: &OutPoint) -> bool {
        self.lock().pool.spender(outpoint).is_some()
    }

    pub fn bytes(&self) -> usize {
        self.lock().pool.bytes()
    }
}

impl MempoolView for TxPool {
    fn is_in_pool(&self, txid: &Hash256) -> bool {
        self.lock().pool.contains(txid)
    }

    fn is_spent_in_pool(&self, tx: &Transaction) -> bool {
        let txid = tx.txid();
        let state = self.lock();
        tx.inputs.iter().any(|input| {
            state
                .pool
                .spender(&input.prevout)
                .is_some_and(|spender| spender != txid)
        })
    }

    fn find(&self, txid: &Hash256) -> Option<Transaction> {
        self.lock().pool.get(txid).map(|entry| entry.tx.clone())
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}
