//! Block-by-block ledger over a [`KeyValueStore`].
//!
//! One writer at a time holds `write_lock`; the generation counter is odd while a
//! write is being committed. Readers never take the lock: they snapshot the
//! generation, run the read, and retry when the counter moved underneath them.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use mvsd_consensus::constants::MEDIAN_TIME_SPAN;
use mvsd_consensus::{ConsensusMode, Hash256};
use mvsd_pow::difficulty::HeaderInfo;
use mvsd_primitives::attachment::{Attachment, CertType};
use mvsd_primitives::block::{Block, BlockHeader};
use mvsd_primitives::encoding::DecodeError;
use mvsd_primitives::hash::{hash_to_hex, sha256};
use mvsd_primitives::outpoint::OutPoint;
use mvsd_primitives::transaction::TxOut;
use mvsd_storage::{Column, KeyValueStore, StoreError, WriteBatch};

use crate::records::{
    cert_key, height_key, mode_meta_key, AssetRecord, CertRecord, ConfirmedTx, DidRecord,
    HeaderEntry, MitRecord, SpentRecord,
};
use crate::undo::{BlockUndo, UndoEntry};

const TIP_KEY: &[u8] = b"tip";
const FIRST_POS_KEY: &[u8] = b"first_pos";
const READ_RETRY_LIMIT: usize = 50;
const READ_RETRY_SLEEP: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    Store(StoreError),
    Decode(DecodeError),
    Corrupt(&'static str),
    Empty,
    HeightMismatch { expected: u64, got: u64 },
    PrevHashMismatch,
    UnknownBlockVersion(u32),
    DuplicateTransaction(Hash256),
    AlreadySpent(OutPoint),
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::Store(err) => write!(f, "{err}"),
            LedgerError::Decode(err) => write!(f, "ledger record: {err}"),
            LedgerError::Corrupt(message) => write!(f, "{message}"),
            LedgerError::Empty => write!(f, "ledger is empty"),
            LedgerError::HeightMismatch { expected, got } => {
                write!(f, "block height {got} does not extend tip (expected {expected})")
            }
            LedgerError::PrevHashMismatch => write!(f, "block does not build on the tip"),
            LedgerError::UnknownBlockVersion(version) => {
                write!(f, "unknown block version {version}")
            }
            LedgerError::DuplicateTransaction(txid) => {
                write!(f, "transaction {} already confirmed", hash_to_hex(txid))
            }
            LedgerError::AlreadySpent(outpoint) => write!(f, "output {outpoint} already spent"),
        }
    }
}

impl std::error::Error for LedgerError {}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        LedgerError::Store(err)
    }
}

impl From<DecodeError> for LedgerError {
    fn from(err: DecodeError) -> Self {
        LedgerError::Decode(err)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChainTip {
    pub height: u64,
    pub hash: Hash256,
}

impl ChainTip {
    fn encode(&self) -> [u8; 40] {
        let mut out = [0u8; 40];
        out[0..8].copy_from_slice(&self.height.to_le_bytes());
        out[8..40].copy_from_slice(&self.hash);
        out
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 40 {
            return None;
        }
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes[8..40]);
        Some(Self {
            height: u64::from_le_bytes(bytes[0..8].try_into().ok()?),
            hash,
        })
    }
}

/// A confirmed output that no confirmed transaction spends.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UnspentOutput {
    pub outpoint: OutPoint,
    pub output: TxOut,
    pub height: u64,
    pub is_coinbase: bool,
}

/// `AddressOutput` key: sha256 of the locking script, then the outpoint.
pub fn address_output_key(script: &[u8], outpoint: &OutPoint) -> [u8; 68] {
    let mut key = [0u8; 68];
    key[..32].copy_from_slice(&sha256(script));
    key[32..].copy_from_slice(&outpoint.key());
    key
}

pub struct LedgerStore<S> {
    store: S,
    write_lock: Mutex<()>,
    generation: AtomicU64,
}

struct WriteGuard<'a> {
    _lock: MutexGuard<'a, ()>,
    generation: &'a AtomicU64,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.generation.fetch_add(1, Ordering::Release);
    }
}

impl<S: KeyValueStore> LedgerStore<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Write generation; odd while a commit is in flight.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn begin_write(&self) -> WriteGuard<'_> {
        let lock = self.write_lock.lock().unwrap_or_else(|err| err.into_inner());
        self.generation.fetch_add(1, Ordering::AcqRel);
        WriteGuard {
            _lock: lock,
            generation: &self.generation,
        }
    }

    fn read<T>(&self, f: impl Fn() -> Result<T, LedgerError>) -> Result<T, LedgerError> {
        for _ in 0..READ_RETRY_LIMIT {
            let before = self.generation();
            if before % 2 == 1 {
                std::thread::sleep(READ_RETRY_SLEEP);
                continue;
            }
            let result = f();
            if self.generation() == before {
                return result;
            }
            std::thread::sleep(READ_RETRY_SLEEP);
        }
        mvsd_log::log_debug!("ledger read gave up waiting for a quiet generation");
        f()
    }

    /// Appends `block` on top of the tip and returns its height.
    pub fn push(&self, block: &Block) -> Result<u64, LedgerError> {
        let _guard = self.begin_write();
        let tip = self.tip_raw()?;
        let expected_height = tip.map_or(0, |tip| tip.height + 1);
        let expected_prev = tip.map_or([0u8; 32], |tip| tip.hash);
        let height = block.header.height;
        if height != expected_height {
            return Err(LedgerError::HeightMismatch {
                expected: expected_height,
                got: height,
            });
        }
        if block.header.prev_hash != expected_prev {
            return Err(LedgerError::PrevHashMismatch);
        }
        let mode = block
            .header
            .mode()
            .ok_or(LedgerError::UnknownBlockVersion(block.header.version))?;
        let hash = block.hash();

        let mut batch = WriteBatch::new();
        let mut tables = StagedTables::new(&self.store);

        let mode_key = mode_meta_key(mode);
        let prev_same_mode = tables
            .get(Column::Meta, &mode_key)?
            .and_then(|bytes| decode_u64(&bytes));
        tables.put(Column::Meta, &mode_key, height.to_le_bytes().to_vec())?;
        if mode == ConsensusMode::Pos && tables.get(Column::Meta, FIRST_POS_KEY)?.is_none() {
            tables.put(Column::Meta, FIRST_POS_KEY, height.to_le_bytes().to_vec())?;
        }

        let entry = HeaderEntry {
            height,
            mode,
            prev_same_mode,
        };
        batch.put(Column::HeaderIndex, hash, entry.encode());
        batch.put(Column::HeightIndex, height_key(height), hash);
        batch.put(Column::BlockData, hash, block.to_bytes());

        let mut seen_txids = HashSet::with_capacity(block.transactions.len());
        let mut spent_here = HashSet::new();
        for (position, tx) in block.transactions.iter().enumerate() {
            let txid = tx.txid();
            if !seen_txids.insert(txid) || self.store.contains(Column::TxIndex, &txid)? {
                return Err(LedgerError::DuplicateTransaction(txid));
            }
            batch.put(
                Column::TxIndex,
                txid,
                ConfirmedTx::encode_entry(tx, height, position as u32),
            );
            if !tx.is_coinbase() {
                for (input_index, input) in tx.inputs.iter().enumerate() {
                    let key = input.prevout.key();
                    if !spent_here.insert(input.prevout.clone())
                        || self.store.contains(Column::SpentIndex, &key)?
                    {
                        return Err(LedgerError::AlreadySpent(input.prevout.clone()));
                    }
                    let record = SpentRecord {
                        txid,
                        input_index: input_index as u32,
                        height,
                    };
                    batch.put(Column::SpentIndex, key, record.encode());
                }
            }
            for (index, output) in tx.outputs.iter().enumerate() {
                let outpoint = OutPoint::new(txid, index as u32);
                batch.put(
                    Column::AddressOutput,
                    address_output_key(&output.script_pubkey, &outpoint),
                    Vec::<u8>::new(),
                );
                tables.apply_output(output, &txid, height)?;
            }
        }

        let undo = tables.finish(&mut batch);
        let undo_len = undo.entries.len();
        batch.put(Column::BlockUndo, hash, undo.encode());
        batch.put(Column::Meta, TIP_KEY, ChainTip { height, hash }.encode());
        self.store.write_batch(&batch)?;

        mvsd_log::log_debug!(
            "pushed {} block {} at height {} ({} txs, {} undo entries)",
            mode.as_str(),
            hash_to_hex(&hash),
            height,
            block.transactions.len(),
            undo_len
        );
        Ok(height)
    }

    /// Removes the tip block, restoring every side table it touched.
    pub fn pop(&self) -> Result<Block, LedgerError> {
        let _guard = self.begin_write();
        let tip = self.tip_raw()?.ok_or(LedgerError::Empty)?;
        let block = self
            .block_raw(&tip.hash)?
            .ok_or(LedgerError::Corrupt("missing tip block data"))?;
        let undo_bytes = self
            .store
            .get(Column::BlockUndo, &tip.hash)?
            .ok_or(LedgerError::Corrupt("missing block undo entry"))?;
        let undo = BlockUndo::decode(&undo_bytes)?;

        let mut batch = WriteBatch::new();
        batch.delete(Column::HeaderIndex, tip.hash);
        batch.delete(Column::HeightIndex, height_key(tip.height));
        batch.delete(Column::BlockData, tip.hash);
        batch.delete(Column::BlockUndo, tip.hash);
        for tx in &block.transactions {
            let txid = tx.txid();
            batch.delete(Column::TxIndex, txid);
            if !tx.is_coinbase() {
                for input in &tx.inputs {
                    batch.delete(Column::SpentIndex, input.prevout.key());
                }
            }
            for (index, output) in tx.outputs.iter().enumerate() {
                let outpoint = OutPoint::new(txid, index as u32);
                batch.delete(
                    Column::AddressOutput,
                    address_output_key(&output.script_pubkey, &outpoint),
                );
            }
        }
        for entry in undo.entries {
            match entry.prev {
                Some(prev) => batch.put(entry.column, entry.key, prev),
                None => batch.delete(entry.column, entry.key),
            }
        }
        if tip.height == 0 {
            batch.delete(Column::Meta, TIP_KEY);
        } else {
            let prev = ChainTip {
                height: tip.height - 1,
                hash: block.header.prev_hash,
            };
            batch.put(Column::Meta, TIP_KEY, prev.encode());
        }
        self.store.write_batch(&batch)?;

        mvsd_log::log_debug!(
            "popped block {} at height {}",
            hash_to_hex(&tip.hash),
            tip.height
        );
        Ok(block)
    }

    fn tip_raw(&self) -> Result<Option<ChainTip>, LedgerError> {
        match self.store.get(Column::Meta, TIP_KEY)? {
            Some(bytes) => ChainTip::decode(&bytes)
                .map(Some)
                .ok_or(LedgerError::Corrupt("invalid tip record")),
            None => Ok(None),
        }
    }

    fn block_raw(&self, hash: &Hash256) -> Result<Option<Block>, LedgerError> {
        match self.store.get(Column::BlockData, hash)? {
            Some(bytes) => Ok(Some(Block::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn hash_at_raw(&self, height: u64) -> Result<Option<Hash256>, LedgerError> {
        match self.store.get(Column::HeightIndex, &height_key(height))? {
            Some(bytes) => {
                let hash: Hash256 = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| LedgerError::Corrupt("invalid height index entry"))?;
                Ok(Some(hash))
            }
            None => Ok(None),
        }
    }

    fn header_at_raw(&self, height: u64) -> Result<Option<BlockHeader>, LedgerError> {
        let Some(hash) = self.hash_at_raw(height)? else {
            return Ok(None);
        };
        Ok(self.block_raw(&hash)?.map(|block| block.header))
    }

    fn header_entry_raw(&self, hash: &Hash256) -> Result<Option<HeaderEntry>, LedgerError> {
        match self.store.get(Column::HeaderIndex, hash)? {
            Some(bytes) => HeaderEntry::decode(&bytes)
                .map(Some)
                .ok_or(LedgerError::Corrupt("invalid header index entry")),
            None => Ok(None),
        }
    }

    pub fn tip(&self) -> Result<Option<ChainTip>, LedgerError> {
        self.read(|| self.tip_raw())
    }

    pub fn top_height(&self) -> Result<Option<u64>, LedgerError> {
        Ok(self.tip()?.map(|tip| tip.height))
    }

    pub fn tip_hash(&self) -> Result<Option<Hash256>, LedgerError> {
        Ok(self.tip()?.map(|tip| tip.hash))
    }

    pub fn block_hash(&self, height: u64) -> Result<Option<Hash256>, LedgerError> {
        self.read(|| self.hash_at_raw(height))
    }

    pub fn get_block_by_height(&self, height: u64) -> Result<Option<Block>, LedgerError> {
        self.read(|| match self.hash_at_raw(height)? {
            Some(hash) => self.block_raw(&hash),
            None => Ok(None),
        })
    }

    pub fn get_block_by_hash(&self, hash: &Hash256) -> Result<Option<Block>, LedgerError> {
        self.read(|| self.block_raw(hash))
    }

    pub fn get_header(&self, height: u64) -> Result<Option<BlockHeader>, LedgerError> {
        self.read(|| self.header_at_raw(height))
    }

    pub fn header_entry(&self, hash: &Hash256) -> Result<Option<HeaderEntry>, LedgerError> {
        self.read(|| self.header_entry_raw(hash))
    }

    pub fn get_transaction(&self, txid: &Hash256) -> Result<Option<ConfirmedTx>, LedgerError> {
        self.read(|| match self.store.get(Column::TxIndex, txid)? {
            Some(bytes) => Ok(Some(ConfirmedTx::decode(&bytes)?)),
            None => Ok(None),
        })
    }

    pub fn contains_transaction(&self, txid: &Hash256) -> Result<bool, LedgerError> {
        self.read(|| Ok(self.store.contains(Column::TxIndex, txid)?))
    }

    pub fn get_spender(&self, outpoint: &OutPoint) -> Result<Option<SpentRecord>, LedgerError> {
        self.read(|| match self.store.get(Column::SpentIndex, &outpoint.key())? {
            Some(bytes) => SpentRecord::decode(&bytes)
                .map(Some)
                .ok_or(LedgerError::Corrupt("invalid spent index entry")),
            None => Ok(None),
        })
    }

    /// Median timestamp of the `MEDIAN_TIME_SPAN` blocks ending at `height`.
    pub fn median_time_past(&self, height: u64) -> Result<Option<u32>, LedgerError> {
        self.read(|| {
            let mut times = Vec::with_capacity(MEDIAN_TIME_SPAN);
            let mut cursor = Some(height);
            while let Some(current) = cursor {
                if times.len() == MEDIAN_TIME_SPAN {
                    break;
                }
                match self.header_at_raw(current)? {
                    Some(header) => times.push(header.timestamp),
                    None => break,
                }
                cursor = current.checked_sub(1);
            }
            if times.is_empty() {
                return Ok(None);
            }
            times.sort_unstable();
            Ok(Some(times[times.len() / 2]))
        })
    }

    /// Every confirmed outpoint ever paid to `script`.
    pub fn outputs_for_script(&self, script: &[u8]) -> Result<Vec<OutPoint>, LedgerError> {
        let prefix = sha256(script);
        self.read(|| {
            let mut outpoints = Vec::new();
            let mut visitor = |key: &[u8], _: &[u8]| -> Result<(), StoreError> {
                let outpoint = OutPoint::from_key(&key[32..])
                    .ok_or(StoreError::Corrupt("address output key"))?;
                outpoints.push(outpoint);
                Ok(())
            };
            self.store
                .for_each_prefix(Column::AddressOutput, &prefix, &mut visitor)?;
            Ok(outpoints)
        })
    }

    pub fn unspent_outputs_for_script(
        &self,
        script: &[u8],
    ) -> Result<Vec<UnspentOutput>, LedgerError> {
        let mut unspent = Vec::new();
        for outpoint in self.outputs_for_script(script)? {
            if self.get_spender(&outpoint)?.is_some() {
                continue;
            }
            let Some(confirmed) = self.get_transaction(&outpoint.hash)? else {
                continue;
            };
            let Some(output) = confirmed.tx.outputs.get(outpoint.index as usize) else {
                continue;
            };
            unspent.push(UnspentOutput {
                output: output.clone(),
                height: confirmed.height,
                is_coinbase: confirmed.is_coinbase(),
                outpoint,
            });
        }
        Ok(unspent)
    }

    pub fn asset(&self, symbol: &str) -> Result<Option<AssetRecord>, LedgerError> {
        self.read(|| match self.store.get(Column::Asset, symbol.as_bytes())? {
            Some(bytes) => Ok(Some(AssetRecord::decode(&bytes)?)),
            None => Ok(None),
        })
    }

    pub fn cert(
        &self,
        cert_type: CertType,
        symbol: &str,
    ) -> Result<Option<CertRecord>, LedgerError> {
        let key = cert_key(cert_type.code(), symbol);
        self.read(|| match self.store.get(Column::Cert, &key)? {
            Some(bytes) => Ok(Some(CertRecord::decode(&bytes)?)),
            None => Ok(None),
        })
    }

    pub fn did(&self, symbol: &str) -> Result<Option<DidRecord>, LedgerError> {
        self.read(|| self.did_raw(symbol))
    }

    fn did_raw(&self, symbol: &str) -> Result<Option<DidRecord>, LedgerError> {
        match self.store.get(Column::Did, symbol.as_bytes())? {
            Some(bytes) => Ok(Some(DidRecord::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn did_by_address(&self, address: &str) -> Result<Option<DidRecord>, LedgerError> {
        self.read(|| match self.store.get(Column::DidAddress, address.as_bytes())? {
            Some(symbol) => {
                let symbol = String::from_utf8(symbol)
                    .map_err(|_| LedgerError::Corrupt("invalid did address entry"))?;
                self.did_raw(&symbol)
            }
            None => Ok(None),
        })
    }

    pub fn mit(&self, symbol: &str) -> Result<Option<MitRecord>, LedgerError> {
        self.read(|| match self.store.get(Column::Mit, symbol.as_bytes())? {
            Some(bytes) => Ok(Some(MitRecord::decode(&bytes)?)),
            None => Ok(None),
        })
    }

    pub fn first_pos_height(&self) -> Result<Option<u64>, LedgerError> {
        self.read(|| {
            Ok(self
                .store
                .get(Column::Meta, FIRST_POS_KEY)?
                .and_then(|bytes| decode_u64(&bytes)))
        })
    }

    /// The two most recent confirmed blocks of `mode`, newest first, for retargeting.
    pub fn recent_of_mode(
        &self,
        mode: ConsensusMode,
    ) -> Result<(Option<HeaderInfo>, Option<HeaderInfo>), LedgerError> {
        self.read(|| {
            let Some(last_height) = self
                .store
                .get(Column::Meta, &mode_meta_key(mode))?
                .and_then(|bytes| decode_u64(&bytes))
            else {
                return Ok((None, None));
            };
            let last = self.header_info_raw(last_height)?;
            let Some((last_info, last_hash)) = last else {
                return Ok((None, None));
            };
            let before = match self.header_entry_raw(&last_hash)? {
                Some(HeaderEntry {
                    prev_same_mode: Some(prev),
                    ..
                }) => self.header_info_raw(prev)?.map(|(info, _)| info),
                _ => None,
            };
            Ok((Some(last_info), before))
        })
    }

    fn header_info_raw(&self, height: u64) -> Result<Option<(HeaderInfo, Hash256)>, LedgerError> {
        let Some(hash) = self.hash_at_raw(height)? else {
            return Ok(None);
        };
        let Some(block) = self.block_raw(&hash)? else {
            return Err(LedgerError::Corrupt("height index points at missing block"));
        };
        Ok(Some((
            HeaderInfo {
                height,
                time: block.header.timestamp,
                bits: block.header.bits,
            },
            hash,
        )))
    }
}

fn decode_u64(bytes: &[u8]) -> Option<u64> {
    Some(u64::from_le_bytes(bytes.try_into().ok()?))
}

/// Side-table writes for one block, readable before they are committed.
struct StagedTables<'a, S> {
    store: &'a S,
    staged: BTreeMap<(Column, Vec<u8>), Option<Vec<u8>>>,
    prior: BTreeMap<(Column, Vec<u8>), Option<Vec<u8>>>,
}

impl<'a, S: KeyValueStore> StagedTables<'a, S> {
    fn new(store: &'a S) -> Self {
        Self {
            store,
            staged: BTreeMap::new(),
            prior: BTreeMap::new(),
        }
    }

    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, LedgerError> {
        if let Some(value) = self.staged.get(&(column, key.to_vec())) {
            return Ok(value.clone());
        }
        Ok(self.store.get(column, key)?)
    }

    fn remember(&mut self, column: Column, key: &[u8]) -> Result<(), LedgerError> {
        let slot = (column, key.to_vec());
        if !self.prior.contains_key(&slot) {
            let prev = self.store.get(column, key)?;
            self.prior.insert(slot, prev);
        }
        Ok(())
    }

    fn put(&mut self, column: Column, key: &[u8], value: Vec<u8>) -> Result<(), LedgerError> {
        self.remember(column, key)?;
        self.staged.insert((column, key.to_vec()), Some(value));
        Ok(())
    }

    fn delete(&mut self, column: Column, key: &[u8]) -> Result<(), LedgerError> {
        self.remember(column, key)?;
        self.staged.insert((column, key.to_vec()), None);
        Ok(())
    }

    fn apply_output(
        &mut self,
        output: &TxOut,
        txid: &Hash256,
        height: u64,
    ) -> Result<(), LedgerError> {
        match &output.attachment {
            Attachment::AssetIssue(detail) => {
                let record = AssetRecord {
                    detail: detail.clone(),
                    height,
                    txid: *txid,
                    total_supply: detail.maximum_supply,
                    secondary_issues: 0,
                };
                self.put(Column::Asset, detail.symbol.as_bytes(), record.encode())?;
            }
            Attachment::AssetSecondaryIssue(detail) => {
                let key = detail.symbol.as_bytes();
                match self.get(Column::Asset, key)? {
                    Some(bytes) => {
                        let mut record = AssetRecord::decode(&bytes)?;
                        record.total_supply =
                            record.total_supply.saturating_add(detail.maximum_supply);
                        record.secondary_issues += 1;
                        self.put(Column::Asset, key, record.encode())?;
                    }
                    None => mvsd_log::log_warn!(
                        "secondary issue of unknown asset {} at height {height}",
                        detail.symbol
                    ),
                }
            }
            Attachment::AssetCertIssue(cert)
            | Attachment::AssetCertAutoissue(cert)
            | Attachment::AssetCertTransfer(cert) => {
                let key = cert_key(cert.cert_type.code(), &cert.symbol);
                let issued_at = match self.get(Column::Cert, &key)? {
                    Some(bytes) => CertRecord::decode(&bytes)?.height,
                    None => height,
                };
                let record = CertRecord {
                    cert: cert.clone(),
                    height: issued_at,
                };
                self.put(Column::Cert, &key, record.encode())?;
            }
            Attachment::MitRegister(mit) => {
                let record = MitRecord {
                    mit: mit.clone(),
                    height,
                    updated_height: height,
                };
                self.put(Column::Mit, mit.symbol.as_bytes(), record.encode())?;
            }
            Attachment::MitTransfer(mit) => {
                let key = mit.symbol.as_bytes();
                if let Some(bytes) = self.get(Column::Mit, key)? {
                    let mut record = MitRecord::decode(&bytes)?;
                    record.mit.address = mit.address.clone();
                    record.updated_height = height;
                    self.put(Column::Mit, key, record.encode())?;
                }
            }
            Attachment::DidRegister(did) => {
                let record = DidRecord {
                    did: did.clone(),
                    height,
                };
                self.put(Column::Did, did.symbol.as_bytes(), record.encode())?;
                self.put(
                    Column::DidAddress,
                    did.address.as_bytes(),
                    did.symbol.as_bytes().to_vec(),
                )?;
            }
            Attachment::DidTransfer(did) => {
                let key = did.symbol.as_bytes();
                if let Some(bytes) = self.get(Column::Did, key)? {
                    let mut record = DidRecord::decode(&bytes)?;
                    self.delete(Column::DidAddress, record.did.address.as_bytes())?;
                    record.did.address = did.address.clone();
                    self.put(Column::Did, key, record.encode())?;
                    self.put(
                        Column::DidAddress,
                        did.address.as_bytes(),
                        did.symbol.as_bytes().to_vec(),
                    )?;
                }
            }
            Attachment::Coin
            | Attachment::AssetTransfer(_)
            | Attachment::Message(_)
            | Attachment::None => {}
        }
        Ok(())
    }

    fn finish(self, batch: &mut WriteBatch) -> BlockUndo {
        for ((column, key), value) in self.staged {
            match value {
                Some(value) => batch.put(column, key, value),
                None => batch.delete(column, key),
            }
        }
        let entries = self
            .prior
            .into_iter()
            .map(|((column, key), prev)| UndoEntry { column, key, prev })
            .collect();
        BlockUndo { entries }
    }
}
