#![allow(dead_code)]

use std::sync::Arc;

use mvsd_chainstate::block::{next_target_bits, BlockValidator};
use mvsd_chainstate::ledger::LedgerStore;
use mvsd_consensus::money::{Amount, COIN};
use mvsd_consensus::{block_subsidy, consensus_params, ConsensusMode, ConsensusParams, Network};
use mvsd_pow::solve_header;
use mvsd_primitives::address::{p2pkh_script, script_pubkey_to_address};
use mvsd_primitives::block::{merkle_root, Block, BlockHeader};
use mvsd_primitives::hash::hash160;
use mvsd_primitives::outpoint::OutPoint;
use mvsd_primitives::transaction::{Transaction, TxIn, TxOut};
use mvsd_script::sign::sign_p2pkh_input;
use mvsd_storage::memory::MemoryStore;
use mvsd_storage::KeyValueStore;
use mvsd_witness::EpochWitnessSchedule;
use secp256k1::{PublicKey, Secp256k1, SecretKey};

pub const BASE_TIME: u32 = 1_600_000_000;
pub const MINER: u8 = 1;

pub fn secret(tag: u8) -> SecretKey {
    SecretKey::from_slice(&[tag; 32]).expect("valid secret key")
}

pub fn public_key(tag: u8) -> Vec<u8> {
    PublicKey::from_secret_key(&Secp256k1::signing_only(), &secret(tag))
        .serialize()
        .to_vec()
}

pub fn script_of(tag: u8) -> Vec<u8> {
    p2pkh_script(&hash160(&public_key(tag)))
}

pub fn address_of(tag: u8) -> String {
    script_pubkey_to_address(&script_of(tag), Network::Regtest).expect("p2pkh address")
}

pub fn coinbase_tx(height: u64, tag: u8, outputs: Vec<TxOut>) -> Transaction {
    let mut script_sig = height.to_le_bytes().to_vec();
    script_sig.push(tag);
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

pub struct TestChain<S = MemoryStore> {
    pub ledger: Arc<LedgerStore<S>>,
    pub params: Arc<ConsensusParams>,
    pub witnesses: Arc<EpochWitnessSchedule>,
}

impl TestChain<MemoryStore> {
    pub fn new() -> Self {
        Self::with_store(MemoryStore::new())
    }
}

impl<S: KeyValueStore> TestChain<S> {
    pub fn with_store(store: S) -> Self {
        let params = consensus_params(Network::Regtest);
        let witnesses = Arc::new(EpochWitnessSchedule::new(&params));
        Self {
            ledger: Arc::new(LedgerStore::new(store)),
            params: Arc::new(params),
            witnesses,
        }
    }

    pub fn next_height(&self) -> u64 {
        self.ledger
            .top_height()
            .expect("top height")
            .map_or(0, |top| top + 1)
    }

    /// A solved PoW block on the tip. The coinbase pays 1 COIN and the remainder of
    /// the subsidy to the miner key.
    pub fn build_block(&self, tag: u8, txs: Vec<Transaction>) -> Block {
        let height = self.next_height();
        let prev_hash = self.ledger.tip_hash().expect("tip").unwrap_or([0u8; 32]);
        let timestamp = match height.checked_sub(1) {
            Some(prev) => {
                self.ledger
                    .get_header(prev)
                    .expect("header read")
                    .expect("previous header")
                    .timestamp
                    + 1
            }
            None => BASE_TIME,
        };
        let subsidy = block_subsidy(height, ConsensusMode::Pow, 0, &self.params);
        let coinbase = coinbase_tx(
            height,
            tag,
            vec![
                TxOut::coin(COIN, script_of(MINER)),
                TxOut::coin(subsidy - COIN, script_of(MINER)),
            ],
        );
        let mut transactions = vec![coinbase];
        transactions.extend(txs);
        let txids: Vec<_> = transactions.iter().map(Transaction::txid).collect();
        let mut header = BlockHeader {
            version: ConsensusMode::Pow.block_version(),
            prev_hash,
            merkle_root: merkle_root(&txids).0,
            timestamp,
            bits: next_target_bits(&self.ledger, ConsensusMode::Pow, &self.params)
                .expect("next bits"),
            height,
            ..BlockHeader::default()
        };
        assert!(solve_header(&mut header, 1_000_000).expect("solve"));
        Block {
            header,
            transactions,
        }
    }

    pub fn validator(&self) -> BlockValidator<'_, S> {
        BlockValidator::new(&self.ledger, &self.params, self.witnesses.as_ref())
    }

    /// Builds, validates and pushes a block.
    pub fn mine(&self, tag: u8, txs: Vec<Transaction>) -> Block {
        let block = self.build_block(tag, txs);
        self.validator().validate(&block).expect("valid block");
        self.ledger.push(&block).expect("push");
        block
    }

    /// Pushes a block without block validation, for setting up ledger state.
    pub fn push_unchecked(&self, txs: Vec<Transaction>) -> Block {
        let block = self.build_block(0xee, txs);
        self.ledger.push(&block).expect("push");
        block
    }

    pub fn mine_empty(&self, count: usize) {
        for _ in 0..count {
            self.mine(0, Vec::new());
        }
    }

    /// The 1 COIN coinbase output of the block at `height`.
    pub fn coinbase_coin(&self, height: u64) -> OutPoint {
        let block = self
            .ledger
            .get_block_by_height(height)
            .expect("block read")
            .expect("block");
        OutPoint::new(block.transactions[0].txid(), 0)
    }

    pub fn prev_script(&self, outpoint: &OutPoint) -> Vec<u8> {
        self.ledger
            .get_transaction(&outpoint.hash)
            .expect("tx read")
            .expect("confirmed tx")
            .tx
            .outputs[outpoint.index as usize]
            .script_pubkey
            .clone()
    }

    /// A signed transaction spending confirmed outputs owned by `key`.
    pub fn spend(&self, version: u32, inputs: &[OutPoint], outputs: Vec<TxOut>, key: u8) -> Transaction {
        let mut tx = Transaction {
            version,
            inputs: inputs.iter().cloned().map(TxIn::new).collect(),
            outputs,
            lock_time: 0,
        };
        let secret = secret(key);
        for (index, outpoint) in inputs.iter().enumerate() {
            let prev_script = self.prev_script(outpoint);
            tx.inputs[index].script_sig =
                sign_p2pkh_input(&tx, index, &prev_script, &secret).expect("sign");
        }
        tx
    }
}

pub fn coin(value: Amount, tag: u8) -> TxOut {
    TxOut::coin(value, script_of(tag))
}
