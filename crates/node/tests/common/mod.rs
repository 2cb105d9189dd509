#![allow(dead_code)]

use std::sync::Arc;

use mvsd::assembler::MinerKey;
use mvsd::node::{Node, NodeOptions};
use mvsd_chainstate::block::next_target_bits;
use mvsd_chainstate::ledger::LedgerStore;
use mvsd_consensus::money::Amount;
use mvsd_consensus::{consensus_params, ConsensusMode, ConsensusParams, Network};
use mvsd_pow::solve_header;
use mvsd_primitives::address::{p2pkh_script, script_pubkey_to_address};
use mvsd_primitives::block::{merkle_root, Block, BlockHeader};
use mvsd_primitives::hash::hash160;
use mvsd_primitives::outpoint::OutPoint;
use mvsd_primitives::transaction::{Transaction, TxIn, TxOut};
use mvsd_script::sign::sign_p2pkh_input;
use mvsd_storage::memory::MemoryStore;
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

pub fn pubkey_hash(tag: u8) -> [u8; 20] {
    hash160(&public_key(tag))
}

pub fn script_of(tag: u8) -> Vec<u8> {
    p2pkh_script(&pubkey_hash(tag))
}

pub fn address_of(tag: u8) -> String {
    script_pubkey_to_address(&script_of(tag), Network::Regtest).expect("p2pkh address")
}

pub fn coin(value: Amount, tag: u8) -> TxOut {
    TxOut::coin(value, script_of(tag))
}

pub struct Harness {
    pub ledger: Arc<LedgerStore<MemoryStore>>,
    pub params: Arc<ConsensusParams>,
    pub witnesses: Arc<EpochWitnessSchedule>,
    pub node: Node<MemoryStore>,
}

impl Harness {
    pub fn new(options: NodeOptions) -> Self {
        let params = Arc::new(consensus_params(Network::Regtest));
        let witnesses = Arc::new(EpochWitnessSchedule::new(&params));
        let ledger = Arc::new(LedgerStore::new(MemoryStore::new()));
        let node = Node::new(ledger.clone(), params.clone(), witnesses.clone(), options);
        Self {
            ledger,
            params,
            witnesses,
            node,
        }
    }

    pub fn pow() -> Self {
        Self::new(NodeOptions::default())
    }

    pub fn with_key(mode: ConsensusMode, tag: u8) -> Self {
        Self::new(NodeOptions {
            mode,
            miner_key: Some(MinerKey::new(secret(tag))),
            ..NodeOptions::default()
        })
    }

    /// Another node over the same ledger and witness schedule.
    pub fn node_with(&self, options: NodeOptions) -> Node<MemoryStore> {
        Node::new(
            self.ledger.clone(),
            self.params.clone(),
            self.witnesses.clone(),
            options,
        )
    }

    pub fn next_height(&self) -> u64 {
        self.ledger
            .top_height()
            .expect("top height")
            .map_or(0, |top| top + 1)
    }

    /// Pushes a solved PoW block with the given coinbase outputs, skipping block
    /// validation, to set up ledger state.
    pub fn push_block(&self, coinbase_outputs: Vec<TxOut>, txs: Vec<Transaction>) -> Block {
        let height = self.next_height();
        let prev_hash = self.ledger.tip_hash().expect("tip").unwrap_or([0u8; 32]);
        let mut script_sig = height.to_le_bytes().to_vec();
        script_sig.push(0xee);
        let coinbase = Transaction {
            version: 1,
            inputs: vec![TxIn {
                prevout: OutPoint::null(),
                script_sig,
                sequence: u32::MAX,
            }],
            outputs: coinbase_outputs,
            lock_time: 0,
        };
        let mut transactions = vec![coinbase];
        transactions.extend(txs);
        let txids: Vec<_> = transactions.iter().map(Transaction::txid).collect();
        let mut header = BlockHeader {
            version: ConsensusMode::Pow.block_version(),
            prev_hash,
            merkle_root: merkle_root(&txids).0,
            timestamp: BASE_TIME + height as u32,
            bits: next_target_bits(&self.ledger, ConsensusMode::Pow, &self.params)
                .expect("next bits"),
            height,
            ..BlockHeader::default()
        };
        assert!(solve_header(&mut header, 1_000_000).expect("solve"));
        let block = Block {
            header,
            transactions,
        };
        self.ledger.push(&block).expect("push");
        block
    }

    /// Empty blocks whose coinbase pays 1 COIN to `MINER`.
    pub fn push_empty(&self, count: usize) {
        for _ in 0..count {
            self.push_block(vec![coin(100_000_000, MINER)], Vec::new());
        }
    }

    pub fn coinbase_coin(&self, height: u64) -> OutPoint {
        let block = self
            .ledger
            .get_block_by_height(height)
            .expect("block read")
            .expect("block");
        OutPoint::new(block.transactions[0].txid(), 0)
    }

    /// A signed transaction spending outputs locked to `key`'s P2PKH script.
    pub fn spend(&self, inputs: &[OutPoint], outputs: Vec<TxOut>, key: u8) -> Transaction {
        let mut tx = Transaction {
            version: 1,
            inputs: inputs.iter().cloned().map(TxIn::new).collect(),
            outputs,
            lock_time: 0,
        };
        let secret = secret(key);
        let prev_script = script_of(key);
        for index in 0..inputs.len() {
            tx.inputs[index].script_sig =
                sign_p2pkh_input(&tx, index, &prev_script, &secret).expect("sign");
        }
        tx
    }

    /// Grinds a PoW candidate's nonce.
    pub fn solve(&self, mut block: Block) -> Block {
        assert!(solve_header(&mut block.header, 1_000_000).expect("solve"));
        block
    }
}
