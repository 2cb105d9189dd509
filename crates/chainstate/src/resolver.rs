//! Previous-output lookup across the ledger, a block under construction and the mempool.

use std::collections::{HashMap, HashSet};

use mvsd_consensus::Hash256;
use mvsd_primitives::attachment::{AssetDetail, Attachment, CertType};
use mvsd_primitives::outpoint::OutPoint;
use mvsd_primitives::transaction::{Transaction, TxOut};
use mvsd_storage::KeyValueStore;

use crate::ledger::{LedgerError, LedgerStore};

/// What the validator needs to know about unconfirmed transactions.
pub trait MempoolView: Send + Sync {
    fn is_in_pool(&self, txid: &Hash256) -> bool;

    /// Whether another pooled transaction already spends one of `tx`'s inputs.
    fn is_spent_in_pool(&self, tx: &Transaction) -> bool;

    fn find(&self, txid: &Hash256) -> Option<Transaction>;
}

/// A pool with nothing in it.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmptyMempool;

impl MempoolView for EmptyMempool {
    fn is_in_pool(&self, _txid: &Hash256) -> bool {
        false
    }

    fn is_spent_in_pool(&self, _tx: &Transaction) -> bool {
        false
    }

    fn find(&self, _txid: &Hash256) -> Option<Transaction> {
        None
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CandidateOutput {
    pub output: TxOut,
    pub is_coinbase: bool,
}

/// Effects of the transactions already accepted into a block that is not committed yet.
///
/// Outputs stay listed after they are spent; `is_spent` answers the spend question.
#[derive(Clone, Debug, Default)]
pub struct CandidateView {
    height: u64,
    outputs: HashMap<OutPoint, CandidateOutput>,
    spent: HashSet<OutPoint>,
    txids: HashSet<Hash256>,
    /// Assets first issued in this block.
    assets: HashMap<String, AssetDetail>,
    secondary_issues: HashSet<String>,
    certs: HashSet<(CertType, String)>,
    mits: HashSet<String>,
    /// Identity symbol to address.
    dids: HashMap<String, String>,
    did_addresses: HashMap<String, String>,
}

impl CandidateView {
    pub fn new(height: u64) -> Self {
        Self {
            height,
            ..Self::default()
        }
    }

    /// Height the candidate block will occupy.
    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn apply(&mut self, tx: &Transaction) {
        let txid = tx.txid();
        self.txids.insert(txid);
        let is_coinbase = tx.is_coinbase();
        if !is_coinbase {
            for input in &tx.inputs {
                self.spent.insert(input.prevout.clone());
            }
        }
        for (index, output) in tx.outputs.iter().enumerate() {
            self.outputs.insert(
                OutPoint::new(txid, index as u32),
                CandidateOutput {
                    output: output.clone(),
                    is_coinbase,
                },
            );
            self.register(&output.attachment);
        }
    }

    fn register(&mut self, attachment: &Attachment) {
        match attachment {
            Attachment::AssetIssue(detail) => {
                self.assets.insert(detail.symbol.clone(), detail.clone());
            }
            Attachment::AssetSecondaryIssue(detail) => {
                self.secondary_issues.insert(detail.symbol.clone());
            }
            Attachment::AssetCertIssue(cert) | Attachment::AssetCertAutoissue(cert) => {
                self.certs.insert((cert.cert_type, cert.symbol.clone()));
            }
            Attachment::MitRegister(mit) => {
                self.mits.insert(mit.symbol.clone());
            }
            Attachment::DidRegister(did) | Attachment::DidTransfer(did) => {
                if let Some(old) = self.dids.insert(did.symbol.clone(), did.address.clone()) {
                    self.did_addresses.remove(&old);
                }
                self.did_addresses
                    .insert(did.address.clone(), did.symbol.clone());
            }
            _ => {}
        }
    }

    pub fn output(&self, outpoint: &OutPoint) -> Option<&CandidateOutput> {
        self.outputs.get(outpoint)
    }

    pub fn is_spent(&self, outpoint: &OutPoint) -> bool {
        self.spent.contains(outpoint)
    }

    pub fn contains_tx(&self, txid: &Hash256) -> bool {
        self.txids.contains(txid)
    }

    pub fn has_asset(&self, symbol: &str) -> bool {
        self.assets.contains_key(symbol)
    }

    pub fn asset(&self, symbol: &str) -> Option<&AssetDetail> {
        self.assets.get(symbol)
    }

    pub fn has_secondary_issue(&self, symbol: &str) -> bool {
        self.secondary_issues.contains(symbol)
    }

    pub fn has_cert(&self, cert_type: CertType, symbol: &str) -> bool {
        self.certs.contains(&(cert_type, symbol.to_string()))
    }

    pub fn has_mit(&self, symbol: &str) -> bool {
        self.mits.contains(symbol)
    }

    pub fn did_address(&self, symbol: &str) -> Option<&str> {
        self.dids.get(symbol).map(String::as_str)
    }

    pub fn did_for_address(&self, address: &str) -> Option<&str> {
        self.did_addresses.get(address).map(String::as_str)
    }
}

/// Where a transaction is being validated.
#[derive(Clone, Copy)]
pub enum ValidationScope<'a> {
    /// Standalone submission, relative to the mempool.
    Pool(&'a dyn MempoolView),
    /// Inside a block that is being assembled or checked.
    Candidate(&'a CandidateView),
}

impl<'a> ValidationScope<'a> {
    pub fn candidate(&self) -> Option<&'a CandidateView> {
        match *self {
            ValidationScope::Candidate(view) => Some(view),
            ValidationScope::Pool(_) => None,
        }
    }

    pub fn mempool(&self) -> Option<&'a dyn MempoolView> {
        match *self {
            ValidationScope::Pool(pool) => Some(pool),
            ValidationScope::Candidate(_) => None,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolvedOutput {
    pub output: TxOut,
    /// Confirmation height; `None` while unconfirmed.
    pub height: Option<u64>,
    pub is_coinbase: bool,
}

pub struct UtxoResolver<'a, S> {
    ledger: &'a LedgerStore<S>,
    scope: ValidationScope<'a>,
}

impl<'a, S: KeyValueStore> UtxoResolver<'a, S> {
    pub fn new(ledger: &'a LedgerStore<S>, scope: ValidationScope<'a>) -> Self {
        Self { ledger, scope }
    }

    /// Ledger first, then the candidate block or the mempool depending on scope.
    pub fn resolve(&self, outpoint: &OutPoint) -> Result<Option<ResolvedOutput>, LedgerError> {
        if let Some(confirmed) = self.ledger.get_transaction(&outpoint.hash)? {
            let is_coinbase = confirmed.is_coinbase();
            return Ok(confirmed
                .tx
                .outputs
                .into_iter()
                .nth(outpoint.index as usize)
                .map(|output| ResolvedOutput {
                    output,
                    height: Some(confirmed.height),
                    is_coinbase,
                }));
        }
        let resolved = match self.scope {
            ValidationScope::Candidate(view) => view.output(outpoint).map(|found| ResolvedOutput {
                output: found.output.clone(),
                height: None,
                is_coinbase: found.is_coinbase,
            }),
            ValidationScope::Pool(pool) => pool.find(&outpoint.hash).and_then(|tx| {
                tx.outputs
                    .into_iter()
                    .nth(outpoint.index as usize)
                    .map(|output| ResolvedOutput {
                        output,
                        height: None,
                        is_coinbase: false,
                    })
            }),
        };
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mvsd_primitives::attachment::Did;
    use mvsd_primitives::transaction::TxIn;

    fn spend(prevout: OutPoint, outputs: Vec<TxOut>) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxIn::new(prevout)],
            outputs,
            lock_time: 0,
        }
    }

    #[test]
    fn candidate_tracks_spends_and_new_outputs() {
        let mut view = CandidateView::new(7);
        let first = spend(OutPoint::new([1u8; 32], 0), vec![TxOut::coin(50, vec![0x51])]);
        view.apply(&first);
        let created = OutPoint::new(first.txid(), 0);
        assert!(view.output(&created).is_some());
        assert!(view.is_spent(&OutPoint::new([1u8; 32], 0)));

        let second = spend(created.clone(), vec![TxOut::coin(40, vec![0x51])]);
        view.apply(&second);
        // Spent outputs stay resolvable so a second spender reports a double spend.
        assert!(view.output(&created).is_some());
        assert!(view.is_spent(&created));
        assert!(view.contains_tx(&second.txid()));
        assert_eq!(view.height(), 7);
    }

    #[test]
    fn did_transfer_moves_address_binding() {
        let mut view = CandidateView::new(1);
        let did = |address: &str| {
            TxOut::with_attachment(
                0,
                vec![0x51],
                Attachment::DidRegister(Did {
                    symbol: "alice".to_string(),
                    address: address.to_string(),
                }),
            )
        };
        view.apply(&spend(OutPoint::new([2u8; 32], 0), vec![did("addr-a")]));
        let mut moved = did("addr-b");
        if let Attachment::DidRegister(inner) = moved.attachment.clone() {
            moved.attachment = Attachment::DidTransfer(inner);
        }
        view.apply(&spend(OutPoint::new([3u8; 32], 0), vec![moved]));
        assert_eq!(view.did_address("alice"), Some("addr-b"));
        assert_eq!(view.did_for_address("addr-a"), None);
        assert_eq!(view.did_for_address("addr-b"), Some("alice"));
    }
}
