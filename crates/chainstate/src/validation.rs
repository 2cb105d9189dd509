//! Transaction validation.
//!
//! Validation runs as a fixed sequence of stages and stops at the first failure:
//! basic shape, version gate, attachment shape, finality, per-attachment structure,
//! input resolution, then conservation and fees. It never writes to the ledger or
//! the mempool.

use std::collections::HashSet;

use mvsd_consensus::constants::{
    LOCKTIME_THRESHOLD, MAX_TX_SIZE, RELATIVE_LOCKTIME_DISABLED, RELATIVE_LOCKTIME_MASK,
    RELATIVE_LOCKTIME_MIN_VERSION, RELATIVE_LOCKTIME_SECONDS_SHIFT, RELATIVE_LOCKTIME_TIME_LOCKED,
    SEQUENCE_FINAL, TX_VERSION_CHECK_NOVA_FEATURE, TX_VERSION_CHECK_OUTPUT_SCRIPT,
};
use mvsd_consensus::money::{
    checked_money_add, Amount, MAX_MONEY, MIN_FEE_TO_ISSUE_ASSET, MIN_FEE_TO_REGISTER_DID,
};
use mvsd_consensus::{
    feature_active, lock_height_index, tx_version_supported, ConsensusParams, Feature, Hash256,
    VersionGate,
};
use mvsd_primitives::address::script_pubkey_to_address;
use mvsd_primitives::attachment::{domain_of, AssetCert, AssetDetail, Attachment, CertType};
use mvsd_primitives::hash::hash_to_hex;
use mvsd_primitives::outpoint::OutPoint;
use mvsd_primitives::transaction::Transaction;
use mvsd_script::interpreter::{BLOCK_SCRIPT_VERIFY_FLAGS, STANDARD_SCRIPT_VERIFY_FLAGS};
use mvsd_script::standard::{is_standard_script, transaction_sigops};
use mvsd_script::{lock_height_from_script, verify_script, ScriptError};
use mvsd_storage::KeyValueStore;
use smallvec::SmallVec;

use crate::ledger::{LedgerError, LedgerStore};
use crate::resolver::{ResolvedOutput, UtxoResolver, ValidationScope};
use crate::rules;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    CoinbaseTransaction,
    CoinstakeTransaction,
    EmptyTransaction,
    SizeLimitExceeded,
    DuplicateInput,
    PreviousOutputNull,
    OutputValueOverflow,
    Duplicate,
    InvalidVersion(u32),
    VersionNotActivated,
    NonStandardScript,
    LockHeightInvalid,
    AttachmentInvalid(&'static str),
    NonFinalTransaction,
    SequenceLocked,
    AssetIssueError(&'static str),
    AssetAlreadyExists,
    AssetSymbolMismatch,
    AssetAmountNotEqual,
    AssetSecondaryIssueError(&'static str),
    AssetCertError(&'static str),
    AssetCertNotOwned,
    AssetCertAlreadyExists,
    IdentifiableTokenError(&'static str),
    DidSymbolMismatch,
    DidAlreadyExists,
    AddressAlreadyHasDid,
    DidInputMissing,
    DidAddressNotOwned,
    InputNotFound(OutPoint),
    CoinbaseImmature,
    LockHeightNotReached,
    ScriptVerificationFailed(ScriptError),
    DoubleSpend,
    FeesOutOfRange,
    Store(LedgerError),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::CoinbaseTransaction => write!(f, "coinbase transaction outside a block"),
            ValidationError::CoinstakeTransaction => {
                write!(f, "coinstake transaction outside its block position")
            }
            ValidationError::EmptyTransaction => write!(f, "transaction has no inputs or outputs"),
            ValidationError::SizeLimitExceeded => write!(f, "transaction too large"),
            ValidationError::DuplicateInput => write!(f, "transaction spends an output twice"),
            ValidationError::PreviousOutputNull => write!(f, "input references a null outpoint"),
            ValidationError::OutputValueOverflow => write!(f, "output value out of range"),
            ValidationError::Duplicate => write!(f, "transaction already known"),
            ValidationError::InvalidVersion(version) => {
                write!(f, "unknown transaction version {version}")
            }
            ValidationError::VersionNotActivated => {
                write!(f, "transaction uses a feature that is not active yet")
            }
            ValidationError::NonStandardScript => write!(f, "non-standard output script"),
            ValidationError::LockHeightInvalid => write!(f, "unsupported deposit lock height"),
            ValidationError::AttachmentInvalid(message) => write!(f, "invalid attachment: {message}"),
            ValidationError::NonFinalTransaction => write!(f, "transaction is not final"),
            ValidationError::SequenceLocked => write!(f, "input relative lock has not matured"),
            ValidationError::AssetIssueError(message) => write!(f, "asset issue: {message}"),
            ValidationError::AssetAlreadyExists => write!(f, "asset symbol already registered"),
            ValidationError::AssetSymbolMismatch => write!(f, "asset symbols do not match"),
            ValidationError::AssetAmountNotEqual => {
                write!(f, "asset input and output amounts differ")
            }
            ValidationError::AssetSecondaryIssueError(message) => {
                write!(f, "secondary issue: {message}")
            }
            ValidationError::AssetCertError(message) => write!(f, "asset certificate: {message}"),
            ValidationError::AssetCertNotOwned => {
                write!(f, "certificate owner does not control the certificate address")
            }
            ValidationError::AssetCertAlreadyExists => write!(f, "certificate already exists"),
            ValidationError::IdentifiableTokenError(message) => {
                write!(f, "identifiable token: {message}")
            }
            ValidationError::DidSymbolMismatch => write!(f, "identity symbols do not match"),
            ValidationError::DidAlreadyExists => write!(f, "identity already registered"),
            ValidationError::AddressAlreadyHasDid => write!(f, "address already has an identity"),
            ValidationError::DidInputMissing => {
                write!(f, "identity transfer needs an input from the new address")
            }
            ValidationError::DidAddressNotOwned => {
                write!(f, "identity does not resolve to the expected address")
            }
            ValidationError::InputNotFound(outpoint) => write!(f, "input {outpoint} not found"),
            ValidationError::CoinbaseImmature => write!(f, "coinbase output spent before maturity"),
            ValidationError::LockHeightNotReached => {
                write!(f, "deposit spent before its lock height")
            }
            ValidationError::ScriptVerificationFailed(err) => {
                write!(f, "script verification failed: {err}")
            }
            ValidationError::DoubleSpend => write!(f, "input already spent"),
            ValidationError::FeesOutOfRange => write!(f, "fee out of range"),
            ValidationError::Store(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ValidationError {}

impl From<LedgerError> for ValidationError {
    fn from(err: LedgerError) -> Self {
        ValidationError::Store(err)
    }
}

/// Per-call policy toggles.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ValidationFlags {
    pub check_script: bool,
    /// Reject transactions already in the mempool (standalone submission only).
    pub check_pool_duplicate: bool,
    /// Reject inputs that a confirmed transaction already spends.
    pub check_chain_double_spend: bool,
}

impl ValidationFlags {
    pub const fn standalone() -> Self {
        Self {
            check_script: true,
            check_pool_duplicate: true,
            check_chain_double_spend: true,
        }
    }

    pub const fn block_assembly() -> Self {
        Self {
            check_script: true,
            check_pool_duplicate: false,
            check_chain_double_spend: true,
        }
    }
}

impl Default for ValidationFlags {
    fn default() -> Self {
        Self::standalone()
    }
}

/// Totals accumulated while a transaction is validated.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValidationContext {
    pub txid: Hash256,
    pub target_height: u64,
    pub size: usize,
    pub sigops: u32,
    pub coin_in: Amount,
    pub coin_out: Amount,
    pub fee: Amount,
    /// The one asset symbol this transaction may move.
    pub asset_symbol: Option<String>,
    pub asset_in: u64,
    pub asset_out: u64,
    pub cert_symbol: Option<String>,
    pub cert_inputs: SmallVec<[(CertType, String); 2]>,
    pub mit_inputs: SmallVec<[String; 1]>,
    pub did_inputs: SmallVec<[String; 1]>,
    pub input_scripts: Vec<Vec<u8>>,
    /// Sum of input value times confirmations.
    pub coin_age: u128,
}

impl ValidationContext {
    /// Coin-age priority per serialized byte.
    pub fn priority(&self) -> f64 {
        if self.size == 0 {
            return 0.0;
        }
        self.coin_age as f64 / self.size as f64
    }

    pub fn fee_per_kb(&self) -> f64 {
        if self.size == 0 {
            return 0.0;
        }
        self.fee as f64 * 1000.0 / self.size as f64
    }

    fn fold_asset(&mut self, symbol: &str, amount: u64) -> Result<(), ValidationError> {
        match &self.asset_symbol {
            Some(existing) if existing != symbol => return Err(ValidationError::AssetSymbolMismatch),
            Some(_) => {}
            None => self.asset_symbol = Some(symbol.to_string()),
        }
        self.asset_in = self
            .asset_in
            .checked_add(amount)
            .ok_or(ValidationError::AssetAmountNotEqual)?;
        Ok(())
    }

    fn fold_cert(&mut self, cert: &AssetCert) -> Result<(), ValidationError> {
        match &self.cert_symbol {
            Some(existing) if *existing != domain_of(&cert.symbol) => {
                return Err(ValidationError::AssetCertError(
                    "certificate inputs span several symbols",
                ))
            }
            Some(_) => {}
            None => self.cert_symbol = Some(domain_of(&cert.symbol).to_string()),
        }
        self.cert_inputs.push((cert.cert_type, cert.symbol.clone()));
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Role {
    Regular,
    Coinstake,
}

pub struct TransactionValidator<'a, S> {
    ledger: &'a LedgerStore<S>,
    params: &'a ConsensusParams,
}

impl<'a, S: KeyValueStore> TransactionValidator<'a, S> {
    pub fn new(ledger: &'a LedgerStore<S>, params: &'a ConsensusParams) -> Self {
        Self { ledger, params }
    }

    pub fn validate(
        &self,
        tx: &Transaction,
        scope: ValidationScope<'_>,
        flags: ValidationFlags,
    ) -> Result<ValidationContext, ValidationError> {
        self.run(tx, scope, flags, Role::Regular)
    }

    /// Validates the second transaction of a stake block, whose fee must be zero.
    pub fn validate_coinstake(
        &self,
        tx: &Transaction,
        scope: ValidationScope<'_>,
        flags: ValidationFlags,
    ) -> Result<ValidationContext, ValidationError> {
        self.run(tx, scope, flags, Role::Coinstake)
    }

    fn run(
        &self,
        tx: &Transaction,
        scope: ValidationScope<'_>,
        flags: ValidationFlags,
        role: Role,
    ) -> Result<ValidationContext, ValidationError> {
        let target_height = match scope.candidate() {
            Some(view) => view.height(),
            None => self.ledger.top_height()?.map_or(0, |top| top + 1),
        };
        let mut check = Check {
            ledger: self.ledger,
            params: self.params,
            tx,
            scope,
            flags,
            role,
            ctx: ValidationContext {
                txid: tx.txid(),
                target_height,
                size: tx.serialized_size(),
                sigops: transaction_sigops(tx),
                ..ValidationContext::default()
            },
            secondary: None,
        };
        check.basic()?;
        check.version_gate()?;
        check.attachment_shape()?;
        check.finality()?;
        check.asset_issue()?;
        check.asset_certs()?;
        check.secondary_issue()?;
        check.identifiable_tokens()?;
        check.identities()?;
        check.inputs()?;
        check.conservation()?;
        Ok(check.ctx)
    }
}

/// Existing supply and threshold of the asset a secondary issue targets.
struct SecondaryIssue {
    threshold: u8,
    total_supply: u64,
}

struct Check<'v, S> {
    ledger: &'v LedgerStore<S>,
    params: &'v ConsensusParams,
    tx: &'v Transaction,
    scope: ValidationScope<'v>,
    flags: ValidationFlags,
    role: Role,
    ctx: ValidationContext,
    secondary: Option<SecondaryIssue>,
}

impl<S: KeyValueStore> Check<'_, S> {
    fn reject(&self, err: ValidationError) -> ValidationError {
        mvsd_log::log_debug!("rejected tx {}: {err}", hash_to_hex(&self.ctx.txid));
        err
    }

    fn basic(&self) -> Result<(), ValidationError> {
        let tx = self.tx;
        if tx.is_coinbase() {
            return Err(ValidationError::CoinbaseTransaction);
        }
        if tx.is_coinstake() != (self.role == Role::Coinstake) {
            return Err(ValidationError::CoinstakeTransaction);
        }
        if tx.inputs.is_empty() || tx.outputs.is_empty() {
            return Err(ValidationError::EmptyTransaction);
        }
        if self.ctx.size > MAX_TX_SIZE as usize {
            return Err(ValidationError::SizeLimitExceeded);
        }
        let mut seen = HashSet::with_capacity(tx.inputs.len());
        for input in &tx.inputs {
            if input.prevout.is_null() {
                return Err(ValidationError::PreviousOutputNull);
            }
            if !seen.insert(&input.prevout) {
                return Err(ValidationError::DuplicateInput);
            }
        }
        if tx.total_output_value().is_none() {
            return Err(ValidationError::OutputValueOverflow);
        }
        let txid = &self.ctx.txid;
        if self.ledger.contains_transaction(txid)? {
            return Err(ValidationError::Duplicate);
        }
        match self.scope {
            ValidationScope::Candidate(view) => {
                if view.contains_tx(txid) {
                    return Err(ValidationError::Duplicate);
                }
            }
            ValidationScope::Pool(pool) => {
                if self.flags.check_pool_duplicate && pool.is_in_pool(txid) {
                    return Err(ValidationError::Duplicate);
                }
            }
        }
        Ok(())
    }

    fn version_gate(&self) -> Result<(), ValidationError> {
        let tx = self.tx;
        let height = self.ctx.target_height;
        match tx_version_supported(tx.version, height, self.params) {
            VersionGate::Supported => {}
            VersionGate::NotActivated => return Err(ValidationError::VersionNotActivated),
            VersionGate::Unknown => return Err(ValidationError::InvalidVersion(tx.version)),
        }
        let nova_active = feature_active(Feature::Nova, height, self.params);
        for output in &tx.outputs {
            let uses_nova = output.attachment.requires_nova()
                || output.from_did.is_some()
                || output.to_did.is_some();
            if uses_nova && (!nova_active || tx.version < TX_VERSION_CHECK_NOVA_FEATURE) {
                return Err(ValidationError::VersionNotActivated);
            }
            if let Some(lock_height) = lock_height_from_script(&output.script_pubkey) {
                if lock_height_index(lock_height, self.params).is_none() {
                    return Err(ValidationError::LockHeightInvalid);
                }
            }
            if tx.version >= TX_VERSION_CHECK_OUTPUT_SCRIPT
                && !(self.role == Role::Coinstake && output.is_empty())
                && !is_standard_script(&output.script_pubkey)
            {
                return Err(ValidationError::NonStandardScript);
            }
        }
        Ok(())
    }

    fn attachment_shape(&self) -> Result<(), ValidationError> {
        for output in &self.tx.outputs {
            rules::check_output_attachment(output, self.params.network)
                .map_err(|reason| self.reject(ValidationError::AttachmentInvalid(reason)))?;
        }
        Ok(())
    }

    fn finality(&self) -> Result<(), ValidationError> {
        let tx = self.tx;
        let height = self.ctx.target_height;
        let tip_time = match height.checked_sub(1) {
            Some(top) => self.ledger.median_time_past(top)?.unwrap_or(0),
            None => 0,
        };
        if !is_final(tx, height, tip_time) {
            return Err(ValidationError::NonFinalTransaction);
        }
        if tx.version < RELATIVE_LOCKTIME_MIN_VERSION {
            return Ok(());
        }
        let resolver = UtxoResolver::new(self.ledger, self.scope);
        for input in &tx.inputs {
            if input.sequence & RELATIVE_LOCKTIME_DISABLED != 0 {
                continue;
            }
            let Some(prev) = resolver.resolve(&input.prevout)? else {
                continue;
            };
            let prev_height = prev.height.unwrap_or(height);
            let value = (input.sequence & RELATIVE_LOCKTIME_MASK) as u64;
            let locked = if input.sequence & RELATIVE_LOCKTIME_TIME_LOCKED != 0 {
                let prev_time = match prev.height.and_then(|h| h.checked_sub(1)) {
                    Some(before) => self.ledger.median_time_past(before)?.unwrap_or(0),
                    None => tip_time,
                };
                (prev_time as u64) + (value << RELATIVE_LOCKTIME_SECONDS_SHIFT) > tip_time as u64
            } else {
                prev_height + value > height
            };
            if locked {
                return Err(ValidationError::SequenceLocked);
            }
        }
        Ok(())
    }

    fn asset_exists(&self, symbol: &str) -> Result<bool, ValidationError> {
        if self.scope.candidate().is_some_and(|view| view.has_asset(symbol)) {
            return Ok(true);
        }
        Ok(self.ledger.asset(symbol)?.is_some())
    }

    fn cert_exists(&self, cert_type: CertType, symbol: &str) -> Result<bool, ValidationError> {
        if self
            .scope
            .candidate()
            .is_some_and(|view| view.has_cert(cert_type, symbol))
        {
            return Ok(true);
        }
        Ok(self.ledger.cert(cert_type, symbol)?.is_some())
    }

    /// Address bound to identity `symbol`: this transaction, then the candidate block, then the ledger.
    fn did_address(&self, symbol: &str) -> Result<Option<String>, ValidationError> {
        let local = self.tx.outputs.iter().find_map(|output| {
            output
                .attachment
                .did()
                .filter(|did| did.symbol == symbol)
                .map(|did| did.address.clone())
        });
        if local.is_some() {
            return Ok(local);
        }
        if let Some(address) = self.scope.candidate().and_then(|view| view.did_address(symbol)) {
            return Ok(Some(address.to_string()));
        }
        Ok(self.ledger.did(symbol)?.map(|record| record.did.address))
    }

    /// Identity bound to `address` before this transaction.
    fn did_of_address(&self, address: &str) -> Result<Option<String>, ValidationError> {
        if let Some(view) = self.scope.candidate() {
            if let Some(symbol) = view.did_for_address(address) {
                return Ok(Some(symbol.to_string()));
            }
        }
        let Some(record) = self.ledger.did_by_address(address)? else {
            return Ok(None);
        };
        let moved = self
            .scope
            .candidate()
            .and_then(|view| view.did_address(&record.did.symbol))
            .is_some_and(|current| current != address);
        Ok((!moved).then_some(record.did.symbol))
    }

    fn issued_asset(&self) -> Option<&AssetDetail> {
        self.tx.outputs.iter().find_map(|output| match &output.attachment {
            Attachment::AssetIssue(detail) => Some(detail),
            _ => None,
        })
    }

    fn has_cert_output(&self, cert_type: CertType, symbol: &str, owner: Option<&str>) -> bool {
        self.tx.outputs.iter().any(|output| {
            output.attachment.cert().is_some_and(|cert| {
                cert.cert_type == cert_type
                    && cert.symbol == symbol
                    && owner.map_or(true, |owner| cert.owner == owner)
            })
        })
    }

    fn asset_issue(&self) -> Result<(), ValidationError> {
        let issues = self
            .tx
            .outputs
            .iter()
            .filter(|output| matches!(output.attachment, Attachment::AssetIssue(_)))
            .count();
        if issues == 0 {
            return Ok(());
        }
        if issues > 1 {
            return Err(ValidationError::AssetIssueError("more than one asset issue"));
        }
        let Some(detail) = self.issued_asset() else {
            return Ok(());
        };
        if self.asset_exists(&detail.symbol)? {
            return Err(self.reject(ValidationError::AssetAlreadyExists));
        }
        for output in &self.tx.outputs {
            match &output.attachment {
                Attachment::AssetTransfer(_)
                | Attachment::AssetSecondaryIssue(_)
                | Attachment::MitRegister(_)
                | Attachment::MitTransfer(_)
                | Attachment::DidRegister(_)
                | Attachment::DidTransfer(_) => {
                    return Err(ValidationError::AssetIssueError(
                        "issue transaction carries unrelated attachments",
                    ))
                }
                _ => {}
            }
        }
        let domain = domain_of(&detail.symbol);
        if self.cert_exists(CertType::Domain, domain)? {
            let issuer = Some(detail.issuer.as_str());
            let covered = self.has_cert_output(CertType::Domain, domain, issuer)
                || self.has_cert_output(CertType::Naming, &detail.symbol, issuer);
            if !covered {
                return Err(ValidationError::AssetCertError(
                    "issuing under a registered domain needs its domain or naming certificate",
                ));
            }
        }
        Ok(())
    }

    fn asset_certs(&self) -> Result<(), ValidationError> {
        let issued = self.issued_asset();
        let mut seen = HashSet::new();
        for output in &self.tx.outputs {
            let Some(cert) = output.attachment.cert() else {
                continue;
            };
            if !seen.insert((cert.cert_type, cert.symbol.as_str())) {
                return Err(ValidationError::AssetCertError("certificate appears twice"));
            }
            match &output.attachment {
                Attachment::AssetCertAutoissue(cert) => {
                    let Some(detail) = issued else {
                        return Err(ValidationError::AssetCertError(
                            "autoissued certificate without an asset issue",
                        ));
                    };
                    if cert.owner != detail.issuer {
                        return Err(ValidationError::AssetCertError(
                            "autoissued certificate owner differs from the issuer",
                        ));
                    }
                    let expected = match cert.cert_type {
                        CertType::Issue => detail.symbol.as_str(),
                        CertType::Domain => domain_of(&detail.symbol),
                        _ => {
                            return Err(ValidationError::AssetCertError(
                                "certificate type cannot be autoissued",
                            ))
                        }
                    };
                    if cert.symbol != expected {
                        return Err(ValidationError::AssetCertError(
                            "autoissued certificate does not match the issued asset",
                        ));
                    }
                    if self.cert_exists(cert.cert_type, &cert.symbol)? {
                        return Err(ValidationError::AssetCertAlreadyExists);
                    }
                }
                Attachment::AssetCertIssue(cert) => {
                    if self.cert_exists(cert.cert_type, &cert.symbol)? {
                        return Err(self.reject(ValidationError::AssetCertAlreadyExists));
                    }
                    match cert.cert_type {
                        CertType::Naming => {
                            if !self.has_cert_output(CertType::Domain, domain_of(&cert.symbol), None)
                            {
                                return Err(ValidationError::AssetCertError(
                                    "naming certificate needs its domain certificate",
                                ));
                            }
                        }
                        CertType::Mining => {
                            if !self.has_cert_output(CertType::Issue, &cert.symbol, None) {
                                return Err(ValidationError::AssetCertError(
                                    "mining certificate needs the issue certificate",
                                ));
                            }
                        }
                        CertType::Witness => {
                            if cert.symbol.contains('.')
                                && !self.has_cert_output(
                                    CertType::Witness,
                                    domain_of(&cert.symbol),
                                    None,
                                )
                            {
                                return Err(ValidationError::AssetCertError(
                                    "secondary witness certificate needs the primary one",
                                ));
                            }
                        }
                        CertType::Issue | CertType::Domain => {
                            return Err(ValidationError::AssetCertError(
                                "certificate type cannot be issued directly",
                            ))
                        }
                    }
                }
                _ => {}
            }
            if matches!(cert.cert_type, CertType::Domain | CertType::Naming) {
                if let Some(address) = self.did_address(&cert.owner)? {
                    if address != cert.address {
                        return Err(self.reject(ValidationError::AssetCertNotOwned));
                    }
                }
            }
        }
        Ok(())
    }

    fn secondary_issue(&mut self) -> Result<(), ValidationError> {
        let issues: Vec<&AssetDetail> = self
            .tx
            .outputs
            .iter()
            .filter_map(|output| match &output.attachment {
                Attachment::AssetSecondaryIssue(detail) => Some(detail),
                _ => None,
            })
            .collect();
        let detail = match issues.as_slice() {
            [] => return Ok(()),
            [detail] => *detail,
            _ => {
                return Err(ValidationError::AssetSecondaryIssueError(
                    "more than one secondary issue",
                ))
            }
        };
        // An asset issued earlier in the same candidate block has its full issue as supply.
        let (threshold, total_supply) = match self.ledger.asset(&detail.symbol)? {
            Some(record) => (record.detail.secondary_issue_threshold, record.total_supply),
            None => match self
                .scope
                .candidate()
                .and_then(|view| view.asset(&detail.symbol))
            {
                Some(issued) => (issued.secondary_issue_threshold, issued.maximum_supply),
                None => return Err(ValidationError::AssetSecondaryIssueError("asset not found")),
            },
        };
        if self
            .scope
            .candidate()
            .is_some_and(|view| view.has_secondary_issue(&detail.symbol))
        {
            return Err(self.reject(ValidationError::AssetSecondaryIssueError(
                "competing secondary issue in the same block",
            )));
        }
        if threshold == 0 {
            return Err(ValidationError::AssetSecondaryIssueError(
                "asset does not allow secondary issues",
            ));
        }
        if total_supply.checked_add(detail.maximum_supply).is_none() {
            return Err(ValidationError::AssetSecondaryIssueError("supply overflow"));
        }
        if !self.has_cert_output(CertType::Issue, &detail.symbol, None) {
            return Err(ValidationError::AssetSecondaryIssueError(
                "secondary issue needs the issue certificate",
            ));
        }
        for output in &self.tx.outputs {
            match &output.attachment {
                Attachment::AssetTransfer(transfer) if transfer.symbol != detail.symbol => {
                    return Err(ValidationError::AssetSymbolMismatch)
                }
                Attachment::AssetIssue(_) => {
                    return Err(ValidationError::AssetSecondaryIssueError(
                        "secondary issue combined with a new issue",
                    ))
                }
                _ => {}
            }
        }
        self.secondary = Some(SecondaryIssue {
            threshold,
            total_supply,
        });
        Ok(())
    }

    fn identifiable_tokens(&self) -> Result<(), ValidationError> {
        let mut registered = HashSet::new();
        let mut transfers = 0usize;
        for output in &self.tx.outputs {
            let (mit, is_register) = match &output.attachment {
                Attachment::MitRegister(mit) => (mit, true),
                Attachment::MitTransfer(mit) => (mit, false),
                _ => continue,
            };
            let paid_to = script_pubkey_to_address(&output.script_pubkey, self.params.network);
            if paid_to.as_deref() != Some(mit.address.as_str()) {
                return Err(ValidationError::IdentifiableTokenError(
                    "token address does not match the output",
                ));
            }
            if is_register {
                if !registered.insert(mit.symbol.as_str()) {
                    return Err(ValidationError::IdentifiableTokenError("token registered twice"));
                }
                let exists = self
                    .scope
                    .candidate()
                    .is_some_and(|view| view.has_mit(&mit.symbol))
                    || self.ledger.mit(&mit.symbol)?.is_some();
                if exists {
                    return Err(ValidationError::IdentifiableTokenError("token already exists"));
                }
            } else {
                transfers += 1;
                let exists = self
                    .scope
                    .candidate()
                    .is_some_and(|view| view.has_mit(&mit.symbol))
                    || self.ledger.mit(&mit.symbol)?.is_some();
                if !exists {
                    return Err(ValidationError::IdentifiableTokenError("token not found"));
                }
            }
        }
        if transfers > 1 {
            return Err(ValidationError::IdentifiableTokenError(
                "more than one token transfer",
            ));
        }
        if transfers > 0 && !registered.is_empty() {
            return Err(ValidationError::IdentifiableTokenError(
                "cannot register and transfer tokens together",
            ));
        }
        Ok(())
    }

    fn identities(&self) -> Result<(), ValidationError> {
        let network = self.params.network;
        let mut did_outputs = self
            .tx
            .outputs
            .iter()
            .filter(|output| output.attachment.did().is_some());
        if let Some(output) = did_outputs.next() {
            if did_outputs.next().is_some() {
                return Err(ValidationError::DidSymbolMismatch);
            }
            let paid_to = script_pubkey_to_address(&output.script_pubkey, network);
            match &output.attachment {
                Attachment::DidRegister(did) => {
                    if paid_to.as_deref() != Some(did.address.as_str()) {
                        return Err(ValidationError::DidAddressNotOwned);
                    }
                    let exists = self
                        .scope
                        .candidate()
                        .is_some_and(|view| view.did_address(&did.symbol).is_some())
                        || self.ledger.did(&did.symbol)?.is_some();
                    if exists {
                        return Err(self.reject(ValidationError::DidAlreadyExists));
                    }
                    if self.did_of_address(&did.address)?.is_some() {
                        return Err(ValidationError::AddressAlreadyHasDid);
                    }
                }
                Attachment::DidTransfer(did) => {
                    if self.tx.inputs.len() < 2 {
                        return Err(self.reject(ValidationError::DidInputMissing));
                    }
                    if paid_to.as_deref() != Some(did.address.as_str()) {
                        return Err(ValidationError::DidAddressNotOwned);
                    }
                    let known = self
                        .scope
                        .candidate()
                        .is_some_and(|view| view.did_address(&did.symbol).is_some())
                        || self.ledger.did(&did.symbol)?.is_some();
                    if !known {
                        return Err(ValidationError::DidSymbolMismatch);
                    }
                    if self.did_of_address(&did.address)?.is_some() {
                        return Err(ValidationError::AddressAlreadyHasDid);
                    }
                }
                _ => {}
            }
        }

        for output in &self.tx.outputs {
            if let Some(to_did) = &output.to_did {
                let Some(address) = self.did_address(to_did)? else {
                    return Err(ValidationError::DidSymbolMismatch);
                };
                let paid_to = script_pubkey_to_address(&output.script_pubkey, network);
                if paid_to.as_deref() != Some(address.as_str()) {
                    return Err(ValidationError::DidAddressNotOwned);
                }
            }
            if let Some(from_did) = &output.from_did {
                if self.did_address(from_did)?.is_none() {
                    return Err(ValidationError::DidSymbolMismatch);
                }
            }
        }
        Ok(())
    }

    fn inputs(&mut self) -> Result<(), ValidationError> {
        let resolver = UtxoResolver::new(self.ledger, self.scope);
        let script_flags = match self.scope {
            ValidationScope::Pool(_) => STANDARD_SCRIPT_VERIFY_FLAGS,
            ValidationScope::Candidate(_) => BLOCK_SCRIPT_VERIFY_FLAGS,
        };
        let target_height = self.ctx.target_height;
        let tx = self.tx;
        for (index, input) in tx.inputs.iter().enumerate() {
            let Some(prev) = resolver.resolve(&input.prevout)? else {
                return Err(self.reject(ValidationError::InputNotFound(input.prevout.clone())));
            };
            let confirmations = prev
                .height
                .map_or(0, |height| target_height.saturating_sub(height));
            if prev.is_coinbase
                && (prev.height.is_none() || confirmations < self.params.coinbase_maturity)
            {
                return Err(self.reject(ValidationError::CoinbaseImmature));
            }
            if let Some(lock_height) = lock_height_from_script(&prev.output.script_pubkey) {
                let unlocked = prev
                    .height
                    .is_some_and(|height| target_height >= height.saturating_add(lock_height));
                if !unlocked {
                    return Err(ValidationError::LockHeightNotReached);
                }
            }
            self.fold_input(&prev, confirmations)?;

            if self.flags.check_script {
                verify_script(
                    &input.script_sig,
                    &prev.output.script_pubkey,
                    tx,
                    index,
                    script_flags,
                )
                .map_err(|err| self.reject(ValidationError::ScriptVerificationFailed(err)))?;
            }

            if self.flags.check_chain_double_spend
                && self.ledger.get_spender(&input.prevout)?.is_some()
            {
                return Err(self.reject(ValidationError::DoubleSpend));
            }
            if self
                .scope
                .candidate()
                .is_some_and(|view| view.is_spent(&input.prevout))
            {
                return Err(self.reject(ValidationError::DoubleSpend));
            }
        }
        if self
            .scope
            .mempool()
            .is_some_and(|pool| pool.is_spent_in_pool(tx))
        {
            return Err(self.reject(ValidationError::DoubleSpend));
        }
        Ok(())
    }

    fn fold_input(&mut self, prev: &ResolvedOutput, confirmations: u64) -> Result<(), ValidationError> {
        let ctx = &mut self.ctx;
        ctx.coin_in =
            checked_money_add(ctx.coin_in, prev.output.value).ok_or(ValidationError::FeesOutOfRange)?;
        ctx.coin_age += prev.output.value as u128 * confirmations as u128;
        ctx.input_scripts.push(prev.output.script_pubkey.clone());
        let attachment = &prev.output.attachment;
        if let Some(symbol) = attachment.asset_symbol() {
            ctx.fold_asset(symbol, attachment.asset_amount())?;
        }
        if let Some(cert) = attachment.cert() {
            ctx.fold_cert(cert)?;
        }
        if let Some(mit) = attachment.mit() {
            ctx.mit_inputs.push(mit.symbol.clone());
        }
        if let Some(did) = attachment.did() {
            ctx.did_inputs.push(did.symbol.clone());
        }
        Ok(())
    }

    fn conservation(&mut self) -> Result<(), ValidationError> {
        self.coin_fee()?;
        self.asset_amounts()?;
        self.cert_backing()?;
        self.token_backing()?;
        self.identity_backing()
    }

    fn coin_fee(&mut self) -> Result<(), ValidationError> {
        let coin_out = self
            .tx
            .total_output_value()
            .ok_or(ValidationError::OutputValueOverflow)?;
        self.ctx.coin_out = coin_out;
        if self.role == Role::Coinstake {
            if self.ctx.coin_in != coin_out {
                return Err(self.reject(ValidationError::FeesOutOfRange));
            }
            self.ctx.fee = 0;
            return Ok(());
        }
        let Some(fee) = self.ctx.coin_in.checked_sub(coin_out) else {
            return Err(self.reject(ValidationError::FeesOutOfRange));
        };
        let registers_did = self
            .tx
            .outputs
            .iter()
            .any(|output| matches!(output.attachment, Attachment::DidRegister(_)));
        let floor = if self.issued_asset().is_some() {
            MIN_FEE_TO_ISSUE_ASSET
        } else if registers_did {
            MIN_FEE_TO_REGISTER_DID
        } else {
            self.params.min_tx_fee
        };
        if fee < floor || fee > MAX_MONEY {
            return Err(self.reject(ValidationError::FeesOutOfRange));
        }
        self.ctx.fee = fee;
        Ok(())
    }

    fn asset_amounts(&mut self) -> Result<(), ValidationError> {
        let mut out_symbol: Option<&str> = None;
        let mut transferred: u64 = 0;
        for output in &self.tx.outputs {
            if let Attachment::AssetTransfer(transfer) = &output.attachment {
                match out_symbol {
                    Some(symbol) if symbol != transfer.symbol => {
                        return Err(ValidationError::AssetSymbolMismatch)
                    }
                    _ => out_symbol = Some(&transfer.symbol),
                }
                transferred = transferred
                    .checked_add(transfer.quantity)
                    .ok_or(ValidationError::AssetAmountNotEqual)?;
            }
        }
        self.ctx.asset_out = transferred;

        if let Some(detail) = self.issued_asset() {
            self.ctx.asset_out = transferred.saturating_add(detail.maximum_supply);
            if self.ctx.asset_in > 0 {
                return Err(ValidationError::AssetSymbolMismatch);
            }
            return Ok(());
        }

        if let (Some(in_symbol), Some(out)) = (self.ctx.asset_symbol.as_deref(), out_symbol) {
            if in_symbol != out {
                return Err(self.reject(ValidationError::AssetSymbolMismatch));
            }
        }
        if self.ctx.asset_in != transferred {
            return Err(self.reject(ValidationError::AssetAmountNotEqual));
        }
        if let Some(secondary) = &self.secondary {
            if !rules::secondary_issue_allowed(
                secondary.threshold,
                self.ctx.asset_in,
                secondary.total_supply,
            ) {
                return Err(ValidationError::AssetSecondaryIssueError(
                    "issuer holds less than the required share",
                ));
            }
        }
        Ok(())
    }

    fn cert_backing(&self) -> Result<(), ValidationError> {
        for output in &self.tx.outputs {
            if let Attachment::AssetCertTransfer(cert) = &output.attachment {
                let backed = self
                    .ctx
                    .cert_inputs
                    .iter()
                    .any(|(kind, symbol)| *kind == cert.cert_type && *symbol == cert.symbol);
                if !backed {
                    return Err(self.reject(ValidationError::AssetCertError(
                        "transferred certificate is not among the inputs",
                    )));
                }
            }
        }
        for (kind, symbol) in &self.ctx.cert_inputs {
            if !self.has_cert_output(*kind, symbol, None) {
                return Err(ValidationError::AssetCertError(
                    "certificate input is not carried forward",
                ));
            }
        }
        Ok(())
    }

    fn token_backing(&self) -> Result<(), ValidationError> {
        let transfer = self.tx.outputs.iter().find_map(|output| match &output.attachment {
            Attachment::MitTransfer(mit) => Some(mit),
            _ => None,
        });
        match transfer {
            Some(mit) => {
                if self.ctx.mit_inputs.len() != 1 || self.ctx.mit_inputs[0] != mit.symbol {
                    return Err(ValidationError::IdentifiableTokenError(
                        "token transfer must spend exactly that token",
                    ));
                }
            }
            None => {
                if !self.ctx.mit_inputs.is_empty() {
                    return Err(ValidationError::IdentifiableTokenError(
                        "token input without a transfer output",
                    ));
                }
            }
        }
        Ok(())
    }

    fn identity_backing(&self) -> Result<(), ValidationError> {
        let transfer = self.tx.outputs.iter().find_map(|output| match &output.attachment {
            Attachment::DidTransfer(did) => Some(did),
            _ => None,
        });
        match transfer {
            Some(did) => {
                if !self.ctx.did_inputs.iter().any(|symbol| *symbol == did.symbol) {
                    return Err(self.reject(ValidationError::DidSymbolMismatch));
                }
                if self.ctx.did_inputs.len() > 1 {
                    return Err(ValidationError::DidSymbolMismatch);
                }
            }
            None => {
                if !self.ctx.did_inputs.is_empty() {
                    return Err(ValidationError::DidSymbolMismatch);
                }
            }
        }

        let network = self.params.network;
        for output in &self.tx.outputs {
            let Some(from_did) = &output.from_did else {
                continue;
            };
            let address = self.did_address(from_did)?;
            let owned = self.ctx.input_scripts.iter().any(|script| {
                script_pubkey_to_address(script, network).as_deref() == address.as_deref()
            });
            if address.is_none() || !owned {
                return Err(ValidationError::DidAddressNotOwned);
            }
        }
        Ok(())
    }
}

/// Absolute lock-time finality against the next block's height and the tip's median time.
pub fn is_final(tx: &Transaction, height: u64, median_time: u32) -> bool {
    if tx.lock_time == 0 {
        return true;
    }
    let limit = if tx.lock_time < LOCKTIME_THRESHOLD {
        height
    } else {
        median_time as u64
    };
    if (tx.lock_time as u64) < limit {
        return true;
    }
    tx.inputs.iter().all(|input| input.sequence == SEQUENCE_FINAL)
}
