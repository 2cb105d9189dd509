//! Signing helpers for pay-to-pubkey-hash inputs.

use mvsd_primitives::hash::hash160;
use mvsd_primitives::transaction::Transaction;
use secp256k1::{Message, PublicKey, SecretKey};

use crate::secp::secp256k1_sign;
use crate::sighash::{signature_hash, SighashError, SighashType};
use crate::standard::{
    classify_script_pubkey, encode_script_num, lock_height_from_script, push_data, ScriptType,
};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SignError {
    UnsupportedScript(ScriptType),
    KeyMismatch,
    Sighash(SighashError),
}

impl std::fmt::Display for SignError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignError::UnsupportedScript(kind) => {
                write!(f, "cannot sign for {} output", kind.as_str())
            }
            SignError::KeyMismatch => write!(f, "key does not match output"),
            SignError::Sighash(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for SignError {}

impl From<SighashError> for SignError {
    fn from(err: SighashError) -> Self {
        SignError::Sighash(err)
    }
}

/// DER signature over the input digest with the sighash byte appended.
pub fn create_signature(
    tx: &Transaction,
    input_index: usize,
    script_code: &[u8],
    secret_key: &SecretKey,
    sighash_type: SighashType,
) -> Result<Vec<u8>, SignError> {
    let digest = signature_hash(tx, input_index, script_code, sighash_type)?;
    let sig = secp256k1_sign().sign_ecdsa(&Message::from_digest(digest), secret_key);
    let mut out = sig.serialize_der().to_vec();
    out.push(sighash_type.0 as u8);
    Ok(out)
}

/// Builds the script_sig that spends `prev_script` (plain or lock-height p2pkh).
pub fn sign_p2pkh_input(
    tx: &Transaction,
    input_index: usize,
    prev_script: &[u8],
    secret_key: &SecretKey,
) -> Result<Vec<u8>, SignError> {
    let kind = classify_script_pubkey(prev_script);
    let lock_height = match kind {
        ScriptType::P2Pkh => None,
        ScriptType::LockHeightP2pkh => lock_height_from_script(prev_script),
        other => return Err(SignError::UnsupportedScript(other)),
    };

    let pubkey = PublicKey::from_secret_key(secp256k1_sign(), secret_key).serialize();
    let hash = hash160(&pubkey);
    let body = &prev_script[prev_script.len() - 25..];
    if body[3..23] != hash {
        return Err(SignError::KeyMismatch);
    }

    let signature = create_signature(tx, input_index, prev_script, secret_key, SighashType::ALL)?;
    let mut script_sig = Vec::with_capacity(signature.len() + pubkey.len() + 8);
    push_data(&mut script_sig, &signature);
    push_data(&mut script_sig, &pubkey);
    if let Some(height) = lock_height {
        push_data(&mut script_sig, &encode_script_num(height as i64));
    }
    Ok(script_sig)
}

/// Signs every input of `tx` with `secret_key`, given the spent scripts in input order.
pub fn sign_all_inputs(
    tx: &mut Transaction,
    prev_scripts: &[Vec<u8>],
    secret_key: &SecretKey,
) -> Result<(), SignError> {
    for (index, prev_script) in prev_scripts.iter().enumerate().take(tx.inputs.len()) {
        let script_sig = sign_p2pkh_input(tx, index, prev_script, secret_key)?;
        tx.inputs[index].script_sig = script_sig;
    }
    Ok(())
}
