//! Script interpreter.
//!
//! Supports the opcode subset the standard templates need: pushes, small integers,
//! stack and hashing helpers, equality and numeric equality, and single-key signature
//! checks. Anything else fails evaluation.

use mvsd_primitives::hash::{hash160, sha256, sha256d};
use mvsd_primitives::transaction::Transaction;
use ripemd::{Digest, Ripemd160};
use secp256k1::{ecdsa::Signature, Message, PublicKey};

use crate::opcodes::*;
use crate::secp::secp256k1_verify;
use crate::sighash::{signature_hash, SighashType};
use crate::standard::{decode_script_num, encode_script_num};

pub type ScriptFlags = u32;

pub const SCRIPT_VERIFY_NONE: ScriptFlags = 0;
pub const SCRIPT_VERIFY_P2SH: ScriptFlags = 1 << 0;
pub const SCRIPT_VERIFY_STRICTENC: ScriptFlags = 1 << 1;
pub const SCRIPT_VERIFY_LOW_S: ScriptFlags = 1 << 3;
pub const SCRIPT_VERIFY_SIGPUSHONLY: ScriptFlags = 1 << 5;
pub const SCRIPT_VERIFY_MINIMALDATA: ScriptFlags = 1 << 6;
pub const SCRIPT_VERIFY_CLEANSTACK: ScriptFlags = 1 << 8;

pub const MANDATORY_SCRIPT_VERIFY_FLAGS: ScriptFlags = SCRIPT_VERIFY_P2SH;
pub const STANDARD_SCRIPT_VERIFY_FLAGS: ScriptFlags = MANDATORY_SCRIPT_VERIFY_FLAGS
    | SCRIPT_VERIFY_STRICTENC
    | SCRIPT_VERIFY_MINIMALDATA
    | SCRIPT_VERIFY_LOW_S
    | SCRIPT_VERIFY_SIGPUSHONLY;
pub const BLOCK_SCRIPT_VERIFY_FLAGS: ScriptFlags = MANDATORY_SCRIPT_VERIFY_FLAGS;

const MAX_STACK_SIZE: usize = 1000;
const MAX_ELEMENT_SIZE: usize = 520;
const MAX_NUM_LEN: usize = 4;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ScriptError {
    StackUnderflow,
    StackOverflow,
    PushSize,
    BadPush,
    EvalFalse,
    InvalidOpcode(u8),
    NumberEncoding,
    NumEqualVerify,
    EqualVerify,
    SigEncoding,
    PubkeyEncoding,
    SigHashType,
    SigCheck,
    SigPushOnly,
    MinimalData,
    CleanStack,
}

impl std::fmt::Display for ScriptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScriptError::StackUnderflow => write!(f, "script stack underflow"),
            ScriptError::StackOverflow => write!(f, "script stack too large"),
            ScriptError::PushSize => write!(f, "pushed element too large"),
            ScriptError::BadPush => write!(f, "push runs past end of script"),
            ScriptError::EvalFalse => write!(f, "script evaluated to false"),
            ScriptError::InvalidOpcode(opcode) => write!(f, "invalid opcode 0x{opcode:02x}"),
            ScriptError::NumberEncoding => write!(f, "invalid script number"),
            ScriptError::NumEqualVerify => write!(f, "OP_NUMEQUALVERIFY failed"),
            ScriptError::EqualVerify => write!(f, "OP_EQUALVERIFY failed"),
            ScriptError::SigEncoding => write!(f, "invalid signature encoding"),
            ScriptError::PubkeyEncoding => write!(f, "invalid public key encoding"),
            ScriptError::SigHashType => write!(f, "invalid sighash type"),
            ScriptError::SigCheck => write!(f, "signature check failed"),
            ScriptError::SigPushOnly => write!(f, "scriptSig is not push-only"),
            ScriptError::MinimalData => write!(f, "non-minimal push"),
            ScriptError::CleanStack => write!(f, "stack not clean after evaluation"),
        }
    }
}

impl std::error::Error for ScriptError {}

/// Runs `script_sig` then `script_pubkey` for `tx.inputs[input_index]`.
pub fn verify_script(
    script_sig: &[u8],
    script_pubkey: &[u8],
    tx: &Transaction,
    input_index: usize,
    flags: ScriptFlags,
) -> Result<(), ScriptError> {
    let push_only = is_push_only(script_sig);
    if flags & SCRIPT_VERIFY_SIGPUSHONLY != 0 && !push_only {
        return Err(ScriptError::SigPushOnly);
    }
    let checker = SignatureChecker {
        tx,
        input_index,
        flags,
    };

    let mut machine = Machine::new(&checker);
    machine.run(script_sig)?;
    let saved = machine.stack.clone();
    machine.run(script_pubkey)?;
    if !machine.top_is_true() {
        return Err(ScriptError::EvalFalse);
    }

    if flags & SCRIPT_VERIFY_P2SH != 0 && is_p2sh(script_pubkey) {
        if !push_only {
            return Err(ScriptError::SigPushOnly);
        }
        let mut stack = saved;
        let redeem = stack.pop().ok_or(ScriptError::StackUnderflow)?;
        machine.stack = stack;
        machine.run(&redeem)?;
        if !machine.top_is_true() {
            return Err(ScriptError::EvalFalse);
        }
    }

    if flags & SCRIPT_VERIFY_CLEANSTACK != 0 && machine.stack.len() != 1 {
        return Err(ScriptError::CleanStack);
    }
    Ok(())
}

struct SignatureChecker<'a> {
    tx: &'a Transaction,
    input_index: usize,
    flags: ScriptFlags,
}

impl SignatureChecker<'_> {
    fn check_sig(
        &self,
        sig_bytes: &[u8],
        pubkey_bytes: &[u8],
        script_code: &[u8],
    ) -> Result<bool, ScriptError> {
        let Some((&hash_type, der)) = sig_bytes.split_last() else {
            return Ok(false);
        };
        let sighash_type = SighashType(hash_type as u32);
        if self.flags & SCRIPT_VERIFY_STRICTENC != 0 {
            if !sighash_type.is_defined() {
                return Err(ScriptError::SigHashType);
            }
            if !matches!(
                (pubkey_bytes.len(), pubkey_bytes.first()),
                (33, Some(0x02 | 0x03)) | (65, Some(0x04))
            ) {
                return Err(ScriptError::PubkeyEncoding);
            }
        }

        let mut sig = match Signature::from_der(der) {
            Ok(sig) => sig,
            Err(_) => {
                mvsd_log::log_debug!("undecodable DER signature ({} bytes)", sig_bytes.len());
                return if self.flags & SCRIPT_VERIFY_STRICTENC != 0 {
                    Err(ScriptError::SigEncoding)
                } else {
                    Ok(false)
                };
            }
        };
        let original = sig;
        sig.normalize_s();
        if self.flags & SCRIPT_VERIFY_LOW_S != 0 && sig != original {
            return Err(ScriptError::SigEncoding);
        }

        let Ok(pubkey) = PublicKey::from_slice(pubkey_bytes) else {
            return Ok(false);
        };
        let Ok(digest) = signature_hash(self.tx, self.input_index, script_code, sighash_type)
        else {
            return Ok(false);
        };
        let msg = Message::from_digest(digest);
        Ok(secp256k1_verify().verify_ecdsa(&msg, &sig, &pubkey).is_ok())
    }
}

struct Machine<'a, 'c> {
    stack: Vec<Vec<u8>>,
    checker: &'a SignatureChecker<'c>,
}

impl<'a, 'c> Machine<'a, 'c> {
    fn new(checker: &'a SignatureChecker<'c>) -> Self {
        Self {
            stack: Vec::new(),
            checker,
        }
    }

    fn top_is_true(&self) -> bool {
        self.stack.last().is_some_and(|top| cast_to_bool(top))
    }

    fn pop(&mut self) -> Result<Vec<u8>, ScriptError> {
        self.stack.pop().ok_or(ScriptError::StackUnderflow)
    }

    fn pop_num(&mut self) -> Result<i64, ScriptError> {
        let data = self.pop()?;
        decode_script_num(&data, MAX_NUM_LEN).map_err(|_| ScriptError::NumberEncoding)
    }

    fn push(&mut self, data: Vec<u8>) -> Result<(), ScriptError> {
        if data.len() > MAX_ELEMENT_SIZE {
            return Err(ScriptError::PushSize);
        }
        if self.stack.len() >= MAX_STACK_SIZE {
            return Err(ScriptError::StackOverflow);
        }
        self.stack.push(data);
        Ok(())
    }

    fn run(&mut self, script: &[u8]) -> Result<(), ScriptError> {
        let mut cursor = 0usize;
        let mut code_start = 0usize;
        while cursor < script.len() {
            let opcode = script[cursor];
            cursor += 1;

            if opcode <= OP_PUSHDATA4 {
                let data = read_push(script, &mut cursor, opcode)?;
                if self.checker.flags & SCRIPT_VERIFY_MINIMALDATA != 0
                    && !is_minimal_push(&data, opcode)
                {
                    return Err(ScriptError::MinimalData);
                }
                self.push(data)?;
                continue;
            }

            match opcode {
                OP_1NEGATE => self.push(encode_script_num(-1))?,
                OP_1..=OP_16 => self.push(encode_script_num((opcode - OP_1 + 1) as i64))?,
                OP_NOP1 | 0xb1..=OP_NOP10 => {}
                OP_VERIFY => {
                    if !cast_to_bool(&self.pop()?) {
                        return Err(ScriptError::EvalFalse);
                    }
                }
                OP_DROP => {
                    self.pop()?;
                }
                OP_DUP => {
                    let top = self
                        .stack
                        .last()
                        .ok_or(ScriptError::StackUnderflow)?
                        .clone();
                    self.push(top)?;
                }
                OP_SIZE => {
                    let len = self.stack.last().ok_or(ScriptError::StackUnderflow)?.len();
                    self.push(encode_script_num(len as i64))?;
                }
                OP_EQUAL | OP_EQUALVERIFY => {
                    let a = self.pop()?;
                    let b = self.pop()?;
                    if opcode == OP_EQUALVERIFY {
                        if a != b {
                            return Err(ScriptError::EqualVerify);
                        }
                    } else {
                        self.push(bool_to_vec(a == b))?;
                    }
                }
                OP_NUMEQUAL | OP_NUMEQUALVERIFY => {
                    let a = self.pop_num()?;
                    let b = self.pop_num()?;
                    if opcode == OP_NUMEQUALVERIFY {
                        if a != b {
                            return Err(ScriptError::NumEqualVerify);
                        }
                    } else {
                        self.push(bool_to_vec(a == b))?;
                    }
                }
                OP_RIPEMD160 => {
                    let data = self.pop()?;
                    self.push(Ripemd160::digest(&data).to_vec())?;
                }
                OP_SHA256 => {
                    let data = self.pop()?;
                    self.push(sha256(&data).to_vec())?;
                }
                OP_HASH160 => {
                    let data = self.pop()?;
                    self.push(hash160(&data).to_vec())?;
                }
                OP_HASH256 => {
                    let data = self.pop()?;
                    self.push(sha256d(&data).to_vec())?;
                }
                OP_CODESEPARATOR => code_start = cursor,
                OP_CHECKSIG | OP_CHECKSIGVERIFY => {
                    let pubkey = self.pop()?;
                    let sig = self.pop()?;
                    let ok = self
                        .checker
                        .check_sig(&sig, &pubkey, &script[code_start..])?;
                    if opcode == OP_CHECKSIGVERIFY {
                        if !ok {
                            return Err(ScriptError::SigCheck);
                        }
                    } else {
                        self.push(bool_to_vec(ok))?;
                    }
                }
                _ => return Err(ScriptError::InvalidOpcode(opcode)),
            }
        }
        Ok(())
    }
}

fn read_push(script: &[u8], cursor: &mut usize, opcode: u8) -> Result<Vec<u8>, ScriptError> {
    let len = match opcode {
        OP_0 => 0,
        OP_PUSHDATA1 => take(script, cursor, 1)?[0] as usize,
        OP_PUSHDATA2 => {
            let bytes = take(script, cursor, 2)?;
            u16::from_le_bytes([bytes[0], bytes[1]]) as usize
        }
        OP_PUSHDATA4 => {
            let bytes = take(script, cursor, 4)?;
            u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
        }
        direct => direct as usize,
    };
    Ok(take(script, cursor, len)?.to_vec())
}

fn take<'s>(script: &'s [u8], cursor: &mut usize, len: usize) -> Result<&'s [u8], ScriptError> {
    let end = cursor.checked_add(len).ok_or(ScriptError::BadPush)?;
    let slice = script.get(*cursor..end).ok_or(ScriptError::BadPush)?;
    *cursor = end;
    Ok(slice)
}

/// Data pushed by a push-only script such as a P2PKH `script_sig`.
pub fn pushed_items(script: &[u8]) -> Option<Vec<Vec<u8>>> {
    let mut items = Vec::new();
    let mut cursor = 0usize;
    while cursor < script.len() {
        let opcode = script[cursor];
        cursor += 1;
        if opcode > OP_PUSHDATA4 {
            return None;
        }
        items.push(read_push(script, &mut cursor, opcode).ok()?);
    }
    Some(items)
}

pub fn is_push_only(script: &[u8]) -> bool {
    let mut cursor = 0usize;
    while cursor < script.len() {
        let opcode = script[cursor];
        cursor += 1;
        if opcode <= OP_PUSHDATA4 {
            if read_push(script, &mut cursor, opcode).is_err() {
                return false;
            }
        } else if !(opcode == OP_1NEGATE || (OP_1..=OP_16).contains(&opcode)) {
            return false;
        }
    }
    true
}

fn is_p2sh(script: &[u8]) -> bool {
    script.len() == 23 && script[0] == OP_HASH160 && script[1] == 0x14 && script[22] == OP_EQUAL
}

fn is_minimal_push(data: &[u8], opcode: u8) -> bool {
    match data.len() {
        0 => opcode == OP_0,
        1 if (1..=16).contains(&data[0]) => opcode == OP_1 + data[0] - 1,
        1 if data[0] == 0x81 => opcode == OP_1NEGATE,
        len if len <= 0x4b => opcode as usize == len,
        len if len <= 0xff => opcode == OP_PUSHDATA1,
        len if len <= 0xffff => opcode == OP_PUSHDATA2,
        _ => true,
    }
}

fn bool_to_vec(value: bool) -> Vec<u8> {
    if value {
        vec![1]
    } else {
        Vec::new()
    }
}

fn cast_to_bool(data: &[u8]) -> bool {
    match data.iter().rposition(|byte| *byte != 0) {
        Some(index) => !(index == data.len() - 1 && data[index] == 0x80),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_tx() -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![mvsd_primitives::TxIn::new(
                mvsd_primitives::OutPoint::new([7u8; 32], 0),
            )],
            outputs: Vec::new(),
            lock_time: 0,
        }
    }

    #[test]
    fn cast_to_bool_treats_negative_zero_as_false() {
        assert!(!cast_to_bool(&[]));
        assert!(!cast_to_bool(&[0, 0, 0x80]));
        assert!(cast_to_bool(&[0, 1, 0x80]));
        assert!(cast_to_bool(&[1]));
    }

    #[test]
    fn numequalverify_compares_numbers() {
        let tx = empty_tx();
        // <5> <5> OP_NUMEQUALVERIFY OP_1
        let script_pubkey = [0x55, OP_NUMEQUALVERIFY, OP_1];
        verify_script(&[0x55], &script_pubkey, &tx, 0, SCRIPT_VERIFY_NONE).expect("equal");
        assert_eq!(
            verify_script(&[0x56], &script_pubkey, &tx, 0, SCRIPT_VERIFY_NONE),
            Err(ScriptError::NumEqualVerify)
        );
    }

    #[test]
    fn unknown_opcode_fails() {
        let tx = empty_tx();
        assert_eq!(
            verify_script(&[], &[OP_1, 0xba], &tx, 0, SCRIPT_VERIFY_NONE),
            Err(ScriptError::InvalidOpcode(0xba))
        );
    }

    #[test]
    fn truncated_push_is_rejected() {
        let tx = empty_tx();
        assert!(!is_push_only(&[0x05, 0x01]));
        assert_eq!(
            verify_script(&[0x05, 0x01], &[OP_1], &tx, 0, SCRIPT_VERIFY_NONE),
            Err(ScriptError::BadPush)
        );
    }

    #[test]
    fn pushed_items_reads_signature_and_key() {
        let mut script = vec![0x02, 0xaa, 0xbb, 0x4c, 0x03];
        script.extend_from_slice(&[1, 2, 3]);
        assert_eq!(
            pushed_items(&script),
            Some(vec![vec![0xaa, 0xbb], vec![1, 2, 3]])
        );
        assert_eq!(pushed_items(&[0x51]), None);
        assert_eq!(pushed_items(&[0x05, 0x01]), None);
    }
}
