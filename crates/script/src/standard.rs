//! Standard output templates and sigop accounting.

use mvsd_primitives::address::{p2pkh_script, split_lock_prefix};
use mvsd_primitives::transaction::Transaction;

use crate::opcodes::*;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScriptType {
    P2Pk,
    P2Pkh,
    P2Sh,
    /// `<height> OP_NUMEQUALVERIFY` followed by a pay-to-pubkey-hash body.
    LockHeightP2pkh,
    NullData,
    Unknown,
}

impl ScriptType {
    pub fn as_str(self) -> &'static str {
        match self {
            ScriptType::P2Pk => "pubkey",
            ScriptType::P2Pkh => "pubkeyhash",
            ScriptType::P2Sh => "scripthash",
            ScriptType::LockHeightP2pkh => "pubkeyhash_lockheight",
            ScriptType::NullData => "nulldata",
            ScriptType::Unknown => "nonstandard",
        }
    }
}

pub fn classify_script_pubkey(script: &[u8]) -> ScriptType {
    if is_p2pkh(script) {
        ScriptType::P2Pkh
    } else if is_p2sh(script) {
        ScriptType::P2Sh
    } else if lock_height_from_script(script).is_some() {
        ScriptType::LockHeightP2pkh
    } else if is_p2pk(script) {
        ScriptType::P2Pk
    } else if script.first() == Some(&OP_RETURN) {
        ScriptType::NullData
    } else {
        ScriptType::Unknown
    }
}

pub fn is_standard_script(script: &[u8]) -> bool {
    classify_script_pubkey(script) != ScriptType::Unknown
}

/// The lock height a lock-height output commits to, if `script` is one.
pub fn lock_height_from_script(script: &[u8]) -> Option<u64> {
    let (height_bytes, rest) = split_lock_prefix(script)?;
    if !is_p2pkh(rest) {
        return None;
    }
    let height = decode_script_num(height_bytes, 8).ok()?;
    u64::try_from(height).ok().filter(|height| *height > 0)
}

pub fn p2pkh_with_lock_height(hash: &[u8; 20], lock_height: u64) -> Vec<u8> {
    let mut script = Vec::with_capacity(34);
    push_data(&mut script, &encode_script_num(lock_height as i64));
    script.push(OP_NUMEQUALVERIFY);
    script.extend_from_slice(&p2pkh_script(hash));
    script
}

/// Appends the shortest push of `data`.
pub fn push_data(script: &mut Vec<u8>, data: &[u8]) {
    match data.len() {
        0 => script.push(OP_0),
        len @ 1..=0x4b => {
            script.push(len as u8);
            script.extend_from_slice(data);
        }
        len @ 0x4c..=0xff => {
            script.push(OP_PUSHDATA1);
            script.push(len as u8);
            script.extend_from_slice(data);
        }
        len @ 0x100..=0xffff => {
            script.push(OP_PUSHDATA2);
            script.extend_from_slice(&(len as u16).to_le_bytes());
            script.extend_from_slice(data);
        }
        len => {
            script.push(OP_PUSHDATA4);
            script.extend_from_slice(&(len as u32).to_le_bytes());
            script.extend_from_slice(data);
        }
    }
}

/// Counts signature operations without looking at redeem scripts.
pub fn legacy_sigop_count(script: &[u8]) -> u32 {
    let mut count = 0u32;
    let mut cursor = 0usize;
    while cursor < script.len() {
        let opcode = script[cursor];
        cursor += 1;
        let skip = match opcode {
            0x01..=0x4b => opcode as usize,
            OP_PUSHDATA1 => match script.get(cursor) {
                Some(len) => 1 + *len as usize,
                None => break,
            },
            OP_PUSHDATA2 => match script.get(cursor..cursor + 2) {
                Some(bytes) => 2 + u16::from_le_bytes([bytes[0], bytes[1]]) as usize,
                None => break,
            },
            OP_PUSHDATA4 => match script.get(cursor..cursor + 4) {
                Some(bytes) => {
                    4 + u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
                }
                None => break,
            },
            OP_CHECKSIG | OP_CHECKSIGVERIFY => {
                count += 1;
                0
            }
            OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                count += 20;
                0
            }
            _ => 0,
        };
        cursor = cursor.saturating_add(skip);
    }
    count
}

pub fn transaction_sigops(tx: &Transaction) -> u32 {
    let inputs: u32 = tx
        .inputs
        .iter()
        .map(|input| legacy_sigop_count(&input.script_sig))
        .sum();
    let outputs: u32 = tx
        .outputs
        .iter()
        .map(|output| legacy_sigop_count(&output.script_pubkey))
        .sum();
    inputs + outputs
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ScriptNumError {
    Overflow,
    NonMinimal,
}

pub fn decode_script_num(data: &[u8], max_len: usize) -> Result<i64, ScriptNumError> {
    if data.is_empty() {
        return Ok(0);
    }
    if data.len() > max_len {
        return Err(ScriptNumError::Overflow);
    }
    let last = data[data.len() - 1];
    if last & 0x7f == 0 && (data.len() == 1 || data[data.len() - 2] & 0x80 == 0) {
        return Err(ScriptNumError::NonMinimal);
    }
    let mut result: i64 = 0;
    for (index, byte) in data.iter().enumerate() {
        result |= (*byte as i64) << (8 * index);
    }
    if last & 0x80 != 0 {
        result &= !(0x80i64 << (8 * (data.len() - 1)));
        result = -result;
    }
    Ok(result)
}

pub fn encode_script_num(value: i64) -> Vec<u8> {
    if value == 0 {
        return Vec::new();
    }
    let mut abs = value.unsigned_abs();
    let mut out = Vec::new();
    while abs > 0 {
        out.push((abs & 0xff) as u8);
        abs >>= 8;
    }
    if let Some(last) = out.last_mut() {
        if *last & 0x80 != 0 {
            out.push(if value < 0 { 0x80 } else { 0 });
        } else if value < 0 {
            *last |= 0x80;
        }
    }
    out
}

fn is_p2pkh(script: &[u8]) -> bool {
    script.len() == 25
        && script[0] == OP_DUP
        && script[1] == OP_HASH160
        && script[2] == 0x14
        && script[23] == OP_EQUALVERIFY
        && script[24] == OP_CHECKSIG
}

fn is_p2sh(script: &[u8]) -> bool {
    script.len() == 23 && script[0] == OP_HASH160 && script[1] == 0x14 && script[22] == OP_EQUAL
}

fn is_p2pk(script: &[u8]) -> bool {
    match script.first().copied() {
        Some(len @ (33 | 65)) => {
            script.len() == len as usize + 2 && script[script.len() - 1] == OP_CHECKSIG
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_num_encoding_matches_minimal_form() {
        assert_eq!(encode_script_num(0), Vec::<u8>::new());
        assert_eq!(encode_script_num(127), vec![0x7f]);
        assert_eq!(encode_script_num(128), vec![0x80, 0x00]);
        assert_eq!(encode_script_num(-1), vec![0x81]);
        assert_eq!(encode_script_num(25_200), vec![0x70, 0x62]);
        assert_eq!(decode_script_num(&[0x80, 0x00], 4), Ok(128));
        assert_eq!(decode_script_num(&[0x05, 0x00], 4), Err(ScriptNumError::NonMinimal));
        assert_eq!(
            decode_script_num(&[1, 2, 3, 4, 5], 4),
            Err(ScriptNumError::Overflow)
        );
    }

    #[test]
    fn sigops_skip_pushed_data() {
        let mut script = Vec::new();
        push_data(&mut script, &[OP_CHECKSIG; 10]);
        script.push(OP_CHECKSIG);
        assert_eq!(legacy_sigop_count(&script), 1);
        assert_eq!(legacy_sigop_count(&[OP_CHECKMULTISIG]), 20);
        assert_eq!(legacy_sigop_count(&[OP_PUSHDATA2, 0x01]), 0);
    }
}
