//! Signature hashing for transaction inputs.

use mvsd_consensus::Hash256;
use mvsd_primitives::encoding::{Encodable, Encoder};
use mvsd_primitives::hash::sha256d;
use mvsd_primitives::transaction::{Transaction, TxOut};

pub const SIGHASH_ALL: u32 = 0x01;
pub const SIGHASH_NONE: u32 = 0x02;
pub const SIGHASH_SINGLE: u32 = 0x03;
pub const SIGHASH_ANYONECANPAY: u32 = 0x80;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SighashType(pub u32);

impl SighashType {
    pub const ALL: SighashType = SighashType(SIGHASH_ALL);

    pub fn base_type(self) -> u32 {
        self.0 & 0x1f
    }

    pub fn has_anyone_can_pay(self) -> bool {
        (self.0 & SIGHASH_ANYONECANPAY) != 0
    }

    pub fn is_defined(self) -> bool {
        matches!(
            self.base_type(),
            SIGHASH_ALL | SIGHASH_NONE | SIGHASH_SINGLE
        )
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SighashError {
    InputIndexOutOfRange,
    MissingOutput,
}

impl std::fmt::Display for SighashError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SighashError::InputIndexOutOfRange => write!(f, "input index out of range"),
            SighashError::MissingOutput => write!(f, "no matching output for SIGHASH_SINGLE"),
        }
    }
}

impl std::error::Error for SighashError {}

/// Digest signed by the key spending `tx.inputs[input_index]`.
///
/// Only the signing input carries `script_code`; the others are blanked. Outputs are
/// serialized with their attachments and identity fields so a signature covers the
/// assets it moves.
pub fn signature_hash(
    tx: &Transaction,
    input_index: usize,
    script_code: &[u8],
    sighash_type: SighashType,
) -> Result<Hash256, SighashError> {
    if input_index >= tx.inputs.len() {
        return Err(SighashError::InputIndexOutOfRange);
    }
    let hash_none = sighash_type.base_type() == SIGHASH_NONE;
    let hash_single = sighash_type.base_type() == SIGHASH_SINGLE;
    if hash_single && input_index >= tx.outputs.len() {
        return Err(SighashError::MissingOutput);
    }
    let anyone_can_pay = sighash_type.has_anyone_can_pay();

    let mut encoder = Encoder::with_capacity(tx.serialized_size() + script_code.len() + 4);
    encoder.write_u32_le(tx.version);

    let signing: Vec<usize> = if anyone_can_pay {
        vec![input_index]
    } else {
        (0..tx.inputs.len()).collect()
    };
    encoder.write_varint(signing.len() as u64);
    for index in signing {
        let input = &tx.inputs[index];
        input.prevout.consensus_encode(&mut encoder);
        if index == input_index {
            encoder.write_var_bytes(script_code);
            encoder.write_u32_le(input.sequence);
        } else {
            encoder.write_varint(0);
            encoder.write_u32_le(if hash_none || hash_single {
                0
            } else {
                input.sequence
            });
        }
    }

    let output_count = if hash_none {
        0
    } else if hash_single {
        input_index + 1
    } else {
        tx.outputs.len()
    };
    encoder.write_varint(output_count as u64);
    let blank = TxOut {
        value: u64::MAX,
        ..TxOut::default()
    };
    for (index, output) in tx.outputs.iter().take(output_count).enumerate() {
        if hash_single && index != input_index {
            blank.consensus_encode(&mut encoder);
        } else {
            output.consensus_encode(&mut encoder);
        }
    }

    encoder.write_u32_le(tx.lock_time);
    encoder.write_u32_le(sighash_type.0);
    Ok(sha256d(&encoder.into_inner()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mvsd_primitives::outpoint::OutPoint;
    use mvsd_primitives::transaction::TxIn;

    fn sample_tx() -> Transaction {
        Transaction {
            version: 2,
            inputs: vec![
                TxIn::new(OutPoint::new([1u8; 32], 0)),
                TxIn::new(OutPoint::new([2u8; 32], 1)),
            ],
            outputs: vec![TxOut::coin(10, vec![0x51]), TxOut::coin(20, vec![0x52])],
            lock_time: 0,
        }
    }

    #[test]
    fn other_input_scripts_do_not_affect_digest() {
        let mut tx = sample_tx();
        let before = signature_hash(&tx, 0, &[0xac], SighashType::ALL).expect("sighash");
        tx.inputs[1].script_sig = vec![0x01, 0x02];
        let after = signature_hash(&tx, 0, &[0xac], SighashType::ALL).expect("sighash");
        assert_eq!(before, after);
    }

    #[test]
    fn single_requires_matching_output() {
        let mut tx = sample_tx();
        tx.outputs.truncate(1);
        assert_eq!(
            signature_hash(&tx, 1, &[], SighashType(SIGHASH_SINGLE)),
            Err(SighashError::MissingOutput)
        );
        assert_eq!(
            signature_hash(&tx, 2, &[], SighashType::ALL),
            Err(SighashError::InputIndexOutOfRange)
        );
    }
}
