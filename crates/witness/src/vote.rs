//! Epoch vote-tally output carried by the coinbase of an epoch's first block.

use mvsd_consensus::Hash256;
use mvsd_primitives::encoding::Encoder;
use mvsd_primitives::hash::{hash160, sha256d};
use mvsd_primitives::transaction::{Transaction, TxOut};

/// Commitment to an ordered witness list.
pub fn witness_mixhash(witnesses: &[Vec<u8>]) -> Hash256 {
    let mut encoder = Encoder::with_capacity(8 + witnesses.len() * 20);
    encoder.write_varint(witnesses.len() as u64);
    for witness in witnesses {
        encoder.write_bytes(&hash160(witness));
    }
    sha256d(&encoder.into_inner())
}

/// Zero-value output whose script is a single 32-byte push of the mixhash.
pub fn vote_result_output(witnesses: &[Vec<u8>]) -> TxOut {
    let mixhash = witness_mixhash(witnesses);
    let mut script = Vec::with_capacity(33);
    script.push(0x20);
    script.extend_from_slice(&mixhash);
    TxOut::coin(0, script)
}

pub fn is_vote_result_output(output: &TxOut) -> bool {
    output.value == 0
        && output.attachment.asset_symbol().is_none()
        && output.script_pubkey.len() == 33
        && output.script_pubkey[0] == 0x20
}

/// Checks that the coinbase's last output commits to `witnesses`.
pub fn verify_vote_result(coinbase: &Transaction, witnesses: &[Vec<u8>]) -> bool {
    let Some(output) = coinbase.outputs.last() else {
        return false;
    };
    is_vote_result_output(output) && output.script_pubkey[1..] == witness_mixhash(witnesses)
}
